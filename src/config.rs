//! Configuration loading and types for the gateway.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  The `locations` section lists every storage
//! location the gateway can route to; the other sections govern the
//! process around it.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server settings (health and metrics surface).
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Health aggregation settings.
    #[serde(default)]
    pub health: HealthConfig,

    /// Location that bare-string object references resolve to.
    #[serde(default = "default_legacy_location")]
    pub legacy_location: String,

    /// Configured storage locations, by name.
    #[serde(default)]
    pub locations: BTreeMap<String, LocationConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            observability: ObservabilityConfig::default(),
            health: HealthConfig::default(),
            legacy_location: default_legacy_location(),
            locations: BTreeMap::new(),
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

/// Health aggregation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Maximum number of location probes in flight at once.
    #[serde(default = "default_health_concurrency")]
    pub concurrency: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            concurrency: default_health_concurrency(),
        }
    }
}

/// One storage location, tagged by backend type.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocationConfig {
    /// Clustered-native storage reached over its REST interface.
    Native(NativeLocationConfig),

    /// Cloud object storage speaking the S3 protocol.
    #[serde(rename = "aws_s3")]
    Cloud(CloudLocationConfig),

    /// Process memory.
    #[serde(rename = "mem")]
    Memory,

    /// Local filesystem.
    File(FileLocationConfig),
}

/// Clustered-native backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NativeLocationConfig {
    /// Base URL of the storage connector, e.g. `http://127.0.0.1:8181`.
    pub endpoint: String,
    /// Path prefix objects live under.
    #[serde(default = "default_native_path")]
    pub path: String,
    /// Request timeout in seconds.
    #[serde(default = "default_native_timeout")]
    pub timeout_secs: u64,
}

/// Cloud object storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudLocationConfig {
    /// Physical bucket on the cloud service.
    pub bucket: String,
    /// When true the logical bucket name is not folded into object keys.
    #[serde(default)]
    pub bucket_match: bool,
    /// Service region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,
    /// Explicit secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
}

/// Local filesystem location configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FileLocationConfig {
    /// Root directory for stored objects.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_legacy_location() -> String {
    "legacy".to_string()
}

fn default_health_concurrency() -> usize {
    8
}

fn default_native_path() -> String {
    "/proxy/arc".to_string()
}

fn default_native_timeout() -> u64 {
    30
}

fn default_storage_root() -> String {
    "./data/objects".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

impl Config {
    /// Reject configurations the registry could not be built from.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, location) in &self.locations {
            if name.trim().is_empty() {
                anyhow::bail!("location names must not be empty");
            }
            match location {
                LocationConfig::Cloud(cloud) if cloud.bucket.trim().is_empty() => {
                    anyhow::bail!("location '{name}' is aws_s3 but has no bucket");
                }
                LocationConfig::Native(native) if native.endpoint.trim().is_empty() => {
                    anyhow::bail!("location '{name}' is native but has no endpoint");
                }
                _ => {}
            }
        }
        if self.health.concurrency == 0 {
            anyhow::bail!("health.concurrency must be at least 1");
        }
        Ok(())
    }
}

/// Parse and validate configuration from YAML text.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}
