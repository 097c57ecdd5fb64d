//! Location registry.
//!
//! Built once from configuration, read-only afterwards.  Each configured
//! location maps to exactly one adapter; lookups of unknown names fail
//! with a configuration error and never fall back to another location.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, LocationConfig};
use crate::errors::GatewayError;
use crate::storage::aws::AwsS3Client;
use crate::storage::backend::DataBackend;
use crate::storage::cloud::CloudBackend;
use crate::storage::file::FileBackend;
use crate::storage::memory::MemoryBackend;
use crate::storage::native::NativeBackend;
use crate::types::ObjectGetInfo;

/// Backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendType {
    #[serde(rename = "native")]
    Native,
    #[serde(rename = "aws_s3")]
    Cloud,
    #[serde(rename = "mem")]
    Memory,
    #[serde(rename = "file")]
    File,
}

impl BackendType {
    /// Name reported as `dataStoreType`.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Native => "native",
            BackendType::Cloud => "aws_s3",
            BackendType::Memory => "mem",
            BackendType::File => "file",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of one configured location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationConstraint {
    pub name: String,
    pub backend_type: BackendType,
    /// Physical bucket on the cloud service (cloud only).
    pub physical_bucket: Option<String>,
    /// Whether the logical bucket is left out of backend keys (cloud only).
    pub bucket_match: bool,
}

impl LocationConstraint {
    pub fn new(name: impl Into<String>, backend_type: BackendType) -> Self {
        Self {
            name: name.into(),
            backend_type,
            physical_bucket: None,
            bucket_match: false,
        }
    }

    pub fn cloud(name: impl Into<String>, physical_bucket: impl Into<String>, bucket_match: bool) -> Self {
        Self {
            name: name.into(),
            backend_type: BackendType::Cloud,
            physical_bucket: Some(physical_bucket.into()),
            bucket_match,
        }
    }
}

/// A registered location: its constraint plus the adapter serving it.
#[derive(Clone)]
pub struct Location {
    pub constraint: LocationConstraint,
    pub backend: Arc<dyn DataBackend>,
}

/// Name → adapter map, plus the location bare keys resolve to.
#[derive(Clone, Default)]
pub struct LocationRegistry {
    locations: BTreeMap<String, Location>,
    legacy: Option<String>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` under `constraint.name`, replacing any previous entry.
    pub fn register(&mut self, constraint: LocationConstraint, backend: Arc<dyn DataBackend>) {
        self.locations
            .insert(constraint.name.clone(), Location { constraint, backend });
    }

    /// Name the location bare-string object references resolve to.
    pub fn set_legacy(&mut self, name: impl Into<String>) {
        self.legacy = Some(name.into());
    }

    pub fn legacy(&self) -> Option<&str> {
        self.legacy.as_deref()
    }

    /// Build one adapter per configured location.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut registry = Self::new();

        for (name, location) in &config.locations {
            let (constraint, backend): (LocationConstraint, Arc<dyn DataBackend>) = match location
            {
                LocationConfig::Memory => (
                    LocationConstraint::new(name, BackendType::Memory),
                    Arc::new(MemoryBackend::new()),
                ),
                LocationConfig::File(file) => (
                    LocationConstraint::new(name, BackendType::File),
                    Arc::new(FileBackend::new(&file.root_dir)?),
                ),
                LocationConfig::Native(native) => (
                    LocationConstraint::new(name, BackendType::Native),
                    Arc::new(NativeBackend::new(
                        &native.endpoint,
                        &native.path,
                        Duration::from_secs(native.timeout_secs),
                    )?),
                ),
                LocationConfig::Cloud(cloud) => {
                    let client = AwsS3Client::new(
                        cloud.region.clone(),
                        non_empty(&cloud.endpoint_url),
                        cloud.use_path_style,
                        non_empty(&cloud.access_key_id),
                        non_empty(&cloud.secret_access_key),
                    )
                    .await?;
                    let constraint =
                        LocationConstraint::cloud(name, &cloud.bucket, cloud.bucket_match);
                    let backend = CloudBackend::new(&constraint, Arc::new(client))?;
                    (constraint, Arc::new(backend))
                }
            };
            info!(
                location = %name,
                backend_type = %constraint.backend_type,
                "location registered"
            );
            registry.register(constraint, backend);
        }

        if registry.locations.contains_key(&config.legacy_location) {
            registry.set_legacy(&config.legacy_location);
        }

        Ok(registry)
    }

    /// Look up the location named `name`.
    pub fn resolve(&self, name: &str) -> Result<&Location, GatewayError> {
        self.locations
            .get(name)
            .ok_or_else(|| GatewayError::Configuration {
                location: name.to_string(),
            })
    }

    /// Look up the location an object reference points at. Bare keys
    /// resolve to the legacy location.
    pub fn resolve_get_info(&self, info: &ObjectGetInfo) -> Result<&Location, GatewayError> {
        match info {
            ObjectGetInfo::LegacyKey(_) => match &self.legacy {
                Some(legacy) => self.resolve(legacy),
                None => Err(GatewayError::Configuration {
                    location: "legacy".to_string(),
                }),
            },
            ObjectGetInfo::Located {
                data_store_name, ..
            } => self.resolve(data_store_name),
        }
    }

    /// All registered locations, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Location)> {
        self.locations.iter().map(|(name, loc)| (name.as_str(), loc))
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
