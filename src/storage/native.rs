//! Clustered-native storage backend.
//!
//! Talks to the cluster's storage connector over its REST interface.
//! The connector assembles multipart objects and keeps its own
//! bookkeeping, so this adapter leaves the multipart methods at their
//! pass-through defaults.
//!
//! Key mapping:
//!   Objects:  `{endpoint}{path}/{key}` with `key` generated locally
//!   Health:   `{endpoint}{path}/.conf`

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{collect_stream, BackendResult, BackendStream, DataBackend, StoredData};
use crate::health::LocationHealth;
use crate::location::BackendType;
use crate::types::{ByteRange, KeyContext};

/// Length in bytes of a generated key (hex-encoded to twice that).
const KEY_BYTES: usize = 20;

/// Adapter for a clustered-native location.
pub struct NativeBackend {
    /// HTTP client for connector calls.
    client: reqwest::Client,
    /// `{endpoint}{path}`, without a trailing slash.
    base_url: String,
}

impl NativeBackend {
    pub fn new(endpoint: &str, path: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        let base_url = format!(
            "{}/{}",
            endpoint.trim_end_matches('/'),
            path.trim_matches('/')
        );
        let base_url = base_url.trim_end_matches('/').to_string();

        info!("Native backend initialized: base_url={}", base_url);

        Ok(Self { client, base_url })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    /// Generate a fresh object key.
    fn generate_key() -> String {
        let bytes: [u8; KEY_BYTES] = rand::random();
        hex::encode_upper(bytes)
    }

    async fn store(&self, data: Bytes) -> anyhow::Result<StoredData> {
        let key = Self::generate_key();
        let url = self.object_url(&key);

        debug!("native put: url={} size={}", url, data.len());

        let resp = self
            .client
            .put(&url)
            .body(data)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("native put {url} returned {}", resp.status());
        }
        Ok(StoredData { key, etag: None })
    }

    async fn fetch(&self, key: &str, range: Option<ByteRange>) -> anyhow::Result<BackendStream> {
        let url = self.object_url(key);
        let mut req = self.client.get(&url);
        if let Some(range) = range {
            req = req.header(RANGE, range.header_value());
        }

        debug!("native get: url={} range={:?}", url, range);

        let resp = req.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("native get {url} returned {}", resp.status());
        }
        Ok(resp.bytes_stream().map_err(anyhow::Error::from).boxed())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let url = self.object_url(key);

        debug!("native delete: url={}", url);

        let resp = self.client.delete(&url).send().await?;
        let status = resp.status();
        // Already gone is as good as deleted.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        anyhow::bail!("native delete {url} returned {status}")
    }

    async fn check_health(&self) -> LocationHealth {
        let url = format!("{}/.conf", self.base_url);
        match self.client.get(&url).send().await {
            // A connector answering 5xx is up but cannot serve data.
            Ok(resp) if resp.status().is_server_error() => {
                LocationHealth::unreachable(format!("{url} returned {}", resp.status()))
            }
            Ok(resp) => {
                let status = resp.status();
                LocationHealth::Healthy {
                    code: status.as_u16(),
                    message: status.canonical_reason().unwrap_or("").to_string(),
                }
            }
            Err(e) => LocationHealth::unreachable(e),
        }
    }
}

impl DataBackend for NativeBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Native
    }

    fn put(
        &self,
        stream: BackendStream,
        size: u64,
        _key_context: &KeyContext,
    ) -> Pin<Box<dyn Future<Output = BackendResult<StoredData>> + Send + '_>> {
        Box::pin(async move {
            let data = collect_stream(stream, size).await?;
            Ok(self.store(data).await?)
        })
    }

    fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Pin<Box<dyn Future<Output = BackendResult<BackendStream>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.fetch(&key, range).await?) })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = BackendResult<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.remove(&key).await?) })
    }

    fn healthcheck(&self) -> Pin<Box<dyn Future<Output = LocationHealth> + Send + '_>> {
        Box::pin(self.check_health())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::backend::once_stream;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Objects = Arc<Mutex<HashMap<String, Bytes>>>;

    async fn put_object(
        State(objects): State<Objects>,
        Path(key): Path<String>,
        body: Bytes,
    ) -> AxumStatus {
        objects.lock().unwrap().insert(key, body);
        AxumStatus::OK
    }

    async fn get_object(
        State(objects): State<Objects>,
        Path(key): Path<String>,
        headers: HeaderMap,
    ) -> axum::response::Response {
        if key == ".conf" {
            return (AxumStatus::OK, "{}").into_response();
        }
        let Some(data) = objects.lock().unwrap().get(&key).cloned() else {
            return AxumStatus::NOT_FOUND.into_response();
        };
        let range = headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.split_once('-'))
            .map(|(s, e)| {
                ByteRange::new(s.parse().unwrap_or(0), e.parse().ok())
            });
        match range {
            Some(range) => {
                let (start, end) = range.window(data.len() as u64);
                (
                    AxumStatus::PARTIAL_CONTENT,
                    data.slice(start as usize..end as usize),
                )
                    .into_response()
            }
            None => (AxumStatus::OK, data).into_response(),
        }
    }

    async fn delete_object(State(objects): State<Objects>, Path(key): Path<String>) -> AxumStatus {
        match objects.lock().unwrap().remove(&key) {
            Some(_) => AxumStatus::NO_CONTENT,
            None => AxumStatus::NOT_FOUND,
        }
    }

    /// Start an in-process connector, returning its endpoint.
    pub(crate) async fn spawn_connector() -> (String, Objects) {
        let objects: Objects = Arc::new(Mutex::new(HashMap::new()));
        let app = Router::new()
            .route(
                "/proxy/arc/:key",
                get(get_object).put(put_object).delete(delete_object),
            )
            .with_state(objects.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), objects)
    }

    fn backend(endpoint: &str) -> NativeBackend {
        NativeBackend::new(endpoint, "/proxy/arc/", Duration::from_secs(5)).unwrap()
    }

    fn ctx() -> KeyContext {
        KeyContext::new("bucket", "key")
    }

    #[test]
    fn test_base_url_normalization() {
        let backend = backend("http://ring:8181/");
        assert_eq!(backend.object_url("ABC"), "http://ring:8181/proxy/arc/ABC");
    }

    #[test]
    fn test_generated_key_shape() {
        let key = NativeBackend::generate_key();
        assert_eq!(key.len(), KEY_BYTES * 2);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (endpoint, objects) = spawn_connector().await;
        let backend = backend(&endpoint);

        let stored = backend
            .put(once_stream(Bytes::from("0123456789")), 10, &ctx())
            .await
            .unwrap();
        assert!(objects.lock().unwrap().contains_key(&stored.key));

        let full = collect_stream(backend.get(&stored.key, None).await.unwrap(), 0)
            .await
            .unwrap();
        assert_eq!(&full[..], b"0123456789");

        let part = collect_stream(
            backend
                .get(&stored.key, Some(ByteRange::new(4, Some(6))))
                .await
                .unwrap(),
            0,
        )
        .await
        .unwrap();
        assert_eq!(&part[..], b"456");

        backend.delete(&stored.key).await.unwrap();
        // A second delete hits a 404 and is still a success.
        backend.delete(&stored.key).await.unwrap();
        assert!(backend.get(&stored.key, None).await.is_err());
    }

    #[tokio::test]
    async fn test_healthcheck_reports_status() {
        let (endpoint, _objects) = spawn_connector().await;
        let health = backend(&endpoint).healthcheck().await;
        assert_eq!(
            health,
            LocationHealth::Healthy {
                code: 200,
                message: "OK".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_healthcheck_server_error_is_unhealthy() {
        let app = Router::new().route(
            "/proxy/arc/:key",
            get(|| async { AxumStatus::INTERNAL_SERVER_ERROR }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let health = backend(&format!("http://{addr}")).healthcheck().await;
        assert!(health.is_error());
        match health {
            LocationHealth::Unreachable { error } => assert!(error.contains("500"), "{error}"),
            other => panic!("unexpected health {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_healthcheck_unreachable() {
        // Nothing listens on the discard port.
        let health = backend("http://127.0.0.1:9").healthcheck().await;
        assert!(matches!(health, LocationHealth::Unreachable { .. }));
    }
}
