//! In-memory storage backend.
//!
//! Objects are held in a `tokio::sync::RwLock<HashMap<...>>` keyed by a
//! randomly generated key.  Nothing survives a restart; the backend has
//! no external dependency and always reports itself healthy.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

use super::backend::{
    collect_stream, once_stream, BackendResult, BackendStream, DataBackend, StoredData,
};
use crate::health::LocationHealth;
use crate::location::BackendType;
use crate::types::{ByteRange, KeyContext};

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryBackend {
    /// Object store: key -> data.
    objects: tokio::sync::RwLock<HashMap<String, Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl DataBackend for MemoryBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }

    fn put(
        &self,
        stream: BackendStream,
        size: u64,
        _key_context: &KeyContext,
    ) -> Pin<Box<dyn Future<Output = BackendResult<StoredData>> + Send + '_>> {
        Box::pin(async move {
            let data = collect_stream(stream, size).await?;
            let key = uuid::Uuid::new_v4().simple().to_string();

            debug!("memory put: key={} size={}", key, data.len());

            self.objects.write().await.insert(key.clone(), data);
            Ok(StoredData { key, etag: None })
        })
    }

    fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Pin<Box<dyn Future<Output = BackendResult<BackendStream>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            let data = objects
                .get(&key)
                .ok_or_else(|| anyhow::anyhow!("Object not found at key: {key}"))?;

            let data = match range {
                Some(range) => {
                    let (start, end) = range.window(data.len() as u64);
                    data.slice(start as usize..end as usize)
                }
                None => data.clone(),
            };
            Ok(once_stream(data))
        })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = BackendResult<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            // Idempotent: absent keys are fine.
            self.objects.write().await.remove(&key);
            Ok(())
        })
    }

    fn healthcheck(&self) -> Pin<Box<dyn Future<Output = LocationHealth> + Send + '_>> {
        Box::pin(async move { LocationHealth::ok() })
    }
}
