//! Backend adapter contract.
//!
//! Every location is served by one [`DataBackend`].  The dispatcher only
//! ever talks to this trait; which protocol sits underneath is the
//! adapter's business.  Multipart methods default to the pass-through
//! behaviour of backends that assemble parts themselves.

use bytes::Bytes;
use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

use crate::health::LocationHealth;
use crate::location::BackendType;
use crate::types::{ByteRange, InitiatedUpload, KeyContext, PartDigest};

/// Byte stream flowing into or out of a backend.
pub type BackendStream = BoxStream<'static, anyhow::Result<Bytes>>;

/// Result type for adapter operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Failures reported by adapters.
///
/// Only the multipart integrity failures are distinguishable; everything
/// else is an opaque cause the dispatcher logs and discards.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("part digest does not match the stored part")]
    InvalidPart,

    #[error("parts cannot be reassembled in the given order")]
    InvalidPartOrder,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// How the health aggregator treats a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthPolicy {
    /// Probed on every health check.
    EveryCheck,
    /// One of the sampled backends is probed per health check.
    Sampled,
}

/// What an adapter reports after writing an object or part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredData {
    /// Key under which the adapter can find the data again.
    pub key: String,
    /// Digest computed by the backend, when it computes one.
    pub etag: Option<String>,
}

/// What an adapter reports after assembling a multipart object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledObject {
    pub key: String,
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

/// Async data backend contract.
pub trait DataBackend: Send + Sync + 'static {
    /// Backend family, reported as `dataStoreType`.
    fn backend_type(&self) -> BackendType;

    fn health_policy(&self) -> HealthPolicy {
        HealthPolicy::EveryCheck
    }

    /// Store `stream` (`size` bytes expected) and return its backend key.
    fn put(
        &self,
        stream: BackendStream,
        size: u64,
        key_context: &KeyContext,
    ) -> Pin<Box<dyn Future<Output = BackendResult<StoredData>> + Send + '_>>;

    /// Open a stream over `key`, restricted to `range` when given.
    fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Pin<Box<dyn Future<Output = BackendResult<BackendStream>> + Send + '_>>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = BackendResult<()>> + Send + '_>>;

    /// Start a multipart upload.
    ///
    /// The default fabricates a random upload id locally: the backend
    /// tracks no session.
    fn create_mpu(
        &self,
        _key_context: &KeyContext,
        _website_redirect: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = BackendResult<InitiatedUpload>> + Send + '_>> {
        Box::pin(async move {
            Ok(InitiatedUpload {
                upload_id: uuid::Uuid::new_v4().simple().to_string(),
                backend_bucket: None,
                backend_key: None,
            })
        })
    }

    /// Upload one part. `None` means the part is not tracked here and
    /// the caller stores it through the regular `put` path.
    fn upload_part(
        &self,
        _stream: BackendStream,
        _size: u64,
        _key_context: &KeyContext,
        _upload_id: &str,
        _part_number: u32,
    ) -> Pin<Box<dyn Future<Output = BackendResult<Option<StoredData>>> + Send + '_>> {
        Box::pin(async move { Ok(None) })
    }

    /// Assemble the parts listed in `parts`, in the order given.
    /// `None` means there was nothing to assemble on this backend.
    fn complete_mpu(
        &self,
        _key_context: &KeyContext,
        _upload_id: &str,
        _parts: &[PartDigest],
    ) -> Pin<Box<dyn Future<Output = BackendResult<Option<AssembledObject>>> + Send + '_>> {
        Box::pin(async move { Ok(None) })
    }

    /// Verify the backend is reachable and correctly configured.
    fn healthcheck(&self) -> Pin<Box<dyn Future<Output = LocationHealth> + Send + '_>>;
}

/// Largest up-front allocation `collect_stream` makes from a caller's size
/// hint. Bigger bodies grow the buffer as chunks arrive.
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

/// Drain `stream` into one contiguous buffer.
pub async fn collect_stream(mut stream: BackendStream, size_hint: u64) -> anyhow::Result<Bytes> {
    use futures::TryStreamExt;

    let mut buf = Vec::with_capacity(size_hint.min(MAX_PREALLOC) as usize);
    while let Some(chunk) = stream.try_next().await? {
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

/// Stream that yields `data` once.
pub fn once_stream(data: Bytes) -> BackendStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}
