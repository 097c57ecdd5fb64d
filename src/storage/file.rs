//! Local filesystem storage backend.
//!
//! Objects are stored as files under a configurable root directory, one
//! file per generated key, fanned out into two-character subdirectories.
//!
//! All writes follow crash-only design: write to temp file, fsync, rename.
//! Reads stream from disk in chunks; a ranged read never loads the whole
//! object.

use futures::{StreamExt, TryStreamExt};
use std::future::Future;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::backend::{BackendResult, BackendStream, DataBackend, StoredData};
use crate::health::LocationHealth;
use crate::location::BackendType;
use crate::types::{ByteRange, KeyContext};

/// Read buffer size for streamed reads.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Stores objects on the local filesystem.
pub struct FileBackend {
    /// Root directory for all stored objects.
    root: PathBuf,
}

impl FileBackend {
    /// Create a new `FileBackend` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        // Also create the .tmp directory for atomic writes.
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self { root })
    }

    /// Resolve a key to an absolute file path.
    ///
    /// Keys are generated by this backend and are plain alphanumerics;
    /// anything else cannot name a file under the root.
    fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        if key.len() < 3 || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            anyhow::bail!("Invalid key for file backend: {key:?}");
        }
        Ok(self.root.join(&key[..2]).join(key))
    }

    /// Generate a temp file path under .tmp/ for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{}", id))
    }

    async fn write_object(&self, mut stream: BackendStream) -> anyhow::Result<StoredData> {
        let key = uuid::Uuid::new_v4().simple().to_string();
        let final_path = self.resolve(&key)?;

        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Crash-only: temp-fsync-rename pattern.
        let tmp_path = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        let mut written: u64 = 0;
        let copied: anyhow::Result<()> = async {
            while let Some(chunk) = stream.try_next().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(e) = copied {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        tokio::fs::rename(&tmp_path, &final_path).await?;
        debug!("file put: key={} size={}", key, written);

        Ok(StoredData { key, etag: None })
    }

    async fn open_range(&self, key: &str, range: Option<ByteRange>) -> anyhow::Result<BackendStream> {
        let path = self.resolve(key)?;

        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Object not found at key {key}: {e}"))?;
        let len = file.metadata().await?.len();

        let (start, end) = match range {
            Some(range) => range.window(len),
            None => (0, len),
        };
        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }

        let reader = file.take(end - start);
        Ok(ReaderStream::with_capacity(reader, READ_CHUNK_SIZE)
            .map_err(anyhow::Error::from)
            .boxed())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let path = self.resolve(key)?;

        // Idempotent: if the file doesn't exist, that's fine.
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl DataBackend for FileBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::File
    }

    fn put(
        &self,
        stream: BackendStream,
        _size: u64,
        _key_context: &KeyContext,
    ) -> Pin<Box<dyn Future<Output = BackendResult<StoredData>> + Send + '_>> {
        Box::pin(async move { Ok(self.write_object(stream).await?) })
    }

    fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Pin<Box<dyn Future<Output = BackendResult<BackendStream>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.open_range(&key, range).await?) })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = BackendResult<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.remove(&key).await?) })
    }

    fn healthcheck(&self) -> Pin<Box<dyn Future<Output = LocationHealth> + Send + '_>> {
        Box::pin(async move { LocationHealth::ok() })
    }
}
