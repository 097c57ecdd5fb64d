//! Cloud object storage backend.
//!
//! Emulates the gateway's key layout and multipart semantics on top of a
//! remote S3-protocol service reached through a [`CloudClient`].  All
//! objects of a location live in one physical bucket; the logical bucket
//! is folded into the key unless the location is configured with
//! `bucket_match`.
//!
//! Multipart session state lives entirely on the remote service: the
//! upload id it issues is handed back verbatim and threaded through by the
//! caller.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::backend::{
    collect_stream, AssembledObject, BackendError, BackendResult, BackendStream, DataBackend,
    HealthPolicy, StoredData,
};
use crate::health::{LocationHealth, VERSIONING_OK_MESSAGE, VERSIONING_REQUIRED_ERROR};
use crate::location::{BackendType, LocationConstraint};
use crate::types::{ByteRange, InitiatedUpload, KeyContext, PartDigest};

/// Versioning status the cloud bucket must report.
const VERSIONING_ENABLED: &str = "Enabled";

/// Error reported by the remote service.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CloudError {
    /// Service error code (e.g. `InvalidPart`, `NoSuchBucket`).
    pub code: Option<String>,
    pub message: String,
}

impl CloudError {
    pub fn new(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

pub type CloudResult<T> = Result<T, CloudError>;

/// Parameters of a single-request object upload.
#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct PutObjectOutput {
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

/// Parameters of a multipart initiate.
#[derive(Debug, Clone)]
pub struct CreateMultipartRequest {
    pub bucket: String,
    pub key: String,
    pub metadata: HashMap<String, String>,
    pub website_redirect_location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateMultipartOutput {
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub upload_id: String,
}

/// Parameters of a part upload.
#[derive(Debug, Clone)]
pub struct UploadPartRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number: u32,
    pub body: Bytes,
}

/// One entry of the part list submitted on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Clone, Default)]
pub struct CompleteMultipartOutput {
    pub key: Option<String>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

/// The remote protocol a cloud location speaks.
pub trait CloudClient: Send + Sync + 'static {
    fn put_object(&self, req: PutObjectRequest) -> Pin<Box<dyn Future<Output = CloudResult<PutObjectOutput>> + Send + '_>>;

    /// Open the object; `range` is an HTTP `Range` header value.
    fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<String>,
    ) -> Pin<Box<dyn Future<Output = CloudResult<BackendStream>> + Send + '_>>;

    fn delete_object(&self, bucket: &str, key: &str) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + '_>>;

    fn create_multipart_upload(
        &self,
        req: CreateMultipartRequest,
    ) -> Pin<Box<dyn Future<Output = CloudResult<CreateMultipartOutput>> + Send + '_>>;

    /// Upload one part, returning the part ETag.
    fn upload_part(&self, req: UploadPartRequest) -> Pin<Box<dyn Future<Output = CloudResult<String>> + Send + '_>>;

    fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Pin<Box<dyn Future<Output = CloudResult<CompleteMultipartOutput>> + Send + '_>>;

    fn head_bucket(&self, bucket: &str) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + '_>>;

    /// Versioning status of `bucket`; `None` when never configured.
    fn get_bucket_versioning(&self, bucket: &str) -> Pin<Box<dyn Future<Output = CloudResult<Option<String>>> + Send + '_>>;
}

/// Build the key an object is stored under in the physical bucket.
pub fn create_cloud_key(bucket_name: &str, object_key: &str, bucket_match: bool) -> String {
    if bucket_match {
        object_key.to_string()
    } else {
        format!("{bucket_name}/{object_key}")
    }
}

/// Adapter for one cloud location.
pub struct CloudBackend {
    /// Location name, for log context.
    location: String,
    client: Arc<dyn CloudClient>,
    /// Physical bucket on the remote service.
    bucket: String,
    bucket_match: bool,
}

impl CloudBackend {
    pub fn new(constraint: &LocationConstraint, client: Arc<dyn CloudClient>) -> anyhow::Result<Self> {
        let bucket = constraint
            .physical_bucket
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("cloud location '{}' has no physical bucket", constraint.name)
            })?;
        Ok(Self {
            location: constraint.name.clone(),
            client,
            bucket,
            bucket_match: constraint.bucket_match,
        })
    }

    fn cloud_key(&self, key_context: &KeyContext) -> String {
        create_cloud_key(
            &key_context.bucket_name,
            &key_context.object_key,
            self.bucket_match,
        )
    }

    fn map_error(&self, operation: &str, err: CloudError) -> anyhow::Error {
        anyhow::anyhow!(
            "cloud location '{}' {operation} failed (code={}): {}",
            self.location,
            err.code().unwrap_or("none"),
            err.message
        )
    }

    /// Map a completion failure; only integrity failures stay distinguishable.
    fn map_complete_error(&self, err: CloudError) -> BackendError {
        match err.code() {
            Some("InvalidPart") => BackendError::InvalidPart,
            // An undersized part makes the sequence just as unusable as a
            // misordered one.
            Some("InvalidPartOrder") | Some("EntityTooSmall") => BackendError::InvalidPartOrder,
            _ => BackendError::Other(self.map_error("complete_multipart_upload", err)),
        }
    }

    async fn check_health(&self) -> LocationHealth {
        if let Err(e) = self.client.head_bucket(&self.bucket).await {
            return LocationHealth::unreachable(e);
        }
        match self.client.get_bucket_versioning(&self.bucket).await {
            Err(e) => LocationHealth::unreachable(e),
            Ok(Some(status)) if status == VERSIONING_ENABLED => LocationHealth::Versioned {
                versioning_status: status,
                message: VERSIONING_OK_MESSAGE.to_string(),
            },
            Ok(status) => LocationHealth::VersioningMisconfigured {
                versioning_status: status,
                error: VERSIONING_REQUIRED_ERROR.to_string(),
            },
        }
    }
}

impl DataBackend for CloudBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Cloud
    }

    fn health_policy(&self) -> HealthPolicy {
        HealthPolicy::Sampled
    }

    fn put(
        &self,
        stream: BackendStream,
        size: u64,
        key_context: &KeyContext,
    ) -> Pin<Box<dyn Future<Output = BackendResult<StoredData>> + Send + '_>> {
        let key = self.cloud_key(key_context);
        let metadata = key_context.meta_headers.clone();
        Box::pin(async move {
            let body = collect_stream(stream, size).await?;

            debug!("cloud put_object: bucket={} key={} size={}", self.bucket, key, body.len());

            let output = self
                .client
                .put_object(PutObjectRequest {
                    bucket: self.bucket.clone(),
                    key: key.clone(),
                    body,
                    metadata,
                })
                .await
                .map_err(|e| self.map_error("put_object", e))?;

            Ok(StoredData {
                key,
                etag: output.etag,
            })
        })
    }

    fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Pin<Box<dyn Future<Output = BackendResult<BackendStream>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            debug!("cloud get_object: bucket={} key={} range={:?}", self.bucket, key, range);
            let stream = self
                .client
                .get_object(&self.bucket, &key, range.map(|r| r.header_value()))
                .await
                .map_err(|e| self.map_error("get_object", e))?;
            Ok(stream)
        })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = BackendResult<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            debug!("cloud delete_object: bucket={} key={}", self.bucket, key);
            self.client
                .delete_object(&self.bucket, &key)
                .await
                .map_err(|e| self.map_error("delete_object", e))?;
            Ok(())
        })
    }

    fn create_mpu(
        &self,
        key_context: &KeyContext,
        website_redirect: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = BackendResult<InitiatedUpload>> + Send + '_>> {
        let req = CreateMultipartRequest {
            bucket: self.bucket.clone(),
            key: self.cloud_key(key_context),
            metadata: key_context.meta_headers.clone(),
            website_redirect_location: website_redirect.map(str::to_string),
        };
        Box::pin(async move {
            debug!("cloud create_multipart_upload: bucket={} key={}", req.bucket, req.key);
            let output = self
                .client
                .create_multipart_upload(req)
                .await
                .map_err(|e| self.map_error("create_multipart_upload", e))?;
            Ok(InitiatedUpload {
                upload_id: output.upload_id,
                backend_bucket: output.bucket,
                backend_key: output.key,
            })
        })
    }

    fn upload_part(
        &self,
        stream: BackendStream,
        size: u64,
        key_context: &KeyContext,
        upload_id: &str,
        part_number: u32,
    ) -> Pin<Box<dyn Future<Output = BackendResult<Option<StoredData>>> + Send + '_>> {
        let key = self.cloud_key(key_context);
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let body = collect_stream(stream, size).await?;

            debug!(
                "cloud upload_part: bucket={} key={} upload_id={} part_number={}",
                self.bucket, key, upload_id, part_number
            );

            let etag = self
                .client
                .upload_part(UploadPartRequest {
                    bucket: self.bucket.clone(),
                    key: key.clone(),
                    upload_id,
                    part_number,
                    body,
                })
                .await
                .map_err(|e| self.map_error("upload_part", e))?;

            Ok(Some(StoredData {
                key,
                etag: Some(etag),
            }))
        })
    }

    fn complete_mpu(
        &self,
        key_context: &KeyContext,
        upload_id: &str,
        parts: &[PartDigest],
    ) -> Pin<Box<dyn Future<Output = BackendResult<Option<AssembledObject>>> + Send + '_>> {
        let key = self.cloud_key(key_context);
        let upload_id = upload_id.to_string();
        // Submitted exactly in the caller's order.
        let parts: Vec<CompletedPart> = parts
            .iter()
            .map(|p| CompletedPart {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect();
        Box::pin(async move {
            debug!(
                bucket = %self.bucket,
                key = %key,
                upload_id = %upload_id,
                parts = parts.len(),
                "cloud complete_multipart_upload"
            );

            let output = self
                .client
                .complete_multipart_upload(&self.bucket, &key, &upload_id, parts)
                .await
                .map_err(|e| self.map_complete_error(e))?;

            Ok(Some(AssembledObject {
                key: output.key.unwrap_or(key),
                etag: output.etag,
                version_id: output.version_id,
            }))
        })
    }

    fn healthcheck(&self) -> Pin<Box<dyn Future<Output = LocationHealth> + Send + '_>> {
        Box::pin(self.check_health())
    }
}
