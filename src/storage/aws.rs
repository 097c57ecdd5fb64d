//! AWS S3 client for cloud locations.
//!
//! Implements [`CloudClient`] on top of the AWS SDK.  Service errors keep
//! their S3 error code so the cloud adapter can recognise multipart
//! integrity failures; everything else about them stays inside the
//! adapter.
//!
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless explicit keys
//! are configured.

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use futures::StreamExt;
use std::future::Future;
use std::pin::Pin;
use tracing::info;

use super::backend::BackendStream;
use super::cloud::{
    CloudClient, CloudError, CloudResult, CompleteMultipartOutput, CompletedPart,
    CreateMultipartOutput, CreateMultipartRequest, PutObjectOutput, PutObjectRequest,
    UploadPartRequest,
};

/// S3 protocol client for one cloud location.
pub struct AwsS3Client {
    /// AWS S3 SDK client.
    client: Client,
}

impl AwsS3Client {
    /// Create a new client for `region`.
    ///
    /// Loads AWS credentials from the default credential chain
    /// (environment variables, `~/.aws/credentials`, IAM role, etc.)
    /// unless both explicit keys are given.
    pub async fn new(
        region: String,
        endpoint_url: Option<String>,
        use_path_style: bool,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    ) -> anyhow::Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()));

        if let Some(ref endpoint) = endpoint_url {
            config_loader = config_loader.endpoint_url(endpoint);
        }

        // If explicit credentials are provided, inject them as static credentials.
        if let (Some(ref ak), Some(ref sk)) = (&access_key_id, &secret_access_key) {
            let creds = aws_sdk_s3::config::Credentials::new(
                ak,
                sk,
                None, // session_token
                None, // expiry
                "multistore-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;

        let s3_config_builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(use_path_style);

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            "AWS S3 client initialized: region={} endpoint={}",
            region,
            endpoint_url.as_deref().unwrap_or("default")
        );

        Ok(Self { client })
    }

    /// Map an AWS SDK error to a [`CloudError`], keeping the service code.
    fn map_sdk_error<E>(context: &str, err: E) -> CloudError
    where
        E: ProvideErrorMetadata + std::fmt::Display,
    {
        let detail = err
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        CloudError::new(err.code(), format!("AWS S3 {context}: {detail}"))
    }

    fn part_number(part_number: u32) -> CloudResult<i32> {
        i32::try_from(part_number)
            .map_err(|_| CloudError::new(None, format!("part number {part_number} out of range")))
    }
}

impl CloudClient for AwsS3Client {
    fn put_object(&self, req: PutObjectRequest) -> Pin<Box<dyn Future<Output = CloudResult<PutObjectOutput>> + Send + '_>> {
        Box::pin(async move {
            let content_length = req.body.len() as i64;
            let resp = self
                .client
                .put_object()
                .bucket(&req.bucket)
                .key(&req.key)
                .content_length(content_length)
                .set_metadata(Some(req.metadata))
                .body(aws_sdk_s3::primitives::ByteStream::from(req.body))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_object", e))?;

            Ok(PutObjectOutput {
                etag: resp.e_tag().map(str::to_string),
                version_id: resp.version_id().map(str::to_string),
            })
        })
    }

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<String>,
    ) -> Pin<Box<dyn Future<Output = CloudResult<BackendStream>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let resp = self
                .client
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .set_range(range)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("get_object", e))?;

            // Hand the body over chunk by chunk; nothing is buffered here.
            let stream = futures::stream::try_unfold(resp.body, |mut body| async move {
                match body.try_next().await {
                    Ok(Some(chunk)) => Ok(Some((chunk, body))),
                    Ok(None) => Ok(None),
                    Err(e) => Err(anyhow::anyhow!("AWS S3 get_object body: {e}")),
                }
            })
            .boxed();
            Ok(stream)
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e))?;
            Ok(())
        })
    }

    fn create_multipart_upload(
        &self,
        req: CreateMultipartRequest,
    ) -> Pin<Box<dyn Future<Output = CloudResult<CreateMultipartOutput>> + Send + '_>> {
        Box::pin(async move {
            let resp = self
                .client
                .create_multipart_upload()
                .bucket(&req.bucket)
                .key(&req.key)
                .set_metadata(Some(req.metadata))
                .set_website_redirect_location(req.website_redirect_location)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("create_multipart_upload", e))?;

            let upload_id = resp
                .upload_id()
                .ok_or_else(|| CloudError::new(None, "AWS did not return upload ID"))?
                .to_string();

            Ok(CreateMultipartOutput {
                bucket: resp.bucket().map(str::to_string),
                key: resp.key().map(str::to_string),
                upload_id,
            })
        })
    }

    fn upload_part(&self, req: UploadPartRequest) -> Pin<Box<dyn Future<Output = CloudResult<String>> + Send + '_>> {
        Box::pin(async move {
            let part_number = Self::part_number(req.part_number)?;
            let content_length = req.body.len() as i64;
            let resp = self
                .client
                .upload_part()
                .bucket(&req.bucket)
                .key(&req.key)
                .upload_id(&req.upload_id)
                .part_number(part_number)
                .content_length(content_length)
                .body(aws_sdk_s3::primitives::ByteStream::from(req.body))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("upload_part", e))?;

            resp.e_tag()
                .map(str::to_string)
                .ok_or_else(|| CloudError::new(None, "AWS did not return part ETag"))
        })
    }

    fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Pin<Box<dyn Future<Output = CloudResult<CompleteMultipartOutput>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut completed = Vec::with_capacity(parts.len());
            for part in parts {
                completed.push(
                    S3CompletedPart::builder()
                        .e_tag(part.etag)
                        .part_number(Self::part_number(part.part_number)?)
                        .build(),
                );
            }
            let upload = CompletedMultipartUpload::builder()
                .set_parts(Some(completed))
                .build();

            let resp = self
                .client
                .complete_multipart_upload()
                .bucket(&bucket)
                .key(&key)
                .upload_id(&upload_id)
                .multipart_upload(upload)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("complete_multipart_upload", e))?;

            Ok(CompleteMultipartOutput {
                key: resp.key().map(str::to_string),
                etag: resp.e_tag().map(str::to_string),
                version_id: resp.version_id().map(str::to_string),
            })
        })
    }

    fn head_bucket(&self, bucket: &str) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            self.client
                .head_bucket()
                .bucket(&bucket)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("head_bucket", e))?;
            Ok(())
        })
    }

    fn get_bucket_versioning(&self, bucket: &str) -> Pin<Box<dyn Future<Output = CloudResult<Option<String>>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let resp = self
                .client
                .get_bucket_versioning()
                .bucket(&bucket)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("get_bucket_versioning", e))?;
            Ok(resp.status().map(|s| s.as_str().to_string()))
        })
    }
}
