//! In-memory [`CloudClient`] for tests.
//!
//! Behaves like an S3 bucket closely enough for the adapter, dispatcher
//! and health tests: part ETags are MD5 digests, completion validates
//! order, digests and minimum part size, and every health probe is
//! counted.

use bytes::Bytes;
use futures::StreamExt;
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::backend::{once_stream, BackendStream};
use super::cloud::{
    CloudClient, CloudError, CloudResult, CompleteMultipartOutput, CompletedPart,
    CreateMultipartOutput, CreateMultipartRequest, PutObjectOutput, PutObjectRequest,
    UploadPartRequest,
};
use crate::types::ByteRange;

struct StoredObject {
    data: Bytes,
    metadata: HashMap<String, String>,
}

struct Upload {
    bucket: String,
    key: String,
    redirect: Option<String>,
    parts: BTreeMap<u32, (String, Bytes)>,
}

pub struct MockCloud {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    uploads: Mutex<HashMap<String, Upload>>,
    versioning: Mutex<Option<String>>,
    completion_error: Mutex<Option<String>>,
    completed_orders: Mutex<Vec<Vec<u32>>>,
    min_part_size: AtomicUsize,
    fail_requests: AtomicBool,
    fail_streams: AtomicBool,
    head_bucket_calls: AtomicUsize,
    versioning_calls: AtomicUsize,
}

fn etag_of(data: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Md5::digest(data)))
}

fn parse_range(header: &str) -> Option<ByteRange> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some(ByteRange::new(start, end))
}

impl MockCloud {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            versioning: Mutex::new(Some("Enabled".to_string())),
            completion_error: Mutex::new(None),
            completed_orders: Mutex::new(Vec::new()),
            min_part_size: AtomicUsize::new(0),
            fail_requests: AtomicBool::new(false),
            fail_streams: AtomicBool::new(false),
            head_bucket_calls: AtomicUsize::new(0),
            versioning_calls: AtomicUsize::new(0),
        }
    }

    /// Make every request fail with a service error.
    pub fn fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    /// Make object bodies fail after their first chunk.
    pub fn fail_streams(&self, fail: bool) {
        self.fail_streams.store(fail, Ordering::SeqCst);
    }

    /// Force completion to fail with `code`.
    pub fn fail_completion_with(&self, code: Option<&str>) {
        *self.completion_error.lock().unwrap() = code.map(str::to_string);
    }

    pub fn set_versioning(&self, status: Option<&str>) {
        *self.versioning.lock().unwrap() = status.map(str::to_string);
    }

    pub fn set_min_part_size(&self, size: usize) {
        self.min_part_size.store(size, Ordering::SeqCst);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| String::from_utf8_lossy(&o.data).into_owned())
    }

    pub fn object_metadata(&self, bucket: &str, key: &str) -> Option<HashMap<String, String>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.metadata.clone())
    }

    pub fn upload_redirect(&self, upload_id: &str) -> Option<String> {
        self.uploads
            .lock()
            .unwrap()
            .get(upload_id)
            .and_then(|u| u.redirect.clone())
    }

    /// Part numbers of every completion request, in submission order.
    pub fn completed_orders(&self) -> Vec<Vec<u32>> {
        self.completed_orders.lock().unwrap().clone()
    }

    pub fn head_bucket_calls(&self) -> usize {
        self.head_bucket_calls.load(Ordering::SeqCst)
    }

    pub fn versioning_calls(&self) -> usize {
        self.versioning_calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> CloudResult<()> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(CloudError::new(
                Some("ServiceUnavailable"),
                "simulated service failure",
            ));
        }
        Ok(())
    }

    fn complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> CloudResult<CompleteMultipartOutput> {
        if let Some(code) = self.completion_error.lock().unwrap().clone() {
            return Err(CloudError::new(Some(&code), "forced completion failure"));
        }

        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .get(upload_id)
            .ok_or_else(|| CloudError::new(Some("NoSuchUpload"), "no such upload"))?;

        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(CloudError::new(Some("InvalidPartOrder"), "parts out of order"));
        }

        let min_size = self.min_part_size.load(Ordering::SeqCst);
        let mut assembled = Vec::new();
        for (idx, part) in parts.iter().enumerate() {
            let (etag, data) = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| CloudError::new(Some("InvalidPart"), "part not uploaded"))?;
            if *etag != part.etag {
                return Err(CloudError::new(Some("InvalidPart"), "etag mismatch"));
            }
            if idx + 1 < parts.len() && data.len() < min_size {
                return Err(CloudError::new(Some("EntityTooSmall"), "part too small"));
            }
            assembled.extend_from_slice(data);
        }

        uploads.remove(upload_id);
        drop(uploads);

        let etag = format!("\"{}-{}\"", hex::encode(Md5::digest(&assembled)), parts.len());
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: Bytes::from(assembled),
                metadata: HashMap::new(),
            },
        );

        Ok(CompleteMultipartOutput {
            key: Some(key.to_string()),
            etag: Some(etag),
            version_id: Some(uuid::Uuid::new_v4().simple().to_string()),
        })
    }
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudClient for MockCloud {
    fn put_object(&self, req: PutObjectRequest) -> Pin<Box<dyn Future<Output = CloudResult<PutObjectOutput>> + Send + '_>> {
        Box::pin(async move {
            self.check_failure()?;
            let etag = etag_of(&req.body);
            self.objects.lock().unwrap().insert(
                (req.bucket, req.key),
                StoredObject {
                    data: req.body,
                    metadata: req.metadata,
                },
            );
            Ok(PutObjectOutput {
                etag: Some(etag),
                version_id: None,
            })
        })
    }

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<String>,
    ) -> Pin<Box<dyn Future<Output = CloudResult<BackendStream>> + Send + '_>> {
        let id = (bucket.to_string(), key.to_string());
        Box::pin(async move {
            self.check_failure()?;
            let data = self
                .objects
                .lock()
                .unwrap()
                .get(&id)
                .map(|o| o.data.clone())
                .ok_or_else(|| CloudError::new(Some("NoSuchKey"), "no such key"))?;

            let data = match range.as_deref().and_then(parse_range) {
                Some(range) => {
                    let (start, end) = range.window(data.len() as u64);
                    data.slice(start as usize..end as usize)
                }
                None => data,
            };

            if self.fail_streams.load(Ordering::SeqCst) {
                let chunks: Vec<anyhow::Result<Bytes>> = vec![
                    Ok(data.slice(..data.len().min(1))),
                    Err(anyhow::anyhow!("connection reset by peer")),
                ];
                return Ok(futures::stream::iter(chunks).boxed());
            }
            Ok(once_stream(data))
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + '_>> {
        let id = (bucket.to_string(), key.to_string());
        Box::pin(async move {
            self.check_failure()?;
            self.objects.lock().unwrap().remove(&id);
            Ok(())
        })
    }

    fn create_multipart_upload(
        &self,
        req: CreateMultipartRequest,
    ) -> Pin<Box<dyn Future<Output = CloudResult<CreateMultipartOutput>> + Send + '_>> {
        Box::pin(async move {
            self.check_failure()?;
            let upload_id = uuid::Uuid::new_v4().to_string();
            self.uploads.lock().unwrap().insert(
                upload_id.clone(),
                Upload {
                    bucket: req.bucket.clone(),
                    key: req.key.clone(),
                    redirect: req.website_redirect_location,
                    parts: BTreeMap::new(),
                },
            );
            Ok(CreateMultipartOutput {
                bucket: Some(req.bucket),
                key: Some(req.key),
                upload_id,
            })
        })
    }

    fn upload_part(&self, req: UploadPartRequest) -> Pin<Box<dyn Future<Output = CloudResult<String>> + Send + '_>> {
        Box::pin(async move {
            self.check_failure()?;
            let mut uploads = self.uploads.lock().unwrap();
            let upload = uploads
                .get_mut(&req.upload_id)
                .filter(|u| u.bucket == req.bucket && u.key == req.key)
                .ok_or_else(|| CloudError::new(Some("NoSuchUpload"), "no such upload"))?;
            let etag = etag_of(&req.body);
            upload
                .parts
                .insert(req.part_number, (etag.clone(), req.body));
            Ok(etag)
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
            self.check_failure()?;
            self.completed_orders
                .lock()
                .unwrap()
                .push(parts.iter().map(|p| p.part_number).collect());
            self.complete(&bucket, &key, &upload_id, &parts)
        })
    }

    fn head_bucket(&self, _bucket: &str) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.head_bucket_calls.fetch_add(1, Ordering::SeqCst);
            self.check_failure()
        })
    }

    fn get_bucket_versioning(&self, _bucket: &str) -> Pin<Box<dyn Future<Output = CloudResult<Option<String>>> + Send + '_>> {
        Box::pin(async move {
            self.versioning_calls.fetch_add(1, Ordering::SeqCst);
            self.check_failure()?;
            Ok(self.versioning.lock().unwrap().clone())
        })
    }
}
