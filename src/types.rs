//! Values exchanged between the gateway and its callers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identity of an object as the S3 layer sees it.
#[derive(Debug, Clone, Default)]
pub struct KeyContext {
    /// Logical (client-facing) bucket name.
    pub bucket_name: String,
    /// Logical object key.
    pub object_key: String,
    /// User metadata (`x-amz-meta-*`), forwarded to backends that store it.
    pub meta_headers: HashMap<String, String>,
}

impl KeyContext {
    pub fn new(bucket_name: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            object_key: object_key.into(),
            meta_headers: HashMap::new(),
        }
    }

    pub fn with_meta_headers(mut self, meta_headers: HashMap<String, String>) -> Self {
        self.meta_headers = meta_headers;
        self
    }
}

/// Which location constraint controls a write. Computed by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    controlling_location: String,
}

impl BackendInfo {
    pub fn new(controlling_location: impl Into<String>) -> Self {
        Self {
            controlling_location: controlling_location.into(),
        }
    }

    pub fn controlling_location(&self) -> &str {
        &self.controlling_location
    }
}

/// Durable reference to stored data, as persisted in object metadata.
///
/// Older metadata holds a bare key string which always refers to the
/// legacy location; newer metadata names the location explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectGetInfo {
    LegacyKey(String),
    Located {
        key: String,
        #[serde(rename = "dataStoreName")]
        data_store_name: String,
    },
}

impl ObjectGetInfo {
    pub fn located(key: impl Into<String>, data_store_name: impl Into<String>) -> Self {
        ObjectGetInfo::Located {
            key: key.into(),
            data_store_name: data_store_name.into(),
        }
    }

    /// The key on the backend, whichever shape this is.
    pub fn key(&self) -> &str {
        match self {
            ObjectGetInfo::LegacyKey(key) => key,
            ObjectGetInfo::Located { key, .. } => key,
        }
    }
}

/// Result of a successful store or part upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRetrievalInfo {
    pub key: String,
    pub data_store_name: String,
    pub data_store_type: String,
    /// Digest computed by the backend itself. Present only for cloud
    /// backends; callers reconcile it with their own digest.
    #[serde(
        rename = "dataStoreETag",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub data_store_etag: Option<String>,
}

impl DataRetrievalInfo {
    /// Convert into the reference stored in object metadata.
    pub fn to_get_info(&self) -> ObjectGetInfo {
        ObjectGetInfo::located(self.key.clone(), self.data_store_name.clone())
    }
}

/// Inclusive byte range, `end` open when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// `None` when `end` precedes `start`. Such a range is unsatisfiable
    /// as written and reads ignore it, the way HTTP ignores an invalid
    /// `Range` header.
    pub fn normalized(self) -> Option<Self> {
        match self.end {
            Some(end) if end < self.start => None,
            _ => Some(self),
        }
    }

    /// HTTP `Range` header value.
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }

    /// Resolve against an object of `len` bytes, returning the half-open
    /// `[start, end)` window. The window is empty when `start` lies past
    /// the end of the object.
    pub fn window(&self, len: u64) -> (u64, u64) {
        let start = self.start.min(len);
        let end = match self.end {
            Some(end) => end.saturating_add(1).min(len),
            None => len,
        };
        (start, end.max(start))
    }
}

/// Answer to a multipart initiate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatedUpload {
    pub upload_id: String,
    /// Physical bucket echoed by the backend, when it issued the id.
    pub backend_bucket: Option<String>,
    /// Key echoed by the backend, when it issued the id.
    pub backend_key: Option<String>,
}

/// One entry of a multipart completion list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartDigest {
    pub part_number: u32,
    pub etag: String,
}

impl PartDigest {
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}

/// Payload returned once a backend has assembled a multipart object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedUpload {
    pub key: String,
    #[serde(rename = "eTag", skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub data_store_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}
