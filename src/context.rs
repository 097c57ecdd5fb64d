//! Per-request logging context.
//!
//! A [`RequestContext`] is built once per incoming request and passed into
//! every gateway operation. It carries the request id chain and a
//! `tracing` span so that every log line emitted by the gateway and its
//! adapters is correlated with the request that caused it.

use tracing::Span;

use crate::errors::generate_request_id;

/// Separator between ids in a serialized request-id chain.
const UID_SEPARATOR: char = ':';

/// Explicit logging handle for one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Ids of upstream requests followed by this request's own id.
    uids: Vec<String>,
    span: Span,
}

impl RequestContext {
    /// Start a new request-id chain.
    pub fn new() -> Self {
        Self::with_uids(vec![generate_request_id()])
    }

    /// Continue a chain serialized by an upstream component (`"a:b:c"`).
    /// A fresh id is appended for this request.
    pub fn from_serialized_uids(serialized: &str) -> Self {
        let mut uids: Vec<String> = serialized
            .split(UID_SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        uids.push(generate_request_id());
        Self::with_uids(uids)
    }

    fn with_uids(uids: Vec<String>) -> Self {
        let id = uids.last().cloned().unwrap_or_default();
        let span = tracing::info_span!("request", id = %id);
        Self { uids, span }
    }

    /// This request's own id.
    pub fn request_id(&self) -> &str {
        self.uids.last().map(String::as_str).unwrap_or("")
    }

    /// The full chain, serialized for handing to a downstream component.
    pub fn serialized_uids(&self) -> String {
        self.uids.join(&UID_SEPARATOR.to_string())
    }

    /// Span every operation for this request runs under.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
