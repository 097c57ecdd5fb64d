//! Multi-backend gateway dispatcher.
//!
//! The single entry point the object handlers call. Each operation resolves
//! its location in the [`LocationRegistry`], runs the adapter call inside the
//! request's span, and normalizes the outcome: adapter error detail is
//! logged here and collapsed onto [`GatewayError`] before it is returned.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn, Instrument};

use crate::context::RequestContext;
use crate::errors::GatewayError;
use crate::health::{check_locations, HealthReport};
use crate::location::{Location, LocationRegistry};
use crate::metrics::record_backend_op;
use crate::storage::backend::{BackendError, BackendResult, BackendStream};
use crate::types::{
    BackendInfo, ByteRange, CompletedUpload, DataRetrievalInfo, InitiatedUpload, KeyContext,
    ObjectGetInfo, PartDigest,
};

/// Default number of health probes in flight at once.
pub const DEFAULT_HEALTH_CONCURRENCY: usize = 8;

/// Object data handed back by [`MultipleBackendGateway::retrieve`].
pub type ObjectStream = BoxStream<'static, Result<Bytes, GatewayError>>;

/// Routes object operations to the adapter of their location.
#[derive(Clone)]
pub struct MultipleBackendGateway {
    registry: Arc<LocationRegistry>,
    health_concurrency: usize,
}

impl MultipleBackendGateway {
    pub fn new(registry: LocationRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            health_concurrency: DEFAULT_HEALTH_CONCURRENCY,
        }
    }

    pub fn with_health_concurrency(mut self, concurrency: usize) -> Self {
        self.health_concurrency = concurrency.max(1);
        self
    }

    pub fn registry(&self) -> &LocationRegistry {
        &self.registry
    }

    /// Store `stream` in the controlling location of `backend_info`.
    pub async fn store(
        &self,
        stream: BackendStream,
        size: u64,
        key_context: &KeyContext,
        backend_info: &BackendInfo,
        ctx: &RequestContext,
    ) -> Result<DataRetrievalInfo, GatewayError> {
        async {
            let location = self.resolve(backend_info.controlling_location())?;
            debug!(
                location = %location.constraint.name,
                bucket = %key_context.bucket_name,
                key = %key_context.object_key,
                size,
                "store"
            );
            let stored = dispatch(
                location,
                "put",
                location.backend.put(stream, size, key_context),
            )
            .await?;
            Ok(DataRetrievalInfo {
                key: stored.key,
                data_store_name: location.constraint.name.clone(),
                data_store_type: location.constraint.backend_type.to_string(),
                data_store_etag: stored.etag,
            })
        }
        .instrument(ctx.span().clone())
        .await
    }

    /// Open a stream over the object `info` refers to.
    ///
    /// Errors raised while the stream is consumed are logged and surface as
    /// a single [`GatewayError::InternalError`] item, after which the stream
    /// ends.
    pub async fn retrieve(
        &self,
        info: &ObjectGetInfo,
        range: Option<ByteRange>,
        ctx: &RequestContext,
    ) -> Result<ObjectStream, GatewayError> {
        async {
            let location = self.resolve_get_info(info)?;
            let range = match range {
                Some(requested) => {
                    let range = requested.normalized();
                    if range.is_none() {
                        debug!("ignoring inverted range {:?} for key={}", requested, info.key());
                    }
                    range
                }
                None => None,
            };
            debug!(
                location = %location.constraint.name,
                key = %info.key(),
                range = ?range,
                "retrieve"
            );
            let stream =
                dispatch(location, "get", location.backend.get(info.key(), range)).await?;
            Ok(normalize_stream(stream, location, ctx))
        }
        .instrument(ctx.span().clone())
        .await
    }

    /// Remove the object `info` refers to.
    pub async fn remove(
        &self,
        info: &ObjectGetInfo,
        ctx: &RequestContext,
    ) -> Result<(), GatewayError> {
        async {
            let location = self.resolve_get_info(info)?;
            debug!(location = %location.constraint.name, key = %info.key(), "remove");
            dispatch(location, "delete", location.backend.delete(info.key())).await
        }
        .instrument(ctx.span().clone())
        .await
    }

    /// Probe configured locations. See [`check_locations`].
    pub async fn healthcheck(&self, ctx: &RequestContext) -> HealthReport {
        check_locations(&self.registry, self.health_concurrency)
            .instrument(ctx.span().clone())
            .await
    }

    /// Initiate a multipart upload in `location`.
    pub async fn create_mpu(
        &self,
        key_context: &KeyContext,
        website_redirect: Option<&str>,
        location: &str,
        ctx: &RequestContext,
    ) -> Result<InitiatedUpload, GatewayError> {
        async {
            let location = self.resolve(location)?;
            debug!(
                location = %location.constraint.name,
                bucket = %key_context.bucket_name,
                key = %key_context.object_key,
                "create multipart upload"
            );
            dispatch(
                location,
                "create_mpu",
                location.backend.create_mpu(key_context, website_redirect),
            )
            .await
        }
        .instrument(ctx.span().clone())
        .await
    }

    /// Upload one part of a multipart upload.
    ///
    /// `None` means the location does not track parts itself; the caller
    /// stores the part through [`store`](Self::store) instead.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_part(
        &self,
        stream: BackendStream,
        size: u64,
        key_context: &KeyContext,
        location: &str,
        upload_id: &str,
        part_number: u32,
        ctx: &RequestContext,
    ) -> Result<Option<DataRetrievalInfo>, GatewayError> {
        async {
            let location = self.resolve(location)?;
            debug!(
                location = %location.constraint.name,
                upload_id = %upload_id,
                part_number,
                size,
                "upload part"
            );
            let stored = dispatch(
                location,
                "upload_part",
                location
                    .backend
                    .upload_part(stream, size, key_context, upload_id, part_number),
            )
            .await?;
            Ok(stored.map(|stored| DataRetrievalInfo {
                key: stored.key,
                data_store_name: location.constraint.name.clone(),
                data_store_type: location.constraint.backend_type.to_string(),
                data_store_etag: stored.etag,
            }))
        }
        .instrument(ctx.span().clone())
        .await
    }

    /// Complete a multipart upload from `parts`, submitted in the order given.
    pub async fn complete_mpu(
        &self,
        key_context: &KeyContext,
        upload_id: &str,
        location: &str,
        parts: &[PartDigest],
        ctx: &RequestContext,
    ) -> Result<Option<CompletedUpload>, GatewayError> {
        async {
            let location = self.resolve(location)?;
            debug!(
                location = %location.constraint.name,
                upload_id = %upload_id,
                parts = parts.len(),
                "complete multipart upload"
            );
            let assembled = dispatch(
                location,
                "complete_mpu",
                location.backend.complete_mpu(key_context, upload_id, parts),
            )
            .await?;
            Ok(assembled.map(|assembled| CompletedUpload {
                key: assembled.key,
                etag: assembled.etag,
                data_store_name: location.constraint.name.clone(),
                version_id: assembled.version_id,
            }))
        }
        .instrument(ctx.span().clone())
        .await
    }

    fn resolve(&self, name: &str) -> Result<&Location, GatewayError> {
        self.registry.resolve(name).inspect_err(|e| {
            warn!(error = %e, "location not configured");
        })
    }

    fn resolve_get_info(&self, info: &ObjectGetInfo) -> Result<&Location, GatewayError> {
        self.registry.resolve_get_info(info).inspect_err(|e| {
            warn!(error = %e, "location not configured");
        })
    }
}

/// Await one adapter call, record its metrics and normalize its error.
async fn dispatch<T>(
    location: &Location,
    operation: &'static str,
    call: Pin<Box<dyn Future<Output = BackendResult<T>> + Send + '_>>,
) -> Result<T, GatewayError> {
    let start = Instant::now();
    let result = call.await;
    record_backend_op(
        &location.constraint.name,
        operation,
        result.is_ok(),
        start.elapsed().as_secs_f64(),
    );
    result.map_err(|e| normalize_error(location, operation, e))
}

fn normalize_error(location: &Location, operation: &'static str, err: BackendError) -> GatewayError {
    match err {
        BackendError::InvalidPart => {
            warn!(location = %location.constraint.name, operation, "invalid part");
            GatewayError::InvalidPart
        }
        BackendError::InvalidPartOrder => {
            warn!(location = %location.constraint.name, operation, "invalid part order");
            GatewayError::InvalidPartOrder
        }
        BackendError::Other(e) => {
            error!(
                location = %location.constraint.name,
                backend_type = %location.constraint.backend_type,
                operation,
                error = %format!("{e:#}"),
                "backend operation failed"
            );
            GatewayError::InternalError
        }
    }
}

/// Map adapter stream errors onto the gateway taxonomy. The stream ends
/// after the first error.
fn normalize_stream(stream: BackendStream, location: &Location, ctx: &RequestContext) -> ObjectStream {
    let name = location.constraint.name.clone();
    let backend_type = location.constraint.backend_type;
    let span = ctx.span().clone();

    stream
        .scan(false, move |failed, item| {
            let item = if *failed {
                None
            } else {
                Some(item.map_err(|e| {
                    *failed = true;
                    error!(
                        parent: &span,
                        location = %name,
                        backend_type = %backend_type,
                        operation = "get",
                        error = %format!("{e:#}"),
                        "backend stream failed"
                    );
                    GatewayError::InternalError
                }))
            };
            futures::future::ready(item)
        })
        .boxed()
}
