//! multistore library -- the data path of an S3-compatible object server.
//!
//! The [`gateway::MultipleBackendGateway`] routes every object operation to
//! the storage location that controls it: clustered-native storage, cloud
//! object storage, local files or memory. Adapters live in [`storage`];
//! the registry that builds them from configuration lives in [`location`].

pub mod config;
pub mod context;
pub mod errors;
pub mod gateway;
pub mod health;
pub mod location;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod types;

use crate::config::Config;
use crate::gateway::MultipleBackendGateway;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Process configuration.
    pub config: Config,
    /// Dispatcher over every configured location.
    pub gateway: MultipleBackendGateway,
}
