//! Data backends.
//!
//! The [`backend::DataBackend`] trait abstracts over where bytes
//! physically live.  Implementations cover clustered-native storage,
//! S3-protocol cloud storage, the local filesystem and process memory.

pub mod aws;
pub mod backend;
pub mod cloud;
pub mod file;
pub mod memory;
#[cfg(test)]
pub(crate) mod mock;
pub mod native;
