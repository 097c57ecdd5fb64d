//! Gateway error taxonomy.
//!
//! Every failure that leaves the gateway is one of the variants below.
//! Backend-specific error detail never crosses this boundary: it is
//! logged where it occurs and collapsed onto [`GatewayError::InternalError`].

use axum::http::StatusCode;
use thiserror::Error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Errors surfaced to callers of the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// No adapter is registered for the requested location.
    #[error("no data backend matching location constraint '{location}'")]
    Configuration { location: String },

    /// Any backend I/O failure. The cause has already been logged.
    #[error("We encountered an internal error, please try again.")]
    InternalError,

    /// A completed part's digest does not match what the backend stored.
    #[error("One or more of the specified parts could not be found. The part may not have been uploaded, or the specified entity tag may not match the part's entity tag.")]
    InvalidPart,

    /// The part list cannot be reassembled (out of order or undersized part).
    #[error("The list of parts was not in ascending order. Parts must be ordered by part number.")]
    InvalidPartOrder,
}

impl GatewayError {
    /// Return the S3 error code string.
    ///
    /// A configuration error is an internal error from the client's point
    /// of view; the variant stays distinct so callers can tell them apart.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Configuration { .. } => "InternalError",
            GatewayError::InternalError => "InternalError",
            GatewayError::InvalidPart => "InvalidPart",
            GatewayError::InvalidPartOrder => "InvalidPartOrder",
        }
    }

    /// Return the HTTP status code the S3 layer should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::InvalidPart => StatusCode::BAD_REQUEST,
            GatewayError::InvalidPartOrder => StatusCode::BAD_REQUEST,
        }
    }

    /// Whether the error came from configuration rather than data transfer.
    pub fn is_configuration(&self) -> bool {
        matches!(self, GatewayError::Configuration { .. })
    }
}
