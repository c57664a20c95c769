//! Error types

mod api;
mod service;

pub use api::*;
pub use service::*;

/// Top-level error for every fallible client operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-level failure (HTTP status, network, timeout, parsing).
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The site answered with a service error payload for a datapoint.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Failed to serialize or deserialize JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The request was rejected before being sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Returns the service error payload, if this is a service error.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::Service(error) => Some(error),
            _ => None,
        }
    }
}
