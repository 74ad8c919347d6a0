//! Error types for sync-core

use thiserror::Error;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// No bearer token in the auth store. Callers treat this as "stay idle".
    #[error("no authentication token available")]
    MissingCredential,

    #[error("invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("channel has been shut down")]
    Closed,

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid incident data: {0}")]
    Model(#[from] incident_model::ModelError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a [`Connector`](crate::transport::Connector).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("handshake failed: {0}")]
    Handshake(String),
}
