//! Error types for BLE mesh operations

use thiserror::Error;

/// Result type for mesh operations
pub type MeshResult<T> = Result<T, MeshError>;

/// Errors that can occur during BLE mesh operations
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Malformed wire frame: {0}")]
    MalformedFrame(String),

    #[error("Envelope signature verification failed")]
    SignatureInvalid,

    #[error("TTL expired")]
    TtlExpired,

    #[error("Duplicate envelope: {0}")]
    DuplicateEnvelope(String),

    #[error("Unknown contact: {0}")]
    UnknownContact(String),

    #[error("BLE connection failed: {0}")]
    ConnectionFailed(String),

    #[error("BLE adapter error: {0}")]
    AdapterError(String),

    #[error("Frame transmission failed: {0}")]
    TransmissionFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] identity::IdentityError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for MeshError {
    fn from(err: std::io::Error) -> Self {
        MeshError::AdapterError(err.to_string())
    }
}

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        MeshError::Serialization(err.to_string())
    }
}
