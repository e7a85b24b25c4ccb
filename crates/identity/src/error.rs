//! Error types for identity and key operations

use thiserror::Error;

/// Result type for identity operations
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors that can occur during identity and key operations
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid display name: {0}")]
    InvalidName(String),

    #[error("Invalid identity token: {0}")]
    ParseToken(String),

    #[error("QR code error: {0}")]
    QrCode(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    EncryptFailed(String),

    #[error("Decryption failed: authentication tag mismatch or truncated input")]
    DecryptFailed,

    #[error("Signature verification failed")]
    BadSignature,
}
