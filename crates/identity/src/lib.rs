//! Local user identity and per-contact cryptography
//!
//! This crate owns the two leaf concerns of the mesh messenger: the human
//! identity (display name, 4-digit discriminator, portable identity token)
//! and the key material bound to it (Ed25519 keypair, per-contact shared
//! secrets, authenticated encryption, envelope signatures).

pub mod crypto;
pub mod error;
pub mod keys;
pub mod qr;
pub mod token;
pub mod validation;

// Re-export main types
pub use crypto::{decrypt, encrypt};
pub use error::{IdentityError, IdentityResult};
pub use keys::{verify, IdentityKeyPair, SharedSecret};
pub use qr::QrTokenHandler;
pub use token::{decode_token, encode_token, TOKEN_SCHEME};
pub use validation::{UserIdentity, MAX_NAME_LEN};
