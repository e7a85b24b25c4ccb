//! Portable identity token encoding
//!
//! The token is the string exchanged out-of-band (typically as a QR code)
//! when two users add each other as contacts:
//!
//! `murmur://{display_name}#{discriminator}//{base58 public key}`
//!
//! Encode and decode are exact inverses for every field carried. Decoding
//! never panics on malformed input; every failure maps to `ParseToken`.

use crate::error::{IdentityError, IdentityResult};
use crate::validation::UserIdentity;

/// Scheme prefix identifying a murmur identity token
pub const TOKEN_SCHEME: &str = "murmur://";

/// Encode an identity into its portable token form
pub fn encode_token(identity: &UserIdentity) -> String {
    format!(
        "{}{}#{}//{}",
        TOKEN_SCHEME,
        identity.display_name,
        identity.discriminator,
        bs58::encode(identity.public_key).into_string()
    )
}

/// Parse a portable identity token
pub fn decode_token(token: &str) -> IdentityResult<UserIdentity> {
    let rest = token.strip_prefix(TOKEN_SCHEME).ok_or_else(|| {
        IdentityError::ParseToken(format!("Token must start with '{}'", TOKEN_SCHEME))
    })?;

    let (id_part, key_part) = rest
        .split_once("//")
        .ok_or_else(|| IdentityError::ParseToken("Missing '//' separator".to_string()))?;

    let (name, discriminator) = id_part
        .split_once('#')
        .ok_or_else(|| IdentityError::ParseToken("Missing '#' discriminator".to_string()))?;

    let key_bytes = bs58::decode(key_part)
        .into_vec()
        .map_err(|e| IdentityError::ParseToken(format!("Invalid base58 public key: {}", e)))?;

    let public_key: [u8; 32] = key_bytes.try_into().map_err(|_| {
        IdentityError::ParseToken("Public key must be exactly 32 bytes".to_string())
    })?;

    UserIdentity::with_discriminator(name, discriminator, public_key)
}
