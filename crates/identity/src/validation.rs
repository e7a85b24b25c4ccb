//! Display-name policy and the local user identity

use crate::error::{IdentityError, IdentityResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Maximum length of a display name in characters
pub const MAX_NAME_LEN: usize = 16;

/// A user identity as exchanged between contacts
///
/// The identifier shown to other users is `{display_name}#{discriminator}`.
/// The discriminator is a random 4-digit suffix assigned once when the
/// identity is created; it disambiguates contacts that share a display name.
/// The public key is the real distinguishing value and is carried in the
/// identity token alongside the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub display_name: String,
    pub discriminator: String,
    pub public_key: [u8; 32],
}

impl UserIdentity {
    /// Create a new identity with a fresh random discriminator
    ///
    /// Fails with `InvalidName` if the display name violates the character
    /// or length policy. Renaming is modeled as calling this again with a
    /// freshly generated keypair: a new identity, not a mutation.
    pub fn generate(display_name: &str, public_key: [u8; 32]) -> IdentityResult<Self> {
        validate_display_name(display_name)?;

        let discriminator = format!("{:04}", rand::thread_rng().gen_range(0..10_000));

        info!(
            "Generated identity {}#{}",
            display_name, discriminator
        );

        Ok(Self {
            display_name: display_name.to_string(),
            discriminator,
            public_key,
        })
    }

    /// Reconstruct an identity whose discriminator is already known
    /// (e.g. parsed from an identity token)
    pub fn with_discriminator(
        display_name: &str,
        discriminator: &str,
        public_key: [u8; 32],
    ) -> IdentityResult<Self> {
        validate_display_name(display_name)?;
        validate_discriminator(discriminator)?;

        Ok(Self {
            display_name: display_name.to_string(),
            discriminator: discriminator.to_string(),
            public_key,
        })
    }

    /// Full identifier used for addressing: `name#1234`
    pub fn id(&self) -> String {
        format!("{}#{}", self.display_name, self.discriminator)
    }

    /// Name without the numeric suffix, for display purposes
    pub fn display_label(&self) -> &str {
        &self.display_name
    }
}

/// Validate a display name against the character/length policy
///
/// Allowed: 1..=16 characters, alphanumeric plus space, underscore and
/// hyphen. '#' and '/' are rejected because they delimit the identifier
/// and the token format.
pub fn validate_display_name(name: &str) -> IdentityResult<()> {
    if name.is_empty() {
        return Err(IdentityError::InvalidName(
            "Display name cannot be empty".to_string(),
        ));
    }

    if name.chars().count() > MAX_NAME_LEN {
        return Err(IdentityError::InvalidName(format!(
            "Display name exceeds {} characters",
            MAX_NAME_LEN
        )));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_alphanumeric() || *c == ' ' || *c == '_' || *c == '-'))
    {
        return Err(IdentityError::InvalidName(format!(
            "Display name contains disallowed character '{}'",
            bad
        )));
    }

    Ok(())
}

fn validate_discriminator(discriminator: &str) -> IdentityResult<()> {
    if discriminator.len() != 4 || !discriminator.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IdentityError::ParseToken(format!(
            "Discriminator must be exactly 4 digits, got '{}'",
            discriminator
        )));
    }
    Ok(())
}
