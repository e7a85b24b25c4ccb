//! Ed25519 keypair management and per-contact shared secrets

use crate::error::{IdentityError, IdentityResult};
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::{
    ExpandedSecretKey, Keypair, PublicKey, SecretKey, Signature, Signer, Verifier,
};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Symmetric key shared with one contact, derived by ECDH
///
/// Both ends derive the identical value from their own secret key and the
/// peer's public key; it is never transmitted. Zeroed on drop.
#[derive(Clone)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// The device's long-lived asymmetric keypair
///
/// Generated once per install and regenerated only on an explicit rename or
/// reset, which deliberately invalidates every shared secret derived from
/// the old key.
pub struct IdentityKeyPair {
    keypair: Keypair,
}

impl IdentityKeyPair {
    /// Generate a fresh Ed25519 keypair
    pub fn generate() -> IdentityResult<Self> {
        let mut secret_bytes = [0u8; 32];

        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut secret_bytes);

        let secret = SecretKey::from_bytes(&secret_bytes).map_err(|e| {
            IdentityError::KeyDerivation(format!("Failed to create secret key: {}", e))
        })?;
        secret_bytes.zeroize();

        let public: PublicKey = (&secret).into();

        Ok(Self {
            keypair: Keypair { secret, public },
        })
    }

    /// Rebuild a keypair from a persisted 32-byte secret seed
    pub fn from_secret_bytes(seed: &[u8; 32]) -> IdentityResult<Self> {
        let secret = SecretKey::from_bytes(seed).map_err(|e| {
            IdentityError::KeyDerivation(format!("Failed to restore secret key: {}", e))
        })?;
        let public: PublicKey = (&secret).into();

        Ok(Self {
            keypair: Keypair { secret, public },
        })
    }

    /// Secret seed for persistence by the caller's key store
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.keypair.secret.to_bytes()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.keypair.public.to_bytes()
    }

    /// Sign a message with the device key
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.keypair.sign(message).to_bytes().to_vec()
    }

    /// Derive the symmetric key shared with a contact
    ///
    /// The peer's Ed25519 public key is converted to Montgomery form and
    /// multiplied by the local clamped secret scalar, so both sides compute
    /// the same curve point (scalar_a * scalar_b * B). The point is hashed
    /// with SHA-256 to produce the 32-byte cipher key.
    pub fn derive_shared_secret(&self, peer_public: &[u8; 32]) -> IdentityResult<SharedSecret> {
        let compressed = CompressedEdwardsY(*peer_public);
        let edwards = compressed.decompress().ok_or_else(|| {
            IdentityError::KeyDerivation("Peer public key is not a valid curve point".to_string())
        })?;
        let montgomery = edwards.to_montgomery();

        // The raw seed is hashed and clamped before use as a scalar; the
        // expanded secret holds that scalar in its first 32 bytes. Using the
        // seed directly would break symmetry with the published public key.
        let expanded = ExpandedSecretKey::from(&self.keypair.secret);
        let mut expanded_bytes = expanded.to_bytes();
        let mut scalar_bytes = [0u8; 32];
        scalar_bytes.copy_from_slice(&expanded_bytes[..32]);
        expanded_bytes.zeroize();

        let scalar = Scalar::from_bits(scalar_bytes);
        scalar_bytes.zeroize();

        let shared_point = scalar * montgomery;

        let mut hasher = Sha256::new();
        hasher.update(shared_point.to_bytes());
        let digest = hasher.finalize();

        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Ok(SharedSecret(key))
    }
}

/// Verify an Ed25519 signature
///
/// Returns false for malformed keys or signatures as well as for a genuine
/// verification failure; callers drop the envelope either way.
pub fn verify(message: &[u8], signature: &[u8], peer_public: &[u8; 32]) -> bool {
    let public = match PublicKey::from_bytes(peer_public) {
        Ok(pk) => pk,
        Err(_) => return false,
    };

    let signature = match Signature::try_from(signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    public.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_working_signatures() {
        let keys = IdentityKeyPair::generate().unwrap();
        let signature = keys.sign(b"hello mesh");

        assert!(verify(b"hello mesh", &signature, &keys.public_key_bytes()));
        assert!(!verify(b"hello mush", &signature, &keys.public_key_bytes()));
    }

    #[test]
    fn test_flipped_signature_byte_fails_verification() {
        let keys = IdentityKeyPair::generate().unwrap();
        let mut signature = keys.sign(b"payload");
        signature[0] ^= 0xFF;

        assert!(!verify(b"payload", &signature, &keys.public_key_bytes()));
    }

    #[test]
    fn test_verify_rejects_garbage_inputs() {
        let keys = IdentityKeyPair::generate().unwrap();
        assert!(!verify(b"payload", &[0u8; 10], &keys.public_key_bytes()));
        assert!(!verify(b"payload", &[0u8; 64], &[0xFFu8; 32]));
    }

    #[test]
    fn test_shared_secret_symmetry() {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = IdentityKeyPair::generate().unwrap();

        let ab = alice.derive_shared_secret(&bob.public_key_bytes()).unwrap();
        let ba = bob.derive_shared_secret(&alice.public_key_bytes()).unwrap();

        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn test_shared_secret_differs_per_contact() {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = IdentityKeyPair::generate().unwrap();
        let carol = IdentityKeyPair::generate().unwrap();

        let with_bob = alice.derive_shared_secret(&bob.public_key_bytes()).unwrap();
        let with_carol = alice
            .derive_shared_secret(&carol.public_key_bytes())
            .unwrap();

        assert_ne!(with_bob.as_bytes(), with_carol.as_bytes());
    }

    #[test]
    fn test_derive_rejects_invalid_curve_point() {
        let alice = IdentityKeyPair::generate().unwrap();
        let mut bogus = [0xFFu8; 32];
        bogus[31] = 0xFF;

        // Not all byte patterns decompress; this one must not panic either way
        let _ = alice.derive_shared_secret(&bogus);
    }

    #[test]
    fn test_from_secret_bytes_round_trip() {
        let keys = IdentityKeyPair::generate().unwrap();
        let restored = IdentityKeyPair::from_secret_bytes(&keys.secret_bytes()).unwrap();

        assert_eq!(keys.public_key_bytes(), restored.public_key_bytes());

        let signature = restored.sign(b"persisted");
        assert!(verify(b"persisted", &signature, &keys.public_key_bytes()));
    }
}
