//! Authenticated encryption for message payloads
//!
//! XChaCha20-Poly1305 keyed by the per-contact shared secret. The 24-byte
//! nonce is generated fresh per message and carried in front of the
//! ciphertext, since envelopes travel independently across relay hops.

use crate::error::{IdentityError, IdentityResult};
use crate::keys::SharedSecret;
use chacha20poly1305::{
    aead::{Aead, NewAead},
    Key, XChaCha20Poly1305, XNonce,
};

/// Nonce length prepended to every ciphertext
const NONCE_LEN: usize = 24;

/// Encrypt a plaintext under a contact's shared secret
///
/// Output layout: `nonce (24 bytes) || AEAD ciphertext`.
pub fn encrypt(plaintext: &[u8], secret: &SharedSecret) -> IdentityResult<Vec<u8>> {
    let key = Key::from_slice(secret.as_bytes());
    let cipher = XChaCha20Poly1305::new(key);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    use rand::RngCore;
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| IdentityError::EncryptFailed(format!("AEAD encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a `nonce || ciphertext` blob
///
/// Fails with `DecryptFailed` on truncated input or an authentication-tag
/// mismatch (wrong key or tampered data); never returns garbage plaintext.
pub fn decrypt(data: &[u8], secret: &SharedSecret) -> IdentityResult<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(IdentityError::DecryptFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let key = Key::from_slice(secret.as_bytes());
    let cipher = XChaCha20Poly1305::new(key);
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| IdentityError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::IdentityKeyPair;

    fn secret_pair() -> (SharedSecret, SharedSecret) {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = IdentityKeyPair::generate().unwrap();
        (
            alice.derive_shared_secret(&bob.public_key_bytes()).unwrap(),
            bob.derive_shared_secret(&alice.public_key_bytes()).unwrap(),
        )
    }

    #[test]
    fn test_encrypt_decrypt_round_trip_across_ends() {
        let (alice_secret, bob_secret) = secret_pair();

        let ciphertext = encrypt(b"hi", &alice_secret).unwrap();
        let plaintext = decrypt(&ciphertext, &bob_secret).unwrap();
        assert_eq!(plaintext, b"hi");
    }

    #[test]
    fn test_wrong_secret_fails() {
        let (alice_secret, _) = secret_pair();
        let (other_secret, _) = secret_pair();

        let ciphertext = encrypt(b"secret message", &alice_secret).unwrap();
        let result = decrypt(&ciphertext, &other_secret);
        assert!(matches!(result, Err(IdentityError::DecryptFailed)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let (secret, _) = secret_pair();

        let mut ciphertext = encrypt(b"secret message", &secret).unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;

        assert!(matches!(
            decrypt(&ciphertext, &secret),
            Err(IdentityError::DecryptFailed)
        ));
    }

    #[test]
    fn test_truncated_input_fails() {
        let (secret, _) = secret_pair();
        assert!(matches!(
            decrypt(&[0u8; 10], &secret),
            Err(IdentityError::DecryptFailed)
        ));
    }

    #[test]
    fn test_nonces_are_fresh_per_message() {
        let (secret, _) = secret_pair();
        let a = encrypt(b"same plaintext", &secret).unwrap();
        let b = encrypt(b"same plaintext", &secret).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_plaintext_round_trip() {
        let (secret, _) = secret_pair();
        let ciphertext = encrypt(b"", &secret).unwrap();
        assert_eq!(decrypt(&ciphertext, &secret).unwrap(), b"");
    }
}
