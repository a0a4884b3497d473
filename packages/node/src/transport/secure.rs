//! Optional secure envelope: AES-256-GCM over a P-256 ECDH session key.
//!
//! Once a secure handshake has established a session key, every message
//! after it is wrapped: the inner `[type][flags][payload]` is AEAD-encrypted
//! with a per-message random nonce, and the envelope is sent as a single
//! `SecureEnv` frame. Secure and plaintext modes are mutually exclusive per
//! cluster -- a secure-mode node must reject a plaintext handshake and vice
//! versa (see `DESIGN.md`).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use p256::ecdh::EphemeralSecret;
use p256::{EncodedPoint, PublicKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::NodeError;

/// An ephemeral ECDH keypair used for one handshake.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    pub public_bytes: Vec<u8>,
}

impl EphemeralKeyPair {
    #[must_use]
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = EncodedPoint::from(secret.public_key());
        Self { secret, public_bytes: public.as_bytes().to_vec() }
    }

    /// Derives a 256-bit AES-GCM session key from this keypair's secret and
    /// the peer's public key bytes, via ECDH followed by SHA-256.
    pub fn derive_session_key(&self, peer_public_bytes: &[u8]) -> Result<SessionKey, NodeError> {
        let point = EncodedPoint::from_bytes(peer_public_bytes)
            .map_err(|e| NodeError::Secure(format!("invalid peer public key: {e}")))?;
        let peer_public = PublicKey::from_sec1_bytes(point.as_bytes())
            .map_err(|e| NodeError::Secure(format!("invalid peer public key: {e}")))?;
        let shared = self.secret.diffie_hellman(&peer_public);

        let mut hasher = Sha256::new();
        hasher.update(shared.raw_secret_bytes());
        let key_bytes = hasher.finalize();
        Ok(SessionKey(key_bytes.into()))
    }
}

/// A derived AES-256-GCM session key, shared by both sides of a secure
/// session after a successful ECDH exchange.
#[derive(Clone)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Encrypts `plaintext` (the inner `[type][flags][payload]` triple) with
    /// a fresh random nonce. Returns `(ciphertext, nonce)`; the GCM
    /// authentication tag is appended to `ciphertext` by the `aes-gcm` crate.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), NodeError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let mut nonce_bytes = [0u8; 12];
        rand::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| NodeError::Secure(format!("encryption failed: {e}")))?;
        Ok((ciphertext, nonce_bytes.to_vec()))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, NodeError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        if nonce.len() != 12 {
            return Err(NodeError::Secure("invalid nonce length".into()));
        }
        let nonce = Nonce::from_slice(nonce);
        cipher.decrypt(nonce, ciphertext).map_err(|e| NodeError::Secure(format!("decryption failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdh_both_sides_derive_same_key() {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();

        let key_a = a.derive_session_key(&b.public_bytes).unwrap();
        let key_b = b.derive_session_key(&a.public_bytes).unwrap();

        let (ct, nonce) = key_a.encrypt(b"hello").unwrap();
        let pt = key_b.decrypt(&ct, &nonce).unwrap();
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn decrypt_fails_with_wrong_key() {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        let c = EphemeralKeyPair::generate();

        let key_a = a.derive_session_key(&b.public_bytes).unwrap();
        let key_c_for_a = c.derive_session_key(&a.public_bytes).unwrap();

        let (ct, nonce) = key_a.encrypt(b"secret").unwrap();
        assert!(key_c_for_a.decrypt(&ct, &nonce).is_err());
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        let key_a = a.derive_session_key(&b.public_bytes).unwrap();

        let (_, nonce1) = key_a.encrypt(b"x").unwrap();
        let (_, nonce2) = key_a.encrypt(b"x").unwrap();
        assert_ne!(nonce1, nonce2);
    }
}
