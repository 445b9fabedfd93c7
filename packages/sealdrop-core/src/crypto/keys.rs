//! # Key Management
//!
//! X25519 keypairs for envelope key exchange.
//!
//! A recipient is identified by their 32-byte X25519 public key; the
//! sender never needs a long-lived keypair because every seal generates
//! a fresh ephemeral one.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

/// X25519 encryption keypair for key exchange
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKeyPair {
    /// Private encryption key (secret)
    #[zeroize(skip)] // x25519_dalek handles its own zeroization
    secret: StaticSecret,
    /// Public encryption key (derived from secret)
    public: X25519PublicKey,
}

impl EncryptionKeyPair {
    /// Generate a new random encryption keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from raw secret bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from a secret of unchecked length.
    ///
    /// Fails unless the slice is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let fixed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("Secret key must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self::from_bytes(&fixed))
    }

    /// Get the secret key bytes (for backup/storage)
    ///
    /// ## Security Warning
    ///
    /// Only use this for secure storage. Never log or transmit these bytes.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Get the public key bytes
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Perform Diffie-Hellman key exchange
    ///
    /// Returns a shared secret that both parties can compute:
    /// - Sender: ephemeral_secret × recipient_public
    /// - Recipient: recipient_secret × ephemeral_public
    pub fn diffie_hellman(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let their_public = X25519PublicKey::from(*their_public);
        self.secret.diffie_hellman(&their_public).to_bytes()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp1 = EncryptionKeyPair::generate();
        let kp2 = EncryptionKeyPair::generate();
        assert_ne!(kp1.public_bytes(), kp2.public_bytes());
    }

    #[test]
    fn test_diffie_hellman_agreement() {
        let alice = EncryptionKeyPair::generate();
        let bob = EncryptionKeyPair::generate();

        let alice_shared = alice.diffie_hellman(&bob.public_bytes());
        let bob_shared = bob.diffie_hellman(&alice.public_bytes());

        assert_eq!(alice_shared, bob_shared);
    }

    #[test]
    fn test_from_bytes_deterministic() {
        let seed = [7u8; 32];
        let kp1 = EncryptionKeyPair::from_bytes(&seed);
        let kp2 = EncryptionKeyPair::from_bytes(&seed);
        assert_eq!(kp1.public_bytes(), kp2.public_bytes());
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(EncryptionKeyPair::from_slice(&[0u8; 31]).is_err());
        assert!(EncryptionKeyPair::from_slice(&[0u8; 33]).is_err());
        assert!(EncryptionKeyPair::from_slice(&[0u8; 32]).is_ok());
    }
}
