//! # Key Derivation
//!
//! Derives X25519 scalars for device-bound keys.
//!
//! Hardware-authenticator-backed identities cannot export a raw curve
//! secret; what they can produce is a stable pseudorandom value. This
//! module turns that value into a valid X25519 scalar so a
//! hardware-bound secret and a directly generated secret key
//! interoperate through the same public-key format.
//!
//! ```text
//! PRF output (authenticator)
//!       │
//!       ▼
//! HKDF-SHA256(ikm = prf_output, info = "sealdrop-device-key-v1")
//!       │
//!       ▼
//! 32-byte candidate scalar
//!       │
//!       ▼
//! Clamp: byte[0] &= 248, byte[31] &= 127, byte[31] |= 64
//!       │
//!       ▼
//! Valid X25519 secret key
//! ```

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{Error, Result};

/// Domain separation string for device-bound key derivation
pub const DEVICE_KEY_CONTEXT: &[u8] = b"sealdrop-device-key-v1";

/// Derive a clamped X25519 scalar from an externally supplied
/// pseudorandom value.
///
/// The clamp clears the low 3 bits of byte 0 and the high bit of
/// byte 31, then sets the second-highest bit of byte 31, putting the
/// scalar in the form the curve arithmetic expects.
///
/// ## Security Note
///
/// The input should carry at least 256 bits of entropy; a hardware
/// authenticator's PRF extension output qualifies.
pub fn derive_device_scalar(prf_output: &[u8]) -> Result<[u8; 32]> {
    if prf_output.is_empty() {
        return Err(Error::KeyDerivationFailed("Empty PRF output".into()));
    }

    let hkdf = Hkdf::<Sha256>::new(None, prf_output);
    let mut scalar = [0u8; 32];
    hkdf.expand(DEVICE_KEY_CONTEXT, &mut scalar)
        .map_err(|_| Error::KeyDerivationFailed("HKDF expansion failed".into()))?;

    clamp_scalar(&mut scalar);
    Ok(scalar)
}

/// Clamp a 32-byte value into valid X25519 scalar form.
fn clamp_scalar(scalar: &mut [u8; 32]) {
    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionKeyPair;

    #[test]
    fn test_derive_deterministic() {
        let prf = [9u8; 32];
        let a = derive_device_scalar(&prf).unwrap();
        let b = derive_device_scalar(&prf).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_different_inputs() {
        let a = derive_device_scalar(&[1u8; 32]).unwrap();
        let b = derive_device_scalar(&[2u8; 32]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_scalar_is_clamped() {
        let scalar = derive_device_scalar(&[42u8; 32]).unwrap();
        assert_eq!(scalar[0] & 0b0000_0111, 0, "low 3 bits of byte 0 clear");
        assert_eq!(scalar[31] & 0b1000_0000, 0, "high bit of byte 31 clear");
        assert_eq!(scalar[31] & 0b0100_0000, 0b0100_0000, "second-highest bit set");
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(derive_device_scalar(&[]).is_err());
    }

    #[test]
    fn test_device_scalar_interoperates_with_envelope() {
        // A device-derived key must open envelopes sealed to its public key.
        let scalar = derive_device_scalar(b"authenticator-prf-output").unwrap();
        let device_keys = EncryptionKeyPair::from_bytes(&scalar);

        let (ciphertext, envelope) =
            crate::crypto::seal(b"for the device", &device_keys.public_bytes(), None).unwrap();
        let opened = crate::crypto::open(&ciphertext, &envelope, &device_keys).unwrap();
        assert_eq!(opened, b"for the device");
    }
}
