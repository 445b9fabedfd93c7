//! Handshake signature verification.
//!
//! Plain accounts sign the handshake message with EIP-191 personal-sign
//! (prefix, keccak256, secp256k1); the signer address is recovered from
//! the 65-byte signature and compared against the declared initiator.
//! Smart-contract wallets cannot produce a recoverable signature, so
//! anything that is not a plausible 65-byte signature is routed through
//! the chain client's EIP-1271 path instead.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use sha3::{Digest, Keccak256};

/// Byte length of a plain secp256k1 signature (r || s || v).
pub const PLAIN_SIGNATURE_LEN: usize = 65;

/// ERC-6492 wrapper suffix: `0x6492` repeated to 32 bytes. Wallets that
/// wrap a contract signature for pre-deployed accounts append this.
pub const CONTRACT_WRAPPER_SUFFIX: [u8; 32] = [
    0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64,
    0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92,
    0x64, 0x92,
];

/// Errors from signature recovery.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// Signature bytes are not a recoverable secp256k1 signature
    #[error("Unrecoverable signature: {0}")]
    Unrecoverable(String),
}

/// keccak256 helper.
pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// EIP-191 personal-sign hash of a message.
pub fn eip191_hash(message: &str) -> [u8; 32] {
    let prefixed = format!("\u{19}Ethereum Signed Message:\n{}{}", message.len(), message);
    keccak256(prefixed.as_bytes())
}

/// Whether the signature plausibly comes from a smart-contract wallet.
///
/// Detected by length (contract signatures are never exactly 65 bytes)
/// or by the ERC-6492 wrapper suffix.
pub fn looks_like_contract_signature(signature: &[u8]) -> bool {
    if signature.len() != PLAIN_SIGNATURE_LEN {
        return true;
    }
    signature.len() >= 32 && signature[signature.len() - 32..] == CONTRACT_WRAPPER_SUFFIX
}

/// Recover the signing address from a message and a plain 65-byte
/// signature.
pub fn recover_signer_address(message: &str, signature: &[u8]) -> Result<String, SignatureError> {
    if signature.len() != PLAIN_SIGNATURE_LEN {
        return Err(SignatureError::Unrecoverable(format!(
            "Expected {} bytes, got {}",
            PLAIN_SIGNATURE_LEN,
            signature.len()
        )));
    }

    let sig = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|e| SignatureError::Unrecoverable(format!("Bad r/s values: {}", e)))?;

    // Wallets emit v as 27/28; the recovery id is 0/1.
    let v = signature[64];
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_byte(recovery_byte)
        .ok_or_else(|| SignatureError::Unrecoverable(format!("Bad recovery id {}", v)))?;

    let hash = eip191_hash(message);
    let verifying_key = VerifyingKey::recover_from_prehash(&hash, &sig, recovery_id)
        .map_err(|e| SignatureError::Unrecoverable(format!("Recovery failed: {}", e)))?;

    Ok(public_key_to_address(&verifying_key))
}

/// Derive the account address from a secp256k1 public key: the last
/// 20 bytes of the keccak256 of the uncompressed point.
pub fn public_key_to_address(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    /// Sign a message the way a wallet would, returning (address, sig).
    fn wallet_sign(message: &str, key_byte: u8) -> (String, Vec<u8>) {
        let signing_key = SigningKey::from_slice(&[key_byte; 32]).unwrap();
        let address = public_key_to_address(signing_key.verifying_key());

        let hash = eip191_hash(message);
        let (sig, recovery_id) = signing_key.sign_prehash_recoverable(&hash).unwrap();

        let mut bytes = sig.to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        (address, bytes)
    }

    #[test]
    fn test_recover_matches_signer() {
        let (address, sig) = wallet_sign("hello sealdrop", 7);
        let recovered = recover_signer_address("hello sealdrop", &sig).unwrap();
        assert_eq!(recovered, address);
    }

    #[test]
    fn test_recover_different_message_differs() {
        let (address, sig) = wallet_sign("message one", 7);
        let recovered = recover_signer_address("message two", &sig).unwrap();
        assert_ne!(recovered, address);
    }

    #[test]
    fn test_recover_rejects_wrong_length() {
        assert!(recover_signer_address("m", &[0u8; 64]).is_err());
        assert!(recover_signer_address("m", &[0u8; 66]).is_err());
    }

    #[test]
    fn test_v_zero_one_also_accepted() {
        let (address, mut sig) = wallet_sign("raw recovery id", 9);
        sig[64] -= 27; // some tooling emits 0/1 directly
        let recovered = recover_signer_address("raw recovery id", &sig).unwrap();
        assert_eq!(recovered, address);
    }

    #[test]
    fn test_contract_signature_detection() {
        assert!(!looks_like_contract_signature(&[0u8; 65]));
        assert!(looks_like_contract_signature(&[0u8; 64]));
        assert!(looks_like_contract_signature(&[0u8; 300]));

        let mut wrapped = vec![0u8; 65];
        wrapped[33..65].copy_from_slice(&CONTRACT_WRAPPER_SUFFIX);
        assert!(looks_like_contract_signature(&wrapped));
    }

    #[test]
    fn test_eip191_hash_depends_on_length() {
        assert_ne!(eip191_hash("ab"), eip191_hash("abc"));
    }

    #[test]
    fn test_address_format() {
        let (address, _) = wallet_sign("x", 3);
        assert_eq!(address.len(), 42);
        assert!(address.starts_with("0x"));
        assert_eq!(address, address.to_lowercase());
    }
}
