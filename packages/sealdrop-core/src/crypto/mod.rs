//! # Cryptography Module
//!
//! Envelope construction and decryption for Sealdrop transfers.
//!
//! ## Encryption Scheme
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       ENVELOPE SEALING                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. Key Exchange: X25519 ECDH                                          │
//! │     Ephemeral Private × Recipient Public = Shared Secret               │
//! │                                                                         │
//! │  2. Key Derivation: SHA-256                                            │
//! │     Shared Secret → 256-bit AES key                                    │
//! │                                                                         │
//! │  3. Encryption: AES-256-GCM                                            │
//! │     • 256-bit key                                                      │
//! │     • 96-bit nonce (random per payload)                                │
//! │     • 128-bit authentication tag                                       │
//! │                                                                         │
//! │  The optional note is sealed under the SAME key but a FRESH nonce.     │
//! │  Reusing a nonce across the file and note ciphertexts would break      │
//! │  confidentiality, so the two nonces are generated independently.       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose | Why Chosen |
//! |-----------|---------|------------|
//! | X25519 | Key Exchange | Fast ECDH, 32-byte keys, widely audited |
//! | AES-256-GCM | Encryption | Hardware acceleration, AEAD |
//! | SHA-256 | Key Derivation | Fixed-size secret → fixed-size key |
//! | HKDF-SHA256 | Device-bound scalars | Standard extract-and-expand |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: Secret keys are zeroized when dropped
//! 2. **Constant-Time Operations**: dalek provides constant-time curve math
//! 3. **Secure Random**: `rand::rngs::OsRng` for keys and nonces
//! 4. **No Key Reuse**: Every seal generates a fresh ephemeral keypair

mod envelope;
mod kdf;
mod keys;

pub use envelope::{
    open, open_note, seal, EncryptedNote, EncryptionEnvelope, ENVELOPE_ALGORITHM,
    ENVELOPE_VERSION, NONCE_SIZE,
};
pub use kdf::derive_device_scalar;
pub use keys::EncryptionKeyPair;

/// Size of X25519 public and secret keys in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;
