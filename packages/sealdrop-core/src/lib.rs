//! # Sealdrop Core
//!
//! Client-side library for Sealdrop encrypted transfers: deliver an
//! encrypted file to a party identified by a public-key address, with a
//! size-tiered fee that the receiving gateway verifies on-chain before
//! accepting the transfer.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       SEALDROP CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌───────────────┐   ┌────────────────┐   ┌───────────────┐            │
//! │  │    Crypto     │   │   Handshake    │   │     Tier      │            │
//! │  │               │   │                │   │               │            │
//! │  │ - X25519 ECDH │   │ - build/parse  │   │ - fee ranges  │            │
//! │  │ - AES-256-GCM │──►│ - canonical    │◄──│ - resolve by  │            │
//! │  │ - Envelope    │   │   message      │   │   byte size   │            │
//! │  │ - HKDF scalar │   │ - meta digest  │   │               │            │
//! │  └───────────────┘   └────────────────┘   └───────────────┘            │
//! │                                                                         │
//! │  The handshake message binds sender, recipient, chain, payment,        │
//! │  timing, tier, sizes, and a digest of the envelope metadata into       │
//! │  one signable string. The gateway re-derives the same string from      │
//! │  fields it trusts and requires byte-equality before accepting the      │
//! │  client's signature.                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`crypto`] - Envelope sealing/opening, key pairs, scalar derivation
//! - [`handshake`] - Canonical signable transfer message
//! - [`tier`] - Size-tiered fee resolution
//! - [`time`] - Timestamp helpers

#![warn(missing_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod crypto;
pub mod error;
pub mod handshake;
pub mod tier;
pub mod time;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use error::{Error, Result};

pub use crypto::{
    open, open_note, seal, EncryptedNote, EncryptionEnvelope, EncryptionKeyPair,
    ENVELOPE_ALGORITHM, ENVELOPE_VERSION,
};

pub use handshake::{
    build_message, normalize_address, parse_message, HandshakeParams, ParsedHandshake,
};

pub use tier::{Tier, TierSchedule};
