//! # Handshake Protocol
//!
//! The canonical signable message binding a transfer's identity,
//! payment, size, and metadata fields into one string.
//!
//! ## Message Format
//!
//! ```text
//! SEALDROP ENCRYPTED TRANSFER
//! Sign this message to authorize the file transfer described below.
//! From: 0xa1b2...
//! To: 0xc3d4...
//! Chain-Id: 8453
//! Payment-Ref: 0x9f8e...
//! Sent-At: 1754560000000
//! Tier: micro
//! Plaintext-Bytes: 10485760
//! Ciphertext-Bytes: 10485776
//! Filename: report.pdf
//! Metadata-Digest: 4f2a...
//! ```
//!
//! The `Filename` line is omitted when no original filename was given.
//!
//! ## Why canonical?
//!
//! The signature covers exactly this string. The gateway re-derives the
//! expected message from fields it computed itself (normalized
//! addresses, resolved tier, recomputed digest) and requires
//! byte-equality with the client-supplied message before treating the
//! signature as valid. That only works if `build` is deterministic:
//! given the same inputs, a byte-identical message must result, and
//! `build(parse(build(p))) == build(p)` must hold for any valid `p`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// First line of every handshake message
pub const MESSAGE_HEADER: &str = "SEALDROP ENCRYPTED TRANSFER";

/// Second line of every handshake message
pub const MESSAGE_INTRO: &str =
    "Sign this message to authorize the file transfer described below.";

const FIELD_FROM: &str = "From";
const FIELD_TO: &str = "To";
const FIELD_CHAIN_ID: &str = "Chain-Id";
const FIELD_PAYMENT_REF: &str = "Payment-Ref";
const FIELD_SENT_AT: &str = "Sent-At";
const FIELD_TIER: &str = "Tier";
const FIELD_PLAINTEXT_BYTES: &str = "Plaintext-Bytes";
const FIELD_CIPHERTEXT_BYTES: &str = "Ciphertext-Bytes";
const FIELD_FILENAME: &str = "Filename";
const FIELD_METADATA_DIGEST: &str = "Metadata-Digest";

/// Inputs to [`build_message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeParams {
    /// Sender address (the party that signs and pays)
    pub initiator: String,
    /// Recipient address
    pub recipient: String,
    /// Chain the payment lives on
    pub chain_id: u64,
    /// Payment reference: a transaction hash, or a free-tier sentinel
    pub payment_ref: String,
    /// Client-asserted send time, Unix milliseconds
    pub sent_at_ms: u64,
    /// Resolved fee tier id
    pub tier_id: String,
    /// Plaintext byte length of the file
    pub plaintext_bytes: u64,
    /// Ciphertext byte length of the file
    pub ciphertext_bytes: u64,
    /// Original filename, if the sender chose to reveal it
    pub filename: Option<String>,
    /// Digest of the canonicalized envelope metadata
    pub metadata_digest: String,
}

/// The fields recovered by [`parse_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHandshake {
    /// Sender address
    pub initiator: String,
    /// Recipient address
    pub recipient: String,
    /// Chain id
    pub chain_id: u64,
    /// Payment reference
    pub payment_ref: String,
    /// Send time, Unix milliseconds
    pub sent_at_ms: u64,
    /// Fee tier id
    pub tier_id: String,
    /// Plaintext byte length
    pub plaintext_bytes: u64,
    /// Ciphertext byte length
    pub ciphertext_bytes: u64,
    /// Original filename, if present
    pub filename: Option<String>,
    /// Envelope metadata digest
    pub metadata_digest: String,
}

impl ParsedHandshake {
    /// Convert back into build parameters.
    ///
    /// `build_message(&parsed.into_params())` reproduces the original
    /// message byte for byte.
    pub fn into_params(self) -> HandshakeParams {
        HandshakeParams {
            initiator: self.initiator,
            recipient: self.recipient,
            chain_id: self.chain_id,
            payment_ref: self.payment_ref,
            sent_at_ms: self.sent_at_ms,
            tier_id: self.tier_id,
            plaintext_bytes: self.plaintext_bytes,
            ciphertext_bytes: self.ciphertext_bytes,
            filename: self.filename,
            metadata_digest: self.metadata_digest,
        }
    }
}

/// Normalize an address to canonical lowercase form.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Check whether a string is a well-formed 20-byte hex address.
pub fn is_valid_address(address: &str) -> bool {
    let addr = address.trim();
    addr.len() == 42
        && addr.starts_with("0x")
        && addr[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Sanitize a free-text value: strip newlines, collapse whitespace runs
/// to a single space, trim.
fn sanitize_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_was_space = true; // leading whitespace is dropped
    for c in value.chars() {
        let c = match c {
            '\r' | '\n' | '\t' => ' ',
            other => other,
        };
        if c == ' ' {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Escape separator characters in a free-text value.
fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace(':', "\\:")
}

/// Inverse of [`escape_value`].
fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Build the canonical handshake message.
///
/// Addresses are normalized to lowercase, the payment reference and
/// digest are lowercased, and the filename is sanitized and escaped.
/// Output field order is fixed.
pub fn build_message(params: &HandshakeParams) -> String {
    let mut lines = Vec::with_capacity(12);
    lines.push(MESSAGE_HEADER.to_string());
    lines.push(MESSAGE_INTRO.to_string());
    lines.push(format!("{}: {}", FIELD_FROM, normalize_address(&params.initiator)));
    lines.push(format!("{}: {}", FIELD_TO, normalize_address(&params.recipient)));
    lines.push(format!("{}: {}", FIELD_CHAIN_ID, params.chain_id));
    lines.push(format!(
        "{}: {}",
        FIELD_PAYMENT_REF,
        params.payment_ref.trim().to_lowercase()
    ));
    lines.push(format!("{}: {}", FIELD_SENT_AT, params.sent_at_ms));
    lines.push(format!("{}: {}", FIELD_TIER, sanitize_text(&params.tier_id)));
    lines.push(format!("{}: {}", FIELD_PLAINTEXT_BYTES, params.plaintext_bytes));
    lines.push(format!("{}: {}", FIELD_CIPHERTEXT_BYTES, params.ciphertext_bytes));
    if let Some(filename) = &params.filename {
        let cleaned = sanitize_text(filename);
        if !cleaned.is_empty() {
            lines.push(format!("{}: {}", FIELD_FILENAME, escape_value(&cleaned)));
        }
    }
    lines.push(format!(
        "{}: {}",
        FIELD_METADATA_DIGEST,
        params.metadata_digest.trim().to_lowercase()
    ));
    lines.join("\n")
}

/// Parse a handshake message back into its fields.
///
/// ## Errors
///
/// `MalformedMessage` if the header or intro lines do not match
/// exactly, a line lacks the `": "` separator, or a required field is
/// absent. `InvalidNumber` if a numeric field does not parse as a
/// non-negative integer.
pub fn parse_message(message: &str) -> Result<ParsedHandshake> {
    let lines: Vec<&str> = message.lines().collect();

    if lines.len() < 2 {
        return Err(Error::MalformedMessage("Message too short".into()));
    }
    if lines[0] != MESSAGE_HEADER {
        return Err(Error::MalformedMessage(format!(
            "Bad header line: '{}'",
            lines[0]
        )));
    }
    if lines[1] != MESSAGE_INTRO {
        return Err(Error::MalformedMessage(format!(
            "Bad intro line: '{}'",
            lines[1]
        )));
    }

    let mut fields: Vec<(&str, &str)> = Vec::with_capacity(lines.len() - 2);
    for line in &lines[2..] {
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(": ").ok_or_else(|| {
            Error::MalformedMessage(format!("Line missing separator: '{}'", line))
        })?;
        fields.push((key, value));
    }

    fn lookup<'a>(fields: &[(&'a str, &'a str)], key: &str) -> Result<&'a str> {
        fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .ok_or_else(|| Error::MalformedMessage(format!("Missing field '{}'", key)))
    }

    fn number(fields: &[(&str, &str)], key: &str) -> Result<u64> {
        let raw = lookup(fields, key)?;
        raw.parse::<u64>().map_err(|_| Error::InvalidNumber {
            field: key.to_string(),
            value: raw.to_string(),
        })
    }

    let filename = fields
        .iter()
        .find(|(k, _)| *k == FIELD_FILENAME)
        .map(|(_, v)| unescape_value(v));

    Ok(ParsedHandshake {
        initiator: lookup(&fields, FIELD_FROM)?.to_string(),
        recipient: lookup(&fields, FIELD_TO)?.to_string(),
        chain_id: number(&fields, FIELD_CHAIN_ID)?,
        payment_ref: lookup(&fields, FIELD_PAYMENT_REF)?.to_string(),
        sent_at_ms: number(&fields, FIELD_SENT_AT)?,
        tier_id: lookup(&fields, FIELD_TIER)?.to_string(),
        plaintext_bytes: number(&fields, FIELD_PLAINTEXT_BYTES)?,
        ciphertext_bytes: number(&fields, FIELD_CIPHERTEXT_BYTES)?,
        filename,
        metadata_digest: lookup(&fields, FIELD_METADATA_DIGEST)?.to_string(),
    })
}

// ============================================================================
// TESTS
// ============================================================================
