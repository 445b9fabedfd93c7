//! Payment verification.
//!
//! The verifier walks one transfer through a fixed sequence of checks;
//! every step returns a typed result and any failure is terminal:
//!
//! ```text
//! SizeDeclared ──► resolve tier from the authoritative size
//!      │
//! HandshakeParsed ──► re-derive the expected message from fields the
//!      │              gateway trusts; require byte-equality
//!      │
//! SignatureVerified ──► recover signer (plain) or EIP-1271 (contract
//!      │                wallet); must match the declared initiator
//!      │
//! PaymentEvaluated ──► free sentinel: smallest tier only
//!      │               on-chain: receipt → burn event → tier/sender
//!      ▼
//! Accepted (the orchestrator still owns ledger + length checks)
//! ```
//!
//! The free/paid split is a tagged enum decided exactly once, when the
//! request's payment reference is parsed. The sentinel prefix never
//! travels past [`PaymentProof::parse`].

use sealdrop_core::handshake::{
    build_message, normalize_address, parse_message, HandshakeParams, ParsedHandshake,
};
use sealdrop_core::tier::{Tier, TierSchedule};
use serde::{Deserialize, Serialize};

use crate::chain::signature::{
    eip191_hash, looks_like_contract_signature, recover_signer_address,
};
use crate::chain::{decode_burn_event, ChainClient};
use crate::error::{UploadError, UploadResult};

/// Reserved prefix marking a free-tier payment reference.
pub const FREE_REF_PREFIX: &str = "free:";

/// A parsed payment reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentProof {
    /// Free monthly allotment, no on-chain receipt
    Free {
        /// The full sentinel reference, e.g. `free:2026-08-<uuid>`
        reference: String,
    },
    /// On-chain fee payment
    OnChain {
        /// Transaction hash of the burn
        tx_hash: String,
    },
}

impl PaymentProof {
    /// Classify a payment reference. The discriminator is the reserved
    /// sentinel prefix; everything else must be a transaction hash.
    pub fn parse(reference: &str) -> UploadResult<Self> {
        let normalized = reference.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(UploadError::Malformed("Empty payment reference".into()));
        }
        if normalized.starts_with(FREE_REF_PREFIX) {
            return Ok(PaymentProof::Free {
                reference: normalized,
            });
        }
        let is_tx_hash = normalized.len() == 66
            && normalized.starts_with("0x")
            && normalized[2..].chars().all(|c| c.is_ascii_hexdigit());
        if !is_tx_hash {
            return Err(UploadError::Malformed(format!(
                "Payment reference is neither a transaction hash nor a free-tier reference: {}",
                normalized
            )));
        }
        Ok(PaymentProof::OnChain {
            tx_hash: normalized,
        })
    }

    /// The reference string, whichever variant.
    pub fn reference(&self) -> &str {
        match self {
            PaymentProof::Free { reference } => reference,
            PaymentProof::OnChain { tx_hash } => tx_hash,
        }
    }
}

/// Whether a transfer was paid on-chain or used a free allotment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    /// On-chain fee burn
    Paid,
    /// Monthly free allotment
    Free,
}

/// How the handshake signature was validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerKind {
    /// Plain account, signer recovered from the signature
    Plain,
    /// Smart-contract wallet, validated via EIP-1271
    ContractWallet,
}

/// The outcome of payment evaluation.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    /// Paid or free
    pub kind: PaymentKind,
    /// First burn amount, verbatim from the event ("0x0" for free)
    pub fee_primary: String,
    /// Second burn amount, verbatim from the event ("0x0" for free)
    pub fee_secondary: String,
}

/// The request fields the gateway trusts when re-deriving the
/// handshake: addresses it normalized, the tier it resolved, sizes it
/// checked, and the digest it recomputed.
#[derive(Debug, Clone)]
pub struct TrustedFields {
    /// Normalized initiator address
    pub initiator: String,
    /// Normalized recipient address
    pub recipient: String,
    /// Chain id from the request
    pub chain_id: u64,
    /// Normalized payment reference
    pub payment_ref: String,
    /// Tier id the gateway resolved from the authoritative size
    pub tier_id: String,
    /// Plaintext length from the envelope metadata
    pub plaintext_bytes: u64,
    /// Declared ciphertext length
    pub ciphertext_bytes: u64,
    /// Digest the gateway recomputed from the envelope metadata
    pub metadata_digest: String,
}

/// Step-by-step verifier for one transfer.
pub struct PaymentVerifier<'a> {
    chain: &'a dyn ChainClient,
    schedule: &'a TierSchedule,
}

impl<'a> PaymentVerifier<'a> {
    /// Create a verifier over a chain client and tier schedule.
    pub fn new(chain: &'a dyn ChainClient, schedule: &'a TierSchedule) -> Self {
        Self { chain, schedule }
    }

    /// Step 1: resolve the tier from the authoritative size.
    ///
    /// The explicitly declared original size wins when present, but it
    /// must agree exactly with the envelope's asserted plaintext
    /// length. Sizes beyond the largest tier reject rather than
    /// defaulting to the largest tier.
    pub fn resolve_tier(
        &self,
        declared_original: Option<u64>,
        envelope_plaintext: u64,
    ) -> UploadResult<(&Tier, u64)> {
        let authoritative = match declared_original {
            Some(declared) if declared != envelope_plaintext => {
                return Err(UploadError::Mismatch {
                    field: "size",
                    detail: format!(
                        "declared original size {} disagrees with envelope plaintext length {}",
                        declared, envelope_plaintext
                    ),
                });
            }
            Some(declared) => declared,
            None => envelope_plaintext,
        };

        let tier = self
            .schedule
            .resolve_by_size(authoritative)
            .ok_or_else(|| UploadError::Mismatch {
                field: "tier",
                detail: format!("no tier covers {} bytes", authoritative),
            })?;
        Ok((tier, authoritative))
    }

    /// Step 2: require the client's handshake message to equal, byte
    /// for byte, the message the gateway derives from fields it
    /// trusts. The client-asserted timestamp and filename are taken
    /// from the signed message itself; everything else must match the
    /// trusted values, and any disagreement names the offending field.
    pub fn verify_handshake(
        &self,
        trusted: &TrustedFields,
        supplied: &str,
    ) -> UploadResult<ParsedHandshake> {
        let parsed = parse_message(supplied)?;

        if parsed.initiator != trusted.initiator {
            return Err(field_mismatch("From", &trusted.initiator, &parsed.initiator));
        }
        if parsed.recipient != trusted.recipient {
            return Err(field_mismatch("To", &trusted.recipient, &parsed.recipient));
        }
        if parsed.chain_id != trusted.chain_id {
            return Err(field_mismatch(
                "Chain-Id",
                &trusted.chain_id.to_string(),
                &parsed.chain_id.to_string(),
            ));
        }
        if parsed.payment_ref != trusted.payment_ref {
            return Err(field_mismatch(
                "Payment-Ref",
                &trusted.payment_ref,
                &parsed.payment_ref,
            ));
        }
        if parsed.tier_id != trusted.tier_id {
            return Err(field_mismatch("Tier", &trusted.tier_id, &parsed.tier_id));
        }
        if parsed.plaintext_bytes != trusted.plaintext_bytes {
            return Err(field_mismatch(
                "Plaintext-Bytes",
                &trusted.plaintext_bytes.to_string(),
                &parsed.plaintext_bytes.to_string(),
            ));
        }
        if parsed.ciphertext_bytes != trusted.ciphertext_bytes {
            return Err(field_mismatch(
                "Ciphertext-Bytes",
                &trusted.ciphertext_bytes.to_string(),
                &parsed.ciphertext_bytes.to_string(),
            ));
        }
        if parsed.metadata_digest != trusted.metadata_digest {
            return Err(field_mismatch(
                "Metadata-Digest",
                &trusted.metadata_digest,
                &parsed.metadata_digest,
            ));
        }

        // Belt and braces: the canonical rebuild must reproduce the
        // supplied message exactly, or the signature covers something
        // other than what was verified above.
        let expected = build_message(&HandshakeParams {
            initiator: trusted.initiator.clone(),
            recipient: trusted.recipient.clone(),
            chain_id: trusted.chain_id,
            payment_ref: trusted.payment_ref.clone(),
            sent_at_ms: parsed.sent_at_ms,
            tier_id: trusted.tier_id.clone(),
            plaintext_bytes: trusted.plaintext_bytes,
            ciphertext_bytes: trusted.ciphertext_bytes,
            filename: parsed.filename.clone(),
            metadata_digest: trusted.metadata_digest.clone(),
        });
        if expected != supplied {
            return Err(UploadError::Mismatch {
                field: "handshake",
                detail: "message is not in canonical form".into(),
            });
        }

        Ok(parsed)
    }

    /// Step 3: validate the signature over the handshake message.
    ///
    /// Plain signatures recover the signer address, which must equal
    /// the declared initiator. Signatures that cannot be plain
    /// (wrong length, wrapper marker) are checked against the
    /// initiator as a contract wallet via EIP-1271.
    pub async fn verify_signature(
        &self,
        message: &str,
        signature: &[u8],
        initiator: &str,
    ) -> UploadResult<SignerKind> {
        let initiator = normalize_address(initiator);

        if looks_like_contract_signature(signature) {
            let valid = self
                .chain
                .is_valid_contract_signature(&initiator, eip191_hash(message), signature)
                .await?;
            if !valid {
                return Err(UploadError::Mismatch {
                    field: "signature",
                    detail: "contract wallet rejected the signature".into(),
                });
            }
            return Ok(SignerKind::ContractWallet);
        }

        let recovered = recover_signer_address(message, signature).map_err(|e| {
            UploadError::Mismatch {
                field: "signature",
                detail: e.to_string(),
            }
        })?;
        if recovered != initiator {
            return Err(UploadError::Mismatch {
                field: "signature",
                detail: format!("recovered signer {} is not the initiator", recovered),
            });
        }
        Ok(SignerKind::Plain)
    }

    /// Step 4, free branch: free transfers are only permitted for the
    /// smallest tier. The allowance reservation itself belongs to the
    /// ledger and runs in the orchestrator.
    pub fn check_free_eligibility(&self, tier: &Tier) -> UploadResult<VerifiedPayment> {
        let smallest = self.schedule.smallest();
        if tier.id != smallest.id {
            return Err(UploadError::Mismatch {
                field: "tier",
                detail: format!(
                    "free transfers are limited to the '{}' tier, got '{}'",
                    smallest.id, tier.id
                ),
            });
        }
        Ok(VerifiedPayment {
            kind: PaymentKind::Free,
            fee_primary: "0x0".to_string(),
            fee_secondary: "0x0".to_string(),
        })
    }

    /// Step 4, paid branch: fetch the receipt, decode the burn event,
    /// and require the event to match the resolved tier and the
    /// initiator. For plain signatures the transaction's reported
    /// sender must also be the initiator; a contract wallet may relay
    /// through another sender.
    pub async fn evaluate_paid(
        &self,
        tx_hash: &str,
        tier: &Tier,
        initiator: &str,
        signer: SignerKind,
    ) -> UploadResult<VerifiedPayment> {
        let initiator = normalize_address(initiator);

        let receipt = self
            .chain
            .transaction_receipt(tx_hash)
            .await?
            .ok_or_else(|| UploadError::Mismatch {
                field: "payment",
                detail: format!("no receipt found for {}", tx_hash),
            })?;

        if !receipt.status {
            return Err(UploadError::Mismatch {
                field: "payment",
                detail: format!("transaction {} did not succeed", tx_hash),
            });
        }

        if signer == SignerKind::Plain && receipt.from != initiator {
            return Err(UploadError::Mismatch {
                field: "payment",
                detail: format!(
                    "transaction sender {} is not the initiator",
                    receipt.from
                ),
            });
        }

        let event = receipt
            .logs
            .iter()
            .find_map(decode_burn_event)
            .ok_or_else(|| UploadError::Mismatch {
                field: "payment",
                detail: "receipt carries no burn event".into(),
            })?;

        if event.tier_id != tier.id {
            return Err(UploadError::Mismatch {
                field: "tier",
                detail: format!(
                    "burn event paid for tier '{}', resolved tier is '{}'",
                    event.tier_id, tier.id
                ),
            });
        }
        if event.sender != initiator {
            return Err(UploadError::Mismatch {
                field: "payment",
                detail: format!("burn event sender {} is not the initiator", event.sender),
            });
        }

        Ok(VerifiedPayment {
            kind: PaymentKind::Paid,
            fee_primary: event.amount_primary,
            fee_secondary: event.amount_secondary,
        })
    }
}

fn field_mismatch(field: &'static str, expected: &str, got: &str) -> UploadError {
    UploadError::Mismatch {
        field,
        detail: format!("signed '{}', expected '{}'", got, expected),
    }
}

// ============================================================================
// TESTS
// ============================================================================
