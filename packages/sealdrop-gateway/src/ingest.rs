//! Ingestion orchestrator.
//!
//! Sequences one upload from raw request fields to a durable record:
//!
//! ```text
//! parse ─► verify (tier, handshake, signature, payment)
//!       ─► reserve payment reference        (atomic, before any blob write)
//!       ─► reserve free allowance           (free path only)
//!       ─► write ciphertext to blob store, counting bytes
//!       ─► length check                     (mismatch deletes the blob)
//!       ─► upload record + recipient/initiator indexes
//!       ─► terminal used-payment marker
//!       ─► cleanup index entry (state=active)
//! ```
//!
//! Ordering is deliberate: cryptographic verification completes before
//! any ledger mutation, and ledger mutation completes before the
//! potentially large blob write begins. A failure after reservation
//! releases the reservation and deletes any written blob, so the used
//! marker is never left set without a corresponding upload record.

use std::time::Instant;

use sealdrop_core::crypto::EncryptionEnvelope;
use sealdrop_core::handshake::{is_valid_address, normalize_address};
use serde::{Deserialize, Serialize};

use crate::error::{UploadError, UploadResult};
use crate::payment::{PaymentKind, PaymentProof, PaymentVerifier, TrustedFields, VerifiedPayment};
use crate::state::GatewayState;
use crate::store::{derive_access_secret, BlobStore, ControlPlaneStore};

/// Namespace holding upload records, keyed by payment reference.
pub const NS_UPLOADS: &str = "uploads";

/// Recipient-keyed index namespace.
pub const NS_UPLOADS_RECIPIENT: &str = "uploads:recipient";

/// Initiator-keyed index namespace.
pub const NS_UPLOADS_INITIATOR: &str = "uploads:initiator";

/// Cleanup index namespace.
pub const NS_CLEANUP_INDEX: &str = "cleanup-index";

/// The durable record of an accepted transfer. Append-only: created
/// once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    /// Content id of the ciphertext in the blob store
    pub content_id: String,
    /// Original filename from the signed handshake, if revealed
    pub original_filename: Option<String>,
    /// Filename under which the blob is stored
    pub stored_filename: String,
    /// Recipient address
    pub recipient: String,
    /// Initiator address
    pub initiator: String,
    /// Payment reference that paid for this transfer
    pub payment_ref: String,
    /// Plaintext byte length
    pub plaintext_bytes: u64,
    /// Ciphertext byte length
    pub ciphertext_bytes: u64,
    /// Authoritative original size used for tier resolution
    pub original_bytes: u64,
    /// Client-asserted send time from the signed handshake
    pub sent_at_ms: u64,
    /// Resolved fee tier
    pub tier_id: String,
    /// First burn amount, verbatim from the event
    pub fee_amount_primary: String,
    /// Second burn amount, verbatim from the event
    pub fee_amount_secondary: String,
    /// Paid or free
    pub payment_kind: PaymentKind,
    /// Envelope metadata (the ciphertext itself lives in the blob store)
    pub encryption_meta: EncryptionEnvelope,
    /// Acceptance time
    pub created_at_ms: i64,
}

/// Lifecycle state of a cleanup index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupState {
    /// Blob still present
    Active,
    /// Blob expired and deleted by the sweeper
    Deleted,
}

/// One entry in the cleanup index. Mutated exactly once, from active
/// to deleted; retained afterwards as an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupIndexEntry {
    /// Payment reference of the transfer
    pub payment_ref: String,
    /// Content id of the stored blob
    pub content_id: String,
    /// Recipient address
    pub recipient: String,
    /// Initiator address
    pub initiator: String,
    /// Client-asserted send time
    pub sent_at_ms: u64,
    /// When the blob expires: sent_at + retention window
    pub expires_at_ms: i64,
    /// Lifecycle state
    pub state: CleanupState,
    /// When the sweeper marked this entry deleted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marked_deleted_at_ms: Option<i64>,
}

/// Parsed multipart upload request.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Recipient address field
    pub recipient: String,
    /// Initiator address field
    pub initiator: String,
    /// Client-supplied handshake message
    pub handshake: String,
    /// Signature over the handshake, 0x-hex
    pub signature: String,
    /// Payment reference field
    pub payment_ref: String,
    /// Chain id field
    pub chain_id: u64,
    /// Tier id the client believes applies
    pub tier_id: String,
    /// Explicitly declared original size, if sent
    pub original_size: Option<u64>,
    /// Envelope metadata JSON
    pub encryption_meta: String,
    /// The ciphertext body
    pub ciphertext: Vec<u8>,
}

/// Per-step wall-clock timings for the success response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTimings {
    pub parse_ms: u64,
    pub verify_ms: u64,
    pub ledger_ms: u64,
    pub store_ms: u64,
    pub record_ms: u64,
}

/// An accepted upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub record: UploadRecord,
    pub timings: StepTimings,
}

/// Drive one upload through the full pipeline.
pub async fn process_upload(
    state: &GatewayState,
    request: UploadRequest,
) -> UploadResult<UploadOutcome> {
    // ── Parse ─────────────────────────────────────────────────────────
    let parse_started = Instant::now();

    let recipient = normalize_address(&request.recipient);
    let initiator = normalize_address(&request.initiator);
    if !is_valid_address(&recipient) {
        return Err(UploadError::Malformed(format!(
            "Invalid recipient address: {}",
            request.recipient
        )));
    }
    if !is_valid_address(&initiator) {
        return Err(UploadError::Malformed(format!(
            "Invalid initiator address: {}",
            request.initiator
        )));
    }
    if request.chain_id != state.config.chain_id {
        return Err(UploadError::Mismatch {
            field: "Chain-Id",
            detail: format!(
                "gateway verifies chain {}, request names {}",
                state.config.chain_id, request.chain_id
            ),
        });
    }

    let envelope: EncryptionEnvelope = serde_json::from_str(&request.encryption_meta)
        .map_err(|e| UploadError::Malformed(format!("Bad encryption metadata: {}", e)))?;
    envelope.validate()?;

    let signature = decode_signature(&request.signature)?;
    let proof = PaymentProof::parse(&request.payment_ref)?;
    let payment_ref = proof.reference().to_string();

    let parse_ms = elapsed_ms(parse_started);

    // ── Verify ────────────────────────────────────────────────────────
    let verify_started = Instant::now();
    let verifier = PaymentVerifier::new(state.chain.as_ref(), &state.schedule);

    let (tier, original_bytes) =
        verifier.resolve_tier(request.original_size, envelope.plaintext_length)?;
    if request.tier_id != tier.id {
        return Err(UploadError::Mismatch {
            field: "tier",
            detail: format!(
                "request names tier '{}', size resolves to '{}'",
                request.tier_id, tier.id
            ),
        });
    }

    let trusted = TrustedFields {
        initiator: initiator.clone(),
        recipient: recipient.clone(),
        chain_id: request.chain_id,
        payment_ref: payment_ref.clone(),
        tier_id: tier.id.clone(),
        plaintext_bytes: envelope.plaintext_length,
        ciphertext_bytes: envelope.ciphertext_length,
        metadata_digest: envelope.metadata_digest(),
    };
    let parsed = verifier.verify_handshake(&trusted, &request.handshake)?;

    let signer = verifier
        .verify_signature(&request.handshake, &signature, &initiator)
        .await?;

    let payment: VerifiedPayment = match &proof {
        PaymentProof::Free { .. } => verifier.check_free_eligibility(tier)?,
        PaymentProof::OnChain { tx_hash } => {
            verifier.evaluate_paid(tx_hash, tier, &initiator, signer).await?
        }
    };
    let verify_ms = elapsed_ms(verify_started);

    // ── Ledger ────────────────────────────────────────────────────────
    // Reservation precedes the blob write so a replayed reference is
    // rejected before any bytes land.
    let ledger_started = Instant::now();
    state.ledger.reserve_payment_reference(&payment_ref).await?;

    if payment.kind == PaymentKind::Free {
        if let Err(e) = state
            .ledger
            .reserve_free_allowance(&initiator, chrono::Utc::now())
            .await
        {
            state.ledger.release_payment_reference(&payment_ref).await;
            return Err(e);
        }
    }
    let ledger_ms = elapsed_ms(ledger_started);

    // ── Blob write + length check ─────────────────────────────────────
    let store_started = Instant::now();
    let received = request.ciphertext.len() as u64;
    let access_secret = derive_access_secret(&recipient, &state.config.access_salt);

    let content_id = match state
        .blobs
        .put(
            &request.ciphertext,
            &blob_filename(&payment_ref),
            "application/octet-stream",
            &access_secret,
        )
        .await
    {
        Ok(id) => id,
        Err(e) => {
            state.ledger.release_payment_reference(&payment_ref).await;
            return Err(e.into());
        }
    };

    if received != envelope.ciphertext_length {
        // The data was untrustworthy even though we only proved it
        // after storing; compensate by deleting the blob.
        let _ = state.blobs.delete(&content_id).await;
        state.ledger.release_payment_reference(&payment_ref).await;
        return Err(UploadError::IntegrityFailure {
            declared: envelope.ciphertext_length,
            received,
        });
    }
    let store_ms = elapsed_ms(store_started);

    // ── Record + indexes + terminal marker + cleanup entry ────────────
    let record_started = Instant::now();
    let record = UploadRecord {
        content_id: content_id.clone(),
        original_filename: parsed.filename.clone(),
        stored_filename: blob_filename(&payment_ref),
        recipient: recipient.clone(),
        initiator: initiator.clone(),
        payment_ref: payment_ref.clone(),
        plaintext_bytes: envelope.plaintext_length,
        ciphertext_bytes: envelope.ciphertext_length,
        original_bytes,
        sent_at_ms: parsed.sent_at_ms,
        tier_id: tier.id.clone(),
        fee_amount_primary: payment.fee_primary.clone(),
        fee_amount_secondary: payment.fee_secondary.clone(),
        payment_kind: payment.kind,
        encryption_meta: envelope.clone(),
        created_at_ms: sealdrop_core::time::now_timestamp_millis(),
    };

    if let Err(e) = persist_accepted(state, &record).await {
        let _ = state.blobs.delete(&content_id).await;
        state.ledger.release_payment_reference(&payment_ref).await;
        return Err(e);
    }
    let record_ms = elapsed_ms(record_started);

    tracing::info!(
        content_id = %content_id,
        initiator = %initiator,
        recipient = %recipient,
        tier = %tier.id,
        payment_kind = ?payment.kind,
        ciphertext_bytes = received,
        "Transfer accepted"
    );

    Ok(UploadOutcome {
        record,
        timings: StepTimings {
            parse_ms,
            verify_ms,
            ledger_ms,
            store_ms,
            record_ms,
        },
    })
}

/// Writes after successful verification, all keyed by the payment
/// reference and therefore safe to retry.
async fn persist_accepted(state: &GatewayState, record: &UploadRecord) -> UploadResult<()> {
    let encoded =
        serde_json::to_string(record).map_err(|e| UploadError::Infrastructure(e.to_string()))?;

    state
        .control
        .set(NS_UPLOADS, &record.payment_ref, encoded)
        .await?;
    state
        .control
        .set(
            NS_UPLOADS_RECIPIENT,
            &index_key(&record.recipient, &record.payment_ref),
            record.payment_ref.clone(),
        )
        .await?;
    state
        .control
        .set(
            NS_UPLOADS_INITIATOR,
            &index_key(&record.initiator, &record.payment_ref),
            record.payment_ref.clone(),
        )
        .await?;

    // Terminal marker only after the record exists
    state
        .ledger
        .finalize_payment_reference(&record.payment_ref, &record.content_id)
        .await?;

    let entry = CleanupIndexEntry {
        payment_ref: record.payment_ref.clone(),
        content_id: record.content_id.clone(),
        recipient: record.recipient.clone(),
        initiator: record.initiator.clone(),
        sent_at_ms: record.sent_at_ms,
        expires_at_ms: record.sent_at_ms as i64 + state.config.retention_window_ms(),
        state: CleanupState::Active,
        marked_deleted_at_ms: None,
    };
    let entry_json =
        serde_json::to_string(&entry).map_err(|e| UploadError::Infrastructure(e.to_string()))?;
    state
        .control
        .set(NS_CLEANUP_INDEX, &record.payment_ref, entry_json)
        .await?;

    Ok(())
}

/// List the upload records referenced by an identity-keyed index.
pub async fn list_uploads(
    state: &GatewayState,
    index_namespace: &str,
    address: &str,
) -> UploadResult<Vec<UploadRecord>> {
    let address = normalize_address(address);
    let prefix = format!("{}/", address);

    let index = state.control.get_all(index_namespace).await?;
    let mut records = Vec::new();
    for (key, payment_ref) in index {
        if !key.starts_with(&prefix) {
            continue;
        }
        if let Some(raw) = state.control.get(NS_UPLOADS, &payment_ref).await? {
            match serde_json::from_str::<UploadRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(payment_ref = %payment_ref, error = %e, "Skipping unreadable upload record")
                }
            }
        }
    }
    records.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
    Ok(records)
}

fn index_key(address: &str, payment_ref: &str) -> String {
    format!("{}/{}", address, payment_ref)
}

fn blob_filename(payment_ref: &str) -> String {
    format!("{}.bin", payment_ref.trim_start_matches("0x"))
}

fn decode_signature(signature: &str) -> UploadResult<Vec<u8>> {
    let raw = signature.trim();
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(raw).map_err(|e| UploadError::Malformed(format!("Bad signature hex: {}", e)))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// ============================================================================
// TESTS
// ============================================================================
