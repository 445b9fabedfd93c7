//! Upload failure taxonomy.
//!
//! Every rejection an upload can hit falls into one of five categories:
//!
//! - **MalformedInput** — missing/invalid fields, non-base64 payloads,
//!   bad JSON. Client fault, surfaced verbatim, never retried.
//! - **Mismatch** — a handshake field, tier, size, or signature
//!   disagrees with what the gateway derived itself. Client fault,
//!   surfaced with the mismatched field.
//! - **ResourceExhausted** — free allowance depleted or payment
//!   reference already used. Client fault, distinct messages so a UI
//!   can branch (e.g. prompt to pay).
//! - **Infrastructure** — store or chain client unreachable/timeout.
//!   Server fault, surfaced as a generic failure without detail.
//! - **IntegrityFailure** — streamed ciphertext length diverged from
//!   the declared length after upload. Triggers compensating deletion
//!   of the blob; surfaced as client fault.
//!
//! Lower-level components raise typed failures; the verifier and
//! orchestrator translate them into this taxonomy. Nothing swallows a
//! cryptographic or ledger failure.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

use crate::chain::ChainError;
use crate::store::StoreError;

/// Result alias for upload pipeline operations.
pub type UploadResult<T> = std::result::Result<T, UploadError>;

/// Failure taxonomy for the ingestion pipeline.
#[derive(Error, Debug)]
pub enum UploadError {
    /// Missing or syntactically invalid input
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// A field disagrees with the value the gateway derived itself
    #[error("{field} mismatch: {detail}")]
    Mismatch {
        /// Which field disagreed
        field: &'static str,
        /// What disagreed about it
        detail: String,
    },

    /// Monthly free allowance depleted for this identity
    #[error("Free transfer allowance exhausted for {0} this month")]
    AllowanceExhausted(String),

    /// Payment reference has already been consumed
    #[error("Payment reference already used: {0}")]
    ReferenceUsed(String),

    /// Store or chain client failure
    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),

    /// Streamed ciphertext length diverged from the declared length
    #[error("Ciphertext length mismatch: declared {declared}, received {received}")]
    IntegrityFailure {
        /// Length the signed handshake declared
        declared: u64,
        /// Length actually received
        received: u64,
    },
}

impl UploadError {
    /// Stable category slug for clients.
    pub fn category(&self) -> &'static str {
        match self {
            UploadError::Malformed(_) => "malformed-input",
            UploadError::Mismatch { .. } => "mismatch",
            UploadError::AllowanceExhausted(_) | UploadError::ReferenceUsed(_) => {
                "resource-exhausted"
            }
            UploadError::Infrastructure(_) => "infrastructure",
            UploadError::IntegrityFailure { .. } => "integrity-failure",
        }
    }

    /// HTTP status: client-fault categories are 400, infrastructure 500.
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Message safe to show the client. Infrastructure details stay
    /// server-side.
    pub fn public_message(&self) -> String {
        match self {
            UploadError::Infrastructure(_) => "Internal error, try again later".to_string(),
            other => other.to_string(),
        }
    }
}

/// Wire shape for failures.
#[derive(Serialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
    pub category: &'static str,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        if matches!(self, UploadError::Infrastructure(_)) {
            tracing::error!(error = %self, "Upload failed with infrastructure error");
        } else {
            tracing::info!(error = %self, category = self.category(), "Upload rejected");
        }
        let body = ErrorBody {
            ok: false,
            error: self.public_message(),
            category: self.category(),
        };
        (self.status(), Json(body)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<sealdrop_core::Error> for UploadError {
    fn from(err: sealdrop_core::Error) -> Self {
        // Core failures at the gateway boundary are client-supplied
        // data problems: bad envelope JSON, malformed handshake, etc.
        UploadError::Malformed(err.to_string())
    }
}

impl From<StoreError> for UploadError {
    fn from(err: StoreError) -> Self {
        UploadError::Infrastructure(err.to_string())
    }
}

impl From<ChainError> for UploadError {
    fn from(err: ChainError) -> Self {
        UploadError::Infrastructure(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
