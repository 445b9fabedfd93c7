//! Replay-protection and quota ledgers.
//!
//! Two independent ledgers on the control-plane store:
//!
//! - **Used payment references** — each reference is consumed at most
//!   once. Reservation happens through the store's atomic
//!   `set_if_absent` before any blob upload begins; the terminal "used"
//!   marker is only written after the transfer is fully accepted, and a
//!   failed upload releases its reservation. The marker is therefore
//!   never set without a corresponding upload record.
//! - **Monthly free allowance** — a per-identity counter that resets
//!   implicitly when the stored month key no longer matches the
//!   current month. The read-modify-write is serialized behind a
//!   guard, so the counter never exceeds the limit after a successful
//!   reservation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{UploadError, UploadResult};
use crate::store::ControlPlaneStore;

/// Namespace for the used-payment-reference set.
pub const NS_USED_REFS: &str = "used-refs";

/// Namespace for the free-allowance ledger.
pub const NS_FREE_USAGE: &str = "free-usage";

/// Per-identity free-transfer usage for one month.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeSendUsageRecord {
    /// "YYYY-MM" month the counter applies to
    pub month_key: String,
    /// Free transfers consumed in that month
    pub used: u32,
    /// Last update, Unix milliseconds
    pub updated_at: i64,
}

/// State of a payment-reference ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceMarker {
    state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_id: Option<String>,
    updated_at: i64,
}

/// The two ledgers behind the ingestion pipeline.
pub struct LedgerManager {
    store: Arc<dyn ControlPlaneStore>,
    monthly_free_limit: u32,
    /// Serializes the allowance read-modify-write
    free_guard: tokio::sync::Mutex<()>,
}

impl LedgerManager {
    /// Create a ledger manager over the given store.
    pub fn new(store: Arc<dyn ControlPlaneStore>, monthly_free_limit: u32) -> Self {
        Self {
            store,
            monthly_free_limit,
            free_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// The "YYYY-MM" key for a point in time.
    pub fn month_key(now: DateTime<Utc>) -> String {
        now.format("%Y-%m").to_string()
    }

    /// Reserve a payment reference for an in-flight upload.
    ///
    /// Atomic: of two concurrent uploads with the same reference,
    /// exactly one succeeds. The loser gets `ReferenceUsed`.
    pub async fn reserve_payment_reference(&self, payment_ref: &str) -> UploadResult<()> {
        let key = payment_ref.trim().to_lowercase();
        let marker = ReferenceMarker {
            state: "pending".to_string(),
            content_id: None,
            updated_at: sealdrop_core::time::now_timestamp_millis(),
        };
        let encoded = serde_json::to_string(&marker)
            .map_err(|e| UploadError::Infrastructure(e.to_string()))?;

        if self.store.set_if_absent(NS_USED_REFS, &key, encoded).await? {
            Ok(())
        } else {
            Err(UploadError::ReferenceUsed(key))
        }
    }

    /// Release a reservation after a failed upload so the reference
    /// can be retried. Best effort; a stuck pending marker only blocks
    /// that one reference.
    pub async fn release_payment_reference(&self, payment_ref: &str) {
        let key = payment_ref.trim().to_lowercase();
        if let Err(e) = self.store.remove(NS_USED_REFS, &key).await {
            tracing::error!(payment_ref = %key, error = %e, "Failed to release payment reference");
        }
    }

    /// Write the terminal "used" marker once the transfer is accepted.
    pub async fn finalize_payment_reference(
        &self,
        payment_ref: &str,
        content_id: &str,
    ) -> UploadResult<()> {
        let key = payment_ref.trim().to_lowercase();
        let marker = ReferenceMarker {
            state: "used".to_string(),
            content_id: Some(content_id.to_string()),
            updated_at: sealdrop_core::time::now_timestamp_millis(),
        };
        let encoded = serde_json::to_string(&marker)
            .map_err(|e| UploadError::Infrastructure(e.to_string()))?;
        self.store.set(NS_USED_REFS, &key, encoded).await?;
        Ok(())
    }

    /// Reserve one unit of an identity's monthly free allowance.
    ///
    /// Resets the counter when the stored month differs from `now`'s
    /// month. The month key comes from the server clock, never from
    /// client-supplied timestamps.
    pub async fn reserve_free_allowance(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> UploadResult<()> {
        let key = identity.trim().to_lowercase();
        let current_month = Self::month_key(now);

        let _guard = self.free_guard.lock().await;

        let mut record = match self.store.get(NS_FREE_USAGE, &key).await? {
            Some(raw) => serde_json::from_str::<FreeSendUsageRecord>(&raw).unwrap_or_else(|_| {
                tracing::warn!(identity = %key, "Resetting unreadable free-usage record");
                FreeSendUsageRecord {
                    month_key: current_month.clone(),
                    used: 0,
                    updated_at: 0,
                }
            }),
            None => FreeSendUsageRecord {
                month_key: current_month.clone(),
                used: 0,
                updated_at: 0,
            },
        };

        if record.month_key != current_month {
            record.month_key = current_month;
            record.used = 0;
        }

        if record.used >= self.monthly_free_limit {
            return Err(UploadError::AllowanceExhausted(key));
        }

        record.used += 1;
        record.updated_at = sealdrop_core::time::now_timestamp_millis();

        let encoded = serde_json::to_string(&record)
            .map_err(|e| UploadError::Infrastructure(e.to_string()))?;
        self.store.set(NS_FREE_USAGE, &key, encoded).await?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn ledger(limit: u32) -> LedgerManager {
        LedgerManager::new(Arc::new(MemoryStore::new(None)), limit)
    }

    #[tokio::test]
    async fn test_reference_reserved_once() {
        let ledger = ledger(3);
        ledger.reserve_payment_reference("0xAAA").await.unwrap();

        let err = ledger.reserve_payment_reference("0xaaa").await.unwrap_err();
        assert!(matches!(err, UploadError::ReferenceUsed(_)));
    }

    #[tokio::test]
    async fn test_release_allows_retry() {
        let ledger = ledger(3);
        ledger.reserve_payment_reference("0xaaa").await.unwrap();
        ledger.release_payment_reference("0xaaa").await;
        ledger.reserve_payment_reference("0xaaa").await.unwrap();
    }

    #[tokio::test]
    async fn test_finalized_reference_stays_used() {
        let ledger = ledger(3);
        ledger.reserve_payment_reference("0xaaa").await.unwrap();
        ledger.finalize_payment_reference("0xaaa", "content-1").await.unwrap();

        let err = ledger.reserve_payment_reference("0xaaa").await.unwrap_err();
        assert!(matches!(err, UploadError::ReferenceUsed(_)));
    }

    #[tokio::test]
    async fn test_allowance_exhaustion() {
        let ledger = ledger(2);
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();

        ledger.reserve_free_allowance("0xUser", now).await.unwrap();
        ledger.reserve_free_allowance("0xuser", now).await.unwrap();

        let err = ledger.reserve_free_allowance("0xuser", now).await.unwrap_err();
        assert!(matches!(err, UploadError::AllowanceExhausted(_)));
    }

    #[tokio::test]
    async fn test_allowance_resets_next_month() {
        let ledger = ledger(1);
        let august = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();
        let september = Utc.with_ymd_and_hms(2026, 9, 1, 0, 5, 0).unwrap();

        ledger.reserve_free_allowance("0xuser", august).await.unwrap();
        assert!(ledger.reserve_free_allowance("0xuser", august).await.is_err());

        // First attempt in a new month succeeds again
        ledger.reserve_free_allowance("0xuser", september).await.unwrap();
    }

    #[tokio::test]
    async fn test_allowance_tracked_per_identity() {
        let ledger = ledger(1);
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();

        ledger.reserve_free_allowance("0xalice", now).await.unwrap();
        ledger.reserve_free_allowance("0xbob", now).await.unwrap();
        assert!(ledger.reserve_free_allowance("0xalice", now).await.is_err());
    }

    #[test]
    fn test_month_key_format() {
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 0, 0, 0).unwrap();
        assert_eq!(LedgerManager::month_key(now), "2026-08");
    }
}
