//! Cleanup sweeper.
//!
//! Periodically scans the cleanup index and expires entries whose
//! retention window has passed: the blob is deleted and the entry is
//! marked `deleted` with a timestamp. Entries are never removed from
//! the index; they stay as an audit trail. Malformed entries are
//! skipped and logged, never fatal to the sweep.
//!
//! The sweeper is an owned value with an explicit lifecycle: `run_once`
//! does one pass, `spawn` runs it on an interval and returns a handle
//! whose `shutdown` stops the loop. Nothing is process-global.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::ingest::{CleanupIndexEntry, CleanupState, NS_CLEANUP_INDEX};
use crate::state::GatewayStats;
use crate::store::{BlobStore, ControlPlaneStore};

/// Counts from one sweep, for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Entries examined
    pub processed: usize,
    /// Entries expired in this pass
    pub deleted: usize,
    /// Malformed or already-deleted entries skipped
    pub skipped: usize,
}

/// Scans the cleanup index and soft-deletes expired entries.
pub struct CleanupSweeper {
    control: Arc<dyn ControlPlaneStore>,
    blobs: Arc<dyn BlobStore>,
    stats: Arc<GatewayStats>,
}

impl CleanupSweeper {
    /// Create a sweeper over the given stores.
    pub fn new(
        control: Arc<dyn ControlPlaneStore>,
        blobs: Arc<dyn BlobStore>,
        stats: Arc<GatewayStats>,
    ) -> Self {
        Self {
            control,
            blobs,
            stats,
        }
    }

    /// One pass over the index. Idempotent per entry: already-deleted
    /// entries are skipped.
    pub async fn run_once(&self, now_ms: i64) -> SweepStats {
        let mut stats = SweepStats::default();

        let entries = match self.control.get_all(NS_CLEANUP_INDEX).await {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(error = %e, "Cleanup sweep could not read the index");
                return stats;
            }
        };

        for (key, raw) in entries {
            stats.processed += 1;

            let mut entry: CleanupIndexEntry = match serde_json::from_str(&raw) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping malformed cleanup entry");
                    stats.skipped += 1;
                    continue;
                }
            };

            if entry.state == CleanupState::Deleted || entry.expires_at_ms > now_ms {
                stats.skipped += 1;
                continue;
            }

            // Best-effort blob deletion; the entry flips regardless so
            // the sweep converges even when a blob is already gone.
            if let Err(e) = self.blobs.delete(&entry.content_id).await {
                tracing::warn!(content_id = %entry.content_id, error = %e, "Blob deletion failed during sweep");
            }

            entry.state = CleanupState::Deleted;
            entry.marked_deleted_at_ms = Some(now_ms);

            match serde_json::to_string(&entry) {
                Ok(updated) => {
                    if let Err(e) = self.control.set(NS_CLEANUP_INDEX, &key, updated).await {
                        tracing::error!(key = %key, error = %e, "Failed to write swept cleanup entry");
                        continue;
                    }
                    stats.deleted += 1;
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Failed to encode swept cleanup entry");
                }
            }
        }

        if stats.deleted > 0 {
            tracing::info!(
                processed = stats.processed,
                deleted = stats.deleted,
                "Cleanup sweep expired entries"
            );
        } else {
            tracing::debug!(processed = stats.processed, "Cleanup sweep found nothing to expire");
        }
        self.stats.record_sweep(stats.deleted as u64);

        stats
    }

    /// Run the sweeper on a fixed interval until the returned handle is
    /// shut down.
    pub fn spawn(self, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = sealdrop_core::time::now_timestamp_millis();
                        self.run_once(now).await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        SweeperHandle { shutdown_tx, task }
    }
}

/// Handle to a running sweeper loop.
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FsBlobStore, MemoryStore};

    const DAY_MS: i64 = 24 * 3600 * 1000;

    struct Fixture {
        control: Arc<MemoryStore>,
        blobs: Arc<FsBlobStore>,
        sweeper: CleanupSweeper,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let control = Arc::new(MemoryStore::new(None));
        let blobs = Arc::new(FsBlobStore::new(dir.path().to_str().unwrap()));
        let sweeper = CleanupSweeper::new(
            control.clone(),
            blobs.clone(),
            Arc::new(GatewayStats::default()),
        );
        Fixture {
            control,
            blobs,
            sweeper,
            _dir: dir,
        }
    }

    async fn insert_entry(
        control: &MemoryStore,
        key: &str,
        content_id: &str,
        sent_at_ms: u64,
        expires_at_ms: i64,
    ) {
        let entry = CleanupIndexEntry {
            payment_ref: key.to_string(),
            content_id: content_id.to_string(),
            recipient: "0x2222222222222222222222222222222222222222".to_string(),
            initiator: "0x1111111111111111111111111111111111111111".to_string(),
            sent_at_ms,
            expires_at_ms,
            state: CleanupState::Active,
            marked_deleted_at_ms: None,
        };
        control
            .set(NS_CLEANUP_INDEX, key, serde_json::to_string(&entry).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_entry_swept_recent_left_active() {
        let f = fixture();
        let now = 10 * DAY_MS;

        // Sent eight days ago with a seven-day window: expired
        let old_sent = (now - 8 * DAY_MS) as u64;
        insert_entry(&f.control, "0xold", "blob-old", old_sent, old_sent as i64 + 7 * DAY_MS).await;

        // Sent an hour ago: still active
        let recent_sent = (now - 3600 * 1000) as u64;
        insert_entry(
            &f.control,
            "0xnew",
            "blob-new",
            recent_sent,
            recent_sent as i64 + 7 * DAY_MS,
        )
        .await;

        let stats = f.sweeper.run_once(now).await;
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.skipped, 1);

        let old: CleanupIndexEntry = serde_json::from_str(
            &f.control.get(NS_CLEANUP_INDEX, "0xold").await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(old.state, CleanupState::Deleted);
        assert_eq!(old.marked_deleted_at_ms, Some(now));

        let new: CleanupIndexEntry = serde_json::from_str(
            &f.control.get(NS_CLEANUP_INDEX, "0xnew").await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(new.state, CleanupState::Active);
    }

    #[tokio::test]
    async fn test_sweep_deletes_the_blob() {
        let f = fixture();
        let content_id = f
            .blobs
            .put(b"expiring bytes", "f.bin", "application/octet-stream", "s")
            .await
            .unwrap();
        insert_entry(&f.control, "0xref", &content_id, 0, 1).await;

        f.sweeper.run_once(2).await;
        assert!(f.blobs.get(&content_id, "s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let f = fixture();
        insert_entry(&f.control, "0xref", "blob", 0, 1).await;

        let first = f.sweeper.run_once(2).await;
        assert_eq!(first.deleted, 1);

        // Second pass skips the already-deleted entry
        let second = f.sweeper.run_once(3).await;
        assert_eq!(second.deleted, 0);
        assert_eq!(second.skipped, 1);

        // The original deletion timestamp is preserved
        let entry: CleanupIndexEntry = serde_json::from_str(
            &f.control.get(NS_CLEANUP_INDEX, "0xref").await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(entry.marked_deleted_at_ms, Some(2));
    }

    #[tokio::test]
    async fn test_malformed_entry_skipped_not_fatal() {
        let f = fixture();
        f.control
            .set(NS_CLEANUP_INDEX, "0xbroken", "{not json".to_string())
            .await
            .unwrap();
        insert_entry(&f.control, "0xgood", "blob", 0, 1).await;

        let stats = f.sweeper.run_once(2).await;
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn test_spawned_sweeper_shuts_down() {
        let f = fixture();
        let handle = f.sweeper.spawn(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.shutdown().await;
    }
}
