//! Server state and configuration.
//!
//! One [`GatewayState`] is shared across request handlers and the
//! sweeper. Everything inside is `Arc`-owned; the state itself is
//! cheap to clone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sealdrop_core::tier::TierSchedule;
use serde::Serialize;

use crate::chain::ChainClient;
use crate::ledger::LedgerManager;
use crate::store::{BlobStore, ControlPlaneStore};

/// Default monthly free-transfer allowance per identity.
const DEFAULT_MONTHLY_FREE_LIMIT: u32 = 3;

/// Default retention window in days before stored blobs expire.
const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Default sweep interval in seconds.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Default chain RPC timeout in seconds.
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    /// Data directory for stores. None = in-memory only.
    pub data_dir: Option<String>,
    /// Chain RPC endpoint
    pub rpc_url: String,
    /// The chain transfers must be paid on
    pub chain_id: u64,
    /// Days an accepted blob is retained before the sweeper expires it
    pub retention_days: i64,
    /// Free transfers per identity per month
    pub monthly_free_limit: u32,
    /// Seconds between cleanup sweeps
    pub sweep_interval_secs: u64,
    /// Timeout for chain RPC calls
    pub rpc_timeout_secs: u64,
    /// Salt for deriving blob access secrets from recipient addresses
    pub access_salt: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8090,
            data_dir: None,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 8453,
            retention_days: DEFAULT_RETENTION_DAYS,
            monthly_free_limit: DEFAULT_MONTHLY_FREE_LIMIT,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            access_salt: "sealdrop-dev-salt".to_string(),
        }
    }
}

impl GatewayConfig {
    /// The retention window in milliseconds.
    pub fn retention_window_ms(&self) -> i64 {
        self.retention_days * 24 * 3600 * 1000
    }
}

/// Counters exposed on `/stats`.
#[derive(Default)]
pub struct GatewayStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    sweeps: AtomicU64,
    swept_entries: AtomicU64,
}

/// Snapshot of [`GatewayStats`] for serialization.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub sweeps: u64,
    pub swept_entries: u64,
}

impl GatewayStats {
    /// Count an accepted upload.
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a rejected upload.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a completed sweep and how many entries it expired.
    pub fn record_sweep(&self, deleted: u64) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.swept_entries.fetch_add(deleted, Ordering::Relaxed);
    }

    /// Read all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            swept_entries: self.swept_entries.load(Ordering::Relaxed),
        }
    }
}

/// Shared server state.
#[derive(Clone)]
pub struct GatewayState {
    /// Server configuration
    pub config: Arc<GatewayConfig>,
    /// Control-plane key-value store
    pub control: Arc<dyn ControlPlaneStore>,
    /// Ciphertext blob store
    pub blobs: Arc<dyn BlobStore>,
    /// Chain client for receipts and contract-wallet signatures
    pub chain: Arc<dyn ChainClient>,
    /// Replay-protection and quota ledgers
    pub ledger: Arc<LedgerManager>,
    /// Fee tier schedule
    pub schedule: Arc<TierSchedule>,
    /// Request counters
    pub stats: Arc<GatewayStats>,
}

impl GatewayState {
    /// Assemble the state. The ledger is built over the given control
    /// store with the configured monthly limit.
    pub fn new(
        config: GatewayConfig,
        control: Arc<dyn ControlPlaneStore>,
        blobs: Arc<dyn BlobStore>,
        chain: Arc<dyn ChainClient>,
        schedule: TierSchedule,
    ) -> Self {
        let ledger = Arc::new(LedgerManager::new(control.clone(), config.monthly_free_limit));
        Self {
            config: Arc::new(config),
            control,
            blobs,
            chain,
            ledger,
            schedule: Arc::new(schedule),
            stats: Arc::new(GatewayStats::default()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
