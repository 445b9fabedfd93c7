//! Sealdrop Gateway
//!
//! The ingestion server for Sealdrop encrypted transfers:
//!
//! 1. **Payment-verified uploads**: a transfer is accepted only after
//!    its handshake message, signature, and on-chain fee burn (or free
//!    allotment) all check out, and its payment reference has never
//!    been consumed before.
//!
//! 2. **Gated downloads**: stored ciphertext is content-addressed and
//!    served only with the recipient-derived access secret.
//!
//! 3. **Time-boxed retention**: every accepted blob gets a cleanup
//!    index entry; a background sweeper expires blobs past the
//!    retention window.
//!
//! **Privacy**: the gateway never sees plaintext content. Envelopes are
//! sealed client-side; the gateway stores opaque ciphertext and the
//! metadata needed to verify payment, nothing more.

mod api;
mod chain;
mod error;
mod ingest;
mod ledger;
mod payment;
mod state;
mod store;
mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use chain::rpc::RpcChainClient;
use sealdrop_core::tier::TierSchedule;
use state::{GatewayConfig, GatewayState};
use store::{FsBlobStore, MemoryStore};
use sweeper::CleanupSweeper;

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sealdrop-gateway", version, about = "Sealdrop ingestion gateway")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8090, env = "GATEWAY_PORT")]
    port: u16,

    /// Data directory for blob and control-plane storage
    #[arg(long, env = "GATEWAY_DATA_DIR")]
    data_dir: Option<String>,

    /// Chain RPC endpoint for receipts and contract-wallet checks
    #[arg(long, default_value = "http://127.0.0.1:8545", env = "GATEWAY_RPC_URL")]
    rpc_url: String,

    /// Chain id transfers must be paid on
    #[arg(long, default_value_t = 8453, env = "GATEWAY_CHAIN_ID")]
    chain_id: u64,

    /// Retention window in days before stored blobs expire
    #[arg(long, default_value_t = 7, env = "GATEWAY_RETENTION_DAYS")]
    retention_days: i64,

    /// Free transfers per identity per month
    #[arg(long, default_value_t = 3, env = "GATEWAY_MONTHLY_FREE_LIMIT")]
    monthly_free_limit: u32,

    /// Cleanup sweep interval in seconds
    #[arg(long, default_value_t = 300, env = "GATEWAY_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: u64,

    /// Chain RPC timeout in seconds
    #[arg(long, default_value_t = 10, env = "GATEWAY_RPC_TIMEOUT_SECS")]
    rpc_timeout_secs: u64,

    /// Salt for deriving blob access secrets
    #[arg(long, default_value = "sealdrop-dev-salt", env = "GATEWAY_ACCESS_SALT")]
    access_salt: String,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sealdrop_gateway=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = GatewayConfig {
        port: args.port,
        data_dir: args.data_dir.clone(),
        rpc_url: args.rpc_url,
        chain_id: args.chain_id,
        retention_days: args.retention_days,
        monthly_free_limit: args.monthly_free_limit,
        sweep_interval_secs: args.sweep_interval_secs,
        rpc_timeout_secs: args.rpc_timeout_secs,
        access_salt: args.access_salt,
    };

    // ── Stores ────────────────────────────────────────────────────────

    let control = Arc::new(MemoryStore::new(config.data_dir.as_deref()));
    let loaded = control.load_from_disk();
    if loaded > 0 {
        tracing::info!(entries = loaded, "Loaded control-plane entries from disk");
    }

    let data_dir = config.data_dir.clone().unwrap_or_else(|| ".".to_string());
    let blobs = Arc::new(FsBlobStore::new(&data_dir));
    let blob_count = blobs.load_from_disk();
    if blob_count > 0 {
        tracing::info!(blobs = blob_count, "Loaded blob metadata from disk");
    }

    // ── Chain Client ──────────────────────────────────────────────────

    let chain = match RpcChainClient::new(
        &config.rpc_url,
        Duration::from_secs(config.rpc_timeout_secs),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build chain client");
            std::process::exit(1);
        }
    };

    tracing::info!(
        rpc_url = %config.rpc_url,
        chain_id = config.chain_id,
        "Chain client configured"
    );

    let state = GatewayState::new(
        config.clone(),
        control,
        blobs,
        chain,
        TierSchedule::default(),
    );

    // ── Cleanup Sweeper ───────────────────────────────────────────────

    let sweeper = CleanupSweeper::new(
        state.control.clone(),
        state.blobs.clone(),
        state.stats.clone(),
    );
    let sweeper_handle = sweeper.spawn(Duration::from_secs(config.sweep_interval_secs));

    // ── Router ────────────────────────────────────────────────────────

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = api::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Sealdrop gateway starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    sweeper_handle.shutdown().await;
    tracing::info!("Sealdrop gateway stopped");
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
