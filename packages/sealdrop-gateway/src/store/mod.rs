//! Storage abstractions consumed by the ingestion pipeline.
//!
//! Two independent stores, both treated as external collaborators:
//!
//! - [`ControlPlaneStore`] — namespaced key-value storage for upload
//!   indexes, the used-payment set, the free-allowance ledger, and the
//!   cleanup index.
//! - [`BlobStore`] — content-addressed ciphertext storage, gated by a
//!   recipient-derived access secret.

mod blob;
mod control;

pub use blob::{derive_access_secret, BlobStore, FsBlobStore};
pub use control::{ControlPlaneStore, MemoryStore};

use thiserror::Error;

/// Failures raised by either store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying I/O failed
    #[error("Store I/O error: {0}")]
    Io(String),

    /// Stored data could not be decoded
    #[error("Store corruption: {0}")]
    Corrupted(String),

    /// Access secret did not match
    #[error("Access denied for blob {0}")]
    AccessDenied(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}
