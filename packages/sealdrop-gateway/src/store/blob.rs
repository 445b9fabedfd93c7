//! File-backed blob store for ciphertext payloads.
//!
//! Blobs are stored on disk at `{DATA_DIR}/blobs/{contentId}.bin` with
//! a sidecar `{contentId}.meta.json`. Content ids are the SHA-256 hash
//! of the ciphertext, so the store is content-addressed and effectively
//! immutable once written; deletion is an explicit, separate call.
//! Reads are gated by an access secret derived from the recipient's
//! identity.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::StoreError;

/// Content-addressed blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob. Returns its content id. Storing identical bytes
    /// twice returns the same id (dedup).
    async fn put(
        &self,
        data: &[u8],
        filename: &str,
        content_type: &str,
        access_secret: &str,
    ) -> Result<String, StoreError>;

    /// Fetch a blob. `None` if unknown; `AccessDenied` on a bad secret.
    async fn get(
        &self,
        content_id: &str,
        access_secret: &str,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete a blob. Returns whether anything was removed.
    async fn delete(&self, content_id: &str) -> Result<bool, StoreError>;
}

/// Sidecar metadata for a stored blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobMeta {
    filename: String,
    content_type: String,
    size: u64,
    /// SHA-256 of the access secret; the secret itself is never stored
    access_hash: String,
    stored_at: i64,
}

/// File-backed blob store.
#[derive(Clone)]
pub struct FsBlobStore {
    blobs_dir: PathBuf,
    /// content id → metadata, loaded at startup
    meta: Arc<DashMap<String, BlobMeta>>,
}

impl FsBlobStore {
    /// Create a blob store rooted at `{data_dir}/blobs`.
    pub fn new(data_dir: &str) -> Self {
        Self {
            blobs_dir: PathBuf::from(data_dir).join("blobs"),
            meta: Arc::new(DashMap::new()),
        }
    }

    /// Load sidecar metadata from disk into the cache.
    pub fn load_from_disk(&self) -> usize {
        if !self.blobs_dir.exists() {
            return 0;
        }
        let entries = match std::fs::read_dir(&self.blobs_dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read blobs directory");
                return 0;
            }
        };

        let mut count = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(content_id) = name.strip_suffix(".meta.json") else {
                continue;
            };
            match std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<BlobMeta>(&raw).ok())
            {
                Some(meta) => {
                    self.meta.insert(content_id.to_string(), meta);
                    count += 1;
                }
                None => {
                    tracing::warn!(path = %path.display(), "Skipping unreadable blob sidecar");
                }
            }
        }
        count
    }

    fn blob_path(&self, content_id: &str) -> PathBuf {
        self.blobs_dir.join(format!("{}.bin", content_id))
    }

    fn meta_path(&self, content_id: &str) -> PathBuf {
        self.blobs_dir.join(format!("{}.meta.json", content_id))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        data: &[u8],
        filename: &str,
        content_type: &str,
        access_secret: &str,
    ) -> Result<String, StoreError> {
        let content_id = hex::encode(Sha256::digest(data));

        if self.meta.contains_key(&content_id) {
            return Ok(content_id);
        }

        std::fs::create_dir_all(&self.blobs_dir)?;

        // Atomic write: .tmp then rename
        let path = self.blob_path(&content_id);
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, data)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        let meta = BlobMeta {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size: data.len() as u64,
            access_hash: hex::encode(Sha256::digest(access_secret.as_bytes())),
            stored_at: sealdrop_core::time::now_timestamp_millis(),
        };
        let encoded = serde_json::to_string(&meta)
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;
        std::fs::write(self.meta_path(&content_id), encoded)?;
        self.meta.insert(content_id.clone(), meta);

        tracing::info!(
            content_id = %content_id,
            size = data.len(),
            content_type,
            "Blob stored"
        );

        Ok(content_id)
    }

    async fn get(
        &self,
        content_id: &str,
        access_secret: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(meta) = self.meta.get(content_id) else {
            return Ok(None);
        };
        let expected = hex::encode(Sha256::digest(access_secret.as_bytes()));
        if meta.access_hash != expected {
            return Err(StoreError::AccessDenied(content_id.to_string()));
        }
        drop(meta);

        match std::fs::read(self.blob_path(content_id)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, content_id: &str) -> Result<bool, StoreError> {
        let removed = self.meta.remove(content_id).is_some();
        let _ = std::fs::remove_file(self.blob_path(content_id));
        let _ = std::fs::remove_file(self.meta_path(content_id));
        Ok(removed)
    }
}

/// Derive the access secret gating a recipient's blobs.
///
/// `SHA-256(recipient_address ":" server_salt)`, hex-encoded. The salt
/// keeps the secret unguessable from the (public) recipient address.
pub fn derive_access_secret(recipient: &str, server_salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(recipient.trim().to_lowercase().as_bytes());
    hasher.update(b":");
    hasher.update(server_salt.as_bytes());
    hex::encode(hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
