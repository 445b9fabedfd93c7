//! Transfer API handlers.
//!
//! - `POST /api/transfers/upload` — payment-verified upload
//! - `GET  /api/transfers/:contentId` — download, gated by access secret
//! - `GET  /api/transfers/inbox/:address` — recipient-keyed upload index
//! - `GET  /api/transfers/sent/:address` — initiator-keyed upload index
//! - `GET  /health`, `GET /stats` — service endpoints

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::UploadError;
use crate::ingest::{
    self, UploadOutcome, UploadRequest, NS_UPLOADS_INITIATOR, NS_UPLOADS_RECIPIENT,
};
use crate::state::GatewayState;
use crate::store::BlobStore;

/// Body limit covering the largest tier plus envelope overhead.
const MAX_UPLOAD_BODY_BYTES: usize = 2049 * 1024 * 1024;

/// Uniform success wrapper.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self {
            ok: true,
            data: Some(data),
            error: None,
        })
    }
}

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/transfers/upload", post(upload_transfer))
        .route("/api/transfers/inbox/:address", get(inbox_handler))
        .route("/api/transfers/sent/:address", get(sent_handler))
        .route("/api/transfers/:content_id", get(download_transfer))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(axum::extract::DefaultBodyLimit::max(MAX_UPLOAD_BODY_BYTES))
        .with_state(state)
}

// ── Upload ────────────────────────────────────────────────────────────────────

/// POST /api/transfers/upload
///
/// Multipart form fields:
/// - `recipient`, `initiator`: addresses
/// - `handshake`: the signed canonical message
/// - `signature`: 0x-hex signature over the handshake
/// - `paymentRef`: transaction hash or free-tier reference
/// - `chainId`: chain the payment lives on
/// - `tierId`: tier the client resolved
/// - `originalSize`: optional declared original size
/// - `encryptionMeta`: envelope metadata JSON
/// - `file`: the ciphertext body
///
/// Returns 201 with the upload record and per-step timings, 400 with a
/// category slug for any validation failure, 500 for infrastructure.
async fn upload_transfer(
    State(state): State<GatewayState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<UploadOutcome>>), UploadError> {
    let request = parse_upload_multipart(multipart).await?;

    match ingest::process_upload(&state, request).await {
        Ok(outcome) => {
            state.stats.record_accepted();
            Ok((StatusCode::CREATED, ApiResponse::success(outcome)))
        }
        Err(err) => {
            state.stats.record_rejected();
            Err(err)
        }
    }
}

async fn parse_upload_multipart(mut multipart: Multipart) -> Result<UploadRequest, UploadError> {
    let mut recipient = None;
    let mut initiator = None;
    let mut handshake = None;
    let mut signature = None;
    let mut payment_ref = None;
    let mut chain_id = None;
    let mut tier_id = None;
    let mut original_size = None;
    let mut encryption_meta = None;
    let mut ciphertext = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let bytes = field.bytes().await.map_err(|e| {
                    UploadError::Malformed(format!("Failed to read file body: {}", e))
                })?;
                ciphertext = Some(bytes.to_vec());
            }
            "recipient" => recipient = Some(text_field(field, "recipient").await?),
            "initiator" => initiator = Some(text_field(field, "initiator").await?),
            "handshake" => handshake = Some(text_field(field, "handshake").await?),
            "signature" => signature = Some(text_field(field, "signature").await?),
            "paymentRef" => payment_ref = Some(text_field(field, "paymentRef").await?),
            "chainId" => {
                let raw = text_field(field, "chainId").await?;
                chain_id = Some(raw.trim().parse::<u64>().map_err(|_| {
                    UploadError::Malformed(format!("chainId is not a number: {}", raw))
                })?);
            }
            "tierId" => tier_id = Some(text_field(field, "tierId").await?),
            "originalSize" => {
                let raw = text_field(field, "originalSize").await?;
                if !raw.trim().is_empty() {
                    original_size = Some(raw.trim().parse::<u64>().map_err(|_| {
                        UploadError::Malformed(format!("originalSize is not a number: {}", raw))
                    })?);
                }
            }
            "encryptionMeta" => encryption_meta = Some(text_field(field, "encryptionMeta").await?),
            _ => {
                // Unknown fields are ignored
            }
        }
    }

    Ok(UploadRequest {
        recipient: required(recipient, "recipient")?,
        initiator: required(initiator, "initiator")?,
        handshake: required(handshake, "handshake")?,
        signature: required(signature, "signature")?,
        payment_ref: required(payment_ref, "paymentRef")?,
        chain_id: required(chain_id, "chainId")?,
        tier_id: required(tier_id, "tierId")?,
        original_size,
        encryption_meta: required(encryption_meta, "encryptionMeta")?,
        ciphertext: required(ciphertext, "file")?,
    })
}

async fn text_field(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<String, UploadError> {
    field
        .text()
        .await
        .map_err(|e| UploadError::Malformed(format!("Failed to read field '{}': {}", name, e)))
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, UploadError> {
    value.ok_or_else(|| UploadError::Malformed(format!("Missing field '{}'", name)))
}

// ── Download ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DownloadQuery {
    secret: Option<String>,
}

/// GET /api/transfers/:contentId?secret=…
///
/// Streams the ciphertext blob. 403 on a bad access secret, 404 when
/// the content id is unknown.
async fn download_transfer(
    State(state): State<GatewayState>,
    Path(content_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> impl IntoResponse {
    let secret = query.secret.unwrap_or_default();

    match state.blobs.get(&content_id, &secret).await {
        Ok(Some(data)) => {
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                "application/octet-stream".parse().unwrap(),
            );
            // Content-addressed: the bytes behind an id never change
            headers.insert(
                header::CACHE_CONTROL,
                "private, max-age=31536000, immutable".parse().unwrap(),
            );
            (StatusCode::OK, headers, Body::from(data)).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(crate::store::StoreError::AccessDenied(_)) => StatusCode::FORBIDDEN.into_response(),
        Err(e) => {
            tracing::error!(content_id = %content_id, error = %e, "Blob read failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ── Indexes ───────────────────────────────────────────────────────────────────

/// GET /api/transfers/inbox/:address
async fn inbox_handler(
    State(state): State<GatewayState>,
    Path(address): Path<String>,
) -> Result<Json<ApiResponse<Vec<ingest::UploadRecord>>>, UploadError> {
    let records = ingest::list_uploads(&state, NS_UPLOADS_RECIPIENT, &address).await?;
    Ok(ApiResponse::success(records))
}

/// GET /api/transfers/sent/:address
async fn sent_handler(
    State(state): State<GatewayState>,
    Path(address): Path<String>,
) -> Result<Json<ApiResponse<Vec<ingest::UploadRecord>>>, UploadError> {
    let records = ingest::list_uploads(&state, NS_UPLOADS_INITIATOR, &address).await?;
    Ok(ApiResponse::success(records))
}

// ── Service ───────────────────────────────────────────────────────────────────

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "sealdrop-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let snapshot = state.stats.snapshot();
    Json(json!({
        "accepted": snapshot.accepted,
        "rejected": snapshot.rejected,
        "sweeps": snapshot.sweeps,
        "sweptEntries": snapshot.swept_entries,
        "chainId": state.config.chain_id,
        "tiers": state.schedule.tiers(),
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_json_structure() {
        let json_val = json!({
            "status": "ok",
            "service": "sealdrop-gateway",
            "version": env!("CARGO_PKG_VERSION"),
        });
        assert_eq!(json_val["status"], "ok");
        assert_eq!(json_val["service"], "sealdrop-gateway");
    }

    #[test]
    fn test_required_field_error_names_field() {
        let err = required::<String>(None, "paymentRef").unwrap_err();
        assert!(err.to_string().contains("paymentRef"));
    }
}
