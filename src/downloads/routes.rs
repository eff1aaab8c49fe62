//! Download Registry HTTP surface (spec.md §4.7): loopback-only routes for
//! the receiver's own UI. All routes here are loopback-only (spec.md §4.4).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::model::Download;
use crate::app::AppState;
use crate::auth;
use crate::error::{self, AppError};
use crate::store::PackageSlot;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_download).get(list_downloads))
        .route("/:id", get(get_download))
        .route("/:id/events", get(download_events))
        .route("/:id/abort", post(abort_download))
        .layer(axum::middleware::from_fn(auth::require_loopback))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDownloadRequest {
    share_id: String,
    sender_device_id: String,
    peer_urls: Vec<String>,
    #[serde(default)]
    estimated_size_bytes: u64,
}

/// `POST /downloads` (spec.md §4.7 steps 1-5): validates the offer,
/// opens the `custom` slot's write sink, publishes the initial
/// `downloading{0}` state, and spawns the task that drives the transfer
/// (dial loop, pipe, reconciliation) to completion.
async fn create_download(
    State(state): State<AppState>,
    Json(body): Json<CreateDownloadRequest>,
) -> Result<Json<Download>, AppError> {
    if body.share_id.trim().is_empty() || body.peer_urls.is_empty() {
        return Err(error::invalid_request("shareId and peerUrls are required"));
    }
    let sender_key = crate::zbase32::decode_key(&body.sender_device_id)
        .map_err(|_| error::invalid_sender_device_id("senderDeviceId must decode to exactly 32 bytes"))?;

    let sink = state.store.open_write(PackageSlot::Custom).await?;

    let download_id = crate::idgen::new_id();
    let created_at_ms = crate::idgen::now_ms();
    let (download, guard) = state
        .downloads
        .create(
            download_id,
            body.share_id.clone(),
            sender_key,
            body.peer_urls.clone(),
            body.estimated_size_bytes,
            created_at_ms,
        )
        .await;

    tokio::spawn(super::transfer::run(
        body.share_id,
        guard,
        sink,
        body.peer_urls,
        sender_key,
        state.dialer.clone(),
        state.config.clone(),
    ));

    Ok(Json(download))
}

async fn list_downloads(State(state): State<AppState>) -> Json<Vec<Download>> {
    Json(state.downloads.list().await)
}

async fn get_download(State(state): State<AppState>, Path(download_id): Path<String>) -> Result<Json<Download>, AppError> {
    Ok(Json(state.downloads.get(&download_id).await?))
}

async fn download_events(State(state): State<AppState>, Path(download_id): Path<String>) -> Result<Response, AppError> {
    let sub = state.downloads.subscribe(&download_id).await?;
    Ok(Sse::new(crate::bus::sse_stream(sub))
        .keep_alive(KeepAlive::default())
        .into_response())
}

async fn abort_download(State(state): State<AppState>, Path(download_id): Path<String>) -> Result<StatusCode, AppError> {
    state.downloads.abort(&download_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
