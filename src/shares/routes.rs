//! Share Registry HTTP surface (spec.md §4.6, §4.8): sender-side loopback
//! routes plus the peer-facing Transfer Protocol (component C8).

use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::Full;
use hyper::Request;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::model::Share;
use super::registry::DownloadGuard;
use crate::app::AppState;
use crate::auth;
use crate::error::{self, AppError};
use crate::origin::RequestOrigin;
use crate::store::{ByteStream, PackageSlot};
use crate::transport::{PeerIdentity, PeerKey};

pub fn router() -> Router<AppState> {
    let loopback_only = Router::new()
        .route("/", post(create_share).get(list_shares))
        .route("/:id/cancel", post(cancel_share))
        .route("/:id/events", get(share_events))
        .layer(axum::middleware::from_fn(auth::require_loopback));

    let dual = Router::new()
        .route("/:id", get(get_share))
        .route("/:id/decline", post(decline_share))
        .route("/:id/download", get(peer_download));

    loopback_only.merge(dual)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateShareRequest {
    slot_id: String,
    receiver_device_id: String,
}

async fn create_share(State(state): State<AppState>, Json(body): Json<CreateShareRequest>) -> Result<Json<Share>, AppError> {
    let slot = body
        .slot_id
        .parse::<PackageSlot>()
        .map_err(|_| error::invalid_request(format!("unknown slotId {:?}", body.slot_id)))?;
    let receiver_key = crate::zbase32::decode_key(&body.receiver_device_id)
        .map_err(|_| error::invalid_request("invalid receiverDeviceId"))?;
    let map_info = state.store.get_info(slot).await?;

    let share_id = crate::idgen::new_id();
    let peer_urls = state.peer_urls_for(&share_id);
    let created_at_ms = crate::idgen::now_ms();
    let share = state
        .shares
        .create(share_id, slot, map_info, receiver_key, peer_urls, created_at_ms)
        .await;
    Ok(Json(share))
}

async fn list_shares(State(state): State<AppState>) -> Json<Vec<Share>> {
    Json(state.shares.list().await)
}

async fn cancel_share(State(state): State<AppState>, Path(share_id): Path<String>) -> Result<StatusCode, AppError> {
    state.shares.cancel(&share_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn share_events(State(state): State<AppState>, Path(share_id): Path<String>) -> Result<Response, AppError> {
    let sub = state.shares.subscribe(&share_id).await?;
    Ok(Sse::new(crate::bus::sse_stream(sub))
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// `GET /mapShares/:id` — loopback introspection for the sender's own UI;
/// peer-facing receiver view when authenticated, and doubles as the abort
/// reconciliation status poll in that case (spec.md §4.6).
async fn get_share(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
    Extension(origin): Extension<RequestOrigin>,
    identity: Option<Extension<PeerIdentity>>,
) -> Result<Json<Share>, AppError> {
    if origin == RequestOrigin::Peer {
        let share = state.shares.get(&share_id).await?;
        let identity_ref = identity.as_ref().map(|ext| &ext.0);
        auth::require_peer_key(identity_ref, &share.receiver_key)?;
        let share = state.shares.observe_status_poll(&share_id).await?;
        return Ok(Json(share));
    }
    Ok(Json(state.shares.get(&share_id).await?))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DeclineRequest {
    reason: Option<String>,
    /// Only used for the receiver-side loopback fan-out variant of this
    /// route, where the caller supplies the offer it wants to decline.
    peer_urls: Option<Vec<String>>,
    sender_device_id: Option<String>,
}

/// `POST /mapShares/:id/decline` — on the sender's peer listener, declines
/// the local share. On the receiver's loopback listener, fans the decline
/// out to every `peerUrls` candidate in the offer, because the sender owns
/// share state (spec.md §4.8).
async fn decline_share(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
    Extension(origin): Extension<RequestOrigin>,
    identity: Option<Extension<PeerIdentity>>,
    Json(body): Json<DeclineRequest>,
) -> Result<StatusCode, AppError> {
    match origin {
        RequestOrigin::Peer => {
            let share = state.shares.get(&share_id).await?;
            let identity_ref = identity.as_ref().map(|ext| &ext.0);
            auth::require_peer_key(identity_ref, &share.receiver_key)?;
            state
                .shares
                .decline(&share_id, body.reason.unwrap_or_else(|| "user_rejected".to_string()))
                .await?;
            Ok(StatusCode::NO_CONTENT)
        }
        RequestOrigin::Loopback => {
            let peer_urls = body
                .peer_urls
                .filter(|urls| !urls.is_empty())
                .ok_or_else(|| error::invalid_request("peerUrls is required"))?;
            let sender_device_id = body
                .sender_device_id
                .ok_or_else(|| error::invalid_request("senderDeviceId is required"))?;
            let sender_key = crate::zbase32::decode_key(&sender_device_id)
                .map_err(|_| error::invalid_request("invalid senderDeviceId"))?;
            fan_out_decline(&state, &share_id, sender_key, &peer_urls, body.reason).await
        }
    }
}

async fn fan_out_decline(
    state: &AppState,
    share_id: &str,
    sender_key: PeerKey,
    peer_urls: &[String],
    reason: Option<String>,
) -> Result<StatusCode, AppError> {
    let reason = reason.unwrap_or_else(|| "user_rejected".to_string());
    let payload = serde_json::to_vec(&serde_json::json!({ "reason": reason })).expect("json encoding cannot fail");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let cancel = CancellationToken::new();

    for raw_url in peer_urls {
        let Ok(parsed) = url::Url::parse(raw_url) else { continue };
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        let path = if parsed.path().is_empty() {
            format!("/mapShares/{share_id}/decline")
        } else {
            format!("{}/decline", parsed.path())
        };
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(payload.clone())))
            .expect("request builder invariants upheld");

        let attempt = tokio::time::timeout(
            remaining,
            state.dialer.dial(&parsed, sender_key, &state.config.key_pair, request, &cancel),
        )
        .await;

        match attempt {
            Ok(Ok(resp)) if resp.status().is_success() => return Ok(StatusCode::NO_CONTENT),
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => continue,
        }
    }
    Err(error::decline_cannot_connect("could not reach map share sender to relay decline"))
}

/// `GET /mapShares/:id/download` — streams package bytes from the slot the
/// share was created against. Instruments the stream to advance
/// `downloading.bytesSent`, resolve to `completed` at EOS, or start the
/// abort-reconciliation window on a transport error (spec.md §4.8).
async fn peer_download(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
    Extension(origin): Extension<RequestOrigin>,
    identity: Option<Extension<PeerIdentity>>,
) -> Result<Response, AppError> {
    if origin != RequestOrigin::Peer {
        return Err(error::forbidden("peer routes do not admit loopback requests"));
    }

    let share = state.shares.get(&share_id).await?;
    let identity_ref = identity.as_ref().map(|ext| &ext.0);
    auth::require_peer_key(identity_ref, &share.receiver_key)?;

    let guard = state.shares.begin_download(&share_id).await?;
    let (byte_stream, size) = match state.store.open_read(share.slot_id).await {
        Ok(pair) => pair,
        Err(err) => {
            guard.fail(&err).await;
            return Err(err);
        }
    };

    let cancel = guard.cancel_token();
    let body = Body::from_stream(instrument_stream(byte_stream, guard, cancel));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.smp+zip")
        .header(header::CONTENT_LENGTH, size)
        .body(body)
        .map_err(|err| AppError::from(anyhow::anyhow!(err.to_string())))
}

/// Arms [`DownloadGuard::mark_disconnected`] for when this stream's
/// generator is dropped without reaching a terminal `yield` — the only
/// observable signal of a receiver hanging up mid-transfer, since axum
/// drops the body stream rather than running it to a `None`/`Err` when the
/// client's connection closes (spec.md §4.6).
struct DisconnectGuard {
    guard: DownloadGuard,
    armed: bool,
}

impl DisconnectGuard {
    fn new(guard: DownloadGuard) -> Self {
        Self { guard, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.armed {
            let guard = self.guard.clone();
            tokio::spawn(async move {
                guard.mark_disconnected().await;
            });
        }
    }
}

fn instrument_stream(
    mut inner: ByteStream,
    guard: DownloadGuard,
    cancel: CancellationToken,
) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> {
    async_stream::stream! {
        let mut disconnect = DisconnectGuard::new(guard.clone());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    disconnect.disarm();
                    break;
                }
                chunk = inner.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            guard.advance(bytes.len() as u64).await;
                            yield Ok(bytes);
                        }
                        Some(Err(err)) => {
                            disconnect.disarm();
                            guard.mark_disconnected().await;
                            yield Err(err);
                            break;
                        }
                        None => {
                            disconnect.disarm();
                            guard.complete().await;
                            break;
                        }
                    }
                }
            }
        }
    }
}
