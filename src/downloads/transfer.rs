//! Transfer Protocol, receiver side (spec.md §4.7, §4.8, component C8): the
//! URL-trial dial loop, the streaming pipe from an authenticated peer
//! response into the Package Store, and post-mortem status reconciliation.
//!
//! This is the task each [`crate::downloads::registry::DownloadGuard`] owns
//! per spec.md §9 — the HTTP handler that creates a download only starts
//! this task and returns; every later state transition happens here.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::Request;

use super::registry::DownloadGuard;
use crate::config::{Config, KeyPair};
use crate::error::ErrorCode;
use crate::store::WriteSink;
use crate::transport::{DialError, Dialer, PeerKey};

const RECONCILE_WINDOW: Duration = Duration::from_secs(2);

/// Drives one download from its initial `downloading{0}` state to a
/// terminal one. Spawned by `POST /downloads` immediately after the sink is
/// opened and the initial state is published.
pub async fn run(
    share_id: String,
    guard: DownloadGuard,
    mut sink: WriteSink,
    peer_urls: Vec<String>,
    sender_key: PeerKey,
    dialer: Dialer,
    config: Config,
) {
    let cancel = guard.cancel_token();

    let connected = dial_first_available(&share_id, &peer_urls, sender_key, &dialer, &config.key_pair, &cancel).await;

    let response = match connected {
        Ok(resp) => resp,
        Err(DialOutcome::Cancelled) => {
            sink.abort().await;
            guard.mark_aborted().await;
            return;
        }
        Err(DialOutcome::NoneReachable) => {
            sink.abort().await;
            guard
                .fail(
                    ErrorCode::DownloadError.as_str(),
                    "Could not connect to map share sender",
                )
                .await;
            return;
        }
    };

    if !response.status().is_success() {
        sink.abort().await;
        adopt_error_response(&guard, response).await;
        return;
    }

    match pipe_into_sink(response, &mut sink, &guard, &cancel).await {
        Ok(()) => match sink.commit().await {
            Ok(()) => guard.completed().await,
            Err(err) => guard.fail(err.code.as_str(), err.message).await,
        },
        Err(PipeOutcome::Cancelled) => {
            sink.abort().await;
            guard.mark_aborted().await;
            notify_sender_of_abort(&share_id, &peer_urls, sender_key, &dialer, &config.key_pair).await;
        }
        Err(PipeOutcome::Error) => {
            sink.abort().await;
            reconcile(&share_id, &peer_urls, sender_key, &dialer, &config.key_pair, &guard).await;
        }
    }
}

enum DialOutcome {
    Cancelled,
    NoneReachable,
}

fn empty_get(path: String) -> Option<Request<Full<Bytes>>> {
    Request::builder()
        .method("GET")
        .uri(path)
        .body(Full::new(Bytes::new()))
        .ok()
}

/// Try each `peerUrl` in order; the first one that connects (regardless of
/// HTTP status) wins — spec.md §4.7 step 5. Per-URL dial failures are
/// suppressed until all are exhausted (spec.md §7 "local vs surfaced").
async fn dial_first_available(
    share_id: &str,
    peer_urls: &[String],
    sender_key: PeerKey,
    dialer: &Dialer,
    local: &KeyPair,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<hyper::Response<hyper::body::Incoming>, DialOutcome> {
    for raw_url in peer_urls {
        let Ok(parsed) = url::Url::parse(raw_url) else { continue };
        let Some(request) = empty_get(download_path(&parsed, share_id)) else { continue };
        match dialer.dial(&parsed, sender_key, local, request, cancel).await {
            Ok(resp) => return Ok(resp),
            Err(DialError::Cancelled) => return Err(DialOutcome::Cancelled),
            Err(DialError::Connect(err)) => {
                tracing::debug!(?err, url = %raw_url, "peer url unreachable, trying next candidate");
                continue;
            }
        }
    }
    Err(DialOutcome::NoneReachable)
}

fn download_path(parsed: &url::Url, share_id: &str) -> String {
    if parsed.path().is_empty() || parsed.path() == "/" {
        format!("/mapShares/{share_id}/download")
    } else {
        format!("{}/download", parsed.path())
    }
}

fn status_path(parsed: &url::Url, share_id: &str) -> String {
    if parsed.path().is_empty() {
        format!("/mapShares/{share_id}")
    } else {
        parsed.path().to_string()
    }
}

/// Best-effort notification after a receiver-initiated abort: dial
/// `GET /mapShares/:id` on a peer URL purely to reach the sender. The
/// response is not inspected — merely being observed there consumes the
/// sender's open reconciliation window and reclassifies its share from
/// `downloading` to `aborted` instead of leaving it to expire into
/// `error{DOWNLOAD_ERROR}` at TTL (spec.md §4.6, §8.2).
async fn notify_sender_of_abort(share_id: &str, peer_urls: &[String], sender_key: PeerKey, dialer: &Dialer, local: &KeyPair) {
    let deadline = tokio::time::Instant::now() + RECONCILE_WINDOW;
    let cancel = tokio_util::sync::CancellationToken::new();

    for raw_url in peer_urls {
        let Ok(parsed) = url::Url::parse(raw_url) else { continue };
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Some(request) = empty_get(status_path(&parsed, share_id)) else { continue };
        if tokio::time::timeout(remaining, dialer.dial(&parsed, sender_key, local, request, &cancel))
            .await
            .is_ok_and(|res| res.is_ok())
        {
            return;
        }
    }
}

enum PipeOutcome {
    Cancelled,
    Error,
}

/// Pipe the connected response body into `sink`, advancing
/// `bytesReceived` per chunk (spec.md §4.7 step 6). Rejects further chunks
/// once the download has left `downloading` (e.g. a concurrent abort).
async fn pipe_into_sink(
    response: hyper::Response<hyper::body::Incoming>,
    sink: &mut WriteSink,
    guard: &DownloadGuard,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<(), PipeOutcome> {
    use http_body_util::BodyExt;

    let mut body = response.into_body();
    loop {
        if !guard.is_downloading().await {
            return Err(PipeOutcome::Error);
        }
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Err(PipeOutcome::Cancelled),
            frame = body.frame() => frame,
        };
        match frame {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    if sink.write_all(data).await.is_err() {
                        return Err(PipeOutcome::Error);
                    }
                    guard.advance(data.len() as u64).await;
                }
            }
            Some(Err(_)) => return Err(PipeOutcome::Error),
            None => return Ok(()),
        }
    }
}

/// The first connected response was non-2xx: parse its JSON error body and
/// map the code onto the download's terminal state (spec.md §4.7 step 6,
/// §7 "also pushed into download error").
async fn adopt_error_response(guard: &DownloadGuard, response: hyper::Response<hyper::body::Incoming>) {
    use http_body_util::BodyExt;

    let status = response.status();
    let body = match response.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };
    let parsed: Option<serde_json::Value> = serde_json::from_slice(&body).ok();
    let code = parsed
        .as_ref()
        .and_then(|v| v.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or(ErrorCode::DownloadError.as_str())
        .to_string();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("sender returned HTTP {status}"));

    match code.as_str() {
        "DOWNLOAD_SHARE_CANCELED" => guard.canceled().await,
        _ => guard.fail(&code, message).await,
    }
}

/// A stream error during the pipe: dial `GET /mapShares/:id` on any peer
/// URL with a 2-second overall timeout. If the polled status is `canceled`
/// or `declined`, adopt it; otherwise the download is terminal
/// `error{DOWNLOAD_ERROR}` (spec.md §4.7 step 8).
async fn reconcile(
    share_id: &str,
    peer_urls: &[String],
    sender_key: PeerKey,
    dialer: &Dialer,
    local: &KeyPair,
    guard: &DownloadGuard,
) {
    use http_body_util::BodyExt;

    let deadline = tokio::time::Instant::now() + RECONCILE_WINDOW;
    let cancel = tokio_util::sync::CancellationToken::new();

    for raw_url in peer_urls {
        let Ok(parsed) = url::Url::parse(raw_url) else { continue };
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Some(request) = empty_get(status_path(&parsed, share_id)) else { continue };

        let attempt = tokio::time::timeout(remaining, dialer.dial(&parsed, sender_key, local, request, &cancel)).await;

        let Ok(Ok(response)) = attempt else { continue };
        if !response.status().is_success() {
            continue;
        }
        let Ok(collected) = response.into_body().collect().await else { continue };
        let Ok(share): Result<serde_json::Value, _> = serde_json::from_slice(&collected.to_bytes()) else {
            continue;
        };
        match share.get("status").and_then(|v| v.as_str()) {
            Some("canceled") => {
                guard.canceled().await;
                return;
            }
            Some("declined") => {
                guard.declined().await;
                return;
            }
            _ => continue,
        }
    }

    guard
        .fail(ErrorCode::DownloadError.as_str(), "transfer interrupted")
        .await;
}
