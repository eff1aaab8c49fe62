//! Download Registry (spec.md §4.7, component C7): lifecycle of active
//! downloads, TTL eviction, the receiver-side state machine. The URL-trial
//! and streaming-write protocol itself lives in [`super::transfer`]; this
//! module only owns entity state and the cancel token each transfer task is
//! wired to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::model::{Download, DownloadStatus};
use crate::bus::Bus;
use crate::error::{self, AppError};
use crate::transport::PeerKey;

const TTL: Duration = Duration::from_secs(15 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct DownloadEntry {
    bus: Bus<Download>,
    cancel: CancellationToken,
    created_at: Instant,
}

#[derive(Clone)]
pub struct DownloadRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<DownloadEntry>>>>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        let inner = Arc::new(Mutex::new(HashMap::new()));
        spawn_sweeper(inner.clone());
        Self { inner }
    }

    async fn entry(&self, download_id: &str) -> Result<Arc<DownloadEntry>, AppError> {
        self.inner
            .lock()
            .await
            .get(download_id)
            .cloned()
            .ok_or_else(|| error::download_not_found(format!("no such download {download_id}")))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        download_id: String,
        share_id: String,
        sender_key: PeerKey,
        peer_urls: Vec<String>,
        estimated_size_bytes: u64,
        created_at_ms: u64,
    ) -> (Download, DownloadGuard) {
        let download = Download {
            download_id: download_id.clone(),
            share_id,
            sender_key,
            peer_urls,
            estimated_size_bytes,
            created_at_ms,
            status: DownloadStatus::Downloading { bytes_received: 0 },
        };
        let entry = Arc::new(DownloadEntry {
            bus: Bus::new(download.clone()),
            cancel: CancellationToken::new(),
            created_at: Instant::now(),
        });
        self.inner.lock().await.insert(download_id, entry.clone());
        (download, DownloadGuard { entry })
    }

    pub async fn get(&self, download_id: &str) -> Result<Download, AppError> {
        Ok(self.entry(download_id).await?.bus.snapshot().await)
    }

    pub async fn list(&self) -> Vec<Download> {
        let map = self.inner.lock().await.clone();
        let mut out = Vec::with_capacity(map.len());
        for entry in map.values() {
            out.push(entry.bus.snapshot().await);
        }
        out
    }

    pub async fn subscribe(&self, download_id: &str) -> Result<crate::bus::Subscriber<Download>, AppError> {
        Ok(self.entry(download_id).await?.bus.subscribe().await)
    }

    /// `POST /downloads/:id/abort` — permitted only from `downloading`.
    pub async fn abort(&self, download_id: &str) -> Result<Download, AppError> {
        let entry = self.entry(download_id).await?;
        let result = entry
            .bus
            .try_update(|current| match &current.status {
                DownloadStatus::Downloading { .. } => {
                    let mut next = current.clone();
                    next.status = DownloadStatus::Aborted;
                    Ok(next)
                }
                _ => Err(error::abort_not_downloading("download is not in progress")),
            })
            .await?;
        entry.cancel.cancel();
        Ok(result)
    }
}

impl Default for DownloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_sweeper(inner: Arc<Mutex<HashMap<String, Arc<DownloadEntry>>>>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let mut map = inner.lock().await;
            map.retain(|_, entry| entry.created_at.elapsed() < TTL);
        }
    });
}

/// Handle to a download's entity state, owned by the transfer task driving
/// it (spec.md §9: each Download owns the task and a cancel token; the HTTP
/// layer only publishes into the state machine).
#[derive(Clone)]
pub struct DownloadGuard {
    entry: Arc<DownloadEntry>,
}

impl DownloadGuard {
    pub fn cancel_token(&self) -> CancellationToken {
        self.entry.cancel.clone()
    }

    pub async fn advance(&self, delta: u64) {
        let _ = self
            .entry
            .bus
            .try_update(|current| match &current.status {
                DownloadStatus::Downloading { bytes_received } => {
                    let mut next = current.clone();
                    next.status = DownloadStatus::Downloading {
                        bytes_received: bytes_received + delta,
                    };
                    Ok(next)
                }
                _ => Err(()),
            })
            .await;
    }

    pub async fn completed(&self) {
        let _ = self
            .entry
            .bus
            .try_update(|current| match &current.status {
                DownloadStatus::Downloading { .. } => {
                    let mut next = current.clone();
                    next.status = DownloadStatus::Completed;
                    Ok(next)
                }
                _ => Err(()),
            })
            .await;
    }

    /// Sender cancelled, observed via reconciliation (spec.md §4.7).
    pub async fn canceled(&self) {
        let _ = self
            .entry
            .bus
            .try_update(|current| match &current.status {
                DownloadStatus::Downloading { .. } => {
                    let mut next = current.clone();
                    next.status = DownloadStatus::Canceled;
                    Ok(next)
                }
                _ => Err(()),
            })
            .await;
    }

    /// Share was declined; cannot start, or reconciled after the fact.
    pub async fn declined(&self) {
        let _ = self
            .entry
            .bus
            .try_update(|current| -> Result<Download, ()> {
                let mut next = current.clone();
                next.status = DownloadStatus::Declined;
                Ok(next)
            })
            .await;
    }

    /// `AbortError` from a dial propagates as `aborted` directly, without
    /// going through [`DownloadRegistry::abort`] (spec.md §4.7 step 5).
    pub async fn mark_aborted(&self) {
        let _ = self
            .entry
            .bus
            .try_update(|current| -> Result<Download, ()> {
                let mut next = current.clone();
                next.status = DownloadStatus::Aborted;
                Ok(next)
            })
            .await;
    }

    pub async fn fail(&self, code: &str, message: impl Into<String>) {
        let code = code.to_string();
        let message = message.into();
        let _ = self
            .entry
            .bus
            .try_update(|current| -> Result<Download, ()> {
                let mut next = current.clone();
                next.status = DownloadStatus::Error {
                    code: code.clone(),
                    message: message.clone(),
                };
                Ok(next)
            })
            .await;
    }

    pub async fn is_downloading(&self) -> bool {
        matches!(
            self.entry.bus.snapshot().await.status,
            DownloadStatus::Downloading { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn abort_from_downloading_is_terminal() {
        let registry = DownloadRegistry::new();
        let (download, _guard) = registry
            .create("d1".into(), "s1".into(), [1u8; 32], vec![], 1024, 0)
            .await;
        registry.abort(&download.download_id).await.unwrap();
        let got = registry.get(&download.download_id).await.unwrap();
        assert_eq!(got.status, DownloadStatus::Aborted);
    }

    #[tokio::test]
    async fn abort_from_terminal_state_is_rejected() {
        let registry = DownloadRegistry::new();
        let (download, _guard) = registry
            .create("d2".into(), "s1".into(), [1u8; 32], vec![], 1024, 0)
            .await;
        registry.abort(&download.download_id).await.unwrap();
        let err = registry.abort(&download.download_id).await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::AbortNotDownloading);
    }

    #[tokio::test]
    async fn advance_is_monotonic_and_visible_via_snapshot() {
        let registry = DownloadRegistry::new();
        let (download, guard) = registry
            .create("d3".into(), "s1".into(), [1u8; 32], vec![], 1024, 0)
            .await;
        guard.advance(100).await;
        guard.advance(50).await;
        let got = registry.get(&download.download_id).await.unwrap();
        assert_eq!(got.status, DownloadStatus::Downloading { bytes_received: 150 });
    }
}
