//! Share Registry (spec.md §4.6, component C6): lifecycle of outgoing share
//! offers, TTL eviction, the sender-side state machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::model::{Share, ShareStatus};
use crate::bus::Bus;
use crate::error::{self, AppError};
use crate::store::{MapInfo, PackageSlot};
use crate::transport::PeerKey;

const TTL: Duration = Duration::from_secs(15 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const RECONCILE_WINDOW: Duration = Duration::from_secs(2);

struct ShareEntry {
    bus: Bus<Share>,
    cancel: CancellationToken,
    /// Set while the sender is waiting to see whether a dropped transport
    /// is a receiver abort (peer reconnects with a status poll) or a dead
    /// connection (poll window expires) — spec.md §4.6, §9 open question (a).
    reconcile_pending: AtomicBool,
    created_at: Instant,
}

#[derive(Clone)]
pub struct ShareRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<ShareEntry>>>>,
}

impl ShareRegistry {
    pub fn new() -> Self {
        let inner = Arc::new(Mutex::new(HashMap::new()));
        spawn_sweeper(inner.clone());
        Self { inner }
    }

    async fn entry(&self, share_id: &str) -> Result<Arc<ShareEntry>, AppError> {
        self.inner
            .lock()
            .await
            .get(share_id)
            .cloned()
            .ok_or_else(|| error::map_share_not_found(format!("no such share {share_id}")))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        share_id: String,
        slot_id: PackageSlot,
        map_info: MapInfo,
        receiver_key: PeerKey,
        peer_urls: Vec<String>,
        created_at_ms: u64,
    ) -> Share {
        let share = Share {
            share_id: share_id.clone(),
            slot_id,
            map_info,
            receiver_key,
            peer_urls,
            created_at_ms,
            status: ShareStatus::Pending,
        };
        let entry = Arc::new(ShareEntry {
            bus: Bus::new(share.clone()),
            cancel: CancellationToken::new(),
            reconcile_pending: AtomicBool::new(false),
            created_at: Instant::now(),
        });
        self.inner.lock().await.insert(share_id, entry);
        share
    }

    pub async fn get(&self, share_id: &str) -> Result<Share, AppError> {
        Ok(self.entry(share_id).await?.bus.snapshot().await)
    }

    pub async fn list(&self) -> Vec<Share> {
        let map = self.inner.lock().await.clone();
        let mut out = Vec::with_capacity(map.len());
        for entry in map.values() {
            out.push(entry.bus.snapshot().await);
        }
        out
    }

    pub async fn subscribe(&self, share_id: &str) -> Result<crate::bus::Subscriber<Share>, AppError> {
        Ok(self.entry(share_id).await?.bus.subscribe().await)
    }

    /// `POST /mapShares/:id/cancel` — valid from `pending` and `downloading`.
    pub async fn cancel(&self, share_id: &str) -> Result<Share, AppError> {
        let entry = self.entry(share_id).await?;
        let result = entry
            .bus
            .try_update(|current| match &current.status {
                ShareStatus::Pending | ShareStatus::Downloading { .. } => {
                    let mut next = current.clone();
                    next.status = ShareStatus::Canceled;
                    Ok(next)
                }
                _ => Err(error::cancel_share_not_cancelable("share is not pending or downloading")),
            })
            .await?;
        entry.cancel.cancel();
        Ok(result)
    }

    /// Peer decline — only valid from `pending`.
    pub async fn decline(&self, share_id: &str, reason: String) -> Result<Share, AppError> {
        let entry = self.entry(share_id).await?;
        entry
            .bus
            .try_update(|current| match &current.status {
                ShareStatus::Pending => {
                    let mut next = current.clone();
                    next.status = ShareStatus::Declined { reason: reason.clone() };
                    Ok(next)
                }
                _ => Err(error::decline_share_not_pending("share is not pending")),
            })
            .await
    }

    /// Transitions `pending → downloading{0}` atomically under the share's
    /// lock, enforcing at-most-one active transfer (spec.md §5). The caller
    /// is responsible for the peer-key check before calling this.
    pub async fn begin_download(&self, share_id: &str) -> Result<DownloadGuard, AppError> {
        let entry = self.entry(share_id).await?;
        entry
            .bus
            .try_update(|current| match &current.status {
                ShareStatus::Pending => {
                    let mut next = current.clone();
                    next.status = ShareStatus::Downloading { bytes_sent: 0 };
                    Ok(next)
                }
                ShareStatus::Declined { .. } => Err(error::download_share_declined("share was declined")),
                ShareStatus::Canceled => Err(error::download_share_canceled("share was canceled")),
                _ => Err(error::download_share_not_pending("a download is already in progress or share is terminal")),
            })
            .await?;
        Ok(DownloadGuard { entry })
    }

    /// Called from the peer-facing `GET /mapShares/:id` handler: this GET
    /// doubles as the abort-reconciliation status poll. If a reconciliation
    /// window is open, consuming it here means the receiver is still alive
    /// and polling, i.e. it aborted rather than merely dropping the
    /// connection — spec.md §4.6.
    pub async fn observe_status_poll(&self, share_id: &str) -> Result<Share, AppError> {
        let entry = self.entry(share_id).await?;
        if entry.reconcile_pending.swap(false, Ordering::SeqCst) {
            let result: Result<Share, std::convert::Infallible> = entry
                .bus
                .try_update(|current| {
                    let mut next = current.clone();
                    if matches!(current.status, ShareStatus::Downloading { .. }) {
                        next.status = ShareStatus::Aborted;
                    }
                    Ok(next)
                })
                .await;
            return Ok(result.expect("infallible transition"));
        }
        Ok(entry.bus.snapshot().await)
    }
}

impl Default for ShareRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_sweeper(inner: Arc<Mutex<HashMap<String, Arc<ShareEntry>>>>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let mut map = inner.lock().await;
            map.retain(|_, entry| entry.created_at.elapsed() < TTL);
        }
    });
}

/// Handle to the single in-flight serving of a share's download, owned by
/// the peer route handler for the duration of the byte stream.
#[derive(Clone)]
pub struct DownloadGuard {
    entry: Arc<ShareEntry>,
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
                ShareStatus::Downloading { bytes_sent } => {
                    let mut next = current.clone();
                    next.status = ShareStatus::Downloading {
                        bytes_sent: bytes_sent + delta,
                    };
                    Ok(next)
                }
                _ => Err(()),
            })
            .await;
    }

    pub async fn complete(&self) {
        let _ = self
            .entry
            .bus
            .try_update(|current| match &current.status {
                ShareStatus::Downloading { .. } => {
                    let mut next = current.clone();
                    next.status = ShareStatus::Completed;
                    Ok(next)
                }
                _ => Err(()),
            })
            .await;
    }

    pub async fn fail(&self, err: &AppError) {
        let code = err.code.as_str().to_string();
        let message = err.message.clone();
        let _ = self
            .entry
            .bus
            .try_update(|current| -> Result<Share, ()> {
                let mut next = current.clone();
                next.status = ShareStatus::Error {
                    code: code.clone(),
                    message: message.clone(),
                };
                Ok(next)
            })
            .await;
    }

    /// A read/write error on the serving stream; start a bounded window
    /// during which a matched status poll reclassifies this as `aborted`
    /// (spec.md §4.6). If nothing polls within the window, the transfer is
    /// terminal `error{DOWNLOAD_ERROR}`.
    pub async fn mark_disconnected(&self) {
        self.entry.reconcile_pending.store(true, Ordering::SeqCst);
        let entry = self.entry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RECONCILE_WINDOW).await;
            if entry.reconcile_pending.swap(false, Ordering::SeqCst) {
                let _ = entry
                    .bus
                    .try_update(|current| match &current.status {
                        ShareStatus::Downloading { .. } => {
                            let mut next = current.clone();
                            next.status = ShareStatus::Error {
                                code: error::ErrorCode::DownloadError.as_str().to_string(),
                                message: "transfer interrupted".to_string(),
                            };
                            Ok(next)
                        }
                        _ => Err(()),
                    })
                    .await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_map_info() -> MapInfo {
        MapInfo {
            slot_id: PackageSlot::Custom,
            name: "test".into(),
            estimated_size_bytes: 1024,
            bounds: [-180.0, -85.0511, 180.0, 85.0511],
            minzoom: 0,
            maxzoom: 22,
            created_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn cancel_from_pending_is_terminal() {
        let registry = ShareRegistry::new();
        let share = registry
            .create(
                "s1".into(),
                PackageSlot::Custom,
                sample_map_info(),
                [1u8; 32],
                vec![],
                0,
            )
            .await;
        registry.cancel(&share.share_id).await.unwrap();
        let got = registry.get(&share.share_id).await.unwrap();
        assert_eq!(got.status, ShareStatus::Canceled);
    }

    #[tokio::test]
    async fn cancel_from_terminal_state_is_rejected() {
        let registry = ShareRegistry::new();
        let share = registry
            .create(
                "s2".into(),
                PackageSlot::Custom,
                sample_map_info(),
                [1u8; 32],
                vec![],
                0,
            )
            .await;
        registry.cancel(&share.share_id).await.unwrap();
        let err = registry.cancel(&share.share_id).await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::CancelShareNotCancelable);
    }

    #[tokio::test]
    async fn begin_download_enforces_single_flight() {
        let registry = ShareRegistry::new();
        let share = registry
            .create(
                "s3".into(),
                PackageSlot::Custom,
                sample_map_info(),
                [1u8; 32],
                vec![],
                0,
            )
            .await;
        let _guard = registry.begin_download(&share.share_id).await.unwrap();
        let err = registry.begin_download(&share.share_id).await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::DownloadShareNotPending);
    }

    #[tokio::test]
    async fn decline_after_download_started_is_rejected() {
        let registry = ShareRegistry::new();
        let share = registry
            .create(
                "s4".into(),
                PackageSlot::Custom,
                sample_map_info(),
                [1u8; 32],
                vec![],
                0,
            )
            .await;
        let _guard = registry.begin_download(&share.share_id).await.unwrap();
        let err = registry.decline(&share.share_id, "user_rejected".into()).await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::DeclineShareNotPending);
    }
}
