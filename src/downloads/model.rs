//! Download data model (spec.md §3, receiver side).

use serde::Serialize;

use crate::transport::PeerKey;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DownloadStatus {
    Downloading { bytes_received: u64 },
    Completed,
    /// Sender cancelled; observed as a reconciled remote status.
    Canceled,
    /// Share was declined; cannot start.
    Declined,
    /// This receiver aborted.
    Aborted,
    Error { code: String, message: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Download {
    pub download_id: String,
    pub share_id: String,
    #[serde(serialize_with = "crate::zbase32::serialize_key")]
    pub sender_key: PeerKey,
    pub peer_urls: Vec<String>,
    pub estimated_size_bytes: u64,
    pub created_at_ms: u64,
    #[serde(flatten)]
    pub status: DownloadStatus,
}
