//! Share data model (spec.md §3, sender side).

use serde::Serialize;

use crate::store::{MapInfo, PackageSlot};
use crate::transport::PeerKey;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ShareStatus {
    Pending,
    Downloading { bytes_sent: u64 },
    Completed,
    Canceled,
    Declined { reason: String },
    Aborted,
    Error { code: String, message: String },
}

impl ShareStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShareStatus::Completed
                | ShareStatus::Canceled
                | ShareStatus::Declined { .. }
                | ShareStatus::Aborted
                | ShareStatus::Error { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub share_id: String,
    /// Which Package Store slot this offer streams from. Not part of the
    /// external JSON shape (spec.md §3 lists only the sender-facing fields).
    #[serde(skip)]
    pub slot_id: PackageSlot,
    pub map_info: MapInfo,
    #[serde(serialize_with = "crate::zbase32::serialize_key")]
    pub receiver_key: PeerKey,
    pub peer_urls: Vec<String>,
    pub created_at_ms: u64,
    #[serde(flatten)]
    pub status: ShareStatus,
}
