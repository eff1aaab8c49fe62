//! Authorization gate (spec.md §4.4): two predicates applied ahead of
//! business logic.
//!
//! - **Loopback-only**: a `tower`/axum middleware layered on every
//!   loopback-restricted route group; rejects non-loopback origin before
//!   the handler runs.
//! - **Peer-key match**: share-scoped peer routes call
//!   [`require_peer_key`] as the first thing in the handler body (the
//!   expected key depends on which share the path names, so it cannot be a
//!   blanket layer the way loopback-only is).

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Extension;

use crate::error::{self, AppError};
use crate::origin::RequestOrigin;
use crate::transport::{PeerIdentity, PeerKey};

/// Middleware: reject any request not tagged `origin=loopback` at accept
/// time, per spec.md §4.4.
pub async fn require_loopback(
    Extension(origin): Extension<RequestOrigin>,
    req: Request,
    next: Next,
) -> Response {
    if origin != RequestOrigin::Loopback {
        return error::forbidden("this route is only reachable on the loopback listener")
            .into_response();
    }
    next.run(req).await
}

/// Check that the request's authenticated remote key equals `expected`
/// (constant-time). Peer routes never admit loopback requests — a missing
/// `PeerIdentity` extension (i.e. a loopback-origin request hitting a
/// peer-only route) is treated the same as a key mismatch.
pub fn require_peer_key(identity: Option<&PeerIdentity>, expected: &PeerKey) -> Result<(), AppError> {
    match identity {
        Some(identity) if crate::consttime::keys_equal(&identity.remote_key, expected) => Ok(()),
        _ => Err(error::forbidden(
            "remote key does not match this share's receiver",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_key_is_authorized() {
        let identity = PeerIdentity { remote_key: [1u8; 32] };
        assert!(require_peer_key(Some(&identity), &[1u8; 32]).is_ok());
    }

    #[test]
    fn mismatched_key_is_forbidden() {
        let identity = PeerIdentity { remote_key: [1u8; 32] };
        let err = require_peer_key(Some(&identity), &[2u8; 32]).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Forbidden);
    }

    #[test]
    fn missing_identity_is_forbidden() {
        let err = require_peer_key(None, &[1u8; 32]).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Forbidden);
    }
}
