//! Request origin tagging (spec.md §4.3 / §9 design notes).
//!
//! Origin is bound to the request at accept time by the dual listener — the
//! loopback listener always layers `Extension(RequestOrigin::Loopback)`
//! once, up front; the peer listener layers `Extension(RequestOrigin::Peer)`
//! per accepted connection, alongside the connection's authenticated
//! [`crate::transport::PeerIdentity`]. Neither is threaded through a global.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    Loopback,
    Peer,
}
