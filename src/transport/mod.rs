//! Authenticated peer transport (spec.md §4.2).
//!
//! A TCP-oriented transport where each connection completes a Noise_XX
//! handshake, establishing an encrypted bidirectional stream and revealing
//! both parties' long-term public keys. The server side surfaces, per
//! accepted HTTP request on that connection, the remote party's
//! authenticated public key; the client side directs a request at a specific
//! remote public key and refuses to proceed if the responder presents a
//! different one.
//!
//! The wire format is an implementation detail (per spec): this is Noise
//! framing carrying plain HTTP/1.1 inside, not TLS.

mod dial;
mod handshake;
mod listener;
mod stream;

pub use dial::{DialError, Dialer};
pub use listener::PeerListener;
pub use stream::EncryptedStream;

/// The Noise protocol pattern used for the handshake: mutually authenticated,
/// both static keys revealed to each other by the end of the exchange.
pub const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2s";

/// A 32-byte Curve25519 public key, used throughout as the peer identity.
pub type PeerKey = [u8; 32];

/// Per-request metadata attached by the dual listener: which party is
/// talking to us, and (for peer connections) their authenticated key.
#[derive(Debug, Clone, Copy)]
pub struct PeerIdentity {
    pub remote_key: PeerKey,
}
