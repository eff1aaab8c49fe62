//! Dual Listener & Router (spec.md §4.3, component C3): one request
//! pipeline shared by both listeners. Origin is bound to the request at
//! accept time (by [`crate::app`] for the loopback listener, by
//! [`crate::transport::PeerListener`] for the peer listener) rather than
//! threaded through a global (spec.md §9 design notes).

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::app::AppState;
use crate::auth;

/// Build the one request pipeline dispatched to by both listeners: the
/// four base paths plus CORS on every response, including errors (spec.md
/// §4.3, §4.10).
///
/// `/maps/*` is entirely loopback-only (spec.md §4.9), so the gate is
/// layered here rather than inside [`crate::maps::routes`]. `/mapShares/*`
/// mixes loopback and peer-authenticated routes and applies its own
/// per-route gating (spec.md §4.4); `/downloads/*` layers it internally
/// too, since every download route is loopback-only.
pub fn build(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let maps = crate::maps::router().layer(axum::middleware::from_fn(auth::require_loopback));

    Router::new()
        .nest("/maps", maps)
        .nest("/mapShares", crate::shares::router())
        .nest("/downloads", crate::downloads::router())
        .layer(cors)
        .with_state(state)
}

/// Private-network-access header some browsers require on preflights from
/// a secure context to a loopback/LAN origin. Harmless to set unconditionally.
pub fn private_network_header() -> (header::HeaderName, HeaderValue) {
    (
        header::HeaderName::from_static("access-control-allow-private-network"),
        HeaderValue::from_static("true"),
    )
}
