//! Peer-facing listener: accepts raw TCP, runs the responder side of the
//! Noise handshake, then serves the shared axum router over the decrypted
//! stream with the connection's authenticated key attached to every
//! request.

use std::net::SocketAddr;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;

use super::{handshake, PeerIdentity};
use crate::config::KeyPair;

pub struct PeerListener {
    tcp: TcpListener,
    local: KeyPair,
}

impl PeerListener {
    pub async fn bind(addr: SocketAddr, local: KeyPair) -> std::io::Result<Self> {
        let tcp = TcpListener::bind(addr).await?;
        Ok(Self { tcp, local })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Accept authenticated connections forever, serving `app` over each one.
    /// Each request carries an `Extension<PeerIdentity>` bound at accept
    /// time, never threaded through global state.
    pub fn serve(self, app: Router) -> tokio::task::JoinHandle<()> {
        let PeerListener { tcp, local } = self;
        tokio::spawn(async move {
            loop {
                let (socket, peer_addr) = match tcp.accept().await {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(?err, "peer listener accept failed");
                        continue;
                    }
                };
                let app = app.clone();
                let local = local.clone();
                tokio::spawn(async move {
                    serve_one(socket, peer_addr, &local, app).await;
                });
            }
        })
    }
}

async fn serve_one(socket: tokio::net::TcpStream, peer_addr: SocketAddr, local: &KeyPair, app: Router) {
    let (stream, remote_key) = match handshake::accept(socket, local).await {
        Ok(pair) => pair,
        Err(err) => {
            tracing::warn!(?err, %peer_addr, "authenticated handshake failed");
            return;
        }
    };
    tracing::info!(
        %peer_addr,
        remote_key = %crate::zbase32::encode(&remote_key),
        "peer connected"
    );
    let app = app.layer(axum::Extension(PeerIdentity { remote_key }));
    let io = TokioIo::new(stream);
    let service = TowerToHyperService::new(app);
    if let Err(err) = ConnBuilder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(io, service)
        .await
    {
        tracing::debug!(?err, %peer_addr, "peer connection ended");
    }
}
