//! Process factory (spec.md §6): [`MapShareDaemon`] wires up the Package
//! Store, both registries, the dialer, and the shared router, then
//! `listen()` binds the dual listeners (spec.md §4.3) and returns a
//! [`Handle`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use axum::Extension;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::downloads::DownloadRegistry;
use crate::origin::RequestOrigin;
use crate::shares::ShareRegistry;
use crate::store::PackageStore;
use crate::store::zip_reader::ZipReaderFactory;
use crate::transport::{Dialer, PeerListener};

/// Shared, cheaply-cloned state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub store: PackageStore,
    pub shares: ShareRegistry,
    pub downloads: DownloadRegistry,
    pub dialer: Dialer,
    pub config: Config,
    pub http_client: reqwest::Client,
    remote_port: Arc<AtomicU16>,
}

impl AppState {
    /// Reachable peer URLs for a freshly-created share: one per
    /// non-loopback IPv4 interface, carrying the current remote port
    /// (spec.md §3). Order is "as discovered" — spec.md §9 open question
    /// (b) leaves interface order unspecified in the source.
    pub fn peer_urls_for(&self, share_id: &str) -> Vec<String> {
        let port = self.remote_port.load(Ordering::SeqCst);
        if port == 0 {
            return Vec::new();
        }
        non_loopback_ipv4_addrs()
            .into_iter()
            .map(|ip| format!("http://{ip}:{port}/mapShares/{share_id}"))
            .collect()
    }
}

fn non_loopback_ipv4_addrs() -> Vec<Ipv4Addr> {
    let interfaces = match NetworkInterface::show() {
        Ok(list) => list,
        Err(err) => {
            tracing::warn!(?err, "failed to enumerate network interfaces");
            return Vec::new();
        }
    };
    interfaces
        .into_iter()
        .flat_map(|itf| itf.addr.into_iter())
        .filter_map(|addr| match addr {
            Addr::V4(v4) if !v4.ip.is_loopback() => Some(v4.ip),
            _ => None,
        })
        .collect()
}

/// Recognized process-factory startup error (spec.md §6 config validation).
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Loopback/remote ports requested of [`MapShareDaemon::listen`]; `0` (or
/// `None`) means "let the OS choose", per spec.md §6.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenOptions {
    pub local_port: Option<u16>,
    pub remote_port: Option<u16>,
}

/// The embedded daemon: one [`AppState`] that may be `listen()`ed and
/// `close()`d repeatedly (spec.md §4.3: "a restart rebinds; newly
/// dispensed peer URLs reflect the new remote port").
pub struct MapShareDaemon {
    state: AppState,
}

impl MapShareDaemon {
    /// Validate `config` and assemble the Package Store, registries, and
    /// dialer. Does not bind any sockets yet — call [`Self::listen`] for that.
    pub fn new(config: Config) -> Result<Self, StartError> {
        config.validate()?;
        let store = PackageStore::new(
            config.custom_map_path.clone(),
            config.fallback_map_path.clone(),
            Arc::new(ZipReaderFactory),
        );
        let state = AppState {
            store,
            shares: ShareRegistry::new(),
            downloads: DownloadRegistry::new(),
            dialer: Dialer::new(),
            config,
            http_client: reqwest::Client::new(),
            remote_port: Arc::new(AtomicU16::new(0)),
        };
        Ok(Self { state })
    }

    /// Bind the loopback listener on `127.0.0.1:<localPort>` and the peer
    /// listener on `0.0.0.0:<remotePort>`; both must be bound (ready)
    /// before this resolves (spec.md §4.3).
    pub async fn listen(&self, opts: ListenOptions) -> Result<Handle, StartError> {
        let loopback_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), opts.local_port.unwrap_or(0));
        let remote_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), opts.remote_port.unwrap_or(0));

        let peer_listener = PeerListener::bind(remote_addr, self.state.config.key_pair.clone()).await?;
        let remote_port = peer_listener.local_addr()?.port();

        let loopback_tcp = TcpListener::bind(loopback_addr).await?;
        let local_port = loopback_tcp.local_addr()?.port();

        self.state.remote_port.store(remote_port, Ordering::SeqCst);

        let base = crate::router::build(self.state.clone());
        let loopback_router = base.clone().layer(Extension(RequestOrigin::Loopback));
        let peer_router = base.layer(Extension(RequestOrigin::Peer));

        let loopback_task: JoinHandle<()> = tokio::spawn(async move {
            if let Err(err) = axum::serve(loopback_tcp, loopback_router).await {
                tracing::error!(?err, "loopback listener stopped");
            }
        });
        let peer_task = peer_listener.serve(peer_router);

        tracing::info!(local_port, remote_port, "map share engine listening");

        Ok(Handle {
            local_port,
            remote_port,
            loopback_task: Some(loopback_task),
            peer_task: Some(peer_task),
        })
    }
}

/// Handle to a bound daemon instance: the dispensed ports, and graceful
/// shutdown of both listener tasks.
pub struct Handle {
    pub local_port: u16,
    pub remote_port: u16,
    loopback_task: Option<JoinHandle<()>>,
    peer_task: Option<JoinHandle<()>>,
}

impl Handle {
    /// Stop accepting new connections on both listeners. In-flight SSE
    /// streams observe the entity teardown path (spec.md §4.5) rather than
    /// an abrupt socket close where avoidable; here we simply abort the
    /// accept loops, which is sufficient for "a restart rebinds".
    pub async fn close(&mut self) {
        if let Some(task) = self.loopback_task.take() {
            task.abort();
        }
        if let Some(task) = self.peer_task.take() {
            task.abort();
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Some(task) = self.loopback_task.take() {
            task.abort();
        }
        if let Some(task) = self.peer_task.take() {
            task.abort();
        }
    }
}
