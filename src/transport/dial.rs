//! Client side of the authenticated transport: dials a peer URL demanding a
//! specific remote key, reusing connections by `(host, port, remoteKey)`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::client::conn::http1;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{handshake, PeerKey};
use crate::config::KeyPair;

type PoolKey = (String, u16, PeerKey);

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("connect failed: {0}")]
    Connect(#[source] anyhow::Error),
    #[error("dial cancelled")]
    Cancelled,
}

/// Pooled authenticated HTTP client. One `Dialer` is shared across all of a
/// daemon's outgoing peer requests (downloads, decline fan-out, status
/// reconciliation polls).
#[derive(Clone, Default)]
pub struct Dialer {
    pool: Arc<Mutex<HashMap<PoolKey, http1::SendRequest<Full<Bytes>>>>>,
}

impl Dialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Perform an HTTP request against `url`'s host/port, refusing to
    /// proceed unless the responder's authenticated static key equals
    /// `remote_key`. `cancel` aborts the dial (not a request already
    /// in-flight on a reused connection).
    pub async fn dial(
        &self,
        url: &url::Url,
        remote_key: PeerKey,
        local: &KeyPair,
        request: Request<Full<Bytes>>,
        cancel: &CancellationToken,
    ) -> Result<Response<Incoming>, DialError> {
        let host = url
            .host_str()
            .ok_or_else(|| DialError::Connect(anyhow!("peer url has no host")))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let key: PoolKey = (host.clone(), port, remote_key);

        let pooled = self.pool.lock().await.remove(&key);

        let mut sender = match pooled {
            Some(sender) => sender,
            None => self.connect(&key, &host, port, local, cancel).await?,
        };

        match sender.send_request(request).await {
            Ok(resp) => {
                // HTTP/1.1 allows only one in-flight request per connection;
                // `SendRequest` isn't `Clone`, so we take it out of the pool
                // above and hand it back here rather than sharing a handle.
                self.pool.lock().await.insert(key, sender);
                Ok(resp)
            }
            Err(err) => {
                // Stale pooled connection; already removed above. Callers
                // (the download registry's URL-trial loop) move on to the
                // next candidate URL.
                Err(DialError::Connect(err.into()))
            }
        }
    }

    async fn connect(
        &self,
        key: &PoolKey,
        host: &str,
        port: u16,
        local: &KeyPair,
        cancel: &CancellationToken,
    ) -> Result<http1::SendRequest<Full<Bytes>>, DialError> {
        let socket = tokio::select! {
            res = TcpStream::connect((host, port)) => res.map_err(|e| DialError::Connect(e.into()))?,
            _ = cancel.cancelled() => return Err(DialError::Cancelled),
        };
        let stream = tokio::select! {
            res = handshake::connect(socket, local, &key.2) => res.map_err(DialError::Connect)?,
            _ = cancel.cancelled() => return Err(DialError::Cancelled),
        };
        let io = TokioIo::new(stream);
        let (sender, conn) = http1::handshake(io)
            .await
            .map_err(|e| DialError::Connect(e.into()))?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                tracing::debug!(?err, "peer client connection ended");
            }
        });
        Ok(sender)
    }
}
