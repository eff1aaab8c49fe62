//! Encrypted duplex byte stream presented to hyper once the Noise handshake
//! completes.
//!
//! Framing on the wire is `u16` big-endian ciphertext length + ciphertext
//! (Noise transport messages, max 65535 bytes each, ChaChaPoly tag
//! included). Decryption/encryption run on two background tasks that pump
//! between the raw socket and an in-process `tokio::io::duplex` pair; the
//! half we hand back to callers behaves like any other `AsyncRead +
//! AsyncWrite` stream, so hyper's HTTP/1.1 codec does not need to know it is
//! talking to anything other than a plain socket.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use snow::TransportState;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::TcpStream;

/// Maximum plaintext payload per Noise transport message. Kept well under
/// the protocol's 65535-byte ciphertext ceiling to leave room for the
/// ChaChaPoly tag.
const MAX_PLAINTEXT: usize = 16 * 1024;
const DUPLEX_BUFFER: usize = 64 * 1024;

pub struct EncryptedStream {
    inner: DuplexStream,
}

impl EncryptedStream {
    pub(super) fn new(socket: TcpStream, transport: Arc<Mutex<TransportState>>) -> Self {
        let (near, far) = tokio::io::duplex(DUPLEX_BUFFER);
        let (socket_rd, socket_wr) = socket.into_split();
        let (far_rd, far_wr) = tokio::io::split(far);

        tokio::spawn(decrypt_pump(socket_rd, far_wr, transport.clone()));
        tokio::spawn(encrypt_pump(far_rd, socket_wr, transport));

        Self { inner: near }
    }
}

impl AsyncRead for EncryptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for EncryptedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

async fn decrypt_pump(
    mut socket_rd: tokio::net::tcp::OwnedReadHalf,
    mut far_wr: tokio::io::WriteHalf<DuplexStream>,
    transport: Arc<Mutex<TransportState>>,
) {
    let mut ct_buf = vec![0u8; 65535];
    let mut pt_buf = vec![0u8; 65535];
    loop {
        let mut len_buf = [0u8; 2];
        if socket_rd.read_exact(&mut len_buf).await.is_err() {
            return;
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        if socket_rd.read_exact(&mut ct_buf[..len]).await.is_err() {
            return;
        }
        let pt_len = {
            let mut guard = transport.lock().expect("noise transport state poisoned");
            match guard.read_message(&ct_buf[..len], &mut pt_buf) {
                Ok(n) => n,
                Err(err) => {
                    tracing::warn!(?err, "noise decrypt failed; closing connection");
                    return;
                }
            }
        };
        if far_wr.write_all(&pt_buf[..pt_len]).await.is_err() {
            return;
        }
    }
}

async fn encrypt_pump(
    mut far_rd: tokio::io::ReadHalf<DuplexStream>,
    mut socket_wr: tokio::net::tcp::OwnedWriteHalf,
    transport: Arc<Mutex<TransportState>>,
) {
    let mut pt_buf = vec![0u8; MAX_PLAINTEXT];
    let mut ct_buf = vec![0u8; 65535];
    loop {
        let n = match far_rd.read(&mut pt_buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let ct_len = {
            let mut guard = transport.lock().expect("noise transport state poisoned");
            match guard.write_message(&pt_buf[..n], &mut ct_buf) {
                Ok(n) => n,
                Err(err) => {
                    tracing::warn!(?err, "noise encrypt failed; closing connection");
                    return;
                }
            }
        };
        let len = ct_len as u16;
        if socket_wr.write_all(&len.to_be_bytes()).await.is_err() {
            return;
        }
        if socket_wr.write_all(&ct_buf[..ct_len]).await.is_err() {
            return;
        }
    }
}
