//! Noise_XX handshake driver: runs the 3-message exchange over a raw
//! `TcpStream` and hands back an [`EncryptedStream`] plus the authenticated
//! remote static public key.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::stream::EncryptedStream;
use super::{PeerKey, NOISE_PATTERN};
use crate::config::KeyPair;

const MAX_HANDSHAKE_MSG: usize = 4096;

async fn send_frame(socket: &mut TcpStream, payload: &[u8]) -> Result<()> {
    let len = u16::try_from(payload.len()).context("handshake message too large")?;
    socket.write_all(&len.to_be_bytes()).await?;
    socket.write_all(payload).await?;
    Ok(())
}

async fn recv_frame(socket: &mut TcpStream) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 2];
    socket.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    if len > MAX_HANDSHAKE_MSG {
        return Err(anyhow!("handshake message exceeds maximum size"));
    }
    let mut buf = vec![0u8; len];
    socket.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Run the responder side of the handshake (server accepting a peer
/// connection). Returns the encrypted stream and the initiator's public key.
pub async fn accept(mut socket: TcpStream, local: &KeyPair) -> Result<(EncryptedStream, PeerKey)> {
    let params = NOISE_PATTERN.parse().context("invalid noise pattern")?;
    let mut hs = snow::Builder::new(params)
        .local_private_key(&local.secret_key)
        .build_responder()
        .context("failed to build noise responder")?;

    let mut buf = vec![0u8; 65535];

    // <- e
    let msg1 = recv_frame(&mut socket).await?;
    hs.read_message(&msg1, &mut buf)
        .context("handshake message 1 rejected")?;

    // -> e, ee, s, es
    let len = hs
        .write_message(&[], &mut buf)
        .context("failed to write handshake message 2")?;
    send_frame(&mut socket, &buf[..len]).await?;

    // <- s, se
    let msg3 = recv_frame(&mut socket).await?;
    hs.read_message(&msg3, &mut buf)
        .context("handshake message 3 rejected")?;

    let remote_static: PeerKey = hs
        .get_remote_static()
        .context("responder did not learn remote static key")?
        .try_into()
        .map_err(|_| anyhow!("remote static key was not 32 bytes"))?;

    let transport = hs
        .into_transport_mode()
        .context("failed to enter transport mode")?;

    Ok((
        EncryptedStream::new(socket, Arc::new(Mutex::new(transport))),
        remote_static,
    ))
}

/// Run the initiator side of the handshake (client dialing a peer),
/// requiring the responder present exactly `expected_remote_key`.
pub async fn connect(
    mut socket: TcpStream,
    local: &KeyPair,
    expected_remote_key: &PeerKey,
) -> Result<EncryptedStream> {
    let params = NOISE_PATTERN.parse().context("invalid noise pattern")?;
    let mut hs = snow::Builder::new(params)
        .local_private_key(&local.secret_key)
        .build_initiator()
        .context("failed to build noise initiator")?;

    let mut buf = vec![0u8; 65535];

    // -> e
    let len = hs
        .write_message(&[], &mut buf)
        .context("failed to write handshake message 1")?;
    send_frame(&mut socket, &buf[..len]).await?;

    // <- e, ee, s, es
    let msg2 = recv_frame(&mut socket).await?;
    hs.read_message(&msg2, &mut buf)
        .context("handshake message 2 rejected")?;

    let remote_static: PeerKey = hs
        .get_remote_static()
        .context("initiator did not learn remote static key")?
        .try_into()
        .map_err(|_| anyhow!("remote static key was not 32 bytes"))?;

    if !crate::consttime::keys_equal(&remote_static, expected_remote_key) {
        return Err(anyhow!(
            "responder presented an unexpected public key; refusing to proceed"
        ));
    }

    // -> s, se
    let len = hs
        .write_message(&[], &mut buf)
        .context("failed to write handshake message 3")?;
    send_frame(&mut socket, &buf[..len]).await?;

    let transport = hs
        .into_transport_mode()
        .context("failed to enter transport mode")?;

    Ok(EncryptedStream::new(socket, Arc::new(Mutex::new(transport))))
}
