//! The pairing exchange over a raw TCP socket.
//!
//! ```text
//! Initiator (this client)                      Responder (daemon)
//! SPAKE2_MSG(X)            ───────────────▶
//!                          ◀───────────────    SPAKE2_MSG(Y)
//!     both derive the channel key from the transcript
//! PEER_INFO(enc(ours))     ───────────────▶    decrypt = proof of same code
//!                          ◀───────────────    PEER_INFO(enc(theirs))
//! ```
//!
//! Every packet header is validated (version, type, length ≤ 8 KiB) before
//! the payload buffer is allocated.  Any failure aborts the attempt: the
//! [`Spake2`] state, the shared secret and the cipher are dropped (and wiped)
//! as the function returns, whichever path it returns by.
//!
//! Both roles are implemented; the responder side is what a test harness or
//! a daemon emulator needs.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use devlink_core::crypto::channel::{ChannelError, PairingCipher};
use devlink_core::protocol::pairing::{
    encode_packet, PairingFrameError, PairingPacketHeader, PairingPacketType, PeerInfo,
    PAIRING_HEADER_SIZE,
};
use devlink_core::{ErrorClass, PakeError, PakeRole, Spake2};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error type for a pairing attempt.
#[derive(Debug, Error)]
pub enum PairingError {
    /// The TCP connection to the pairing port failed.
    #[error("failed to connect to pairing port {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The socket failed mid-exchange (reset, EOF).
    #[error("pairing I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read or write did not complete in time.
    #[error("pairing timed out after {0:?}")]
    Timeout(Duration),

    /// A packet header or peer-info record was invalid.
    #[error("pairing frame error: {0}")]
    Frame(#[from] PairingFrameError),

    /// The PAKE rejected the peer's message.
    #[error("pairing key exchange failed: {0}")]
    Pake(#[from] PakeError),

    /// The encrypted channel failed (most often: the codes differed).
    #[error("pairing channel failed: {0}")]
    Channel(#[from] ChannelError),

    /// The caller cancelled the attempt.
    #[error("pairing cancelled")]
    Cancelled,
}

impl PairingError {
    /// Classifies this error for the caller's attempt boundary.
    pub fn class(&self) -> ErrorClass {
        match self {
            PairingError::Connect { .. }
            | PairingError::Io(_)
            | PairingError::Timeout(_)
            | PairingError::Cancelled => ErrorClass::TransientIo,
            PairingError::Frame(e) => e.class(),
            PairingError::Pake(e) => e.class(),
            PairingError::Channel(e) => e.class(),
        }
    }
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, PairingError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(PairingError::Timeout(timeout)),
    }
}

// ── Packet I/O ────────────────────────────────────────────────────────────────

/// Reads one packet of type `expected`.
///
/// The 12-byte header is read and validated first; only then is a buffer of
/// the declared length allocated and filled.
pub async fn read_packet<S>(
    stream: &mut S,
    expected: PairingPacketType,
    timeout: Duration,
) -> Result<Vec<u8>, PairingError>
where
    S: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; PAIRING_HEADER_SIZE];
    with_timeout(timeout, stream.read_exact(&mut header_buf)).await?;
    let header = PairingPacketHeader::parse(&header_buf)?;
    header.expect_type(expected)?;

    let mut payload = vec![0u8; header.length as usize];
    with_timeout(timeout, stream.read_exact(&mut payload)).await?;
    debug!(packet_type = ?expected, len = payload.len(), "pairing packet received");
    Ok(payload)
}

/// Writes one packet.
pub async fn write_packet<S>(
    stream: &mut S,
    packet_type: PairingPacketType,
    payload: &[u8],
    timeout: Duration,
) -> Result<(), PairingError>
where
    S: AsyncWrite + Unpin,
{
    let packet = encode_packet(packet_type, payload)?;
    with_timeout(timeout, async {
        stream.write_all(&packet).await?;
        stream.flush().await
    })
    .await
}

// ── Exchange ──────────────────────────────────────────────────────────────────

/// Runs the initiator side of pairing and returns the peer's identity record.
///
/// # Errors
///
/// Returns [`PairingError`]; a mismatched code surfaces as
/// [`PairingError::Channel`] on the responder, and typically as an EOF on
/// this side once the responder hangs up.
pub async fn pair_as_initiator<S>(
    stream: &mut S,
    code: &[u8],
    own: &PeerInfo,
    timeout: Duration,
) -> Result<PeerInfo, PairingError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let pake = Spake2::start(PakeRole::Initiator, code)?;
    write_packet(stream, PairingPacketType::Spake2Msg, pake.message(), timeout).await?;

    let peer_message = read_packet(stream, PairingPacketType::Spake2Msg, timeout).await?;
    let secret = pake.finish(&peer_message)?;
    let mut cipher = PairingCipher::new(&secret, PakeRole::Initiator)?;
    drop(secret);

    let sealed = cipher.encrypt(&own.encode()?)?;
    write_packet(stream, PairingPacketType::PeerInfo, &sealed, timeout).await?;

    let reply = read_packet(stream, PairingPacketType::PeerInfo, timeout).await?;
    let plaintext = cipher.decrypt(&reply)?;
    Ok(PeerInfo::decode(&plaintext)?)
}

/// Runs the responder side of pairing and returns the initiator's identity record.
pub async fn pair_as_responder<S>(
    stream: &mut S,
    code: &[u8],
    own: &PeerInfo,
    timeout: Duration,
) -> Result<PeerInfo, PairingError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer_message = read_packet(stream, PairingPacketType::Spake2Msg, timeout).await?;
    let pake = Spake2::start(PakeRole::Responder, code)?;
    write_packet(stream, PairingPacketType::Spake2Msg, pake.message(), timeout).await?;

    let secret = pake.finish(&peer_message)?;
    let mut cipher = PairingCipher::new(&secret, PakeRole::Responder)?;
    drop(secret);

    let sealed = read_packet(stream, PairingPacketType::PeerInfo, timeout).await?;
    let plaintext = cipher.decrypt(&sealed)?;
    let peer = PeerInfo::decode(&plaintext)?;

    let reply = cipher.encrypt(&own.encode()?)?;
    write_packet(stream, PairingPacketType::PeerInfo, &reply, timeout).await?;
    Ok(peer)
}

/// Connects to a pairing port and pairs with `code`.
///
/// Cancellation drops the in-flight exchange (and the socket) before returning.
pub async fn pair_device(
    addr: SocketAddr,
    code: &str,
    own: &PeerInfo,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<PeerInfo, PairingError> {
    let attempt = async {
        let mut stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(PairingError::Connect { addr, source }),
            Err(_) => return Err(PairingError::Timeout(timeout)),
        };
        stream.set_nodelay(true)?;
        info!(%addr, "pairing connection established");
        pair_as_initiator(&mut stream, code.as_bytes(), own, timeout).await
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PairingError::Cancelled),
        result = attempt => {
            match &result {
                Ok(peer) => info!(%addr, peer = %peer.name, "paired"),
                Err(e) => warn!(%addr, class = ?e.class(), "pairing failed: {e}"),
            }
            result
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
