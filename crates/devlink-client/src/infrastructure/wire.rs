//! The session-protocol connection to a paired device.
//!
//! # Connect sequence
//!
//! ```text
//! client                                   device
//! CNXN(version, maxdata, banner)  ───────▶
//!                                 ◀───────  CNXN(...)                    already trusted
//!                                 ◀───────  AUTH(TOKEN, challenge)       otherwise
//! AUTH(SIGNATURE, sign(challenge)) ──────▶
//!                                 ◀───────  CNXN(...)                    key recognised
//!                                 ◀───────  AUTH(TOKEN, challenge)       key unknown
//! AUTH(PUBLICKEY, key ‖ name)     ───────▶
//!              ... user approves on the device (bounded wait) ...
//!                                 ◀───────  CNXN(...)
//! ```
//!
//! A further challenge after the public key, or no answer within the approval
//! timeout, means the device refused us.
//!
//! # After connect
//!
//! One reader task owns the read half and feeds every inbound frame through
//! a [`StreamTable`].  The resulting [`StreamEvent`] is routed to the
//! [`WireStream`] it belongs to.  A [`ProtocolViolation`] or a framing error
//! tears down the whole connection.
//!
//! Outbound frames all go through one mutex around the write half, and each
//! frame is written completely while that lock is held, so concurrent streams
//! never interleave partial frames.  Each stream is stop-and-wait in both
//! directions: a write is not sent until the previous one has been
//! acknowledged with `OKAY`, and a peer that writes again before we
//! acknowledged its last `WRTE` loses the connection.
//!
//! A stream that is dropped, or whose `OPEN` fails, is released: its route is
//! removed and the device gets a `CLSE` if it already knows the stream.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use devlink_core::protocol::wire::{
    parse_header, parse_message, AuthKind, Command, WireError, WireMessage, A_VERSION, HEADER_SIZE,
    MAX_PAYLOAD,
};
use devlink_core::{ErrorClass, ProtocolViolation, StreamEvent, StreamTable};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::keystore::{KeyManager, KeyStoreError};

/// Banner this client sends in its `CNXN`.
pub const HOST_BANNER: &str = "host::features=shell_v2,cmd";

/// Error type for the session connection.
#[derive(Debug, Error)]
pub enum WireConnError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("framing error: {0}")]
    Wire(#[from] WireError),

    #[error("protocol violation: {0}")]
    Violation(#[from] ProtocolViolation),

    /// The peer sent something the handshake does not allow.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The device refused our key.
    #[error("authentication rejected: {0}")]
    Rejected(&'static str),

    #[error("identity unavailable: {0}")]
    KeyStore(#[from] KeyStoreError),

    /// The device closed a stream instead of opening it.
    #[error("device refused to open {0:?}")]
    StreamRefused(String),

    /// The connection is gone; reconnect from the beginning.
    #[error("connection closed")]
    Closed,
}

impl WireConnError {
    /// Classifies this error for the caller's attempt boundary.
    pub fn class(&self) -> ErrorClass {
        match self {
            WireConnError::Connect { .. }
            | WireConnError::Io(_)
            | WireConnError::Timeout(_)
            | WireConnError::Closed => ErrorClass::TransientIo,
            WireConnError::Wire(e) => e.class(),
            WireConnError::Violation(e) => e.class(),
            WireConnError::Handshake(_) => ErrorClass::PairingProtocol,
            WireConnError::Rejected(_) | WireConnError::StreamRefused(_) => {
                ErrorClass::AuthenticationRejected
            }
            WireConnError::KeyStore(e) => e.class(),
        }
    }
}

// ── Frame I/O ─────────────────────────────────────────────────────────────────

/// Reads one message, validating the header before allocating the payload.
pub async fn read_message<R>(reader: &mut R, max_payload: u32) -> Result<WireMessage, WireConnError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).await?;
    let header = parse_header(&header_buf, max_payload)?;

    let mut payload = vec![0u8; header.data_length as usize];
    reader.read_exact(&mut payload).await?;
    Ok(parse_message(&header, &payload)?)
}

/// Writes one complete message and flushes.
pub async fn write_message<W>(writer: &mut W, msg: &WireMessage) -> Result<(), WireConnError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&msg.to_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn timed<T, F>(limit: Duration, fut: F) -> Result<T, WireConnError>
where
    F: std::future::Future<Output = Result<T, WireConnError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| WireConnError::Timeout(limit))?
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// What the device told us in its `CNXN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBanner {
    pub banner: String,
    pub max_payload: u32,
}

/// Timeouts for one connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectTimeouts {
    /// Per read/write on the socket.
    pub io: Duration,
    /// How long to wait for the user to accept a new key on the device.
    pub approval: Duration,
}

/// Runs the connect/authenticate exchange on a fresh stream.
pub async fn handshake<S>(
    stream: &mut S,
    keys: &KeyManager,
    device_name: &str,
    timeouts: ConnectTimeouts,
) -> Result<PeerBanner, WireConnError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = WireMessage::new(Command::Connect, A_VERSION, MAX_PAYLOAD, HOST_BANNER);
    timed(timeouts.io, write_message(stream, &hello)).await?;

    let mut challenges = 0u32;
    let mut key_offered = false;
    loop {
        let msg = if key_offered {
            tokio::time::timeout(timeouts.approval, read_message(stream, MAX_PAYLOAD))
                .await
                .map_err(|_| WireConnError::Rejected("key was not approved in time"))??
        } else {
            timed(timeouts.io, read_message(stream, MAX_PAYLOAD)).await?
        };

        match msg.command {
            Command::Connect => {
                if msg.arg1 == 0 {
                    return Err(WireConnError::Handshake("peer advertised zero max payload".into()));
                }
                let banner = PeerBanner {
                    banner: String::from_utf8_lossy(&msg.payload).into_owned(),
                    max_payload: msg.arg1.min(MAX_PAYLOAD),
                };
                info!(banner = %banner.banner, max_payload = banner.max_payload, "connected");
                return Ok(banner);
            }
            Command::Auth if msg.arg0 == AuthKind::Token as u32 => {
                challenges += 1;
                match challenges {
                    1 => {
                        let signature = keys.sign(&msg.payload).await?;
                        let reply =
                            WireMessage::new(Command::Auth, AuthKind::Signature as u32, 0, signature.to_vec());
                        timed(timeouts.io, write_message(stream, &reply)).await?;
                        debug!("answered challenge with signature");
                    }
                    2 => {
                        let mut record = keys.public_key().await?.to_vec();
                        record.extend_from_slice(device_name.as_bytes());
                        let reply = WireMessage::new(Command::Auth, AuthKind::PublicKey as u32, 0, record);
                        timed(timeouts.io, write_message(stream, &reply)).await?;
                        key_offered = true;
                        info!(
                            timeout = ?timeouts.approval,
                            "key not recognised; waiting for approval on the device"
                        );
                    }
                    _ => return Err(WireConnError::Rejected("device rejected the key")),
                }
            }
            other => {
                return Err(WireConnError::Handshake(format!(
                    "unexpected {other} (arg0 {}) during handshake",
                    msg.arg0
                )))
            }
        }
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The stream table and where each stream's events go.
///
/// The table admits at most one unacknowledged `WRTE` per stream, which
/// bounds what can queue in each route.
#[derive(Default)]
struct Registry {
    table: StreamTable,
    routes: HashMap<u32, mpsc::UnboundedSender<StreamEvent>>,
}

struct Inner {
    writer: Mutex<BoxedWriter>,
    registry: Mutex<Registry>,
    closed: CancellationToken,
    io_timeout: Duration,
}

impl Inner {
    async fn send(&self, msg: &WireMessage) -> Result<(), WireConnError> {
        if self.closed.is_cancelled() {
            return Err(WireConnError::Closed);
        }
        let mut writer = self.writer.lock().await;
        let result = timed(self.io_timeout, write_message(&mut *writer, msg)).await;
        if result.is_err() {
            self.closed.cancel();
        }
        result
    }

    /// Forgets a stream locally and sends `CLSE` if the peer knows it.
    async fn release(&self, local_id: u32) -> Result<(), WireConnError> {
        let remote = {
            let mut registry = self.registry.lock().await;
            registry.routes.remove(&local_id);
            registry.table.close_local(local_id)
        };
        match remote {
            Some(remote_id) => {
                self.send(&WireMessage::new(Command::Close, local_id, remote_id, Vec::new()))
                    .await
            }
            None => Ok(()),
        }
    }
}

/// An authenticated session with one device.
pub struct WireConnection {
    id: Uuid,
    inner: Arc<Inner>,
    peer: PeerBanner,
    reader: JoinHandle<()>,
}

impl WireConnection {
    /// Connects over TCP and authenticates.
    pub async fn connect(
        addr: SocketAddr,
        keys: &KeyManager,
        device_name: &str,
        timeouts: ConnectTimeouts,
    ) -> Result<Self, WireConnError> {
        let stream = match tokio::time::timeout(timeouts.io, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(WireConnError::Connect { addr, source }),
            Err(_) => return Err(WireConnError::Timeout(timeouts.io)),
        };
        stream.set_nodelay(true)?;
        info!(%addr, "session socket open");
        Self::establish(stream, keys, device_name, timeouts).await
    }

    /// Authenticates over an already-open stream and starts the reader task.
    pub async fn establish<S>(
        mut stream: S,
        keys: &KeyManager,
        device_name: &str,
        timeouts: ConnectTimeouts,
    ) -> Result<Self, WireConnError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = Uuid::new_v4();
        let peer = handshake(&mut stream, keys, device_name, timeouts)
            .instrument(info_span!("wire", session = %id))
            .await?;
        let (read_half, write_half) = tokio::io::split(stream);

        let inner = Arc::new(Inner {
            writer: Mutex::new(Box::new(write_half)),
            registry: Mutex::new(Registry::default()),
            closed: CancellationToken::new(),
            io_timeout: timeouts.io,
        });
        let reader = tokio::spawn(
            reader_loop(read_half, Arc::clone(&inner), MAX_PAYLOAD)
                .instrument(info_span!("wire", session = %id)),
        );

        Ok(Self {
            id,
            inner,
            peer,
            reader,
        })
    }

    /// Log correlation id for this connection.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The banner the device sent in its `CNXN`.
    pub fn banner(&self) -> &str {
        &self.peer.banner
    }

    /// The negotiated maximum payload per frame.
    pub fn max_payload(&self) -> u32 {
        self.peer.max_payload
    }

    /// Returns `true` once the connection has been torn down.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Number of streams that still have a live route.
    pub async fn open_streams(&self) -> usize {
        self.inner.registry.lock().await.routes.len()
    }

    /// Opens a logical stream to `destination` (e.g. `shell:ls`).
    ///
    /// On any failure the stream is released before the error is returned.
    pub async fn open(&self, destination: &str) -> Result<WireStream, WireConnError> {
        let (tx, mut events) = mpsc::unbounded_channel();
        let local_id = {
            let mut registry = self.inner.registry.lock().await;
            let id = registry.table.open();
            registry.routes.insert(id, tx);
            id
        };

        match self.await_open(local_id, destination, &mut events).await {
            Ok(remote_id) => {
                debug!(local_id, remote_id, destination, "stream open");
                Ok(WireStream {
                    local_id,
                    remote_id,
                    inner: Arc::clone(&self.inner),
                    events,
                    pending: VecDeque::new(),
                    max_payload: self.peer.max_payload as usize,
                    peer_closed: false,
                    released: false,
                })
            }
            Err(e) => {
                debug!(local_id, destination, "open failed: {e}");
                if let Err(release) = self.inner.release(local_id).await {
                    debug!(local_id, "release after failed open: {release}");
                }
                Err(e)
            }
        }
    }

    async fn await_open(
        &self,
        local_id: u32,
        destination: &str,
        events: &mut mpsc::UnboundedReceiver<StreamEvent>,
    ) -> Result<u32, WireConnError> {
        let mut target = destination.as_bytes().to_vec();
        target.push(0);
        self.inner
            .send(&WireMessage::new(Command::Open, local_id, 0, target))
            .await?;

        let first = tokio::time::timeout(self.inner.io_timeout, events.recv())
            .await
            .map_err(|_| WireConnError::Timeout(self.inner.io_timeout))?;
        match first {
            Some(StreamEvent::Opened { remote_id, .. }) => Ok(remote_id),
            Some(StreamEvent::Closed { .. }) => Err(WireConnError::StreamRefused(destination.to_string())),
            Some(other) => Err(WireConnError::Handshake(format!("unexpected {other:?} on open"))),
            None => Err(WireConnError::Closed),
        }
    }

    /// Runs `command` in a shell on the device and returns its output.
    pub async fn run_command(&self, command: &str) -> Result<Vec<u8>, WireConnError> {
        let mut stream = self.open(&format!("shell:{command}")).await?;
        let mut output = Vec::new();
        while let Some(chunk) = stream.read().await? {
            output.extend_from_slice(&chunk);
        }
        stream.close().await?;
        Ok(output)
    }

    /// Tears the connection down.
    pub async fn close(self) {
        self.inner.closed.cancel();
        let mut writer = self.inner.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("shutdown on close: {e}");
        }
    }
}

impl Drop for WireConnection {
    fn drop(&mut self) {
        self.inner.closed.cancel();
        self.reader.abort();
    }
}

async fn reader_loop<R>(mut reader: ReadHalf<R>, inner: Arc<Inner>, max_payload: u32)
where
    R: AsyncRead + Send + Unpin,
{
    loop {
        let msg = tokio::select! {
            _ = inner.closed.cancelled() => break,
            result = read_message(&mut reader, max_payload) => result,
        };
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                if !inner.closed.is_cancelled() {
                    warn!(class = ?e.class(), "session read failed: {e}");
                }
                break;
            }
        };

        let routed = {
            let mut registry = inner.registry.lock().await;
            match registry.table.on_message(&msg) {
                Ok(Some(event)) => {
                    let local_id = event.local_id();
                    let route = if matches!(event, StreamEvent::Closed { .. }) {
                        registry.routes.remove(&local_id)
                    } else {
                        registry.routes.get(&local_id).cloned()
                    };
                    Ok(Some((route, event)))
                }
                Ok(None) => Ok(None),
                Err(violation) => Err(violation),
            }
        };

        match routed {
            Ok(Some((_, StreamEvent::LateOpen { local_id, remote_id }))) => {
                debug!(local_id, remote_id, "closing stream accepted after we gave up");
                let close = WireMessage::new(Command::Close, local_id, remote_id, Vec::new());
                if inner.send(&close).await.is_err() {
                    break;
                }
            }
            Ok(Some((Some(tx), event))) => {
                // The receiver may be mid-release; its Drop sends the CLSE.
                let _ = tx.send(event);
            }
            Ok(Some((None, event))) => {
                debug!(local_id = event.local_id(), "event for released stream ignored");
            }
            Ok(None) => debug!(command = %msg.command, "frame for closed stream ignored"),
            Err(violation) => {
                warn!("protocol violation, closing connection: {violation}");
                break;
            }
        }
    }

    inner.closed.cancel();
    inner.registry.lock().await.routes.clear();
    debug!("session reader stopped");
}

// ── Streams ───────────────────────────────────────────────────────────────────

/// One logical stream on a [`WireConnection`].
pub struct WireStream {
    local_id: u32,
    remote_id: u32,
    inner: Arc<Inner>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    /// Data that arrived while we were waiting for a write acknowledgement.
    pending: VecDeque<Vec<u8>>,
    max_payload: usize,
    peer_closed: bool,
    /// Set once [`WireStream::close`] has released the stream.
    released: bool,
}

impl WireStream {
    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    /// Sends `data`, split into frames of at most the negotiated maximum.
    ///
    /// Each frame waits for its `OKAY` before the next one goes out.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), WireConnError> {
        for chunk in data.chunks(self.max_payload.max(1)) {
            if self.peer_closed {
                return Err(WireConnError::Closed);
            }
            let remote_id = self.inner.registry.lock().await.table.begin_write(self.local_id)?;
            self.inner
                .send(&WireMessage::new(Command::Write, self.local_id, remote_id, chunk.to_vec()))
                .await?;
            self.await_ack().await?;
        }
        Ok(())
    }

    async fn await_ack(&mut self) -> Result<(), WireConnError> {
        loop {
            match self.events.recv().await {
                Some(StreamEvent::WriteAcked { .. }) => return Ok(()),
                Some(StreamEvent::Data { payload, .. }) => self.pending.push_back(payload),
                Some(StreamEvent::Closed { .. }) => {
                    self.peer_closed = true;
                    return Err(WireConnError::Closed);
                }
                Some(StreamEvent::Opened { .. } | StreamEvent::LateOpen { .. }) => {}
                None => return Err(WireConnError::Closed),
            }
        }
    }

    /// Returns the next chunk of data, or `None` once the device closed the stream.
    ///
    /// Each chunk is acknowledged as it is handed to the caller.
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>, WireConnError> {
        if let Some(payload) = self.pending.pop_front() {
            self.acknowledge().await?;
            return Ok(Some(payload));
        }
        if self.peer_closed {
            return Ok(None);
        }
        loop {
            match self.events.recv().await {
                Some(StreamEvent::Data { payload, .. }) => {
                    self.acknowledge().await?;
                    return Ok(Some(payload));
                }
                Some(StreamEvent::Closed { .. }) => {
                    self.peer_closed = true;
                    return Ok(None);
                }
                Some(_) => {}
                None => return Err(WireConnError::Closed),
            }
        }
    }

    async fn acknowledge(&self) -> Result<(), WireConnError> {
        // Cleared first: the peer may send its next WRTE as soon as it sees the OKAY.
        self.inner.registry.lock().await.table.ack_sent(self.local_id);
        self.inner
            .send(&WireMessage::new(Command::Okay, self.local_id, self.remote_id, Vec::new()))
            .await
    }

    /// Closes the stream from our side.
    pub async fn close(mut self) -> Result<(), WireConnError> {
        self.released = true;
        self.inner.release(self.local_id).await
    }
}

impl Drop for WireStream {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let local_id = self.local_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = inner.release(local_id).await {
                        debug!(local_id, "release of dropped stream: {e}");
                    }
                });
            }
            Err(_) => debug!(local_id, "stream dropped outside a runtime"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
