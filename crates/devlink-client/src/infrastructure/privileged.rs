//! Client side of the privileged command channel.
//!
//! The worker listens on a Unix socket at `<data-dir>/<name>.sock` and trusts
//! only clients that present the 32-byte token stored in
//! `<data-dir>/worker.token`.  This module creates that token and talks to
//! the worker:
//!
//! - [`init_token`] writes a fresh token (owner read/write only).
//! - [`PrivilegedClient::connect_and_authenticate`] connects, sends `AUTH`, and
//!   only returns a client once the worker answered `OK`.
//! - [`probe`] checks reachability by connecting and closing.  It sends
//!   nothing, not even a read-only `STATUS`.
//!
//! There is no session resumption.  After any I/O error, drop the client and
//! authenticate again on a new connection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use devlink_core::protocol::privileged::{
    FrameHeader, InputCommand, PrivilegedError, Reply, ReplyType, Request, FRAME_HEADER_SIZE,
    MAX_REPLY_PAYLOAD, TOKEN_FILE_NAME,
};
use devlink_core::{AuthToken, ErrorClass};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::storage::write_private_file;

/// Error type for privileged-channel operations.
#[derive(Debug, Error)]
pub enum PrivilegedClientError {
    #[error("could not reach worker at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker did not answer within {0:?}")]
    Timeout(Duration),

    #[error("privileged frame error: {0}")]
    Frame(#[from] PrivilegedError),

    #[error("worker reply of {0} bytes exceeds the limit")]
    ReplyTooLarge(u32),

    /// The worker refused the token.
    #[error("worker rejected the token: {0}")]
    AuthFailed(String),

    /// The worker refused a request and closed the connection.
    #[error("worker rejected the request: {0}")]
    Rejected(String),

    /// The worker accepted the request but could not carry it out.
    #[error("worker failed the request: {0}")]
    Failed(String),

    #[error("token file error at {path}: {source}")]
    Token {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PrivilegedClientError {
    /// Classifies this error for the caller's attempt boundary.
    pub fn class(&self) -> ErrorClass {
        match self {
            PrivilegedClientError::Connect { .. }
            | PrivilegedClientError::Io(_)
            | PrivilegedClientError::Timeout(_)
            | PrivilegedClientError::Token { .. }
            | PrivilegedClientError::Failed(_) => ErrorClass::TransientIo,
            PrivilegedClientError::Frame(e) => e.class(),
            PrivilegedClientError::ReplyTooLarge(_) | PrivilegedClientError::Rejected(_) => {
                ErrorClass::ResourceLimitExceeded
            }
            PrivilegedClientError::AuthFailed(_) => ErrorClass::AuthenticationRejected,
        }
    }
}

// ── Token file ────────────────────────────────────────────────────────────────

/// Path of the token file inside `data_dir`.
pub fn token_path(data_dir: &Path) -> PathBuf {
    data_dir.join(TOKEN_FILE_NAME)
}

/// Generates a new token and writes it to `<data_dir>/worker.token`.
///
/// Any previous token is replaced; a running worker keeps the token it loaded
/// at startup until restarted.
pub fn init_token(data_dir: &Path) -> Result<AuthToken, PrivilegedClientError> {
    let path = token_path(data_dir);
    let token = AuthToken::generate();
    write_private_file(&path, token.as_bytes())
        .map_err(|source| PrivilegedClientError::Token { path: path.clone(), source })?;
    info!(path = %path.display(), "worker token written");
    Ok(token)
}

/// Reads the token from `<data_dir>/worker.token`.
pub fn read_token(data_dir: &Path) -> Result<AuthToken, PrivilegedClientError> {
    let path = token_path(data_dir);
    let bytes = std::fs::read(&path)
        .map_err(|source| PrivilegedClientError::Token { path: path.clone(), source })?;
    AuthToken::from_bytes(&bytes).map_err(|e| PrivilegedClientError::Token {
        path,
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
    })
}

// ── Probe ─────────────────────────────────────────────────────────────────────

/// Returns `true` if a worker accepts connections at `socket_path`.
///
/// Connect-then-close only; no frame is sent.
pub async fn probe(socket_path: &Path) -> bool {
    match UnixStream::connect(socket_path).await {
        Ok(mut stream) => {
            let _ = stream.shutdown().await;
            true
        }
        Err(e) => {
            debug!(path = %socket_path.display(), "probe failed: {e}");
            false
        }
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// An authenticated connection to the privileged worker.
#[derive(Debug)]
pub struct PrivilegedClient {
    stream: UnixStream,
    timeout: Duration,
}

impl PrivilegedClient {
    /// Connects to the worker and authenticates with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegedClientError::AuthFailed`] when the worker answers
    /// anything but `OK`.
    pub async fn connect_and_authenticate(
        socket_path: &Path,
        token: &AuthToken,
        timeout: Duration,
    ) -> Result<Self, PrivilegedClientError> {
        let stream = match tokio::time::timeout(timeout, UnixStream::connect(socket_path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(PrivilegedClientError::Connect {
                    path: socket_path.to_path_buf(),
                    source,
                })
            }
            Err(_) => return Err(PrivilegedClientError::Timeout(timeout)),
        };

        let mut client = Self { stream, timeout };
        let reply = client.exchange(&Request::auth(token.as_bytes())).await?;
        match reply.kind {
            ReplyType::Ok => {
                debug!("authenticated to worker");
                Ok(client)
            }
            _ => Err(PrivilegedClientError::AuthFailed(reply.message)),
        }
    }

    /// Sends one request and returns the worker's `OK` reply.
    ///
    /// # Errors
    ///
    /// Maps `REJECTED`, `ERROR` and `AUTH_FAILED` replies to errors.
    pub async fn send(&mut self, request: &Request) -> Result<Reply, PrivilegedClientError> {
        let reply = self.exchange(request).await?;
        match reply.kind {
            ReplyType::Ok => Ok(reply),
            ReplyType::AuthFailed => Err(PrivilegedClientError::AuthFailed(reply.message)),
            ReplyType::Rejected => Err(PrivilegedClientError::Rejected(reply.message)),
            ReplyType::Error => Err(PrivilegedClientError::Failed(reply.message)),
        }
    }

    /// Injects one input event.
    pub async fn inject(&mut self, command: InputCommand) -> Result<Reply, PrivilegedClientError> {
        self.send(&Request::Input(command)).await
    }

    /// Injects a batch of events in order.
    pub async fn inject_batch(
        &mut self,
        commands: Vec<InputCommand>,
    ) -> Result<Reply, PrivilegedClientError> {
        self.send(&Request::Batch(commands)).await
    }

    /// Asks the worker for its status line.
    pub async fn status(&mut self) -> Result<String, PrivilegedClientError> {
        Ok(self.send(&Request::Status).await?.message)
    }

    /// Asks the worker to stop.  Consumes the client: the connection ends.
    pub async fn shutdown(mut self) -> Result<Reply, PrivilegedClientError> {
        self.send(&Request::Shutdown).await
    }

    async fn exchange(&mut self, request: &Request) -> Result<Reply, PrivilegedClientError> {
        let frame = Zeroizing::new(request.encode()?);
        let timeout = self.timeout;
        let stream = &mut self.stream;
        let io = async move {
            stream.write_all(&frame).await?;
            stream.flush().await?;

            let mut raw = [0u8; FRAME_HEADER_SIZE];
            stream.read_exact(&mut raw).await?;
            let header = FrameHeader::parse(raw);
            if header.length > MAX_REPLY_PAYLOAD {
                return Err(PrivilegedClientError::ReplyTooLarge(header.length));
            }
            let mut payload = vec![0u8; header.length as usize];
            stream.read_exact(&mut payload).await?;
            Ok(Reply::decode(header.frame_type, &payload)?)
        };
        tokio::time::timeout(timeout, io)
            .await
            .map_err(|_| PrivilegedClientError::Timeout(timeout))?
    }
}
