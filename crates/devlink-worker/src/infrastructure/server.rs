//! Unix-socket server: accept loop and per-connection frame handling.
//!
//! This module is responsible for:
//!
//! 1. Removing a stale socket file and binding `<data-dir>/<name>.sock`.
//! 2. Accepting at most [`MAX_CONCURRENT_CONNECTIONS`] clients at a time.
//!    Further clients wait in the listen backlog until a slot frees up.
//! 3. Running one task per connection that reads frames strictly in order,
//!    feeds them through a fresh [`PrivilegedSession`], and writes one reply
//!    per request.
//! 4. Stopping the accept loop, and every connection, once an authenticated
//!    client sends `SHUTDOWN` or the process is interrupted.
//!
//! # Reading order (for beginners)
//!
//! Every frame starts with a 5-byte header.  The header alone decides whether
//! the payload is read at all:
//!
//! ```text
//! read header ──► type known & length within limit? ──no──► REJECTED, close
//!                              │ yes
//!                              ▼
//!             unauthenticated and not AUTH? ──yes──► REJECTED, close
//!                              │ no
//!                              ▼
//!                 read payload, decode, admit, reply
//! ```
//!
//! So an unauthenticated client can never make the worker allocate more than
//! the small AUTH maximum.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use devlink_core::protocol::privileged::{
    check_request_header, FrameHeader, Reply, ReplyType, Request, FRAME_HEADER_SIZE,
};
use devlink_core::{Admission, AuthToken, PrivilegedSession};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::startup::StartupError;
use crate::application::inject_input::InjectInputUseCase;

/// Connections served at the same time.
pub const MAX_CONCURRENT_CONNECTIONS: usize = 4;

/// How long a connection may sit between (or inside) frames.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Reply text for refused frames; the reason is only logged.
const REJECTED: &str = "rejected";

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// The client closed its end between frames.
    PeerClosed,
    /// The worker closed the connection after a rejection or failed AUTH.
    Closed,
    /// No complete frame arrived within the idle timeout.
    IdleTimeout,
    /// The worker is stopping.
    ShuttingDown,
}

/// State shared by every connection task.
pub struct ServerContext {
    token: Arc<AuthToken>,
    use_case: Arc<InjectInputUseCase>,
    shutdown: CancellationToken,
    idle_timeout: Duration,
    slots: Arc<Semaphore>,
    started: Instant,
}

impl ServerContext {
    pub fn new(
        token: AuthToken,
        use_case: Arc<InjectInputUseCase>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            token: Arc::new(token),
            use_case,
            shutdown,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            slots: Arc::new(Semaphore::new(MAX_CONCURRENT_CONNECTIONS)),
            started: Instant::now(),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// The one-line answer to `STATUS`.
    pub fn status_line(&self) -> String {
        format!(
            "up {}s, {} of {} connections, {} events injected",
            self.started.elapsed().as_secs(),
            MAX_CONCURRENT_CONNECTIONS - self.slots.available_permits(),
            MAX_CONCURRENT_CONNECTIONS,
            self.use_case.events_injected(),
        )
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// A bound worker socket, ready to [`run`](WorkerServer::run).
pub struct WorkerServer {
    listener: UnixListener,
    path: PathBuf,
    context: Arc<ServerContext>,
}

impl WorkerServer {
    /// Binds the socket at `path`, replacing a stale socket file.
    ///
    /// Must be called from inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::Bind`] if the old file cannot be removed or the
    /// socket cannot be bound.
    pub fn bind(path: &Path, context: ServerContext) -> Result<Self, StartupError> {
        let bind_error = |source| StartupError::Bind {
            path: path.to_path_buf(),
            source,
        };
        match std::fs::remove_file(path) {
            Ok(()) => info!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(bind_error(e)),
        }
        let listener = UnixListener::bind(path).map_err(bind_error)?;
        info!(path = %path.display(), "worker listening");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            context: Arc::new(context),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Accepts connections until the shutdown token fires, then waits for
    /// open connections to finish and removes the socket file.
    pub async fn run(self) {
        let ctx = &self.context;
        let tracker = TaskTracker::new();

        loop {
            // Take a slot before accepting so a fifth client stays in the backlog.
            let permit = tokio::select! {
                biased;
                _ = ctx.shutdown.cancelled() => break,
                permit = Arc::clone(&ctx.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let stream = tokio::select! {
                biased;
                _ = ctx.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        error!("accept error: {e}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            let ctx = Arc::clone(&self.context);
            let conn_id = Uuid::new_v4();
            tracker.spawn(
                async move {
                    let _permit = permit;
                    handle_connection(stream, ctx).await;
                }
                .instrument(info_span!("connection", id = %conn_id)),
            );
        }

        info!("worker stopping");
        tracker.close();
        tracker.wait().await;
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "could not remove socket: {e}");
        }
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection<S>(stream: S, ctx: Arc<ServerContext>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("accepted");
    match serve_connection(stream, &ctx).await {
        Ok(end) => info!(?end, "connection ended"),
        Err(e) => warn!("connection ended with error: {e}"),
    }
}

/// Serves one connection until it ends.
///
/// Each call starts a fresh [`PrivilegedSession`], so failed-AUTH counts never
/// carry over between connections.
///
/// # Errors
///
/// Returns any I/O error other than a clean close between frames.
pub async fn serve_connection<S>(mut stream: S, ctx: &ServerContext) -> std::io::Result<ConnectionEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = PrivilegedSession::new(Arc::clone(&ctx.token));

    loop {
        // ── Header ────────────────────────────────────────────────────────────
        let mut raw = [0u8; FRAME_HEADER_SIZE];
        let read = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => return Ok(ConnectionEnd::ShuttingDown),
            read = timeout(ctx.idle_timeout, stream.read_exact(&mut raw)) => read,
        };
        match read {
            Err(_) => return Ok(ConnectionEnd::IdleTimeout),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(ConnectionEnd::PeerClosed)
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(_)) => {}
        }

        let header = FrameHeader::parse(raw);
        let kind = match check_request_header(&header) {
            Ok(kind) => kind,
            Err(e) => {
                warn!("bad frame header: {e}");
                session.close();
                write_reply(&mut stream, &Reply::new(ReplyType::Rejected, REJECTED), ctx).await?;
                return Ok(ConnectionEnd::Closed);
            }
        };

        if let Some(admission) = session.screen(kind) {
            debug!(?kind, ?admission, "refused before payload");
            if let Some(reply) = reply_without_request(admission) {
                write_reply(&mut stream, &reply, ctx).await?;
            }
            return Ok(ConnectionEnd::Closed);
        }

        // ── Payload ───────────────────────────────────────────────────────────
        // May hold a token candidate.
        let mut payload = Zeroizing::new(vec![0u8; header.length as usize]);
        match timeout(ctx.idle_timeout, stream.read_exact(&mut payload)).await {
            Err(_) => return Ok(ConnectionEnd::IdleTimeout),
            Ok(result) => {
                result?;
            }
        }

        let request = match Request::decode(kind, &payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(?kind, "malformed request: {e}");
                session.close();
                write_reply(&mut stream, &Reply::new(ReplyType::Rejected, REJECTED), ctx).await?;
                return Ok(ConnectionEnd::Closed);
            }
        };

        // ── Admission ─────────────────────────────────────────────────────────
        let admission = session.admit(&request);
        debug!(?kind, ?admission, "request admitted");
        let reply = match admission {
            Admission::Execute => Some(ctx.use_case.execute(&request).await),
            Admission::Status => Some(Reply::ok(ctx.status_line())),
            Admission::Shutdown => Some(Reply::ok("shutting down")),
            other => reply_without_request(other),
        };
        if let Some(reply) = reply {
            write_reply(&mut stream, &reply, ctx).await?;
        }

        match admission {
            Admission::Authenticated => info!("client authenticated"),
            Admission::AuthFailed { remaining } => warn!(remaining, "authentication failed"),
            Admission::AuthFailedClose => warn!("authentication failed; closing"),
            Admission::Shutdown => {
                info!("shutdown requested");
                ctx.shutdown.cancel();
                return Ok(ConnectionEnd::ShuttingDown);
            }
            _ => {}
        }
        if admission.closes_connection() {
            return Ok(ConnectionEnd::Closed);
        }
    }
}

/// Replies for admissions that need nothing beyond the session state.
fn reply_without_request(admission: Admission) -> Option<Reply> {
    match admission {
        Admission::Authenticated => Some(Reply::ok("authenticated")),
        Admission::AlreadyAuthenticated => Some(Reply::ok("already authenticated")),
        Admission::AuthFailed { remaining } => Some(Reply::new(
            ReplyType::AuthFailed,
            format!("{remaining} attempts left"),
        )),
        Admission::AuthFailedClose => Some(Reply::new(ReplyType::AuthFailed, "too many attempts")),
        Admission::RejectAndClose => Some(Reply::new(ReplyType::Rejected, "authenticate first")),
        Admission::Execute | Admission::Status | Admission::Shutdown | Admission::Drop => None,
    }
}

async fn write_reply<S>(stream: &mut S, reply: &Reply, ctx: &ServerContext) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let frame = reply.encode();
    match timeout(ctx.idle_timeout, async {
        stream.write_all(&frame).await?;
        stream.flush().await
    })
    .await
    {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "reply write timed out",
        )),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::injector::mock::{MockInputInjector, RecordedEvent};
    use devlink_core::protocol::privileged::{encode_frame, InputCommand, RequestType};
    use tokio_test::io::Builder;

    fn context(token: &AuthToken) -> (ServerContext, Arc<MockInputInjector>) {
        let injector = Arc::new(MockInputInjector::new());
        let use_case = Arc::new(InjectInputUseCase::new(
            Arc::clone(&injector) as Arc<dyn crate::application::inject_input::InputInjector>
        ));
        let ctx = ServerContext::new(token.clone(), use_case, CancellationToken::new());
        (ctx, injector)
    }

    fn auth(bytes: &[u8]) -> Vec<u8> {
        Request::auth(bytes).encode().unwrap()
    }

    fn reply(kind: ReplyType, message: &str) -> Vec<u8> {
        Reply::new(kind, message).encode()
    }

    #[tokio::test]
    async fn test_tap_after_auth_is_injected() {
        // Arrange
        let token = AuthToken::generate();
        let (ctx, injector) = context(&token);
        let tap = Request::Input(InputCommand::Tap { x: 7, y: 9 }).encode().unwrap();
        let mock = Builder::new()
            .read(&auth(token.as_bytes()))
            .write(&reply(ReplyType::Ok, "authenticated"))
            .read(&tap)
            .write(&reply(ReplyType::Ok, "injected 1"))
            .build();

        // Act
        let end = serve_connection(mock, &ctx).await.unwrap();

        // Assert
        assert_eq!(end, ConnectionEnd::PeerClosed);
        assert_eq!(injector.recorded(), vec![RecordedEvent::Tap(7, 9)]);
    }

    #[tokio::test]
    async fn test_request_before_auth_is_rejected_without_reading_payload() {
        let token = AuthToken::generate();
        let (ctx, injector) = context(&token);
        // Only the header is scripted: reading the payload would fail the mock.
        let tap = Request::Input(InputCommand::Tap { x: 1, y: 1 }).encode().unwrap();
        let mock = Builder::new()
            .read(&tap[..FRAME_HEADER_SIZE])
            .write(&reply(ReplyType::Rejected, "authenticate first"))
            .build();

        let end = serve_connection(mock, &ctx).await.unwrap();

        assert_eq!(end, ConnectionEnd::Closed);
        assert!(injector.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_third_bad_token_closes() {
        let token = AuthToken::generate();
        let (ctx, _) = context(&token);
        let wrong = auth(&[0u8; 32]);
        let mock = Builder::new()
            .read(&wrong)
            .write(&reply(ReplyType::AuthFailed, "2 attempts left"))
            .read(&wrong)
            .write(&reply(ReplyType::AuthFailed, "1 attempts left"))
            .read(&wrong)
            .write(&reply(ReplyType::AuthFailed, "too many attempts"))
            .build();

        let end = serve_connection(mock, &ctx).await.unwrap();

        assert_eq!(end, ConnectionEnd::Closed);
    }

    #[tokio::test]
    async fn test_oversized_header_is_rejected() {
        let token = AuthToken::generate();
        let (ctx, _) = context(&token);
        let header = FrameHeader {
            frame_type: RequestType::Auth as u8,
            length: 1_000_000,
        };
        let mock = Builder::new()
            .read(&header.to_bytes())
            .write(&reply(ReplyType::Rejected, "rejected"))
            .build();

        let end = serve_connection(mock, &ctx).await.unwrap();

        assert_eq!(end, ConnectionEnd::Closed);
    }

    #[tokio::test]
    async fn test_unknown_frame_type_is_rejected() {
        let token = AuthToken::generate();
        let (ctx, _) = context(&token);
        let frame = encode_frame(0x42, &[]);
        let mock = Builder::new()
            .read(&frame)
            .write(&reply(ReplyType::Rejected, "rejected"))
            .build();

        assert_eq!(serve_connection(mock, &ctx).await.unwrap(), ConnectionEnd::Closed);
    }

    #[tokio::test]
    async fn test_malformed_request_reply_does_not_explain_the_limit() {
        // Arrange – a 4-byte tap passes the header check but not the decoder
        let token = AuthToken::generate();
        let (ctx, injector) = context(&token);
        let mock = Builder::new()
            .read(&auth(token.as_bytes()))
            .write(&reply(ReplyType::Ok, "authenticated"))
            .read(&encode_frame(RequestType::Tap as u8, &[0, 0, 0, 1]))
            .write(&reply(ReplyType::Rejected, "rejected"))
            .build();

        // Act
        let end = serve_connection(mock, &ctx).await.unwrap();

        // Assert
        assert_eq!(end, ConnectionEnd::Closed);
        assert!(injector.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_the_worker() {
        // Arrange
        let token = AuthToken::generate();
        let (ctx, _) = context(&token);
        let mock = Builder::new()
            .read(&auth(token.as_bytes()))
            .write(&reply(ReplyType::Ok, "authenticated"))
            .read(&Request::Shutdown.encode().unwrap())
            .write(&reply(ReplyType::Ok, "shutting down"))
            .build();

        // Act
        let end = serve_connection(mock, &ctx).await.unwrap();

        // Assert
        assert_eq!(end, ConnectionEnd::ShuttingDown);
        assert!(ctx.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_status_line_counts_injected_events() {
        let token = AuthToken::generate();
        let (ctx, _) = context(&token);
        ctx.use_case
            .execute(&Request::Input(InputCommand::Key { code: 4 }))
            .await;

        let status = ctx.status_line();

        assert!(status.ends_with("1 events injected"), "{status}");
        assert!(status.contains("0 of 4 connections"), "{status}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_times_out() {
        let token = AuthToken::generate();
        let (ctx, _) = context(&token);
        let ctx = ctx.with_idle_timeout(Duration::from_secs(5));
        let (_client, server) = tokio::io::duplex(64);

        let end = serve_connection(server, &ctx).await.unwrap();

        assert_eq!(end, ConnectionEnd::IdleTimeout);
    }
}
