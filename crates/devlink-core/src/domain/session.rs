//! Authentication state machine for one privileged-channel connection.
//!
//! ```text
//!            AUTH ok                        SHUTDOWN
//! Unauthenticated ──────────► Authenticated ─────────► Closed
//!   │   ▲                                                ▲
//!   │   └── AUTH bad (failures < 3)                      │
//!   ├── AUTH bad (3rd failure) ──────────────────────────┤
//!   └── any other request ───────────────────────────────┘
//! ```
//!
//! The failure counter belongs to the connection and is never reset: only a
//! new connection starts again from zero.  Once a session is `Closed` every
//! further request is dropped unprocessed.

use std::sync::Arc;

use crate::crypto::token::AuthToken;
use crate::protocol::privileged::{Request, RequestType};

/// Consecutive failed AUTH attempts after which the connection is closed.
pub const MAX_AUTH_FAILURES: u32 = 3;

/// Where a connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unauthenticated { failed_attempts: u32 },
    Authenticated,
    Closed,
}

/// What the worker must do with one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Token accepted: reply `OK`.
    Authenticated,
    /// Token rejected, connection stays open: reply `AUTH_FAILED`.
    AuthFailed { remaining: u32 },
    /// Token rejected for the last time: reply `AUTH_FAILED`, then close.
    AuthFailedClose,
    /// Request before authentication: reply `REJECTED`, then close.
    RejectAndClose,
    /// AUTH on an already-authenticated connection: reply `OK`, no change.
    AlreadyAuthenticated,
    /// Run the input request and reply with its outcome.
    Execute,
    /// Reply with worker status.
    Status,
    /// Reply `OK`, close the connection, and stop the worker.
    Shutdown,
    /// Session already closed: do nothing.
    Drop,
}

impl Admission {
    /// Whether the connection must be closed after replying.
    pub fn closes_connection(self) -> bool {
        matches!(
            self,
            Admission::AuthFailedClose
                | Admission::RejectAndClose
                | Admission::Shutdown
                | Admission::Drop
        )
    }
}

/// Per-connection session; created on accept and owned by the connection task.
#[derive(Debug)]
pub struct PrivilegedSession {
    token: Arc<AuthToken>,
    state: ChannelState,
}

impl PrivilegedSession {
    pub fn new(token: Arc<AuthToken>) -> Self {
        Self {
            token,
            state: ChannelState::Unauthenticated { failed_attempts: 0 },
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ChannelState::Authenticated
    }

    /// Checks a request kind from its header alone, before the payload is read.
    ///
    /// Returns `Some(RejectAndClose)` (and closes the session) for anything
    /// but AUTH on an unauthenticated connection, and `Some(Drop)` once closed.
    pub fn screen(&mut self, kind: RequestType) -> Option<Admission> {
        match self.state {
            ChannelState::Closed => Some(Admission::Drop),
            ChannelState::Unauthenticated { .. } if kind != RequestType::Auth => {
                self.state = ChannelState::Closed;
                Some(Admission::RejectAndClose)
            }
            _ => None,
        }
    }

    /// Decides what to do with a decoded request, advancing the state machine.
    pub fn admit(&mut self, request: &Request) -> Admission {
        match (self.state, request) {
            (ChannelState::Closed, _) => Admission::Drop,

            (ChannelState::Unauthenticated { failed_attempts }, Request::Auth(candidate)) => {
                if self.token.matches(candidate) {
                    self.state = ChannelState::Authenticated;
                    return Admission::Authenticated;
                }
                let failed_attempts = failed_attempts + 1;
                if failed_attempts >= MAX_AUTH_FAILURES {
                    self.state = ChannelState::Closed;
                    Admission::AuthFailedClose
                } else {
                    self.state = ChannelState::Unauthenticated { failed_attempts };
                    Admission::AuthFailed {
                        remaining: MAX_AUTH_FAILURES - failed_attempts,
                    }
                }
            }

            (ChannelState::Unauthenticated { .. }, _) => {
                self.state = ChannelState::Closed;
                Admission::RejectAndClose
            }

            (ChannelState::Authenticated, Request::Auth(_)) => Admission::AlreadyAuthenticated,
            (ChannelState::Authenticated, Request::Input(_) | Request::Batch(_)) => {
                Admission::Execute
            }
            (ChannelState::Authenticated, Request::Status) => Admission::Status,
            (ChannelState::Authenticated, Request::Shutdown) => {
                self.state = ChannelState::Closed;
                Admission::Shutdown
            }
        }
    }

    /// Marks the session closed after a disconnect or framing error.
    pub fn close(&mut self) {
        self.state = ChannelState::Closed;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
