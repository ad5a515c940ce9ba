//! Stream bookkeeping for one wire-protocol connection.
//!
//! Logical streams are multiplexed over the single TCP connection.  Each side
//! numbers its own end of a stream; frames carry both ids:
//!
//! ```text
//! client                         server
//!   OPEN(local=1, 0, "shell:ls") →
//!                                ← OKAY(remote=7, local=1)     stream ready
//!   WRTE(1, 7, data)             →
//!                                ← OKAY(7, 1)                  write acked
//!                                ← WRTE(7, 1, output)
//!   OKAY(1, 7)                   →
//!                                ← CLSE(7, 1)                  stream closed
//! ```
//!
//! Writes are strictly stop-and-wait in both directions.  After our `WRTE`
//! the stream sits in `AwaitingAck` and refuses another write until the
//! peer's `OKAY` arrives.  After the peer's `WRTE` the stream owes an `OKAY`,
//! and a second `WRTE` before [`StreamTable::ack_sent`] is a violation, so at
//! most one unacknowledged inbound payload exists per stream.
//! [`StreamTable`] is a pure state machine; the connection layer feeds it
//! every inbound frame and acts on the returned [`StreamEvent`].  Any frame
//! that does not fit the stream's current state is a [`ProtocolViolation`]
//! and the caller tears down the whole connection.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::error::ErrorClass;
use crate::protocol::wire::{Command, WireMessage};

/// Per-stream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// `OPEN` sent, waiting for the peer's `OKAY`.
    Opening,
    /// Open and idle; a write may be sent.
    Ready { remote_id: u32 },
    /// A write is outstanding.
    AwaitingAck { remote_id: u32 },
    /// Closed locally; late frames from the peer are ignored.
    Closed,
    /// Given up on while `Opening`; a late `OKAY` is answered with `CLSE`.
    Abandoned,
}

/// What an inbound frame meant for a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The peer accepted our `OPEN`.
    Opened { local_id: u32, remote_id: u32 },
    /// The peer acknowledged our last write.
    WriteAcked { local_id: u32 },
    /// The peer sent data; the caller must reply `OKAY(local_id, remote_id)`.
    Data {
        local_id: u32,
        remote_id: u32,
        payload: Vec<u8>,
    },
    /// The peer closed the stream (or refused to open it).
    Closed { local_id: u32 },
    /// The peer accepted an `OPEN` we already gave up on; the caller must
    /// send `CLSE(local_id, remote_id)`.
    LateOpen { local_id: u32, remote_id: u32 },
}

impl StreamEvent {
    /// The local stream this event belongs to.
    pub fn local_id(&self) -> u32 {
        match self {
            StreamEvent::Opened { local_id, .. }
            | StreamEvent::WriteAcked { local_id }
            | StreamEvent::Data { local_id, .. }
            | StreamEvent::Closed { local_id }
            | StreamEvent::LateOpen { local_id, .. } => *local_id,
        }
    }
}

/// A frame that the connection must not accept.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("{command} is not valid on an established connection")]
    UnexpectedCommand { command: Command },

    #[error("{command} for unknown stream {local_id}")]
    UnknownStream { command: Command, local_id: u32 },

    #[error("{command} for stream {local_id} in state {state:?}")]
    WrongState {
        command: Command,
        local_id: u32,
        state: StreamState,
    },

    #[error("stream {local_id} expected remote id {expected}, got {actual}")]
    RemoteIdMismatch {
        local_id: u32,
        expected: u32,
        actual: u32,
    },

    #[error("write on stream {local_id} before the previous write was acknowledged")]
    WriteWhileAwaitingAck { local_id: u32 },

    #[error("peer wrote to stream {local_id} before its previous write was acknowledged")]
    UnacknowledgedInbound { local_id: u32 },
}

impl ProtocolViolation {
    /// Classifies this error for the caller's attempt boundary.
    pub fn class(&self) -> ErrorClass {
        ErrorClass::PairingProtocol
    }
}

/// All streams on one connection, keyed by local id.
#[derive(Debug)]
pub struct StreamTable {
    streams: HashMap<u32, StreamState>,
    /// Streams holding a peer `WRTE` we have not yet answered with `OKAY`.
    inbound_unacked: HashSet<u32>,
    next_id: u32,
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTable {
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
            inbound_unacked: HashSet::new(),
            next_id: 1,
        }
    }

    /// Allocates a new local id in the `Opening` state.
    pub fn open(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.streams.insert(id, StreamState::Opening);
        id
    }

    /// Current state of a stream, if it is known.
    pub fn state(&self, local_id: u32) -> Option<StreamState> {
        self.streams.get(&local_id).copied()
    }

    /// Number of streams still tracked (including locally-closed ones).
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Marks a write as outstanding and returns the remote id to address it to.
    ///
    /// # Errors
    ///
    /// Fails unless the stream is `Ready`.
    pub fn begin_write(&mut self, local_id: u32) -> Result<u32, ProtocolViolation> {
        let state = self
            .streams
            .get_mut(&local_id)
            .ok_or(ProtocolViolation::UnknownStream {
                command: Command::Write,
                local_id,
            })?;

        match *state {
            StreamState::Ready { remote_id } => {
                *state = StreamState::AwaitingAck { remote_id };
                Ok(remote_id)
            }
            StreamState::AwaitingAck { .. } => {
                Err(ProtocolViolation::WriteWhileAwaitingAck { local_id })
            }
            other => Err(ProtocolViolation::WrongState {
                command: Command::Write,
                local_id,
                state: other,
            }),
        }
    }

    /// Records that the `OKAY` for the peer's last `WRTE` is going out.
    ///
    /// Call this before sending the `OKAY`; the peer may answer it at once.
    pub fn ack_sent(&mut self, local_id: u32) {
        self.inbound_unacked.remove(&local_id);
    }

    /// Returns `true` while the peer's last `WRTE` on `local_id` is unanswered.
    pub fn owes_ack(&self, local_id: u32) -> bool {
        self.inbound_unacked.contains(&local_id)
    }

    /// Closes a stream from our side.
    ///
    /// Returns the remote id when a `CLSE` should be sent to the peer.
    pub fn close_local(&mut self, local_id: u32) -> Option<u32> {
        self.inbound_unacked.remove(&local_id);
        let state = self.streams.get_mut(&local_id)?;
        let (next, remote) = match *state {
            StreamState::Ready { remote_id } | StreamState::AwaitingAck { remote_id } => {
                (StreamState::Closed, Some(remote_id))
            }
            StreamState::Opening | StreamState::Abandoned => (StreamState::Abandoned, None),
            StreamState::Closed => (StreamState::Closed, None),
        };
        *state = next;
        remote
    }

    fn remove(&mut self, local_id: u32) {
        self.streams.remove(&local_id);
        self.inbound_unacked.remove(&local_id);
    }

    /// Applies one inbound frame.
    ///
    /// Returns `Ok(None)` for frames addressed to a stream we already closed.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolViolation`] for any frame that does not fit the
    /// addressed stream's state.
    pub fn on_message(&mut self, msg: &WireMessage) -> Result<Option<StreamEvent>, ProtocolViolation> {
        let remote_id = msg.arg0;
        let local_id = msg.arg1;

        match msg.command {
            Command::Connect | Command::Auth | Command::Open => {
                Err(ProtocolViolation::UnexpectedCommand {
                    command: msg.command,
                })
            }
            Command::Okay => self.on_okay(local_id, remote_id),
            Command::Write => self.on_write(local_id, remote_id, &msg.payload),
            Command::Close => self.on_close(local_id, remote_id),
        }
    }

    fn on_okay(&mut self, local_id: u32, remote_id: u32) -> Result<Option<StreamEvent>, ProtocolViolation> {
        let state = self
            .streams
            .get_mut(&local_id)
            .ok_or(ProtocolViolation::UnknownStream {
                command: Command::Okay,
                local_id,
            })?;

        match *state {
            StreamState::Opening => {
                *state = StreamState::Ready { remote_id };
                Ok(Some(StreamEvent::Opened {
                    local_id,
                    remote_id,
                }))
            }
            StreamState::AwaitingAck { remote_id: expected } => {
                check_remote(local_id, expected, remote_id)?;
                *state = StreamState::Ready { remote_id };
                Ok(Some(StreamEvent::WriteAcked { local_id }))
            }
            StreamState::Closed => Ok(None),
            StreamState::Abandoned => {
                *state = StreamState::Closed;
                Ok(Some(StreamEvent::LateOpen {
                    local_id,
                    remote_id,
                }))
            }
            other @ StreamState::Ready { .. } => Err(ProtocolViolation::WrongState {
                command: Command::Okay,
                local_id,
                state: other,
            }),
        }
    }

    fn on_write(
        &mut self,
        local_id: u32,
        remote_id: u32,
        payload: &[u8],
    ) -> Result<Option<StreamEvent>, ProtocolViolation> {
        let state = self
            .streams
            .get(&local_id)
            .copied()
            .ok_or(ProtocolViolation::UnknownStream {
                command: Command::Write,
                local_id,
            })?;

        match state {
            StreamState::Ready { remote_id: expected }
            | StreamState::AwaitingAck { remote_id: expected } => {
                check_remote(local_id, expected, remote_id)?;
                if !self.inbound_unacked.insert(local_id) {
                    return Err(ProtocolViolation::UnacknowledgedInbound { local_id });
                }
                Ok(Some(StreamEvent::Data {
                    local_id,
                    remote_id,
                    payload: payload.to_vec(),
                }))
            }
            StreamState::Closed => Ok(None),
            StreamState::Opening | StreamState::Abandoned => Err(ProtocolViolation::WrongState {
                command: Command::Write,
                local_id,
                state,
            }),
        }
    }

    fn on_close(&mut self, local_id: u32, remote_id: u32) -> Result<Option<StreamEvent>, ProtocolViolation> {
        let state = self
            .streams
            .get(&local_id)
            .copied()
            .ok_or(ProtocolViolation::UnknownStream {
                command: Command::Close,
                local_id,
            })?;

        match state {
            StreamState::Ready { remote_id: expected }
            | StreamState::AwaitingAck { remote_id: expected } => {
                check_remote(local_id, expected, remote_id)?;
            }
            // A CLSE while opening means the peer refused the destination.
            StreamState::Opening => {}
            StreamState::Closed | StreamState::Abandoned => {
                self.remove(local_id);
                return Ok(None);
            }
        }
        self.remove(local_id);
        Ok(Some(StreamEvent::Closed { local_id }))
    }
}

fn check_remote(local_id: u32, expected: u32, actual: u32) -> Result<(), ProtocolViolation> {
    if expected == actual {
        Ok(())
    } else {
        Err(ProtocolViolation::RemoteIdMismatch {
            local_id,
            expected,
            actual,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
