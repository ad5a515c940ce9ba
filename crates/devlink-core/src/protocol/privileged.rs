//! Frame codec for the privileged command channel.
//!
//! Every request and reply is one frame:
//!
//! ```text
//! [type:1][length:4 BE][payload:length]
//! ```
//!
//! # Limits are enforced from the header (for beginners)
//!
//! A hostile or buggy client could declare a 4 GiB payload.  If the worker
//! allocated a buffer of that size before looking at it, one connection could
//! exhaust memory.  [`check_request_header`] therefore rejects a frame using
//! only its 5 header bytes: the length must fit the global maximum *and* the
//! largest payload the request kind can legitimately have.  Counts inside the
//! payload (events per batch, points per path) are checked again when the
//! payload is decoded.
//!
//! # Payload layouts
//!
//! | Type | Payload |
//! |------|---------|
//! | `AUTH` | raw token bytes |
//! | `TAP` | `x:i32 BE, y:i32 BE` |
//! | `MOTION` | `duration_ms:u32 BE, count:u16 BE, count × (x:i32, y:i32)` |
//! | `KEY` | `keycode:u32 BE` |
//! | `TEXT` | UTF-8 bytes |
//! | `BATCH` | `count:u16 BE, count × [type:1][length:4][payload]` |
//! | `STATUS`, `SHUTDOWN` | empty |

use thiserror::Error;
use zeroize::Zeroizing;

use crate::error::ErrorClass;

/// Size of the frame header.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Largest payload any frame may declare.
pub const MAX_FRAME_PAYLOAD: u32 = 64 * 1024;

/// Most events accepted in one `BATCH`.
pub const MAX_BATCH_EVENTS: usize = 64;

/// Most points accepted in one motion path.
pub const MAX_PATH_POINTS: usize = 512;

/// Longest `TEXT` payload in bytes.
pub const MAX_TEXT_BYTES: usize = 4096;

/// Longest `AUTH` payload; anything longer cannot be a token.
pub const MAX_AUTH_PAYLOAD: u32 = 256;

/// Largest reply payload a worker sends; longer messages are truncated.
pub const MAX_REPLY_PAYLOAD: u32 = 1024;

/// Name of the shared token file inside the data directory.
pub const TOKEN_FILE_NAME: &str = "worker.token";

/// File name of the worker's socket inside the data directory.
pub fn socket_file_name(socket_name: &str) -> String {
    format!("{socket_name}.sock")
}

const POINT_SIZE: usize = 8;
const MOTION_PREFIX: usize = 6;

// ── Frame types ───────────────────────────────────────────────────────────────

/// Request frame types sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestType {
    Auth = 0x01,
    Tap = 0x02,
    Motion = 0x03,
    Key = 0x04,
    Text = 0x05,
    Batch = 0x06,
    Status = 0x07,
    Shutdown = 0x0F,
}

impl RequestType {
    /// The largest payload a request of this kind can carry.
    pub fn max_payload(self) -> u32 {
        match self {
            RequestType::Auth => MAX_AUTH_PAYLOAD,
            RequestType::Tap => 8,
            RequestType::Motion => (MOTION_PREFIX + MAX_PATH_POINTS * POINT_SIZE) as u32,
            RequestType::Key => 4,
            RequestType::Text => MAX_TEXT_BYTES as u32,
            RequestType::Batch => MAX_FRAME_PAYLOAD,
            RequestType::Status | RequestType::Shutdown => 0,
        }
    }

    /// Whether this kind may appear inside a `BATCH`.
    pub fn is_input(self) -> bool {
        matches!(
            self,
            RequestType::Tap | RequestType::Motion | RequestType::Key | RequestType::Text
        )
    }
}

impl TryFrom<u8> for RequestType {
    type Error = PrivilegedError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(RequestType::Auth),
            0x02 => Ok(RequestType::Tap),
            0x03 => Ok(RequestType::Motion),
            0x04 => Ok(RequestType::Key),
            0x05 => Ok(RequestType::Text),
            0x06 => Ok(RequestType::Batch),
            0x07 => Ok(RequestType::Status),
            0x0F => Ok(RequestType::Shutdown),
            other => Err(PrivilegedError::UnknownType(other)),
        }
    }
}

/// Reply frame types sent by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReplyType {
    Ok = 0x80,
    AuthFailed = 0x81,
    Rejected = 0x82,
    Error = 0x83,
}

impl TryFrom<u8> for ReplyType {
    type Error = PrivilegedError;

    fn try_from(value: u8) -> Result<Self, PrivilegedError> {
        match value {
            0x80 => Ok(ReplyType::Ok),
            0x81 => Ok(ReplyType::AuthFailed),
            0x82 => Ok(ReplyType::Rejected),
            0x83 => Ok(ReplyType::Error),
            other => Err(PrivilegedError::UnknownType(other)),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised by the privileged-channel codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrivilegedError {
    #[error("unknown frame type 0x{0:02X}")]
    UnknownType(u8),

    #[error("{kind:?} payload of {declared} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        kind: RequestType,
        declared: u32,
        max: u32,
    },

    #[error("{what} count {count} exceeds maximum {max}")]
    LimitExceeded {
        what: &'static str,
        count: usize,
        max: usize,
    },

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl PrivilegedError {
    /// Classifies this error for the caller's attempt boundary.
    pub fn class(&self) -> ErrorClass {
        ErrorClass::ResourceLimitExceeded
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

/// A raw frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: u8,
    pub length: u32,
}

impl FrameHeader {
    pub fn parse(bytes: [u8; FRAME_HEADER_SIZE]) -> Self {
        Self {
            frame_type: bytes[0],
            length: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let len = self.length.to_be_bytes();
        [self.frame_type, len[0], len[1], len[2], len[3]]
    }
}

/// Validates a request header before any payload byte is read.
///
/// # Errors
///
/// Returns [`PrivilegedError::UnknownType`] for an unknown type byte, or
/// [`PrivilegedError::PayloadTooLarge`] when the declared length exceeds
/// the global maximum or the per-kind maximum.
pub fn check_request_header(header: &FrameHeader) -> Result<RequestType, PrivilegedError> {
    let kind = RequestType::try_from(header.frame_type)?;
    let max = kind.max_payload().min(MAX_FRAME_PAYLOAD);
    if header.length > max {
        return Err(PrivilegedError::PayloadTooLarge {
            kind,
            declared: header.length,
            max,
        });
    }
    Ok(kind)
}

/// Builds a complete frame.
pub fn encode_frame(frame_type: u8, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        frame_type,
        length: payload.len() as u32,
    };
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(payload);
    buf
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// A screen coordinate in a motion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathPoint {
    pub x: i32,
    pub y: i32,
}

/// One input event the worker can inject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Tap { x: i32, y: i32 },
    Motion {
        duration_ms: u32,
        points: Vec<PathPoint>,
    },
    Key { code: u32 },
    Text(String),
}

impl InputCommand {
    /// The frame type this command travels as.
    pub fn request_type(&self) -> RequestType {
        match self {
            InputCommand::Tap { .. } => RequestType::Tap,
            InputCommand::Motion { .. } => RequestType::Motion,
            InputCommand::Key { .. } => RequestType::Key,
            InputCommand::Text(_) => RequestType::Text,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, PrivilegedError> {
        let mut buf = Vec::new();
        match self {
            InputCommand::Tap { x, y } => {
                buf.extend_from_slice(&x.to_be_bytes());
                buf.extend_from_slice(&y.to_be_bytes());
            }
            InputCommand::Motion {
                duration_ms,
                points,
            } => {
                check_points(points.len())?;
                buf.reserve(MOTION_PREFIX + points.len() * POINT_SIZE);
                buf.extend_from_slice(&duration_ms.to_be_bytes());
                buf.extend_from_slice(&(points.len() as u16).to_be_bytes());
                for p in points {
                    buf.extend_from_slice(&p.x.to_be_bytes());
                    buf.extend_from_slice(&p.y.to_be_bytes());
                }
            }
            InputCommand::Key { code } => buf.extend_from_slice(&code.to_be_bytes()),
            InputCommand::Text(text) => {
                check_text(text.len())?;
                buf.extend_from_slice(text.as_bytes());
            }
        }
        Ok(buf)
    }

    fn decode(kind: RequestType, payload: &[u8]) -> Result<Self, PrivilegedError> {
        match kind {
            RequestType::Tap => {
                require_exact(payload, 8, "tap")?;
                Ok(InputCommand::Tap {
                    x: read_i32(payload, 0),
                    y: read_i32(payload, 4),
                })
            }
            RequestType::Motion => {
                require_at_least(payload, MOTION_PREFIX, "motion")?;
                let duration_ms = read_u32(payload, 0);
                let count = u16::from_be_bytes([payload[4], payload[5]]) as usize;
                check_points(count)?;
                require_exact(payload, MOTION_PREFIX + count * POINT_SIZE, "motion path")?;
                let points = payload[MOTION_PREFIX..]
                    .chunks_exact(POINT_SIZE)
                    .map(|c| PathPoint {
                        x: read_i32(c, 0),
                        y: read_i32(c, 4),
                    })
                    .collect();
                Ok(InputCommand::Motion {
                    duration_ms,
                    points,
                })
            }
            RequestType::Key => {
                require_exact(payload, 4, "key")?;
                Ok(InputCommand::Key {
                    code: read_u32(payload, 0),
                })
            }
            RequestType::Text => {
                check_text(payload.len())?;
                let text = std::str::from_utf8(payload)
                    .map_err(|e| PrivilegedError::Malformed(format!("text: {e}")))?;
                Ok(InputCommand::Text(text.to_string()))
            }
            other => Err(PrivilegedError::Malformed(format!(
                "{other:?} is not an input event"
            ))),
        }
    }
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Candidate token bytes; wiped on drop.
    Auth(Zeroizing<Vec<u8>>),
    Input(InputCommand),
    Batch(Vec<InputCommand>),
    Status,
    Shutdown,
}

impl Request {
    /// An `AUTH` request carrying a copy of `token`.
    pub fn auth(token: &[u8]) -> Self {
        Request::Auth(Zeroizing::new(token.to_vec()))
    }

    /// The frame type this request travels as.
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::Auth(_) => RequestType::Auth,
            Request::Input(cmd) => cmd.request_type(),
            Request::Batch(_) => RequestType::Batch,
            Request::Status => RequestType::Status,
            Request::Shutdown => RequestType::Shutdown,
        }
    }

    /// Encodes the full frame, applying the same limits the worker enforces.
    ///
    /// An `AUTH` frame holds the token in clear; wrap it in [`Zeroizing`].
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegedError`] if any limit would be exceeded.
    pub fn encode(&self) -> Result<Vec<u8>, PrivilegedError> {
        let kind = self.request_type();
        let payload = Zeroizing::new(match self {
            Request::Auth(token) => token.to_vec(),
            Request::Input(cmd) => cmd.encode_payload()?,
            Request::Batch(events) => {
                check_batch(events.len())?;
                let mut buf = Vec::new();
                buf.extend_from_slice(&(events.len() as u16).to_be_bytes());
                for event in events {
                    let inner = event.encode_payload()?;
                    buf.extend_from_slice(&encode_frame(event.request_type() as u8, &inner));
                }
                buf
            }
            Request::Status | Request::Shutdown => Vec::new(),
        });
        let header = FrameHeader {
            frame_type: kind as u8,
            length: u32::try_from(payload.len()).map_err(|_| PrivilegedError::PayloadTooLarge {
                kind,
                declared: u32::MAX,
                max: MAX_FRAME_PAYLOAD,
            })?,
        };
        check_request_header(&header)?;
        Ok(encode_frame(kind as u8, &payload))
    }

    /// Decodes a payload whose header already passed [`check_request_header`].
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegedError`] if the payload is malformed or a count
    /// exceeds its limit.
    pub fn decode(kind: RequestType, payload: &[u8]) -> Result<Self, PrivilegedError> {
        match kind {
            RequestType::Auth => Ok(Request::auth(payload)),
            RequestType::Status => {
                require_exact(payload, 0, "status")?;
                Ok(Request::Status)
            }
            RequestType::Shutdown => {
                require_exact(payload, 0, "shutdown")?;
                Ok(Request::Shutdown)
            }
            RequestType::Batch => decode_batch(payload).map(Request::Batch),
            input => InputCommand::decode(input, payload).map(Request::Input),
        }
    }
}

fn decode_batch(payload: &[u8]) -> Result<Vec<InputCommand>, PrivilegedError> {
    require_at_least(payload, 2, "batch")?;
    let count = u16::from_be_bytes([payload[0], payload[1]]) as usize;
    check_batch(count)?;

    let mut events = Vec::with_capacity(count);
    let mut offset = 2;
    for _ in 0..count {
        require_at_least(&payload[offset..], FRAME_HEADER_SIZE, "batch entry")?;
        let mut raw = [0u8; FRAME_HEADER_SIZE];
        raw.copy_from_slice(&payload[offset..offset + FRAME_HEADER_SIZE]);
        let header = FrameHeader::parse(raw);
        let kind = check_request_header(&header)?;
        if !kind.is_input() {
            return Err(PrivilegedError::Malformed(format!(
                "{kind:?} is not allowed inside a batch"
            )));
        }
        offset += FRAME_HEADER_SIZE;
        let len = header.length as usize;
        require_at_least(&payload[offset..], len, "batch entry payload")?;
        events.push(InputCommand::decode(kind, &payload[offset..offset + len])?);
        offset += len;
    }

    if offset != payload.len() {
        return Err(PrivilegedError::Malformed(format!(
            "{} trailing bytes after batch",
            payload.len() - offset
        )));
    }
    Ok(events)
}

// ── Replies ───────────────────────────────────────────────────────────────────

/// A worker reply with a short human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyType,
    pub message: String,
}

impl Reply {
    pub fn new(kind: ReplyType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(ReplyType::Ok, message)
    }

    /// Encodes the reply, truncating the message to [`MAX_REPLY_PAYLOAD`] bytes
    /// on a character boundary.
    pub fn encode(&self) -> Vec<u8> {
        let mut end = self.message.len().min(MAX_REPLY_PAYLOAD as usize);
        while !self.message.is_char_boundary(end) {
            end -= 1;
        }
        encode_frame(self.kind as u8, &self.message.as_bytes()[..end])
    }

    /// Decodes a reply from its header type byte and payload.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegedError`] for an unknown type or non-UTF-8 message.
    pub fn decode(frame_type: u8, payload: &[u8]) -> Result<Self, PrivilegedError> {
        let kind = ReplyType::try_from(frame_type)?;
        let message = std::str::from_utf8(payload)
            .map_err(|e| PrivilegedError::Malformed(format!("reply: {e}")))?
            .to_string();
        Ok(Self { kind, message })
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn check_points(count: usize) -> Result<(), PrivilegedError> {
    if count == 0 {
        return Err(PrivilegedError::Malformed("motion path has no points".into()));
    }
    if count > MAX_PATH_POINTS {
        return Err(PrivilegedError::LimitExceeded {
            what: "path point",
            count,
            max: MAX_PATH_POINTS,
        });
    }
    Ok(())
}

fn check_batch(count: usize) -> Result<(), PrivilegedError> {
    if count == 0 {
        return Err(PrivilegedError::Malformed("batch has no events".into()));
    }
    if count > MAX_BATCH_EVENTS {
        return Err(PrivilegedError::LimitExceeded {
            what: "batch event",
            count,
            max: MAX_BATCH_EVENTS,
        });
    }
    Ok(())
}

fn check_text(len: usize) -> Result<(), PrivilegedError> {
    if len > MAX_TEXT_BYTES {
        return Err(PrivilegedError::LimitExceeded {
            what: "text byte",
            count: len,
            max: MAX_TEXT_BYTES,
        });
    }
    Ok(())
}

fn require_exact(buf: &[u8], needed: usize, context: &str) -> Result<(), PrivilegedError> {
    if buf.len() != needed {
        Err(PrivilegedError::Malformed(format!(
            "{context}: need exactly {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn require_at_least(buf: &[u8], needed: usize, context: &str) -> Result<(), PrivilegedError> {
    if buf.len() < needed {
        Err(PrivilegedError::Malformed(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    read_u32(buf, offset) as i32
}

// ── Tests ─────────────────────────────────────────────────────────────────────
