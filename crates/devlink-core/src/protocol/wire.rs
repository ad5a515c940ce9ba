//! Framing for the wire-protocol session used after pairing.
//!
//! Every frame is a fixed 24-byte header followed by `data_length` payload
//! bytes.  All header fields are little-endian `u32`s:
//!
//! ```text
//! [command:4][arg0:4][arg1:4][data_length:4][data_check:4][magic:4][payload:N]
//! ```
//!
//! Two independent integrity checks guard each frame:
//!
//! - `magic` must equal `command ^ 0xFFFFFFFF`.  This is a structural check on
//!   the header itself, so a misaligned read or a corrupted command word is
//!   caught before the payload is looked at.
//! - `data_check` is the wrapping sum of every payload byte.
//!
//! Receivers call [`parse_header`] on the first 24 bytes (which also enforces
//! the maximum payload, so no oversized buffer is ever allocated), read exactly
//! `data_length` more bytes, then call [`parse_message`].

use std::fmt;

use thiserror::Error;

use crate::error::ErrorClass;

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Protocol version sent in `CNXN` arg0.
pub const A_VERSION: u32 = 0x0100_0001;

/// Largest payload either side accepts by default (256 KiB).
pub const MAX_PAYLOAD: u32 = 256 * 1024;

// ── Commands ──────────────────────────────────────────────────────────────────

/// The six command codes of the session protocol.
///
/// Each code is four ASCII characters read as a little-endian `u32`
/// (`CNXN` → `0x4e584e43`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Connection banner exchange.
    Connect = 0x4e58_4e43,
    /// Challenge, signature, or public key.
    Auth = 0x4854_5541,
    /// Open a logical stream.
    Open = 0x4e45_504f,
    /// Stream ready / write acknowledged.
    Okay = 0x5941_4b4f,
    /// Close a logical stream.
    Close = 0x4553_4c43,
    /// Stream data.
    Write = 0x4554_5257,
}

impl Command {
    /// The four-character mnemonic used in logs.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Command::Connect => "CNXN",
            Command::Auth => "AUTH",
            Command::Open => "OPEN",
            Command::Okay => "OKAY",
            Command::Close => "CLSE",
            Command::Write => "WRTE",
        }
    }

    /// The magic value that must accompany this command.
    pub fn magic(self) -> u32 {
        self as u32 ^ 0xFFFF_FFFF
    }
}

impl TryFrom<u32> for Command {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x4e58_4e43 => Ok(Command::Connect),
            0x4854_5541 => Ok(Command::Auth),
            0x4e45_504f => Ok(Command::Open),
            0x5941_4b4f => Ok(Command::Okay),
            0x4553_4c43 => Ok(Command::Close),
            0x4554_5257 => Ok(Command::Write),
            other => Err(other),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// `AUTH` arg0 values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AuthKind {
    /// Server → client challenge.
    Token = 1,
    /// Client → server signature over the challenge.
    Signature = 2,
    /// Client → server public key for a device the server does not know yet.
    PublicKey = 3,
}

impl TryFrom<u32> for AuthKind {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AuthKind::Token),
            2 => Ok(AuthKind::Signature),
            3 => Ok(AuthKind::PublicKey),
            other => Err(other),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised while framing or unframing session messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes are available than the header or payload needs.
    #[error("insufficient data: need {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// `magic` is not the complement of `command`.
    #[error("magic mismatch: command 0x{command:08X}, magic 0x{magic:08X}")]
    MagicMismatch { command: u32, magic: u32 },

    /// The command word passed the magic check but is not a known command.
    #[error("unknown command 0x{0:08X}")]
    UnknownCommand(u32),

    /// The declared payload length exceeds the negotiated maximum.
    #[error("payload of {declared} bytes exceeds maximum {max}")]
    PayloadTooLarge { declared: u32, max: u32 },

    /// The payload handed to [`parse_message`] is not `data_length` bytes.
    #[error("payload length mismatch: header says {declared}, got {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    /// The payload bytes do not sum to `data_check`.
    #[error("payload checksum mismatch: header 0x{expected:08X}, computed 0x{actual:08X}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl WireError {
    /// Classifies this error for the caller's attempt boundary.
    pub fn class(&self) -> ErrorClass {
        match self {
            WireError::InsufficientData { .. } => ErrorClass::TransientIo,
            WireError::PayloadTooLarge { .. } => ErrorClass::ResourceLimitExceeded,
            _ => ErrorClass::PairingProtocol,
        }
    }
}

// ── Header and message ────────────────────────────────────────────────────────

/// A validated frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub data_length: u32,
    pub data_check: u32,
}

impl WireHeader {
    /// Serialises the header, computing `magic` from the command.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let fields = [
            self.command as u32,
            self.arg0,
            self.arg1,
            self.data_length,
            self.data_check,
            self.command.magic(),
        ];
        for (chunk, value) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }
}

/// One complete session frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// Creates a message; the checksum and magic are computed on serialisation.
    pub fn new(command: Command, arg0: u32, arg1: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command,
            arg0,
            arg1,
            payload: payload.into(),
        }
    }

    /// The header this message serialises with.
    pub fn header(&self) -> WireHeader {
        WireHeader {
            command: self.command,
            arg0: self.arg0,
            arg1: self.arg1,
            data_length: self.payload.len() as u32,
            data_check: data_check(&self.payload),
        }
    }

    /// Serialises header and payload into one buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header().to_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Computes the payload data check: the wrapping sum of all bytes.
pub fn data_check(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)))
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parses and validates a 24-byte header.
///
/// Checks, in order: the magic, the command code, and that `data_length` does
/// not exceed `max_payload`.
///
/// # Errors
///
/// Returns [`WireError`] for any failed check, or if `bytes` is short.
pub fn parse_header(bytes: &[u8], max_payload: u32) -> Result<WireHeader, WireError> {
    require_len(bytes, HEADER_SIZE)?;

    let command_raw = read_u32_le(bytes, 0);
    let magic = read_u32_le(bytes, 20);
    if magic != command_raw ^ 0xFFFF_FFFF {
        return Err(WireError::MagicMismatch {
            command: command_raw,
            magic,
        });
    }

    let command = Command::try_from(command_raw).map_err(WireError::UnknownCommand)?;

    let data_length = read_u32_le(bytes, 12);
    if data_length > max_payload {
        return Err(WireError::PayloadTooLarge {
            declared: data_length,
            max: max_payload,
        });
    }

    Ok(WireHeader {
        command,
        arg0: read_u32_le(bytes, 4),
        arg1: read_u32_le(bytes, 8),
        data_length,
        data_check: read_u32_le(bytes, 16),
    })
}

/// Completes a message from a parsed header and its payload.
///
/// # Errors
///
/// Returns [`WireError::LengthMismatch`] or [`WireError::ChecksumMismatch`].
pub fn parse_message(header: &WireHeader, payload: &[u8]) -> Result<WireMessage, WireError> {
    if payload.len() != header.data_length as usize {
        return Err(WireError::LengthMismatch {
            declared: header.data_length,
            actual: payload.len(),
        });
    }
    let actual = data_check(payload);
    if actual != header.data_check {
        return Err(WireError::ChecksumMismatch {
            expected: header.data_check,
            actual,
        });
    }
    Ok(WireMessage {
        command: header.command,
        arg0: header.arg0,
        arg1: header.arg1,
        payload: payload.to_vec(),
    })
}

/// Decodes one message from the front of `bytes`.
///
/// Returns the message and the number of bytes consumed so the caller can
/// advance a read cursor.
///
/// # Errors
///
/// Returns [`WireError::InsufficientData`] when the frame is incomplete, or
/// any header or payload validation error.
pub fn decode_message(bytes: &[u8], max_payload: u32) -> Result<(WireMessage, usize), WireError> {
    let header = parse_header(bytes, max_payload)?;
    let total = HEADER_SIZE + header.data_length as usize;
    require_len(bytes, total)?;
    let msg = parse_message(&header, &bytes[HEADER_SIZE..total])?;
    Ok((msg, total))
}

fn require_len(bytes: &[u8], needed: usize) -> Result<(), WireError> {
    if bytes.len() < needed {
        Err(WireError::InsufficientData {
            needed,
            available: bytes.len(),
        })
    } else {
        Ok(())
    }
}

fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes_match_ascii_mnemonics() {
        for cmd in [
            Command::Connect,
            Command::Auth,
            Command::Open,
            Command::Okay,
            Command::Close,
            Command::Write,
        ] {
            assert_eq!(&(cmd as u32).to_le_bytes(), cmd.mnemonic().as_bytes());
        }
    }

    #[test]
    fn test_header_layout_is_little_endian_with_magic_last() {
        // Arrange
        let msg = WireMessage::new(Command::Open, 7, 0, b"shell:ls\0".to_vec());

        // Act
        let bytes = msg.to_bytes();

        // Assert
        assert_eq!(&bytes[0..4], b"OPEN");
        assert_eq!(&bytes[4..8], &7u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &9u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &(Command::Open as u32 ^ 0xFFFF_FFFF).to_le_bytes());
        assert_eq!(&bytes[HEADER_SIZE..], b"shell:ls\0");
    }

    #[test]
    fn test_decode_returns_consumed_length() {
        let msg = WireMessage::new(Command::Write, 1, 2, vec![0xAB; 40]);
        let mut bytes = msg.to_bytes();
        bytes.extend_from_slice(b"next frame");

        let (decoded, consumed) = decode_message(&bytes, MAX_PAYLOAD).unwrap();

        assert_eq!(decoded, msg);
        assert_eq!(consumed, HEADER_SIZE + 40);
    }

    #[test]
    fn test_empty_payload_has_zero_check() {
        let msg = WireMessage::new(Command::Okay, 3, 4, Vec::new());
        assert_eq!(msg.header().data_check, 0);
        let (decoded, _) = decode_message(&msg.to_bytes(), MAX_PAYLOAD).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_oversized_length_is_rejected_from_header_alone() {
        // Arrange – a header declaring 1 MiB with no payload behind it
        let header = WireHeader {
            command: Command::Write,
            arg0: 1,
            arg1: 1,
            data_length: 1024 * 1024,
            data_check: 0,
        };

        // Act
        let result = parse_header(&header.to_bytes(), MAX_PAYLOAD);

        // Assert
        assert_eq!(
            result,
            Err(WireError::PayloadTooLarge {
                declared: 1024 * 1024,
                max: MAX_PAYLOAD
            })
        );
        assert_eq!(result.unwrap_err().class(), ErrorClass::ResourceLimitExceeded);
    }

    #[test]
    fn test_unknown_command_with_valid_magic_is_rejected() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(b"SYNC");
        let magic = u32::from_le_bytes(*b"SYNC") ^ 0xFFFF_FFFF;
        bytes[20..24].copy_from_slice(&magic.to_le_bytes());

        assert_eq!(
            parse_header(&bytes, MAX_PAYLOAD),
            Err(WireError::UnknownCommand(u32::from_le_bytes(*b"SYNC")))
        );
    }

    #[test]
    fn test_short_header_reports_insufficient_data() {
        assert_eq!(
            parse_header(&[0u8; 10], MAX_PAYLOAD),
            Err(WireError::InsufficientData {
                needed: HEADER_SIZE,
                available: 10
            })
        );
    }

    #[test]
    fn test_truncated_payload_reports_insufficient_data() {
        let bytes = WireMessage::new(Command::Write, 1, 1, vec![1, 2, 3]).to_bytes();
        let err = decode_message(&bytes[..bytes.len() - 1], MAX_PAYLOAD).unwrap_err();
        assert_eq!(err.class(), ErrorClass::TransientIo);
    }

    #[test]
    fn test_parse_message_rejects_wrong_payload_length() {
        let msg = WireMessage::new(Command::Write, 1, 1, vec![1, 2, 3]);
        let header = msg.header();
        assert_eq!(
            parse_message(&header, &[1, 2]),
            Err(WireError::LengthMismatch {
                declared: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_auth_kind_round_trips_through_u32() {
        for kind in [AuthKind::Token, AuthKind::Signature, AuthKind::PublicKey] {
            assert_eq!(AuthKind::try_from(kind as u32), Ok(kind));
        }
        assert_eq!(AuthKind::try_from(9), Err(9));
    }
}
