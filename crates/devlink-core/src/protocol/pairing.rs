//! Packet framing and the peer-identity record for the pairing channel.
//!
//! ```text
//! packet    = [version:4 BE][type:4 BE][length:4 BE][payload:length]
//! peer info = [kind:1][nameLen:4 BE][name][keyLen:4 BE][key]
//! ```
//!
//! The header is validated (version, type, and `length <= 8192`) before the
//! payload buffer is allocated.  `SPAKE2_MSG` payloads travel in the clear;
//! `PEER_INFO` payloads are AEAD ciphertext of an encoded [`PeerInfo`].

use thiserror::Error;

use crate::error::ErrorClass;

/// Pairing packet format version.
pub const PAIRING_PACKET_VERSION: u32 = 1;

/// Size of the pairing packet header.
pub const PAIRING_HEADER_SIZE: usize = 12;

/// Largest payload accepted in one pairing packet.
pub const MAX_PAIRING_PAYLOAD: u32 = 8192;

/// Largest device name carried in a peer-info record.
pub const MAX_PEER_NAME: usize = 256;

/// Largest key blob carried in a peer-info record.
pub const MAX_PEER_KEY: usize = 2048;

/// Pairing packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PairingPacketType {
    /// A 65-byte SPAKE2 point.
    Spake2Msg = 0,
    /// An encrypted [`PeerInfo`].
    PeerInfo = 1,
}

impl TryFrom<u32> for PairingPacketType {
    type Error = PairingFrameError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PairingPacketType::Spake2Msg),
            1 => Ok(PairingPacketType::PeerInfo),
            other => Err(PairingFrameError::UnknownType(other)),
        }
    }
}

/// What the `key` field of a [`PeerInfo`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerInfoKind {
    /// The sender's public signing key.
    PublicKey = 0,
    /// An opaque device identifier.
    DeviceGuid = 1,
}

/// Errors raised while framing pairing packets or peer-info records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PairingFrameError {
    #[error("insufficient data: need {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("unsupported pairing packet version {0}")]
    UnsupportedVersion(u32),

    #[error("unknown pairing packet type {0}")]
    UnknownType(u32),

    #[error("unexpected pairing packet type: expected {expected:?}, got {actual:?}")]
    UnexpectedType {
        expected: PairingPacketType,
        actual: PairingPacketType,
    },

    #[error("pairing payload of {declared} bytes exceeds maximum {max}")]
    PayloadTooLarge { declared: u64, max: u64 },

    #[error("malformed peer info: {0}")]
    MalformedPeerInfo(String),
}

impl PairingFrameError {
    /// Classifies this error for the caller's attempt boundary.
    pub fn class(&self) -> ErrorClass {
        match self {
            PairingFrameError::PayloadTooLarge { .. } => ErrorClass::ResourceLimitExceeded,
            _ => ErrorClass::PairingProtocol,
        }
    }
}

// ── Packet header ─────────────────────────────────────────────────────────────

/// A validated pairing packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingPacketHeader {
    pub packet_type: PairingPacketType,
    pub length: u32,
}

impl PairingPacketHeader {
    /// Serialises the header with the current version.
    pub fn to_bytes(&self) -> [u8; PAIRING_HEADER_SIZE] {
        let mut out = [0u8; PAIRING_HEADER_SIZE];
        out[0..4].copy_from_slice(&PAIRING_PACKET_VERSION.to_be_bytes());
        out[4..8].copy_from_slice(&(self.packet_type as u32).to_be_bytes());
        out[8..12].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Parses and validates a header.
    ///
    /// # Errors
    ///
    /// Rejects a short buffer, any version other than
    /// [`PAIRING_PACKET_VERSION`], an unknown type, and lengths above
    /// [`MAX_PAIRING_PAYLOAD`].
    pub fn parse(bytes: &[u8]) -> Result<Self, PairingFrameError> {
        require_len(bytes, PAIRING_HEADER_SIZE)?;
        let version = read_u32_be(bytes, 0);
        if version != PAIRING_PACKET_VERSION {
            return Err(PairingFrameError::UnsupportedVersion(version));
        }
        let packet_type = PairingPacketType::try_from(read_u32_be(bytes, 4))?;
        let length = read_u32_be(bytes, 8);
        if length > MAX_PAIRING_PAYLOAD {
            return Err(PairingFrameError::PayloadTooLarge {
                declared: u64::from(length),
                max: u64::from(MAX_PAIRING_PAYLOAD),
            });
        }
        Ok(Self {
            packet_type,
            length,
        })
    }

    /// Fails unless this header has the type the exchange expects next.
    pub fn expect_type(&self, expected: PairingPacketType) -> Result<(), PairingFrameError> {
        if self.packet_type == expected {
            Ok(())
        } else {
            Err(PairingFrameError::UnexpectedType {
                expected,
                actual: self.packet_type,
            })
        }
    }
}

/// Builds a complete packet (header plus payload).
///
/// # Errors
///
/// Returns [`PairingFrameError::PayloadTooLarge`] if `payload` exceeds the maximum.
pub fn encode_packet(
    packet_type: PairingPacketType,
    payload: &[u8],
) -> Result<Vec<u8>, PairingFrameError> {
    if payload.len() > MAX_PAIRING_PAYLOAD as usize {
        return Err(PairingFrameError::PayloadTooLarge {
            declared: payload.len() as u64,
            max: u64::from(MAX_PAIRING_PAYLOAD),
        });
    }
    let header = PairingPacketHeader {
        packet_type,
        length: payload.len() as u32,
    };
    let mut buf = Vec::with_capacity(PAIRING_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

// ── Peer info ─────────────────────────────────────────────────────────────────

/// The identity record each side sends over the encrypted channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub kind: PeerInfoKind,
    pub name: String,
    pub key: Vec<u8>,
}

impl PeerInfo {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Returns [`PairingFrameError::MalformedPeerInfo`] if the name or key
    /// exceeds its bound.
    pub fn encode(&self) -> Result<Vec<u8>, PairingFrameError> {
        if self.name.len() > MAX_PEER_NAME {
            return Err(PairingFrameError::MalformedPeerInfo(format!(
                "name of {} bytes exceeds {MAX_PEER_NAME}",
                self.name.len()
            )));
        }
        if self.key.len() > MAX_PEER_KEY {
            return Err(PairingFrameError::MalformedPeerInfo(format!(
                "key of {} bytes exceeds {MAX_PEER_KEY}",
                self.key.len()
            )));
        }
        let mut buf = Vec::with_capacity(1 + 4 + self.name.len() + 4 + self.key.len());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&(self.name.len() as u32).to_be_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.key);
        Ok(buf)
    }

    /// Decodes a record, bounds-checking each length before slicing.
    ///
    /// # Errors
    ///
    /// Returns [`PairingFrameError`] for an unknown kind, an out-of-bounds
    /// length, invalid UTF-8 in the name, or trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, PairingFrameError> {
        if bytes.len() > MAX_PAIRING_PAYLOAD as usize {
            return Err(PairingFrameError::PayloadTooLarge {
                declared: bytes.len() as u64,
                max: u64::from(MAX_PAIRING_PAYLOAD),
            });
        }
        require_len(bytes, 1)?;
        let kind = match bytes[0] {
            0 => PeerInfoKind::PublicKey,
            1 => PeerInfoKind::DeviceGuid,
            other => {
                return Err(PairingFrameError::MalformedPeerInfo(format!(
                    "unknown kind {other}"
                )))
            }
        };

        let mut offset = 1;
        let name = read_bounded(bytes, &mut offset, MAX_PEER_NAME, "name")?;
        let name = String::from_utf8(name.to_vec())
            .map_err(|e| PairingFrameError::MalformedPeerInfo(format!("name: {e}")))?;
        let key = read_bounded(bytes, &mut offset, MAX_PEER_KEY, "key")?.to_vec();

        if offset != bytes.len() {
            return Err(PairingFrameError::MalformedPeerInfo(format!(
                "{} trailing bytes",
                bytes.len() - offset
            )));
        }
        Ok(Self { kind, name, key })
    }
}

fn read_bounded<'a>(
    bytes: &'a [u8],
    offset: &mut usize,
    max: usize,
    field: &str,
) -> Result<&'a [u8], PairingFrameError> {
    require_len(bytes, *offset + 4)?;
    let len = read_u32_be(bytes, *offset) as usize;
    *offset += 4;
    if len > max {
        return Err(PairingFrameError::MalformedPeerInfo(format!(
            "{field} length {len} exceeds {max}"
        )));
    }
    require_len(bytes, *offset + len)?;
    let slice = &bytes[*offset..*offset + len];
    *offset += len;
    Ok(slice)
}

fn require_len(bytes: &[u8], needed: usize) -> Result<(), PairingFrameError> {
    if bytes.len() < needed {
        Err(PairingFrameError::InsufficientData {
            needed,
            available: bytes.len(),
        })
    } else {
        Ok(())
    }
}

fn read_u32_be(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
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

    fn sample_peer() -> PeerInfo {
        PeerInfo {
            kind: PeerInfoKind::PublicKey,
            name: "pixel-7".to_string(),
            key: vec![0x11; 32],
        }
    }

    #[test]
    fn test_packet_header_is_big_endian() {
        let bytes = encode_packet(PairingPacketType::PeerInfo, &[9, 9, 9]).unwrap();
        assert_eq!(&bytes[..12], &[0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 3]);
        assert_eq!(&bytes[12..], &[9, 9, 9]);
    }

    #[test]
    fn test_header_parse_rejects_wrong_version() {
        let mut bytes = encode_packet(PairingPacketType::Spake2Msg, &[]).unwrap();
        bytes[3] = 2;
        assert_eq!(
            PairingPacketHeader::parse(&bytes),
            Err(PairingFrameError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_header_parse_rejects_unknown_type() {
        let mut bytes = encode_packet(PairingPacketType::Spake2Msg, &[]).unwrap();
        bytes[7] = 7;
        assert_eq!(
            PairingPacketHeader::parse(&bytes),
            Err(PairingFrameError::UnknownType(7))
        );
    }

    #[test]
    fn test_header_parse_rejects_oversized_length_before_payload() {
        // Arrange – header alone, claiming far more than the maximum
        let header = PairingPacketHeader {
            packet_type: PairingPacketType::PeerInfo,
            length: 0x00FF_FFFF,
        };

        // Act
        let err = PairingPacketHeader::parse(&header.to_bytes()).unwrap_err();

        // Assert
        assert_eq!(err.class(), ErrorClass::ResourceLimitExceeded);
    }

    #[test]
    fn test_encode_packet_refuses_oversized_payload() {
        let payload = vec![0u8; MAX_PAIRING_PAYLOAD as usize + 1];
        assert!(encode_packet(PairingPacketType::PeerInfo, &payload).is_err());
    }

    #[test]
    fn test_expect_type_flags_out_of_order_packet() {
        let header = PairingPacketHeader {
            packet_type: PairingPacketType::PeerInfo,
            length: 0,
        };
        assert!(header.expect_type(PairingPacketType::PeerInfo).is_ok());
        assert_eq!(
            header.expect_type(PairingPacketType::Spake2Msg),
            Err(PairingFrameError::UnexpectedType {
                expected: PairingPacketType::Spake2Msg,
                actual: PairingPacketType::PeerInfo,
            })
        );
    }

    #[test]
    fn test_peer_info_layout() {
        let bytes = sample_peer().encode().unwrap();
        assert_eq!(bytes[0], 0);
        assert_eq!(&bytes[1..5], &7u32.to_be_bytes());
        assert_eq!(&bytes[5..12], b"pixel-7");
        assert_eq!(&bytes[12..16], &32u32.to_be_bytes());
        assert_eq!(PeerInfo::decode(&bytes).unwrap(), sample_peer());
    }

    #[test]
    fn test_peer_info_rejects_name_length_past_end() {
        // Arrange – nameLen claims 200 bytes but only 3 follow
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&200u32.to_be_bytes());
        bytes.extend_from_slice(b"abc");

        // Act / Assert
        assert!(matches!(
            PeerInfo::decode(&bytes),
            Err(PairingFrameError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_peer_info_rejects_oversized_name_field() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&((MAX_PEER_NAME + 1) as u32).to_be_bytes());
        bytes.extend_from_slice(&vec![b'a'; MAX_PEER_NAME + 1]);
        bytes.extend_from_slice(&0u32.to_be_bytes());
        assert!(matches!(
            PeerInfo::decode(&bytes),
            Err(PairingFrameError::MalformedPeerInfo(_))
        ));
    }

    #[test]
    fn test_peer_info_rejects_trailing_bytes() {
        let mut bytes = sample_peer().encode().unwrap();
        bytes.push(0);
        assert!(matches!(
            PeerInfo::decode(&bytes),
            Err(PairingFrameError::MalformedPeerInfo(_))
        ));
    }

    #[test]
    fn test_peer_info_rejects_unknown_kind() {
        let mut bytes = sample_peer().encode().unwrap();
        bytes[0] = 9;
        assert!(PeerInfo::decode(&bytes).is_err());
    }
}
