//! Integration tests for the wire-protocol frame codec.
//!
//! These drive the public parse path the way a connection does: parse the
//! 24-byte header, then complete the message from exactly `data_length`
//! payload bytes.  Every bit of the command and magic words is flipped to show
//! the header self-check catches it, and every payload bit is flipped to show
//! the data check catches it.

use devlink_core::protocol::wire::{
    parse_header, parse_message, Command, WireError, WireMessage, HEADER_SIZE, MAX_PAYLOAD,
};

/// Serialises a message and parses it back through header + payload.
fn roundtrip(msg: &WireMessage) -> Result<WireMessage, WireError> {
    let bytes = msg.to_bytes();
    reparse(&bytes)
}

fn reparse(bytes: &[u8]) -> Result<WireMessage, WireError> {
    let header = parse_header(&bytes[..HEADER_SIZE], MAX_PAYLOAD)?;
    parse_message(&header, &bytes[HEADER_SIZE..])
}

#[test]
fn test_roundtrip_connect_banner() {
    let original = WireMessage::new(
        Command::Connect,
        0x0100_0001,
        MAX_PAYLOAD,
        b"host::features=shell_v2,cmd".to_vec(),
    );
    assert_eq!(roundtrip(&original).unwrap(), original);
}

#[test]
fn test_roundtrip_every_command() {
    for (i, command) in [
        Command::Connect,
        Command::Auth,
        Command::Open,
        Command::Okay,
        Command::Close,
        Command::Write,
    ]
    .into_iter()
    .enumerate()
    {
        let original = WireMessage::new(command, i as u32, u32::MAX - i as u32, vec![i as u8; i * 7]);
        assert_eq!(roundtrip(&original).unwrap(), original, "{command} did not survive");
    }
}

#[test]
fn test_roundtrip_maximum_payload() {
    let original = WireMessage::new(Command::Write, 1, 2, vec![0xFF; MAX_PAYLOAD as usize]);
    assert_eq!(roundtrip(&original).unwrap(), original);
}

#[test]
fn test_any_flipped_command_or_magic_bit_is_a_magic_mismatch() {
    // Arrange
    let original = WireMessage::new(Command::Open, 1, 0, b"shell:id\0".to_vec());
    let bytes = original.to_bytes();
    let header_words = (0..4).chain(20..24);

    // Act / Assert
    for byte in header_words {
        for bit in 0..8 {
            let mut corrupted = bytes.clone();
            corrupted[byte] ^= 1 << bit;
            assert!(
                matches!(reparse(&corrupted), Err(WireError::MagicMismatch { .. })),
                "flip of byte {byte} bit {bit} was not caught by the magic check"
            );
        }
    }
}

#[test]
fn test_any_flipped_payload_bit_is_a_checksum_mismatch() {
    // Arrange
    let original = WireMessage::new(Command::Write, 3, 9, b"some stream data".to_vec());
    let bytes = original.to_bytes();

    // Act / Assert
    for byte in HEADER_SIZE..bytes.len() {
        for bit in 0..8 {
            let mut corrupted = bytes.clone();
            corrupted[byte] ^= 1 << bit;
            assert!(
                matches!(reparse(&corrupted), Err(WireError::ChecksumMismatch { .. })),
                "flip of payload byte {byte} bit {bit} was not caught"
            );
        }
    }
}

#[test]
fn test_flipped_data_check_field_is_a_checksum_mismatch() {
    let original = WireMessage::new(Command::Write, 3, 9, b"abc".to_vec());
    let mut bytes = original.to_bytes();
    bytes[16] ^= 0x01;
    assert!(matches!(reparse(&bytes), Err(WireError::ChecksumMismatch { .. })));
}

#[test]
fn test_smaller_negotiated_maximum_is_honoured() {
    let original = WireMessage::new(Command::Write, 1, 1, vec![0u8; 4097]);
    let bytes = original.to_bytes();
    assert_eq!(
        parse_header(&bytes[..HEADER_SIZE], 4096),
        Err(WireError::PayloadTooLarge {
            declared: 4097,
            max: 4096
        })
    );
}
