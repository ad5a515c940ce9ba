//! P-256 point encoding, decoding, and the fixed SPAKE2 blinding points.
//!
//! Points travel on the wire as 65-byte uncompressed SEC1 encodings:
//!
//! ```text
//! [0x04][X:32][Y:32]
//! ```
//!
//! # Why validate every received point? (for beginners)
//!
//! Elliptic-curve formulas happily compute with coordinates that are *not* on
//! the agreed curve.  A malicious peer can pick such a point on a much weaker
//! curve, watch how our secret scalar transforms it, and recover the scalar
//! piece by piece (an *invalid-curve attack*).  [`decode_point`] therefore
//! checks length, the uncompressed marker, and the curve equation, and every
//! caller that handles peer input goes through it.
//!
//! All group arithmetic comes from the `p256` crate, whose formulas are
//! complete and whose scalar multiplication runs in constant time.

use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{AffinePoint, EncodedPoint};
use thiserror::Error;

/// Length of an uncompressed SEC1 P-256 point.
pub const POINT_LEN: usize = 65;

/// SEC1 tag byte marking an uncompressed point.
pub const UNCOMPRESSED_TAG: u8 = 0x04;

/// SPAKE2 blinding point M for P-256 (RFC 9382), compressed form.
const M_COMPRESSED: [u8; 33] = [
    0x02, 0x88, 0x6e, 0x2f, 0x97, 0xac, 0xe4, 0x6e, 0x55, 0xba, 0x9d, 0xd7, 0x24, 0x25, 0x79,
    0xf2, 0x99, 0x3b, 0x64, 0xe1, 0x6e, 0xf3, 0xdc, 0xab, 0x95, 0xaf, 0xd4, 0x97, 0x33, 0x3d,
    0x8f, 0xa1, 0x2f,
];

/// SPAKE2 blinding point N for P-256 (RFC 9382), compressed form.
const N_COMPRESSED: [u8; 33] = [
    0x03, 0xd8, 0xbb, 0xd6, 0xc6, 0x39, 0xc6, 0x29, 0x37, 0xb0, 0x4d, 0x99, 0x7f, 0x38, 0xc3,
    0x77, 0x07, 0x19, 0xc6, 0x29, 0xd7, 0x01, 0x4d, 0x49, 0xa2, 0x4b, 0x4f, 0x98, 0xba, 0xa1,
    0x29, 0x2b, 0x49,
];

/// Errors raised while decoding or constructing curve points.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CurveError {
    /// The encoding is not exactly [`POINT_LEN`] bytes.
    #[error("point encoding must be {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    /// The first byte is not the uncompressed-point tag.
    #[error("point encoding is missing the uncompressed marker (found 0x{0:02X})")]
    MissingUncompressedMarker(u8),

    /// The coordinates do not satisfy the curve equation.
    #[error("point is not on the curve")]
    NotOnCurve,

    /// A built-in blinding constant failed to decompress.
    #[error("fixed curve constant {0} is invalid")]
    InvalidConstant(&'static str),
}

/// Decodes a peer-supplied uncompressed point, rejecting anything off-curve.
///
/// # Errors
///
/// - [`CurveError::WrongLength`] for any length other than 65.
/// - [`CurveError::MissingUncompressedMarker`] when byte 0 is not `0x04`.
/// - [`CurveError::NotOnCurve`] when `y² ≠ x³ − 3x + b (mod p)`.
pub fn decode_point(bytes: &[u8]) -> Result<AffinePoint, CurveError> {
    if bytes.len() != POINT_LEN {
        return Err(CurveError::WrongLength {
            expected: POINT_LEN,
            actual: bytes.len(),
        });
    }
    if bytes[0] != UNCOMPRESSED_TAG {
        return Err(CurveError::MissingUncompressedMarker(bytes[0]));
    }

    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| CurveError::NotOnCurve)?;
    Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or(CurveError::NotOnCurve)
}

/// Encodes a point as 65 uncompressed bytes.
///
/// The identity has no uncompressed encoding; callers reject it before
/// encoding, and it is written here as all zeroes so the output length stays
/// fixed.
pub fn encode_point(point: &AffinePoint) -> [u8; POINT_LEN] {
    let mut out = [0u8; POINT_LEN];
    let encoded = point.to_encoded_point(false);
    let bytes = encoded.as_bytes();
    if bytes.len() == POINT_LEN {
        out.copy_from_slice(bytes);
    }
    out
}

/// Returns the curve generator G.
pub fn generator() -> AffinePoint {
    AffinePoint::GENERATOR
}

/// Returns the fixed blinding point M (used by the initiator).
///
/// # Errors
///
/// Returns [`CurveError::InvalidConstant`] only if the embedded constant is corrupt.
pub fn point_m() -> Result<AffinePoint, CurveError> {
    decompress(&M_COMPRESSED, "M")
}

/// Returns the fixed blinding point N (used by the responder).
///
/// # Errors
///
/// Returns [`CurveError::InvalidConstant`] only if the embedded constant is corrupt.
pub fn point_n() -> Result<AffinePoint, CurveError> {
    decompress(&N_COMPRESSED, "N")
}

fn decompress(bytes: &[u8], name: &'static str) -> Result<AffinePoint, CurveError> {
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| CurveError::InvalidConstant(name))?;
    Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or(CurveError::InvalidConstant(name))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_encoding_round_trips() {
        let encoded = encode_point(&generator());
        let decoded = decode_point(&encoded).expect("generator must decode");
        assert_eq!(encode_point(&decoded), encoded);
    }

    #[test]
    fn test_fixed_points_round_trip_through_uncompressed_encoding() {
        for point in [point_m().unwrap(), point_n().unwrap()] {
            let encoded = encode_point(&point);
            assert_eq!(encoded[0], UNCOMPRESSED_TAG);
            let decoded = decode_point(&encoded).expect("fixed point must decode");
            assert_eq!(encode_point(&decoded), encoded);
        }
    }

    #[test]
    fn test_m_and_n_are_distinct_from_generator() {
        let g = encode_point(&generator());
        let m = encode_point(&point_m().unwrap());
        let n = encode_point(&point_n().unwrap());
        assert_ne!(g, m);
        assert_ne!(g, n);
        assert_ne!(m, n);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        // Arrange – a valid encoding with one byte chopped off
        let encoded = encode_point(&generator());

        // Act
        let result = decode_point(&encoded[..POINT_LEN - 1]);

        // Assert
        assert_eq!(
            result,
            Err(CurveError::WrongLength {
                expected: POINT_LEN,
                actual: POINT_LEN - 1
            })
        );
    }

    #[test]
    fn test_decode_rejects_missing_uncompressed_marker() {
        // Arrange – same coordinates, but tagged as a compressed point
        let mut encoded = encode_point(&generator());
        encoded[0] = 0x02;

        // Act / Assert
        assert_eq!(
            decode_point(&encoded),
            Err(CurveError::MissingUncompressedMarker(0x02))
        );
    }

    #[test]
    fn test_decode_rejects_point_off_the_curve() {
        // Arrange – perturb the Y coordinate so the curve equation fails
        let mut encoded = encode_point(&generator());
        encoded[POINT_LEN - 1] ^= 0x01;

        // Act / Assert
        assert_eq!(decode_point(&encoded), Err(CurveError::NotOnCurve));
    }

    #[test]
    fn test_decode_rejects_all_zero_coordinates() {
        let mut encoded = [0u8; POINT_LEN];
        encoded[0] = UNCOMPRESSED_TAG;
        assert_eq!(decode_point(&encoded), Err(CurveError::NotOnCurve));
    }
}
