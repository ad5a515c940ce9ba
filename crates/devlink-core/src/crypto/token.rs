//! The shared auth token for the privileged channel, and constant-time comparison.
//!
//! The client writes [`TOKEN_LEN`] random bytes to a file only it and the
//! worker can read.  The worker loads the file at startup and compares every
//! AUTH payload against it with [`constant_time_eq`], so the time a rejected
//! attempt takes does not depend on how many leading bytes were right.

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

/// Length of the shared token in bytes.
pub const TOKEN_LEN: usize = 32;

/// Error returned when token material has the wrong shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("auth token must be {expected} bytes, got {actual}")]
pub struct TokenLengthError {
    pub expected: usize,
    pub actual: usize,
}

/// Compares two byte strings in time independent of their contents.
///
/// Buffers of different length are rejected immediately, without looking at
/// any byte.  Equal-length buffers are XOR-accumulated over their full length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// The fixed-length shared secret authenticating privileged-channel clients.
///
/// The bytes are wiped on drop and never appear in `Debug` output.
#[derive(Clone)]
pub struct AuthToken(Zeroizing<[u8; TOKEN_LEN]>);

impl AuthToken {
    /// Generates a fresh random token from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; TOKEN_LEN]);
        OsRng.fill_bytes(bytes.as_mut_slice());
        Self(bytes)
    }

    /// Builds a token from exactly [`TOKEN_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TokenLengthError`] for any other length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TokenLengthError> {
        if bytes.len() != TOKEN_LEN {
            return Err(TokenLengthError {
                expected: TOKEN_LEN,
                actual: bytes.len(),
            });
        }
        let mut out = Zeroizing::new([0u8; TOKEN_LEN]);
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Borrows the raw token bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Returns `true` if `candidate` equals this token.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        constant_time_eq(self.0.as_slice(), candidate)
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_buffers_compare_equal() {
        assert!(constant_time_eq(b"abcdef", b"abcdef"));
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"", b"a"));
    }

    #[test]
    fn test_single_byte_difference_is_detected_anywhere() {
        let token = AuthToken::generate();
        for i in 0..TOKEN_LEN {
            let mut candidate = token.as_bytes().to_vec();
            candidate[i] ^= 0x80;
            assert!(!token.matches(&candidate), "difference at byte {i} went unnoticed");
        }
        assert!(token.matches(token.as_bytes()));
    }

    #[test]
    fn test_from_bytes_enforces_length() {
        assert!(AuthToken::from_bytes(&[0u8; TOKEN_LEN]).is_ok());
        assert_eq!(
            AuthToken::from_bytes(&[0u8; 5]).unwrap_err(),
            TokenLengthError {
                expected: TOKEN_LEN,
                actual: 5
            }
        );
    }

    #[test]
    fn test_generated_tokens_differ() {
        assert_ne!(AuthToken::generate().as_bytes(), AuthToken::generate().as_bytes());
    }

    #[test]
    fn test_debug_does_not_print_token() {
        assert_eq!(format!("{:?}", AuthToken::generate()), "AuthToken(..)");
    }
}
