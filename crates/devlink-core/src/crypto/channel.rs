//! AES-128-GCM cipher for the encrypted pairing channel.
//!
//! After SPAKE2 both sides hold the same transcript hash.  The channel key is
//! derived from it with HKDF-SHA256 (extract with an empty salt, then expand
//! with a fixed label).  Both directions share that one key, so the nonce
//! spaces are kept apart by a 4-byte direction prefix:
//!
//! ```text
//! nonce = [prefix:4][counter:8 little-endian]
//!
//! initiator → responder   prefix 00 00 00 01
//! responder → initiator   prefix 00 00 00 02
//! ```
//!
//! Each direction's counter starts at 0 and only moves forward.  Running out
//! of counter values is an error; the counter never wraps.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::spake2::{PakeRole, SharedSecret};
use crate::error::ErrorClass;

/// AES-128 key length.
pub const KEY_LEN: usize = 16;

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// HKDF expand label for the channel key.
pub const CHANNEL_KEY_INFO: &[u8] = b"adb pairing_auth aes-128-gcm key";

/// Nonce prefix for traffic sent by the initiator.
pub const INITIATOR_NONCE_PREFIX: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Nonce prefix for traffic sent by the responder.
pub const RESPONDER_NONCE_PREFIX: [u8; 4] = [0x00, 0x00, 0x00, 0x02];

/// Errors raised by the pairing channel cipher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// HKDF could not produce the channel key.
    #[error("channel key derivation failed")]
    KeyDerivation,

    /// Encryption failed.
    #[error("channel encryption failed")]
    Encrypt,

    /// The ciphertext did not authenticate under the channel key.
    #[error("channel message failed authentication")]
    Authentication,

    /// A direction's counter reached its end.
    #[error("nonce counter exhausted")]
    NonceExhausted,
}

impl ChannelError {
    /// Classifies this error for the caller's attempt boundary.
    pub fn class(&self) -> ErrorClass {
        ErrorClass::PairingProtocol
    }
}

/// One direction's nonce sequence.
#[derive(Debug, Clone)]
struct DirectionalNonce {
    prefix: [u8; 4],
    counter: u64,
}

impl DirectionalNonce {
    fn new(prefix: [u8; 4]) -> Self {
        Self { prefix, counter: 0 }
    }

    fn peek(&self) -> Result<[u8; NONCE_LEN], ChannelError> {
        if self.counter == u64::MAX {
            return Err(ChannelError::NonceExhausted);
        }
        Ok(build_nonce(self.prefix, self.counter))
    }

    fn advance(&mut self) {
        self.counter += 1;
    }
}

fn build_nonce(prefix: [u8; 4], counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..4].copy_from_slice(&prefix);
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Derives the 16-byte channel key from the SPAKE2 shared secret.
///
/// # Errors
///
/// Returns [`ChannelError::KeyDerivation`] if HKDF rejects the output length.
pub fn derive_channel_key(secret: &SharedSecret) -> Result<Zeroizing<[u8; KEY_LEN]>, ChannelError> {
    let hk = Hkdf::<Sha256>::new(Some(&[][..]), secret.as_bytes());
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(CHANNEL_KEY_INFO, key.as_mut_slice())
        .map_err(|_| ChannelError::KeyDerivation)?;
    Ok(key)
}

/// Authenticated encryption for one end of the pairing channel.
///
/// The key schedule is wiped when the cipher is dropped.
pub struct PairingCipher {
    cipher: Aes128Gcm,
    send: DirectionalNonce,
    recv: DirectionalNonce,
}

impl PairingCipher {
    /// Builds the cipher for `role` from the handshake's shared secret.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::KeyDerivation`] if the key cannot be derived.
    pub fn new(secret: &SharedSecret, role: PakeRole) -> Result<Self, ChannelError> {
        let key = derive_channel_key(secret)?;
        let cipher =
            Aes128Gcm::new_from_slice(key.as_slice()).map_err(|_| ChannelError::KeyDerivation)?;
        let (send_prefix, recv_prefix) = match role {
            PakeRole::Initiator => (INITIATOR_NONCE_PREFIX, RESPONDER_NONCE_PREFIX),
            PakeRole::Responder => (RESPONDER_NONCE_PREFIX, INITIATOR_NONCE_PREFIX),
        };
        Ok(Self {
            cipher,
            send: DirectionalNonce::new(send_prefix),
            recv: DirectionalNonce::new(recv_prefix),
        })
    }

    /// Encrypts one outbound message under the next send nonce.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NonceExhausted`] or [`ChannelError::Encrypt`].
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let nonce = self.send.peek()?;
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| ChannelError::Encrypt)?;
        self.send.advance();
        Ok(ciphertext)
    }

    /// Decrypts one inbound message under the next receive nonce.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Authentication`] if the tag does not verify,
    /// which is also what a mismatched pairing code looks like.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, ChannelError> {
        let nonce = self.recv.peek()?;
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| ChannelError::Authentication)?;
        self.recv.advance();
        Ok(Zeroizing::new(plaintext))
    }

    /// Number of messages encrypted so far.
    pub fn sent(&self) -> u64 {
        self.send.counter
    }

    /// Number of messages decrypted so far.
    pub fn received(&self) -> u64 {
        self.recv.counter
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::spake2::Spake2;
    use std::collections::HashSet;

    fn paired_ciphers(code_a: &[u8], code_b: &[u8]) -> (PairingCipher, PairingCipher) {
        let a = Spake2::start(PakeRole::Initiator, code_a).unwrap();
        let b = Spake2::start(PakeRole::Responder, code_b).unwrap();
        let (x, y) = (*a.message(), *b.message());
        let sa = a.finish(&y).unwrap();
        let sb = b.finish(&x).unwrap();
        (
            PairingCipher::new(&sa, PakeRole::Initiator).unwrap(),
            PairingCipher::new(&sb, PakeRole::Responder).unwrap(),
        )
    }

    #[test]
    fn test_messages_flow_in_both_directions() {
        let (mut client, mut daemon) = paired_ciphers(b"482913", b"482913");

        let c1 = client.encrypt(b"client hello").unwrap();
        assert_eq!(daemon.decrypt(&c1).unwrap().as_slice(), b"client hello");

        let d1 = daemon.encrypt(b"daemon hello").unwrap();
        assert_eq!(client.decrypt(&d1).unwrap().as_slice(), b"daemon hello");

        assert_eq!(client.sent(), 1);
        assert_eq!(client.received(), 1);
    }

    #[test]
    fn test_wrong_code_fails_authenticated_decryption() {
        let (mut client, mut daemon) = paired_ciphers(b"482913", b"482914");
        let ciphertext = client.encrypt(b"peer info").unwrap();
        assert_eq!(daemon.decrypt(&ciphertext).unwrap_err(), ChannelError::Authentication);
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        let (mut client, mut daemon) = paired_ciphers(b"111111", b"111111");
        let mut ciphertext = client.encrypt(b"payload").unwrap();
        ciphertext[0] ^= 0x01;
        assert_eq!(daemon.decrypt(&ciphertext).unwrap_err(), ChannelError::Authentication);
    }

    #[test]
    fn test_reflected_message_does_not_decrypt() {
        // A message the client sent must not authenticate as one the daemon
        // sent, because the direction prefixes differ.
        let (mut client, _daemon) = paired_ciphers(b"222222", b"222222");
        let ciphertext = client.encrypt(b"echo").unwrap();
        assert_eq!(client.decrypt(&ciphertext).unwrap_err(), ChannelError::Authentication);
    }

    #[test]
    fn test_directions_never_share_a_nonce() {
        // Arrange
        let mut initiator_send = DirectionalNonce::new(INITIATOR_NONCE_PREFIX);
        let mut responder_send = DirectionalNonce::new(RESPONDER_NONCE_PREFIX);
        let mut seen = HashSet::new();

        // Act – N messages one way, M the other
        for _ in 0..300 {
            assert!(seen.insert(initiator_send.peek().unwrap()));
            initiator_send.advance();
        }
        for _ in 0..177 {
            assert!(seen.insert(responder_send.peek().unwrap()));
            responder_send.advance();
        }

        // Assert
        assert_eq!(seen.len(), 477);
    }

    #[test]
    fn test_nonce_layout_is_prefix_then_le_counter() {
        let nonce = build_nonce(RESPONDER_NONCE_PREFIX, 0x0102);
        assert_eq!(nonce, [0, 0, 0, 2, 0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_exhausted_counter_refuses_to_encrypt() {
        let (mut client, _) = paired_ciphers(b"333333", b"333333");
        client.send.counter = u64::MAX;
        assert_eq!(client.encrypt(b"x").unwrap_err(), ChannelError::NonceExhausted);
    }

    #[test]
    fn test_failed_decrypt_does_not_advance_counter() {
        let (mut client, mut daemon) = paired_ciphers(b"444444", b"444444");
        assert!(daemon.decrypt(b"garbage that is long enough").is_err());
        let ciphertext = client.encrypt(b"real").unwrap();
        assert_eq!(daemon.decrypt(&ciphertext).unwrap().as_slice(), b"real");
    }
}
