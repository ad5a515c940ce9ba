//! SPAKE2 over P-256: turns a short pairing code into a strong shared secret.
//!
//! # How the exchange works (for beginners)
//!
//! Both sides know the short code shown on the device screen and two fixed
//! public points `M` and `N` that nobody knows the discrete log of.
//!
//! ```text
//! Initiator (client)                      Responder (daemon)
//! ──────────────────                      ──────────────────
//! w = KDF(code) mod n                     w = KDF(code) mod n
//! x ← random scalar                       y ← random scalar
//! X = x·G + w·M        ── X ──▶
//!                      ◀── Y ──           Y = y·G + w·N
//! K = x·(Y − w·N)                         K = y·(X − w·M)
//!
//! S = SHA-256(len(X)‖X ‖ len(Y)‖Y ‖ len(K)‖K ‖ len(w)‖w)
//! ```
//!
//! Blinding with `w·M`/`w·N` means an eavesdropper sees points that look
//! uniformly random, and an active attacker gets exactly one online guess per
//! run.  When the codes differ the two `K` values differ, so the derived
//! channel keys differ and the first authenticated decryption fails.  Nothing
//! before that point reveals which side had the wrong code.
//!
//! # Secret handling
//!
//! The password scalar and the private scalar are stored as fixed 32-byte
//! arrays inside [`Zeroizing`] and are wiped when the [`Spake2`] value is
//! dropped or consumed by [`Spake2::finish`], on success and failure alike.
//! The `p256::Scalar` values rebuilt from those bytes during
//! [`Spake2::finish`] are stack temporaries of the `p256` crate and are not
//! individually wiped; that exposure is limited to the duration of one call.

use hkdf::Hkdf;
use p256::elliptic_curve::ops::Reduce;
use p256::elliptic_curve::{Field, Group, PrimeField};
use p256::{AffinePoint, FieldBytes, ProjectivePoint, Scalar, U256};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::curve::{self, CurveError, POINT_LEN};
use crate::error::ErrorClass;

/// Length of the derived shared secret.
pub const SHARED_SECRET_LEN: usize = 32;

/// Length of an encoded scalar.
pub const SCALAR_LEN: usize = 32;

/// HKDF info label for the password-scalar derivation.
const PASSWORD_SCALAR_INFO: &[u8] = b"devlink spake2 password scalar";

/// Errors raised by the SPAKE2 handshake.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PakeError {
    /// The peer's message was not a valid curve point.
    #[error("invalid peer message: {0}")]
    InvalidPeerMessage(#[from] CurveError),

    /// The pairing code was empty.
    #[error("pairing code must not be empty")]
    EmptyCode,

    /// The unblinded peer point collapsed to the identity.
    #[error("shared point is the identity")]
    DegenerateSharedPoint,

    /// The key-derivation function rejected its parameters.
    #[error("key derivation failed")]
    KeyDerivation,
}

impl PakeError {
    /// Classifies this error for the caller's attempt boundary.
    pub fn class(&self) -> ErrorClass {
        ErrorClass::PairingProtocol
    }
}

/// Which side of the exchange this party plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PakeRole {
    /// The side that sends first and blinds with `M`.
    Initiator,
    /// The side that answers and blinds with `N`.
    Responder,
}

impl PakeRole {
    /// Returns the opposite role.
    pub fn peer(self) -> PakeRole {
        match self {
            PakeRole::Initiator => PakeRole::Responder,
            PakeRole::Responder => PakeRole::Initiator,
        }
    }
}

/// The 32-byte transcript hash both sides agree on.  Wiped on drop.
#[derive(Clone)]
pub struct SharedSecret(Zeroizing<[u8; SHARED_SECRET_LEN]>);

impl SharedSecret {
    /// Borrows the secret bytes.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_LEN] {
        &self.0
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        crate::crypto::token::constant_time_eq(self.0.as_slice(), other.0.as_slice())
    }
}

impl Eq for SharedSecret {}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// One party's in-progress SPAKE2 state.
///
/// Created by [`Spake2::start`], which also produces the outbound message;
/// consumed by [`Spake2::finish`] once the peer's message arrives.
pub struct Spake2 {
    role: PakeRole,
    password_scalar: Zeroizing<[u8; SCALAR_LEN]>,
    private_scalar: Zeroizing<[u8; SCALAR_LEN]>,
    message: [u8; POINT_LEN],
}

impl Spake2 {
    /// Starts a handshake with a fresh random scalar from the OS RNG.
    ///
    /// # Errors
    ///
    /// Returns [`PakeError::EmptyCode`] for an empty code, or an error if a
    /// fixed curve constant is unusable.
    pub fn start(role: PakeRole, code: &[u8]) -> Result<Self, PakeError> {
        Self::start_with_rng(role, code, &mut OsRng)
    }

    /// Starts a handshake drawing the private scalar from `rng`.
    ///
    /// # Errors
    ///
    /// See [`Spake2::start`].
    pub fn start_with_rng<R: RngCore + CryptoRng>(
        role: PakeRole,
        code: &[u8],
        rng: &mut R,
    ) -> Result<Self, PakeError> {
        let password_scalar = password_scalar(code)?;
        let w = scalar_from_bytes(&password_scalar);

        let x = Scalar::random(&mut *rng);
        let private_scalar = Zeroizing::new(scalar_to_bytes(&x));

        let blind = ProjectivePoint::from(own_blinding_point(role)?);
        let public = ProjectivePoint::GENERATOR * x + blind * w;
        let message = curve::encode_point(&public.to_affine());

        Ok(Self {
            role,
            password_scalar,
            private_scalar,
            message,
        })
    }

    /// The role this party plays.
    pub fn role(&self) -> PakeRole {
        self.role
    }

    /// The outbound message (`X` for the initiator, `Y` for the responder).
    pub fn message(&self) -> &[u8; POINT_LEN] {
        &self.message
    }

    /// Consumes the peer's message and derives the shared secret.
    ///
    /// The peer point is validated before any arithmetic touches it.
    ///
    /// # Errors
    ///
    /// Returns [`PakeError::InvalidPeerMessage`] for a malformed or off-curve
    /// point and [`PakeError::DegenerateSharedPoint`] if unblinding yields
    /// the identity.
    pub fn finish(self, peer_message: &[u8]) -> Result<SharedSecret, PakeError> {
        let peer = curve::decode_point(peer_message).map_err(|e| {
            debug!(role = ?self.role, error = %e, "rejecting SPAKE2 peer message");
            e
        })?;

        let w = scalar_from_bytes(&self.password_scalar);
        let x = scalar_from_bytes(&self.private_scalar);
        let peer_blind = ProjectivePoint::from(own_blinding_point(self.role.peer())?);

        let shared = (ProjectivePoint::from(peer) - peer_blind * w) * x;
        if bool::from(shared.is_identity()) {
            debug!(role = ?self.role, "SPAKE2 unblinding produced the identity");
            return Err(PakeError::DegenerateSharedPoint);
        }
        let k = Zeroizing::new(curve::encode_point(&shared.to_affine()));

        let (x_msg, y_msg) = match self.role {
            PakeRole::Initiator => (&self.message[..], peer_message),
            PakeRole::Responder => (peer_message, &self.message[..]),
        };
        Ok(transcript_hash(x_msg, y_msg, k.as_slice(), self.password_scalar.as_slice()))
    }
}

/// Derives the password scalar `w` from the pairing code.
///
/// The code is both the HKDF salt and the HKDF input.  The fixed counterpart
/// protocol derives `w` this way, so it must not be changed.
///
/// # Errors
///
/// Returns [`PakeError::EmptyCode`] for an empty code.
pub fn password_scalar(code: &[u8]) -> Result<Zeroizing<[u8; SCALAR_LEN]>, PakeError> {
    if code.is_empty() {
        return Err(PakeError::EmptyCode);
    }
    let hk = Hkdf::<Sha256>::new(Some(code), code);
    let mut okm = Zeroizing::new([0u8; SCALAR_LEN]);
    hk.expand(PASSWORD_SCALAR_INFO, okm.as_mut_slice())
        .map_err(|_| PakeError::KeyDerivation)?;

    let reduced = <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(okm.as_slice()));
    Ok(Zeroizing::new(scalar_to_bytes(&reduced)))
}

/// Hashes the full transcript into the shared secret.
///
/// Each field is prefixed with its length as an 8-byte little-endian integer,
/// so no two distinct transcripts can produce the same hash input.
pub fn transcript_hash(x: &[u8], y: &[u8], k: &[u8], w: &[u8]) -> SharedSecret {
    let mut hasher = Sha256::new();
    for field in [x, y, k, w] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    let mut out = Zeroizing::new([0u8; SHARED_SECRET_LEN]);
    out.copy_from_slice(&hasher.finalize());
    SharedSecret(out)
}

fn own_blinding_point(role: PakeRole) -> Result<AffinePoint, PakeError> {
    let point = match role {
        PakeRole::Initiator => curve::point_m()?,
        PakeRole::Responder => curve::point_n()?,
    };
    Ok(point)
}

fn scalar_to_bytes(scalar: &Scalar) -> [u8; SCALAR_LEN] {
    let mut out = [0u8; SCALAR_LEN];
    out.copy_from_slice(&scalar.to_repr());
    out
}

fn scalar_from_bytes(bytes: &[u8; SCALAR_LEN]) -> Scalar {
    // Stored bytes are always canonical, so the reduction is the identity map.
    <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(bytes))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
