//! Cross-cutting failure classification.
//!
//! Every typed error in the workspace maps onto one [`ErrorClass`].  The class
//! decides two things at an attempt boundary:
//!
//! - whether the caller may retry (and from where), and
//! - which generic message the user sees.
//!
//! The user-facing strings are intentionally coarse.  A pairing that failed
//! because of an invalid curve point and one that failed because the code was
//! mistyped both read "wrong code", so the message never tells an attacker
//! which internal step rejected them.

use std::fmt;

/// The five failure classes a caller has to distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Discovery timed out without resolving the requested service.
    DiscoveryNotFound,
    /// Pairing framing or cryptographic validation failed.  Secrets are gone;
    /// restart from discovery.
    PairingProtocol,
    /// The peer refused our credential.  Never retried with the same one.
    AuthenticationRejected,
    /// A payload, event count, path length, or text length was over its bound.
    ResourceLimitExceeded,
    /// Reset, timeout, or EOF.  The whole handshake may be retried from the
    /// beginning; nothing is resumed mid-protocol.
    TransientIo,
}

impl ErrorClass {
    /// Returns the generic message shown to the user for this class.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorClass::DiscoveryNotFound => "device not found",
            ErrorClass::PairingProtocol => "wrong code",
            ErrorClass::AuthenticationRejected => "device refused the connection",
            ErrorClass::ResourceLimitExceeded => "request rejected",
            ErrorClass::TransientIo => "connection lost \u{2014} retry pairing",
        }
    }

    /// Returns `true` when restarting the whole operation may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::DiscoveryNotFound | ErrorClass::TransientIo)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user_message())
    }
}
