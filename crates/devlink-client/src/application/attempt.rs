//! The error boundary of one user-initiated attempt.
//!
//! Each use case returns an [`AttemptError`].  Callers decide what to do from
//! its [`ErrorClass`] (retry from discovery, ask for a new code, give up) and
//! show the user only [`AttemptError::user_message`], never the inner detail.

use devlink_core::protocol::privileged::PrivilegedError;
use devlink_core::ErrorClass;
use thiserror::Error;

use crate::infrastructure::discovery::{DiscoveryError, ServicePhase};
use crate::infrastructure::keystore::KeyStoreError;
use crate::infrastructure::pairing::PairingError;
use crate::infrastructure::privileged::PrivilegedClientError;
use crate::infrastructure::wire::WireConnError;

/// Any failure of a pairing, connect, or injection attempt.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("no {0:?} service found")]
    NotFound(ServicePhase),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Pairing(#[from] PairingError),

    #[error(transparent)]
    Wire(#[from] WireConnError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Privileged(#[from] PrivilegedClientError),

    #[error(transparent)]
    Input(#[from] PrivilegedError),

    #[error("cancelled")]
    Cancelled,
}

impl AttemptError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AttemptError::NotFound(_) => ErrorClass::DiscoveryNotFound,
            AttemptError::Discovery(e) => e.class(),
            AttemptError::Pairing(e) => e.class(),
            AttemptError::Wire(e) => e.class(),
            AttemptError::KeyStore(e) => e.class(),
            AttemptError::Privileged(e) => e.class(),
            AttemptError::Input(e) => e.class(),
            AttemptError::Cancelled => ErrorClass::TransientIo,
        }
    }

    /// The generic message for the user.
    pub fn user_message(&self) -> &'static str {
        self.class().user_message()
    }
}
