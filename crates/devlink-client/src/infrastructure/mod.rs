//! Infrastructure layer for the client.
//!
//! Contains the adapters that touch the outside world: multicast discovery,
//! TCP sockets, the Unix socket to the privileged worker, and files on disk.
//!
//! **Dependency rule**: this layer may depend on `devlink_core`, but MUST NOT
//! be imported by `devlink_core`.
//!
//! # Sub-modules
//!
//! - **`discovery`** – Finds the device's pairing or connect port via mDNS,
//!   behind a mockable `ServiceBrowser` seam.
//!
//! - **`pairing`** – Runs the PAKE exchange and the encrypted peer-info swap
//!   over the pairing socket.
//!
//! - **`keystore`** – The persistent signing identity, sealed at rest.
//!
//! - **`wire`** – The authenticated, multiplexed session connection.
//!
//! - **`privileged`** – Token file creation and the client for the local
//!   input-injection worker.
//!
//! - **`storage`** – TOML config and owner-only file helpers.

pub mod discovery;
pub mod keystore;
pub mod pairing;
pub mod privileged;
pub mod storage;
pub mod wire;
