//! ConnectDevice use case: find the session port and open an authenticated
//! connection with the stored identity.
//!
//! The first connection after pairing usually needs the user to accept the
//! key on the device; the wait for that is bounded by
//! `approval_timeout_secs`.

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::attempt::AttemptError;
use crate::infrastructure::discovery::{discover, ServiceBrowser, ServicePhase};
use crate::infrastructure::keystore::KeyManager;
use crate::infrastructure::storage::config::ClientConfig;
use crate::infrastructure::wire::{ConnectTimeouts, WireConnection};

/// Timeouts for a session connection from the client config.
pub fn timeouts(config: &ClientConfig) -> ConnectTimeouts {
    ConnectTimeouts {
        io: config.io_timeout(),
        approval: config.approval_timeout(),
    }
}

/// Resolves the session endpoint: `target` if given, otherwise discovery.
pub async fn resolve_endpoint(
    browser: &dyn ServiceBrowser,
    config: &ClientConfig,
    target: Option<SocketAddr>,
    cancel: &CancellationToken,
) -> Result<SocketAddr, AttemptError> {
    if let Some(addr) = target {
        return Ok(addr);
    }
    let endpoint = discover(browser, ServicePhase::Connect, config.discovery_timeout(), cancel)
        .await?
        .ok_or(AttemptError::NotFound(ServicePhase::Connect))?;
    Ok(endpoint.socket_addr())
}

/// Connects and authenticates to the device.
pub async fn connect(
    browser: &dyn ServiceBrowser,
    keys: &KeyManager,
    config: &ClientConfig,
    target: Option<SocketAddr>,
    cancel: &CancellationToken,
) -> Result<WireConnection, AttemptError> {
    let addr = resolve_endpoint(browser, config, target, cancel).await?;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AttemptError::Cancelled),
        result = WireConnection::connect(addr, keys, &config.device_name, timeouts(config)) => {
            let connection = result?;
            info!(%addr, banner = connection.banner(), "session ready");
            Ok(connection)
        }
    }
}

/// Connects, runs one shell command, and returns its output.
pub async fn run_remote_command(
    browser: &dyn ServiceBrowser,
    keys: &KeyManager,
    config: &ClientConfig,
    target: Option<SocketAddr>,
    command: &str,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, AttemptError> {
    let connection = connect(browser, keys, config, target, cancel).await?;
    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AttemptError::Cancelled),
        result = connection.run_command(command) => result.map_err(AttemptError::from),
    };
    connection.close().await;
    output
}
