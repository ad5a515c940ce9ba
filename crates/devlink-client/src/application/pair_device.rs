//! PairDevice use case: discovery, then the PAKE pairing exchange.
//!
//! The user types the code shown on the device.  We look for the device's
//! pairing service, run the exchange with our public key as the identity
//! record, and return what the device told us about itself.
//!
//! Nothing is retried here.  On any failure the attempt is over and every
//! secret it derived is gone; the caller starts again from discovery.

use tokio_util::sync::CancellationToken;
use tracing::info;

use devlink_core::protocol::pairing::{PeerInfo, PeerInfoKind};

use crate::application::attempt::AttemptError;
use crate::infrastructure::discovery::{discover, ServiceBrowser, ServiceEndpoint, ServicePhase};
use crate::infrastructure::keystore::KeyManager;
use crate::infrastructure::pairing::pair_device;
use crate::infrastructure::storage::config::ClientConfig;

/// The outcome of a successful pairing.
#[derive(Debug, Clone)]
pub struct PairedDevice {
    pub endpoint: ServiceEndpoint,
    pub peer: PeerInfo,
}

/// Builds the identity record this client sends during pairing.
pub async fn own_peer_info(keys: &KeyManager, config: &ClientConfig) -> Result<PeerInfo, AttemptError> {
    let identity = keys.get_or_create_identity().await?;
    Ok(PeerInfo {
        kind: PeerInfoKind::PublicKey,
        name: config.device_name.clone(),
        key: identity.public_key().to_vec(),
    })
}

/// Discovers the pairing service and pairs with `code`.
pub async fn pair(
    browser: &dyn ServiceBrowser,
    keys: &KeyManager,
    config: &ClientConfig,
    code: &str,
    cancel: &CancellationToken,
) -> Result<PairedDevice, AttemptError> {
    let endpoint = discover(browser, ServicePhase::Pairing, config.discovery_timeout(), cancel)
        .await?
        .ok_or(AttemptError::NotFound(ServicePhase::Pairing))?;

    let own = own_peer_info(keys, config).await?;
    let peer = pair_device(endpoint.socket_addr(), code, &own, config.io_timeout(), cancel).await?;
    info!(instance = %endpoint.instance, peer = %peer.name, "device paired");
    Ok(PairedDevice { endpoint, peer })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::discovery::MockServiceBrowser;
    use devlink_core::ErrorClass;

    fn config_in(dir: &std::path::Path) -> ClientConfig {
        ClientConfig {
            data_dir: dir.to_path_buf(),
            discovery_timeout_secs: 0,
            device_name: "bench".into(),
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn test_own_peer_info_carries_public_key_and_name() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyManager::with_file_protector(dir.path());
        let config = config_in(dir.path());

        // Act
        let info = own_peer_info(&keys, &config).await.unwrap();

        // Assert
        assert_eq!(info.kind, PeerInfoKind::PublicKey);
        assert_eq!(info.name, "bench");
        assert_eq!(info.key, keys.public_key().await.unwrap().to_vec());
    }

    #[tokio::test]
    async fn test_nothing_discovered_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyManager::with_file_protector(dir.path());
        let config = config_in(dir.path());
        let mut browser = MockServiceBrowser::new();
        browser.expect_browse().returning(|_| Ok(()));
        browser
            .expect_next_resolved()
            .returning(|| None)
            .times(0..=1);
        browser.expect_stop().return_const(());

        let err = pair(&browser, &keys, &config, "123456", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.class(), ErrorClass::DiscoveryNotFound);
    }
}
