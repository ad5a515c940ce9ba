//! mDNS service discovery for the device's pairing and connect ports.
//!
//! The debug daemon advertises two DNS-SD service types on the LAN, each on
//! an ephemeral port:
//!
//! | Phase | Service type |
//! |-------|--------------|
//! | pairing | `_adb-tls-pairing._tcp.local.` |
//! | connect | `_adb-tls-connect._tcp.local.` |
//!
//! [`discover`] browses for one phase and returns the first resolved
//! instance.  It gives up after a bounded timeout with `Ok(None)` (the caller
//! decides whether to retry) and never retries internally.
//!
//! # The browser seam (for beginners)
//!
//! The multicast machinery sits behind the [`ServiceBrowser`] trait so the
//! timeout, cancellation, and address-selection logic can be tested with a
//! mock instead of a real network.  [`MdnsBrowser`] is the production
//! implementation on top of `mdns-sd`.
//!
//! Every exit path of [`discover`] (found, timed out, cancelled, failed) stops
//! the browse through a drop guard, so no listener outlives the call.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use devlink_core::ErrorClass;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Service type advertised while the device shows a pairing code.
pub const PAIRING_SERVICE_TYPE: &str = "_adb-tls-pairing._tcp.local.";

/// Service type advertised for paired connections.
pub const CONNECT_SERVICE_TYPE: &str = "_adb-tls-connect._tcp.local.";

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The mDNS daemon could not be started or refused the browse.
    #[error("mDNS browse failed: {0}")]
    Browse(String),

    /// The browse channel closed before anything resolved.
    #[error("mDNS browse ended unexpectedly")]
    BrowseClosed,

    /// The caller cancelled the search.
    #[error("discovery cancelled")]
    Cancelled,
}

impl DiscoveryError {
    /// Classifies this error for the caller's attempt boundary.
    pub fn class(&self) -> ErrorClass {
        match self {
            DiscoveryError::Cancelled => ErrorClass::TransientIo,
            _ => ErrorClass::DiscoveryNotFound,
        }
    }
}

/// Which of the two advertised services to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePhase {
    Pairing,
    Connect,
}

impl ServicePhase {
    pub fn service_type(self) -> &'static str {
        match self {
            ServicePhase::Pairing => PAIRING_SERVICE_TYPE,
            ServicePhase::Connect => CONNECT_SERVICE_TYPE,
        }
    }
}

/// One resolved service instance, as reported by a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub service_type: String,
    pub fullname: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
}

/// A concrete endpoint to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// The DNS-SD instance name (e.g. `adb-1A2B3C-xyz._adb-tls-pairing._tcp.local.`).
    pub instance: String,
    pub host: IpAddr,
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Picks an address from a resolved service, preferring IPv4.
    pub fn from_resolved(service: &ResolvedService) -> Option<Self> {
        let host = service
            .addresses
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| service.addresses.first())
            .copied()?;
        Some(Self {
            instance: service.fullname.clone(),
            host,
            port: service.port,
        })
    }
}

// ── Browser seam ──────────────────────────────────────────────────────────────

/// Multicast service browsing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceBrowser: Send + Sync {
    /// Starts browsing for `service_type`.
    fn browse(&self, service_type: &str) -> Result<(), DiscoveryError>;

    /// Waits for the next resolved instance; `None` once the browse has ended.
    async fn next_resolved(&self) -> Option<ResolvedService>;

    /// Stops browsing for `service_type` and releases the listener.
    fn stop(&self, service_type: &str);
}

/// Stops the browse when dropped.
struct BrowseGuard<'a> {
    browser: &'a dyn ServiceBrowser,
    service_type: &'static str,
}

impl Drop for BrowseGuard<'_> {
    fn drop(&mut self) {
        self.browser.stop(self.service_type);
    }
}

/// Finds one instance of `phase`'s service.
///
/// Returns `Ok(None)` when nothing resolves within `timeout`.
///
/// # Errors
///
/// Returns [`DiscoveryError::Cancelled`] if `cancel` fires first, or a
/// browse error from the underlying browser.
pub async fn discover(
    browser: &dyn ServiceBrowser,
    phase: ServicePhase,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Option<ServiceEndpoint>, DiscoveryError> {
    let service_type = phase.service_type();
    browser.browse(service_type)?;
    let _guard = BrowseGuard {
        browser,
        service_type,
    };
    debug!(service_type, ?timeout, "browsing");

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(service_type, "discovery cancelled");
                return Err(DiscoveryError::Cancelled);
            }
            _ = &mut deadline => {
                info!(service_type, "no service found before timeout");
                return Ok(None);
            }
            resolved = browser.next_resolved() => {
                let Some(service) = resolved else {
                    return Err(DiscoveryError::BrowseClosed);
                };
                if service.service_type != service_type {
                    continue;
                }
                match ServiceEndpoint::from_resolved(&service) {
                    Some(endpoint) => {
                        info!(instance = %endpoint.instance, addr = %endpoint.socket_addr(), "service resolved");
                        return Ok(Some(endpoint));
                    }
                    None => debug!(fullname = %service.fullname, "resolved without addresses"),
                }
            }
        }
    }
}

// ── mdns-sd implementation ────────────────────────────────────────────────────

/// [`ServiceBrowser`] backed by an `mdns-sd` daemon.
///
/// `mdns-sd` delivers events on its own channel; a small forwarding thread
/// moves resolved services onto a tokio channel so [`next_resolved`] can be
/// awaited alongside timeouts and cancellation.
///
/// [`next_resolved`]: ServiceBrowser::next_resolved
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    tx: mpsc::UnboundedSender<ResolvedService>,
    rx: Mutex<mpsc::UnboundedReceiver<ResolvedService>>,
}

impl MdnsBrowser {
    /// Starts the mDNS daemon.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Browse`] if the daemon cannot bind its sockets.
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Browse(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            daemon,
            tx,
            rx: Mutex::new(rx),
        })
    }
}

#[async_trait]
impl ServiceBrowser for MdnsBrowser {
    fn browse(&self, service_type: &str) -> Result<(), DiscoveryError> {
        let receiver = self
            .daemon
            .browse(service_type)
            .map_err(|e| DiscoveryError::Browse(e.to_string()))?;
        let tx = self.tx.clone();
        let wanted = service_type.to_string();

        std::thread::Builder::new()
            .name("devlink-mdns".to_string())
            .spawn(move || {
                while let Ok(event) = receiver.recv() {
                    match event {
                        ServiceEvent::ServiceResolved(info) => {
                            let resolved = ResolvedService {
                                service_type: wanted.clone(),
                                fullname: info.get_fullname().to_string(),
                                addresses: info.get_addresses().iter().copied().collect(),
                                port: info.get_port(),
                            };
                            if tx.send(resolved).is_err() {
                                break;
                            }
                        }
                        ServiceEvent::SearchStopped(_) => break,
                        other => debug!(?other, "mDNS event"),
                    }
                }
            })
            .map_err(|e| DiscoveryError::Browse(e.to_string()))?;
        Ok(())
    }

    async fn next_resolved(&self) -> Option<ResolvedService> {
        self.rx.lock().await.recv().await
    }

    fn stop(&self, service_type: &str) {
        if let Err(e) = self.daemon.stop_browse(service_type) {
            debug!(service_type, "stop_browse: {e}");
        }
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            warn!("mDNS daemon shutdown failed: {e}");
        }
    }
}

/// Convenience wrapper: a fresh [`MdnsBrowser`] for a single search.
pub async fn discover_mdns(
    phase: ServicePhase,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Option<ServiceEndpoint>, DiscoveryError> {
    let browser = MdnsBrowser::new()?;
    discover(&browser, phase, timeout, cancel).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resolved(service_type: &str, addresses: Vec<IpAddr>) -> ResolvedService {
        ResolvedService {
            service_type: service_type.to_string(),
            fullname: format!("adb-XYZ.{service_type}"),
            addresses,
            port: 37_123,
        }
    }

    /// A browser that never resolves anything and counts `stop` calls.
    #[derive(Default)]
    struct SilentBrowser {
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ServiceBrowser for SilentBrowser {
        fn browse(&self, _service_type: &str) -> Result<(), DiscoveryError> {
            Ok(())
        }

        async fn next_resolved(&self) -> Option<ResolvedService> {
            std::future::pending().await
        }

        fn stop(&self, _service_type: &str) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_resolved_service_is_returned_and_browse_stopped() {
        // Arrange
        let mut browser = MockServiceBrowser::new();
        browser
            .expect_browse()
            .withf(|t| t == PAIRING_SERVICE_TYPE)
            .times(1)
            .returning(|_| Ok(()));
        browser.expect_next_resolved().times(1).returning(|| {
            Some(resolved(
                PAIRING_SERVICE_TYPE,
                vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))],
            ))
        });
        browser
            .expect_stop()
            .withf(|t| t == PAIRING_SERVICE_TYPE)
            .times(1)
            .return_const(());

        // Act
        let endpoint = discover(
            &browser,
            ServicePhase::Pairing,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

        // Assert
        assert_eq!(endpoint.socket_addr(), "192.168.1.20:37123".parse().unwrap());
    }

    #[tokio::test]
    async fn test_ipv4_is_preferred_over_ipv6() {
        let mut browser = MockServiceBrowser::new();
        browser.expect_browse().returning(|_| Ok(()));
        browser.expect_next_resolved().returning(|| {
            Some(resolved(
                CONNECT_SERVICE_TYPE,
                vec![
                    IpAddr::V6(Ipv6Addr::LOCALHOST),
                    IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
                ],
            ))
        });
        browser.expect_stop().return_const(());

        let endpoint = discover(
            &browser,
            ServicePhase::Connect,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(endpoint.host, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
    }

    #[tokio::test]
    async fn test_browse_failure_is_propagated() {
        let mut browser = MockServiceBrowser::new();
        browser
            .expect_browse()
            .returning(|_| Err(DiscoveryError::Browse("no interfaces".into())));

        let result = discover(
            &browser,
            ServicePhase::Pairing,
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(DiscoveryError::Browse(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_none_and_releases_listener() {
        // Arrange
        let browser = SilentBrowser::default();

        // Act
        let result = discover(
            &browser,
            ServicePhase::Pairing,
            Duration::from_secs(30),
            &CancellationToken::new(),
        )
        .await;

        // Assert
        assert!(matches!(result, Ok(None)));
        assert_eq!(browser.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_returns_promptly_and_releases_listener() {
        let browser = SilentBrowser::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = discover(&browser, ServicePhase::Connect, Duration::from_secs(30), &cancel).await;

        assert!(matches!(result, Err(DiscoveryError::Cancelled)));
        assert_eq!(browser.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_endpoint_requires_an_address() {
        assert!(ServiceEndpoint::from_resolved(&resolved(PAIRING_SERVICE_TYPE, vec![])).is_none());
    }

    #[test]
    fn test_service_types_are_dns_sd_names() {
        for t in [PAIRING_SERVICE_TYPE, CONNECT_SERVICE_TYPE] {
            assert!(t.starts_with('_'));
            assert!(t.ends_with("._tcp.local."));
        }
    }
}
