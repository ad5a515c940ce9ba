//! End-to-end pairing between the initiator and responder roles.
//!
//! Both sides run over an in-memory duplex pipe and over real localhost TCP,
//! so the full packet framing, PAKE, and encrypted peer-info exchange are
//! exercised without a device.

use std::time::Duration;

use devlink_client::infrastructure::pairing::{
    pair_as_initiator, pair_as_responder, pair_device, PairingError,
};
use devlink_core::crypto::channel::ChannelError;
use devlink_core::protocol::pairing::{PeerInfo, PeerInfoKind};
use devlink_core::ErrorClass;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

fn client_info() -> PeerInfo {
    PeerInfo {
        kind: PeerInfoKind::PublicKey,
        name: "alice-laptop".into(),
        key: vec![0xA1; 32],
    }
}

fn device_info() -> PeerInfo {
    PeerInfo {
        kind: PeerInfoKind::DeviceGuid,
        name: "adb-1A2B3C4D".into(),
        key: b"device-guid-0001".to_vec(),
    }
}

#[tokio::test]
async fn test_same_code_exchanges_identities() {
    // Arrange
    let (mut client, mut device) = tokio::io::duplex(16 * 1024);
    let responder = tokio::spawn(async move {
        pair_as_responder(&mut device, b"482913", &device_info(), TIMEOUT).await
    });

    // Act
    let seen_by_client = pair_as_initiator(&mut client, b"482913", &client_info(), TIMEOUT)
        .await
        .unwrap();
    let seen_by_device = responder.await.unwrap().unwrap();

    // Assert
    assert_eq!(seen_by_client, device_info());
    assert_eq!(seen_by_device, client_info());
}

#[tokio::test]
async fn test_wrong_code_fails_closed_at_first_decryption() {
    // Arrange
    let (mut client, mut device) = tokio::io::duplex(16 * 1024);
    let responder = tokio::spawn(async move {
        // The responder drops its end on failure, which ends the initiator's read.
        pair_as_responder(&mut device, b"482913", &device_info(), TIMEOUT).await
    });

    // Act
    let client_result = pair_as_initiator(&mut client, b"482914", &client_info(), TIMEOUT).await;
    let device_result = responder.await.unwrap();

    // Assert – the device learns of the mismatch only by failing to decrypt
    assert!(matches!(
        device_result,
        Err(PairingError::Channel(ChannelError::Authentication))
    ));
    let client_err = client_result.unwrap_err();
    assert!(matches!(client_err, PairingError::Io(_)));
}

#[tokio::test]
async fn test_pair_device_over_tcp() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let device = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        pair_as_responder(&mut socket, b"000111", &device_info(), TIMEOUT).await
    });

    // Act
    let peer = pair_device(addr, "000111", &client_info(), TIMEOUT, &CancellationToken::new())
        .await
        .unwrap();

    // Assert
    assert_eq!(peer.name, "adb-1A2B3C4D");
    assert_eq!(device.await.unwrap().unwrap().key, vec![0xA1; 32]);
}

#[tokio::test]
async fn test_silent_peer_times_out_as_transient() {
    // Arrange – a device that accepts but never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _device = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(socket);
    });

    // Act
    let err = pair_device(
        addr,
        "000111",
        &client_info(),
        Duration::from_millis(200),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    // Assert
    assert!(matches!(err, PairingError::Timeout(_)));
    assert_eq!(err.class(), ErrorClass::TransientIo);
}

#[tokio::test]
async fn test_cancel_mid_exchange_returns_promptly() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _device = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(socket);
    });
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = pair_device(addr, "000111", &client_info(), TIMEOUT, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, PairingError::Cancelled));
}
