//! Integration tests for the engine's role state machine and query surface.
//!
//! These tests drive a single engine through its public API the way the
//! call boundary does: open a role, create or join nothing, and check that
//! every operation outside the transition table fails with `InvalidState`
//! while leaving state untouched. Hosting tests bind real sockets on
//! loopback with ephemeral ports; no peer is involved here (peer scenarios
//! live in `discovery_integration.rs`).

use std::net::Ipv4Addr;
use std::time::Duration;

use lanlink_core::domain::descriptor::{
    AcceptPolicy, DisconnectReason, NetworkInfo, NodeLatestUpdate, SecurityMode,
};
use lanlink_core::domain::session::{ConnectRequest, CreateNetworkConfig, ScanFilter};
use lanlink_node::{EngineConfig, EngineError, SessionEngine, SessionState};

fn test_engine_config() -> EngineConfig {
    EngineConfig {
        bind_addr: Ipv4Addr::LOCALHOST,
        discovery_port: 0,
        session_port: 0,
        broadcast_addr: Ipv4Addr::LOCALHOST,
        local_ipv4: Some(Ipv4Addr::LOCALHOST),
        advertise_interval: Duration::from_millis(100),
        scan_window: Duration::from_millis(300),
        connect_timeout: Duration::from_secs(2),
        ..EngineConfig::default()
    }
}

fn session_config() -> CreateNetworkConfig {
    CreateNetworkConfig {
        network_name: "garage-lobby".to_string(),
        local_communication_id: 0x0100_4000_0000_1234,
        scene_id: 2,
        local_communication_version: 1,
        security_mode: SecurityMode::Open,
        security_key: Vec::new(),
        node_count_max: 4,
        host_nickname: "garage-host".to_string(),
        advertise_data: vec![0x11, 0x22],
    }
}

/// Walks the full access-point lifecycle:
/// Idle -> opened -> hosting -> opened -> Idle.
#[tokio::test]
async fn test_access_point_lifecycle_walk() {
    let engine = SessionEngine::new(test_engine_config());

    engine.open_access_point().await.unwrap();
    engine.create_network(session_config()).await.unwrap();
    assert_eq!(engine.get_state().await, SessionState::AccessPointCreated);

    engine.destroy_network().await.unwrap();
    assert_eq!(engine.get_state().await, SessionState::AccessPointOpened);

    engine.close_access_point().await.unwrap();
    assert_eq!(engine.get_state().await, SessionState::Idle);
}

/// After `create_network`, the descriptor snapshot reflects the input
/// configuration and the node table holds exactly the host at slot 0.
#[tokio::test]
async fn test_created_network_reflects_config_with_host_as_node_zero() {
    let engine = SessionEngine::new(test_engine_config());
    engine.open_access_point().await.unwrap();
    engine.create_network(session_config()).await.unwrap();

    let info = engine.get_network_info().await;
    assert_eq!(info.network_name, "garage-lobby");
    assert_eq!(info.local_communication_id, 0x0100_4000_0000_1234);
    assert_eq!(info.scene_id, 2);
    assert_eq!(info.local_communication_version, 1);
    assert_eq!(info.security_mode, SecurityMode::Open);
    assert_eq!(info.node_count_max, 4);
    assert_eq!(info.advertise_data, vec![0x11, 0x22]);
    assert_ne!(info.session_id, uuid::Uuid::nil());
    assert_ne!(info.host_port, 0);

    assert_eq!(info.node_count, 1);
    let host = &info.nodes[0];
    assert_eq!(host.node_id, 0);
    assert!(host.is_connected);
    assert_eq!(host.nickname, "garage-host");
    assert_eq!(host.ipv4, Ipv4Addr::LOCALHOST);

    engine.finalize().await;
}

/// The derived query snapshots mirror the created network's identity and
/// security fields.
#[tokio::test]
async fn test_derived_snapshots_follow_created_network() {
    let engine = SessionEngine::new(test_engine_config());
    engine.open_access_point().await.unwrap();
    let mut cfg = session_config();
    cfg.security_mode = SecurityMode::SharedKey;
    cfg.security_key = b"garage-passphrase".to_vec();
    engine.create_network(cfg).await.unwrap();

    let info = engine.get_network_info().await;
    let security = engine.get_security_parameter().await;
    assert_eq!(security.session_id, info.session_id);
    assert_eq!(&security.data[..], &b"garage-passphrase"[..16]);

    let config = engine.get_network_config().await;
    assert_eq!(config.local_communication_id, info.local_communication_id);
    assert_eq!(config.scene_id, 2);
    assert_eq!(config.node_count_max, 4);
    assert_eq!(config.local_communication_version, 1);

    engine.finalize().await;
}

/// The latest-update query reports the host's own slot as joined once,
/// then reads back clean.
#[tokio::test]
async fn test_latest_update_flags_clear_on_read() {
    let engine = SessionEngine::new(test_engine_config());
    engine.open_access_point().await.unwrap();
    engine.create_network(session_config()).await.unwrap();

    let (_, updates) = engine.get_network_info_latest_update().await;
    assert_eq!(updates[0].state_change, NodeLatestUpdate::FLAG_JOIN);

    let (_, updates) = engine.get_network_info_latest_update().await;
    assert!(updates.iter().all(|u| u.state_change == 0));

    engine.finalize().await;
}

/// Operations outside the transition table fail with `InvalidState` and
/// leave the state unchanged.
#[tokio::test]
async fn test_out_of_table_operations_fail_without_side_effects() {
    let engine = SessionEngine::new(test_engine_config());
    engine.open_access_point().await.unwrap();
    engine.create_network(session_config()).await.unwrap();

    // Hosting: the access point cannot close, station ops are illegal,
    // and scanning is not tolerated.
    assert!(matches!(
        engine.close_access_point().await,
        Err(EngineError::InvalidState(SessionState::AccessPointCreated))
    ));
    assert!(matches!(
        engine.open_station().await,
        Err(EngineError::InvalidState(_))
    ));
    assert!(matches!(
        engine.scan(&ScanFilter::any(), 8).await,
        Err(EngineError::InvalidState(_))
    ));
    let request = ConnectRequest {
        nickname: "x".to_string(),
        ..ConnectRequest::default()
    };
    assert!(matches!(
        engine.connect(&NetworkInfo::default(), &request).await,
        Err(EngineError::InvalidState(_))
    ));
    assert_eq!(engine.get_state().await, SessionState::AccessPointCreated);

    engine.finalize().await;
}

/// The accept policy is remembered from the opened state and stamped into
/// the descriptor when the network is created.
#[tokio::test]
async fn test_accept_policy_carries_into_created_network() {
    let engine = SessionEngine::new(test_engine_config());
    engine.open_access_point().await.unwrap();
    engine
        .set_station_accept_policy(AcceptPolicy::RejectAll)
        .await
        .unwrap();
    engine.create_network(session_config()).await.unwrap();

    assert_eq!(
        engine.get_network_info().await.accept_policy,
        AcceptPolicy::RejectAll
    );
    engine.finalize().await;
}

/// Replacing the advertise payload while hosting is visible in the next
/// snapshot; an oversized payload is rejected without change.
#[tokio::test]
async fn test_set_advertise_data_replaces_payload() {
    let engine = SessionEngine::new(test_engine_config());
    engine.open_access_point().await.unwrap();
    engine.create_network(session_config()).await.unwrap();

    engine.set_advertise_data(&[0xAB; 64]).await.unwrap();
    assert_eq!(engine.get_network_info().await.advertise_data, vec![0xAB; 64]);

    let oversized = vec![0u8; lanlink_core::ADVERTISE_DATA_MAX + 1];
    assert!(matches!(
        engine.set_advertise_data(&oversized).await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert_eq!(engine.get_network_info().await.advertise_data, vec![0xAB; 64]);

    engine.finalize().await;
}

/// Destroying a network records a user-initiated disconnect reason and
/// zeroes the descriptor snapshot.
#[tokio::test]
async fn test_destroy_network_resets_snapshot_and_reason() {
    let engine = SessionEngine::new(test_engine_config());
    engine.open_access_point().await.unwrap();
    engine.create_network(session_config()).await.unwrap();
    engine.destroy_network().await.unwrap();

    assert_eq!(engine.get_network_info().await, NetworkInfo::default());
    assert_eq!(
        engine.get_disconnect_reason().await,
        DisconnectReason::DisconnectedByUser
    );
    engine.finalize().await;
}

/// `finalize` tears a hosted session down from any state and leaves a
/// reusable engine; a second hosting round works on the same instance.
#[tokio::test]
async fn test_finalize_while_hosting_then_host_again() {
    let engine = SessionEngine::new(test_engine_config());
    engine.open_access_point().await.unwrap();
    engine.create_network(session_config()).await.unwrap();

    engine.finalize().await;
    assert_eq!(engine.get_state().await, SessionState::Idle);
    assert_eq!(engine.get_network_info().await, NetworkInfo::default());

    engine.open_access_point().await.unwrap();
    engine.create_network(session_config()).await.unwrap();
    assert_eq!(engine.get_state().await, SessionState::AccessPointCreated);
    engine.finalize().await;
}

/// An in-flight scan observes a concurrent `finalize` and fails with
/// `Cancelled` instead of running its window to completion.
#[tokio::test]
async fn test_finalize_cancels_in_flight_scan() {
    let engine = std::sync::Arc::new(SessionEngine::new(EngineConfig {
        scan_window: Duration::from_secs(5),
        // Discard port: the probe goes out, nothing ever answers.
        discovery_port: 9,
        ..test_engine_config()
    }));

    let scanner = {
        let engine = std::sync::Arc::clone(&engine);
        tokio::spawn(async move { engine.scan(&ScanFilter::any(), 8).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.finalize().await;

    let result = tokio::time::timeout(Duration::from_secs(2), scanner)
        .await
        .expect("scan must end promptly after finalize")
        .unwrap();
    assert!(matches!(result, Err(EngineError::Cancelled)));
}

/// A scan against a silent segment returns an empty result set once the
/// window closes; an empty scan is a success, not an error.
#[tokio::test]
async fn test_scan_with_no_hosts_returns_empty() {
    let engine = SessionEngine::new(EngineConfig {
        // Probe into a port nobody listens on.
        discovery_port: 1,
        ..test_engine_config()
    });
    let results = engine.scan(&ScanFilter::any(), 8).await.unwrap();
    assert!(results.is_empty());
}
