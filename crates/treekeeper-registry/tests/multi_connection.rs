//! Scenarios spanning several named connections managed by one registry.

use std::sync::Arc;
use std::time::Duration;

use treekeeper_registry::ConnectionRegistry;
use treekeeper_transport::{Ensemble, MemoryEnsemble};
use treekeeper_types::{ConnectionConfig, CreateMode, SessionState, VERSION_ANY};

fn memory_registry() -> ConnectionRegistry {
    ConnectionRegistry::new(Arc::new(|hosts: &str| {
        Arc::new(MemoryEnsemble::new(hosts)) as Arc<dyn Ensemble>
    }))
}

#[tokio::test]
async fn test_connections_are_isolated_stores() {
    let registry = memory_registry();
    let zk1 = registry
        .add("zk1", "h1:2181", ConnectionConfig::fast())
        .await
        .unwrap();
    let zk2 = registry
        .add("zk2", "h2:2181", ConnectionConfig::fast())
        .await
        .unwrap();
    zk1.wait_connected(Duration::from_secs(2)).await.unwrap();
    zk2.wait_connected(Duration::from_secs(2)).await.unwrap();

    zk1.create("/only-on-one", b"x".to_vec(), Vec::new(), CreateMode::Persistent)
        .await
        .unwrap();

    assert!(zk1.exists("/only-on-one").await.unwrap().is_some());
    assert!(zk2.exists("/only-on-one").await.unwrap().is_none());
    registry.close_all().await;
}

#[tokio::test]
async fn test_operations_through_looked_up_handle() {
    let registry = memory_registry();
    registry
        .add("zk1", "h1:2181", ConnectionConfig::fast())
        .await
        .unwrap();

    let conn = registry.get("zk1").await.unwrap();
    conn.wait_connected(Duration::from_secs(2)).await.unwrap();
    conn.create("/cfg", b"a=1".to_vec(), Vec::new(), CreateMode::Persistent)
        .await
        .unwrap();
    let (data, stat) = conn.read("/cfg").await.unwrap();
    assert_eq!(data, b"a=1");
    assert_eq!(stat.version, 0);

    conn.delete("/cfg", VERSION_ANY).await.unwrap();
    assert!(conn.exists("/cfg").await.unwrap().is_none());
    registry.close_all().await;
}

#[tokio::test]
async fn test_state_stream_interleaves_tagged_by_connect_string() {
    let registry = memory_registry();
    let mut states = registry.subscribe_state();

    let zk1 = registry
        .add("zk1", "h1:2181", ConnectionConfig::fast())
        .await
        .unwrap();
    zk1.wait_connected(Duration::from_secs(2)).await.unwrap();
    let zk2 = registry
        .add("zk2", "h2:2181", ConnectionConfig::fast())
        .await
        .unwrap();
    zk2.wait_connected(Duration::from_secs(2)).await.unwrap();

    let mut seen = Vec::new();
    while seen.len() < 4 {
        let note = tokio::time::timeout(Duration::from_secs(2), states.recv())
            .await
            .expect("state stream dried up")
            .unwrap();
        seen.push((note.conn_str, note.conn_state));
    }
    assert_eq!(
        seen,
        vec![
            ("h1:2181".to_string(), SessionState::Connecting),
            ("h1:2181".to_string(), SessionState::Connected),
            ("h2:2181".to_string(), SessionState::Connecting),
            ("h2:2181".to_string(), SessionState::Connected),
        ]
    );
    registry.close_all().await;
}

#[tokio::test]
async fn test_reconnect_recovers_a_lost_connection() {
    let registry = memory_registry();
    // The factory returns a fresh store per call, so a reconnect under the
    // same hosts dials a working ensemble again.
    let conn = registry
        .add("zk1", "h1:2181", ConnectionConfig::fast())
        .await
        .unwrap();
    conn.wait_connected(Duration::from_secs(2)).await.unwrap();

    let fresh = registry.reconnect("zk1").await.unwrap();
    fresh.wait_connected(Duration::from_secs(2)).await.unwrap();

    assert_eq!(conn.state(), SessionState::Closed);
    assert!(fresh.is_connected());
    assert_eq!(registry.list().await.len(), 1);
    registry.close_all().await;
}
