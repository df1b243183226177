//! End-to-end lifecycle tests: session, node operations, tree cache, and
//! event fan-out working together over the in-process ensemble.

use std::sync::Arc;
use std::time::Duration;

use treekeeper_client::SessionConnection;
use treekeeper_transport::{Ensemble, MemoryEnsemble};
use treekeeper_types::{
    ConnectionConfig, CreateMode, KeeperError, KeeperEvent, SessionState, VERSION_ANY,
};

/// Installs a log subscriber once so failures can be diagnosed with
/// `RUST_LOG=treekeeper_client=debug`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A configuration with a reconnect window wide enough that assertions made
/// while the session is suspended cannot push it into `Lost`.
fn patient_config() -> ConnectionConfig {
    ConnectionConfig {
        max_retries: 100,
        retry_interval: Duration::from_millis(25),
        ..ConnectionConfig::fast()
    }
}

async fn connected_session(
    ensemble: &Arc<MemoryEnsemble>,
    config: ConnectionConfig,
) -> SessionConnection {
    init_tracing();
    let session = SessionConnection::new(Arc::clone(ensemble) as Arc<dyn Ensemble>, config);
    session.connect().unwrap();
    session
        .wait_connected(Duration::from_secs(2))
        .await
        .unwrap();
    session
}

/// Polls until `predicate` holds or the deadline passes.
async fn converge(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(deadline, async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_operations_flow_into_the_cache() {
    let ensemble = Arc::new(MemoryEnsemble::new("h1:2181"));
    let session = connected_session(&ensemble, ConnectionConfig::fast()).await;

    session
        .create_recursive(
            "/svc/web/config",
            b"timeout=30".to_vec(),
            Vec::new(),
            CreateMode::Persistent,
        )
        .await
        .unwrap();

    let cache = session.cache();
    assert!(
        converge(Duration::from_secs(2), || {
            cache
                .get("/svc/web/config")
                .is_some_and(|node| node.data == b"timeout=30")
        })
        .await,
        "created node never reached the cache"
    );

    session
        .write("/svc/web/config", b"timeout=60".to_vec(), 0)
        .await
        .unwrap();
    assert!(
        converge(Duration::from_secs(2), || {
            cache
                .get("/svc/web/config")
                .is_some_and(|node| node.data == b"timeout=60" && node.stat.version == 1)
        })
        .await,
        "update never reached the cache"
    );

    session.delete("/svc", VERSION_ANY).await.unwrap();
    assert!(
        converge(Duration::from_secs(2), || {
            session.cache().get("/svc").is_none() && session.cache().get("/svc/web").is_none()
        })
        .await,
        "deleted subtree still cached"
    );
    session.close().await;
}

#[tokio::test]
async fn test_suspended_session_gates_ops_and_recovers() {
    let ensemble = Arc::new(MemoryEnsemble::new("h1:2181"));
    let session = connected_session(&ensemble, patient_config()).await;
    session
        .create("/app", b"v0".to_vec(), Vec::new(), CreateMode::Persistent)
        .await
        .unwrap();

    // Keep redials failing so the session stays suspended.
    ensemble.set_connectable(false);
    ensemble.break_connection("network partition");
    assert!(
        converge(Duration::from_secs(2), || {
            session.state() == SessionState::Suspended
        })
        .await,
        "session never suspended"
    );

    assert!(!session.is_connected());
    let err = session.read("/app").await.unwrap_err();
    assert_eq!(err, KeeperError::NotConnected);

    // Heal the network: the retry budget has plenty left.
    ensemble.set_connectable(true);
    session
        .wait_connected(Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Reconnected);

    // Same session, so ephemeral-free state and data are all intact.
    let (data, _) = session.read("/app").await.unwrap();
    assert_eq!(data, b"v0");
    session.close().await;
}

#[tokio::test]
async fn test_cache_stays_live_across_a_reconnect() {
    let ensemble = Arc::new(MemoryEnsemble::new("h1:2181"));
    let session = connected_session(&ensemble, patient_config()).await;

    ensemble.break_connection("blip");
    session
        .wait_connected(Duration::from_secs(5))
        .await
        .unwrap();

    session
        .create("/fresh", b"post-blip".to_vec(), Vec::new(), CreateMode::Persistent)
        .await
        .unwrap();
    assert!(
        converge(Duration::from_secs(2), || {
            session.cache().get("/fresh").is_some()
        })
        .await,
        "cache stopped following after reconnect"
    );
    session.close().await;
}

#[tokio::test]
async fn test_exhausted_budget_never_returns_to_service() {
    let ensemble = Arc::new(MemoryEnsemble::new("h1:2181"));
    let session = connected_session(&ensemble, ConnectionConfig::fast()).await;

    ensemble.set_connectable(false);
    ensemble.break_connection("hard outage");
    assert!(
        converge(Duration::from_secs(2), || {
            session.state() == SessionState::Lost
        })
        .await,
        "session never reached Lost"
    );

    // The outage ends, but a lost session must not resurrect itself.
    ensemble.set_connectable(true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session.state(), SessionState::Lost);
    assert!(matches!(
        session.connect(),
        Err(KeeperError::RetryExhausted { .. })
    ));
    session.close().await;
}

#[tokio::test]
async fn test_events_fan_out_to_every_subscriber() {
    init_tracing();
    let ensemble = Arc::new(MemoryEnsemble::new("h1:2181"));
    let session = SessionConnection::new(
        Arc::clone(&ensemble) as Arc<dyn Ensemble>,
        ConnectionConfig::fast(),
    );
    let (_sub_a, mut rx_a) = session.subscribe();
    let (_sub_b, mut rx_b) = session.subscribe();

    session.connect().unwrap();
    session
        .wait_connected(Duration::from_secs(2))
        .await
        .unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let KeeperEvent::Session(event) = event {
                states.push(event.state);
            }
        }
        assert_eq!(
            states,
            vec![SessionState::Connecting, SessionState::Connected]
        );
    }
    session.close().await;
}
