//! The named-connection registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use treekeeper_client::SessionConnection;
use treekeeper_transport::Ensemble;
use treekeeper_types::{
    ConnectionConfig, KeeperError, KeeperEvent, KeeperResult, SessionState,
};

/// Depth of the registry-wide notification channel.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Builds an [`Ensemble`] from a connect string.
///
/// Injected so the registry stays transport-agnostic: production wires a real
/// transport here, tests wire `MemoryEnsemble`.
pub type EnsembleFactory = Arc<dyn Fn(&str) -> Arc<dyn Ensemble> + Send + Sync>;

/// A point-in-time description of one registered connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSummary {
    /// Registry-assigned identifier, stable for the connection's lifetime.
    pub id: u64,
    /// The name the connection was registered under.
    pub alias: String,
    /// The connection's session state at the time of the snapshot.
    pub conn_state: SessionState,
    /// The connect string the connection dials.
    pub hosts: String,
    /// When the connection was registered.
    pub create_time: DateTime<Utc>,
}

/// A session-state change pushed on the registry-wide stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateNotification {
    /// The connect string of the connection that changed.
    pub conn_str: String,
    /// The state it changed to.
    pub conn_state: SessionState,
}

struct Registered {
    id: u64,
    connection: Arc<SessionConnection>,
    hosts: String,
    created_at: DateTime<Utc>,
    /// Re-publishes the connection's session events onto the registry stream.
    /// Ends on its own once the connection closes.
    forwarder: JoinHandle<()>,
}

/// Holds named connections and fans their state changes into one stream.
///
/// Every connection is independently established, retried, and cached; the
/// registry adds naming, enumeration for a control surface, and operator-level
/// recovery via [`ConnectionRegistry::reconnect`].
pub struct ConnectionRegistry {
    factory: EnsembleFactory,
    connections: RwLock<HashMap<String, Registered>>,
    notifications: broadcast::Sender<StateNotification>,
    next_id: AtomicU64,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry over an ensemble factory.
    #[must_use]
    pub fn new(factory: EnsembleFactory) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            factory,
            connections: RwLock::new(HashMap::new()),
            notifications,
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a named connection and begins establishing it.
    ///
    /// Returns the connection handle immediately; establishment proceeds in the
    /// background and is observable via `wait_connected`, the connection's own
    /// subscribers, or [`ConnectionRegistry::subscribe_state`]. Fails with
    /// `DuplicateName` if the name is taken.
    pub async fn add(
        &self,
        name: &str,
        hosts: &str,
        config: ConnectionConfig,
    ) -> KeeperResult<Arc<SessionConnection>> {
        let mut connections = self.connections.write().await;
        if connections.contains_key(name) {
            return Err(KeeperError::DuplicateName {
                name: name.to_string(),
            });
        }
        let registered = self.establish(name, hosts, config)?;
        let connection = Arc::clone(&registered.connection);
        info!(name, hosts, id = registered.id, "connection registered");
        connections.insert(name.to_string(), registered);
        Ok(connection)
    }

    /// Removes and closes a named connection. Returns `false` if the name was
    /// not registered.
    pub async fn remove(&self, name: &str) -> bool {
        let removed = self.connections.write().await.remove(name);
        match removed {
            Some(registered) => {
                info!(name, "connection removed");
                Self::shut_down(registered).await;
                true
            }
            None => false,
        }
    }

    /// Closes and re-establishes a named connection with its original hosts
    /// and configuration.
    ///
    /// The recovery path for a session that reached `Lost`: the old connection
    /// emits its final `Closed`, then a fresh one walks the establishment
    /// states. Fails with `UnknownConnection` for an unregistered name.
    pub async fn reconnect(&self, name: &str) -> KeeperResult<Arc<SessionConnection>> {
        let mut connections = self.connections.write().await;
        let old = connections
            .remove(name)
            .ok_or_else(|| KeeperError::UnknownConnection {
                name: name.to_string(),
            })?;
        let hosts = old.hosts.clone();
        let config = old.connection.config().clone();
        info!(name, hosts = %hosts, "reconnecting");
        Self::shut_down(old).await;

        let registered = self.establish(name, &hosts, config)?;
        let connection = Arc::clone(&registered.connection);
        connections.insert(name.to_string(), registered);
        Ok(connection)
    }

    /// Looks up a connection by name.
    pub async fn get(&self, name: &str) -> Option<Arc<SessionConnection>> {
        self.connections
            .read()
            .await
            .get(name)
            .map(|registered| Arc::clone(&registered.connection))
    }

    /// Snapshots every registered connection, sorted by alias.
    pub async fn list(&self) -> Vec<ConnectionSummary> {
        let connections = self.connections.read().await;
        let mut summaries: Vec<ConnectionSummary> = connections
            .iter()
            .map(|(alias, registered)| ConnectionSummary {
                id: registered.id,
                alias: alias.clone(),
                conn_state: registered.connection.state(),
                hosts: registered.hosts.clone(),
                create_time: registered.created_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.alias.cmp(&b.alias));
        summaries
    }

    /// Subscribes to state changes of every connection, current and future.
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateNotification> {
        self.notifications.subscribe()
    }

    /// Closes every connection and empties the registry.
    pub async fn close_all(&self) {
        let drained: Vec<Registered> = {
            let mut connections = self.connections.write().await;
            connections.drain().map(|(_, registered)| registered).collect()
        };
        for registered in drained {
            Self::shut_down(registered).await;
        }
    }

    /// Returns the number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns `true` if nothing is registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Builds, connects, and wires up one connection.
    fn establish(
        &self,
        name: &str,
        hosts: &str,
        config: ConnectionConfig,
    ) -> KeeperResult<Registered> {
        let ensemble = (self.factory)(hosts);
        let connection = Arc::new(SessionConnection::new(ensemble, config));
        let (subscription, events) = connection.subscribe();
        connection.connect()?;

        let forwarder = tokio::spawn(Self::forward(
            name.to_string(),
            hosts.to_string(),
            events,
            self.notifications.clone(),
        ));
        // The broadcaster owns the sender half; the receiver keeps the
        // subscription alive, so the handle itself is no longer needed.
        drop(subscription);

        Ok(Registered {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            connection,
            hosts: hosts.to_string(),
            created_at: Utc::now(),
            forwarder,
        })
    }

    /// Re-publishes one connection's session events onto the registry stream.
    async fn forward(
        name: String,
        conn_str: String,
        mut events: mpsc::Receiver<KeeperEvent>,
        notifications: broadcast::Sender<StateNotification>,
    ) {
        while let Some(event) = events.recv().await {
            if let KeeperEvent::Session(event) = event {
                debug!(name = %name, state = %event.state, "forwarding state change");
                // An Err here only means nobody is subscribed right now.
                let _ = notifications.send(StateNotification {
                    conn_str: conn_str.clone(),
                    conn_state: event.state,
                });
            }
        }
    }

    /// Closes a connection and waits for its forwarder to drain, so the final
    /// `Closed` notification lands before the caller proceeds.
    async fn shut_down(registered: Registered) {
        registered.connection.close().await;
        if let Err(err) = registered.forwarder.await {
            if !err.is_cancelled() {
                warn!(error = %err, "state forwarder ended abnormally");
            }
        }
    }
}
