//! The `Ensemble` trait and its event types.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::broadcast;
use treekeeper_types::{Acl, CreateMode, KeeperResult, Stat};

/// Depth of the session event channel. Watch fires beyond this are dropped by
/// lagging receivers, which the cache treats as a resync trigger.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 512;

/// Connectivity and watch notifications raised by an ensemble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsembleEvent {
    /// The transport-level connection is up.
    Connected,

    /// The transport-level connection dropped. The session may still be valid
    /// server-side; the client decides whether this becomes `Suspended` or `Lost`.
    Disconnected {
        /// An optional reason for the disconnection.
        reason: Option<String>,
    },

    /// The session expired server-side. Ephemeral nodes are gone.
    Expired,

    /// A one-shot watch fired for this path. The watch is now disarmed; observing
    /// further changes requires arming a new one.
    WatchFired {
        /// The watched path.
        path: String,
    },
}

/// An emitter for broadcasting [`EnsembleEvent`]s to any number of listeners.
///
/// Emission never blocks: a lagging subscriber loses old events rather than
/// stalling the transport's delivery path.
#[derive(Debug, Clone)]
pub struct EnsembleEventEmitter {
    sender: broadcast::Sender<EnsembleEvent>,
}

impl EnsembleEventEmitter {
    /// Creates a new emitter.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribes a new receiver to this emitter's events.
    pub fn subscribe(&self) -> broadcast::Receiver<EnsembleEvent> {
        self.sender.subscribe()
    }

    /// Emits an event, ignoring the no-subscribers case.
    pub fn emit(&self, event: EnsembleEvent) {
        let _ = self.sender.send(event);
    }

    /// Emits a `WatchFired` event for a path.
    pub fn emit_watch_fired(&self, path: impl Into<String>) {
        self.emit(EnsembleEvent::WatchFired { path: path.into() });
    }

    /// Emits a `Disconnected` event.
    pub fn emit_disconnected(&self, reason: Option<String>) {
        self.emit(EnsembleEvent::Disconnected { reason });
    }
}

impl Default for EnsembleEventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// The client-facing surface of a coordination-service ensemble.
///
/// An implementation owns one logical session to the remote store. All data-plane
/// methods are remote calls: they fail with `Transport` when the connection is
/// down and with the logical taxonomy members (`NodeNotFound`, `NodeExists`,
/// `VersionConflict`, `NotEmpty`) otherwise. Passing `watch = true` arms a
/// **one-shot** watch on the path: the next matching mutation delivers exactly one
/// [`EnsembleEvent::WatchFired`] on the event stream and disarms the watch.
#[async_trait]
pub trait Ensemble: Send + Sync + fmt::Debug {
    /// Returns the configured connect string (host:port list).
    fn connect_string(&self) -> &str;

    /// Establishes the transport-level connection. A transient failure is
    /// reported as `Transport`; the caller applies its retry policy.
    async fn connect(&self) -> KeeperResult<()>;

    /// Drops the connection and ends the session. Idempotent. Ephemeral nodes
    /// created by this session are removed.
    async fn disconnect(&self);

    /// Returns `true` if the transport-level connection is currently up.
    fn is_connected(&self) -> bool;

    /// Subscribes to connectivity transitions and watch fires. Events for a
    /// single path are delivered in the order they occurred.
    fn subscribe_events(&self) -> broadcast::Receiver<EnsembleEvent>;

    /// Reads a node's data and stat, optionally arming a data watch.
    async fn get_data(&self, path: &str, watch: bool) -> KeeperResult<(Vec<u8>, Stat)>;

    /// Lists a node's children, optionally arming a child watch.
    async fn get_children(&self, path: &str, watch: bool) -> KeeperResult<Vec<String>>;

    /// Checks whether a node exists. With `watch = true` the watch is armed even
    /// for an absent node, so a later create fires it.
    async fn exists(&self, path: &str, watch: bool) -> KeeperResult<Option<Stat>>;

    /// Creates a node, returning the actual created path (sequential modes append
    /// a suffix). The parent must already exist.
    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        acls: Vec<Acl>,
        mode: CreateMode,
    ) -> KeeperResult<String>;

    /// Writes a node's data, enforcing `expected_version` remotely.
    /// [`treekeeper_types::VERSION_ANY`] skips the check.
    async fn set_data(&self, path: &str, data: Vec<u8>, expected_version: i32)
        -> KeeperResult<Stat>;

    /// Deletes a node, enforcing `expected_version` remotely. The node must have
    /// no children.
    async fn delete(&self, path: &str, expected_version: i32) -> KeeperResult<()>;

    /// Reads a node's ACL list and stat.
    async fn get_acl(&self, path: &str) -> KeeperResult<(Vec<Acl>, Stat)>;

    /// Replaces a node's ACL list, enforcing `expected_version` against the ACL
    /// version.
    async fn set_acl(&self, path: &str, acls: Vec<Acl>, expected_version: i32)
        -> KeeperResult<Stat>;
}
