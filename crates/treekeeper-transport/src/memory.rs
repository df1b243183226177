//! An in-process ensemble implementation.
//!
//! `MemoryEnsemble` is a complete versioned hierarchical store with one-shot
//! watches, ephemeral and sequential create modes, and fault-injection hooks. It
//! is the authority the client crates test against, and doubles as a local
//! backend for development without a running coordination service.

use std::collections::{BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;
use treekeeper_types::{
    path as paths, Acl, CreateMode, KeeperError, KeeperResult, Stat, VERSION_ANY,
};

use crate::ensemble::{Ensemble, EnsembleEvent, EnsembleEventEmitter};

/// A single node in the in-memory tree.
#[derive(Debug, Clone)]
struct MemoryNode {
    data: Vec<u8>,
    acls: Vec<Acl>,
    stat: Stat,
    children: BTreeSet<String>,
    /// Counter backing sequential child names under this node.
    next_sequence: u64,
}

#[derive(Debug)]
struct Inner {
    nodes: HashMap<String, MemoryNode>,
    /// Paths with an armed data watch (armed by `get_data` and `exists`).
    data_watches: BTreeSet<String>,
    /// Paths with an armed child watch (armed by `get_children`).
    child_watches: BTreeSet<String>,
    connected: bool,
    /// Whether `connect` attempts succeed. Toggled by tests to exercise the
    /// client's retry loop.
    connectable: bool,
    /// Whether the current session is still valid server-side.
    session_valid: bool,
    session_id: u64,
    next_zxid: u64,
    /// Countdown of injected transient failures for data-plane calls.
    fail_next: u32,
}

/// An in-process coordination store implementing [`Ensemble`].
#[derive(Debug)]
pub struct MemoryEnsemble {
    connect_string: String,
    emitter: EnsembleEventEmitter,
    inner: Mutex<Inner>,
}

impl MemoryEnsemble {
    /// Creates a store with only the root node, not yet connected.
    #[must_use]
    pub fn new(connect_string: impl Into<String>) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            paths::ROOT.to_string(),
            MemoryNode {
                data: Vec::new(),
                acls: vec![Acl::open_unsafe()],
                stat: Stat::default(),
                children: BTreeSet::new(),
                next_sequence: 0,
            },
        );
        Self {
            connect_string: connect_string.into(),
            emitter: EnsembleEventEmitter::new(),
            inner: Mutex::new(Inner {
                nodes,
                data_watches: BTreeSet::new(),
                child_watches: BTreeSet::new(),
                connected: false,
                connectable: true,
                session_valid: false,
                session_id: 0,
                next_zxid: 0,
                fail_next: 0,
            }),
        }
    }

    /// Controls whether future `connect` attempts succeed.
    pub fn set_connectable(&self, connectable: bool) {
        self.inner.lock().connectable = connectable;
    }

    /// Drops the transport-level connection, keeping the session valid.
    ///
    /// Simulates a transient network failure: the client should observe
    /// `Disconnected`, suspend, and redial.
    pub fn break_connection(&self, reason: &str) {
        let mut inner = self.inner.lock();
        if !inner.connected {
            return;
        }
        inner.connected = false;
        self.emitter.emit_disconnected(Some(reason.to_string()));
    }

    /// Expires the session server-side: the connection drops, ephemerals are
    /// removed, and a redial starts a fresh session.
    pub fn expire_session(&self) {
        let mut inner = self.inner.lock();
        inner.connected = false;
        inner.session_valid = false;
        self.drop_ephemerals(&mut inner);
        self.emitter.emit(EnsembleEvent::Expired);
    }

    /// Makes the next `n` data-plane calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.inner.lock().fail_next = n;
    }

    /// Returns the current session id (changes when an expired session redials).
    pub fn session_id(&self) -> u64 {
        self.inner.lock().session_id
    }

    /// Returns `true` if a node exists at `path`, bypassing the connection gate.
    /// Test helper only; real callers go through `exists`.
    pub fn contains(&self, path: &str) -> bool {
        self.inner.lock().nodes.contains_key(path)
    }

    /// Returns the number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    /// Returns `true` if the store holds only the root.
    pub fn is_empty(&self) -> bool {
        self.len() == 1
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn gate(&self, inner: &mut Inner) -> KeeperResult<()> {
        if !inner.connected {
            return Err(KeeperError::transport(format!(
                "connection to {} is down",
                self.connect_string
            )));
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(KeeperError::transport("injected transient failure"));
        }
        Ok(())
    }

    fn fire_data_watch(&self, inner: &mut Inner, path: &str) {
        if inner.data_watches.remove(path) {
            self.emitter.emit_watch_fired(path);
        }
    }

    fn fire_child_watch(&self, inner: &mut Inner, path: &str) {
        if inner.child_watches.remove(path) {
            self.emitter.emit_watch_fired(path);
        }
    }

    fn check_version(stat_version: i32, expected: i32, path: &str) -> KeeperResult<()> {
        if expected != VERSION_ANY && expected != stat_version {
            return Err(KeeperError::version_conflict(path, expected));
        }
        Ok(())
    }

    /// Removes one node unconditionally, updating its parent and firing watches.
    /// The caller has already checked the node exists and has no children.
    fn remove_node(&self, inner: &mut Inner, path: &str) {
        inner.nodes.remove(path);
        if let Some(parent_path) = paths::parent(path) {
            let parent_path = parent_path.to_string();
            if let Some(parent) = inner.nodes.get_mut(&parent_path) {
                parent.children.remove(paths::basename(path));
                parent.stat.cversion += 1;
                parent.stat.num_children = parent.children.len() as u32;
            }
            self.fire_child_watch(inner, &parent_path);
        }
        self.fire_data_watch(inner, path);
        self.fire_child_watch(inner, path);
    }

    /// Removes every ephemeral node owned by the current session, leaves first.
    fn drop_ephemerals(&self, inner: &mut Inner) {
        let session = inner.session_id;
        let mut ephemerals: Vec<String> = inner
            .nodes
            .iter()
            .filter(|(_, node)| node.stat.ephemeral_owner == session && session != 0)
            .map(|(path, _)| path.clone())
            .collect();
        // Deeper paths first so parents are emptied before their own removal.
        ephemerals.sort_by_key(|p| std::cmp::Reverse(p.len()));
        for path in ephemerals {
            debug!(path = %path, "removing ephemeral node with ended session");
            self.remove_node(inner, &path);
        }
    }
}

#[async_trait]
impl Ensemble for MemoryEnsemble {
    fn connect_string(&self) -> &str {
        &self.connect_string
    }

    async fn connect(&self) -> KeeperResult<()> {
        let mut inner = self.inner.lock();
        if !inner.connectable {
            return Err(KeeperError::transport(format!(
                "connection refused: {}",
                self.connect_string
            )));
        }
        if inner.connected {
            return Ok(());
        }
        if !inner.session_valid {
            inner.session_id += 1;
            inner.session_valid = true;
        }
        inner.connected = true;
        debug!(connect_string = %self.connect_string, session = inner.session_id, "session established");
        self.emitter.emit(EnsembleEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut inner = self.inner.lock();
        if !inner.connected && !inner.session_valid {
            return;
        }
        inner.connected = false;
        inner.session_valid = false;
        self.drop_ephemerals(&mut inner);
        inner.data_watches.clear();
        inner.child_watches.clear();
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    fn subscribe_events(&self) -> broadcast::Receiver<EnsembleEvent> {
        self.emitter.subscribe()
    }

    async fn get_data(&self, path: &str, watch: bool) -> KeeperResult<(Vec<u8>, Stat)> {
        paths::validate(path)?;
        let mut inner = self.inner.lock();
        self.gate(&mut inner)?;
        let node = inner
            .nodes
            .get(path)
            .ok_or_else(|| KeeperError::node_not_found(path))?;
        let result = (node.data.clone(), node.stat);
        if watch {
            inner.data_watches.insert(path.to_string());
        }
        Ok(result)
    }

    async fn get_children(&self, path: &str, watch: bool) -> KeeperResult<Vec<String>> {
        paths::validate(path)?;
        let mut inner = self.inner.lock();
        self.gate(&mut inner)?;
        let node = inner
            .nodes
            .get(path)
            .ok_or_else(|| KeeperError::node_not_found(path))?;
        let children = node.children.iter().cloned().collect();
        if watch {
            inner.child_watches.insert(path.to_string());
        }
        Ok(children)
    }

    async fn exists(&self, path: &str, watch: bool) -> KeeperResult<Option<Stat>> {
        paths::validate(path)?;
        let mut inner = self.inner.lock();
        self.gate(&mut inner)?;
        let stat = inner.nodes.get(path).map(|node| node.stat);
        if watch {
            // Armed even for an absent node so a later create fires it.
            inner.data_watches.insert(path.to_string());
        }
        Ok(stat)
    }

    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        acls: Vec<Acl>,
        mode: CreateMode,
    ) -> KeeperResult<String> {
        paths::validate(path)?;
        if path == paths::ROOT {
            return Err(KeeperError::node_exists(path));
        }
        let mut inner = self.inner.lock();
        self.gate(&mut inner)?;

        let parent_path = paths::parent(path)
            .ok_or_else(|| KeeperError::node_not_found(path))?
            .to_string();
        if !inner.nodes.contains_key(&parent_path) {
            return Err(KeeperError::node_not_found(&parent_path));
        }

        let final_path = if mode.is_sequential() {
            let parent = inner
                .nodes
                .get_mut(&parent_path)
                .expect("parent checked above");
            let sequence = parent.next_sequence;
            parent.next_sequence += 1;
            format!("{path}{sequence:010}")
        } else {
            path.to_string()
        };

        if inner.nodes.contains_key(&final_path) {
            return Err(KeeperError::node_exists(&final_path));
        }

        inner.next_zxid += 1;
        let now = Self::now_ms();
        let stat = Stat {
            czxid: inner.next_zxid,
            mzxid: inner.next_zxid,
            ctime_ms: now,
            mtime_ms: now,
            version: 0,
            cversion: 0,
            aversion: 0,
            ephemeral_owner: if mode.is_ephemeral() {
                inner.session_id
            } else {
                0
            },
            data_length: data.len() as u32,
            num_children: 0,
        };
        let acls = if acls.is_empty() {
            vec![Acl::open_unsafe()]
        } else {
            acls
        };
        inner.nodes.insert(
            final_path.clone(),
            MemoryNode {
                data,
                acls,
                stat,
                children: BTreeSet::new(),
                next_sequence: 0,
            },
        );

        let parent = inner
            .nodes
            .get_mut(&parent_path)
            .expect("parent checked above");
        parent.children.insert(paths::basename(&final_path).to_string());
        parent.stat.cversion += 1;
        parent.stat.num_children = parent.children.len() as u32;

        self.fire_data_watch(&mut inner, &final_path);
        self.fire_child_watch(&mut inner, &parent_path);
        debug!(path = %final_path, ?mode, "node created");
        Ok(final_path)
    }

    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: i32,
    ) -> KeeperResult<Stat> {
        paths::validate(path)?;
        let mut inner = self.inner.lock();
        self.gate(&mut inner)?;
        inner.next_zxid += 1;
        let zxid = inner.next_zxid;
        let node = inner
            .nodes
            .get_mut(path)
            .ok_or_else(|| KeeperError::node_not_found(path))?;
        Self::check_version(node.stat.version, expected_version, path)?;
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        node.stat.mtime_ms = Self::now_ms();
        node.stat.data_length = data.len() as u32;
        node.data = data;
        let stat = node.stat;
        self.fire_data_watch(&mut inner, path);
        Ok(stat)
    }

    async fn delete(&self, path: &str, expected_version: i32) -> KeeperResult<()> {
        paths::validate(path)?;
        if path == paths::ROOT {
            return Err(KeeperError::InvalidPath {
                path: path.to_string(),
                reason: "the root cannot be deleted".to_string(),
            });
        }
        let mut inner = self.inner.lock();
        self.gate(&mut inner)?;
        let node = inner
            .nodes
            .get(path)
            .ok_or_else(|| KeeperError::node_not_found(path))?;
        Self::check_version(node.stat.version, expected_version, path)?;
        if !node.children.is_empty() {
            return Err(KeeperError::NotEmpty {
                path: path.to_string(),
            });
        }
        inner.next_zxid += 1;
        self.remove_node(&mut inner, path);
        debug!(path = %path, "node deleted");
        Ok(())
    }

    async fn get_acl(&self, path: &str) -> KeeperResult<(Vec<Acl>, Stat)> {
        paths::validate(path)?;
        let mut inner = self.inner.lock();
        self.gate(&mut inner)?;
        let node = inner
            .nodes
            .get(path)
            .ok_or_else(|| KeeperError::node_not_found(path))?;
        Ok((node.acls.clone(), node.stat))
    }

    async fn set_acl(
        &self,
        path: &str,
        acls: Vec<Acl>,
        expected_version: i32,
    ) -> KeeperResult<Stat> {
        paths::validate(path)?;
        let mut inner = self.inner.lock();
        self.gate(&mut inner)?;
        let node = inner
            .nodes
            .get_mut(path)
            .ok_or_else(|| KeeperError::node_not_found(path))?;
        Self::check_version(node.stat.aversion, expected_version, path)?;
        node.stat.aversion += 1;
        node.acls = acls;
        Ok(node.stat)
    }
}
