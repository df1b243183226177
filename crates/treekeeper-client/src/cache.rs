//! A recursive, watch-driven mirror of a remote subtree.
//!
//! The cache is best-effort eventually consistent, never linearizable: readers
//! may observe a stale node between a remote mutation and the corresponding
//! watch fire. The remote store stays the sole authority for versions.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use treekeeper_transport::{Ensemble, EnsembleEvent};
use treekeeper_types::{path as paths, KeeperError, KeeperResult, Stat, TreeEvent};

use crate::broadcaster::EventBroadcaster;

/// How many times a failed subtree refresh is retried before it is abandoned
/// to the next connection resync.
const REFRESH_RETRY_LIMIT: u32 = 5;
/// Pause between refresh retries.
const REFRESH_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(50);

/// One locally mirrored node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedNode {
    /// The node's path.
    pub path: String,
    /// The node's data as of the last observed change.
    pub data: Vec<u8>,
    /// The node's stat as of the last observed change.
    pub stat: Stat,
    /// Names of the node's direct children.
    pub children: BTreeSet<String>,
}

type NodeMap = Arc<RwLock<HashMap<String, CachedNode>>>;

/// Mirrors the remote subtree rooted at a path, kept current by one-shot
/// watches that are re-armed before each fire is processed.
#[derive(Debug)]
pub struct TreeCache {
    worker: CacheWorker,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// The refresh machinery shared between `start` and the pump task.
#[derive(Debug, Clone)]
struct CacheWorker {
    ensemble: Arc<dyn Ensemble>,
    broadcaster: Arc<EventBroadcaster>,
    root: String,
    nodes: NodeMap,
}

impl TreeCache {
    /// Creates a stopped cache over `ensemble`, rooted at `root`.
    pub fn new(
        ensemble: Arc<dyn Ensemble>,
        broadcaster: Arc<EventBroadcaster>,
        root: impl Into<String>,
    ) -> Self {
        Self {
            worker: CacheWorker {
                ensemble,
                broadcaster,
                root: root.into(),
                nodes: Arc::new(RwLock::new(HashMap::new())),
            },
            pump: Mutex::new(None),
        }
    }

    /// Performs the initial full fetch of the subtree and starts the watch pump.
    ///
    /// Emits a `NodeAdded` event per discovered node. The event stream is
    /// subscribed before the fetch so a mutation racing the initial load still
    /// produces a fire; refreshes are idempotent, so the duplicate is harmless.
    pub async fn start(&self) -> KeeperResult<()> {
        // The guard must leave scope before the await below so the future
        // stays Send.
        {
            let mut pump = self.pump.lock();
            if pump.is_some() {
                return Ok(());
            }
            let events = self.worker.ensemble.subscribe_events();
            let worker = self.worker.clone();
            *pump = Some(tokio::spawn(worker.run(events)));
        }

        let root = self.worker.root.clone();
        self.worker.refresh_subtree(&root).await
    }

    /// Cancels the watch pump and clears the mirror. Idempotent; no events are
    /// emitted afterward.
    pub fn stop(&self) {
        if let Some(task) = self.pump.lock().take() {
            task.abort();
        }
        self.worker.nodes.write().clear();
    }

    /// Returns a snapshot of one cached node. Advisory only.
    pub fn get(&self, path: &str) -> Option<CachedNode> {
        self.worker.nodes.read().get(path).cloned()
    }

    /// Returns all cached paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut all: Vec<String> = self.worker.nodes.read().keys().cloned().collect();
        all.sort();
        all
    }

    /// Returns the number of mirrored nodes.
    pub fn len(&self) -> usize {
        self.worker.nodes.read().len()
    }

    /// Returns `true` if nothing is mirrored.
    pub fn is_empty(&self) -> bool {
        self.worker.nodes.read().is_empty()
    }
}

impl Drop for TreeCache {
    fn drop(&mut self) {
        if let Some(task) = self.pump.lock().take() {
            task.abort();
        }
    }
}

impl CacheWorker {
    /// Consumes the ensemble event stream, refreshing paths as watches fire.
    ///
    /// A single task processes fires in arrival order, which preserves the
    /// per-path ordering guarantee. A lagged receiver means fires were lost, so
    /// the whole subtree is resynced.
    async fn run(self, mut events: broadcast::Receiver<EnsembleEvent>) {
        loop {
            match events.recv().await {
                Ok(EnsembleEvent::WatchFired { path }) => {
                    if !paths::is_self_or_descendant(&path, &self.root) {
                        continue;
                    }
                    self.refresh_with_retry(&path).await;
                }
                Ok(EnsembleEvent::Connected) => {
                    // Watches may have been lost while the transport was down.
                    let root = self.root.clone();
                    self.refresh_with_retry(&root).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "watch stream lagged, resyncing subtree");
                    let root = self.root.clone();
                    self.refresh_with_retry(&root).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Refreshes a subtree, retrying transient failures.
    ///
    /// The fire that triggered this refresh already consumed the one-shot
    /// watch; giving up on the first error would leave the path unarmed and
    /// the mirror stale until the next connection resync.
    async fn refresh_with_retry(&self, start: &str) {
        for attempt in 0..=REFRESH_RETRY_LIMIT {
            match self.refresh_subtree(start).await {
                Ok(()) => return,
                Err(err) => {
                    warn!(path = %start, attempt, error = %err, "refresh failed");
                    tokio::time::sleep(REFRESH_RETRY_DELAY).await;
                }
            }
        }
        warn!(path = %start, "refresh abandoned until the next connection resync");
    }

    /// Refreshes `start` and every descendant discovered along the way.
    ///
    /// Re-arm-then-process: each refetch passes `watch = true` *before* the
    /// result is diffed into the mirror, so a mutation landing between refetch
    /// and diff produces another fire instead of a missed-update window.
    async fn refresh_subtree(&self, start: &str) -> KeeperResult<()> {
        let mut queue = VecDeque::from([start.to_string()]);
        while let Some(path) = queue.pop_front() {
            for discovered in self.refresh_one(&path).await? {
                queue.push_back(discovered);
            }
        }
        Ok(())
    }

    /// Refreshes a single node, returning child paths not yet mirrored.
    async fn refresh_one(&self, path: &str) -> KeeperResult<Vec<String>> {
        // Arming exists-watches keeps deleted paths observable for recreation.
        if self.ensemble.exists(path, true).await?.is_none() {
            self.remove_subtree(path);
            return Ok(Vec::new());
        }

        let (data, stat) = match self.ensemble.get_data(path, true).await {
            Ok((data, stat)) => (data, stat),
            // Deleted between exists and read: treat as a delete.
            Err(KeeperError::NodeNotFound { .. }) => {
                self.remove_subtree(path);
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };
        let children: BTreeSet<String> = match self.ensemble.get_children(path, true).await {
            Ok(children) => children.into_iter().collect(),
            Err(KeeperError::NodeNotFound { .. }) => {
                self.remove_subtree(path);
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let mut to_visit = Vec::new();
        let mut removed_children = Vec::new();
        {
            let mut nodes = self.nodes.write();
            let incoming = CachedNode {
                path: path.to_string(),
                data,
                stat,
                children,
            };
            match nodes.get_mut(path) {
                None => {
                    debug!(path = %path, "node discovered");
                    to_visit.extend(incoming.children.iter().map(|c| paths::join(path, c)));
                    self.broadcaster
                        .publish(TreeEvent::added(path, incoming.data.clone(), incoming.stat));
                    nodes.insert(path.to_string(), incoming);
                }
                Some(existing) => {
                    let old_children = std::mem::replace(&mut existing.children, incoming.children.clone());
                    if incoming.stat.version != existing.stat.version
                        || incoming.stat.mzxid != existing.stat.mzxid
                    {
                        existing.data = incoming.data.clone();
                        existing.stat = incoming.stat;
                        self.broadcaster
                            .publish(TreeEvent::updated(path, incoming.data, incoming.stat));
                    } else {
                        existing.stat = incoming.stat;
                    }
                    for child in incoming.children.difference(&old_children) {
                        to_visit.push(paths::join(path, child));
                    }
                    for child in old_children.difference(&incoming.children) {
                        removed_children.push(paths::join(path, child));
                    }
                }
            }
        }
        for gone in removed_children {
            self.remove_subtree(&gone);
        }
        Ok(to_visit)
    }

    /// Drops a path and everything beneath it, emitting `NodeRemoved` per entry,
    /// children before parents.
    fn remove_subtree(&self, path: &str) {
        let mut removed: Vec<String> = {
            let mut nodes = self.nodes.write();
            let doomed: Vec<String> = nodes
                .keys()
                .filter(|cached| paths::is_self_or_descendant(cached, path))
                .cloned()
                .collect();
            for path in &doomed {
                nodes.remove(path);
            }
            doomed
        };
        removed.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));
        for path in removed {
            debug!(path = %path, "node removed from mirror");
            self.broadcaster.publish(TreeEvent::removed(path));
        }
    }
}
