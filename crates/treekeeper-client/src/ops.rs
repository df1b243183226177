//! Node operations: version-checked CRUD against the remote tree.
//!
//! Every operation goes to the ensemble, never the cache; the remote store is
//! the version authority. Operations are gated on session liveness and bounded
//! by the configured operation timeout. They do not retry (session
//! establishment is where retries live), with one exception: an unconditional
//! delete is guaranteed, see [`SessionConnection::delete`].

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};
use treekeeper_types::{
    path, Acl, CreateMode, KeeperError, KeeperResult, SessionState, Stat, VERSION_ANY,
};

use crate::session::SessionConnection;

/// Pause between attempts of a guaranteed delete.
const GUARANTEED_DELETE_INTERVAL: Duration = Duration::from_millis(100);

impl SessionConnection {
    /// Fails fast when the session cannot carry an operation right now.
    fn ensure_connected(&self) -> KeeperResult<()> {
        match self.state() {
            SessionState::Closed => Err(KeeperError::ConnectionClosed),
            state if state.is_connected() => Ok(()),
            _ => Err(KeeperError::NotConnected),
        }
    }

    /// Runs one remote call under the operation timeout.
    async fn op<T, F>(&self, name: &str, fut: F) -> KeeperResult<T>
    where
        F: Future<Output = KeeperResult<T>>,
    {
        tokio::time::timeout(self.config().operation_timeout, fut)
            .await
            .map_err(|_| KeeperError::Timeout {
                operation: name.to_string(),
            })?
    }

    /// Lists the names of a node's children, unsorted.
    pub async fn list_children(&self, node_path: &str) -> KeeperResult<Vec<String>> {
        path::validate(node_path)?;
        self.ensure_connected()?;
        debug!(path = %node_path, "list children");
        self.op("list_children", self.shared().ensemble.get_children(node_path, false))
            .await
    }

    /// Reads a node's data and stat.
    pub async fn read(&self, node_path: &str) -> KeeperResult<(Vec<u8>, Stat)> {
        path::validate(node_path)?;
        self.ensure_connected()?;
        debug!(path = %node_path, "read");
        self.op("read", self.shared().ensemble.get_data(node_path, false))
            .await
    }

    /// Returns the node's stat if it exists.
    pub async fn exists(&self, node_path: &str) -> KeeperResult<Option<Stat>> {
        path::validate(node_path)?;
        self.ensure_connected()?;
        debug!(path = %node_path, "exists");
        self.op("exists", self.shared().ensemble.exists(node_path, false))
            .await
    }

    /// Replaces a node's data if `expected_version` still matches (or is
    /// [`VERSION_ANY`]). Returns the stat after the write.
    pub async fn write(
        &self,
        node_path: &str,
        data: Vec<u8>,
        expected_version: i32,
    ) -> KeeperResult<Stat> {
        path::validate(node_path)?;
        self.ensure_connected()?;
        debug!(path = %node_path, expected_version, bytes = data.len(), "write");
        self.op(
            "write",
            self.shared().ensemble.set_data(node_path, data, expected_version),
        )
        .await
    }

    /// Creates a node. The parent must already exist.
    ///
    /// Returns the actual path, which differs from `node_path` for sequential
    /// modes. Empty `acls` default to the open ACL.
    pub async fn create(
        &self,
        node_path: &str,
        data: Vec<u8>,
        acls: Vec<Acl>,
        mode: CreateMode,
    ) -> KeeperResult<String> {
        path::validate(node_path)?;
        self.ensure_connected()?;
        debug!(path = %node_path, ?mode, "create");
        self.op("create", self.shared().ensemble.create(node_path, data, acls, mode))
            .await
    }

    /// Creates a node, creating missing persistent parents first.
    ///
    /// Only the leaf carries `data`, `acls`, and `mode`; intermediate nodes
    /// are persistent with empty data and the leaf's ACLs. A concurrent
    /// creator racing on a parent is tolerated.
    pub async fn create_recursive(
        &self,
        node_path: &str,
        data: Vec<u8>,
        acls: Vec<Acl>,
        mode: CreateMode,
    ) -> KeeperResult<String> {
        path::validate(node_path)?;
        self.ensure_connected()?;

        let mut ancestors: Vec<&str> = Vec::new();
        let mut cursor = node_path;
        while let Some(parent) = path::parent(cursor) {
            if parent == path::ROOT {
                break;
            }
            ancestors.push(parent);
            cursor = parent;
        }
        for ancestor in ancestors.into_iter().rev() {
            let made = self
                .op(
                    "create",
                    self.shared().ensemble.create(
                        ancestor,
                        Vec::new(),
                        acls.clone(),
                        CreateMode::Persistent,
                    ),
                )
                .await;
            match made {
                Ok(_) => {}
                Err(KeeperError::NodeExists { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        self.create(node_path, data, acls, mode).await
    }

    /// Deletes a node and, recursively, its children.
    ///
    /// With a concrete `expected_version` the leaf delete is version-checked
    /// and performed exactly once. With [`VERSION_ANY`] the delete is
    /// guaranteed: transient failures are retried until the node is observed
    /// gone, and a `NodeNotFound` after an ambiguous attempt counts as
    /// success. A node that was already absent on the first attempt still
    /// reports `NodeNotFound`.
    pub async fn delete(&self, node_path: &str, expected_version: i32) -> KeeperResult<()> {
        path::validate(node_path)?;
        self.ensure_connected()?;

        if expected_version != VERSION_ANY {
            return self.delete_subtree(node_path, expected_version).await;
        }

        let mut ambiguous = false;
        loop {
            self.ensure_connected()?;
            match self.delete_subtree(node_path, VERSION_ANY).await {
                Ok(()) => return Ok(()),
                Err(KeeperError::NodeNotFound { .. }) if ambiguous => {
                    debug!(path = %node_path, "node gone after ambiguous delete");
                    return Ok(());
                }
                Err(err) if err.is_transient() => {
                    warn!(path = %node_path, error = %err, "delete failed, retrying");
                    ambiguous = true;
                    tokio::time::sleep(GUARANTEED_DELETE_INTERVAL).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Reads a node's ACL list and stat.
    pub async fn get_acls(&self, node_path: &str) -> KeeperResult<(Vec<Acl>, Stat)> {
        path::validate(node_path)?;
        self.ensure_connected()?;
        debug!(path = %node_path, "get acls");
        self.op("get_acls", self.shared().ensemble.get_acl(node_path))
            .await
    }

    /// Replaces a node's ACL list if `expected_version` matches its ACL
    /// version (or is [`VERSION_ANY`]).
    pub async fn set_acls(
        &self,
        node_path: &str,
        acls: Vec<Acl>,
        expected_version: i32,
    ) -> KeeperResult<Stat> {
        path::validate(node_path)?;
        self.ensure_connected()?;
        debug!(path = %node_path, expected_version, "set acls");
        self.op(
            "set_acls",
            self.shared().ensemble.set_acl(node_path, acls, expected_version),
        )
        .await
    }

    /// Deletes `node_path` and everything beneath it, deepest first.
    ///
    /// The version-checked delete of the target is attempted first, so a
    /// mismatched `expected_version` (or a missing target) surfaces before any
    /// descendant is touched. Descendants are only cleared after the target
    /// reports `NotEmpty`, and are deleted unconditionally.
    async fn delete_subtree(&self, node_path: &str, expected_version: i32) -> KeeperResult<()> {
        debug!(path = %node_path, expected_version, "delete");
        match self
            .op("delete", self.shared().ensemble.delete(node_path, expected_version))
            .await
        {
            Err(KeeperError::NotEmpty { .. }) => {}
            outcome => return outcome,
        }

        let mut to_scan = vec![node_path.to_string()];
        let mut discovered = Vec::new();
        while let Some(current) = to_scan.pop() {
            let children = match self
                .op("list_children", self.shared().ensemble.get_children(&current, false))
                .await
            {
                Ok(children) => children,
                // Vanished between discovery and scan.
                Err(KeeperError::NodeNotFound { .. }) => continue,
                Err(err) => return Err(err),
            };
            for child in children {
                let child_path = path::join(&current, &child);
                to_scan.push(child_path.clone());
                discovered.push(child_path);
            }
        }

        discovered.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));
        for descendant in discovered {
            match self
                .op("delete", self.shared().ensemble.delete(&descendant, VERSION_ANY))
                .await
            {
                Ok(()) | Err(KeeperError::NodeNotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        self.op("delete", self.shared().ensemble.delete(node_path, expected_version))
            .await
    }
}
