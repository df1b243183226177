//! # Treekeeper Registry
//!
//! Named connections to multiple coordination-service ensembles, managed as a
//! group. Each entry is a full [`SessionConnection`] with its own retry loop,
//! tree cache, and subscribers; the registry layers on top:
//!
//! - **Naming** — register under an alias, look up by alias.
//! - **Enumeration** — [`ConnectionRegistry::list`] snapshots every connection
//!   as a serializable [`ConnectionSummary`] for a control surface.
//! - **One state stream** — [`ConnectionRegistry::subscribe_state`] merges all
//!   connections' session-state changes into a single broadcast channel.
//! - **Operator recovery** — [`ConnectionRegistry::reconnect`] rebuilds a
//!   connection in place, the escape hatch once a session is lost.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use treekeeper_registry::ConnectionRegistry;
//! use treekeeper_transport::{Ensemble, MemoryEnsemble};
//! use treekeeper_types::{ConnectionConfig, KeeperResult};
//!
//! # async fn example() -> KeeperResult<()> {
//! let registry = ConnectionRegistry::new(Arc::new(|hosts: &str| {
//!     Arc::new(MemoryEnsemble::new(hosts)) as Arc<dyn Ensemble>
//! }));
//!
//! let conn = registry
//!     .add("zk1", "h1:2181,h2:2181", ConnectionConfig::default())
//!     .await?;
//! conn.wait_connected(std::time::Duration::from_secs(15)).await?;
//!
//! for summary in registry.list().await {
//!     println!("{} [{}] -> {}", summary.alias, summary.conn_state, summary.hosts);
//! }
//! registry.close_all().await;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod registry;

pub use registry::{ConnectionRegistry, ConnectionSummary, EnsembleFactory, StateNotification};

pub use treekeeper_client::SessionConnection;
