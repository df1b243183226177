//! # Treekeeper Client
//!
//! The session layer of treekeeper: owns one connection to a coordination
//! service, keeps it alive under a retry policy, mirrors the remote tree in a
//! watch-driven cache, and fans events out to subscribers.
//!
//! ## Architecture
//!
//! ```text
//! Caller / control layer
//!        ↓
//! SessionConnection (this crate: state machine, node operations)
//!   ├── TreeCache        (recursive mirror, re-armed watches)
//!   ├── EventBroadcaster (session + tree events to subscribers)
//!   └── RetryPolicy      (establishment and reconnect budget)
//!        ↓
//! Ensemble (treekeeper-transport)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use treekeeper_client::SessionConnection;
//! use treekeeper_transport::MemoryEnsemble;
//! use treekeeper_types::{Acl, ConnectionConfig, CreateMode, KeeperResult};
//!
//! # async fn example() -> KeeperResult<()> {
//! let ensemble = Arc::new(MemoryEnsemble::new("h1:2181"));
//! let session = SessionConnection::new(ensemble, ConnectionConfig::default());
//! session.connect()?;
//! session.wait_connected(std::time::Duration::from_secs(15)).await?;
//!
//! let path = session
//!     .create("/apps", b"hello".to_vec(), vec![Acl::open_unsafe()], CreateMode::Persistent)
//!     .await?;
//! let (data, stat) = session.read(&path).await?;
//! assert_eq!(data, b"hello");
//! assert_eq!(stat.version, 0);
//! session.close().await;
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

mod broadcaster;
mod cache;
mod ops;
mod retry;
mod session;

pub use broadcaster::{EventBroadcaster, Subscription};
pub use cache::{CachedNode, TreeCache};
pub use retry::RetryPolicy;
pub use session::SessionConnection;
