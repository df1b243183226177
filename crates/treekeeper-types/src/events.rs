//! Event types published to subscribers.
//!
//! Session-state events and tree-change events are distinct variant families
//! carried through the same broadcaster; consumers match on [`KeeperEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SessionState, Stat};

/// A session-state transition on a named connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// The connect string of the connection that transitioned.
    pub connection: String,
    /// The state entered.
    pub state: SessionState,
    /// When the transition was observed.
    pub at: DateTime<Utc>,
}

impl SessionEvent {
    /// Creates an event stamped with the current time.
    pub fn now(connection: impl Into<String>, state: SessionState) -> Self {
        Self {
            connection: connection.into(),
            state,
            at: Utc::now(),
        }
    }
}

/// A change observed in the mirrored tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeEvent {
    /// A node appeared.
    NodeAdded {
        /// The node's path.
        path: String,
        /// The node's data at discovery.
        data: Vec<u8>,
        /// The node's stat at discovery.
        stat: Stat,
        /// When the addition was observed.
        at: DateTime<Utc>,
    },
    /// A node's data changed.
    NodeUpdated {
        /// The node's path.
        path: String,
        /// The new data.
        data: Vec<u8>,
        /// The new stat.
        stat: Stat,
        /// When the update was observed.
        at: DateTime<Utc>,
    },
    /// A node disappeared.
    NodeRemoved {
        /// The node's path.
        path: String,
        /// When the removal was observed.
        at: DateTime<Utc>,
    },
}

impl TreeEvent {
    /// Returns the path this event concerns.
    pub fn path(&self) -> &str {
        match self {
            Self::NodeAdded { path, .. }
            | Self::NodeUpdated { path, .. }
            | Self::NodeRemoved { path, .. } => path,
        }
    }

    /// Creates a `NodeAdded` event stamped with the current time.
    pub fn added(path: impl Into<String>, data: Vec<u8>, stat: Stat) -> Self {
        Self::NodeAdded {
            path: path.into(),
            data,
            stat,
            at: Utc::now(),
        }
    }

    /// Creates a `NodeUpdated` event stamped with the current time.
    pub fn updated(path: impl Into<String>, data: Vec<u8>, stat: Stat) -> Self {
        Self::NodeUpdated {
            path: path.into(),
            data,
            stat,
            at: Utc::now(),
        }
    }

    /// Creates a `NodeRemoved` event stamped with the current time.
    pub fn removed(path: impl Into<String>) -> Self {
        Self::NodeRemoved {
            path: path.into(),
            at: Utc::now(),
        }
    }
}

/// The unit of delivery to subscribers: a session or tree event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeeperEvent {
    /// A session-state transition.
    Session(SessionEvent),
    /// A tree change.
    Tree(TreeEvent),
}

impl From<SessionEvent> for KeeperEvent {
    fn from(event: SessionEvent) -> Self {
        Self::Session(event)
    }
}

impl From<TreeEvent> for KeeperEvent {
    fn from(event: TreeEvent) -> Self {
        Self::Tree(event)
    }
}
