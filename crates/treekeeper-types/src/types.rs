//! Core node and session value types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel version meaning "skip the version check" on writes and deletes.
pub const VERSION_ANY: i32 = -1;

/// Metadata about a node, as reported by the remote store.
///
/// The remote store is the sole authority for these counters; cached copies are
/// advisory. `version` strictly increases on every data mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Transaction id that created the node.
    pub czxid: u64,
    /// Transaction id of the last modification.
    pub mzxid: u64,
    /// Creation time, milliseconds since the epoch.
    pub ctime_ms: u64,
    /// Last-modification time, milliseconds since the epoch.
    pub mtime_ms: u64,
    /// Number of data mutations since creation.
    pub version: i32,
    /// Number of child-list mutations since creation.
    pub cversion: i32,
    /// Number of ACL mutations since creation.
    pub aversion: i32,
    /// Session id of the owner for ephemeral nodes, zero otherwise.
    pub ephemeral_owner: u64,
    /// Length of the node's data in bytes.
    pub data_length: u32,
    /// Number of direct children.
    pub num_children: u32,
}

impl Stat {
    /// Returns `true` if the node is ephemeral (bound to a session).
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}

/// Permission bits attached to an [`Acl`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perms(pub u32);

impl Perms {
    /// Permission to read the node's data and list its children.
    pub const READ: Perms = Perms(1);
    /// Permission to set the node's data.
    pub const WRITE: Perms = Perms(1 << 1);
    /// Permission to create children.
    pub const CREATE: Perms = Perms(1 << 2);
    /// Permission to delete children.
    pub const DELETE: Perms = Perms(1 << 3);
    /// Permission to set the node's ACL.
    pub const ADMIN: Perms = Perms(1 << 4);
    /// All of the above.
    pub const ALL: Perms = Perms(0b1_1111);

    /// Returns `true` if every bit in `other` is present in `self`.
    pub fn contains(self, other: Perms) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Perms {
    type Output = Perms;

    fn bitor(self, rhs: Perms) -> Perms {
        Perms(self.0 | rhs.0)
    }
}

/// A single access-control entry on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    /// The authentication scheme (`world`, `digest`, `ip`, ...).
    pub scheme: String,
    /// The scheme-specific identity.
    pub id: String,
    /// The granted permissions.
    pub perms: Perms,
}

impl Acl {
    /// The fully-open ACL: `world:anyone` with all permissions.
    pub fn open_unsafe() -> Self {
        Self {
            scheme: "world".to_string(),
            id: "anyone".to_string(),
            perms: Perms::ALL,
        }
    }

    /// A read-only ACL for `world:anyone`.
    pub fn read_unsafe() -> Self {
        Self {
            scheme: "world".to_string(),
            id: "anyone".to_string(),
            perms: Perms::READ,
        }
    }
}

/// How a node should be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Removed when the creating session ends.
    Ephemeral,
    /// Persistent, with a monotonic suffix appended to the name.
    PersistentSequential,
    /// Ephemeral, with a monotonic suffix appended to the name.
    EphemeralSequential,
}

impl CreateMode {
    /// Returns `true` for the ephemeral modes.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }

    /// Returns `true` for the sequential modes.
    pub fn is_sequential(self) -> bool {
        matches!(self, Self::PersistentSequential | Self::EphemeralSequential)
    }
}

/// The lifecycle state of a session connection.
///
/// Transitions: `Disconnected → Connecting → Connected → {Suspended →
/// Reconnected | Lost} → Closed`. `Closed` is terminal; `Lost` is terminal for
/// the session (a new connection must be created to resume).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// No session establishment has begun.
    Disconnected,
    /// Establishment is in progress under the retry policy.
    Connecting,
    /// The session is live.
    Connected,
    /// The transport dropped; the session may still be valid server-side.
    Suspended,
    /// The transport recovered while the session was still valid.
    Reconnected,
    /// Connected to a read-only replica; writes will fail.
    ReadOnly,
    /// The session expired or the retry budget ran out. Terminal for the session.
    Lost,
    /// The connection was closed explicitly. Terminal.
    Closed,
}

impl SessionState {
    /// Returns `true` only in `Connected` and `Reconnected`; read-only sessions
    /// are reported separately so callers can gate writes.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Reconnected)
    }

    /// Returns `true` when attached to a read-only replica.
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnly)
    }

    /// Returns `true` for states that accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Lost | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Suspended => write!(f, "SUSPENDED"),
            Self::Reconnected => write!(f, "RECONNECTED"),
            Self::ReadOnly => write!(f, "READ_ONLY"),
            Self::Lost => write!(f, "LOST"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}
