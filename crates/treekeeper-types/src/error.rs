//! Error taxonomy shared by all treekeeper crates.

use thiserror::Error;

/// A specialized `Result` type for coordination-service operations.
pub type KeeperResult<T> = std::result::Result<T, KeeperError>;

/// Represents errors that can occur when talking to a coordination service.
///
/// Node operations and registry calls return the specific member synchronously;
/// nothing in the core swallows one of these silently. Transient transport
/// failures inside the session's reconnect loop are not surfaced here — only the
/// terminal `Suspended`/`Reconnected`/`Lost` transitions appear, as session events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum KeeperError {
    /// The session is not currently connected; no remote call was attempted.
    #[error("Not connected to the coordination service")]
    NotConnected,

    /// The connection has been closed and accepts no further operations.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The requested node does not exist.
    #[error("Node not found: {path}")]
    NodeNotFound {
        /// The path that was requested.
        path: String,
    },

    /// A node already exists at the requested path.
    #[error("Node already exists: {path}")]
    NodeExists {
        /// The path that collided.
        path: String,
    },

    /// The node still has children and cannot be deleted directly.
    #[error("Node not empty: {path}")]
    NotEmpty {
        /// The path that still has children.
        path: String,
    },

    /// The expected version did not match the node's current version.
    #[error("Version conflict on {path}: expected {expected}")]
    VersionConflict {
        /// The path whose version was checked.
        path: String,
        /// The version the caller expected.
        expected: i32,
    },

    /// A connection with this name is already registered.
    #[error("Duplicate connection name: {name}")]
    DuplicateName {
        /// The name that was already taken.
        name: String,
    },

    /// No connection with this name is registered.
    #[error("Unknown connection: {name}")]
    UnknownConnection {
        /// The name that was looked up.
        name: String,
    },

    /// Session establishment gave up after exhausting the retry budget.
    #[error("Retry budget exhausted after {attempts} attempts")]
    RetryExhausted {
        /// How many attempts were made before giving up.
        attempts: u32,
    },

    /// The supplied path is not a valid node path.
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The operation did not complete within its timeout.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// An opaque underlying I/O or transport failure, wrapped not swallowed.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl KeeperError {
    /// Returns the numeric failure code for the outer control layer.
    ///
    /// The control layer pairs this with the `Display` message; the core never
    /// encodes transport-specific status codes.
    pub fn code(&self) -> u32 {
        match self {
            Self::NodeNotFound { .. } => 10_001,
            Self::NodeExists { .. } => 10_002,
            Self::VersionConflict { .. } => 10_003,
            Self::NotEmpty { .. } => 10_004,
            Self::NotConnected => 10_005,
            Self::ConnectionClosed => 10_006,
            Self::DuplicateName { .. } => 10_007,
            Self::UnknownConnection { .. } => 10_008,
            Self::RetryExhausted { .. } => 10_009,
            Self::InvalidPath { .. } => 10_010,
            Self::Timeout { .. } => 10_011,
            Self::Transport(_) => 10_012,
        }
    }

    /// Returns `true` for failures that a session-level retry may clear.
    ///
    /// Logical failures (missing nodes, version conflicts) are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }

    /// Convenience constructor for [`KeeperError::NodeNotFound`].
    pub fn node_not_found(path: impl Into<String>) -> Self {
        Self::NodeNotFound { path: path.into() }
    }

    /// Convenience constructor for [`KeeperError::NodeExists`].
    pub fn node_exists(path: impl Into<String>) -> Self {
        Self::NodeExists { path: path.into() }
    }

    /// Convenience constructor for [`KeeperError::VersionConflict`].
    pub fn version_conflict(path: impl Into<String>, expected: i32) -> Self {
        Self::VersionConflict {
            path: path.into(),
            expected,
        }
    }

    /// Convenience constructor for [`KeeperError::Transport`].
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

impl From<std::io::Error> for KeeperError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            KeeperError::NotConnected,
            KeeperError::ConnectionClosed,
            KeeperError::node_not_found("/a"),
            KeeperError::node_exists("/a"),
            KeeperError::NotEmpty { path: "/a".into() },
            KeeperError::version_conflict("/a", 3),
            KeeperError::DuplicateName { name: "zk1".into() },
            KeeperError::UnknownConnection { name: "zk1".into() },
            KeeperError::RetryExhausted { attempts: 3 },
            KeeperError::InvalidPath {
                path: "a".into(),
                reason: "must start with '/'".into(),
            },
            KeeperError::Timeout {
                operation: "connect".into(),
            },
            KeeperError::transport("broken pipe"),
        ];
        let mut codes: Vec<u32> = errors.iter().map(KeeperError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_transient_classification() {
        assert!(KeeperError::transport("reset").is_transient());
        assert!(
            KeeperError::Timeout {
                operation: "read".into()
            }
            .is_transient()
        );
        assert!(!KeeperError::node_not_found("/a").is_transient());
        assert!(!KeeperError::version_conflict("/a", 1).is_transient());
    }

    #[test]
    fn test_io_error_wraps_as_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        let err: KeeperError = io.into();
        assert!(matches!(err, KeeperError::Transport(_)));
    }

    #[test]
    fn test_display_includes_path() {
        let err = KeeperError::node_not_found("/apps/web");
        assert_eq!(err.to_string(), "Node not found: /apps/web");
    }
}
