use std::fmt;

/// Result type for operations surfaced through the RPC boundary
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared across the daemon.
///
/// Each variant maps to one JSON-RPC application code in the
/// -32000..-32099 range; transport-level codes (-32600/-32601/-32602) are
/// produced by the RPC layer itself and never appear here.
#[derive(Debug)]
pub enum Error {
    /// Request rejected before any state change (bad scope, empty body, ...)
    Validation(String),

    /// Target agent/group/message does not exist in the projection
    NotFound(String),

    /// Duplicate group name, re-register on a bound connection, ...
    Conflict(String),

    /// Operation not legal for the target's current state
    /// (e.g. editing a deleted message)
    State(String),

    /// Method requires a bound agent/session and the connection has none
    Auth(String),

    /// Append/fsync failure; fatal for the write that hit it
    Io(std::io::Error),

    /// Sync degradation; local writes still succeed
    Sync(String),

    /// Client deadline exceeded
    Timeout(String),

    /// Unclassified internal failure
    Internal(String),
}

impl Error {
    /// JSON-RPC application error code for this kind.
    pub fn code(&self) -> i32 {
        match self {
            Error::Validation(_) => -32001,
            Error::NotFound(_) => -32002,
            Error::Conflict(_) => -32003,
            Error::State(_) => -32004,
            Error::Auth(_) => -32005,
            Error::Io(_) => -32010,
            Error::Sync(_) => -32020,
            Error::Timeout(_) => -32030,
            Error::Internal(_) => -32603,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "validation error: {}", msg),
            Error::NotFound(msg) => write!(f, "not found: {}", msg),
            Error::Conflict(msg) => write!(f, "conflict: {}", msg),
            Error::State(msg) => write!(f, "invalid state: {}", msg),
            Error::Auth(msg) => write!(f, "not authorized: {}", msg),
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Sync(msg) => write!(f, "sync error: {}", msg),
            Error::Timeout(msg) => write!(f, "deadline_exceeded: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
