use std::fmt;

/// Result type for thrum-log operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the log layer
#[derive(Debug)]
pub enum Error {
    /// IO operation failed (fsync failures are fatal for that append)
    Io(std::io::Error),

    /// Event could not be encoded as a JSON line
    Encode(serde_json::Error),

    /// The writer worker has shut down
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Encode(err) => write!(f, "encode error: {}", err),
            Error::Closed => write!(f, "event log writer is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Encode(err) => Some(err),
            Error::Closed => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encode(err)
    }
}

impl From<Error> for thrum_types::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(io) => thrum_types::Error::Io(io),
            other => thrum_types::Error::Internal(other.to_string()),
        }
    }
}
