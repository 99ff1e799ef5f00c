use std::fmt;

/// Result type for thrum-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the sync layer
#[derive(Debug)]
pub enum Error {
    /// A git subprocess failed
    Git { command: String, detail: String },

    /// IO operation failed
    Io(std::io::Error),

    /// Event log access failed
    Log(thrum_log::Error),

    /// Projection access failed
    Index(thrum_index::Error),

    /// The surrounding directory is not a git repository
    NotARepo(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Git { command, detail } => write!(f, "git {} failed: {}", command, detail),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Log(err) => write!(f, "log error: {}", err),
            Error::Index(err) => write!(f, "index error: {}", err),
            Error::NotARepo(path) => write!(f, "not a git repository: {}", path),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Log(err) => Some(err),
            Error::Index(err) => Some(err),
            Error::Git { .. } | Error::NotARepo(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<thrum_log::Error> for Error {
    fn from(err: thrum_log::Error) -> Self {
        Error::Log(err)
    }
}

impl From<thrum_index::Error> for Error {
    fn from(err: thrum_index::Error) -> Self {
        Error::Index(err)
    }
}

impl From<Error> for thrum_types::Error {
    fn from(err: Error) -> Self {
        thrum_types::Error::Sync(err.to_string())
    }
}
