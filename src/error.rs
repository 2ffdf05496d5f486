use std::path::PathBuf;

use thiserror::Error;

/// Library error type for catalog and sequence operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Sequence length was negative.
    #[error("invalid length {0} for sequence")]
    InvalidLength(i64),

    /// An explicitly configured increment was below one.
    #[error("invalid increment {0} for sequence")]
    InvalidIncrement(i64),

    /// Selector name did not match any known strategy.
    #[error("unknown selector {0:?}")]
    UnknownSelector(String),

    /// The `unshown` selector was requested without a catalog to consult.
    #[error("the unshown selector requires a picture catalog")]
    MissingCatalog,

    /// Filesystem failure, tagged with the path involved.
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted JSON file could not be parsed or written.
    #[error("{}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
