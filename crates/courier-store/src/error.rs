use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem error while reading, writing or listing documents.
    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A document exists but does not parse as the requested type.
    #[error("Corrupt document {collection}/{key}: {source}")]
    Corrupt {
        collection: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A value could not be serialized before writing.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Collection names and keys must be single, plain path segments.
    #[error("Invalid document key: {0}")]
    InvalidKey(String),
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
