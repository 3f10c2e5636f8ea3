//! File source error types

use std::path::PathBuf;

/// Errors raised while constructing a file source
///
/// Lookups never fail with these: a missing path is a normal "not found"
/// result and read faults surface as `std::io::Error`.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Content root {path:?} is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("Failed to resolve content root {path:?}: {source}")]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create file watcher: {0}")]
    WatcherCreation(#[from] notify::Error),

    #[error("Failed to watch {path:?}: {source}")]
    WatchPath {
        path: PathBuf,
        source: notify::Error,
    },
}
