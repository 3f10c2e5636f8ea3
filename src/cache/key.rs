//! Cache keys
//!
//! Listings and file lookups live in separate key namespaces, so a directory
//! and a file can never shadow each other even when their paths coincide.

use std::fmt;

/// Key of one cache entry
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Result of listing the directory at the path
    DirectoryContents(String),
    /// Result of looking up the file at the path
    FileInfo(String),
}

impl CacheKey {
    pub fn directory_contents(path: impl Into<String>) -> Self {
        CacheKey::DirectoryContents(path.into())
    }

    pub fn file_info(path: impl Into<String>) -> Self {
        CacheKey::FileInfo(path.into())
    }

    /// The path this key was derived from
    pub fn path(&self) -> &str {
        match self {
            CacheKey::DirectoryContents(path) | CacheKey::FileInfo(path) => path,
        }
    }

    /// Name of the operation this key caches
    pub fn operation(&self) -> &'static str {
        match self {
            CacheKey::DirectoryContents(_) => "list-directory",
            CacheKey::FileInfo(_) => "get-file",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.operation(), self.path())
    }
}
