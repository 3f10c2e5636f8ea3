//! File source contract
//!
//! The caching layer sits in front of anything implementing [`FileSource`] and
//! implements the same trait itself, so it can be dropped in wherever the
//! underlying source was used.

pub mod change_token;
pub mod errors;
#[cfg(test)]
pub(crate) mod memory;
pub mod physical;

use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

pub use change_token::{CallbackRegistration, ChangeToken};
pub(crate) use change_token::WeakChangeToken;
pub use errors::SourceError;
pub use physical::PhysicalFileSource;

/// Readable view over a file's content
pub type ReadStream = Box<dyn Read + Send>;

/// Metadata handle for one file or directory
pub trait FileInfo: Send + Sync {
    /// Whether the path exists in the source
    fn exists(&self) -> bool;

    fn is_directory(&self) -> bool;

    /// Last modification time, if known
    fn last_modified(&self) -> Option<SystemTime>;

    /// Size in bytes (0 for directories and missing files)
    fn length(&self) -> u64;

    /// Final path component
    fn name(&self) -> &str;

    /// Location on disk, for sources backed by a real filesystem
    fn physical_path(&self) -> Option<&Path>;

    /// Open the content for reading
    ///
    /// Every call returns an independent stream positioned at the start.
    fn create_read_stream(&self) -> io::Result<ReadStream>;
}

impl fmt::Debug for dyn FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileInfo")
            .field("name", &self.name())
            .field("exists", &self.exists())
            .field("is_directory", &self.is_directory())
            .field("length", &self.length())
            .finish()
    }
}

/// Result of listing a directory
///
/// Cloning is cheap: the entries are shared.
#[derive(Clone, Debug)]
pub struct DirectoryContents {
    exists: bool,
    entries: Arc<[Arc<dyn FileInfo>]>,
}

impl DirectoryContents {
    /// An existing directory with the given children
    pub fn new(entries: Vec<Arc<dyn FileInfo>>) -> Self {
        Self {
            exists: true,
            entries: entries.into(),
        }
    }

    /// The negative result for a path that is not a directory
    pub fn not_found() -> Self {
        Self {
            exists: false,
            entries: Vec::new().into(),
        }
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn entries(&self) -> &[Arc<dyn FileInfo>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn FileInfo>> {
        self.entries.iter()
    }

    /// Whether two results share the same entry list
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

/// A source of static files
pub trait FileSource: Send + Sync {
    /// List the children of a directory
    fn get_directory_contents(&self, path: &str) -> DirectoryContents;

    /// Look up a single file
    fn get_file_info(&self, path: &str) -> Arc<dyn FileInfo>;

    /// Obtain a token that fires when `filter` changes
    fn watch(&self, filter: &str) -> ChangeToken;
}

impl<S: FileSource + ?Sized> FileSource for Arc<S> {
    fn get_directory_contents(&self, path: &str) -> DirectoryContents {
        (**self).get_directory_contents(path)
    }

    fn get_file_info(&self, path: &str) -> Arc<dyn FileInfo> {
        (**self).get_file_info(path)
    }

    fn watch(&self, filter: &str) -> ChangeToken {
        (**self).watch(filter)
    }
}

/// Normalize a path for consistent lookup
///
/// Backslashes become `/`, empty and `.` segments are dropped and the result
/// has exactly one leading slash and no trailing slash. The root is `/`.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split(['/', '\\']) {
        if segment.is_empty() || segment == "." {
            continue;
        }
        normalized.push('/');
        normalized.push_str(segment);
    }

    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Join a normalized directory path and a child name
pub fn join_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}
