//! Cached file handle with lazily memoized content
//!
//! Wraps the underlying source's handle for one file. Metadata passes straight
//! through; the content is read from the source on first use and then served
//! from memory.

use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use tracing::trace;

use crate::source::{FileInfo, ReadStream};

/// File handle that memoizes its content on first read
///
/// Concurrent first reads do not wait for each other: each reads the file
/// independently and tries to publish its buffer. Exactly one buffer wins and
/// is served from then on; a losing reader still returns the bytes it read.
pub struct CachedFileInfo {
    /// Normalized request path, for diagnostics
    path: String,
    inner: Arc<dyn FileInfo>,
    /// Set once, never replaced. Unset means "not loaded", not "empty".
    contents: OnceLock<Arc<[u8]>>,
}

impl CachedFileInfo {
    pub fn new(path: impl Into<String>, inner: Arc<dyn FileInfo>) -> Self {
        Self {
            path: path.into(),
            inner,
            contents: OnceLock::new(),
        }
    }

    /// The memoized content, if it has been loaded
    pub fn contents(&self) -> Option<Arc<[u8]>> {
        self.contents.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.contents.get().is_some()
    }

    /// Read the full content from the underlying handle
    ///
    /// The stream is dropped before returning on every path.
    fn load(&self) -> io::Result<Arc<[u8]>> {
        let capacity = usize::try_from(self.inner.length()).unwrap_or(0);
        let mut buf = Vec::with_capacity(capacity);
        let mut stream = self.inner.create_read_stream()?;
        stream.read_to_end(&mut buf)?;
        Ok(buf.into())
    }

    fn physical_display(&self) -> String {
        self.inner
            .physical_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

impl FileInfo for CachedFileInfo {
    fn exists(&self) -> bool {
        self.inner.exists()
    }

    fn is_directory(&self) -> bool {
        self.inner.is_directory()
    }

    fn last_modified(&self) -> Option<SystemTime> {
        self.inner.last_modified()
    }

    fn length(&self) -> u64 {
        self.inner.length()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn physical_path(&self) -> Option<&Path> {
        self.inner.physical_path()
    }

    fn create_read_stream(&self) -> io::Result<ReadStream> {
        if let Some(contents) = self.contents.get() {
            trace!(
                path = %self.path,
                filepath = %self.physical_display(),
                "Returning cached file contents"
            );
            return Ok(Box::new(Cursor::new(Arc::clone(contents))));
        }

        trace!(
            path = %self.path,
            filepath = %self.physical_display(),
            "Loading file contents"
        );
        let contents = self.load()?;

        if self.contents.set(Arc::clone(&contents)).is_ok() {
            trace!(
                path = %self.path,
                filepath = %self.physical_display(),
                bytes = contents.len(),
                "Cached file contents"
            );
        }

        Ok(Box::new(Cursor::new(contents)))
    }
}
