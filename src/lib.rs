//! Static file cache
//!
//! An in-memory caching layer for static assets. [`CachingFileSource`] wraps
//! any [`FileSource`], caching directory listings and the content of small
//! files, and drops cached files when the underlying file changes.

pub mod cache;
pub mod ipc;
pub mod settings;
pub mod source;

pub use cache::{CacheKey, CacheSize, CacheStore, CachingFileSource};
pub use settings::StaticFileCacheSettings;
pub use source::{ChangeToken, DirectoryContents, FileInfo, FileSource, PhysicalFileSource};
