//! Static file caching layer
//!
//! Caches directory listings and small file contents in memory in front of a
//! [`FileSource`](crate::source::FileSource), invalidating file entries when
//! the underlying file changes.

pub mod cached_file;
pub mod eviction;
pub mod key;
pub mod priming;
pub mod provider;
pub mod store;

pub use cached_file::CachedFileInfo;
pub use eviction::{EvictionObserver, EvictionReason, TracingEvictionObserver};
pub use key::CacheKey;
pub use priming::CacheSize;
pub use provider::{CacheStatistics, CachingFileSource, DEFAULT_FILE_SIZE_LIMIT};
pub use store::{CacheStore, CacheValue, EntryOptions};
