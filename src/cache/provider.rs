//! Caching file source
//!
//! Decorates another [`FileSource`], answering repeated listings and file
//! lookups from the shared [`CacheStore`]. Small files additionally keep their
//! content in memory once read; large files are always passed through.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use super::cached_file::CachedFileInfo;
use super::eviction::{EvictionObserver, TracingEvictionObserver};
use super::key::CacheKey;
use super::store::{CacheStore, CacheValue, EntryOptions};
use crate::source::{normalize_path, ChangeToken, DirectoryContents, FileInfo, FileSource};

/// Default size limit for cached files: 256 KiB
pub const DEFAULT_FILE_SIZE_LIMIT: u64 = 256 * 1024;

/// Point-in-time view of the cache counters
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    /// Lookups of files too large to cache
    pub bypassed: u64,
}

impl CacheStatistics {
    /// Hit rate as a percentage of all lookups
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            (self.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    bypassed: AtomicU64,
}

/// File source that caches another file source
pub struct CachingFileSource<S> {
    source: S,
    store: CacheStore,
    /// Files strictly larger than this are never cached
    file_size_limit: u64,
    observer: Arc<dyn EvictionObserver>,
    stats: CacheStats,
}

impl<S: FileSource> CachingFileSource<S> {
    /// Wrap `source`, caching into `store`
    ///
    /// # Arguments
    /// * `source` - The underlying file source
    /// * `store` - Shared store the entries are committed to
    /// * `file_size_limit` - Largest file size in bytes that is cached
    pub fn new(source: S, store: CacheStore, file_size_limit: u64) -> Self {
        Self {
            source,
            store,
            file_size_limit,
            observer: Arc::new(TracingEvictionObserver),
            stats: CacheStats::default(),
        }
    }

    /// Replace the observer registered on new entries
    pub fn with_eviction_observer(mut self, observer: Arc<dyn EvictionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn file_size_limit(&self) -> u64 {
        self.file_size_limit
    }

    pub fn stats(&self) -> CacheStatistics {
        CacheStatistics {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            bypassed: self.stats.bypassed.load(Ordering::Relaxed),
        }
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let stats = self.stats();
        debug!(
            hits = stats.hits,
            misses = stats.misses,
            bypassed = stats.bypassed,
            hit_rate = format!("{:.1}%", stats.hit_rate()),
            entries = self.store.entry_count(),
            "Cache metrics"
        );
    }

    fn hit(&self, key: &CacheKey) {
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, "Cache HIT");
    }

    fn miss(&self, key: &CacheKey) {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, "Cache MISS");
    }
}

impl<S: FileSource> FileSource for CachingFileSource<S> {
    fn get_directory_contents(&self, path: &str) -> DirectoryContents {
        let path = normalize_path(path);
        let key = CacheKey::directory_contents(path.as_str());
        if let Some(CacheValue::Directory(listing)) = self.store.get(&key) {
            self.hit(&key);
            return listing;
        }
        self.miss(&key);

        let listing = self.source.get_directory_contents(&path);
        if !listing.exists() {
            return listing;
        }

        // Listings carry no expiration token: they stay until the store evicts them
        self.store.insert(
            key,
            CacheValue::Directory(listing.clone()),
            EntryOptions::new().eviction_observer(Arc::clone(&self.observer)),
        );
        listing
    }

    fn get_file_info(&self, path: &str) -> Arc<dyn FileInfo> {
        let path = normalize_path(path);
        let key = CacheKey::file_info(path.as_str());
        if let Some(CacheValue::File(cached)) = self.store.get(&key) {
            self.hit(&key);
            return cached;
        }
        self.miss(&key);

        // Watch before the stat so a change landing in between still fires
        let file_changed = self.source.watch(&path);
        let file_info = self.source.get_file_info(&path);
        if !file_info.exists() {
            return file_info;
        }

        if file_info.length() > self.file_size_limit {
            self.stats.bypassed.fetch_add(1, Ordering::Relaxed);
            trace!(
                path = %path,
                length = file_info.length(),
                file_size_limit = self.file_size_limit,
                "File contents will not be cached as it's over the file size limit"
            );
            return file_info;
        }

        let cached = Arc::new(CachedFileInfo::new(path.as_str(), Arc::clone(&file_info)));

        let filepath = file_info
            .physical_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let changed_path = path.clone();
        let change_logged = file_changed.register_scoped(move || {
            debug!(path = %changed_path, filepath = %filepath, "Change detected");
        });

        self.store.insert(
            key,
            CacheValue::File(Arc::clone(&cached)),
            EntryOptions::new()
                .expiration_token(file_changed)
                .registration(change_logged)
                .eviction_observer(Arc::clone(&self.observer)),
        );
        cached
    }

    fn watch(&self, filter: &str) -> ChangeToken {
        self.source.watch(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::eviction::EvictionReason;
    use crate::source::memory::MemoryFileSource;
    use std::io::Read;
    use std::sync::{Barrier, Mutex};
    use std::thread;

    fn read_all(info: &dyn FileInfo) -> Vec<u8> {
        let mut buf = Vec::new();
        info.create_read_stream()
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();
        buf
    }

    fn caching(source: &MemoryFileSource, limit: u64) -> CachingFileSource<MemoryFileSource> {
        CachingFileSource::new(source.clone(), CacheStore::new(), limit)
    }

    #[derive(Default)]
    struct RecordingObserver {
        evictions: Mutex<Vec<(CacheKey, EvictionReason)>>,
    }

    impl EvictionObserver for RecordingObserver {
        fn on_evicted(&self, key: &CacheKey, reason: EvictionReason) {
            self.evictions.lock().unwrap().push((key.clone(), reason));
        }
    }

    #[test]
    fn test_missing_file_never_cached() {
        let source = MemoryFileSource::new();
        let cache = caching(&source, DEFAULT_FILE_SIZE_LIMIT);

        for _ in 0..5 {
            assert!(!cache.get_file_info("/missing.txt").exists());
        }

        assert_eq!(source.stat_calls(), 5);
        assert!(!cache.store().contains(&CacheKey::file_info("/missing.txt")));
        assert_eq!(cache.store().entry_count(), 0);
    }

    #[test]
    fn test_file_created_after_miss_is_found() {
        let source = MemoryFileSource::new();
        let cache = caching(&source, DEFAULT_FILE_SIZE_LIMIT);

        assert!(!cache.get_file_info("/late.txt").exists());
        source.set_file("/late.txt", b"hello");

        let info = cache.get_file_info("/late.txt");
        assert!(info.exists());
        assert_eq!(read_all(info.as_ref()), b"hello");
    }

    #[test]
    fn test_small_file_cached_and_memoized() {
        let source = MemoryFileSource::new().with_file("/a.txt", b"0123456789");
        let cache = caching(&source, DEFAULT_FILE_SIZE_LIMIT);

        let first = cache.get_file_info("/a.txt");
        assert_eq!(read_all(first.as_ref()), b"0123456789");

        let second = cache.get_file_info("a.txt");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(read_all(second.as_ref()), b"0123456789");

        assert_eq!(source.stat_calls(), 1);
        assert_eq!(source.open_calls(), 1);
        assert_eq!(source.watch_calls(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_file_at_limit_is_cached() {
        let source = MemoryFileSource::new().with_file("/edge.bin", &[7u8; 1024]);
        let cache = caching(&source, 1024);

        read_all(cache.get_file_info("/edge.bin").as_ref());
        read_all(cache.get_file_info("/edge.bin").as_ref());

        assert!(cache.store().contains(&CacheKey::file_info("/edge.bin")));
        assert_eq!(source.open_calls(), 1);
    }

    #[test]
    fn test_oversized_file_always_rereads() {
        let source = MemoryFileSource::new().with_file("/big.bin", &[1u8; 2048]);
        let cache = caching(&source, 1024);

        let info = cache.get_file_info("/big.bin");
        assert!(info.exists());
        assert_eq!(read_all(info.as_ref()), vec![1u8; 2048]);

        source.set_file("/big.bin", &[2u8; 2048]);
        assert_eq!(read_all(info.as_ref()), vec![2u8; 2048]);
        assert_eq!(source.open_calls(), 2);

        let again = cache.get_file_info("/big.bin");
        read_all(again.as_ref());
        assert_eq!(source.stat_calls(), 2);
        assert_eq!(source.open_calls(), 3);
        assert!(!cache.store().contains(&CacheKey::file_info("/big.bin")));
        assert_eq!(cache.stats().bypassed, 2);
    }

    #[test]
    fn test_file_shrinking_below_limit_becomes_cacheable() {
        let source = MemoryFileSource::new().with_file("/grow.bin", &[0u8; 2048]);
        let cache = caching(&source, 1024);

        cache.get_file_info("/grow.bin");
        assert!(!cache.store().contains(&CacheKey::file_info("/grow.bin")));

        source.set_file("/grow.bin", &[0u8; 512]);
        cache.get_file_info("/grow.bin");
        assert!(cache.store().contains(&CacheKey::file_info("/grow.bin")));
    }

    #[test]
    fn test_concurrent_first_reads_on_cached_handle() {
        let content: Vec<u8> = (0..4096).map(|i| (i % 13) as u8).collect();
        let source = MemoryFileSource::new().with_file("/c.bin", &content);
        let cache = caching(&source, DEFAULT_FILE_SIZE_LIMIT);

        let info = cache.get_file_info("/c.bin");
        let barrier = Arc::new(Barrier::new(2));
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let info = Arc::clone(&info);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    read_all(info.as_ref())
                })
            })
            .collect();
        for reader in readers {
            assert_eq!(reader.join().unwrap(), content);
        }

        let opens = source.open_calls();
        for _ in 0..3 {
            assert_eq!(read_all(info.as_ref()), content);
        }
        assert_eq!(source.open_calls(), opens);
    }

    #[test]
    fn test_read_fault_propagates() {
        let source = MemoryFileSource::new().with_file("/a.txt", b"data");
        let cache = caching(&source, DEFAULT_FILE_SIZE_LIMIT);

        source.fail_reads(true);
        let info = cache.get_file_info("/a.txt");
        let err = info.create_read_stream().err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::Other);
        assert_eq!(err.to_string(), "injected read failure");
    }

    #[test]
    fn test_directory_listing_cached() {
        let source = MemoryFileSource::new()
            .with_file("/a.txt", b"a")
            .with_file("/sub/b.txt", b"b");
        let cache = caching(&source, DEFAULT_FILE_SIZE_LIMIT);

        let first = cache.get_directory_contents("/");
        let second = cache.get_directory_contents("");

        assert!(first.exists());
        assert_eq!(first.len(), 2);
        assert!(first.ptr_eq(&second));
        assert_eq!(source.list_calls(), 1);
    }

    #[test]
    fn test_missing_directory_not_cached() {
        let source = MemoryFileSource::new();
        let cache = caching(&source, DEFAULT_FILE_SIZE_LIMIT);

        assert!(!cache.get_directory_contents("/nope").exists());
        assert!(!cache.get_directory_contents("/nope").exists());

        assert_eq!(source.list_calls(), 2);
        assert!(!cache
            .store()
            .contains(&CacheKey::directory_contents("/nope")));
    }

    #[test]
    fn test_listing_and_file_keys_are_disjoint() {
        let source = MemoryFileSource::new().with_file("/sub/b.txt", b"b");
        let cache = caching(&source, DEFAULT_FILE_SIZE_LIMIT);

        assert!(cache.get_directory_contents("/sub").exists());
        assert!(!cache.get_file_info("/sub").exists());
        assert!(cache.get_directory_contents("/sub").exists());
        assert_eq!(source.list_calls(), 1);
        assert_eq!(source.stat_calls(), 1);
    }

    #[test]
    fn test_change_evicts_file_entry() {
        let source = MemoryFileSource::new().with_file("/a.txt", b"old content");
        let observer = Arc::new(RecordingObserver::default());
        let cache = caching(&source, DEFAULT_FILE_SIZE_LIMIT)
            .with_eviction_observer(observer.clone());

        assert_eq!(read_all(cache.get_file_info("/a.txt").as_ref()), b"old content");

        source.set_file("/a.txt", b"new content");
        source.fire("/a.txt");

        let key = CacheKey::file_info("/a.txt");
        assert!(!cache.store().contains(&key));
        assert_eq!(
            *observer.evictions.lock().unwrap(),
            vec![(key, EvictionReason::Invalidated)]
        );

        assert_eq!(read_all(cache.get_file_info("/a.txt").as_ref()), b"new content");
        assert_eq!(source.stat_calls(), 2);
        assert_eq!(source.watch_calls(), 2);
    }

    /// Deletes each file right after reporting it, firing its watch token
    struct VanishingSource {
        inner: MemoryFileSource,
    }

    impl FileSource for VanishingSource {
        fn get_directory_contents(&self, path: &str) -> DirectoryContents {
            self.inner.get_directory_contents(path)
        }

        fn get_file_info(&self, path: &str) -> Arc<dyn FileInfo> {
            let info = self.inner.get_file_info(path);
            self.inner.remove_file(path);
            self.inner.fire(path);
            info
        }

        fn watch(&self, filter: &str) -> ChangeToken {
            self.inner.watch(filter)
        }
    }

    #[test]
    fn test_change_between_stat_and_commit_is_not_cached() {
        let inner = MemoryFileSource::new().with_file("/a.txt", b"0123456789");
        let cache = CachingFileSource::new(
            VanishingSource {
                inner: inner.clone(),
            },
            CacheStore::new(),
            DEFAULT_FILE_SIZE_LIMIT,
        );

        assert!(cache.get_file_info("/a.txt").exists());
        assert!(!cache.store().contains(&CacheKey::file_info("/a.txt")));
        assert!(!cache.get_file_info("/a.txt").exists());
    }

    #[test]
    fn test_refetch_after_eviction_keeps_token_callbacks_bounded() {
        let source = MemoryFileSource::new().with_file("/hot.txt", b"hot");
        let cache = caching(&source, DEFAULT_FILE_SIZE_LIMIT);
        let key = CacheKey::file_info("/hot.txt");

        for _ in 0..50 {
            cache.get_file_info("/hot.txt");
            cache.store().invalidate(&key);
            cache.store().run_pending_tasks();
        }
        cache.get_file_info("/hot.txt");
        cache.store().run_pending_tasks();

        let token = source.watch("/hot.txt");
        assert!(token.pending_callbacks() <= 4);

        source.fire("/hot.txt");
        assert!(!cache.store().contains(&key));
    }

    #[test]
    fn test_watch_passes_through() {
        let source = MemoryFileSource::new();
        let cache = caching(&source, DEFAULT_FILE_SIZE_LIMIT);

        let token = cache.watch("/a.txt");
        assert_eq!(source.watch_calls(), 1);

        source.fire("/a.txt");
        assert!(token.has_changed());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStatistics {
            hits: 3,
            misses: 1,
            bypassed: 0,
        };
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(CacheStatistics::default().hit_rate(), 0.0);
    }
}
