//! Shared cache store
//!
//! Thread-safe key/value store backed by Moka. Entries may carry expiration
//! tokens (the entry is invalidated when any of them fires) and an eviction
//! observer that is notified when the entry leaves the store.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use moka::notification::RemovalCause;
use moka::sync::Cache;
use tracing::{debug, trace, warn};

use super::cached_file::CachedFileInfo;
use super::eviction::{EvictionObserver, EvictionReason};
use super::key::CacheKey;
use crate::source::{CallbackRegistration, ChangeToken, DirectoryContents, FileInfo};

/// A cached result
#[derive(Clone)]
pub enum CacheValue {
    Directory(DirectoryContents),
    File(Arc<CachedFileInfo>),
}

impl CacheValue {
    /// Approximate cost of the entry against the store's capacity
    fn weight(&self) -> u32 {
        let weight = match self {
            CacheValue::Directory(listing) => listing.len() as u64,
            CacheValue::File(file) => file.length(),
        };
        weight.clamp(1, u32::MAX as u64) as u32
    }
}

impl fmt::Debug for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheValue::Directory(listing) => f
                .debug_tuple("Directory")
                .field(&listing.len())
                .finish(),
            CacheValue::File(file) => f
                .debug_struct("File")
                .field("name", &file.name())
                .field("length", &file.length())
                .field("loaded", &file.is_loaded())
                .finish(),
        }
    }
}

/// Options attached to an entry when it is committed
#[derive(Default)]
pub struct EntryOptions {
    /// The entry is invalidated as soon as any of these fires
    pub expiration_tokens: Vec<ChangeToken>,
    /// Notified when the entry is evicted, for any reason
    pub eviction_observer: Option<Arc<dyn EvictionObserver>>,
    /// Token callbacks that are unregistered when the entry leaves the store
    pub registrations: Vec<CallbackRegistration>,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expiration_token(mut self, token: ChangeToken) -> Self {
        self.expiration_tokens.push(token);
        self
    }

    pub fn eviction_observer(mut self, observer: Arc<dyn EvictionObserver>) -> Self {
        self.eviction_observer = Some(observer);
        self
    }

    pub fn registration(mut self, registration: CallbackRegistration) -> Self {
        self.registrations.push(registration);
        self
    }
}

#[derive(Clone)]
struct StoreEntry {
    value: CacheValue,
    observer: Option<Arc<dyn EvictionObserver>>,
    /// Dropped with the last copy of the entry, taking its callbacks along
    _registrations: Arc<[CallbackRegistration]>,
}

/// Builder for [`CacheStore`]
#[derive(Debug, Default)]
pub struct CacheStoreBuilder {
    max_capacity: Option<u64>,
}

impl CacheStoreBuilder {
    /// Bound the store's total weight (bytes for files, entries for listings)
    ///
    /// Unbounded when not set.
    pub fn max_capacity(mut self, max_capacity: Option<u64>) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn build(self) -> CacheStore {
        let mut builder = Cache::<CacheKey, StoreEntry>::builder()
            .name("static_file_cache")
            .eviction_listener(notify_observer);

        if let Some(max_capacity) = self.max_capacity {
            builder = builder
                .max_capacity(max_capacity)
                .weigher(|_key: &CacheKey, entry: &StoreEntry| entry.value.weight());
        }

        debug!(max_capacity = ?self.max_capacity, "Cache store created");

        CacheStore {
            cache: builder.build(),
        }
    }
}

/// Dispatch an eviction to the entry's observer
///
/// A panicking observer is logged and swallowed so it never unwinds into
/// Moka's eviction path.
fn notify_observer(key: Arc<CacheKey>, entry: StoreEntry, cause: RemovalCause) {
    let Some(observer) = entry.observer else {
        return;
    };
    let reason = EvictionReason::from(cause);
    let result = panic::catch_unwind(AssertUnwindSafe(|| observer.on_evicted(&key, reason)));
    if result.is_err() {
        warn!(key = %key, reason = %reason, "Eviction observer panicked");
    }
}

/// Process-wide cache shared by handle
///
/// Cloning is cheap and every clone refers to the same entries.
#[derive(Clone)]
pub struct CacheStore {
    cache: Cache<CacheKey, StoreEntry>,
}

impl CacheStore {
    pub fn builder() -> CacheStoreBuilder {
        CacheStoreBuilder::default()
    }

    /// Unbounded store
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        self.cache.get(key).map(|entry| entry.value)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains_key(key)
    }

    /// Commit an entry
    ///
    /// Token callbacks live as long as the entry does. A token that fired
    /// before the entry was committed invalidates it straight away.
    pub fn insert(&self, key: CacheKey, value: CacheValue, options: EntryOptions) {
        let mut registrations = options.registrations;
        for token in &options.expiration_tokens {
            let cache = self.cache.clone();
            let key = key.clone();
            registrations.push(token.register_scoped(move || cache.invalidate(&key)));
        }

        let entry = StoreEntry {
            value,
            observer: options.eviction_observer,
            _registrations: registrations.into(),
        };
        self.cache.insert(key.clone(), entry);

        if options.expiration_tokens.iter().any(ChangeToken::has_changed) {
            trace!(key = %key, "Expiration token fired before commit");
            self.cache.invalidate(&key);
        }
    }

    /// Drop an entry, notifying its observer
    pub fn invalidate(&self, key: &CacheKey) {
        self.cache.invalidate(key);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    /// Number of entries, after applying pending maintenance
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    /// Total weight of the entries
    pub fn weighted_size(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.weighted_size()
    }

    /// Apply pending evictions now instead of on a later access
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}
