//! Eviction notifications
//!
//! Observers are purely diagnostic. They are called synchronously from the
//! store's eviction path and must not affect cached state.

use std::fmt;

use moka::notification::RemovalCause;
use tracing::trace;

use super::key::CacheKey;

/// Why an entry left the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionReason {
    /// Invalidated explicitly, e.g. by a fired change token
    Invalidated,
    /// Removed to keep the store under its capacity
    Capacity,
    /// Expired by a time-based policy
    Expired,
    /// Overwritten by a newer value for the same key
    Replaced,
}

impl From<RemovalCause> for EvictionReason {
    fn from(cause: RemovalCause) -> Self {
        match cause {
            RemovalCause::Explicit => EvictionReason::Invalidated,
            RemovalCause::Size => EvictionReason::Capacity,
            RemovalCause::Expired => EvictionReason::Expired,
            RemovalCause::Replaced => EvictionReason::Replaced,
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            EvictionReason::Invalidated => "invalidated",
            EvictionReason::Capacity => "capacity",
            EvictionReason::Expired => "expired",
            EvictionReason::Replaced => "replaced",
        };
        f.write_str(reason)
    }
}

/// Receives a call for every evicted entry it was registered on
pub trait EvictionObserver: Send + Sync {
    fn on_evicted(&self, key: &CacheKey, reason: EvictionReason);
}

/// Logs evictions at trace level
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEvictionObserver;

impl EvictionObserver for TracingEvictionObserver {
    fn on_evicted(&self, key: &CacheKey, reason: EvictionReason) {
        trace!(key = %key, reason = %reason, "Cache entry was evicted");
    }
}
