//! Check query cache.
//!
//! Memoizes full check responses keyed by [`CheckCacheKey`]. Backed by Moka's
//! async cache with a bounded capacity, LRU eviction and a per-entry TTL.
//!
//! Stored responses carry a datastore query count of zero: a hit performs no
//! reads. Responses flagged `cycle_detected` are never stored since they only
//! hold for the path that produced them.
//!
//! # Example
//!
//! ```rust,ignore
//! use fgacheck_domain::cache::{CheckCacheConfig, CheckQueryCache};
//! use std::time::Duration;
//!
//! let cache = CheckQueryCache::new(CheckCacheConfig::default().with_ttl(Duration::from_secs(5)));
//! ```

mod key;

pub use key::CheckCacheKey;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use tracing::debug;

use crate::resolver::ResolveCheckResponse;

/// Default maximum number of cached responses.
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Default time-to-live of a cached response.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

/// Configuration for the check query cache.
#[derive(Debug, Clone)]
pub struct CheckCacheConfig {
    /// Maximum number of entries in the cache.
    pub max_capacity: u64,
    /// Time-to-live of every entry.
    pub ttl: Duration,
}

impl Default for CheckCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: DEFAULT_CACHE_CAPACITY,
            ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl CheckCacheConfig {
    /// Sets the maximum capacity.
    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Sets the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Hit and miss counters for a cache instance.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("fgacheck_check_cache_hits_total").increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("fgacheck_check_cache_misses_total").increment(1);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
}

impl CacheMetricsSnapshot {
    /// Fraction of lookups that hit, 0.0 when there were none.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded, expiring store of check responses.
pub struct CheckQueryCache {
    cache: Cache<CheckCacheKey, ResolveCheckResponse>,
    config: CheckCacheConfig,
    metrics: CacheMetrics,
    closed: AtomicBool,
}

impl CheckQueryCache {
    pub fn new(config: CheckCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            cache,
            config,
            metrics: CacheMetrics::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CheckCacheConfig {
        &self.config
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Looks up a response. A closed cache always misses.
    pub async fn get(&self, key: &CheckCacheKey) -> Option<ResolveCheckResponse> {
        if self.is_closed() {
            return None;
        }

        let hit = self.cache.get(key).await;
        if hit.is_some() {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        hit
    }

    /// Stores `response` with its datastore query count reset to zero.
    ///
    /// Cycle responses and writes to a closed cache are ignored.
    pub async fn insert(&self, key: CheckCacheKey, response: &ResolveCheckResponse) {
        if self.is_closed() || response.cycle_detected() {
            return;
        }

        let stored = ResolveCheckResponse::new(response.allowed, 0);
        self.cache.insert(key, stored).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of live entries. Call
    /// [`CheckQueryCache::run_pending_tasks`] first for an exact count.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drops every entry and rejects further reads and writes.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("closing check query cache");
            self.cache.invalidate_all();
        }
    }
}

impl std::fmt::Debug for CheckQueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckQueryCache")
            .field("config", &self.config)
            .field("entries", &self.cache.entry_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
