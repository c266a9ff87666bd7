//! Memoizes check responses in a [`CheckQueryCache`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, debug_span, Instrument};

use crate::cache::{CacheMetricsSnapshot, CheckCacheConfig, CheckCacheKey, CheckQueryCache};
use crate::error::DomainResult;

use super::context::ResolutionContext;
use super::delegate::DelegateSlot;
use super::traits::CheckResolver;
use super::types::{ResolveCheckRequest, ResolveCheckResponse};

/// Serves repeated sub-problems from the cache and forwards the rest.
///
/// A hit reports zero datastore queries. Errors are never cached.
#[derive(Debug)]
pub struct CachedCheckResolver {
    delegate: DelegateSlot,
    cache: Arc<CheckQueryCache>,
    owns_cache: bool,
}

impl CachedCheckResolver {
    /// Creates a resolver with its own cache, closed together with it.
    pub fn new(delegate: Arc<dyn CheckResolver>, config: CheckCacheConfig) -> Self {
        Self {
            delegate: DelegateSlot::new(delegate),
            cache: Arc::new(CheckQueryCache::new(config)),
            owns_cache: true,
        }
    }

    /// Creates a resolver over a cache owned by the caller. `close` leaves it open.
    pub fn with_cache(delegate: Arc<dyn CheckResolver>, cache: Arc<CheckQueryCache>) -> Self {
        Self {
            delegate: DelegateSlot::new(delegate),
            cache,
            owns_cache: false,
        }
    }

    pub fn delegate(&self) -> DomainResult<Arc<dyn CheckResolver>> {
        self.delegate.require()
    }

    pub fn set_delegate(&self, delegate: Arc<dyn CheckResolver>) {
        self.delegate.set(delegate);
    }

    pub fn cache(&self) -> &Arc<CheckQueryCache> {
        &self.cache
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.cache.metrics()
    }
}

#[async_trait]
impl CheckResolver for CachedCheckResolver {
    async fn resolve_check(
        &self,
        ctx: &ResolutionContext,
        request: ResolveCheckRequest,
    ) -> DomainResult<ResolveCheckResponse> {
        let key = CheckCacheKey::from_request(&request);
        let span = debug_span!(
            "resolve_check",
            resolver = "cached",
            tuple_key = %request.tuple_key,
        );

        if let Some(hit) = self.cache.get(&key).await {
            debug!(parent: &span, allowed = hit.allowed, "check cache hit");
            return Ok(hit);
        }

        let delegate = self.delegate.require()?;
        let response = delegate.resolve_check(ctx, request).instrument(span).await?;
        self.cache.insert(key, &response).await;
        Ok(response)
    }

    fn close(&self) {
        if self.owns_cache {
            self.cache.close();
        }
    }
}
