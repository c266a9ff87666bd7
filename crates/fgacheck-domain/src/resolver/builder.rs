//! Composition root for the resolver chain.
//!
//! ```text
//! Cached -> CycleDetection -> LocalChecker
//!   ^                              |
//!   +------- weak back edge -------+
//! ```
//!
//! Without a cache the back edge points at the cycle detector.

use std::sync::Arc;

use tracing::debug;

use crate::cache::{CheckCacheConfig, CheckQueryCache};
use crate::condition::ConditionEvaluator;
use crate::error::DomainResult;

use super::cached::CachedCheckResolver;
use super::context::ResolutionContext;
use super::cycle_detection::CycleDetectionCheckResolver;
use super::local_checker::{LocalChecker, LocalCheckerConfig};
use super::traits::CheckResolver;
use super::types::{ResolveCheckRequest, ResolveCheckResponse};

#[derive(Debug, Clone, Default)]
enum CacheSetting {
    #[default]
    Disabled,
    Owned(CheckCacheConfig),
    Shared(Arc<CheckQueryCache>),
}

/// Builds a [`CheckResolverChain`].
#[derive(Default)]
pub struct CheckResolverBuilder {
    local_config: LocalCheckerConfig,
    condition_evaluator: Option<Arc<dyn ConditionEvaluator>>,
    cache: CacheSetting,
}

impl CheckResolverBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_checker_config(mut self, config: LocalCheckerConfig) -> Self {
        self.local_config = config;
        self
    }

    pub fn with_condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.condition_evaluator = Some(evaluator);
        self
    }

    /// Adds a cache layer owning a new cache built from `config`.
    pub fn with_cache(mut self, config: CheckCacheConfig) -> Self {
        self.cache = CacheSetting::Owned(config);
        self
    }

    /// Adds a cache layer over a cache owned by the caller.
    pub fn with_shared_cache(mut self, cache: Arc<CheckQueryCache>) -> Self {
        self.cache = CacheSetting::Shared(cache);
        self
    }

    pub fn build(self) -> CheckResolverChain {
        let mut local = LocalChecker::new(self.local_config);
        if let Some(evaluator) = self.condition_evaluator {
            local = local.with_condition_evaluator(evaluator);
        }
        let local = Arc::new(local);

        let cycle = Arc::new(CycleDetectionCheckResolver::new(
            Arc::clone(&local) as Arc<dyn CheckResolver>
        ));

        let cached = match self.cache {
            CacheSetting::Disabled => None,
            CacheSetting::Owned(config) => Some(Arc::new(CachedCheckResolver::new(
                Arc::clone(&cycle) as Arc<dyn CheckResolver>,
                config,
            ))),
            CacheSetting::Shared(cache) => Some(Arc::new(CachedCheckResolver::with_cache(
                Arc::clone(&cycle) as Arc<dyn CheckResolver>,
                cache,
            ))),
        };

        let entry: Arc<dyn CheckResolver> = match &cached {
            Some(cached) => Arc::clone(cached) as Arc<dyn CheckResolver>,
            None => Arc::clone(&cycle) as Arc<dyn CheckResolver>,
        };
        local.set_back_edge(&entry);

        debug!(cached = cached.is_some(), "built check resolver chain");
        CheckResolverChain {
            entry,
            local,
            cycle,
            cached,
        }
    }
}

/// A wired resolver chain. Keeps every layer alive for as long as it lives.
pub struct CheckResolverChain {
    entry: Arc<dyn CheckResolver>,
    local: Arc<LocalChecker>,
    cycle: Arc<CycleDetectionCheckResolver>,
    cached: Option<Arc<CachedCheckResolver>>,
}

impl CheckResolverChain {
    pub async fn resolve_check(
        &self,
        ctx: &ResolutionContext,
        request: ResolveCheckRequest,
    ) -> DomainResult<ResolveCheckResponse> {
        self.entry.resolve_check(ctx, request).await
    }

    /// The outermost layer.
    pub fn entry(&self) -> &Arc<dyn CheckResolver> {
        &self.entry
    }

    pub fn local_checker(&self) -> &Arc<LocalChecker> {
        &self.local
    }

    pub fn cycle_detection(&self) -> &Arc<CycleDetectionCheckResolver> {
        &self.cycle
    }

    pub fn cached(&self) -> Option<&Arc<CachedCheckResolver>> {
        self.cached.as_ref()
    }

    /// Closes every layer, outermost first.
    pub fn close(&self) {
        if let Some(cached) = &self.cached {
            cached.close();
        }
        self.cycle.close();
        self.local.close();
    }
}

impl std::fmt::Debug for CheckResolverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckResolverChain")
            .field("local", &self.local)
            .field("cycle", &self.cycle)
            .field("cached", &self.cached)
            .finish()
    }
}
