//! Stops recursion on edges already visited along the current path.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, debug_span, Instrument};

use crate::error::DomainResult;

use super::context::ResolutionContext;
use super::delegate::DelegateSlot;
use super::traits::CheckResolver;
use super::types::{ResolveCheckRequest, ResolveCheckResponse};

/// Answers `allowed = false, cycle_detected = true` for a repeated edge
/// instead of forwarding it.
#[derive(Debug)]
pub struct CycleDetectionCheckResolver {
    delegate: DelegateSlot,
}

impl CycleDetectionCheckResolver {
    pub fn new(delegate: Arc<dyn CheckResolver>) -> Self {
        Self {
            delegate: DelegateSlot::new(delegate),
        }
    }

    pub fn delegate(&self) -> DomainResult<Arc<dyn CheckResolver>> {
        self.delegate.require()
    }

    pub fn set_delegate(&self, delegate: Arc<dyn CheckResolver>) {
        self.delegate.set(delegate);
    }
}

#[async_trait]
impl CheckResolver for CycleDetectionCheckResolver {
    async fn resolve_check(
        &self,
        ctx: &ResolutionContext,
        mut request: ResolveCheckRequest,
    ) -> DomainResult<ResolveCheckResponse> {
        let key = request.tuple_key.to_string();
        let span = debug_span!("resolve_check", resolver = "cycle_detection", tuple_key = %key);

        if !request.visited_paths.insert(key) {
            debug!(parent: &span, "cycle detected");
            return Ok(ResolveCheckResponse::cycle(
                request.request_metadata.datastore_query_count,
            ));
        }

        let delegate = self.delegate.require()?;
        delegate.resolve_check(ctx, request).instrument(span).await
    }
}
