//! Request and response types for check resolution.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::model::TupleKey;

/// Default recursion budget for a top-level check.
pub const DEFAULT_RESOLVE_NODE_LIMIT: u32 = 25;

/// Per-request bookkeeping carried down the resolution tree.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// Remaining recursion budget. Decremented on every dispatch.
    pub depth: u32,
    /// Dispatches issued by the whole top-level check. Shared by every
    /// request cloned from the same root.
    pub dispatch_counter: Arc<AtomicU32>,
    pub datastore_query_count: u32,
    pub was_throttled: bool,
}

impl RequestMetadata {
    pub fn new(depth: u32) -> Self {
        Self {
            depth,
            dispatch_counter: Arc::new(AtomicU32::new(0)),
            datastore_query_count: 0,
            was_throttled: false,
        }
    }

    pub fn dispatch_count(&self) -> u32 {
        self.dispatch_counter.load(Ordering::Relaxed)
    }
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLVE_NODE_LIMIT)
    }
}

/// A check request as it flows through the resolver chain.
#[derive(Debug, Clone)]
pub struct ResolveCheckRequest {
    pub store_id: String,
    pub authorization_model_id: String,
    pub tuple_key: TupleKey,
    /// Tuples supplied with the request and never persisted.
    pub contextual_tuples: Arc<Vec<TupleKey>>,
    /// Caller context for condition evaluation.
    pub context: Arc<serde_json::Map<String, serde_json::Value>>,
    pub request_metadata: RequestMetadata,
    /// Edges visited on the current path, as `object#relation@user`.
    /// Owned by this request; see [`ResolveCheckRequest::clone_for_dispatch`].
    pub visited_paths: HashSet<String>,
}

impl ResolveCheckRequest {
    pub fn new(
        store_id: impl Into<String>,
        authorization_model_id: impl Into<String>,
        tuple_key: TupleKey,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            authorization_model_id: authorization_model_id.into(),
            tuple_key,
            contextual_tuples: Arc::new(Vec::new()),
            context: Arc::new(serde_json::Map::new()),
            request_metadata: RequestMetadata::default(),
            visited_paths: HashSet::new(),
        }
    }

    pub fn with_contextual_tuples(mut self, tuples: Vec<TupleKey>) -> Self {
        self.contextual_tuples = Arc::new(tuples);
        self
    }

    pub fn with_context(mut self, context: serde_json::Map<String, serde_json::Value>) -> Self {
        self.context = Arc::new(context);
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.request_metadata.depth = depth;
        self
    }

    /// Builds the request for a recursive sub-check.
    ///
    /// This is the only place a child request is derived from its parent: the
    /// dispatch counter is bumped, the visited set is copied so siblings never
    /// share it, the tuple key is replaced and the depth budget shrinks by one.
    pub fn clone_for_dispatch(&self, tuple_key: TupleKey) -> Self {
        self.request_metadata
            .dispatch_counter
            .fetch_add(1, Ordering::Relaxed);

        let mut child = self.clone();
        child.tuple_key = tuple_key;
        child.request_metadata.depth = child.request_metadata.depth.saturating_sub(1);
        child
    }
}

/// Cost and cycle information attached to a decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionMetadata {
    pub datastore_query_count: u32,
    pub cycle_detected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveCheckResponse {
    pub allowed: bool,
    pub resolution_metadata: ResolutionMetadata,
}

impl ResolveCheckResponse {
    pub fn new(allowed: bool, datastore_query_count: u32) -> Self {
        Self {
            allowed,
            resolution_metadata: ResolutionMetadata {
                datastore_query_count,
                cycle_detected: false,
            },
        }
    }

    /// Terminal response for an edge already on the current path.
    pub fn cycle(datastore_query_count: u32) -> Self {
        Self {
            allowed: false,
            resolution_metadata: ResolutionMetadata {
                datastore_query_count,
                cycle_detected: true,
            },
        }
    }

    pub fn datastore_query_count(&self) -> u32 {
        self.resolution_metadata.datastore_query_count
    }

    pub fn cycle_detected(&self) -> bool {
        self.resolution_metadata.cycle_detected
    }
}

/// Result of one branch of the resolution tree.
pub type CheckOutcome = crate::error::DomainResult<ResolveCheckResponse>;
