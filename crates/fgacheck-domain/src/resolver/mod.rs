//! Check resolution.
//!
//! Resolvers implement [`CheckResolver`] and are composed as a decorator
//! chain by [`CheckResolverBuilder`]:
//!
//! - [`CachedCheckResolver`] serves repeated sub-problems from a
//!   [`CheckQueryCache`](crate::cache::CheckQueryCache).
//! - [`CycleDetectionCheckResolver`] stops on an edge already visited along
//!   the current path and answers `allowed = false, cycle_detected = true`.
//! - [`LocalChecker`] expands the relation's rewrite rule and dispatches
//!   every recursive sub-check back to the top of the chain.
//!
//! Set operations run their children concurrently through [`reducers`],
//! bounded by a per-node concurrency limit, and stop outstanding work as soon
//! as the result is decided or the [`ResolutionContext`] is cancelled.

mod builder;
mod cached;
mod context;
mod contextual;
mod cycle_detection;
mod delegate;
mod local_checker;
pub mod reducers;
mod traits;
mod types;

pub use builder::{CheckResolverBuilder, CheckResolverChain};
pub use cached::CachedCheckResolver;
pub use context::ResolutionContext;
pub use contextual::CombinedTupleReader;
pub use cycle_detection::CycleDetectionCheckResolver;
pub use delegate::DelegateSlot;
pub use local_checker::{LocalChecker, LocalCheckerConfig, DEFAULT_CONCURRENCY_LIMIT};
pub use traits::{
    matches_read_pattern, CheckResolver, ReadUsersetTuplesFilter, StaticTupleIterator,
    TupleIterator, TupleIteratorGuard, TupleKeyIterator, TupleReader,
};
pub use types::{
    CheckOutcome, RequestMetadata, ResolutionMetadata, ResolveCheckRequest, ResolveCheckResponse,
    DEFAULT_RESOLVE_NODE_LIMIT,
};

#[cfg(test)]
mod tests;
