//! Trait definitions for the resolver's collaborators and layers.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::DomainResult;
use crate::model::{reference_for_user, RelationReference, RelationReferenceKind, TupleKey};

use super::context::ResolutionContext;
use super::types::{ResolveCheckRequest, ResolveCheckResponse};

/// One layer of the check resolver chain.
#[async_trait]
pub trait CheckResolver: Send + Sync {
    /// Resolves `request.tuple_key`.
    async fn resolve_check(
        &self,
        ctx: &ResolutionContext,
        request: ResolveCheckRequest,
    ) -> DomainResult<ResolveCheckResponse>;

    /// Releases resources owned by this layer.
    fn close(&self) {}
}

/// Filter for userset and wildcard tuples on `object#relation`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadUsersetTuplesFilter {
    pub object: String,
    pub relation: String,
    /// Only users shaped like one of these references are returned.
    /// Empty means any userset or wildcard.
    pub allowed_user_type_restrictions: Vec<RelationReference>,
}

impl ReadUsersetTuplesFilter {
    /// Returns true if `tuple_key` is a userset or wildcard tuple selected by this filter.
    pub fn matches(&self, tuple_key: &TupleKey) -> bool {
        if tuple_key.object != self.object || tuple_key.relation != self.relation {
            return false;
        }

        let source = reference_for_user(&tuple_key.user);
        if matches!(source.kind, RelationReferenceKind::Direct) {
            return false;
        }

        self.allowed_user_type_restrictions.is_empty()
            || self
                .allowed_user_type_restrictions
                .iter()
                .any(|r| r.type_name == source.type_name && r.kind == source.kind)
    }
}

/// Returns true if `tuple_key` matches a read pattern. Empty relation or
/// user in the pattern match anything.
pub fn matches_read_pattern(pattern: &TupleKey, tuple_key: &TupleKey) -> bool {
    tuple_key.object == pattern.object
        && (pattern.relation.is_empty() || tuple_key.relation == pattern.relation)
        && (pattern.user.is_empty() || tuple_key.user == pattern.user)
}

/// Streaming access to tuples.
///
/// `Ok(None)` is the done sentinel; `Err` is a read failure. Callers stop
/// the iterator on every exit path.
#[async_trait]
pub trait TupleKeyIterator: Send {
    async fn next(&mut self) -> DomainResult<Option<TupleKey>>;

    fn stop(&mut self) {}
}

pub type TupleIterator = Box<dyn TupleKeyIterator>;

/// Iterator over an already materialized list of tuples.
#[derive(Debug, Default)]
pub struct StaticTupleIterator {
    tuples: VecDeque<TupleKey>,
}

impl StaticTupleIterator {
    pub fn new(tuples: Vec<TupleKey>) -> Self {
        Self {
            tuples: tuples.into(),
        }
    }

    pub fn boxed(tuples: Vec<TupleKey>) -> TupleIterator {
        Box::new(Self::new(tuples))
    }
}

#[async_trait]
impl TupleKeyIterator for StaticTupleIterator {
    async fn next(&mut self) -> DomainResult<Option<TupleKey>> {
        Ok(self.tuples.pop_front())
    }

    fn stop(&mut self) {
        self.tuples.clear();
    }
}

/// Stops the wrapped iterator when dropped.
pub struct TupleIteratorGuard {
    inner: TupleIterator,
}

impl TupleIteratorGuard {
    pub fn new(inner: TupleIterator) -> Self {
        Self { inner }
    }

    pub async fn next(&mut self) -> DomainResult<Option<TupleKey>> {
        self.inner.next().await
    }
}

impl Drop for TupleIteratorGuard {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

/// Read access to relationship tuples.
///
/// Implemented by storage adapters; the resolver never writes.
#[async_trait]
pub trait TupleReader: Send + Sync {
    /// Reads the exact tuple `object#relation@user`, if present.
    async fn read_user_tuple(
        &self,
        store_id: &str,
        tuple_key: &TupleKey,
    ) -> DomainResult<Option<TupleKey>>;

    /// Reads the userset and wildcard tuples of `object#relation`.
    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: &ReadUsersetTuplesFilter,
    ) -> DomainResult<TupleIterator>;

    /// Reads tuples of `object`, optionally narrowed by relation and user.
    async fn read(&self, store_id: &str, tuple_key: &TupleKey) -> DomainResult<TupleIterator>;
}
