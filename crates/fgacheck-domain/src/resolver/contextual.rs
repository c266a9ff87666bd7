//! Serves a request's contextual tuples in front of stored tuples.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DomainResult;
use crate::model::TupleKey;

use super::traits::{
    matches_read_pattern, ReadUsersetTuplesFilter, StaticTupleIterator, TupleIterator,
    TupleKeyIterator, TupleReader,
};

/// A `TupleReader` that yields contextual tuples before delegating.
pub struct CombinedTupleReader {
    contextual: Arc<Vec<TupleKey>>,
    inner: Arc<dyn TupleReader>,
}

impl CombinedTupleReader {
    pub fn new(inner: Arc<dyn TupleReader>, contextual: Arc<Vec<TupleKey>>) -> Self {
        Self { contextual, inner }
    }

    fn contextual_matching(&self, predicate: impl Fn(&TupleKey) -> bool) -> Vec<TupleKey> {
        self.contextual
            .iter()
            .filter(|t| predicate(t))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TupleReader for CombinedTupleReader {
    async fn read_user_tuple(
        &self,
        store_id: &str,
        tuple_key: &TupleKey,
    ) -> DomainResult<Option<TupleKey>> {
        let contextual = self.contextual.iter().find(|t| {
            t.object == tuple_key.object
                && t.relation == tuple_key.relation
                && t.user == tuple_key.user
        });
        if let Some(found) = contextual {
            return Ok(Some(found.clone()));
        }

        self.inner.read_user_tuple(store_id, tuple_key).await
    }

    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: &ReadUsersetTuplesFilter,
    ) -> DomainResult<TupleIterator> {
        let head = self.contextual_matching(|t| filter.matches(t));
        let tail = self.inner.read_userset_tuples(store_id, filter).await?;
        Ok(Box::new(ChainedTupleIterator::new(head, tail)))
    }

    async fn read(&self, store_id: &str, tuple_key: &TupleKey) -> DomainResult<TupleIterator> {
        let head = self.contextual_matching(|t| matches_read_pattern(tuple_key, t));
        let tail = self.inner.read(store_id, tuple_key).await?;
        Ok(Box::new(ChainedTupleIterator::new(head, tail)))
    }
}

struct ChainedTupleIterator {
    head: StaticTupleIterator,
    tail: TupleIterator,
}

impl ChainedTupleIterator {
    fn new(head: Vec<TupleKey>, tail: TupleIterator) -> Self {
        Self {
            head: StaticTupleIterator::new(head),
            tail,
        }
    }
}

#[async_trait]
impl TupleKeyIterator for ChainedTupleIterator {
    async fn next(&mut self) -> DomainResult<Option<TupleKey>> {
        if let Some(tuple) = self.head.next().await? {
            return Ok(Some(tuple));
        }
        self.tail.next().await
    }

    fn stop(&mut self) {
        self.head.stop();
        self.tail.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedReader {
        tuples: Vec<TupleKey>,
    }

    #[async_trait]
    impl TupleReader for FixedReader {
        async fn read_user_tuple(
            &self,
            _store_id: &str,
            tuple_key: &TupleKey,
        ) -> DomainResult<Option<TupleKey>> {
            Ok(self.tuples.iter().find(|t| *t == tuple_key).cloned())
        }

        async fn read_userset_tuples(
            &self,
            _store_id: &str,
            filter: &ReadUsersetTuplesFilter,
        ) -> DomainResult<TupleIterator> {
            Ok(StaticTupleIterator::boxed(
                self.tuples.iter().filter(|t| filter.matches(t)).cloned().collect(),
            ))
        }

        async fn read(&self, _store_id: &str, tuple_key: &TupleKey) -> DomainResult<TupleIterator> {
            Ok(StaticTupleIterator::boxed(
                self.tuples
                    .iter()
                    .filter(|t| matches_read_pattern(tuple_key, t))
                    .cloned()
                    .collect(),
            ))
        }
    }

    async fn drain(mut iter: TupleIterator) -> Vec<TupleKey> {
        let mut out = Vec::new();
        while let Some(t) = iter.next().await.unwrap() {
            out.push(t);
        }
        iter.stop();
        out
    }

    fn reader() -> CombinedTupleReader {
        let stored = FixedReader {
            tuples: vec![TupleKey::new("document:1", "parent", "folder:stored")],
        };
        CombinedTupleReader::new(
            Arc::new(stored),
            Arc::new(vec![
                TupleKey::new("document:1", "parent", "folder:ctx"),
                TupleKey::new("document:1", "viewer", "user:alice"),
            ]),
        )
    }

    #[tokio::test]
    async fn test_contextual_user_tuple_is_found() {
        let found = reader()
            .read_user_tuple("store", &TupleKey::new("document:1", "viewer", "user:alice"))
            .await
            .unwrap();
        assert!(found.is_some());

        let missing = reader()
            .read_user_tuple("store", &TupleKey::new("document:1", "viewer", "user:bob"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_read_yields_contextual_then_stored() {
        let iter = reader()
            .read("store", &TupleKey::new("document:1", "parent", ""))
            .await
            .unwrap();

        let users: Vec<String> = drain(iter).await.into_iter().map(|t| t.user).collect();
        assert_eq!(users, vec!["folder:ctx", "folder:stored"]);
    }
}
