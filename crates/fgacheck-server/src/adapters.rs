//! Bridges the storage layer to the resolver's [`TupleReader`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use fgacheck_domain::model::{tuple, RelationshipCondition, TupleKey};
use fgacheck_domain::resolver::{
    ReadUsersetTuplesFilter, StaticTupleIterator, TupleIterator, TupleReader,
};
use fgacheck_domain::{DomainError, DomainResult};
use fgacheck_storage::{DataStore, StorageError, StoredTuple, TupleFilter};

fn storage_error(err: StorageError) -> DomainError {
    DomainError::Storage {
        message: err.to_string(),
    }
}

fn invalid_key(value: &str) -> DomainError {
    DomainError::InvalidTupleKey {
        value: value.to_string(),
    }
}

/// Converts a stored tuple into the resolver's representation.
pub fn to_tuple_key(stored: &StoredTuple) -> TupleKey {
    let key = TupleKey::new(stored.object(), stored.relation.clone(), stored.user());
    match &stored.condition_name {
        Some(name) => key.with_condition(
            RelationshipCondition::new(name.clone())
                .with_context(stored.condition_context.clone().unwrap_or_default()),
        ),
        None => key,
    }
}

/// Converts a tuple key into its stored form.
///
/// # Errors
///
/// Returns `DomainError::InvalidTupleKey` if the object or user is malformed.
pub fn to_stored_tuple(tuple_key: &TupleKey) -> DomainResult<StoredTuple> {
    if !tuple::is_valid_tuple_key(tuple_key) {
        return Err(invalid_key(&tuple_key.to_string()));
    }

    let (object_type, object_id) =
        tuple::split_object(&tuple_key.object).ok_or_else(|| invalid_key(&tuple_key.object))?;
    let (user_object, user_relation) = tuple::split_object_relation(&tuple_key.user);
    let (user_type, user_id) = user_object
        .split_once(':')
        .ok_or_else(|| invalid_key(&tuple_key.user))?;

    let stored = StoredTuple::new(
        object_type,
        object_id,
        tuple_key.relation.clone(),
        user_type,
        user_id,
        (!user_relation.is_empty()).then(|| user_relation.to_string()),
    );
    Ok(match &tuple_key.condition {
        Some(condition) => stored.with_condition(
            condition.name.clone(),
            (!condition.context.is_empty()).then(|| condition.context.clone()),
        ),
        None => stored,
    })
}

/// Filter selecting the tuples of `object`, optionally narrowed by relation and user.
fn object_filter(object: &str, relation: &str, user: &str) -> DomainResult<TupleFilter> {
    let (object_type, object_id) =
        tuple::split_object(object).ok_or_else(|| invalid_key(object))?;
    Ok(TupleFilter {
        object_type: Some(object_type.to_string()),
        object_id: Some(object_id.to_string()),
        relation: (!relation.is_empty()).then(|| relation.to_string()),
        user: (!user.is_empty()).then(|| user.to_string()),
        condition_name: None,
    })
}

/// [`TupleReader`] over any [`DataStore`].
pub struct DataStoreTupleReader<S: DataStore> {
    datastore: Arc<S>,
}

impl<S: DataStore> DataStoreTupleReader<S> {
    pub fn new(datastore: Arc<S>) -> Self {
        Self { datastore }
    }

    async fn read_matching(&self, store_id: &str, filter: &TupleFilter) -> DomainResult<Vec<TupleKey>> {
        let stored = self
            .datastore
            .read_tuples(store_id, filter)
            .await
            .map_err(storage_error)?;
        Ok(stored.iter().map(to_tuple_key).collect())
    }
}

#[async_trait]
impl<S: DataStore> TupleReader for DataStoreTupleReader<S> {
    #[instrument(skip(self), fields(tuple_key = %tuple_key))]
    async fn read_user_tuple(
        &self,
        store_id: &str,
        tuple_key: &TupleKey,
    ) -> DomainResult<Option<TupleKey>> {
        let filter = object_filter(&tuple_key.object, &tuple_key.relation, &tuple_key.user)?;
        Ok(self.read_matching(store_id, &filter).await?.into_iter().next())
    }

    #[instrument(skip(self, filter), fields(object = %filter.object, relation = %filter.relation))]
    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: &ReadUsersetTuplesFilter,
    ) -> DomainResult<TupleIterator> {
        let storage_filter = object_filter(&filter.object, &filter.relation, "")?;
        let tuples = self
            .read_matching(store_id, &storage_filter)
            .await?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        Ok(StaticTupleIterator::boxed(tuples))
    }

    #[instrument(skip(self), fields(tuple_key = %tuple_key))]
    async fn read(&self, store_id: &str, tuple_key: &TupleKey) -> DomainResult<TupleIterator> {
        let filter = object_filter(&tuple_key.object, &tuple_key.relation, &tuple_key.user)?;
        let tuples = self.read_matching(store_id, &filter).await?;
        Ok(StaticTupleIterator::boxed(tuples))
    }
}
