//! In-memory storage implementation.
//!
//! Tuples are kept per store in a `HashMap` keyed by tuple identity
//! (`object#relation@user`), so writes and deletes are O(1) and a second
//! write of the same tuple replaces nothing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::error::{ConditionConflictError, StorageError, StorageResult};
use crate::traits::{
    parse_user_filter, validate_store_id, validate_store_name, validate_tuple, DataStore, Store,
    StoredTuple, TupleFilter,
};

/// In-memory implementation of DataStore.
///
/// - **Write/delete tuple**: O(1) average
/// - **Read tuples**: O(N) in the number of tuples of the store
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    stores: DashMap<String, Store>,
    tuples: DashMap<String, HashMap<String, StoredTuple>>,
}

impl MemoryDataStore {
    /// Creates a new in-memory data store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory data store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn ensure_store(&self, store_id: &str) -> StorageResult<()> {
        if !self.stores.contains_key(store_id) {
            return Err(StorageError::StoreNotFound {
                store_id: store_id.to_string(),
            });
        }
        Ok(())
    }
}

fn matches_filter(
    tuple: &StoredTuple,
    filter: &TupleFilter,
    user: Option<&(String, String, Option<String>)>,
) -> bool {
    filter
        .object_type
        .as_ref()
        .map_or(true, |ot| &tuple.object_type == ot)
        && filter
            .object_id
            .as_ref()
            .map_or(true, |oi| &tuple.object_id == oi)
        && filter.relation.as_ref().map_or(true, |r| &tuple.relation == r)
        && user.map_or(true, |(ut, ui, ur)| {
            &tuple.user_type == ut && &tuple.user_id == ui && &tuple.user_relation == ur
        })
        && filter
            .condition_name
            .as_ref()
            .map_or(true, |cn| tuple.condition_name.as_ref() == Some(cn))
}

#[async_trait]
impl DataStore for MemoryDataStore {
    #[instrument(skip(self), fields(store_id = %id))]
    async fn create_store(&self, id: &str, name: &str) -> StorageResult<Store> {
        validate_store_id(id)?;
        validate_store_name(name)?;

        let now = chrono::Utc::now();
        let store = Store {
            id: id.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };

        match self.stores.entry(id.to_string()) {
            Entry::Occupied(_) => {
                return Err(StorageError::StoreAlreadyExists {
                    store_id: id.to_string(),
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(store.clone());
            }
        }
        self.tuples.entry(id.to_string()).or_default();

        debug!("store created");
        Ok(store)
    }

    async fn get_store(&self, id: &str) -> StorageResult<Store> {
        self.stores
            .get(id)
            .map(|s| s.value().clone())
            .ok_or_else(|| StorageError::StoreNotFound {
                store_id: id.to_string(),
            })
    }

    #[instrument(skip(self), fields(store_id = %id))]
    async fn delete_store(&self, id: &str) -> StorageResult<()> {
        if self.stores.remove(id).is_none() {
            return Err(StorageError::StoreNotFound {
                store_id: id.to_string(),
            });
        }
        self.tuples.remove(id);
        Ok(())
    }

    async fn list_stores(&self) -> StorageResult<Vec<Store>> {
        let mut stores: Vec<Store> = self.stores.iter().map(|s| s.value().clone()).collect();
        stores.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(stores)
    }

    #[instrument(skip(self, writes, deletes), fields(writes = writes.len(), deletes = deletes.len()))]
    async fn write_tuples(
        &self,
        store_id: &str,
        writes: Vec<StoredTuple>,
        deletes: Vec<StoredTuple>,
    ) -> StorageResult<()> {
        validate_store_id(store_id)?;
        for tuple in writes.iter().chain(deletes.iter()) {
            validate_tuple(tuple)?;
        }
        self.ensure_store(store_id)?;

        let mut tuples = self.tuples.entry(store_id.to_string()).or_default();

        // Conflicts are checked against the state after this batch's deletes
        // so a failed batch leaves the store untouched.
        let deleted: HashSet<String> = deletes.iter().map(StoredTuple::key).collect();
        for tuple in &writes {
            let key = tuple.key();
            if deleted.contains(&key) {
                continue;
            }
            if let Some(existing) = tuples.get(&key) {
                if existing.condition_name != tuple.condition_name
                    || existing.condition_context != tuple.condition_context
                {
                    return Err(StorageError::ConditionConflict(Box::new(
                        ConditionConflictError {
                            store_id: store_id.to_string(),
                            tuple: key,
                            existing_condition: existing.condition_name.clone(),
                            new_condition: tuple.condition_name.clone(),
                        },
                    )));
                }
            }
        }

        for key in deleted {
            tuples.remove(&key);
        }
        for tuple in writes {
            tuples.insert(tuple.key(), tuple);
        }

        Ok(())
    }

    #[instrument(skip(self, filter))]
    async fn read_tuples(
        &self,
        store_id: &str,
        filter: &TupleFilter,
    ) -> StorageResult<Vec<StoredTuple>> {
        self.ensure_store(store_id)?;

        let user_filter = filter.user.as_deref().map(parse_user_filter).transpose()?;

        Ok(self
            .tuples
            .get(store_id)
            .map(|tuples| {
                tuples
                    .values()
                    .filter(|t| matches_filter(t, filter, user_filter.as_ref()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
