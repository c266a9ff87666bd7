//! DataStore trait definition and input validation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Maximum length of a store id.
pub const MAX_STORE_ID_LENGTH: usize = 64;
/// Maximum length of a store name.
pub const MAX_STORE_NAME_LENGTH: usize = 256;
/// Maximum length of a condition name.
pub const MAX_CONDITION_NAME_LENGTH: usize = 256;

/// Filter for reading tuples. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TupleFilter {
    /// Filter by object type.
    pub object_type: Option<String>,
    /// Filter by object ID.
    pub object_id: Option<String>,
    /// Filter by relation.
    pub relation: Option<String>,
    /// Filter by user: `type:id` or `type:id#relation`.
    pub user: Option<String>,
    /// Filter by condition name.
    pub condition_name: Option<String>,
}

/// A stored relationship tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTuple {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub user_type: String,
    /// `*` for a typed wildcard.
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_context: Option<serde_json::Map<String, serde_json::Value>>,
}

impl StoredTuple {
    pub fn new(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
        user_type: impl Into<String>,
        user_id: impl Into<String>,
        user_relation: Option<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            relation: relation.into(),
            user_type: user_type.into(),
            user_id: user_id.into(),
            user_relation,
            condition_name: None,
            condition_context: None,
        }
    }

    /// Attaches a condition and its stored context.
    pub fn with_condition(
        mut self,
        name: impl Into<String>,
        context: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        self.condition_name = Some(name.into());
        self.condition_context = context;
        self
    }

    /// `type:id`
    pub fn object(&self) -> String {
        format!("{}:{}", self.object_type, self.object_id)
    }

    /// `type:id`, `type:id#relation` or `type:*`
    pub fn user(&self) -> String {
        match &self.user_relation {
            Some(relation) => format!("{}:{}#{}", self.user_type, self.user_id, relation),
            None => format!("{}:{}", self.user_type, self.user_id),
        }
    }

    /// Identity of the tuple, independent of its condition.
    pub fn key(&self) -> String {
        format!("{}#{}@{}", self.object(), self.relation, self.user())
    }
}

/// Store metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub id: String,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Abstract storage interface for relationship data.
///
/// Implementations must be thread-safe (Send + Sync) and support
/// async operations.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    // Store operations

    /// Creates a new store.
    async fn create_store(&self, id: &str, name: &str) -> StorageResult<Store>;

    /// Gets a store by ID.
    async fn get_store(&self, id: &str) -> StorageResult<Store>;

    /// Deletes a store and its tuples.
    async fn delete_store(&self, id: &str) -> StorageResult<()>;

    /// Lists all stores.
    async fn list_stores(&self) -> StorageResult<Vec<Store>>;

    // Tuple operations

    /// Applies deletes, then writes, to a store.
    ///
    /// Writing an existing tuple again is a no-op; writing it with a
    /// different condition fails with `StorageError::ConditionConflict`.
    async fn write_tuples(
        &self,
        store_id: &str,
        writes: Vec<StoredTuple>,
        deletes: Vec<StoredTuple>,
    ) -> StorageResult<()>;

    /// Writes a single tuple.
    async fn write_tuple(&self, store_id: &str, tuple: StoredTuple) -> StorageResult<()> {
        self.write_tuples(store_id, vec![tuple], Vec::new()).await
    }

    /// Reads tuples matching the filter.
    async fn read_tuples(
        &self,
        store_id: &str,
        filter: &TupleFilter,
    ) -> StorageResult<Vec<StoredTuple>>;
}

fn invalid(message: impl Into<String>) -> StorageError {
    StorageError::InvalidInput {
        message: message.into(),
    }
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Object ids may contain anything except the reference separators.
fn is_object_id(value: &str) -> bool {
    !value.is_empty() && !value.contains([':', '#', '@', ' '])
}

pub fn validate_store_id(id: &str) -> StorageResult<()> {
    if id.len() > MAX_STORE_ID_LENGTH || !is_identifier(id) {
        return Err(invalid(format!("invalid store id: '{id}'")));
    }
    Ok(())
}

pub fn validate_store_name(name: &str) -> StorageResult<()> {
    if name.trim().is_empty() || name.len() > MAX_STORE_NAME_LENGTH {
        return Err(invalid(format!(
            "store name must be 1..={MAX_STORE_NAME_LENGTH} characters"
        )));
    }
    Ok(())
}

pub fn is_valid_condition_name(name: &str) -> bool {
    name.len() <= MAX_CONDITION_NAME_LENGTH && is_identifier(name)
}

/// Validates the fields of a tuple before it is written.
pub fn validate_tuple(tuple: &StoredTuple) -> StorageResult<()> {
    if !is_identifier(&tuple.object_type) {
        return Err(invalid(format!("invalid object type: '{}'", tuple.object_type)));
    }
    if !is_object_id(&tuple.object_id) || tuple.object_id == "*" {
        return Err(invalid(format!("invalid object id: '{}'", tuple.object_id)));
    }
    if !is_identifier(&tuple.relation) {
        return Err(invalid(format!("invalid relation: '{}'", tuple.relation)));
    }
    if !is_identifier(&tuple.user_type) {
        return Err(invalid(format!("invalid user type: '{}'", tuple.user_type)));
    }
    if !is_object_id(&tuple.user_id) {
        return Err(invalid(format!("invalid user id: '{}'", tuple.user_id)));
    }
    if let Some(relation) = &tuple.user_relation {
        if !is_identifier(relation) || tuple.user_id == "*" {
            return Err(invalid(format!("invalid user relation: '{relation}'")));
        }
    }
    if let Some(name) = &tuple.condition_name {
        if !is_valid_condition_name(name) {
            return Err(invalid(format!("invalid condition name: '{name}'")));
        }
    } else if tuple.condition_context.is_some() {
        return Err(invalid("condition context without a condition name"));
    }
    Ok(())
}

/// Splits a user filter into `(type, id, relation)`.
pub fn parse_user_filter(user: &str) -> StorageResult<(String, String, Option<String>)> {
    let bad = || StorageError::InvalidFilter {
        message: format!("user filter must be 'type:id' or 'type:id#relation', got '{user}'"),
    };

    let (object, relation) = match user.split_once('#') {
        Some((object, relation)) if is_identifier(relation) => (object, Some(relation.to_string())),
        Some(_) => return Err(bad()),
        None => (user, None),
    };
    let (user_type, user_id) = object.split_once(':').ok_or_else(bad)?;
    if !is_identifier(user_type) || !is_object_id(user_id) {
        return Err(bad());
    }
    Ok((user_type.to_string(), user_id.to_string(), relation))
}
