//! Storage error types.

use thiserror::Error;

/// Details for a ConditionConflict error (boxed to reduce StorageError size).
///
/// A tuple's condition cannot be changed in place; delete the tuple and
/// write it again.
#[derive(Debug, Error)]
#[error("tuple exists with different condition in store {store_id}: {tuple} (existing: {existing_condition:?}, new: {new_condition:?})")]
pub struct ConditionConflictError {
    pub store_id: String,
    pub tuple: String,
    pub existing_condition: Option<String>,
    pub new_condition: Option<String>,
}

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store not found.
    #[error("store not found: {store_id}")]
    StoreNotFound { store_id: String },

    /// Store already exists.
    #[error("store already exists: {store_id}")]
    StoreAlreadyExists { store_id: String },

    /// Tuple exists with a different condition.
    #[error("{0}")]
    ConditionConflict(#[source] Box<ConditionConflictError>),

    /// Invalid filter error.
    #[error("invalid filter: {message}")]
    InvalidFilter { message: String },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
