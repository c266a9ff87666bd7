//! Domain error types for check resolution.

use std::fmt;

use thiserror::Error;

/// Domain-specific errors raised while resolving a check.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The recursion budget of a request reached zero.
    #[error("resolution depth exceeded")]
    ResolutionDepthExceeded,

    /// Object type is not part of the authorization model.
    #[error("type '{type_name}' undefined")]
    TypeUndefined { type_name: String },

    /// Relation does not exist on the object type.
    #[error("relation '{relation}' undefined for object type '{type_name}'")]
    RelationUndefined { type_name: String, relation: String },

    /// A tuple condition could not be evaluated, including missing parameters.
    #[error("failed to evaluate relationship condition '{condition}': {message}")]
    ConditionEvaluation { condition: String, message: String },

    /// Malformed object, relation or user string.
    #[error("invalid tuple key: {value}")]
    InvalidTupleKey { value: String },

    /// The cancellation scope of the request was cancelled.
    #[error("check resolution cancelled")]
    Cancelled,

    /// The request did not finish within its deadline.
    #[error("timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Error reported by the tuple reader.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// A resolver's delegate was released before the request reached it.
    #[error("check resolver delegate is no longer available")]
    ResolverUnavailable,

    /// Several branch errors collected by a set operation.
    #[error("{0}")]
    Aggregate(AggregateError),
}

impl DomainError {
    /// Combines an optional accumulated error with a new one.
    ///
    /// Aggregates are flattened so the result never nests.
    pub fn join(acc: Option<DomainError>, next: DomainError) -> DomainError {
        let Some(acc) = acc else {
            return next;
        };

        let mut errors = acc.into_errors();
        errors.extend(next.into_errors());
        DomainError::Aggregate(AggregateError(errors))
    }

    /// Returns true when this error, or any aggregated error, is a cancellation.
    pub fn is_cancellation(&self) -> bool {
        match self {
            DomainError::Cancelled => true,
            DomainError::Aggregate(agg) => agg.0.iter().any(DomainError::is_cancellation),
            _ => false,
        }
    }

    /// Flattens this error into its component errors.
    pub fn into_errors(self) -> Vec<DomainError> {
        match self {
            DomainError::Aggregate(agg) => agg.0,
            other => vec![other],
        }
    }
}

/// A flattened list of branch errors.
#[derive(Debug)]
pub struct AggregateError(pub Vec<DomainError>);

impl AggregateError {
    pub fn errors(&self) -> &[DomainError] {
        &self.0
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_without_accumulator_returns_next() {
        let err = DomainError::join(None, DomainError::ResolutionDepthExceeded);
        assert!(matches!(err, DomainError::ResolutionDepthExceeded));
    }

    #[test]
    fn test_join_flattens_nested_aggregates() {
        let first = DomainError::join(
            Some(DomainError::ResolutionDepthExceeded),
            DomainError::Cancelled,
        );
        let joined = DomainError::join(
            Some(first),
            DomainError::Storage {
                message: "boom".to_string(),
            },
        );

        let errors = joined.into_errors();
        assert_eq!(errors.len(), 3);
        assert!(errors
            .iter()
            .all(|e| !matches!(e, DomainError::Aggregate(_))));
    }

    #[test]
    fn test_cancellation_is_detected_inside_aggregate() {
        let joined = DomainError::join(
            Some(DomainError::ResolutionDepthExceeded),
            DomainError::Cancelled,
        );
        assert!(joined.is_cancellation());
        assert!(!DomainError::ResolutionDepthExceeded.is_cancellation());
    }

    #[test]
    fn test_relation_undefined_message() {
        let err = DomainError::RelationUndefined {
            type_name: "document".to_string(),
            relation: "editor".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "relation 'editor' undefined for object type 'document'"
        );
    }

    #[test]
    fn test_aggregate_display_joins_messages() {
        let joined = DomainError::join(
            Some(DomainError::ResolutionDepthExceeded),
            DomainError::Cancelled,
        );
        assert_eq!(
            joined.to_string(),
            "resolution depth exceeded; check resolution cancelled"
        );
    }
}
