//! Relationship condition evaluation.
//!
//! A tuple may carry a condition (`document:1#viewer@user:alice with in_office`).
//! The condition's declared parameters are bound from the tuple's stored
//! context, falling back to the context supplied with the check request, and
//! the CEL expression is then evaluated to a boolean.
//!
//! ```text
//! condition in_office(ip: string, office_ip: string) {
//!     ip == office_ip
//! }
//! ```
//!
//! Missing parameters are reported separately from "not met" so the resolver
//! can treat them as a hard error.

mod program;
mod values;

use std::sync::Arc;

use cel_interpreter::Context;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{DomainError, DomainResult};
use crate::model::{ConditionDefinition, TupleKey, TypeSystem};

pub use program::CompiledCondition;

/// Outcome of evaluating one tuple's condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionResult {
    pub met: bool,
    pub missing_parameters: Vec<String>,
}

impl ConditionResult {
    pub fn met() -> Self {
        Self {
            met: true,
            missing_parameters: Vec::new(),
        }
    }
}

/// Evaluates the condition attached to a tuple.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        typesystem: &TypeSystem,
        tuple_key: &TupleKey,
        request_context: &serde_json::Map<String, serde_json::Value>,
    ) -> DomainResult<ConditionResult>;
}

/// Evaluates a tuple's condition and folds "missing parameters" into an error.
///
/// Returns `Ok(true)` when the tuple has no condition or it is met.
pub fn evaluate_tuple_condition(
    evaluator: &dyn ConditionEvaluator,
    typesystem: &TypeSystem,
    tuple_key: &TupleKey,
    request_context: &serde_json::Map<String, serde_json::Value>,
) -> DomainResult<bool> {
    let result = evaluator.evaluate(typesystem, tuple_key, request_context)?;
    if !result.missing_parameters.is_empty() {
        let condition = tuple_key
            .condition
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_default();
        return Err(DomainError::ConditionEvaluation {
            condition,
            message: format!(
                "tuple '{}' is missing context parameters [{}]",
                tuple_key,
                result.missing_parameters.join(", ")
            ),
        });
    }
    Ok(result.met)
}

/// CEL backed evaluator with a cache of compiled expressions.
#[derive(Debug, Default)]
pub struct CelConditionEvaluator {
    /// Keyed by "name\0expression" so a redefined condition recompiles.
    programs: DashMap<String, Arc<CompiledCondition>>,
}

impl CelConditionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of compiled expressions currently cached.
    pub fn compiled_count(&self) -> usize {
        self.programs.len()
    }

    fn compiled(&self, definition: &ConditionDefinition) -> DomainResult<Arc<CompiledCondition>> {
        let key = format!("{}\0{}", definition.name, definition.expression);
        if let Some(cached) = self.programs.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        match self.programs.entry(key) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let compiled = CompiledCondition::compile(&definition.expression).map_err(
                    |message| DomainError::ConditionEvaluation {
                        condition: definition.name.clone(),
                        message,
                    },
                )?;
                let compiled = Arc::new(compiled);
                entry.insert(Arc::clone(&compiled));
                Ok(compiled)
            }
        }
    }
}

impl ConditionEvaluator for CelConditionEvaluator {
    fn evaluate(
        &self,
        typesystem: &TypeSystem,
        tuple_key: &TupleKey,
        request_context: &serde_json::Map<String, serde_json::Value>,
    ) -> DomainResult<ConditionResult> {
        let Some(condition) = &tuple_key.condition else {
            return Ok(ConditionResult::met());
        };

        let eval_error = |message: String| DomainError::ConditionEvaluation {
            condition: condition.name.clone(),
            message,
        };

        let definition = typesystem
            .get_condition(&condition.name)
            .ok_or_else(|| eval_error("condition was not found in the model".to_string()))?;
        let compiled = self.compiled(definition)?;

        let mut ctx = Context::default();
        let mut missing_parameters = Vec::new();
        for (name, kind) in &definition.parameters {
            // Tuple context wins over request context.
            let Some(raw) = condition
                .context
                .get(name)
                .or_else(|| request_context.get(name))
            else {
                missing_parameters.push(name.clone());
                continue;
            };

            let value = values::to_typed_value(*kind, raw)
                .map_err(|e| eval_error(format!("parameter '{name}': {e}")))?;
            ctx.add_variable_from_value(name.as_str(), value);
        }

        if !missing_parameters.is_empty() {
            return Ok(ConditionResult {
                met: false,
                missing_parameters,
            });
        }

        let met = compiled.evaluate(&ctx).map_err(eval_error)?;
        Ok(ConditionResult {
            met,
            missing_parameters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AuthorizationModel, ConditionParamType, RelationDefinition, RelationReference,
        RelationshipCondition, TypeDefinition, Userset,
    };
    use serde_json::json;

    fn typesystem() -> TypeSystem {
        let model = AuthorizationModel::new(vec![
            TypeDefinition::new("user"),
            TypeDefinition::new("document").with_relation(
                RelationDefinition::new("viewer", Userset::This).with_directly_related(vec![
                    RelationReference::direct("user").with_condition("in_office"),
                ]),
            ),
        ])
        .with_condition(
            ConditionDefinition::new("in_office", "ip == office_ip")
                .with_parameter("ip", ConditionParamType::String)
                .with_parameter("office_ip", ConditionParamType::String),
        )
        .with_condition(
            ConditionDefinition::new("before", "now < deadline")
                .with_parameter("now", ConditionParamType::Timestamp)
                .with_parameter("deadline", ConditionParamType::Timestamp),
        );
        TypeSystem::new(model)
    }

    fn conditioned_tuple(name: &str, context: serde_json::Value) -> TupleKey {
        let context = context.as_object().cloned().unwrap_or_default();
        TupleKey::new("document:1", "viewer", "user:alice")
            .with_condition(RelationshipCondition::new(name).with_context(context))
    }

    fn request_context(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    // ========== Section 1: Parameter binding ==========

    #[test]
    fn test_tuple_without_condition_is_met() {
        let evaluator = CelConditionEvaluator::new();
        let result = evaluator
            .evaluate(
                &typesystem(),
                &TupleKey::new("document:1", "viewer", "user:alice"),
                &serde_json::Map::new(),
            )
            .unwrap();
        assert_eq!(result, ConditionResult::met());
        assert_eq!(evaluator.compiled_count(), 0);
    }

    #[test]
    fn test_condition_met_with_tuple_and_request_context() {
        let evaluator = CelConditionEvaluator::new();
        let tuple = conditioned_tuple("in_office", json!({"office_ip": "10.0.0.1"}));

        let met = evaluator
            .evaluate(&typesystem(), &tuple, &request_context(json!({"ip": "10.0.0.1"})))
            .unwrap();
        assert!(met.met);

        let not_met = evaluator
            .evaluate(&typesystem(), &tuple, &request_context(json!({"ip": "10.0.0.2"})))
            .unwrap();
        assert!(!not_met.met);
        assert!(not_met.missing_parameters.is_empty());

        // Compiled once, reused for the second evaluation.
        assert_eq!(evaluator.compiled_count(), 1);
    }

    #[test]
    fn test_tuple_context_overrides_request_context() {
        let evaluator = CelConditionEvaluator::new();
        let tuple = conditioned_tuple(
            "in_office",
            json!({"office_ip": "10.0.0.1", "ip": "10.0.0.1"}),
        );

        let result = evaluator
            .evaluate(&typesystem(), &tuple, &request_context(json!({"ip": "192.168.1.1"})))
            .unwrap();
        assert!(result.met);
    }

    #[test]
    fn test_missing_parameters_are_reported() {
        let evaluator = CelConditionEvaluator::new();
        let tuple = conditioned_tuple("in_office", json!({}));

        let result = evaluator
            .evaluate(&typesystem(), &tuple, &serde_json::Map::new())
            .unwrap();
        assert!(!result.met);
        assert_eq!(result.missing_parameters, vec!["ip", "office_ip"]);
    }

    #[test]
    fn test_timestamp_parameters() {
        let evaluator = CelConditionEvaluator::new();
        let tuple = conditioned_tuple("before", json!({"deadline": "2030-01-01T00:00:00Z"}));

        let result = evaluator
            .evaluate(
                &typesystem(),
                &tuple,
                &request_context(json!({"now": "2024-06-01T12:00:00Z"})),
            )
            .unwrap();
        assert!(result.met);
    }

    // ========== Section 2: Errors ==========

    #[test]
    fn test_missing_parameters_become_hard_error() {
        let evaluator = CelConditionEvaluator::new();
        let tuple = conditioned_tuple("in_office", json!({"office_ip": "10.0.0.1"}));

        let err = evaluate_tuple_condition(
            &evaluator,
            &typesystem(),
            &tuple,
            &serde_json::Map::new(),
        )
        .unwrap_err();
        match err {
            DomainError::ConditionEvaluation { condition, message } => {
                assert_eq!(condition, "in_office");
                assert!(message.contains("ip"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_undefined_condition_is_error() {
        let evaluator = CelConditionEvaluator::new();
        let tuple = conditioned_tuple("unknown", json!({}));

        let err = evaluator
            .evaluate(&typesystem(), &tuple, &serde_json::Map::new())
            .unwrap_err();
        assert!(matches!(err, DomainError::ConditionEvaluation { .. }));
    }

    #[test]
    fn test_parameter_type_mismatch_is_error() {
        let evaluator = CelConditionEvaluator::new();
        let tuple = conditioned_tuple("in_office", json!({"office_ip": 10}));

        let err = evaluator
            .evaluate(&typesystem(), &tuple, &request_context(json!({"ip": "10.0.0.1"})))
            .unwrap_err();
        assert!(matches!(err, DomainError::ConditionEvaluation { .. }));
    }
}
