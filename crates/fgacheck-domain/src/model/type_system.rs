//! Type system for authorization model lookups with caching.
//!
//! The `TypeSystem` answers the questions the check resolver asks of a model:
//! which rewrite a relation has, which user types may be written on it
//! directly, and whether a stored tuple still fits the model.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{DomainError, DomainResult};

use super::tuple;
use super::types::{
    AuthorizationModel, ConditionDefinition, RelationDefinition, RelationReference,
    RelationReferenceKind, TupleKey, TypeDefinition,
};

/// Type system providing cached access to authorization model types and relations.
///
/// # Thread Safety
///
/// Shared across concurrent check branches behind an `Arc`. Relation lookups
/// are memoized in a `DashMap`.
#[derive(Debug)]
pub struct TypeSystem {
    model: Arc<AuthorizationModel>,
    types: HashMap<String, Arc<TypeDefinition>>,
    conditions: HashMap<String, ConditionDefinition>,
    /// Keyed by "type#relation".
    relation_cache: DashMap<String, Arc<RelationDefinition>>,
}

impl TypeSystem {
    /// Creates a new `TypeSystem` from an authorization model.
    pub fn new(model: AuthorizationModel) -> Self {
        let types = model
            .type_definitions
            .iter()
            .map(|td| (td.type_name.clone(), Arc::new(td.clone())))
            .collect();
        let conditions = model
            .conditions
            .iter()
            .map(|c| (c.name.clone(), c.clone()))
            .collect();

        Self {
            model: Arc::new(model),
            types,
            conditions,
            relation_cache: DashMap::new(),
        }
    }

    /// Returns a reference to the underlying authorization model.
    pub fn model(&self) -> &AuthorizationModel {
        &self.model
    }

    pub fn model_id(&self) -> &str {
        &self.model.id
    }

    /// Gets a type definition by name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::TypeUndefined` if the type does not exist in the model.
    pub fn get_type(&self, type_name: &str) -> DomainResult<Arc<TypeDefinition>> {
        self.types
            .get(type_name)
            .cloned()
            .ok_or_else(|| DomainError::TypeUndefined {
                type_name: type_name.to_string(),
            })
    }

    /// Gets a relation definition for a specific type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::TypeUndefined` if the type does not exist.
    /// Returns `DomainError::RelationUndefined` if the relation does not exist on the type.
    pub fn get_relation(
        &self,
        type_name: &str,
        relation: &str,
    ) -> DomainResult<Arc<RelationDefinition>> {
        let cache_key = tuple::to_object_relation(type_name, relation);
        if let Some(cached) = self.relation_cache.get(&cache_key) {
            return Ok(Arc::clone(cached.value()));
        }

        let type_def = self.get_type(type_name)?;
        let relation_def = type_def
            .relations
            .iter()
            .find(|r| r.name == relation)
            .ok_or_else(|| DomainError::RelationUndefined {
                type_name: type_name.to_string(),
                relation: relation.to_string(),
            })?;

        let relation_def = Arc::new(relation_def.clone());
        self.relation_cache
            .insert(cache_key, Arc::clone(&relation_def));
        Ok(relation_def)
    }

    pub fn has_relation(&self, type_name: &str, relation: &str) -> bool {
        self.get_relation(type_name, relation).is_ok()
    }

    pub fn get_condition(&self, name: &str) -> Option<&ConditionDefinition> {
        self.conditions.get(name)
    }

    /// Returns the userset and wildcard references allowed directly on a relation,
    /// e.g. `group#member` and `user:*` for `define viewer: [user, user:*, group#member]`.
    pub fn directly_related_usersets(
        &self,
        type_name: &str,
        relation: &str,
    ) -> DomainResult<Vec<RelationReference>> {
        let relation_def = self.get_relation(type_name, relation)?;
        Ok(relation_def
            .directly_related_types
            .iter()
            .filter(|r| !matches!(r.kind, RelationReferenceKind::Direct))
            .cloned()
            .collect())
    }

    /// Reports whether `source` may be written directly on `type_name#relation`.
    pub fn is_directly_related(
        &self,
        type_name: &str,
        relation: &str,
        source: &RelationReference,
    ) -> DomainResult<bool> {
        let relation_def = self.get_relation(type_name, relation)?;
        Ok(admits(&relation_def, source))
    }

    /// Checks a tuple read from storage or supplied as a contextual tuple
    /// against the model. Invalid tuples are ignored by the resolver.
    pub fn is_tuple_valid(&self, tuple_key: &TupleKey) -> bool {
        if !tuple::is_valid_tuple_key(tuple_key) {
            return false;
        }

        let object_type = tuple::object_type(&tuple_key.object);
        let Ok(relation_def) = self.get_relation(object_type, &tuple_key.relation) else {
            return false;
        };

        let source = reference_for_user(&tuple_key.user);
        if self.get_type(&source.type_name).is_err() {
            return false;
        }
        if let Some(user_relation) = source.relation() {
            if !self.has_relation(&source.type_name, user_relation) {
                return false;
            }
        }
        if let Some(condition) = &tuple_key.condition {
            if self.get_condition(&condition.name).is_none() {
                return false;
            }
        }

        admits(&relation_def, &source)
    }
}

/// Builds the relation reference a user string would be written as.
pub fn reference_for_user(user: &str) -> RelationReference {
    let user_type = tuple::user_type(user);
    if tuple::is_typed_wildcard(user) {
        return RelationReference::wildcard(user_type);
    }
    match tuple::split_object_relation(user) {
        (_, "") => RelationReference::direct(user_type),
        (_, relation) => RelationReference::userset(user_type, relation),
    }
}

fn admits(relation_def: &RelationDefinition, source: &RelationReference) -> bool {
    relation_def
        .directly_related_types
        .iter()
        .any(|r| r.type_name == source.type_name && r.kind == source.kind)
}
