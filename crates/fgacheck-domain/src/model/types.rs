//! Core type definitions for the authorization model.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A condition attached to a relationship tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipCondition {
    /// Name of a condition declared in the model.
    pub name: String,
    /// Parameter values stored alongside the tuple.
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl RelationshipCondition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: serde_json::Map::new(),
        }
    }

    pub fn with_context(mut self, context: serde_json::Map<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }
}

/// One relationship edge: `object#relation@user`.
///
/// `user` is either a concrete subject (`user:alice`), a userset
/// (`group:eng#member`) or a typed wildcard (`user:*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleKey {
    pub object: String,
    pub relation: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<RelationshipCondition>,
}

impl TupleKey {
    /// Creates a tuple key without a condition.
    pub fn new(
        object: impl Into<String>,
        relation: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            relation: relation.into(),
            user: user.into(),
            condition: None,
        }
    }

    /// Attaches a condition to the tuple key.
    pub fn with_condition(mut self, condition: RelationshipCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.user)
    }
}

/// An authorization model defining types, their relations and conditions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationModel {
    /// Model identifier. Empty until the model is registered.
    #[serde(default)]
    pub id: String,
    /// Schema version (e.g., "1.1").
    pub schema_version: String,
    /// Type definitions in the model.
    pub type_definitions: Vec<TypeDefinition>,
    /// Conditions usable on relationship tuples.
    #[serde(default)]
    pub conditions: Vec<ConditionDefinition>,
}

impl AuthorizationModel {
    pub fn new(type_definitions: Vec<TypeDefinition>) -> Self {
        Self {
            id: String::new(),
            schema_version: "1.1".to_string(),
            type_definitions,
            conditions: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_condition(mut self, condition: ConditionDefinition) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// A type definition within the authorization model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// The type name (e.g., "document", "folder").
    pub type_name: String,
    /// Relations defined on this type.
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
}

impl TypeDefinition {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relations: Vec::new(),
        }
    }

    pub fn with_relation(mut self, relation: RelationDefinition) -> Self {
        self.relations.push(relation);
        self
    }
}

/// A relation definition on a type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDefinition {
    /// The relation name.
    pub name: String,
    /// The userset rewrite for this relation.
    pub rewrite: Userset,
    /// User types that may be written directly on this relation.
    #[serde(default)]
    pub directly_related_types: Vec<RelationReference>,
}

impl RelationDefinition {
    pub fn new(name: impl Into<String>, rewrite: Userset) -> Self {
        Self {
            name: name.into(),
            rewrite,
            directly_related_types: Vec::new(),
        }
    }

    pub fn with_directly_related(mut self, types: Vec<RelationReference>) -> Self {
        self.directly_related_types = types;
        self
    }
}

/// A user type allowed on a relation, e.g. `[user, user:*, group#member]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationReference {
    pub type_name: String,
    pub kind: RelationReferenceKind,
    /// Condition that tuples of this type must carry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationReferenceKind {
    /// `user`
    Direct,
    /// `user:*`
    Wildcard,
    /// `group#member`
    Userset { relation: String },
}

impl RelationReference {
    pub fn direct(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            kind: RelationReferenceKind::Direct,
            condition: None,
        }
    }

    pub fn wildcard(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            kind: RelationReferenceKind::Wildcard,
            condition: None,
        }
    }

    pub fn userset(type_name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            kind: RelationReferenceKind::Userset {
                relation: relation.into(),
            },
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// The relation part of a userset reference, if any.
    pub fn relation(&self) -> Option<&str> {
        match &self.kind {
            RelationReferenceKind::Userset { relation } => Some(relation),
            _ => None,
        }
    }
}

impl fmt::Display for RelationReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RelationReferenceKind::Direct => write!(f, "{}", self.type_name)?,
            RelationReferenceKind::Wildcard => write!(f, "{}:*", self.type_name)?,
            RelationReferenceKind::Userset { relation } => {
                write!(f, "{}#{}", self.type_name, relation)?
            }
        }
        if let Some(condition) = &self.condition {
            write!(f, " with {condition}")?;
        }
        Ok(())
    }
}

/// A userset rewrite defines how a relation is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Userset {
    /// Direct assignment (this).
    This,
    /// Computed userset from another relation on the same object.
    ComputedUserset { relation: String },
    /// Tuple to userset: `computed_userset from tupleset`.
    TupleToUserset {
        tupleset: String,
        computed_userset: String,
    },
    /// Union of multiple usersets.
    Union { children: Vec<Userset> },
    /// Intersection of multiple usersets.
    Intersection { children: Vec<Userset> },
    /// Exclusion (base but not subtract).
    Exclusion {
        base: Box<Userset>,
        subtract: Box<Userset>,
    },
}

impl Userset {
    pub fn computed(relation: impl Into<String>) -> Self {
        Userset::ComputedUserset {
            relation: relation.into(),
        }
    }

    pub fn tuple_to_userset(
        tupleset: impl Into<String>,
        computed_userset: impl Into<String>,
    ) -> Self {
        Userset::TupleToUserset {
            tupleset: tupleset.into(),
            computed_userset: computed_userset.into(),
        }
    }

    pub fn union(children: Vec<Userset>) -> Self {
        Userset::Union { children }
    }

    pub fn intersection(children: Vec<Userset>) -> Self {
        Userset::Intersection { children }
    }

    pub fn exclusion(base: Userset, subtract: Userset) -> Self {
        Userset::Exclusion {
            base: Box::new(base),
            subtract: Box::new(subtract),
        }
    }

    /// Returns true if `This` appears anywhere in the rewrite tree.
    pub fn allows_direct(&self) -> bool {
        match self {
            Userset::This => true,
            Userset::ComputedUserset { .. } | Userset::TupleToUserset { .. } => false,
            Userset::Union { children } | Userset::Intersection { children } => {
                children.iter().any(Userset::allows_direct)
            }
            Userset::Exclusion { base, subtract } => {
                base.allows_direct() || subtract.allows_direct()
            }
        }
    }
}

/// Parameter types a condition may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionParamType {
    Bool,
    String,
    Int,
    Uint,
    Double,
    Timestamp,
    Duration,
    List,
    Map,
    Any,
}

/// A named boolean expression usable on relationship tuples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDefinition {
    pub name: String,
    pub expression: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ConditionParamType>,
}

impl ConditionDefinition {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, kind: ConditionParamType) -> Self {
        self.parameters.insert(name.into(), kind);
        self
    }
}
