//! String helpers for `type:id`, `type:id#relation` and `type:*` references.

use super::types::TupleKey;

/// Splits `type:id` into its parts. Returns `None` when either part is empty.
pub fn split_object(object: &str) -> Option<(&str, &str)> {
    let (object_type, object_id) = object.split_once(':')?;
    if object_type.is_empty() || object_id.is_empty() {
        return None;
    }
    Some((object_type, object_id))
}

/// Returns the type portion of `type:id`, or an empty string.
pub fn object_type(object: &str) -> &str {
    object.split_once(':').map_or("", |(t, _)| t)
}

/// Splits `type:id#relation` into `("type:id", "relation")`.
///
/// A reference without `#` yields an empty relation.
pub fn split_object_relation(reference: &str) -> (&str, &str) {
    reference.rsplit_once('#').unwrap_or((reference, ""))
}

/// Returns the type of a user reference (`user:alice`, `group:1#member`, `user:*`).
pub fn user_type(user: &str) -> &str {
    object_type(split_object_relation(user).0)
}

/// Returns true for `type:*`.
pub fn is_typed_wildcard(user: &str) -> bool {
    matches!(user.split_once(':'), Some((t, "*")) if !t.is_empty())
}

/// Returns true for `type:id#relation`.
pub fn is_object_relation(user: &str) -> bool {
    let (object, relation) = split_object_relation(user);
    !relation.is_empty() && split_object(object).is_some()
}

/// Joins an object and relation into a userset reference.
pub fn to_object_relation(object: &str, relation: &str) -> String {
    format!("{object}#{relation}")
}

pub fn is_valid_object(object: &str) -> bool {
    !object.contains('#') && split_object(object).is_some()
}

pub fn is_valid_relation(relation: &str) -> bool {
    !relation.is_empty() && !relation.contains([':', '#', '@'])
}

pub fn is_valid_user(user: &str) -> bool {
    if is_typed_wildcard(user) {
        return true;
    }
    let (object, relation) = split_object_relation(user);
    if user.contains('#') && !is_valid_relation(relation) {
        return false;
    }
    split_object(object).is_some_and(|(_, id)| id != "*")
}

/// Checks that a tuple key is syntactically well formed.
pub fn is_valid_tuple_key(key: &TupleKey) -> bool {
    is_valid_object(&key.object) && is_valid_relation(&key.relation) && is_valid_user(&key.user)
}
