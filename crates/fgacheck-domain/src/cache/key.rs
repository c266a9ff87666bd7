//! Cache key derivation for check requests.

use std::fmt::Write;

use xxhash_rust::xxh3::xxh3_128;

use crate::model::TupleKey;
use crate::resolver::ResolveCheckRequest;

/// 128-bit hash of everything that can change a check's answer.
///
/// Contextual tuples are hashed as a sorted set and object keys of the
/// context are sorted recursively, so ordering never changes the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckCacheKey(u128);

impl CheckCacheKey {
    pub fn from_request(request: &ResolveCheckRequest) -> Self {
        let mut buf = String::with_capacity(128);

        write_field(&mut buf, &request.store_id);
        write_field(&mut buf, &request.authorization_model_id);
        write_field(&mut buf, &request.tuple_key.object);
        write_field(&mut buf, &request.tuple_key.relation);
        write_field(&mut buf, &request.tuple_key.user);

        let mut contextual: Vec<String> = request
            .contextual_tuples
            .iter()
            .map(canonical_tuple)
            .collect();
        contextual.sort_unstable();
        let _ = write!(buf, "{}|", contextual.len());
        for tuple in &contextual {
            write_field(&mut buf, tuple);
        }

        let mut context = String::new();
        write_canonical_object(&mut context, &request.context);
        write_field(&mut buf, &context);

        Self(xxh3_128(buf.as_bytes()))
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

/// Length-prefixed so adjacent fields cannot run into each other.
fn write_field(buf: &mut String, value: &str) {
    let _ = write!(buf, "{}:{}|", value.len(), value);
}

fn canonical_tuple(tuple_key: &TupleKey) -> String {
    let mut out = tuple_key.to_string();
    if let Some(condition) = &tuple_key.condition {
        out.push_str(" with ");
        out.push_str(&condition.name);
        write_canonical_object(&mut out, &condition.context);
    }
    out
}

fn write_canonical_object(out: &mut String, map: &serde_json::Map<String, serde_json::Value>) {
    let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_canonical_value(out, &serde_json::Value::String(key.clone()));
        out.push(':');
        write_canonical_value(out, value);
    }
    out.push('}');
}

fn write_canonical_value(out: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => write_canonical_object(out, map),
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_value(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
