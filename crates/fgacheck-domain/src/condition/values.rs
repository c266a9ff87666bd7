//! Conversion of JSON context values into typed CEL values.

use std::collections::HashMap;

use cel_interpreter::objects::Key;
use cel_interpreter::Value;

use crate::model::ConditionParamType;

/// Converts a parameter value to the CEL type the condition declares.
pub(crate) fn to_typed_value(
    kind: ConditionParamType,
    value: &serde_json::Value,
) -> Result<Value, String> {
    use serde_json::Value as Json;

    let mismatch = || format!("expected {kind:?} value, got {value}");

    match kind {
        ConditionParamType::Bool => value.as_bool().map(Value::Bool).ok_or_else(mismatch),
        ConditionParamType::String => value
            .as_str()
            .map(|s| Value::String(s.to_string().into()))
            .ok_or_else(mismatch),
        ConditionParamType::Int => value.as_i64().map(Value::Int).ok_or_else(mismatch),
        ConditionParamType::Uint => value.as_u64().map(Value::UInt).ok_or_else(mismatch),
        ConditionParamType::Double => value.as_f64().map(Value::Float).ok_or_else(mismatch),
        ConditionParamType::Timestamp => {
            let raw = value.as_str().ok_or_else(mismatch)?;
            chrono::DateTime::parse_from_rfc3339(raw)
                .map(Value::Timestamp)
                .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
        }
        ConditionParamType::Duration => {
            let raw = value.as_str().ok_or_else(mismatch)?;
            parse_duration(raw).map(Value::Duration)
        }
        ConditionParamType::List => match value {
            Json::Array(_) => Ok(to_value(value)),
            _ => Err(mismatch()),
        },
        ConditionParamType::Map => match value {
            Json::Object(_) => Ok(to_value(value)),
            _ => Err(mismatch()),
        },
        ConditionParamType::Any => Ok(to_value(value)),
    }
}

/// Untyped conversion used for `any`, list elements and map values.
fn to_value(value: &serde_json::Value) -> Value {
    use serde_json::Value as Json;

    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        Json::String(s) => Value::String(s.clone().into()),
        Json::Array(items) => Value::List(items.iter().map(to_value).collect::<Vec<_>>().into()),
        Json::Object(map) => {
            let converted: HashMap<Key, Value> = map
                .iter()
                .map(|(k, v)| (Key::String(k.clone().into()), to_value(v)))
                .collect();
            Value::Map(converted.into())
        }
    }
}

/// Parses durations such as `90s`, `1h30m` or `250ms`.
pub(crate) fn parse_duration(raw: &str) -> Result<chrono::Duration, String> {
    let invalid = || format!("invalid duration '{raw}'");
    if raw.is_empty() {
        return Err(invalid());
    }

    let mut total = chrono::Duration::zero();
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: i64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "h" => chrono::Duration::hours(amount),
            "m" => chrono::Duration::minutes(amount),
            "s" => chrono::Duration::seconds(amount),
            "ms" => chrono::Duration::milliseconds(amount),
            "us" => chrono::Duration::microseconds(amount),
            "ns" => chrono::Duration::nanoseconds(amount),
            _ => return Err(invalid()),
        };
        total = total + part;
        rest = &rest[unit_len..];
    }

    Ok(total)
}
