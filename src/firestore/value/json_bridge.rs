use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map as JsonMap, Number, Value as JsonValue};

use crate::firestore::value::{FieldMap, FirestoreValue, MapValue, ValueKind};

/// Plain JSON rendering used by the serde based converters.
///
/// Timestamps become RFC 3339 strings, bytes base64 strings and references their
/// document path. Unresolved server timestamp sentinels render as `null`.
pub fn value_to_json(value: &FirestoreValue) -> JsonValue {
    match value.kind() {
        ValueKind::Null | ValueKind::ServerTimestamp => JsonValue::Null,
        ValueKind::Boolean(value) => JsonValue::Bool(*value),
        ValueKind::Integer(value) => JsonValue::Number((*value).into()),
        ValueKind::Double(value) => Number::from_f64(*value)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueKind::Timestamp(value) => JsonValue::String(value.to_rfc3339()),
        ValueKind::String(value) => JsonValue::String(value.clone()),
        ValueKind::Bytes(value) => JsonValue::String(STANDARD.encode(value)),
        ValueKind::Reference(path) => JsonValue::String(path.clone()),
        ValueKind::Array(values) => JsonValue::Array(values.iter().map(value_to_json).collect()),
        ValueKind::Map(map) => JsonValue::Object(map_to_json(map)),
    }
}

pub fn map_to_json(map: &MapValue) -> JsonMap<String, JsonValue> {
    map.fields()
        .iter()
        .map(|(key, value)| (key.clone(), value_to_json(value)))
        .collect()
}

/// Inverse of [`value_to_json`] for the JSON shapes serde produces.
///
/// Integers that fit in `i64` stay integers; every other number becomes a double.
pub fn value_from_json(value: &JsonValue) -> FirestoreValue {
    match value {
        JsonValue::Null => FirestoreValue::null(),
        JsonValue::Bool(value) => FirestoreValue::from_bool(*value),
        JsonValue::Number(number) => match number.as_i64() {
            Some(integer) => FirestoreValue::from_integer(integer),
            None => FirestoreValue::from_double(number.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(value) => FirestoreValue::from_string(value.clone()),
        JsonValue::Array(values) => {
            FirestoreValue::from_array(values.iter().map(value_from_json).collect())
        }
        JsonValue::Object(object) => FirestoreValue::from(map_from_json(object)),
    }
}

pub fn map_from_json(object: &JsonMap<String, JsonValue>) -> MapValue {
    let fields: FieldMap = object
        .iter()
        .map(|(key, value)| (key.clone(), value_from_json(value)))
        .collect();
    MapValue::new(fields)
}
