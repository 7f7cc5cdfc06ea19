use serde_json::{json, Value as JsonValue};

use crate::firestore::api::query::{Bound, FieldFilter, FilterOperator, QueryDefinition};
use crate::firestore::remote::serializer::JsonProtoSerializer;
use crate::firestore::value::ValueKind;

/// Builds the `structuredQuery` body for `definition`.
///
/// Limit-to-last queries must be flipped with [`QueryDefinition::as_limit_first`]
/// beforehand; the REST API only knows leading limits.
pub(crate) fn encode_structured_query(
    serializer: &JsonProtoSerializer,
    definition: &QueryDefinition,
) -> JsonValue {
    let mut structured = serde_json::Map::new();
    structured.insert(
        "from".to_string(),
        json!([{
            "collectionId": definition.collection_id(),
            "allDescendants": definition.is_collection_group(),
        }]),
    );

    if !definition.filters().is_empty() {
        structured.insert(
            "where".to_string(),
            encode_filters(serializer, definition.filters()),
        );
    }

    if !definition.explicit_order_by().is_empty() {
        let orders: Vec<JsonValue> = definition
            .explicit_order_by()
            .iter()
            .map(|order| {
                json!({
                    "field": { "fieldPath": order.field().server_format() },
                    "direction": order.direction().as_str(),
                })
            })
            .collect();
        structured.insert("orderBy".to_string(), JsonValue::Array(orders));
    }

    if let Some(start) = definition.start_at() {
        structured.insert("startAt".to_string(), encode_cursor(serializer, start, true));
    }
    if let Some(end) = definition.end_at() {
        structured.insert("endAt".to_string(), encode_cursor(serializer, end, false));
    }
    if let Some(limit) = definition.limit() {
        structured.insert("limit".to_string(), json!(limit));
    }

    JsonValue::Object(structured)
}

fn encode_filters(serializer: &JsonProtoSerializer, filters: &[FieldFilter]) -> JsonValue {
    if let [filter] = filters {
        return encode_field_filter(serializer, filter);
    }
    let nested: Vec<JsonValue> = filters
        .iter()
        .map(|filter| encode_field_filter(serializer, filter))
        .collect();
    json!({ "compositeFilter": { "op": "AND", "filters": nested } })
}

fn encode_field_filter(serializer: &JsonProtoSerializer, filter: &FieldFilter) -> JsonValue {
    let field = json!({ "fieldPath": filter.field().server_format() });
    let unary = match (filter.operator(), filter.value().kind()) {
        (FilterOperator::Equal, ValueKind::Null) => Some("IS_NULL"),
        (FilterOperator::NotEqual, ValueKind::Null) => Some("IS_NOT_NULL"),
        (FilterOperator::Equal, ValueKind::Double(value)) if value.is_nan() => Some("IS_NAN"),
        (FilterOperator::NotEqual, ValueKind::Double(value)) if value.is_nan() => {
            Some("IS_NOT_NAN")
        }
        _ => None,
    };
    match unary {
        Some(op) => json!({ "unaryFilter": { "field": field, "op": op } }),
        None => json!({
            "fieldFilter": {
                "field": field,
                "op": filter.operator().as_str(),
                "value": serializer.encode_value(filter.value()),
            }
        }),
    }
}

// `before` is true when the cursor position itself sorts before the first included
// (start) or first excluded (end) document.
fn encode_cursor(serializer: &JsonProtoSerializer, bound: &Bound, start: bool) -> JsonValue {
    let values: Vec<JsonValue> = bound
        .values()
        .iter()
        .map(|value| serializer.encode_value(value))
        .collect();
    let before = if start {
        bound.inclusive()
    } else {
        !bound.inclusive()
    };
    json!({ "values": values, "before": before })
}
