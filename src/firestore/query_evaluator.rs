use std::cmp::Ordering;

use crate::firestore::api::query::{
    Bound, FieldFilter, FilterOperator, LimitType, OrderBy, OrderDirection, QueryDefinition,
};
use crate::firestore::model::{DocumentKey, FieldPath};
use crate::firestore::remote::datastore::StoredDocument;
use crate::firestore::value::{FirestoreValue, MapValue, ValueKind};

/// Filters, orders, bounds and limits `documents` the way the backend evaluates
/// `definition`. Documents outside the queried collection are dropped.
pub(crate) fn apply_query_to_documents(
    documents: Vec<StoredDocument>,
    definition: &QueryDefinition,
) -> Vec<StoredDocument> {
    let reversed = definition.limit_type() == LimitType::Last;
    let definition = definition.as_limit_first();
    let order_by = definition.normalized_order_by();

    let mut matched: Vec<StoredDocument> = documents
        .into_iter()
        .filter(|doc| definition.targets(&doc.key))
        .filter(|doc| has_order_fields(doc, &order_by))
        .filter(|doc| satisfies_filters(doc, definition.filters()))
        .collect();

    matched.sort_by(|left, right| compare_documents(left, right, &order_by));

    if let Some(bound) = definition.start_at() {
        matched.retain(|doc| after_start(doc, bound, &order_by));
    }
    if let Some(bound) = definition.end_at() {
        matched.retain(|doc| before_end(doc, bound, &order_by));
    }
    if let Some(limit) = definition.limit() {
        matched.truncate(limit as usize);
    }
    if reversed {
        matched.reverse();
    }
    matched
}

fn field_value(doc: &StoredDocument, field: &FieldPath) -> Option<FirestoreValue> {
    if field.is_document_id() {
        return Some(key_value(&doc.key));
    }
    doc.fields.get_path(field).cloned()
}

fn key_value(key: &DocumentKey) -> FirestoreValue {
    FirestoreValue::from_reference(key.path().canonical_string())
}

// Documents lacking an ordered field never appear in ordered results.
fn has_order_fields(doc: &StoredDocument, order_by: &[OrderBy]) -> bool {
    order_by
        .iter()
        .all(|order| order.field().is_document_id() || doc.fields.get_path(order.field()).is_some())
}

fn satisfies_filters(doc: &StoredDocument, filters: &[FieldFilter]) -> bool {
    filters.iter().all(|filter| match field_value(doc, filter.field()) {
        Some(value) => evaluate_filter(filter, &value),
        None => false,
    })
}

fn evaluate_filter(filter: &FieldFilter, value: &FirestoreValue) -> bool {
    let target = filter.value();
    match filter.operator() {
        FilterOperator::Equal => values_equal(value, target),
        FilterOperator::NotEqual => !values_equal(value, target),
        FilterOperator::LessThan => range_matches(value, target, |ord| ord == Ordering::Less),
        FilterOperator::LessThanOrEqual => range_matches(value, target, |ord| ord != Ordering::Greater),
        FilterOperator::GreaterThan => range_matches(value, target, |ord| ord == Ordering::Greater),
        FilterOperator::GreaterThanOrEqual => range_matches(value, target, |ord| ord != Ordering::Less),
        FilterOperator::ArrayContains => value
            .as_array()
            .is_some_and(|items| items.iter().any(|item| values_equal(item, target))),
        FilterOperator::ArrayContainsAny => match (value.as_array(), target.as_array()) {
            (Some(items), Some(needles)) => needles
                .iter()
                .any(|needle| items.iter().any(|item| values_equal(item, needle))),
            _ => false,
        },
        FilterOperator::In => target
            .as_array()
            .is_some_and(|needles| needles.iter().any(|needle| values_equal(value, needle))),
        FilterOperator::NotIn => {
            !value.is_null()
                && target
                    .as_array()
                    .is_some_and(|needles| needles.iter().all(|needle| !values_equal(value, needle)))
        }
    }
}

// Range comparisons only match values of the same type class.
fn range_matches(value: &FirestoreValue, target: &FirestoreValue, accept: impl Fn(Ordering) -> bool) -> bool {
    type_rank(value) == type_rank(target) && accept(compare_values(value, target))
}

fn values_equal(left: &FirestoreValue, right: &FirestoreValue) -> bool {
    compare_values(left, right) == Ordering::Equal
}

fn type_rank(value: &FirestoreValue) -> u8 {
    match value.kind() {
        ValueKind::Null => 0,
        ValueKind::Boolean(_) => 1,
        ValueKind::Integer(_) | ValueKind::Double(_) => 2,
        ValueKind::Timestamp(_) | ValueKind::ServerTimestamp => 3,
        ValueKind::String(_) => 4,
        ValueKind::Bytes(_) => 5,
        ValueKind::Reference(_) => 6,
        ValueKind::Array(_) => 7,
        ValueKind::Map(_) => 8,
    }
}

/// Total order over values: by type class first, then by value.
pub(crate) fn compare_values(left: &FirestoreValue, right: &FirestoreValue) -> Ordering {
    let by_type = type_rank(left).cmp(&type_rank(right));
    if by_type != Ordering::Equal {
        return by_type;
    }
    match (left.kind(), right.kind()) {
        (ValueKind::Boolean(a), ValueKind::Boolean(b)) => a.cmp(b),
        (ValueKind::Integer(a), ValueKind::Integer(b)) => a.cmp(b),
        (ValueKind::Timestamp(a), ValueKind::Timestamp(b)) => a.cmp(b),
        (ValueKind::String(a), ValueKind::String(b)) => a.cmp(b),
        (ValueKind::Bytes(a), ValueKind::Bytes(b)) => a.cmp(b),
        (ValueKind::Reference(a), ValueKind::Reference(b)) => a.split('/').cmp(b.split('/')),
        (ValueKind::Array(a), ValueKind::Array(b)) => compare_arrays(a, b),
        (ValueKind::Map(a), ValueKind::Map(b)) => compare_maps(a, b),
        _ => match (left.as_double(), right.as_double()) {
            (Some(a), Some(b)) => compare_doubles(a, b),
            _ => Ordering::Equal,
        },
    }
}

// NaN sorts before every other number.
fn compare_doubles(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

fn compare_arrays(left: &[FirestoreValue], right: &[FirestoreValue]) -> Ordering {
    for (a, b) in left.iter().zip(right) {
        let ord = compare_values(a, b);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len())
}

fn compare_maps(left: &MapValue, right: &MapValue) -> Ordering {
    for ((left_key, left_value), (right_key, right_value)) in left.fields().iter().zip(right.fields()) {
        let ord = left_key
            .cmp(right_key)
            .then_with(|| compare_values(left_value, right_value));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len())
}

fn directed(ord: Ordering, direction: OrderDirection) -> Ordering {
    match direction {
        OrderDirection::Ascending => ord,
        OrderDirection::Descending => ord.reverse(),
    }
}

fn compare_documents(left: &StoredDocument, right: &StoredDocument, order_by: &[OrderBy]) -> Ordering {
    for order in order_by {
        let left_value = field_value(left, order.field()).unwrap_or_else(FirestoreValue::null);
        let right_value = field_value(right, order.field()).unwrap_or_else(FirestoreValue::null);
        let ord = directed(compare_values(&left_value, &right_value), order.direction());
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Position of `doc` relative to the cursor, in result order.
fn compare_to_bound(doc: &StoredDocument, bound: &Bound, order_by: &[OrderBy]) -> Ordering {
    for (value, order) in bound.values().iter().zip(order_by) {
        let doc_value = field_value(doc, order.field()).unwrap_or_else(FirestoreValue::null);
        let ord = directed(compare_values(&doc_value, value), order.direction());
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn after_start(doc: &StoredDocument, bound: &Bound, order_by: &[OrderBy]) -> bool {
    match compare_to_bound(doc, bound, order_by) {
        Ordering::Greater => true,
        Ordering::Equal => bound.inclusive(),
        Ordering::Less => false,
    }
}

fn before_end(doc: &StoredDocument, bound: &Bound, order_by: &[OrderBy]) -> bool {
    match compare_to_bound(doc, bound, order_by) {
        Ordering::Less => true,
        Ordering::Equal => bound.inclusive(),
        Ordering::Greater => false,
    }
}
