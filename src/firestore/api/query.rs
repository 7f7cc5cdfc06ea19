use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath, IntoFieldPath, ResourcePath, Timestamp};
use crate::firestore::value::{FirestoreValue, ValueKind};

use super::converter::{FirestoreDataConverter, PassthroughConverter};
use super::reference::CollectionReference;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    LessThan,
    LessThanOrEqual,
    Equal,
    NotEqual,
    GreaterThanOrEqual,
    GreaterThan,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOperator {
    /// Operator name used by the REST `structuredQuery`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::LessThan => "LESS_THAN",
            FilterOperator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            FilterOperator::Equal => "EQUAL",
            FilterOperator::NotEqual => "NOT_EQUAL",
            FilterOperator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            FilterOperator::GreaterThan => "GREATER_THAN",
            FilterOperator::ArrayContains => "ARRAY_CONTAINS",
            FilterOperator::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT_IN",
        }
    }

    pub fn is_inequality(&self) -> bool {
        matches!(
            self,
            FilterOperator::LessThan
                | FilterOperator::LessThanOrEqual
                | FilterOperator::GreaterThan
                | FilterOperator::GreaterThanOrEqual
                | FilterOperator::NotEqual
                | FilterOperator::NotIn
        )
    }

    fn takes_array(&self) -> bool {
        matches!(
            self,
            FilterOperator::In | FilterOperator::NotIn | FilterOperator::ArrayContainsAny
        )
    }
}

impl FromStr for FilterOperator {
    type Err = crate::firestore::error::FirestoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "<" => FilterOperator::LessThan,
            "<=" => FilterOperator::LessThanOrEqual,
            "==" => FilterOperator::Equal,
            "!=" => FilterOperator::NotEqual,
            ">=" => FilterOperator::GreaterThanOrEqual,
            ">" => FilterOperator::GreaterThan,
            "array-contains" => FilterOperator::ArrayContains,
            "array-contains-any" => FilterOperator::ArrayContainsAny,
            "in" => FilterOperator::In,
            "not-in" => FilterOperator::NotIn,
            other => {
                return Err(invalid_argument(format!(
                    "Invalid query. Unsupported filter operator '{other}'"
                )))
            }
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Ascending => "ASCENDING",
            OrderDirection::Descending => "DESCENDING",
        }
    }

    fn flipped(self) -> Self {
        match self {
            OrderDirection::Ascending => OrderDirection::Descending,
            OrderDirection::Descending => OrderDirection::Ascending,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitType {
    First,
    Last,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    field: FieldPath,
    op: FilterOperator,
    value: FirestoreValue,
}

impl FieldFilter {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.op
    }

    pub fn value(&self) -> &FirestoreValue {
        &self.value
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    field: FieldPath,
    direction: OrderDirection,
}

impl OrderBy {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }
}

/// Cursor position; `inclusive` distinguishes startAt/endAt from startAfter/endBefore.
#[derive(Clone, Debug, PartialEq)]
pub struct Bound {
    values: Vec<FirestoreValue>,
    inclusive: bool,
}

impl Bound {
    pub fn values(&self) -> &[FirestoreValue] {
        &self.values
    }

    pub fn inclusive(&self) -> bool {
        self.inclusive
    }
}

/// Converter-independent description of a query, consumed by the datastores.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryDefinition {
    parent: ResourcePath,
    collection_id: String,
    all_descendants: bool,
    filters: Vec<FieldFilter>,
    order_by: Vec<OrderBy>,
    limit: Option<u32>,
    limit_type: LimitType,
    start_at: Option<Bound>,
    end_at: Option<Bound>,
}

impl QueryDefinition {
    fn new(parent: ResourcePath, collection_id: String, all_descendants: bool) -> Self {
        Self {
            parent,
            collection_id,
            all_descendants,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            limit_type: LimitType::First,
            start_at: None,
            end_at: None,
        }
    }

    /// Path of the document (or root) the queried collection hangs off.
    pub fn parent_path(&self) -> &ResourcePath {
        &self.parent
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn is_collection_group(&self) -> bool {
        self.all_descendants
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    /// Orderings exactly as requested by the caller.
    pub fn explicit_order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn limit_type(&self) -> LimitType {
        self.limit_type
    }

    pub fn start_at(&self) -> Option<&Bound> {
        self.start_at.as_ref()
    }

    pub fn end_at(&self) -> Option<&Bound> {
        self.end_at.as_ref()
    }

    /// Full result ordering: explicit orderings, the first inequality field when none
    /// were given, then the document key as tie breaker.
    pub fn normalized_order_by(&self) -> Vec<OrderBy> {
        let mut orders = self.order_by.clone();
        if orders.is_empty() {
            if let Some(filter) = self.filters.iter().find(|f| f.op.is_inequality()) {
                orders.push(OrderBy {
                    field: filter.field.clone(),
                    direction: OrderDirection::Ascending,
                });
            }
        }
        if !orders.iter().any(|order| order.field.is_document_id()) {
            let direction = orders
                .last()
                .map(|order| order.direction)
                .unwrap_or_default();
            orders.push(OrderBy {
                field: FieldPath::document_id(),
                direction,
            });
        }
        orders
    }

    /// Whether a document at `key` belongs to the queried collection (or group).
    pub fn targets(&self, key: &DocumentKey) -> bool {
        if self.all_descendants {
            key.collection_id() == self.collection_id
                && self.parent.is_prefix_of(&key.collection_path())
        } else {
            key.collection_path() == self.parent.child(self.collection_id.clone())
        }
    }

    /// Equivalent limit-to-first form of a limit-to-last query: orderings reversed and
    /// cursors swapped. Results of the returned query come back in reverse order.
    pub fn as_limit_first(&self) -> QueryDefinition {
        if self.limit_type == LimitType::First {
            return self.clone();
        }
        let mut flipped = self.clone();
        flipped.order_by = self
            .normalized_order_by()
            .into_iter()
            .map(|order| OrderBy {
                field: order.field,
                direction: order.direction.flipped(),
            })
            .collect();
        flipped.start_at = self.end_at.clone();
        flipped.end_at = self.start_at.clone();
        flipped.limit_type = LimitType::First;
        flipped
    }

    fn document_path_value(&self, field: &FieldPath, value: FirestoreValue) -> FirestoreResult<FirestoreValue> {
        if !field.is_document_id() {
            return Ok(value);
        }
        let id = match value.kind() {
            ValueKind::Reference(_) => return Ok(value),
            ValueKind::String(id) => id.clone(),
            _ => {
                return Err(invalid_argument(
                    "Invalid query. Document id values must be strings or references",
                ))
            }
        };
        let path = if self.all_descendants {
            self.parent.join(&id)?
        } else {
            if id.contains('/') {
                return Err(invalid_argument(format!(
                    "Invalid query. When querying a collection by document id, '{id}' must be a plain document id"
                )));
            }
            self.parent.child(self.collection_id.clone()).child(id)
        };
        let key = DocumentKey::from_path(path)?;
        Ok(FirestoreValue::from_reference(key.path().canonical_string()))
    }

    fn normalize_cursor(&self, name: &str, bound: Option<Bound>) -> FirestoreResult<Option<Bound>> {
        let Some(bound) = bound else {
            return Ok(None);
        };
        if bound.values.is_empty() {
            return Err(invalid_argument(format!(
                "Function {name}() requires at least one value"
            )));
        }
        if bound.values.len() > self.order_by.len() {
            return Err(invalid_argument(format!(
                "Too many arguments provided to {name}(). The number of arguments must be less than or equal to the number of orderBy() clauses"
            )));
        }
        let values = bound
            .values
            .into_iter()
            .zip(&self.order_by)
            .map(|(value, order)| self.document_path_value(&order.field, value))
            .collect::<FirestoreResult<Vec<_>>>()?;
        Ok(Some(Bound {
            values,
            inclusive: bound.inclusive,
        }))
    }
}

/// A collection (or collection group) plus constraints, bound to a converter.
pub struct Query<C = PassthroughConverter> {
    definition: QueryDefinition,
    converter: Arc<C>,
}

impl<C> Query<C> {
    pub(crate) fn for_collection(path: ResourcePath, converter: Arc<C>) -> Self {
        let collection_id = path.last_segment().unwrap_or_default().to_string();
        Self {
            definition: QueryDefinition::new(path.without_last(), collection_id, false),
            converter,
        }
    }

    pub(crate) fn collection_group(collection_id: &str, converter: Arc<C>) -> FirestoreResult<Self> {
        if collection_id.is_empty() || collection_id.contains('/') {
            return Err(invalid_argument(format!(
                "Invalid collection id '{collection_id}' passed to collectionGroup(). Collection ids must not contain '/'."
            )));
        }
        Ok(Self {
            definition: QueryDefinition::new(ResourcePath::root(), collection_id.to_string(), true),
            converter,
        })
    }

    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    pub(crate) fn converter_arc(&self) -> Arc<C> {
        Arc::clone(&self.converter)
    }

    pub fn with_converter<C2>(&self, converter: C2) -> Query<C2>
    where
        C2: FirestoreDataConverter,
    {
        Query {
            definition: self.definition.clone(),
            converter: Arc::new(converter),
        }
    }

    /// Adds `constraints` to this query.
    ///
    /// Constraint order is irrelevant; cursors are checked against the final set of
    /// orderings.
    pub fn with_constraints<I>(mut self, constraints: I) -> FirestoreResult<Self>
    where
        I: IntoIterator<Item = QueryConstraint>,
    {
        let mut start_at = self.definition.start_at.take();
        let mut end_at = self.definition.end_at.take();

        for constraint in constraints {
            match constraint.kind {
                ConstraintKind::Where { field, op, value } => {
                    let field = field?;
                    let value = validate_filter_value(&self.definition, &field, op, value)?;
                    self.definition.filters.push(FieldFilter { field, op, value });
                }
                ConstraintKind::OrderBy { field, direction } => {
                    let field = field?;
                    self.definition.order_by.push(OrderBy { field, direction });
                }
                ConstraintKind::Limit { limit, limit_type } => {
                    if limit == 0 {
                        return Err(invalid_argument(
                            "Function limit() requires a positive number",
                        ));
                    }
                    self.definition.limit = Some(limit);
                    self.definition.limit_type = limit_type;
                }
                ConstraintKind::Start(bound) => start_at = Some(bound),
                ConstraintKind::End(bound) => end_at = Some(bound),
            }
        }

        self.definition.start_at = self.definition.normalize_cursor("startAt", start_at)?;
        self.definition.end_at = self.definition.normalize_cursor("endAt", end_at)?;

        if self.definition.limit_type == LimitType::Last && self.definition.order_by.is_empty() {
            return Err(invalid_argument(
                "limitToLast() queries require specifying at least one orderBy() clause",
            ));
        }
        Ok(self)
    }
}

fn validate_filter_value(
    definition: &QueryDefinition,
    field: &FieldPath,
    op: FilterOperator,
    value: FirestoreValue,
) -> FirestoreResult<FirestoreValue> {
    if value.is_server_timestamp() {
        return Err(invalid_argument(
            "Invalid query. Server timestamps cannot be used in filters",
        ));
    }
    if op.takes_array() {
        let values = match value.into_kind() {
            ValueKind::Array(values) if !values.is_empty() => values,
            _ => {
                return Err(invalid_argument(format!(
                    "Invalid query. A non-empty array is required for '{}' filters",
                    op.as_str()
                )))
            }
        };
        let values = values
            .into_iter()
            .map(|value| definition.document_path_value(field, value))
            .collect::<FirestoreResult<Vec<_>>>()?;
        return Ok(FirestoreValue::from_array(values));
    }
    if field.is_document_id() && matches!(op, FilterOperator::ArrayContains) {
        return Err(invalid_argument(
            "Invalid query. array-contains cannot be used on the document id",
        ));
    }
    definition.document_path_value(field, value)
}

impl<C> Clone for Query<C> {
    fn clone(&self) -> Self {
        Self {
            definition: self.definition.clone(),
            converter: Arc::clone(&self.converter),
        }
    }
}

impl<C, C2> PartialEq<Query<C2>> for Query<C> {
    fn eq(&self, other: &Query<C2>) -> bool {
        self.definition == other.definition
    }
}

impl<C> fmt::Debug for Query<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("definition", &self.definition)
            .finish()
    }
}

/// Anything a query can be built from.
pub trait IntoQuery {
    type Converter;

    fn into_query(self) -> Query<Self::Converter>;
}

impl<C> IntoQuery for Query<C> {
    type Converter = C;

    fn into_query(self) -> Query<C> {
        self
    }
}

impl<C> IntoQuery for &Query<C> {
    type Converter = C;

    fn into_query(self) -> Query<C> {
        self.clone()
    }
}

impl<C> IntoQuery for CollectionReference<C> {
    type Converter = C;

    fn into_query(self) -> Query<C> {
        self.as_query()
    }
}

impl<C> IntoQuery for &CollectionReference<C> {
    type Converter = C;

    fn into_query(self) -> Query<C> {
        self.as_query()
    }
}

/// Builds a query from a collection or query plus constraints.
///
/// ```rust,ignore
/// let oldest = query(&cats, [
///     order_by("age", OrderDirection::Descending),
///     limit(2),
/// ])?;
/// ```
pub fn query<Q>(base: Q, constraints: impl IntoIterator<Item = QueryConstraint>) -> FirestoreResult<Query<Q::Converter>>
where
    Q: IntoQuery,
{
    base.into_query().with_constraints(constraints)
}

/// A single where/orderBy/limit/cursor clause. Field errors surface from [`query`].
pub struct QueryConstraint {
    kind: ConstraintKind,
}

enum ConstraintKind {
    Where {
        field: FirestoreResult<FieldPath>,
        op: FilterOperator,
        value: FirestoreValue,
    },
    OrderBy {
        field: FirestoreResult<FieldPath>,
        direction: OrderDirection,
    },
    Limit {
        limit: u32,
        limit_type: LimitType,
    },
    Start(Bound),
    End(Bound),
}

impl fmt::Debug for QueryConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match &self.kind {
            ConstraintKind::Where { .. } => "where",
            ConstraintKind::OrderBy { .. } => "orderBy",
            ConstraintKind::Limit { .. } => "limit",
            ConstraintKind::Start(_) => "start",
            ConstraintKind::End(_) => "end",
        };
        f.debug_tuple("QueryConstraint").field(&name).finish()
    }
}

pub fn where_field(
    field: impl IntoFieldPath,
    op: FilterOperator,
    value: impl Into<FirestoreValue>,
) -> QueryConstraint {
    QueryConstraint {
        kind: ConstraintKind::Where {
            field: field.into_field_path(),
            op,
            value: value.into(),
        },
    }
}

/// Orders by `field`; pass [`FieldPath::document_id()`] to order by document id.
pub fn order_by(field: impl IntoFieldPath, direction: OrderDirection) -> QueryConstraint {
    QueryConstraint {
        kind: ConstraintKind::OrderBy {
            field: field.into_field_path(),
            direction,
        },
    }
}

pub fn limit(limit: u32) -> QueryConstraint {
    QueryConstraint {
        kind: ConstraintKind::Limit {
            limit,
            limit_type: LimitType::First,
        },
    }
}

pub fn limit_to_last(limit: u32) -> QueryConstraint {
    QueryConstraint {
        kind: ConstraintKind::Limit {
            limit,
            limit_type: LimitType::Last,
        },
    }
}

fn cursor(values: impl IntoCursorValues, inclusive: bool, start: bool) -> QueryConstraint {
    let bound = Bound {
        values: values.into_cursor_values(),
        inclusive,
    };
    QueryConstraint {
        kind: if start {
            ConstraintKind::Start(bound)
        } else {
            ConstraintKind::End(bound)
        },
    }
}

pub fn start_at(values: impl IntoCursorValues) -> QueryConstraint {
    cursor(values, true, true)
}

pub fn start_after(values: impl IntoCursorValues) -> QueryConstraint {
    cursor(values, false, true)
}

pub fn end_at(values: impl IntoCursorValues) -> QueryConstraint {
    cursor(values, true, false)
}

pub fn end_before(values: impl IntoCursorValues) -> QueryConstraint {
    cursor(values, false, false)
}

/// Cursor position: one value per orderBy clause, in order.
pub trait IntoCursorValues {
    fn into_cursor_values(self) -> Vec<FirestoreValue>;
}

impl IntoCursorValues for Vec<FirestoreValue> {
    fn into_cursor_values(self) -> Vec<FirestoreValue> {
        self
    }
}

impl<const N: usize> IntoCursorValues for [FirestoreValue; N] {
    fn into_cursor_values(self) -> Vec<FirestoreValue> {
        self.into()
    }
}

macro_rules! single_cursor_value {
    ($($ty:ty),*) => {
        $(
            impl IntoCursorValues for $ty {
                fn into_cursor_values(self) -> Vec<FirestoreValue> {
                    vec![FirestoreValue::from(self)]
                }
            }
        )*
    };
}

single_cursor_value!(FirestoreValue, bool, i32, i64, u32, f64, &str, String, Timestamp);
