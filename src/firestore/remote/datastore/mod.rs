use std::fmt;

use async_trait::async_trait;

use crate::firestore::api::query::QueryDefinition;
use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath};
use crate::firestore::value::{FieldMap, FirestoreValue, MapValue, ValueKind};

pub mod http;
pub mod in_memory;

pub use http::HttpDatastore;
pub use in_memory::InMemoryDatastore;

/// A document returned by a query.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredDocument {
    pub key: DocumentKey,
    pub fields: MapValue,
}

/// Backend handle for an open read-write transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Field-level transform applied by the backend at commit time.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldTransform {
    ServerTimestamp(FieldPath),
}

impl FieldTransform {
    pub fn field(&self) -> &FieldPath {
        match self {
            FieldTransform::ServerTimestamp(field) => field,
        }
    }
}

/// One mutation of a commit. Sentinel values have already been lifted into
/// `transforms`; `data` holds plain values only.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOperation {
    Set {
        key: DocumentKey,
        data: MapValue,
        /// `Some` for merge writes: only these paths are overwritten.
        mask: Option<Vec<FieldPath>>,
        transforms: Vec<FieldTransform>,
    },
    Update {
        key: DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
        transforms: Vec<FieldTransform>,
    },
    Delete {
        key: DocumentKey,
    },
}

impl WriteOperation {
    pub(crate) fn set(key: DocumentKey, data: FieldMap, merge: bool) -> FirestoreResult<Self> {
        let (data, transforms) = sanitize_for_write(MapValue::new(data))?;
        let mask = merge.then(|| data.leaf_paths());
        Ok(WriteOperation::Set {
            key,
            data,
            mask,
            transforms,
        })
    }

    /// Builds an update from dotted field paths to values.
    pub(crate) fn update(key: DocumentKey, fields: FieldMap) -> FirestoreResult<Self> {
        if fields.is_empty() {
            return Err(invalid_argument(
                "Function updateDoc() requires at least one field to update",
            ));
        }
        let mut data = MapValue::default();
        let mut field_paths = Vec::with_capacity(fields.len());
        for (path, value) in fields {
            let path = FieldPath::from_dot_separated(&path)?;
            if field_paths.iter().any(|existing: &FieldPath| {
                existing.segments().starts_with(path.segments())
                    || path.segments().starts_with(existing.segments())
            }) {
                return Err(invalid_argument(format!(
                    "Field path '{}' conflicts with another field in the same update",
                    path.canonical_string()
                )));
            }
            data.set_path(&path, value);
            field_paths.push(path);
        }
        let (data, transforms) = sanitize_for_write(data)?;
        field_paths.retain(|path| {
            !transforms
                .iter()
                .any(|transform| transform.field() == path)
        });
        Ok(WriteOperation::Update {
            key,
            data,
            field_paths,
            transforms,
        })
    }

    pub fn key(&self) -> &DocumentKey {
        match self {
            WriteOperation::Set { key, .. }
            | WriteOperation::Update { key, .. }
            | WriteOperation::Delete { key } => key,
        }
    }
}

/// Splits server-timestamp placeholders out of `data`.
pub(crate) fn sanitize_for_write(data: MapValue) -> FirestoreResult<(MapValue, Vec<FieldTransform>)> {
    let mut transforms = Vec::new();
    let fields = strip_sentinels(data.into_fields(), None, &mut transforms)?;
    Ok((MapValue::new(fields), transforms))
}

fn strip_sentinels(
    fields: FieldMap,
    prefix: Option<&FieldPath>,
    transforms: &mut Vec<FieldTransform>,
) -> FirestoreResult<FieldMap> {
    let mut out = FieldMap::new();
    for (name, value) in fields {
        let path = match prefix {
            Some(prefix) => prefix.child(name.clone()),
            None => FieldPath::from_single(name.clone()),
        };
        match value.into_kind() {
            ValueKind::ServerTimestamp => transforms.push(FieldTransform::ServerTimestamp(path)),
            ValueKind::Map(map) => {
                let was_empty = map.is_empty();
                let nested = strip_sentinels(map.into_fields(), Some(&path), transforms)?;
                if was_empty || !nested.is_empty() {
                    out.insert(name, FirestoreValue::from_map(nested));
                }
            }
            ValueKind::Array(values) => {
                reject_nested_sentinels(&values, &path)?;
                out.insert(name, FirestoreValue::from_array(values));
            }
            kind => {
                out.insert(name, FirestoreValue::from_kind(kind));
            }
        }
    }
    Ok(out)
}

fn reject_nested_sentinels(values: &[FirestoreValue], path: &FieldPath) -> FirestoreResult<()> {
    for value in values {
        match value.kind() {
            ValueKind::ServerTimestamp => {
                return Err(invalid_argument(format!(
                    "serverTimestamp() is not supported inside arrays (found in field {})",
                    path.canonical_string()
                )))
            }
            ValueKind::Array(nested) => reject_nested_sentinels(nested, path)?,
            ValueKind::Map(map) => {
                let nested: Vec<FirestoreValue> = map.fields().values().cloned().collect();
                reject_nested_sentinels(&nested, path)?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Transport the document client talks to.
///
/// Implementations must apply each `commit` atomically: either every write lands or
/// none does.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    /// Reads one document; `Ok(None)` when it does not exist.
    async fn get_document(
        &self,
        key: &DocumentKey,
        transaction: Option<&TransactionId>,
    ) -> FirestoreResult<Option<MapValue>>;

    async fn run_query(&self, query: &QueryDefinition) -> FirestoreResult<Vec<StoredDocument>>;

    async fn commit(
        &self,
        writes: Vec<WriteOperation>,
        transaction: Option<&TransactionId>,
    ) -> FirestoreResult<()>;

    async fn begin_transaction(&self) -> FirestoreResult<TransactionId>;

    async fn rollback(&self, transaction: &TransactionId) -> FirestoreResult<()>;

    /// Releases transport resources.
    async fn terminate(&self) -> FirestoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DocumentKey {
        DocumentKey::from_string("cats/tom").unwrap()
    }

    #[test]
    fn lifts_server_timestamps_into_transforms() {
        let mut meta = FieldMap::new();
        meta.insert("updatedAt".into(), FirestoreValue::server_timestamp());
        let mut fields = FieldMap::new();
        fields.insert("name".into(), FirestoreValue::from("Tom"));
        fields.insert("meta".into(), FirestoreValue::from_map(meta));

        let write = WriteOperation::set(key(), fields, true).unwrap();
        let WriteOperation::Set {
            data,
            mask,
            transforms,
            ..
        } = write
        else {
            panic!("expected a set");
        };
        assert!(data.get("meta").is_none());
        assert_eq!(mask.unwrap(), vec![FieldPath::from_dot_separated("name").unwrap()]);
        assert_eq!(
            transforms,
            vec![FieldTransform::ServerTimestamp(
                FieldPath::from_dot_separated("meta.updatedAt").unwrap()
            )]
        );
    }

    #[test]
    fn rejects_sentinels_inside_arrays() {
        let mut fields = FieldMap::new();
        fields.insert(
            "history".into(),
            FirestoreValue::from_array(vec![FirestoreValue::server_timestamp()]),
        );
        let err = WriteOperation::set(key(), fields, false).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn update_expands_dotted_paths() {
        let mut fields = FieldMap::new();
        fields.insert("address.city".into(), FirestoreValue::from("Lisbon"));
        let write = WriteOperation::update(key(), fields).unwrap();
        let WriteOperation::Update {
            data, field_paths, ..
        } = write
        else {
            panic!("expected an update");
        };
        assert_eq!(
            data.get_path(&FieldPath::from_dot_separated("address.city").unwrap()),
            Some(&FirestoreValue::from("Lisbon"))
        );
        assert_eq!(field_paths.len(), 1);
    }

    #[test]
    fn update_rejects_overlapping_paths() {
        let mut fields = FieldMap::new();
        fields.insert("address".into(), FirestoreValue::from("x"));
        fields.insert("address.city".into(), FirestoreValue::from("Lisbon"));
        assert!(WriteOperation::update(key(), fields).is_err());
    }
}
