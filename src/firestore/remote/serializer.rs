use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DatabaseId, DocumentKey, FieldPath, ResourcePath, Timestamp};
use crate::firestore::remote::datastore::{FieldTransform, StoredDocument, WriteOperation};
use crate::firestore::value::{FieldMap, FirestoreValue, MapValue, ValueKind};

/// Encodes values, writes and documents in the REST JSON mapping of the v1 protos.
#[derive(Clone, Debug)]
pub struct JsonProtoSerializer {
    database_id: DatabaseId,
}

impl JsonProtoSerializer {
    pub fn new(database_id: DatabaseId) -> Self {
        Self { database_id }
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    /// `projects/{p}/databases/{d}/documents`
    pub fn documents_root(&self) -> String {
        format!("{}/documents", self.database_id.resource_name())
    }

    pub fn document_name(&self, key: &DocumentKey) -> String {
        self.resource_name(key.path())
    }

    fn resource_name(&self, path: &ResourcePath) -> String {
        if path.is_empty() {
            self.documents_root()
        } else {
            format!("{}/{}", self.documents_root(), path.canonical_string())
        }
    }

    /// Parent resource name for a query rooted at `path`.
    pub fn query_parent(&self, path: &ResourcePath) -> String {
        self.resource_name(path)
    }

    /// Parses a full document name back into a key of this database.
    pub fn decode_key(&self, name: &str) -> FirestoreResult<DocumentKey> {
        let root = self.documents_root();
        let relative = name
            .strip_prefix(&root)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                invalid_argument(format!(
                    "Document name '{name}' does not belong to database {}",
                    self.database_id.resource_name()
                ))
            })?;
        DocumentKey::from_string(relative)
    }

    pub fn encode_value(&self, value: &FirestoreValue) -> JsonValue {
        match value.kind() {
            ValueKind::Null | ValueKind::ServerTimestamp => json!({ "nullValue": JsonValue::Null }),
            ValueKind::Boolean(value) => json!({ "booleanValue": value }),
            ValueKind::Integer(value) => json!({ "integerValue": value.to_string() }),
            ValueKind::Double(value) => encode_double(*value),
            ValueKind::Timestamp(value) => json!({ "timestampValue": value.to_rfc3339() }),
            ValueKind::String(value) => json!({ "stringValue": value }),
            ValueKind::Bytes(value) => json!({ "bytesValue": BASE64_STANDARD.encode(value) }),
            ValueKind::Reference(path) => json!({
                "referenceValue": format!("{}/{}", self.documents_root(), path)
            }),
            ValueKind::Array(values) => json!({
                "arrayValue": {
                    "values": values.iter().map(|value| self.encode_value(value)).collect::<Vec<_>>()
                }
            }),
            ValueKind::Map(map) => json!({ "mapValue": { "fields": self.encode_fields(map) } }),
        }
    }

    pub fn encode_fields(&self, map: &MapValue) -> JsonValue {
        let fields: JsonMap<String, JsonValue> = map
            .fields()
            .iter()
            .map(|(key, value)| (key.clone(), self.encode_value(value)))
            .collect();
        JsonValue::Object(fields)
    }

    pub fn decode_value(&self, value: &JsonValue) -> FirestoreResult<FirestoreValue> {
        let object = value
            .as_object()
            .ok_or_else(|| invalid_argument("Expected a Firestore value object"))?;
        let (kind, inner) = object
            .iter()
            .next()
            .ok_or_else(|| invalid_argument("Empty Firestore value object"))?;

        Ok(match kind.as_str() {
            "nullValue" => FirestoreValue::null(),
            "booleanValue" => FirestoreValue::from_bool(
                inner
                    .as_bool()
                    .ok_or_else(|| invalid_argument("booleanValue must be a bool"))?,
            ),
            "integerValue" => FirestoreValue::from_integer(match inner {
                JsonValue::String(text) => i64::from_str(text)
                    .map_err(|err| invalid_argument(format!("Invalid integerValue: {err}")))?,
                JsonValue::Number(number) => number
                    .as_i64()
                    .ok_or_else(|| invalid_argument("integerValue out of range"))?,
                _ => return Err(invalid_argument("integerValue must be a string or number")),
            }),
            "doubleValue" => FirestoreValue::from_double(match inner {
                JsonValue::Number(number) => number
                    .as_f64()
                    .ok_or_else(|| invalid_argument("Invalid doubleValue"))?,
                JsonValue::String(text) => decode_special_double(text)?,
                _ => return Err(invalid_argument("doubleValue must be a number or string")),
            }),
            "timestampValue" => FirestoreValue::from_timestamp(Timestamp::from_rfc3339(
                inner
                    .as_str()
                    .ok_or_else(|| invalid_argument("timestampValue must be a string"))?,
            )?),
            "stringValue" => FirestoreValue::from_string(
                inner
                    .as_str()
                    .ok_or_else(|| invalid_argument("stringValue must be a string"))?,
            ),
            "bytesValue" => {
                let encoded = inner
                    .as_str()
                    .ok_or_else(|| invalid_argument("bytesValue must be a base64 string"))?;
                let decoded = BASE64_STANDARD
                    .decode(encoded)
                    .map_err(|err| invalid_argument(format!("Invalid bytesValue: {err}")))?;
                FirestoreValue::from_bytes(decoded)
            }
            "referenceValue" => {
                let name = inner
                    .as_str()
                    .ok_or_else(|| invalid_argument("referenceValue must be a string"))?;
                let key = self.decode_key(name)?;
                FirestoreValue::from_reference(key.path().canonical_string())
            }
            "arrayValue" => {
                let values = match inner.get("values").and_then(JsonValue::as_array) {
                    Some(values) => values
                        .iter()
                        .map(|value| self.decode_value(value))
                        .collect::<FirestoreResult<Vec<_>>>()?,
                    None => Vec::new(),
                };
                FirestoreValue::from_array(values)
            }
            "mapValue" => FirestoreValue::from_map(self.decode_fields(inner)?.into_fields()),
            other => {
                return Err(invalid_argument(format!(
                    "Unsupported Firestore value type '{other}'"
                )))
            }
        })
    }

    /// Decodes the `fields` member of a document or map value; a missing member is an
    /// empty map.
    pub fn decode_fields(&self, container: &JsonValue) -> FirestoreResult<MapValue> {
        let Some(fields) = container.get("fields") else {
            return Ok(MapValue::default());
        };
        let fields = fields
            .as_object()
            .ok_or_else(|| invalid_argument("Expected 'fields' to be an object"))?;
        let mut decoded = FieldMap::new();
        for (name, value) in fields {
            decoded.insert(name.clone(), self.decode_value(value)?);
        }
        Ok(MapValue::new(decoded))
    }

    pub fn decode_document(&self, document: &JsonValue) -> FirestoreResult<StoredDocument> {
        let name = document
            .get("name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| invalid_argument("Document is missing its name"))?;
        Ok(StoredDocument {
            key: self.decode_key(name)?,
            fields: self.decode_fields(document)?,
        })
    }

    pub fn encode_write(&self, write: &WriteOperation) -> JsonValue {
        match write {
            WriteOperation::Set {
                key,
                data,
                mask,
                transforms,
            } => {
                let mut encoded = self.encode_update(key, data, transforms);
                if let Some(mask) = mask {
                    encoded.insert("updateMask".into(), encode_mask(mask));
                }
                JsonValue::Object(encoded)
            }
            WriteOperation::Update {
                key,
                data,
                field_paths,
                transforms,
            } => {
                let mut encoded = self.encode_update(key, data, transforms);
                encoded.insert("updateMask".into(), encode_mask(field_paths));
                encoded.insert("currentDocument".into(), json!({ "exists": true }));
                JsonValue::Object(encoded)
            }
            WriteOperation::Delete { key } => json!({ "delete": self.document_name(key) }),
        }
    }

    fn encode_update(
        &self,
        key: &DocumentKey,
        data: &MapValue,
        transforms: &[FieldTransform],
    ) -> JsonMap<String, JsonValue> {
        let mut write = JsonMap::new();
        write.insert(
            "update".into(),
            json!({
                "name": self.document_name(key),
                "fields": self.encode_fields(data),
            }),
        );
        if !transforms.is_empty() {
            let encoded: Vec<JsonValue> = transforms
                .iter()
                .map(|transform| match transform {
                    FieldTransform::ServerTimestamp(field) => json!({
                        "fieldPath": field.server_format(),
                        "setToServerValue": "REQUEST_TIME",
                    }),
                })
                .collect();
            write.insert("updateTransforms".into(), JsonValue::Array(encoded));
        }
        write
    }
}

fn encode_mask(paths: &[FieldPath]) -> JsonValue {
    let paths: Vec<String> = paths.iter().map(FieldPath::server_format).collect();
    json!({ "fieldPaths": paths })
}

fn encode_double(value: f64) -> JsonValue {
    if value.is_nan() {
        json!({ "doubleValue": "NaN" })
    } else if value.is_infinite() {
        let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
        json!({ "doubleValue": text })
    } else {
        json!({ "doubleValue": value })
    }
}

fn decode_special_double(text: &str) -> FirestoreResult<f64> {
    match text {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        other => other
            .parse::<f64>()
            .map_err(|err| invalid_argument(format!("Invalid doubleValue: {err}"))),
    }
}
