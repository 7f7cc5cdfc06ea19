use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::value::{map_from_json, map_to_json, FieldMap, MapValue};

/// Bidirectional mapping between stored field maps and a caller-chosen model type.
///
/// Converters are supplied at the call site (see `with_converter` on references and
/// queries) rather than registered on the client, so one client serves any number of
/// model types. Implementations must be pure: the same map and id always decode to an
/// equal model.
pub trait FirestoreDataConverter: Send + Sync + 'static {
    /// The strongly typed model associated with this converter.
    type Model: Send + 'static;

    /// Projects a model onto the fields that get persisted.
    fn to_map(&self, value: &Self::Model) -> FirestoreResult<FieldMap>;

    /// Rebuilds a model from stored fields. `document_id` is the id of the document
    /// the fields were read from; it is never part of the stored payload.
    fn from_map(&self, value: &MapValue, document_id: &str) -> FirestoreResult<Self::Model>;
}

/// Leaves stored maps untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughConverter;

impl FirestoreDataConverter for PassthroughConverter {
    type Model = MapValue;

    fn to_map(&self, value: &Self::Model) -> FirestoreResult<FieldMap> {
        Ok(value.fields().clone())
    }

    fn from_map(&self, value: &MapValue, _document_id: &str) -> FirestoreResult<Self::Model> {
        Ok(value.clone())
    }
}

/// Converter for any serde model whose JSON form is an object.
pub struct SerdeConverter<T> {
    _model: PhantomData<fn() -> T>,
}

impl<T> SerdeConverter<T> {
    pub fn new() -> Self {
        Self {
            _model: PhantomData,
        }
    }
}

impl<T> Default for SerdeConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SerdeConverter<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SerdeConverter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerdeConverter").finish()
    }
}

impl<T> FirestoreDataConverter for SerdeConverter<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Model = T;

    fn to_map(&self, value: &T) -> FirestoreResult<FieldMap> {
        Ok(map_from_json(&serialize_model(value)?).into_fields())
    }

    fn from_map(&self, value: &MapValue, _document_id: &str) -> FirestoreResult<T> {
        deserialize_object(map_to_json(value))
    }
}

/// Serde converter that keeps the document id in a model field.
///
/// On write the identifier field is stripped from the payload; on read the document id
/// is injected into it. Build one with [`with_identifier`].
pub struct IdentifiedConverter<T> {
    field: String,
    _model: PhantomData<fn() -> T>,
}

/// Converter for `T` whose `field` receives the document id.
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct Cat { id: String, name: String, age: u32 }
///
/// let cats = client.collection(["cats"])?.with_converter(with_identifier::<Cat>("id"));
/// ```
pub fn with_identifier<T>(field: impl Into<String>) -> IdentifiedConverter<T> {
    IdentifiedConverter {
        field: field.into(),
        _model: PhantomData,
    }
}

impl<T> IdentifiedConverter<T> {
    pub fn field(&self) -> &str {
        &self.field
    }
}

impl<T> Clone for IdentifiedConverter<T> {
    fn clone(&self) -> Self {
        with_identifier(self.field.clone())
    }
}

impl<T> fmt::Debug for IdentifiedConverter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifiedConverter")
            .field("field", &self.field)
            .finish()
    }
}

impl<T> FirestoreDataConverter for IdentifiedConverter<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Model = T;

    fn to_map(&self, value: &T) -> FirestoreResult<FieldMap> {
        let mut object = serialize_model(value)?;
        object.remove(&self.field);
        Ok(map_from_json(&object).into_fields())
    }

    fn from_map(&self, value: &MapValue, document_id: &str) -> FirestoreResult<T> {
        let mut object = map_to_json(value);
        object.insert(self.field.clone(), JsonValue::String(document_id.to_string()));
        deserialize_object(object)
    }
}

/// Converter assembled from two closures.
pub struct FnConverter<T, W, R> {
    write: W,
    read: R,
    _model: PhantomData<fn() -> T>,
}

impl<T, W, R> FnConverter<T, W, R>
where
    W: Fn(&T) -> FirestoreResult<FieldMap> + Send + Sync + 'static,
    R: Fn(&MapValue, &str) -> FirestoreResult<T> + Send + Sync + 'static,
{
    pub fn new(write: W, read: R) -> Self {
        Self {
            write,
            read,
            _model: PhantomData,
        }
    }
}

impl<T, W, R> FirestoreDataConverter for FnConverter<T, W, R>
where
    T: Send + 'static,
    W: Fn(&T) -> FirestoreResult<FieldMap> + Send + Sync + 'static,
    R: Fn(&MapValue, &str) -> FirestoreResult<T> + Send + Sync + 'static,
{
    type Model = T;

    fn to_map(&self, value: &T) -> FirestoreResult<FieldMap> {
        (self.write)(value)
    }

    fn from_map(&self, value: &MapValue, document_id: &str) -> FirestoreResult<T> {
        (self.read)(value, document_id)
    }
}

fn serialize_object<T: Serialize>(value: &T) -> FirestoreResult<serde_json::Map<String, JsonValue>> {
    match serde_json::to_value(value) {
        Ok(JsonValue::Object(object)) => Ok(object),
        Ok(other) => Err(invalid_argument(format!(
            "Documents must serialize to an object, got {other}"
        ))),
        Err(err) => Err(invalid_argument(format!("Failed to serialize document: {err}"))),
    }
}

/// Serializes a model and checks the result decodes back into `T`.
///
/// JSON has no NaN or infinity, so non-finite floats serialize as `null`; a required
/// float field would then store a document that can never be read.
fn serialize_model<T: Serialize + DeserializeOwned>(
    value: &T,
) -> FirestoreResult<serde_json::Map<String, JsonValue>> {
    let object = serialize_object(value)?;
    deserialize_object::<T>(object.clone()).map_err(|err| {
        invalid_argument(format!(
            "Document cannot be stored because it would not decode back: {}",
            err.message()
        ))
    })?;
    Ok(object)
}

fn deserialize_object<T: DeserializeOwned>(
    object: serde_json::Map<String, JsonValue>,
) -> FirestoreResult<T> {
    serde_json::from_value(JsonValue::Object(object))
        .map_err(|err| invalid_argument(format!("Failed to decode document: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::value::FirestoreValue;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Cat {
        id: String,
        name: String,
        age: u32,
    }

    fn tom() -> Cat {
        Cat {
            id: "tom".into(),
            name: "Tom".into(),
            age: 4,
        }
    }

    #[test]
    fn identifier_is_stripped_on_write() {
        let converter = with_identifier::<Cat>("id");
        let fields = converter.to_map(&tom()).unwrap();
        assert!(!fields.contains_key("id"));
        assert_eq!(fields.get("age").and_then(FirestoreValue::as_integer), Some(4));
    }

    #[test]
    fn identifier_round_trip_uses_document_id() {
        let converter = with_identifier::<Cat>("id");
        let fields = converter.to_map(&tom()).unwrap();
        let decoded = converter.from_map(&MapValue::new(fields), "tom").unwrap();
        assert_eq!(decoded, tom());
    }

    #[test]
    fn serde_converter_rejects_non_objects() {
        let converter = SerdeConverter::<u32>::new();
        let err = converter.to_map(&3).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Reading {
        id: String,
        value: f64,
    }

    #[test]
    fn non_finite_float_is_rejected_on_write() {
        let converter = with_identifier::<Reading>("id");
        for value in [f64::NAN, f64::INFINITY] {
            let err = converter
                .to_map(&Reading {
                    id: "r1".into(),
                    value,
                })
                .unwrap_err();
            assert_eq!(err.code_str(), "firestore/invalid-argument");
        }
        let err = SerdeConverter::<Reading>::new()
            .to_map(&Reading {
                id: "r1".into(),
                value: f64::NEG_INFINITY,
            })
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");

        let fields = converter
            .to_map(&Reading {
                id: "r1".into(),
                value: 1.5,
            })
            .unwrap();
        assert_eq!(fields.get("value").and_then(FirestoreValue::as_double), Some(1.5));
    }

    #[test]
    fn fn_converter_delegates() {
        let converter = FnConverter::new(
            |name: &String| {
                let mut fields = FieldMap::new();
                fields.insert("name".into(), FirestoreValue::from(name.as_str()));
                Ok(fields)
            },
            |map: &MapValue, id: &str| {
                Ok(format!(
                    "{id}:{}",
                    map.get("name").and_then(FirestoreValue::as_str).unwrap_or_default()
                ))
            },
        );
        let fields = converter.to_map(&"Tom".to_string()).unwrap();
        let decoded = converter.from_map(&MapValue::new(fields), "tom").unwrap();
        assert_eq!(decoded, "tom:Tom");
    }
}
