use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use crate::storage::constants::DEFAULT_CONTENT_TYPE;
use crate::storage::error::{internal_error, StorageResult};
use crate::storage::location::Location;

/// Metadata that can be attached to an object at upload time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadMetadata {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub custom_metadata: BTreeMap<String, String>,
    /// Base64 MD5 digest the server checks the payload against.
    pub md5_hash: Option<String>,
}

impl UploadMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_metadata.insert(key.into(), value.into());
        self
    }

    pub(crate) fn resolved_content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    /// JSON resource sent ahead of the payload by multipart and resumable uploads.
    pub(crate) fn to_resource(&self, location: &Location, size: u64) -> JsonValue {
        let mut map = Map::new();
        map.insert("name".into(), location.path().into());
        map.insert("fullPath".into(), location.path().into());
        map.insert("size".into(), size.to_string().into());
        map.insert("contentType".into(), self.resolved_content_type().into());
        insert_optional(&mut map, "cacheControl", &self.cache_control);
        insert_optional(&mut map, "contentDisposition", &self.content_disposition);
        insert_optional(&mut map, "contentEncoding", &self.content_encoding);
        insert_optional(&mut map, "contentLanguage", &self.content_language);
        insert_optional(&mut map, "md5Hash", &self.md5_hash);
        if !self.custom_metadata.is_empty() {
            map.insert("metadata".into(), custom_to_json(&self.custom_metadata));
        }
        JsonValue::Object(map)
    }
}

/// Patch applied by `update_metadata`; `None` fields are left untouched and custom
/// metadata keys are merged into the existing set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SettableMetadata {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub custom_metadata: BTreeMap<String, String>,
}

impl SettableMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_metadata.insert(key.into(), value.into());
        self
    }

    pub(crate) fn to_patch(&self) -> JsonValue {
        let mut map = Map::new();
        insert_optional(&mut map, "contentType", &self.content_type);
        insert_optional(&mut map, "cacheControl", &self.cache_control);
        insert_optional(&mut map, "contentDisposition", &self.content_disposition);
        insert_optional(&mut map, "contentEncoding", &self.content_encoding);
        insert_optional(&mut map, "contentLanguage", &self.content_language);
        if !self.custom_metadata.is_empty() {
            map.insert("metadata".into(), custom_to_json(&self.custom_metadata));
        }
        JsonValue::Object(map)
    }
}

/// Server-side view of a stored object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub name: String,
    pub full_path: String,
    pub size: u64,
    pub generation: Option<String>,
    pub metageneration: Option<String>,
    pub time_created: Option<String>,
    pub updated: Option<String>,
    pub md5_hash: Option<String>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub custom_metadata: BTreeMap<String, String>,
    pub download_tokens: Vec<String>,
}

impl ObjectMetadata {
    pub(crate) fn from_resource(value: JsonValue) -> StorageResult<Self> {
        let resource: ObjectResource = serde_json::from_value(value)
            .map_err(|err| internal_error(format!("invalid object metadata: {err}")))?;
        let size = match resource.size.as_deref() {
            Some(size) => size
                .parse()
                .map_err(|_| internal_error(format!("invalid object size '{size}'")))?,
            None => 0,
        };
        let full_path = resource.full_path.unwrap_or_else(|| resource.name.clone());
        let name = full_path
            .rsplit_once('/')
            .map_or(full_path.as_str(), |(_, tail)| tail)
            .to_string();
        Ok(Self {
            bucket: resource.bucket.unwrap_or_default(),
            name,
            full_path,
            size,
            generation: resource.generation,
            metageneration: resource.metageneration,
            time_created: resource.time_created,
            updated: resource.updated,
            md5_hash: resource.md5_hash,
            content_type: resource.content_type,
            cache_control: resource.cache_control,
            content_disposition: resource.content_disposition,
            content_encoding: resource.content_encoding,
            content_language: resource.content_language,
            custom_metadata: resource.metadata.unwrap_or_default(),
            download_tokens: resource
                .download_tokens
                .map(|tokens| split_tokens(&tokens))
                .unwrap_or_default(),
        })
    }

    pub(crate) fn apply(&mut self, patch: &SettableMetadata) {
        merge_optional(&mut self.content_type, &patch.content_type);
        merge_optional(&mut self.cache_control, &patch.cache_control);
        merge_optional(&mut self.content_disposition, &patch.content_disposition);
        merge_optional(&mut self.content_encoding, &patch.content_encoding);
        merge_optional(&mut self.content_language, &patch.content_language);
        self.custom_metadata.extend(
            patch
                .custom_metadata
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    #[serde(default)]
    bucket: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    full_path: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    generation: Option<String>,
    #[serde(default)]
    metageneration: Option<String>,
    #[serde(default)]
    time_created: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    md5_hash: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    cache_control: Option<String>,
    #[serde(default)]
    content_disposition: Option<String>,
    #[serde(default)]
    content_encoding: Option<String>,
    #[serde(default)]
    content_language: Option<String>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
    #[serde(default)]
    download_tokens: Option<String>,
}

fn split_tokens(tokens: &str) -> Vec<String> {
    tokens
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn insert_optional(map: &mut Map<String, JsonValue>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        map.insert(key.to_string(), JsonValue::String(value.clone()));
    }
}

fn merge_optional(target: &mut Option<String>, patch: &Option<String>) {
    if let Some(value) = patch {
        *target = Some(value.clone());
    }
}

fn custom_to_json(custom: &BTreeMap<String, String>) -> JsonValue {
    JsonValue::Object(
        custom
            .iter()
            .map(|(key, value)| (key.clone(), JsonValue::String(value.clone())))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_object_resource() {
        let metadata = ObjectMetadata::from_resource(json!({
            "bucket": "demo.appspot.com",
            "name": "images/cat.png",
            "size": "42",
            "contentType": "image/png",
            "metadata": { "owner": "tom" },
            "downloadTokens": "tok-1,tok-2"
        }))
        .unwrap();
        assert_eq!(metadata.name, "cat.png");
        assert_eq!(metadata.full_path, "images/cat.png");
        assert_eq!(metadata.size, 42);
        assert_eq!(metadata.custom_metadata.get("owner").map(String::as_str), Some("tom"));
        assert_eq!(metadata.download_tokens, vec!["tok-1", "tok-2"]);
    }

    #[test]
    fn upload_resource_defaults_content_type() {
        let location = Location::new("bucket", "a/b.bin");
        let resource = UploadMetadata::new().with_custom("k", "v").to_resource(&location, 3);
        assert_eq!(resource["contentType"], "application/octet-stream");
        assert_eq!(resource["size"], "3");
        assert_eq!(resource["metadata"], json!({ "k": "v" }));
    }

    #[test]
    fn patch_merges_custom_metadata() {
        let mut metadata = ObjectMetadata {
            content_type: Some("text/plain".into()),
            custom_metadata: BTreeMap::from([("a".to_string(), "1".to_string())]),
            ..Default::default()
        };
        metadata.apply(&SettableMetadata::new().with_cache_control("no-cache").with_custom("b", "2"));
        assert_eq!(metadata.content_type.as_deref(), Some("text/plain"));
        assert_eq!(metadata.cache_control.as_deref(), Some("no-cache"));
        assert_eq!(metadata.custom_metadata.len(), 2);
    }
}
