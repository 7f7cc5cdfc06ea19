use std::future::Future;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value as JsonValue};

use crate::firestore::api::query::{LimitType, QueryDefinition};
use crate::firestore::error::{internal_error, FirestoreError, FirestoreResult};
use crate::firestore::model::{DatabaseId, DocumentKey};
use crate::firestore::remote::connection::{Connection, ConnectionBuilder};
use crate::firestore::remote::serializer::JsonProtoSerializer;
use crate::firestore::remote::structured_query::encode_structured_query;
use crate::firestore::value::MapValue;
use crate::platform::runtime::sleep as runtime_sleep;
use crate::util::BackoffConfig;

use super::{Datastore, StoredDocument, TransactionId, WriteOperation};

/// Datastore speaking the Firestore REST v1 API, against production or an emulator.
#[derive(Clone, Debug)]
pub struct HttpDatastore {
    connection: Connection,
    serializer: JsonProtoSerializer,
    retry: RetrySettings,
}

#[derive(Clone, Debug)]
pub struct HttpDatastoreBuilder {
    database_id: DatabaseId,
    connection_builder: ConnectionBuilder,
    retry: RetrySettings,
}

/// Retry policy for transient transport failures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetrySettings {
    fn should_retry(&self, attempt: u32, error: &FirestoreError) -> bool {
        attempt + 1 < self.max_attempts && error.code.is_transient()
    }
}

impl HttpDatastore {
    pub fn builder(database_id: DatabaseId) -> HttpDatastoreBuilder {
        HttpDatastoreBuilder::new(database_id)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> FirestoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FirestoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if self.retry.should_retry(attempt, &err) => {
                    let delay = self.retry.backoff.delay_for(attempt);
                    log::debug!(
                        "Retrying Firestore request in {delay:?} after attempt {}: {err}",
                        attempt + 1
                    );
                    runtime_sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn document_path(key: &DocumentKey) -> String {
        format!("documents/{}", key.path().canonical_string())
    }

    fn run_query_path(definition: &QueryDefinition) -> String {
        let parent = definition.parent_path();
        if parent.is_empty() {
            "documents:runQuery".to_string()
        } else {
            format!("documents/{}:runQuery", parent.canonical_string())
        }
    }
}

impl HttpDatastoreBuilder {
    fn new(database_id: DatabaseId) -> Self {
        Self {
            connection_builder: ConnectionBuilder::new(database_id.clone()),
            database_id,
            retry: RetrySettings::default(),
        }
    }

    pub fn with_emulator_host(mut self, host: impl Into<String>) -> Self {
        self.connection_builder = self.connection_builder.with_emulator_host(host);
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.connection_builder = self.connection_builder.with_api_key(api_key);
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.connection_builder = self.connection_builder.with_client(client);
        self
    }

    pub fn with_retry_settings(mut self, settings: RetrySettings) -> Self {
        self.retry = settings;
        self
    }

    pub fn build(self) -> FirestoreResult<HttpDatastore> {
        Ok(HttpDatastore {
            connection: self.connection_builder.build()?,
            serializer: JsonProtoSerializer::new(self.database_id),
            retry: self.retry,
        })
    }
}

#[async_trait]
impl Datastore for HttpDatastore {
    async fn get_document(
        &self,
        key: &DocumentKey,
        transaction: Option<&TransactionId>,
    ) -> FirestoreResult<Option<MapValue>> {
        let path = Self::document_path(key);
        let query: Vec<(&str, &str)> = transaction
            .map(|id| vec![("transaction", id.as_str())])
            .unwrap_or_default();
        let document = self
            .execute_with_retry(|| {
                self.connection
                    .invoke_json_optional(Method::GET, &path, &query, None)
            })
            .await?;
        document
            .map(|document| self.serializer.decode_fields(&document))
            .transpose()
    }

    async fn run_query(&self, query: &QueryDefinition) -> FirestoreResult<Vec<StoredDocument>> {
        let request = query.as_limit_first();
        let body = json!({
            "structuredQuery": encode_structured_query(&self.serializer, &request),
        });
        let path = Self::run_query_path(query);
        let response = self
            .execute_with_retry(|| {
                self.connection
                    .invoke_json(Method::POST, &path, &[], Some(&body))
            })
            .await?;

        let entries = response
            .as_array()
            .ok_or_else(|| internal_error("runQuery response must be an array"))?;
        let mut documents = entries
            .iter()
            .filter_map(|entry| entry.get("document"))
            .map(|document| self.serializer.decode_document(document))
            .collect::<FirestoreResult<Vec<_>>>()?;
        if query.limit_type() == LimitType::Last {
            documents.reverse();
        }
        Ok(documents)
    }

    async fn commit(
        &self,
        writes: Vec<WriteOperation>,
        transaction: Option<&TransactionId>,
    ) -> FirestoreResult<()> {
        let encoded: Vec<JsonValue> = writes
            .iter()
            .map(|write| self.serializer.encode_write(write))
            .collect();
        let mut body = json!({ "writes": encoded });
        if let Some(id) = transaction {
            body["transaction"] = JsonValue::String(id.as_str().to_string());
        }
        self.execute_with_retry(|| {
            self.connection
                .invoke_json(Method::POST, "documents:commit", &[], Some(&body))
        })
        .await?;
        Ok(())
    }

    async fn begin_transaction(&self) -> FirestoreResult<TransactionId> {
        let body = json!({ "options": { "readWrite": {} } });
        let response = self
            .execute_with_retry(|| {
                self.connection
                    .invoke_json(Method::POST, "documents:beginTransaction", &[], Some(&body))
            })
            .await?;
        response
            .get("transaction")
            .and_then(JsonValue::as_str)
            .map(TransactionId::new)
            .ok_or_else(|| internal_error("beginTransaction response is missing the transaction id"))
    }

    async fn rollback(&self, transaction: &TransactionId) -> FirestoreResult<()> {
        let body = json!({ "transaction": transaction.as_str() });
        self.connection
            .invoke_json(Method::POST, "documents:rollback", &[], Some(&body))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::query::{limit_to_last, order_by, query, OrderDirection, Query};
    use crate::firestore::api::PassthroughConverter;
    use crate::firestore::error::{unavailable, FirestoreErrorCode};
    use crate::firestore::model::ResourcePath;
    use crate::firestore::value::{FieldMap, FirestoreValue};
    use httpmock::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    const ROOT: &str = "/v1/projects/demo/databases/(default)";

    fn datastore(server: &MockServer) -> HttpDatastore {
        HttpDatastore::builder(DatabaseId::for_project("demo").unwrap())
            .with_emulator_host(server.address().to_string())
            .with_retry_settings(RetrySettings {
                max_attempts: 3,
                backoff: BackoffConfig::with_interval(Duration::from_millis(1)),
            })
            .build()
            .unwrap()
    }

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    #[test]
    fn only_transient_errors_are_retried() {
        let settings = RetrySettings::default();
        assert!(settings.should_retry(0, &unavailable("down")));
        assert!(!settings.should_retry(4, &unavailable("down")));
        assert!(!settings.should_retry(0, &internal_error("boom")));
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path(format!("{ROOT}/documents/cats/ghost"))
                    .header("authorization", "Bearer owner");
                then.status(404).json_body(json!({
                    "error": { "code": 404, "message": "not found", "status": "NOT_FOUND" }
                }));
            })
            .await;

        let result = datastore(&server)
            .get_document(&key("cats/ghost"), None)
            .await
            .unwrap();
        assert!(result.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn reads_inside_transaction_pass_its_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path(format!("{ROOT}/documents/cats/tom"))
                    .query_param("transaction", "abc=");
                then.status(200).json_body(json!({
                    "name": "projects/demo/databases/(default)/documents/cats/tom",
                    "fields": { "age": { "integerValue": "3" } }
                }));
            })
            .await;

        let data = datastore(&server)
            .get_document(&key("cats/tom"), Some(&TransactionId::new("abc=")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data.get("age").and_then(FirestoreValue::as_integer), Some(3));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn commit_posts_encoded_writes() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(format!("{ROOT}/documents:commit"))
                    .json_body(json!({
                        "writes": [
                            { "delete": "projects/demo/databases/(default)/documents/cats/tom" }
                        ],
                        "transaction": "txn-1"
                    }));
                then.status(200).json_body(json!({ "commitTime": "2024-01-01T00:00:00Z" }));
            })
            .await;

        datastore(&server)
            .commit(
                vec![WriteOperation::Delete { key: key("cats/tom") }],
                Some(&TransactionId::new("txn-1")),
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn aborted_commit_surfaces_without_retry() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(format!("{ROOT}/documents:commit"));
                then.status(409).json_body(json!({
                    "error": { "code": 409, "message": "contention", "status": "ABORTED" }
                }));
            })
            .await;

        let mut fields = FieldMap::new();
        fields.insert("age".into(), FirestoreValue::from(4));
        let write = WriteOperation::set(key("cats/tom"), fields, false).unwrap();
        let err = datastore(&server).commit(vec![write], None).await.unwrap_err();
        assert_eq!(err.code, FirestoreErrorCode::Aborted);
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn unavailable_backend_is_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(format!("{ROOT}/documents:beginTransaction"));
                then.status(503);
            })
            .await;

        let err = datastore(&server).begin_transaction().await.unwrap_err();
        assert_eq!(err.code, FirestoreErrorCode::Unavailable);
        mock.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn limit_to_last_flips_request_and_reverses_results() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(format!("{ROOT}/documents/owners/ann:runQuery"))
                    .json_body(json!({
                        "structuredQuery": {
                            "from": [{ "collectionId": "cats", "allDescendants": false }],
                            "orderBy": [
                                { "field": { "fieldPath": "age" }, "direction": "DESCENDING" },
                                { "field": { "fieldPath": "__name__" }, "direction": "DESCENDING" }
                            ],
                            "limit": 2
                        }
                    }));
                then.status(200).json_body(json!([
                    { "document": {
                        "name": "projects/demo/databases/(default)/documents/owners/ann/cats/old",
                        "fields": { "age": { "integerValue": "9" } }
                    } },
                    { "document": {
                        "name": "projects/demo/databases/(default)/documents/owners/ann/cats/mid",
                        "fields": { "age": { "integerValue": "5" } }
                    } },
                    { "readTime": "2024-01-01T00:00:00Z" }
                ]));
            })
            .await;

        let base = Query::for_collection(
            ResourcePath::from_string("owners/ann/cats").unwrap(),
            Arc::new(PassthroughConverter),
        );
        let q = query(
            base,
            [order_by("age", OrderDirection::Ascending), limit_to_last(2)],
        )
        .unwrap();
        let docs = datastore(&server).run_query(q.definition()).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|doc| doc.key.id()).collect();
        assert_eq!(ids, vec!["mid", "old"]);
        mock.assert_async().await;
    }
}
