use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value as JsonValue;

use crate::firestore::constants::{FIRESTORE_API_HOST, FIRESTORE_API_VERSION};
use crate::firestore::error::{internal_error, unavailable, FirestoreResult};
use crate::firestore::model::DatabaseId;

use super::rpc_error::map_http_error;

const EMULATOR_OWNER_TOKEN: &str = "owner";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// JSON-over-HTTP access to one database's REST resource.
#[derive(Clone, Debug)]
pub struct Connection {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    emulated: bool,
    request_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct ConnectionBuilder {
    database_id: DatabaseId,
    client: Option<Client>,
    emulator_host: Option<String>,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl ConnectionBuilder {
    pub fn new(database_id: DatabaseId) -> Self {
        Self {
            database_id,
            client: None,
            emulator_host: None,
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Routes requests to an emulator at `host:port`.
    pub fn with_emulator_host(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> FirestoreResult<Connection> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .build()
                .map_err(|err| internal_error(err.to_string()))?,
        };
        let base_url = build_base_url(&self.database_id, self.emulator_host.as_deref());
        Ok(Connection {
            client,
            base_url,
            api_key: self.api_key,
            emulated: self.emulator_host.is_some(),
            request_timeout: self.request_timeout,
        })
    }
}

impl Connection {
    pub fn builder(database_id: DatabaseId) -> ConnectionBuilder {
        ConnectionBuilder::new(database_id)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_emulated(&self) -> bool {
        self.emulated
    }

    pub async fn invoke_json(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&JsonValue>,
    ) -> FirestoreResult<JsonValue> {
        let (status, text) = self.send(method, path, query, body).await?;
        if !status.is_success() {
            return Err(map_http_error(status, &text));
        }
        parse_body(&text)
    }

    /// Like [`invoke_json`](Self::invoke_json) but maps `404` to `Ok(None)`.
    pub async fn invoke_json_optional(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&JsonValue>,
    ) -> FirestoreResult<Option<JsonValue>> {
        let (status, text) = self.send(method, path, query, body).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(map_http_error(status, &text));
        }
        parse_body(&text).map(Some)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&JsonValue>,
    ) -> FirestoreResult<(StatusCode, String)> {
        let mut request = self.build_request(method, path).query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| unavailable(format!("Firestore request failed: {err}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| unavailable(format!("Failed to read Firestore response: {err}")))?;
        Ok((status, text))
    }

    fn build_request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut builder = self
            .client
            .request(method, url)
            .timeout(self.request_timeout);
        if self.emulated {
            builder = builder.bearer_auth(EMULATOR_OWNER_TOKEN);
        } else if let Some(key) = self.api_key.as_deref() {
            builder = builder.query(&[("key", key)]);
        }
        builder
    }
}

fn parse_body(text: &str) -> FirestoreResult<JsonValue> {
    if text.trim().is_empty() {
        return Ok(JsonValue::Null);
    }
    serde_json::from_str(text)
        .map_err(|err| internal_error(format!("Invalid Firestore response: {err}")))
}

fn build_base_url(database_id: &DatabaseId, emulator_host: Option<&str>) -> String {
    let host = match emulator_host {
        Some(host) => format!("http://{host}"),
        None => FIRESTORE_API_HOST.to_string(),
    };
    format!(
        "{host}/{FIRESTORE_API_VERSION}/{}",
        database_id.resource_name()
    )
}
