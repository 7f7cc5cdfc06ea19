use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use reqwest::header::{HeaderMap, CONTENT_TYPE, RANGE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::storage::constants::{DEFAULT_HOST, DEFAULT_PROTOCOL, EMULATOR_PROTOCOL};
use crate::storage::error::{
    bucket_not_found, internal_error, invalid_argument, object_not_found, unauthorized,
    unknown_error, StorageError, StorageResult,
};
use crate::storage::list::{ListOptions, ListResult};
use crate::storage::location::Location;
use crate::storage::metadata::{ObjectMetadata, SettableMetadata, UploadMetadata};
use crate::storage::reference::StorageReference;

use super::{truncate_stream, ByteStream, ChunkStatus, StorageBackend};

const EMULATOR_OWNER_TOKEN: &str = "owner";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const UPLOAD_PROTOCOL: &str = "X-Goog-Upload-Protocol";
const UPLOAD_COMMAND: &str = "X-Goog-Upload-Command";
const UPLOAD_STATUS: &str = "X-Goog-Upload-Status";
const UPLOAD_URL: &str = "X-Goog-Upload-URL";
const UPLOAD_OFFSET: &str = "X-Goog-Upload-Offset";

/// Backend speaking the Firebase Storage REST v0 API.
#[derive(Clone, Debug)]
pub struct HttpStorageBackend {
    client: Client,
    origin: String,
    emulated: bool,
    request_timeout: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct HttpStorageBackendBuilder {
    client: Option<Client>,
    emulator_host: Option<String>,
    request_timeout: Option<Duration>,
}

impl HttpStorageBackendBuilder {
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Routes requests to an emulator at `host:port`.
    pub fn with_emulator_host(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> StorageResult<HttpStorageBackend> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .build()
                .map_err(|err| internal_error(err.to_string()))?,
        };
        let origin = match &self.emulator_host {
            Some(host) => format!("{EMULATOR_PROTOCOL}://{host}"),
            None => format!("{DEFAULT_PROTOCOL}://{DEFAULT_HOST}"),
        };
        Ok(HttpStorageBackend {
            client,
            origin,
            emulated: self.emulator_host.is_some(),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        })
    }
}

impl HttpStorageBackend {
    pub fn builder() -> HttpStorageBackendBuilder {
        HttpStorageBackendBuilder::default()
    }

    pub fn is_emulated(&self) -> bool {
        self.emulated
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/v0{resource}", self.origin)
    }

    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.timeout(self.request_timeout);
        if self.emulated {
            request.bearer_auth(EMULATOR_OWNER_TOKEN)
        } else {
            request
        }
    }

    async fn send(&self, request: RequestBuilder) -> StorageResult<Response> {
        self.prepare(request)
            .send()
            .await
            .map_err(|err| unknown_error(format!("storage request failed: {err}")))
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        location: Option<&Location>,
    ) -> StorageResult<Response> {
        let response = self.send(request).await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(failure(response, location).await)
    }

    async fn execute_json(
        &self,
        request: RequestBuilder,
        location: Option<&Location>,
    ) -> StorageResult<JsonValue> {
        let response = self.execute(request, location).await?;
        parse_json(response).await
    }
}

#[async_trait]
impl StorageBackend for HttpStorageBackend {
    fn download_origin(&self) -> String {
        self.origin.clone()
    }

    async fn upload(
        &self,
        location: &Location,
        data: Bytes,
        metadata: &UploadMetadata,
    ) -> StorageResult<ObjectMetadata> {
        let resource = metadata.to_resource(location, data.len() as u64);
        let boundary = generate_boundary();
        let body = multipart_body(
            &boundary,
            resource.to_string().as_bytes(),
            metadata.resolved_content_type(),
            &data,
        );
        let request = self
            .client
            .post(self.url(&location.bucket_only_server_url()))
            .query(&[("uploadType", "multipart"), ("name", location.path())])
            .header(UPLOAD_PROTOCOL, "multipart")
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);
        let value = self.execute_json(request, Some(location)).await?;
        ObjectMetadata::from_resource(value)
    }

    async fn start_resumable(
        &self,
        location: &Location,
        total_bytes: u64,
        metadata: &UploadMetadata,
    ) -> StorageResult<String> {
        let request = self
            .client
            .post(self.url(&location.bucket_only_server_url()))
            .query(&[("uploadType", "resumable"), ("name", location.path())])
            .header(UPLOAD_PROTOCOL, "resumable")
            .header(UPLOAD_COMMAND, "start")
            .header("X-Goog-Upload-Header-Content-Length", total_bytes.to_string())
            .header(
                "X-Goog-Upload-Header-Content-Type",
                metadata.resolved_content_type(),
            )
            .json(&metadata.to_resource(location, total_bytes));
        let response = self.execute(request, Some(location)).await?;
        upload_status(response.headers())?;
        header(response.headers(), UPLOAD_URL)
            .map(str::to_string)
            .ok_or_else(|| internal_error("resumable upload start did not return an upload URL"))
    }

    async fn upload_chunk(
        &self,
        session: &str,
        offset: u64,
        chunk: Bytes,
        finalize: bool,
    ) -> StorageResult<ChunkStatus> {
        let command = match (finalize, chunk.is_empty()) {
            (true, true) => "finalize",
            (true, false) => "upload, finalize",
            (false, _) => "upload",
        };
        let bytes_received = offset + chunk.len() as u64;
        let request = self
            .client
            .post(session)
            .header(UPLOAD_PROTOCOL, "resumable")
            .header(UPLOAD_COMMAND, command)
            .header(UPLOAD_OFFSET, offset.to_string())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(chunk);
        let response = self.send(request).await?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::PERMANENT_REDIRECT {
            return Err(failure(response, None).await);
        }

        let finalized = upload_status(response.headers())?;
        let metadata = if finalized {
            Some(ObjectMetadata::from_resource(parse_json(response).await?)?)
        } else {
            None
        };
        Ok(ChunkStatus {
            bytes_received,
            metadata,
        })
    }

    async fn cancel_resumable(&self, session: &str) -> StorageResult<()> {
        let request = self
            .client
            .post(session)
            .header(UPLOAD_PROTOCOL, "resumable")
            .header(UPLOAD_COMMAND, "cancel");
        self.execute(request, None).await.map(|_| ())
    }

    async fn get_metadata(&self, location: &Location) -> StorageResult<ObjectMetadata> {
        let request = self.client.get(self.url(&location.full_server_url()));
        let value = self.execute_json(request, Some(location)).await?;
        ObjectMetadata::from_resource(value)
    }

    async fn update_metadata(
        &self,
        location: &Location,
        patch: &SettableMetadata,
    ) -> StorageResult<ObjectMetadata> {
        let request = self
            .client
            .patch(self.url(&location.full_server_url()))
            .json(&patch.to_patch());
        let value = self.execute_json(request, Some(location)).await?;
        ObjectMetadata::from_resource(value)
    }

    async fn download(
        &self,
        location: &Location,
        max_size: Option<u64>,
    ) -> StorageResult<ByteStream> {
        let mut request = self
            .client
            .get(self.url(&location.full_server_url()))
            .query(&[("alt", "media")]);
        if let Some(max_size) = max_size.filter(|size| *size > 0) {
            request = request.header(RANGE, format!("bytes=0-{}", max_size - 1));
        }
        let response = self.execute(request, Some(location)).await?;
        let stream: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err))),
        );
        // Servers are free to ignore the range header.
        Ok(match max_size {
            Some(max_size) => truncate_stream(stream, max_size),
            None => stream,
        })
    }

    async fn delete(&self, location: &Location) -> StorageResult<()> {
        let request = self.client.delete(self.url(&location.full_server_url()));
        self.execute(request, Some(location)).await.map(|_| ())
    }

    async fn list(&self, location: &Location, options: &ListOptions) -> StorageResult<ListResult> {
        let prefix = if location.is_root() {
            String::new()
        } else {
            format!("{}/", location.path())
        };
        let mut params = vec![("prefix", prefix), ("delimiter", "/".to_string())];
        if let Some(token) = &options.page_token {
            params.push(("pageToken", token.clone()));
        }
        if let Some(max) = options.max_results {
            params.push(("maxResults", max.to_string()));
        }
        let request = self
            .client
            .get(self.url(&location.bucket_only_server_url()))
            .query(&params);
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(bucket_not_found(location.bucket()));
        }
        if !response.status().is_success() {
            return Err(failure(response, Some(location)).await);
        }

        let page: ListResponse = serde_json::from_value(parse_json(response).await?)
            .map_err(|err| internal_error(format!("invalid list response: {err}")))?;
        Ok(ListResult {
            prefixes: page
                .prefixes
                .iter()
                .map(|prefix| StorageReference::new(location.bucket(), prefix))
                .collect(),
            items: page
                .items
                .into_iter()
                .map(|item| {
                    let bucket = item.bucket.unwrap_or_else(|| location.bucket().to_string());
                    StorageReference::new(bucket, &item.name)
                })
                .collect(),
            next_page_token: page.next_page_token.filter(|token| !token.is_empty()),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    items: Vec<ListItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ListItem {
    name: String,
    #[serde(default)]
    bucket: Option<String>,
}

async fn parse_json(response: Response) -> StorageResult<JsonValue> {
    let text = response
        .text()
        .await
        .map_err(|err| unknown_error(format!("failed to read storage response: {err}")))?;
    serde_json::from_str(&text)
        .map_err(|err| internal_error(format!("invalid storage response: {err}")))
}

async fn failure(response: Response, location: Option<&Location>) -> StorageError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    map_http_error(status, location).with_status(status.as_u16()).with_server_response(body)
}

fn map_http_error(status: StatusCode, location: Option<&Location>) -> StorageError {
    let path = location.map_or("", Location::path);
    match status {
        StatusCode::NOT_FOUND => match location {
            Some(location) if location.is_root() => bucket_not_found(location.bucket()),
            Some(location) => object_not_found(location.path()),
            None => unknown_error("upload session no longer exists"),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => unauthorized(path),
        StatusCode::BAD_REQUEST => invalid_argument("storage rejected the request"),
        status => unknown_error(format!(
            "storage request failed with status {}",
            status.as_u16()
        )),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Returns whether the resumable session reports itself finalized.
fn upload_status(headers: &HeaderMap) -> StorageResult<bool> {
    let status = header(headers, UPLOAD_STATUS)
        .ok_or_else(|| internal_error("missing resumable upload status header"))?;
    match status.to_ascii_lowercase().as_str() {
        "active" => Ok(false),
        "final" => Ok(true),
        other => Err(internal_error(format!(
            "unexpected resumable upload status '{other}'"
        ))),
    }
}

fn generate_boundary() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(30)
        .map(char::from)
        .collect()
}

fn multipart_body(boundary: &str, resource: &[u8], content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(resource.len() + data.len() + 200);
    for (part_type, part) in [
        ("application/json; charset=utf-8", resource),
        (content_type, data),
    ] {
        body.extend_from_slice(format!("--{boundary}\r\nContent-Type: {part_type}\r\n\r\n").as_bytes());
        body.extend_from_slice(part);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--").as_bytes());
    body
}
