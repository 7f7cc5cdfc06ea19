use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use crate::storage::backend::{ByteStream, InMemoryStorageBackend, StorageBackend};
use crate::storage::constants::RESUMABLE_UPLOAD_CHUNK_SIZE;
use crate::storage::error::{
    app_deleted, no_download_url, unknown_error, StorageErrorCode, StorageResult,
};
use crate::storage::list::{ListOptions, ListResult};
use crate::storage::location::encode_component;
use crate::storage::metadata::{ObjectMetadata, SettableMetadata, UploadMetadata};
use crate::storage::reference::StorageReference;
use crate::storage::string::StringFormat;
use crate::storage::upload::{UploadJob, UploadResult, UploadTask};
use crate::util::BackoffConfig;

/// Incremental reader over an object body.
pub type ObjectReader = StreamReader<ByteStream, Bytes>;

/// Object store client bound to one bucket.
///
/// Cloning is cheap; clones share the transport and the terminated flag.
#[derive(Clone)]
pub struct StorageClient {
    inner: Arc<ClientInner>,
    chunk_size: usize,
    backoff: BackoffConfig,
}

struct ClientInner {
    bucket: String,
    backend: Arc<dyn StorageBackend>,
    terminated: AtomicBool,
}

impl StorageClient {
    pub fn new(bucket: impl Into<String>, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                bucket: bucket.into(),
                backend,
                terminated: AtomicBool::new(false),
            }),
            chunk_size: RESUMABLE_UPLOAD_CHUNK_SIZE,
            backoff: BackoffConfig::default(),
        }
    }

    /// Client over a fresh process-local store.
    pub fn in_memory(bucket: impl Into<String>) -> Self {
        Self::new(bucket, Arc::new(InMemoryStorageBackend::new()))
    }

    /// Bytes per request for resumable uploads started from this handle.
    pub fn with_upload_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_chunk_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.inner.bucket
    }

    /// Reference to `path` inside the bucket; `""` addresses the root.
    pub fn reference(&self, path: &str) -> StorageReference {
        StorageReference::new(self.bucket(), path)
    }

    pub fn root(&self) -> StorageReference {
        self.reference("")
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    fn backend(&self) -> StorageResult<&Arc<dyn StorageBackend>> {
        if self.is_terminated() {
            return Err(app_deleted());
        }
        Ok(&self.inner.backend)
    }

    pub async fn upload_bytes(
        &self,
        reference: &StorageReference,
        data: impl Into<Bytes>,
        metadata: Option<UploadMetadata>,
    ) -> StorageResult<UploadResult> {
        reference.ensure_not_root("upload_bytes")?;
        let metadata = metadata.unwrap_or_default();
        let object = self
            .backend()?
            .upload(reference.location(), data.into(), &metadata)
            .await?;
        Ok(UploadResult {
            reference: reference.clone(),
            metadata: object,
        })
    }

    /// Uploads `value` decoded per `format`. A data URL's media type is used when the
    /// metadata does not name a content type.
    pub async fn upload_string(
        &self,
        reference: &StorageReference,
        value: &str,
        format: StringFormat,
        metadata: Option<UploadMetadata>,
    ) -> StorageResult<UploadResult> {
        reference.ensure_not_root("upload_string")?;
        let payload = format.decode(value)?;
        let mut metadata = metadata.unwrap_or_default();
        if metadata.content_type.is_none() {
            metadata.content_type = payload.content_type;
        }
        self.upload_bytes(reference, payload.bytes, Some(metadata))
            .await
    }

    /// Starts a background upload and returns its handle immediately.
    pub fn upload_bytes_resumable(
        &self,
        reference: &StorageReference,
        data: impl Into<Bytes>,
        metadata: Option<UploadMetadata>,
    ) -> StorageResult<UploadTask> {
        reference.ensure_not_root("upload_bytes_resumable")?;
        let backend = Arc::clone(self.backend()?);
        Ok(UploadTask::start(UploadJob {
            backend,
            reference: reference.clone(),
            data: data.into(),
            metadata: metadata.unwrap_or_default(),
            chunk_size: self.chunk_size,
            backoff: self.backoff,
        }))
    }

    /// Token-bearing URL the object can be fetched from without credentials.
    pub async fn get_download_url(&self, reference: &StorageReference) -> StorageResult<String> {
        reference.ensure_not_root("get_download_url")?;
        let backend = self.backend()?;
        let metadata = backend.get_metadata(reference.location()).await?;
        let token = metadata
            .download_tokens
            .first()
            .ok_or_else(no_download_url)?;
        Ok(format!(
            "{}/v0{}?alt=media&token={}",
            backend.download_origin(),
            reference.location().full_server_url(),
            encode_component(token)
        ))
    }

    /// Downloads the whole object, or its first `max_size` bytes.
    pub async fn get_bytes(
        &self,
        reference: &StorageReference,
        max_size: Option<u64>,
    ) -> StorageResult<Bytes> {
        reference.ensure_not_root("get_bytes")?;
        let stream = self
            .backend()?
            .download(reference.location(), max_size)
            .await?;
        let buffer = stream
            .try_fold(BytesMut::new(), |mut buffer, chunk| async move {
                buffer.extend_from_slice(&chunk);
                Ok(buffer)
            })
            .await
            .map_err(|err| unknown_error(format!("download interrupted: {err}")))?;
        Ok(buffer.freeze())
    }

    /// Streams the object as an [`AsyncRead`](tokio::io::AsyncRead).
    pub async fn get_stream(
        &self,
        reference: &StorageReference,
        max_size: Option<u64>,
    ) -> StorageResult<ObjectReader> {
        reference.ensure_not_root("get_stream")?;
        let stream = self
            .backend()?
            .download(reference.location(), max_size)
            .await?;
        Ok(StreamReader::new(stream))
    }

    pub async fn get_metadata(&self, reference: &StorageReference) -> StorageResult<ObjectMetadata> {
        reference.ensure_not_root("get_metadata")?;
        self.backend()?.get_metadata(reference.location()).await
    }

    pub async fn update_metadata(
        &self,
        reference: &StorageReference,
        patch: SettableMetadata,
    ) -> StorageResult<ObjectMetadata> {
        reference.ensure_not_root("update_metadata")?;
        self.backend()?
            .update_metadata(reference.location(), &patch)
            .await
    }

    /// Deletes the object. Deleting a missing object succeeds.
    pub async fn delete_object(&self, reference: &StorageReference) -> StorageResult<()> {
        reference.ensure_not_root("delete_object")?;
        match self.backend()?.delete(reference.location()).await {
            Err(err) if err.code == StorageErrorCode::ObjectNotFound => {
                log::debug!("delete of missing object {reference} ignored");
                Ok(())
            }
            other => other,
        }
    }

    /// One page of the objects and prefixes directly below `reference`.
    pub async fn list(
        &self,
        reference: &StorageReference,
        options: ListOptions,
    ) -> StorageResult<ListResult> {
        options.validate()?;
        self.backend()?.list(reference.location(), &options).await
    }

    /// Follows page tokens until the listing is exhausted.
    pub async fn list_all(&self, reference: &StorageReference) -> StorageResult<ListResult> {
        let backend = self.backend()?;
        let mut merged = ListResult::default();
        let mut options = ListOptions::default();
        loop {
            let page = backend.list(reference.location(), &options).await?;
            let next = page.next_page_token.clone();
            merged.extend(page);
            match next {
                Some(token) => options.page_token = Some(token),
                None => return Ok(merged),
            }
        }
    }

    /// Releases the transport. Later operations fail with `storage/app-deleted`.
    pub async fn terminate(&self) -> StorageResult<()> {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.backend.terminate().await
    }
}
