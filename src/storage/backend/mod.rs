//! Transports the storage client issues object operations through.

mod http;
mod in_memory;

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};

use crate::storage::constants::{DEFAULT_HOST, DEFAULT_PROTOCOL};
use crate::storage::error::StorageResult;
use crate::storage::list::{ListOptions, ListResult};
use crate::storage::location::Location;
use crate::storage::metadata::{ObjectMetadata, SettableMetadata, UploadMetadata};

pub use http::{HttpStorageBackend, HttpStorageBackendBuilder};
pub use in_memory::InMemoryStorageBackend;

/// Incremental object download.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Server acknowledgement of one resumable chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkStatus {
    pub bytes_received: u64,
    /// Present once the upload has been finalized.
    pub metadata: Option<ObjectMetadata>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// `{protocol}://{host}` prefix of issued download URLs.
    fn download_origin(&self) -> String {
        format!("{DEFAULT_PROTOCOL}://{DEFAULT_HOST}")
    }

    /// Uploads a whole payload in one request.
    async fn upload(
        &self,
        location: &Location,
        data: Bytes,
        metadata: &UploadMetadata,
    ) -> StorageResult<ObjectMetadata>;

    /// Opens a resumable session and returns its handle.
    async fn start_resumable(
        &self,
        location: &Location,
        total_bytes: u64,
        metadata: &UploadMetadata,
    ) -> StorageResult<String>;

    async fn upload_chunk(
        &self,
        session: &str,
        offset: u64,
        chunk: Bytes,
        finalize: bool,
    ) -> StorageResult<ChunkStatus>;

    async fn cancel_resumable(&self, session: &str) -> StorageResult<()>;

    async fn get_metadata(&self, location: &Location) -> StorageResult<ObjectMetadata>;

    async fn update_metadata(
        &self,
        location: &Location,
        patch: &SettableMetadata,
    ) -> StorageResult<ObjectMetadata>;

    /// Streams the object body, stopping after `max_size` bytes when given.
    async fn download(&self, location: &Location, max_size: Option<u64>)
        -> StorageResult<ByteStream>;

    /// Fails with `storage/object-not-found` when nothing is stored at `location`.
    async fn delete(&self, location: &Location) -> StorageResult<()>;

    async fn list(&self, location: &Location, options: &ListOptions) -> StorageResult<ListResult>;

    async fn terminate(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Ends `stream` once `max_size` bytes have been yielded.
pub(crate) fn truncate_stream(stream: ByteStream, max_size: u64) -> ByteStream {
    Box::pin(stream.scan(max_size, |remaining, chunk| {
        let item = match chunk {
            Ok(_) if *remaining == 0 => None,
            Ok(mut bytes) => {
                if bytes.len() as u64 > *remaining {
                    bytes.truncate(*remaining as usize);
                }
                *remaining -= bytes.len() as u64;
                Some(Ok(bytes))
            }
            Err(err) => Some(Err(err)),
        };
        futures::future::ready(item)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn truncation_cuts_mid_chunk() {
        let source: ByteStream = Box::pin(stream::iter(vec![
            Ok::<_, io::Error>(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"def")),
            Ok(Bytes::from_static(b"ghi")),
        ]));
        let collected: Vec<Bytes> = truncate_stream(source, 4)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(collected, vec![Bytes::from_static(b"abc"), Bytes::from_static(b"d")]);
    }
}
