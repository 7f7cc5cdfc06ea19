use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::Bytes;
use futures::stream;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::storage::error::{internal_error, invalid_argument, object_not_found, StorageResult};
use crate::storage::list::{ListOptions, ListResult};
use crate::storage::location::Location;
use crate::storage::metadata::{ObjectMetadata, SettableMetadata, UploadMetadata};
use crate::storage::path::last_component;
use crate::storage::reference::StorageReference;

use super::{ByteStream, ChunkStatus, StorageBackend};

const DEFAULT_PAGE_SIZE: usize = 1_000;

/// Process-local object store. Clones share the same objects.
#[derive(Clone, Default)]
pub struct InMemoryStorageBackend {
    state: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    objects: BTreeMap<Location, StoredObject>,
    sessions: HashMap<String, UploadSession>,
    next_generation: u64,
    next_session: u64,
}

struct StoredObject {
    data: Bytes,
    metadata: ObjectMetadata,
}

struct UploadSession {
    location: Location,
    metadata: UploadMetadata,
    total_bytes: u64,
    buffer: Vec<u8>,
}

impl InMemoryStorageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resumable sessions that are neither finalized nor canceled.
    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StoreState {
    fn store(&mut self, location: &Location, data: Bytes, upload: &UploadMetadata) -> ObjectMetadata {
        self.next_generation += 1;
        let now = chrono::Utc::now().to_rfc3339();
        let metadata = ObjectMetadata {
            bucket: location.bucket().to_string(),
            name: last_component(location.path()).to_string(),
            full_path: location.path().to_string(),
            size: data.len() as u64,
            generation: Some(self.next_generation.to_string()),
            metageneration: Some("1".to_string()),
            time_created: Some(now.clone()),
            updated: Some(now),
            md5_hash: upload.md5_hash.clone(),
            content_type: Some(upload.resolved_content_type().to_string()),
            cache_control: upload.cache_control.clone(),
            content_disposition: upload.content_disposition.clone(),
            content_encoding: upload.content_encoding.clone(),
            content_language: upload.content_language.clone(),
            custom_metadata: upload.custom_metadata.clone(),
            download_tokens: vec![generate_token()],
        };
        self.objects.insert(
            location.clone(),
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        metadata
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorageBackend {
    async fn upload(
        &self,
        location: &Location,
        data: Bytes,
        metadata: &UploadMetadata,
    ) -> StorageResult<ObjectMetadata> {
        Ok(self.lock().store(location, data, metadata))
    }

    async fn start_resumable(
        &self,
        location: &Location,
        total_bytes: u64,
        metadata: &UploadMetadata,
    ) -> StorageResult<String> {
        let mut state = self.lock();
        state.next_session += 1;
        let session = format!("in-memory-upload-{}", state.next_session);
        state.sessions.insert(
            session.clone(),
            UploadSession {
                location: location.clone(),
                metadata: metadata.clone(),
                total_bytes,
                buffer: Vec::new(),
            },
        );
        Ok(session)
    }

    async fn upload_chunk(
        &self,
        session: &str,
        offset: u64,
        chunk: Bytes,
        finalize: bool,
    ) -> StorageResult<ChunkStatus> {
        let mut state = self.lock();
        let upload = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| invalid_argument(format!("Unknown upload session '{session}'")))?;
        if offset != upload.buffer.len() as u64 {
            return Err(internal_error(format!(
                "chunk offset {offset} does not match {} received bytes",
                upload.buffer.len()
            )));
        }
        if offset + chunk.len() as u64 > upload.total_bytes {
            return Err(internal_error("chunk exceeds the declared upload size"));
        }
        upload.buffer.extend_from_slice(&chunk);
        let bytes_received = upload.buffer.len() as u64;
        if !finalize {
            return Ok(ChunkStatus {
                bytes_received,
                metadata: None,
            });
        }

        let upload = state
            .sessions
            .remove(session)
            .ok_or_else(|| internal_error("upload session vanished"))?;
        let metadata = state.store(&upload.location, Bytes::from(upload.buffer), &upload.metadata);
        Ok(ChunkStatus {
            bytes_received,
            metadata: Some(metadata),
        })
    }

    async fn cancel_resumable(&self, session: &str) -> StorageResult<()> {
        self.lock().sessions.remove(session);
        Ok(())
    }

    async fn get_metadata(&self, location: &Location) -> StorageResult<ObjectMetadata> {
        self.lock()
            .objects
            .get(location)
            .map(|object| object.metadata.clone())
            .ok_or_else(|| object_not_found(location.path()))
    }

    async fn update_metadata(
        &self,
        location: &Location,
        patch: &SettableMetadata,
    ) -> StorageResult<ObjectMetadata> {
        let mut state = self.lock();
        let object = state
            .objects
            .get_mut(location)
            .ok_or_else(|| object_not_found(location.path()))?;
        object.metadata.apply(patch);
        let metageneration = object
            .metadata
            .metageneration
            .as_deref()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        object.metadata.metageneration = Some((metageneration + 1).to_string());
        object.metadata.updated = Some(chrono::Utc::now().to_rfc3339());
        Ok(object.metadata.clone())
    }

    async fn download(
        &self,
        location: &Location,
        max_size: Option<u64>,
    ) -> StorageResult<ByteStream> {
        let mut data = self
            .lock()
            .objects
            .get(location)
            .map(|object| object.data.clone())
            .ok_or_else(|| object_not_found(location.path()))?;
        if let Some(max_size) = max_size {
            data.truncate(max_size.min(data.len() as u64) as usize);
        }
        Ok(Box::pin(stream::iter(vec![Ok::<_, std::io::Error>(data)])))
    }

    async fn delete(&self, location: &Location) -> StorageResult<()> {
        match self.lock().objects.remove(location) {
            Some(_) => Ok(()),
            None => Err(object_not_found(location.path())),
        }
    }

    async fn list(&self, location: &Location, options: &ListOptions) -> StorageResult<ListResult> {
        let start_after = options.page_token.as_deref().map(decode_token).transpose()?;
        let page_size = options
            .max_results
            .map_or(DEFAULT_PAGE_SIZE, |max| max as usize);
        let prefix = if location.is_root() {
            String::new()
        } else {
            format!("{}/", location.path())
        };

        // Object names and "directory" prefixes share one ordered namespace.
        let mut entries: BTreeSet<(String, bool)> = BTreeSet::new();
        {
            let state = self.lock();
            for key in state.objects.keys() {
                if key.bucket() != location.bucket() {
                    continue;
                }
                let Some(rest) = key.path().strip_prefix(prefix.as_str()) else {
                    continue;
                };
                match rest.split_once('/') {
                    Some((directory, _)) => {
                        entries.insert((format!("{prefix}{directory}"), true));
                    }
                    None => {
                        entries.insert((key.path().to_string(), false));
                    }
                }
            }
        }

        let mut remaining = entries
            .into_iter()
            .filter(|entry| start_after.as_ref().map_or(true, |last| entry > last))
            .peekable();
        let mut result = ListResult::default();
        let mut last = None;
        for (path, is_prefix) in remaining.by_ref().take(page_size) {
            let reference = StorageReference::new(location.bucket(), &path);
            if is_prefix {
                result.prefixes.push(reference);
            } else {
                result.items.push(reference);
            }
            last = Some((path, is_prefix));
        }
        if remaining.peek().is_some() {
            result.next_page_token = last.map(|(path, is_prefix)| encode_token(&path, is_prefix));
        }
        Ok(result)
    }
}

// An object and a prefix may share a path, so the token carries the entry kind.
fn encode_token(path: &str, is_prefix: bool) -> String {
    let kind = if is_prefix { '1' } else { '0' };
    URL_SAFE_NO_PAD.encode(format!("{kind}{path}"))
}

fn decode_token(token: &str) -> StorageResult<(String, bool)> {
    let decoded = URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());
    let text = decoded.unwrap_or_default();
    if let Some(path) = text.strip_prefix('0') {
        Ok((path.to_string(), false))
    } else if let Some(path) = text.strip_prefix('1') {
        Ok((path.to_string(), true))
    } else {
        Err(invalid_argument("Invalid list page token"))
    }
}

fn generate_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn location(path: &str) -> Location {
        Location::new("bucket", path)
    }

    async fn read_all(backend: &InMemoryStorageBackend, path: &str) -> StorageResult<Vec<u8>> {
        let stream = backend.download(&location(path), None).await?;
        let chunks: Vec<Bytes> = stream.try_collect().await.map_err(|err| internal_error(err.to_string()))?;
        Ok(chunks.concat())
    }

    #[tokio::test]
    async fn upload_then_download_and_delete() {
        let backend = InMemoryStorageBackend::new();
        let metadata = backend
            .upload(&location("a/b.txt"), Bytes::from_static(b"hello"), &UploadMetadata::new())
            .await
            .unwrap();
        assert_eq!(metadata.size, 5);
        assert_eq!(metadata.content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(metadata.download_tokens.len(), 1);
        assert_eq!(read_all(&backend, "a/b.txt").await.unwrap(), b"hello");

        backend.delete(&location("a/b.txt")).await.unwrap();
        let err = read_all(&backend, "a/b.txt").await.unwrap_err();
        assert_eq!(err.code_str(), "storage/object-not-found");
        assert!(backend.delete(&location("a/b.txt")).await.is_err());
    }

    #[tokio::test]
    async fn resumable_session_assembles_chunks() {
        let backend = InMemoryStorageBackend::new();
        let session = backend
            .start_resumable(&location("big.bin"), 6, &UploadMetadata::new())
            .await
            .unwrap();
        let status = backend
            .upload_chunk(&session, 0, Bytes::from_static(b"abc"), false)
            .await
            .unwrap();
        assert_eq!(status.bytes_received, 3);
        assert!(status.metadata.is_none());

        let err = backend
            .upload_chunk(&session, 1, Bytes::from_static(b"xyz"), false)
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "storage/internal-error");

        let status = backend
            .upload_chunk(&session, 3, Bytes::from_static(b"def"), true)
            .await
            .unwrap();
        assert_eq!(status.metadata.unwrap().size, 6);
        assert_eq!(backend.open_sessions(), 0);
        assert_eq!(read_all(&backend, "big.bin").await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn list_separates_prefixes_and_pages() {
        let backend = InMemoryStorageBackend::new();
        for path in ["docs/a", "docs/b", "docs/c", "docs/nested/x", "other/y"] {
            backend
                .upload(&location(path), Bytes::from_static(b"1"), &UploadMetadata::new())
                .await
                .unwrap();
        }

        let all = backend.list(&location("docs"), &ListOptions::default()).await.unwrap();
        let names: Vec<&str> = all.items.iter().map(|item| item.full_path()).collect();
        assert_eq!(names, vec!["docs/a", "docs/b", "docs/c"]);
        assert_eq!(all.prefixes[0].full_path(), "docs/nested");
        assert!(all.next_page_token.is_none());

        let first = backend
            .list(&location("docs"), &ListOptions::with_max_results(2))
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        let token = first.next_page_token.unwrap();
        let second = backend
            .list(&location("docs"), &ListOptions::with_max_results(2).page_token(token))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.prefixes.len(), 1);
        assert!(second.next_page_token.is_none());
    }

    #[tokio::test]
    async fn paging_keeps_prefix_sharing_an_object_name() {
        let backend = InMemoryStorageBackend::new();
        for path in ["docs/a", "docs/a/inner", "docs/b"] {
            backend
                .upload(&location(path), Bytes::from_static(b"1"), &UploadMetadata::new())
                .await
                .unwrap();
        }

        let mut items = Vec::new();
        let mut prefixes = Vec::new();
        let mut token = None;
        loop {
            let mut options = ListOptions::with_max_results(1);
            if let Some(token) = token.take() {
                options = options.page_token(token);
            }
            let page = backend.list(&location("docs"), &options).await.unwrap();
            items.extend(page.items.iter().map(|item| item.full_path().to_string()));
            prefixes.extend(page.prefixes.iter().map(|prefix| prefix.full_path().to_string()));
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        assert_eq!(items, vec!["docs/a", "docs/b"]);
        assert_eq!(prefixes, vec!["docs/a"]);
    }

    #[tokio::test]
    async fn malformed_page_token_is_rejected() {
        let backend = InMemoryStorageBackend::new();
        let options = ListOptions::with_max_results(1).page_token(URL_SAFE_NO_PAD.encode("xdocs/a"));
        let err = backend.list(&location("docs"), &options).await.unwrap_err();
        assert_eq!(err.code_str(), "storage/invalid-argument");
    }
}
