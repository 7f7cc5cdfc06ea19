use std::sync::{Arc, Mutex, MutexGuard};

use async_channel::{Receiver, Sender};
use bytes::Bytes;
use tokio::sync::watch;

use crate::platform::runtime::{sleep, spawn_detached};
use crate::storage::backend::{ChunkStatus, StorageBackend};
use crate::storage::constants::MAX_CHUNK_ATTEMPTS;
use crate::storage::error::{
    canceled, internal_error, retry_limit_exceeded, server_file_wrong_size, StorageError,
    StorageResult,
};
use crate::storage::metadata::{ObjectMetadata, UploadMetadata};
use crate::storage::reference::StorageReference;
use crate::util::BackoffConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadTaskState {
    Running,
    Paused,
    Success,
    Canceled,
    Error,
}

impl UploadTaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadTaskState::Success | UploadTaskState::Canceled | UploadTaskState::Error
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadSnapshot {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub state: UploadTaskState,
}

/// Outcome of a finished upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadResult {
    pub reference: StorageReference,
    pub metadata: ObjectMetadata,
}

#[derive(Clone, Debug)]
pub enum UploadEvent {
    /// Bytes were acknowledged or the task was paused/resumed.
    Progress(UploadSnapshot),
    Completed(UploadResult),
    Failed(StorageError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Cancel,
}

type Outcome = Option<Result<UploadResult, StorageError>>;

/// Handle to a resumable upload running in the background.
///
/// Progress is reported to every [`subscribe`](Self::subscribe)d receiver. Once the
/// task is canceled no further event is delivered and the receivers are closed.
#[derive(Clone)]
pub struct UploadTask {
    shared: Arc<TaskShared>,
}

struct TaskShared {
    reference: StorageReference,
    progress: Mutex<ProgressState>,
    control: watch::Sender<Control>,
    outcome: watch::Sender<Outcome>,
}

struct ProgressState {
    snapshot: UploadSnapshot,
    subscribers: Vec<Sender<UploadEvent>>,
}

pub(crate) struct UploadJob {
    pub backend: Arc<dyn StorageBackend>,
    pub reference: StorageReference,
    pub data: Bytes,
    pub metadata: UploadMetadata,
    pub chunk_size: usize,
    pub backoff: BackoffConfig,
}

impl UploadTask {
    /// Spawns the upload and returns immediately.
    pub(crate) fn start(job: UploadJob) -> Self {
        let (control, _) = watch::channel(Control::Run);
        let (outcome, _) = watch::channel(None);
        let task = UploadTask {
            shared: Arc::new(TaskShared {
                reference: job.reference.clone(),
                progress: Mutex::new(ProgressState {
                    snapshot: UploadSnapshot {
                        bytes_transferred: 0,
                        total_bytes: job.data.len() as u64,
                        state: UploadTaskState::Running,
                    },
                    subscribers: Vec::new(),
                }),
                control,
                outcome,
            }),
        };
        let shared = Arc::clone(&task.shared);
        spawn_detached(async move { drive(shared, job).await });
        task
    }

    pub fn reference(&self) -> &StorageReference {
        &self.shared.reference
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        self.shared.lock().snapshot
    }

    /// Receives every event emitted from now on. A receiver obtained after the task
    /// finished gets the final event only.
    pub fn subscribe(&self) -> Receiver<UploadEvent> {
        let (tx, rx) = async_channel::unbounded();
        let mut progress = self.shared.lock();
        match progress.snapshot.state {
            UploadTaskState::Running | UploadTaskState::Paused => progress.subscribers.push(tx),
            UploadTaskState::Success | UploadTaskState::Error => {
                if let Some(event) = self.final_event() {
                    let _ = tx.try_send(event);
                }
            }
            UploadTaskState::Canceled => {}
        }
        rx
    }

    /// Suspends the upload after the chunk in flight; returns `false` if it was not running.
    pub fn pause(&self) -> bool {
        self.transition(UploadTaskState::Running, UploadTaskState::Paused, Control::Pause)
    }

    pub fn resume(&self) -> bool {
        self.transition(UploadTaskState::Paused, UploadTaskState::Running, Control::Run)
    }

    /// Cancels the upload. Returns `false` if the task already reached a terminal state.
    pub fn cancel(&self) -> bool {
        {
            let mut progress = self.shared.lock();
            if progress.snapshot.state.is_terminal() {
                return false;
            }
            progress.snapshot.state = UploadTaskState::Canceled;
            progress.subscribers.clear();
            self.shared.outcome.send_replace(Some(Err(canceled())));
            self.shared.control.send_replace(Control::Cancel);
        }
        log::info!("upload to {} canceled", self.shared.reference);
        true
    }

    /// Waits for the terminal state.
    pub async fn wait(&self) -> StorageResult<UploadResult> {
        let mut outcome = self.shared.outcome.subscribe();
        loop {
            let current = outcome.borrow_and_update().clone();
            if let Some(result) = current {
                return result;
            }
            if outcome.changed().await.is_err() {
                return Err(internal_error("upload task was dropped"));
            }
        }
    }

    fn final_event(&self) -> Option<UploadEvent> {
        match self.shared.outcome.borrow().clone()? {
            Ok(result) => Some(UploadEvent::Completed(result)),
            Err(err) => Some(UploadEvent::Failed(err)),
        }
    }

    fn transition(&self, from: UploadTaskState, to: UploadTaskState, control: Control) -> bool {
        let mut progress = self.shared.lock();
        if progress.snapshot.state != from {
            return false;
        }
        progress.snapshot.state = to;
        let event = UploadEvent::Progress(progress.snapshot);
        progress.broadcast(event);
        self.shared.control.send_replace(control);
        true
    }
}

impl TaskShared {
    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_canceled(&self) -> bool {
        *self.control.borrow() == Control::Cancel
    }

    fn record_progress(&self, bytes_transferred: u64) {
        let mut progress = self.lock();
        if progress.snapshot.state.is_terminal() {
            return;
        }
        progress.snapshot.bytes_transferred = bytes_transferred;
        let event = UploadEvent::Progress(progress.snapshot);
        progress.broadcast(event);
    }

    // The outcome is published under the progress lock so late subscribers never
    // observe a terminal state without its final event.
    fn finish(&self, result: Result<UploadResult, StorageError>) {
        {
            let mut progress = self.lock();
            if progress.snapshot.state.is_terminal() {
                return;
            }
            let event = match &result {
                Ok(done) => {
                    progress.snapshot.state = UploadTaskState::Success;
                    progress.snapshot.bytes_transferred = progress.snapshot.total_bytes;
                    UploadEvent::Completed(done.clone())
                }
                Err(err) => {
                    progress.snapshot.state = UploadTaskState::Error;
                    UploadEvent::Failed(err.clone())
                }
            };
            progress.broadcast(event);
            progress.subscribers.clear();
            self.outcome.send_replace(Some(result));
        }
    }
}

impl ProgressState {
    fn broadcast(&mut self, event: UploadEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.try_send(event.clone()).is_ok());
    }
}

async fn drive(shared: Arc<TaskShared>, job: UploadJob) {
    let mut control = shared.control.subscribe();
    let total_bytes = job.data.len() as u64;
    let location = job.reference.location().clone();

    let session = match job
        .backend
        .start_resumable(&location, total_bytes, &job.metadata)
        .await
    {
        Ok(session) => session,
        Err(err) => return shared.finish(Err(err)),
    };

    let chunk_size = job.chunk_size.max(1);
    let mut offset = 0usize;
    loop {
        if !wait_until_runnable(&mut control).await {
            abandon(job.backend.as_ref(), &session).await;
            return;
        }

        let end = (offset + chunk_size).min(job.data.len());
        let finalize = end == job.data.len();
        let chunk = job.data.slice(offset..end);
        let status = upload_chunk(&job, &session, offset as u64, chunk, finalize).await;
        if shared.is_canceled() {
            abandon(job.backend.as_ref(), &session).await;
            return;
        }

        match status {
            Err(err) => return shared.finish(Err(err)),
            Ok(ChunkStatus {
                metadata: Some(metadata),
                ..
            }) => {
                let result = if metadata.size == total_bytes {
                    Ok(UploadResult {
                        reference: job.reference.clone(),
                        metadata,
                    })
                } else {
                    Err(server_file_wrong_size(total_bytes, metadata.size))
                };
                return shared.finish(result);
            }
            Ok(ChunkStatus { bytes_received, .. }) => {
                if finalize {
                    return shared.finish(Err(internal_error(
                        "resumable upload finalized without object metadata",
                    )));
                }
                // The acknowledged count must advance and stay within the payload.
                let received = usize::try_from(bytes_received).unwrap_or(usize::MAX);
                if received <= offset || received > job.data.len() {
                    abandon(job.backend.as_ref(), &session).await;
                    return shared.finish(Err(internal_error(format!(
                        "resumable upload acknowledged {bytes_received} bytes after offset {offset} of {total_bytes}"
                    ))));
                }
                shared.record_progress(bytes_received);
                offset = received;
            }
        }
    }
}

async fn upload_chunk(
    job: &UploadJob,
    session: &str,
    offset: u64,
    chunk: Bytes,
    finalize: bool,
) -> StorageResult<ChunkStatus> {
    let mut attempt = 0;
    loop {
        match job
            .backend
            .upload_chunk(session, offset, chunk.clone(), finalize)
            .await
        {
            Ok(status) => return Ok(status),
            Err(err) if err.is_retryable() => {
                attempt += 1;
                if attempt >= MAX_CHUNK_ATTEMPTS {
                    return Err(retry_limit_exceeded().with_server_response(err.to_string()));
                }
                log::debug!(
                    "retrying chunk at offset {offset} for {} (attempt {attempt}): {err}",
                    job.reference
                );
                sleep(job.backoff.delay_for(attempt - 1)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Blocks while paused; `false` once the task is canceled.
async fn wait_until_runnable(control: &mut watch::Receiver<Control>) -> bool {
    loop {
        let current = *control.borrow_and_update();
        match current {
            Control::Run => return true,
            Control::Cancel => return false,
            Control::Pause => {}
        }
        if control.changed().await.is_err() {
            return false;
        }
    }
}

async fn abandon(backend: &dyn StorageBackend, session: &str) {
    if let Err(err) = backend.cancel_resumable(session).await {
        log::warn!("failed to cancel resumable upload session: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::InMemoryStorageBackend;
    use crate::storage::error::StorageErrorCode;
    use crate::storage::list::{ListOptions, ListResult};
    use crate::storage::location::Location;
    use crate::storage::metadata::SettableMetadata;
    use crate::storage::backend::ByteStream;
    use async_trait::async_trait;
    use std::time::Duration;

    fn job(backend: Arc<dyn StorageBackend>, size: usize, chunk_size: usize) -> UploadJob {
        UploadJob {
            backend,
            reference: StorageReference::new("bucket", "uploads/blob.bin"),
            data: Bytes::from(vec![7u8; size]),
            metadata: UploadMetadata::new(),
            chunk_size,
            backoff: BackoffConfig::with_interval(Duration::from_millis(1)),
        }
    }

    #[tokio::test]
    async fn uploads_in_chunks_and_reports_progress() {
        let backend = InMemoryStorageBackend::new();
        let task = UploadTask::start(job(Arc::new(backend.clone()), 10, 4));
        let events = task.subscribe();

        let result = task.wait().await.unwrap();
        assert_eq!(result.metadata.size, 10);
        assert_eq!(task.snapshot().state, UploadTaskState::Success);
        assert_eq!(task.snapshot().bytes_transferred, 10);
        assert_eq!(backend.len(), 1);

        let mut saw_completion = false;
        while let Ok(event) = events.recv().await {
            match event {
                UploadEvent::Progress(snapshot) => assert!(snapshot.bytes_transferred <= 10),
                UploadEvent::Completed(done) => {
                    assert_eq!(done.reference.full_path(), "uploads/blob.bin");
                    saw_completion = true;
                }
                UploadEvent::Failed(err) => panic!("unexpected failure: {err}"),
            }
        }
        assert!(saw_completion);

        let late = task.subscribe();
        assert!(matches!(late.recv().await, Ok(UploadEvent::Completed(_))));
    }

    #[tokio::test]
    async fn paused_task_waits_until_resumed() {
        let backend = InMemoryStorageBackend::new();
        let task = UploadTask::start(job(Arc::new(backend.clone()), 8, 1));
        assert!(task.pause());
        assert!(!task.pause());
        assert_eq!(task.snapshot().state, UploadTaskState::Paused);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(backend.is_empty());

        assert!(task.resume());
        task.wait().await.unwrap();
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn cancel_is_terminal_and_silent() {
        let backend = InMemoryStorageBackend::new();
        let task = UploadTask::start(job(Arc::new(backend.clone()), 64, 1));
        let events = task.subscribe();
        assert!(task.pause());
        assert!(task.cancel());
        assert!(!task.cancel());
        assert!(!task.resume());

        let err = task.wait().await.unwrap_err();
        assert_eq!(err.code, StorageErrorCode::Canceled);
        assert_eq!(task.snapshot().state, UploadTaskState::Canceled);

        // Only the pause notification was delivered before the channel closed.
        assert!(matches!(events.recv().await, Ok(UploadEvent::Progress(_))));
        assert!(events.recv().await.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(backend.is_empty());
        assert_eq!(backend.open_sessions(), 0);
    }

    /// Rejects every chunk with a server error, or acknowledges a fixed byte count.
    struct FlakyBackend {
        inner: InMemoryStorageBackend,
        acknowledged: Option<u64>,
    }

    #[async_trait]
    impl StorageBackend for FlakyBackend {
        async fn upload(
            &self,
            location: &Location,
            data: Bytes,
            metadata: &UploadMetadata,
        ) -> StorageResult<ObjectMetadata> {
            self.inner.upload(location, data, metadata).await
        }

        async fn start_resumable(
            &self,
            location: &Location,
            total_bytes: u64,
            metadata: &UploadMetadata,
        ) -> StorageResult<String> {
            self.inner.start_resumable(location, total_bytes, metadata).await
        }

        async fn upload_chunk(
            &self,
            _session: &str,
            _offset: u64,
            _chunk: Bytes,
            _finalize: bool,
        ) -> StorageResult<ChunkStatus> {
            match self.acknowledged {
                Some(bytes_received) => Ok(ChunkStatus {
                    bytes_received,
                    metadata: None,
                }),
                None => Err(crate::storage::error::unknown_error("unavailable").with_status(503)),
            }
        }

        async fn cancel_resumable(&self, session: &str) -> StorageResult<()> {
            self.inner.cancel_resumable(session).await
        }

        async fn get_metadata(&self, location: &Location) -> StorageResult<ObjectMetadata> {
            self.inner.get_metadata(location).await
        }

        async fn update_metadata(
            &self,
            location: &Location,
            patch: &SettableMetadata,
        ) -> StorageResult<ObjectMetadata> {
            self.inner.update_metadata(location, patch).await
        }

        async fn download(
            &self,
            location: &Location,
            max_size: Option<u64>,
        ) -> StorageResult<ByteStream> {
            self.inner.download(location, max_size).await
        }

        async fn delete(&self, location: &Location) -> StorageResult<()> {
            self.inner.delete(location).await
        }

        async fn list(
            &self,
            location: &Location,
            options: &ListOptions,
        ) -> StorageResult<ListResult> {
            self.inner.list(location, options).await
        }
    }

    #[tokio::test]
    async fn persistent_server_errors_exhaust_retries() {
        let backend = FlakyBackend {
            inner: InMemoryStorageBackend::new(),
            acknowledged: None,
        };
        let task = UploadTask::start(job(Arc::new(backend), 4, 2));
        let err = task.wait().await.unwrap_err();
        assert_eq!(err.code, StorageErrorCode::RetryLimitExceeded);
        assert_eq!(task.snapshot().state, UploadTaskState::Error);
    }

    #[tokio::test]
    async fn out_of_range_acknowledgement_fails_the_upload() {
        // Zero never advances past the first chunk; 100 overshoots the 8-byte payload.
        for acknowledged in [0, 100] {
            let inner = InMemoryStorageBackend::new();
            let backend = FlakyBackend {
                inner: inner.clone(),
                acknowledged: Some(acknowledged),
            };
            let task = UploadTask::start(job(Arc::new(backend), 8, 2));
            let err = tokio::time::timeout(Duration::from_secs(5), task.wait())
                .await
                .expect("upload task should settle")
                .unwrap_err();
            assert_eq!(err.code, StorageErrorCode::InternalError);
            assert_eq!(task.snapshot().state, UploadTaskState::Error);
            assert_eq!(inner.open_sessions(), 0);
        }
    }
}
