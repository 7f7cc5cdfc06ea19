use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::OnceCell;

use crate::app::config::BackendConfig;
use crate::app::errors::{AppError, AppResult, Subsystem, SubsystemFailure};
use crate::app::transports::TransportFactory;
use crate::auth::AuthClient;
use crate::firestore::{DatabaseId, FirestoreClient};
use crate::storage::StorageClient;

/// A named, live connection context. Subsystem clients are created on first use and
/// shared by every caller of the same instance.
#[derive(Clone)]
pub struct AppInstance {
    inner: Arc<AppInner>,
}

struct AppInner {
    name: String,
    config: BackendConfig,
    transports: Arc<dyn TransportFactory>,
    firestore: OnceCell<FirestoreClient>,
    storage: OnceCell<StorageClient>,
    auth: OnceCell<AuthClient>,
    // Held while a client is built or the instance is being marked deleted.
    lifecycle: Mutex<()>,
    deleted: AtomicBool,
}

impl fmt::Debug for AppInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppInstance")
            .field("name", &self.inner.name)
            .field("project_id", &self.inner.config.project_id)
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

impl AppInstance {
    pub(crate) fn new(config: BackendConfig, transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            inner: Arc::new(AppInner {
                name: config.app_name().to_string(),
                config,
                transports,
                firestore: OnceCell::new(),
                storage: OnceCell::new(),
                auth: OnceCell::new(),
                lifecycle: Mutex::new(()),
                deleted: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &BackendConfig {
        &self.inner.config
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.deleted.load(Ordering::SeqCst)
    }

    pub(crate) fn same_instance(&self, other: &AppInstance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn firestore(&self) -> AppResult<FirestoreClient> {
        let _guard = self.live()?;
        self.inner
            .firestore
            .get_or_try_init(|| -> AppResult<FirestoreClient> {
                let config = &self.inner.config;
                let database_id = DatabaseId::for_project(&config.project_id)
                    .map_err(|err| init_error(Subsystem::Firestore, err))?;
                let datastore = self
                    .inner
                    .transports
                    .datastore(config)
                    .map_err(|err| init_error(Subsystem::Firestore, err))?;
                Ok(FirestoreClient::new(database_id, datastore))
            })
            .cloned()
    }

    /// Fails when the configuration names no storage bucket.
    pub fn storage(&self) -> AppResult<StorageClient> {
        let _guard = self.live()?;
        self.inner
            .storage
            .get_or_try_init(|| -> AppResult<StorageClient> {
                let config = &self.inner.config;
                let bucket = config.storage_bucket.clone().ok_or_else(|| AppError::SubsystemInit {
                    subsystem: Subsystem::Storage,
                    message: "no storageBucket configured".to_string(),
                })?;
                let backend = self
                    .inner
                    .transports
                    .storage_backend(config)
                    .map_err(|err| init_error(Subsystem::Storage, err))?;
                Ok(StorageClient::new(bucket, backend))
            })
            .cloned()
    }

    pub fn auth(&self) -> AppResult<AuthClient> {
        let _guard = self.live()?;
        self.inner
            .auth
            .get_or_try_init(|| -> AppResult<AuthClient> {
                let backend = self
                    .inner
                    .transports
                    .auth_backend(&self.inner.config)
                    .map_err(|err| init_error(Subsystem::Auth, err))?;
                Ok(AuthClient::new(backend))
            })
            .cloned()
    }

    fn live(&self) -> AppResult<MutexGuard<'_, ()>> {
        let guard = self.lock_lifecycle();
        if self.is_deleted() {
            return Err(AppError::AppDeleted {
                app_name: self.inner.name.clone(),
            });
        }
        Ok(guard)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Marks the instance deleted and releases every subsystem that was started.
    /// Returns `false` when the instance had already been released.
    pub(crate) async fn release(&self) -> Result<bool, Vec<SubsystemFailure>> {
        {
            let _guard = self.lock_lifecycle();
            if self.inner.deleted.swap(true, Ordering::SeqCst) {
                return Ok(false);
            }
        }

        let mut failures = Vec::new();
        if let Some(client) = self.inner.firestore.get() {
            if let Err(err) = client.terminate().await {
                failures.push(failure(Subsystem::Firestore, err));
            }
        }
        if let Some(client) = self.inner.storage.get() {
            if let Err(err) = client.terminate().await {
                failures.push(failure(Subsystem::Storage, err));
            }
        }
        if let Some(client) = self.inner.auth.get() {
            if let Err(err) = client.terminate().await {
                failures.push(failure(Subsystem::Auth, err));
            }
        }

        if failures.is_empty() {
            Ok(true)
        } else {
            Err(failures)
        }
    }
}

fn init_error(subsystem: Subsystem, err: impl fmt::Display) -> AppError {
    AppError::SubsystemInit {
        subsystem,
        message: err.to_string(),
    }
}

fn failure(subsystem: Subsystem, err: impl fmt::Display) -> SubsystemFailure {
    SubsystemFailure {
        subsystem,
        message: err.to_string(),
    }
}
