use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;

use crate::app::config::{BackendConfig, ConfigProvider};
use crate::app::constants::DEFAULT_ENTRY_NAME;
use crate::app::errors::{AppError, AppResult};
use crate::app::instance::AppInstance;
use crate::app::transports::{InMemoryTransports, RestTransports, TransportFactory};

static GLOBAL: Lazy<AppRegistry> = Lazy::new(AppRegistry::new);

/// Owns every live [`AppInstance`], keyed by name.
///
/// Handles are cheap to clone and share one map; all mutation goes through that map's
/// lock, so concurrent `create` calls for the same name have exactly one winner.
#[derive(Clone)]
pub struct AppRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    apps: Mutex<HashMap<String, AppInstance>>,
    transports: Arc<dyn TransportFactory>,
}

impl Default for AppRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AppRegistry {
    /// Registry whose apps talk REST to production or to configured emulators.
    pub fn new() -> Self {
        Self::with_transports(Arc::new(RestTransports::new()))
    }

    /// Registry whose apps use process-local stores.
    pub fn in_memory() -> Self {
        Self::with_transports(Arc::new(InMemoryTransports))
    }

    pub fn with_transports(transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                apps: Mutex::new(HashMap::new()),
                transports,
            }),
        }
    }

    /// Process-wide registry for wiring layers that cannot thread a handle through.
    pub fn global() -> &'static AppRegistry {
        &GLOBAL
    }

    fn apps_guard(&self) -> MutexGuard<'_, HashMap<String, AppInstance>> {
        self.inner
            .apps
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn create(&self, config: BackendConfig) -> AppResult<AppInstance> {
        config.validate()?;
        let name = config.app_name().to_string();

        let instance = {
            let mut apps = self.apps_guard();
            if apps.contains_key(&name) {
                return Err(AppError::DuplicateApp { app_name: name });
            }
            let instance = AppInstance::new(config, Arc::clone(&self.inner.transports));
            apps.insert(name.clone(), instance.clone());
            instance
        };

        log::info!(
            "App {name} created for project {}",
            instance.config().project_id
        );
        if let Some(emulator) = &instance.config().emulator {
            log::debug!("App {name} emulator overrides: {emulator:?}");
        }
        Ok(instance)
    }

    /// Resolves the configuration through `provider`, then behaves like [`create`](Self::create).
    pub async fn create_async<P>(&self, provider: &P) -> AppResult<AppInstance>
    where
        P: ConfigProvider + ?Sized,
    {
        let config = provider.resolve().await.map_err(|err| match err {
            AppError::ConfigResolution { .. } => err,
            other => AppError::ConfigResolution {
                message: other.to_string(),
            },
        })?;
        self.create(config)
    }

    pub fn get(&self, name: &str) -> Option<AppInstance> {
        self.apps_guard().get(name).cloned()
    }

    pub fn get_default(&self) -> Option<AppInstance> {
        self.get(DEFAULT_ENTRY_NAME)
    }

    /// Live instances, sorted by name.
    pub fn apps(&self) -> Vec<AppInstance> {
        let mut apps: Vec<AppInstance> = self.apps_guard().values().cloned().collect();
        apps.sort_by(|left, right| left.name().cmp(right.name()));
        apps
    }

    pub fn len(&self) -> usize {
        self.apps_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps_guard().is_empty()
    }

    /// Releases every subsystem of `instance` and frees its name.
    ///
    /// Each subsystem is released even when another fails; failures come back together
    /// as [`AppError::Teardown`]. Tearing down an instance twice is a no-op.
    pub async fn teardown(&self, instance: &AppInstance) -> AppResult<()> {
        {
            let mut apps = self.apps_guard();
            if apps
                .get(instance.name())
                .is_some_and(|registered| registered.same_instance(instance))
            {
                apps.remove(instance.name());
            }
        }

        match instance.release().await {
            Ok(true) => {
                log::info!("App {} deleted successfully", instance.name());
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(failures) => {
                let err = AppError::Teardown {
                    app_name: instance.name().to_string(),
                    failures,
                };
                log::warn!("{err}");
                Err(err)
            }
        }
    }

    /// Tears down every live instance; meant to run once at shutdown.
    pub async fn teardown_all(&self) -> AppResult<()> {
        let mut failures = Vec::new();
        for instance in self.apps() {
            if let Err(err) = self.teardown(&instance).await {
                failures.push(err);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(AppError::TeardownAll { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::EnvConfigProvider;
    use crate::app::errors::Subsystem;
    use crate::auth::{
        AuthBackend, AuthError, AuthErrorCode, AuthResult, InMemoryAuthBackend, UserInfo,
    };
    use crate::firestore::remote::{Datastore, InMemoryDatastore};
    use crate::firestore::FirestoreResult;
    use crate::storage::{InMemoryStorageBackend, StorageBackend, StorageResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_APP: AtomicUsize = AtomicUsize::new(0);

    fn unique_config() -> BackendConfig {
        let id = NEXT_APP.fetch_add(1, Ordering::SeqCst);
        BackendConfig::new("demo")
            .with_name(format!("registry-test-{id}"))
            .with_storage_bucket("demo.appspot.com")
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = AppRegistry::in_memory();
        let config = unique_config();
        registry.create(config.clone()).unwrap();
        let err = registry.create(config).unwrap_err();
        assert!(matches!(err, AppError::DuplicateApp { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn default_name_is_used_when_unset() {
        let registry = AppRegistry::in_memory();
        registry.create(BackendConfig::new("demo")).unwrap();
        assert_eq!(registry.get_default().unwrap().name(), DEFAULT_ENTRY_NAME);
    }

    #[test]
    fn concurrent_creates_have_one_winner() {
        let registry = AppRegistry::in_memory();
        let config = unique_config();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let config = config.clone();
                std::thread::spawn(move || registry.create(config).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn clients_are_cached_per_instance() {
        let registry = AppRegistry::in_memory();
        let app = registry.create(unique_config()).unwrap();
        let first = app.firestore().unwrap();
        let second = app.firestore().unwrap();
        let reference = first.doc(["cats", "tom"]).unwrap();
        first
            .set_doc(&reference, &crate::firestore::MapValue::default())
            .await
            .unwrap();
        assert!(second.get_doc(&reference).await.unwrap().is_some());
    }

    #[test]
    fn storage_requires_a_bucket() {
        let registry = AppRegistry::in_memory();
        let app = registry.create(BackendConfig::new("demo").with_name("no-bucket")).unwrap();
        assert!(matches!(
            app.storage(),
            Err(AppError::SubsystemInit {
                subsystem: Subsystem::Storage,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn teardown_frees_name_and_is_idempotent() {
        let registry = AppRegistry::in_memory();
        let config = unique_config();
        let app = registry.create(config.clone()).unwrap();
        let firestore = app.firestore().unwrap();

        registry.teardown(&app).await.unwrap();
        registry.teardown(&app).await.unwrap();

        assert!(app.is_deleted());
        assert!(firestore.is_terminated());
        assert!(matches!(app.auth(), Err(AppError::AppDeleted { .. })));
        assert!(registry.get(app.name()).is_none());

        let recreated = registry.create(config).unwrap();
        registry.teardown(&app).await.unwrap();
        assert!(registry.get(recreated.name()).is_some());
    }

    struct BrokenAuth;

    #[async_trait]
    impl AuthBackend for BrokenAuth {
        async fn sign_up(&self, _: &str, _: &str) -> AuthResult<UserInfo> {
            InMemoryAuthBackend::new().sign_in_anonymously().await
        }

        async fn sign_in_with_password(&self, _: &str, _: &str) -> AuthResult<UserInfo> {
            InMemoryAuthBackend::new().sign_in_anonymously().await
        }

        async fn sign_in_anonymously(&self) -> AuthResult<UserInfo> {
            InMemoryAuthBackend::new().sign_in_anonymously().await
        }

        async fn terminate(&self) -> AuthResult<()> {
            Err(AuthError::new(AuthErrorCode::InternalError, "session store unreachable"))
        }
    }

    struct BrokenAuthTransports;

    impl TransportFactory for BrokenAuthTransports {
        fn datastore(&self, _: &BackendConfig) -> FirestoreResult<Arc<dyn Datastore>> {
            Ok(Arc::new(InMemoryDatastore::new()))
        }

        fn storage_backend(&self, _: &BackendConfig) -> StorageResult<Arc<dyn StorageBackend>> {
            Ok(Arc::new(InMemoryStorageBackend::new()))
        }

        fn auth_backend(&self, _: &BackendConfig) -> AuthResult<Arc<dyn AuthBackend>> {
            Ok(Arc::new(BrokenAuth))
        }
    }

    #[tokio::test]
    async fn broken_auth_does_not_block_sibling_teardown() {
        let registry = AppRegistry::with_transports(Arc::new(BrokenAuthTransports));
        let app = registry.create(unique_config()).unwrap();
        let firestore = app.firestore().unwrap();
        let storage = app.storage().unwrap();
        app.auth().unwrap();

        let err = registry.teardown(&app).await.unwrap_err();
        match err {
            AppError::Teardown { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].subsystem, Subsystem::Auth);
                assert!(failures[0].message.contains("session store unreachable"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(firestore.is_terminated());
        assert!(storage.is_terminated());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn teardown_all_aggregates_failures() {
        let registry = AppRegistry::with_transports(Arc::new(BrokenAuthTransports));
        for _ in 0..2 {
            registry.create(unique_config()).unwrap().auth().unwrap();
        }
        registry.create(unique_config()).unwrap();

        match registry.teardown_all().await {
            Err(AppError::TeardownAll { failures }) => assert_eq!(failures.len(), 2),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn create_async_wraps_resolution_failures() {
        let registry = AppRegistry::in_memory();
        let provider = EnvConfigProvider::new().with_lookup(|_| None);
        let err = registry.create_async(&provider).await.unwrap_err();
        assert!(matches!(err, AppError::ConfigResolution { .. }));

        let app = registry
            .create_async(&BackendConfig::new("demo").with_name("from-provider"))
            .await
            .unwrap();
        assert_eq!(app.name(), "from-provider");
    }
}
