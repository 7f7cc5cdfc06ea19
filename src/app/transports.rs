use std::sync::Arc;

use crate::app::config::BackendConfig;
use crate::app::constants::EMULATOR_API_KEY;
use crate::auth::{AuthBackend, AuthError, AuthErrorCode, AuthResult, HttpAuthBackend, InMemoryAuthBackend};
use crate::firestore::remote::{Datastore, HttpDatastore, InMemoryDatastore};
use crate::firestore::{DatabaseId, FirestoreResult};
use crate::storage::{HttpStorageBackend, InMemoryStorageBackend, StorageBackend, StorageResult};

/// Decides which concrete transport each subsystem of an app talks through.
pub trait TransportFactory: Send + Sync + 'static {
    fn datastore(&self, config: &BackendConfig) -> FirestoreResult<Arc<dyn Datastore>>;

    fn storage_backend(&self, config: &BackendConfig) -> StorageResult<Arc<dyn StorageBackend>>;

    fn auth_backend(&self, config: &BackendConfig) -> AuthResult<Arc<dyn AuthBackend>>;
}

/// REST transports, switched to the local emulator per subsystem when configured.
#[derive(Clone, Debug, Default)]
pub struct RestTransports {
    client: Option<reqwest::Client>,
}

impl RestTransports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares one HTTP connection pool across every subsystem.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }
}

impl TransportFactory for RestTransports {
    fn datastore(&self, config: &BackendConfig) -> FirestoreResult<Arc<dyn Datastore>> {
        let mut builder = HttpDatastore::builder(DatabaseId::for_project(&config.project_id)?);
        if let Some(client) = &self.client {
            builder = builder.with_client(client.clone());
        }
        if let Some(api_key) = &config.api_key {
            builder = builder.with_api_key(api_key.clone());
        }
        if let Some(host) = config.firestore_emulator() {
            log::info!("firestore for app '{}' routed to emulator at {host}", config.app_name());
            builder = builder.with_emulator_host(host.address());
        }
        Ok(Arc::new(builder.build()?))
    }

    fn storage_backend(&self, config: &BackendConfig) -> StorageResult<Arc<dyn StorageBackend>> {
        let mut builder = HttpStorageBackend::builder();
        if let Some(client) = &self.client {
            builder = builder.with_client(client.clone());
        }
        if let Some(host) = config.storage_emulator() {
            log::info!("storage for app '{}' routed to emulator at {host}", config.app_name());
            builder = builder.with_emulator_host(host.address());
        }
        Ok(Arc::new(builder.build()?))
    }

    fn auth_backend(&self, config: &BackendConfig) -> AuthResult<Arc<dyn AuthBackend>> {
        let emulator = config.auth_emulator();
        let api_key = match (&config.api_key, emulator) {
            (Some(api_key), _) => api_key.clone(),
            (None, Some(_)) => EMULATOR_API_KEY.to_string(),
            (None, None) => {
                return Err(AuthError::new(
                    AuthErrorCode::InternalError,
                    "an API key is required to reach the identity backend",
                ))
            }
        };
        let mut builder = HttpAuthBackend::builder(api_key);
        if let Some(client) = &self.client {
            builder = builder.with_client(client.clone());
        }
        if let Some(url) = emulator {
            log::info!("auth for app '{}' routed to emulator at {url}", config.app_name());
            builder = builder.with_emulator_url(url);
        }
        Ok(Arc::new(builder.build()?))
    }
}

/// Process-local fakes; every app gets its own empty stores.
#[derive(Clone, Copy, Debug, Default)]
pub struct InMemoryTransports;

impl TransportFactory for InMemoryTransports {
    fn datastore(&self, _config: &BackendConfig) -> FirestoreResult<Arc<dyn Datastore>> {
        Ok(Arc::new(InMemoryDatastore::new()))
    }

    fn storage_backend(&self, _config: &BackendConfig) -> StorageResult<Arc<dyn StorageBackend>> {
        Ok(Arc::new(InMemoryStorageBackend::new()))
    }

    fn auth_backend(&self, _config: &BackendConfig) -> AuthResult<Arc<dyn AuthBackend>> {
        Ok(Arc::new(InMemoryAuthBackend::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::EmulatorConfig;
    use crate::storage::{Location, UploadMetadata};
    use bytes::Bytes;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn production_auth_requires_api_key() {
        let config = BackendConfig::new("demo");
        let err = RestTransports::new().auth_backend(&config).err().unwrap();
        assert_eq!(err.code, AuthErrorCode::InternalError);

        let emulated = config.with_emulator(EmulatorConfig::default().with_auth_url("http://localhost:9099"));
        assert!(RestTransports::new().auth_backend(&emulated).is_ok());
    }

    #[tokio::test]
    async fn storage_override_routes_only_storage_to_emulator() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v0/b/demo.appspot.com/o");
                then.status(200).json_body(json!({
                    "bucket": "demo.appspot.com",
                    "name": "a.txt",
                    "size": "2",
                    "generation": "1",
                    "metageneration": "1"
                }));
            })
            .await;

        let config = BackendConfig::new("demo")
            .with_storage_bucket("demo.appspot.com")
            .with_emulator(EmulatorConfig::default().with_storage(server.host(), server.port()));
        let transports = RestTransports::new();
        let backend = transports.storage_backend(&config).unwrap();
        backend
            .upload(
                &Location::new("demo.appspot.com", "a.txt"),
                Bytes::from_static(b"hi"),
                &UploadMetadata::default(),
            )
            .await
            .unwrap();
        mock.assert_async().await;

        // Firestore has no override and keeps its production transport.
        assert!(transports.datastore(&config).is_ok());
    }
}
