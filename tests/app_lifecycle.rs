use std::sync::Arc;

use async_trait::async_trait;
use firebase_typed::app::{
    AppError, AppRegistry, BackendConfig, EmulatorConfig, EnvConfigProvider, InMemoryTransports,
    Subsystem, TransportFactory,
};
use firebase_typed::auth::{AuthBackend, AuthError, AuthErrorCode, AuthResult, UserInfo};
use firebase_typed::firestore::remote::Datastore;
use firebase_typed::firestore::FirestoreResult;
use firebase_typed::storage::{StorageBackend, StorageResult};

struct UnreachableIdentity;

#[async_trait]
impl AuthBackend for UnreachableIdentity {
    async fn sign_up(&self, _: &str, _: &str) -> AuthResult<UserInfo> {
        Err(offline())
    }

    async fn sign_in_with_password(&self, _: &str, _: &str) -> AuthResult<UserInfo> {
        Err(offline())
    }

    async fn sign_in_anonymously(&self) -> AuthResult<UserInfo> {
        Err(offline())
    }

    async fn terminate(&self) -> AuthResult<()> {
        Err(offline())
    }
}

fn offline() -> AuthError {
    AuthError::new(AuthErrorCode::NetworkRequestFailed, "identity backend offline")
}

/// In-memory stores with an identity backend that cannot be released.
struct BrokenIdentityTransports;

impl TransportFactory for BrokenIdentityTransports {
    fn datastore(&self, config: &BackendConfig) -> FirestoreResult<Arc<dyn Datastore>> {
        InMemoryTransports.datastore(config)
    }

    fn storage_backend(&self, config: &BackendConfig) -> StorageResult<Arc<dyn StorageBackend>> {
        InMemoryTransports.storage_backend(config)
    }

    fn auth_backend(&self, _: &BackendConfig) -> AuthResult<Arc<dyn AuthBackend>> {
        Ok(Arc::new(UnreachableIdentity))
    }
}

fn config(name: &str) -> BackendConfig {
    BackendConfig::new("demo")
        .with_name(name)
        .with_storage_bucket("demo.appspot.com")
}

#[tokio::test]
async fn broken_identity_still_releases_document_and_object_stores() {
    let registry = AppRegistry::with_transports(Arc::new(BrokenIdentityTransports));
    let app = registry.create(config("broken-identity")).unwrap();
    let firestore = app.firestore().unwrap();
    let storage = app.storage().unwrap();
    let auth = app.auth().unwrap();

    let err = registry.teardown(&app).await.unwrap_err();
    let AppError::Teardown { app_name, failures } = err else {
        panic!("expected a teardown error");
    };
    assert_eq!(app_name, "broken-identity");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].subsystem, Subsystem::Auth);
    assert!(failures[0].message.contains("auth/network-request-failed"));

    assert!(firestore.is_terminated());
    assert!(storage.is_terminated());
    assert!(auth.is_terminated());
    assert!(registry.get("broken-identity").is_none());

    // A second teardown is a no-op.
    registry.teardown(&app).await.unwrap();
}

#[tokio::test]
async fn duplicate_name_is_rejected_until_teardown() {
    let registry = AppRegistry::in_memory();
    let first = registry.create(config("orders")).unwrap();
    assert!(matches!(
        registry.create(config("orders")),
        Err(AppError::DuplicateApp { .. })
    ));

    registry.teardown(&first).await.unwrap();
    let second = registry.create(config("orders")).unwrap();
    assert!(!second.is_deleted());
    assert!(matches!(first.firestore(), Err(AppError::AppDeleted { .. })));
}

#[tokio::test]
async fn async_creation_uses_provider_configuration() {
    let registry = AppRegistry::in_memory();
    let provider = EnvConfigProvider::new().with_lookup(|key| match key {
        "FIREBASE_PROJECT_ID" => Some("env-project".to_string()),
        "FIREBASE_APP_NAME" => Some("from-env".to_string()),
        "FIREBASE_STORAGE_BUCKET" => Some("env-project.appspot.com".to_string()),
        _ => None,
    });

    let app = registry.create_async(&provider).await.unwrap();
    assert_eq!(app.name(), "from-env");
    assert_eq!(app.config().project_id, "env-project");
    assert_eq!(app.storage().unwrap().bucket(), "env-project.appspot.com");
}

#[tokio::test]
async fn apps_share_nothing_and_shut_down_together() {
    let registry = AppRegistry::in_memory();
    let left = registry.create(config("left")).unwrap();
    let right = registry.create(config("right")).unwrap();

    let doc = left.firestore().unwrap().doc(["cats/tom"]).unwrap();
    left.firestore()
        .unwrap()
        .set_doc(&doc, &Default::default())
        .await
        .unwrap();
    assert!(right.firestore().unwrap().get_doc(&doc).await.unwrap().is_none());

    let auth = left.auth().unwrap();
    auth.sign_in_anonymously().await.unwrap();
    assert!(auth.current_user().is_some());

    registry.teardown_all().await.unwrap();
    assert!(registry.is_empty());
    assert!(left.is_deleted() && right.is_deleted());
    assert!(auth.current_user().is_none());
}

#[test]
fn emulator_flag_in_json_enables_every_subsystem() {
    let config = BackendConfig::from_json_str(
        r#"{"appName":"local","projectId":"demo","storageBucket":"demo.appspot.com","emulator":true}"#,
    )
    .unwrap();
    assert_eq!(config.emulator, Some(EmulatorConfig::local_defaults()));

    // Routing to the emulator needs no API key for identity.
    let registry = AppRegistry::new();
    let app = registry.create(config).unwrap();
    assert!(app.auth().is_ok());
    assert!(app.firestore().is_ok());
    assert!(app.storage().is_ok());
}
