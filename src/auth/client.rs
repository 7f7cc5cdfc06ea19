use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_lock::Mutex;
use tokio::sync::watch;

use crate::auth::backend::{AuthBackend, InMemoryAuthBackend};
use crate::auth::error::{app_deleted, AuthResult};
use crate::auth::model::{OperationType, UserCredential, UserInfo};

/// Session client for email/password and anonymous accounts.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    backend: Arc<dyn AuthBackend>,
    current_user: watch::Sender<Option<UserInfo>>,
    // Serializes sign-in/sign-out so observers see transitions in call order.
    transitions: Mutex<()>,
    terminated: AtomicBool,
}

impl AuthClient {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        let (current_user, _) = watch::channel(None);
        Self {
            inner: Arc::new(AuthInner {
                backend,
                current_user,
                transitions: Mutex::new(()),
                terminated: AtomicBool::new(false),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryAuthBackend::new()))
    }

    pub async fn create_user_with_email_and_password(
        &self,
        email: &str,
        password: &str,
    ) -> AuthResult<UserCredential> {
        let _guard = self.inner.transitions.lock().await;
        let user = self.backend()?.sign_up(email, password).await?;
        Ok(self.establish(user, OperationType::SignUp))
    }

    /// Fails with `auth/user-not-found`, `auth/wrong-password` or
    /// `auth/invalid-credential` when the credentials do not match an account.
    pub async fn sign_in_with_email_and_password(
        &self,
        email: &str,
        password: &str,
    ) -> AuthResult<UserCredential> {
        let _guard = self.inner.transitions.lock().await;
        let user = self.backend()?.sign_in_with_password(email, password).await?;
        Ok(self.establish(user, OperationType::SignIn))
    }

    pub async fn sign_in_anonymously(&self) -> AuthResult<UserCredential> {
        let _guard = self.inner.transitions.lock().await;
        // An anonymous session is reused rather than minting another account.
        if let Some(user) = self.current_user().filter(|user| user.is_anonymous) {
            return Ok(UserCredential::new(user, OperationType::SignIn));
        }
        let user = self.backend()?.sign_in_anonymously().await?;
        Ok(self.establish(user, OperationType::SignIn))
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        let _guard = self.inner.transitions.lock().await;
        self.backend()?;
        if self.inner.current_user.send_replace(None).is_some() {
            log::debug!("signed out");
        }
        Ok(())
    }

    pub fn current_user(&self) -> Option<UserInfo> {
        self.inner.current_user.borrow().clone()
    }

    /// Receiver observing every change of the signed-in user.
    pub fn on_auth_state_changed(&self) -> watch::Receiver<Option<UserInfo>> {
        self.inner.current_user.subscribe()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Drops the session and releases the backend. Later calls fail with
    /// `auth/app-deleted`; terminating twice is a no-op.
    pub async fn terminate(&self) -> AuthResult<()> {
        let _guard = self.inner.transitions.lock().await;
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.current_user.send_replace(None);
        self.inner.backend.terminate().await
    }

    fn backend(&self) -> AuthResult<&Arc<dyn AuthBackend>> {
        if self.is_terminated() {
            return Err(app_deleted());
        }
        Ok(&self.inner.backend)
    }

    fn establish(&self, user: UserInfo, operation_type: OperationType) -> UserCredential {
        log::debug!("signed in as {}", user.uid);
        self.inner.current_user.send_replace(Some(user.clone()));
        UserCredential::new(user, operation_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::error::{internal_error, AuthErrorCode};
    use async_trait::async_trait;

    #[tokio::test]
    async fn create_user_signs_in() {
        let auth = AuthClient::in_memory();
        let credential = auth
            .create_user_with_email_and_password("ada@example.com", "secret1")
            .await
            .unwrap();

        assert_eq!(credential.operation_type, OperationType::SignUp);
        assert_eq!(credential.provider_id.as_deref(), Some("password"));
        assert_eq!(auth.current_user(), Some(credential.user));
    }

    #[tokio::test]
    async fn failed_sign_in_keeps_previous_session() {
        let auth = AuthClient::in_memory();
        auth.create_user_with_email_and_password("ada@example.com", "secret1")
            .await
            .unwrap();

        let err = auth
            .sign_in_with_email_and_password("ada@example.com", "wrong-pass")
            .await
            .unwrap_err();
        assert_eq!(err.code, AuthErrorCode::WrongPassword);
        assert_eq!(
            auth.current_user().and_then(|user| user.email).as_deref(),
            Some("ada@example.com")
        );
    }

    #[tokio::test]
    async fn sign_out_clears_current_user_and_notifies() {
        let auth = AuthClient::in_memory();
        let mut changes = auth.on_auth_state_changed();
        auth.sign_in_anonymously().await.unwrap();
        changes.changed().await.unwrap();
        assert!(changes.borrow().as_ref().is_some_and(|user| user.is_anonymous));

        auth.sign_out().await.unwrap();
        changes.changed().await.unwrap();
        assert!(changes.borrow().is_none());
        assert!(auth.current_user().is_none());
    }

    #[tokio::test]
    async fn repeated_anonymous_sign_in_reuses_session() {
        let backend = InMemoryAuthBackend::new();
        let auth = AuthClient::new(Arc::new(backend.clone()));
        let first = auth.sign_in_anonymously().await.unwrap();
        let second = auth.sign_in_anonymously().await.unwrap();
        assert_eq!(first.user.uid, second.user.uid);
        assert_eq!(first.provider_id, None);
        assert_eq!(backend.account_count(), 1);
    }

    #[tokio::test]
    async fn operations_fail_after_terminate() {
        let auth = AuthClient::in_memory();
        auth.sign_in_anonymously().await.unwrap();
        auth.terminate().await.unwrap();
        auth.terminate().await.unwrap();

        assert!(auth.current_user().is_none());
        let err = auth.sign_in_anonymously().await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::AppDeleted);
    }

    struct FailingShutdown;

    #[async_trait]
    impl AuthBackend for FailingShutdown {
        async fn sign_up(&self, _: &str, _: &str) -> AuthResult<UserInfo> {
            Err(internal_error("unused"))
        }

        async fn sign_in_with_password(&self, _: &str, _: &str) -> AuthResult<UserInfo> {
            Err(internal_error("unused"))
        }

        async fn sign_in_anonymously(&self) -> AuthResult<UserInfo> {
            Err(internal_error("unused"))
        }

        async fn terminate(&self) -> AuthResult<()> {
            Err(internal_error("connection reset"))
        }
    }

    #[tokio::test]
    async fn terminate_reports_backend_failure_once() {
        let auth = AuthClient::new(Arc::new(FailingShutdown));
        assert!(auth.terminate().await.is_err());
        assert!(auth.is_terminated());
        assert!(auth.terminate().await.is_ok());
    }
}
