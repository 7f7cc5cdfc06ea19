//! Identity providers the auth client signs in against.

mod http;
mod in_memory;

use async_trait::async_trait;

use crate::auth::error::AuthResult;
use crate::auth::model::UserInfo;

pub use http::{HttpAuthBackend, HttpAuthBackendBuilder};
pub use in_memory::InMemoryAuthBackend;

#[async_trait]
pub trait AuthBackend: Send + Sync + 'static {
    /// Registers a new password account and returns its profile.
    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<UserInfo>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<UserInfo>;

    /// Creates a fresh anonymous account.
    async fn sign_in_anonymously(&self) -> AuthResult<UserInfo>;

    async fn terminate(&self) -> AuthResult<()> {
        Ok(())
    }
}
