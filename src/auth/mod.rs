//! Email/password and anonymous sign-in with an observable session.
//!
//! ```rust,ignore
//! use firebase_typed::auth::AuthClient;
//!
//! let auth = AuthClient::in_memory();
//! auth.create_user_with_email_and_password("ada@example.com", "secret1").await?;
//! assert!(auth.current_user().is_some());
//! auth.sign_out().await?;
//! ```

pub mod backend;
mod client;
mod error;
mod model;

#[doc(inline)]
pub use backend::{AuthBackend, HttpAuthBackend, HttpAuthBackendBuilder, InMemoryAuthBackend};

#[doc(inline)]
pub use client::AuthClient;

#[doc(inline)]
pub use error::{AuthError, AuthErrorCode, AuthResult};

#[doc(inline)]
pub use model::{OperationType, UserCredential, UserInfo, ANONYMOUS_PROVIDER_ID, PASSWORD_PROVIDER_ID};
