use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorCode {
    UserNotFound,
    WrongPassword,
    InvalidCredential,
    EmailAlreadyInUse,
    InvalidEmail,
    WeakPassword,
    OperationNotAllowed,
    NetworkRequestFailed,
    InternalError,
    AppDeleted,
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorCode::UserNotFound => "auth/user-not-found",
            AuthErrorCode::WrongPassword => "auth/wrong-password",
            AuthErrorCode::InvalidCredential => "auth/invalid-credential",
            AuthErrorCode::EmailAlreadyInUse => "auth/email-already-in-use",
            AuthErrorCode::InvalidEmail => "auth/invalid-email",
            AuthErrorCode::WeakPassword => "auth/weak-password",
            AuthErrorCode::OperationNotAllowed => "auth/operation-not-allowed",
            AuthErrorCode::NetworkRequestFailed => "auth/network-request-failed",
            AuthErrorCode::InternalError => "auth/internal-error",
            AuthErrorCode::AppDeleted => "auth/app-deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthError {
    pub code: AuthErrorCode,
    message: String,
}

impl AuthError {
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Rejected credentials, as opposed to transport or configuration failures.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self.code,
            AuthErrorCode::UserNotFound
                | AuthErrorCode::WrongPassword
                | AuthErrorCode::InvalidCredential
        )
    }
}

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for AuthError {}

pub type AuthResult<T> = Result<T, AuthError>;

pub fn user_not_found(email: &str) -> AuthError {
    AuthError::new(
        AuthErrorCode::UserNotFound,
        format!("No user is registered for '{email}'."),
    )
}

pub fn wrong_password() -> AuthError {
    AuthError::new(AuthErrorCode::WrongPassword, "The password is invalid.")
}

pub fn invalid_credential(message: impl Into<String>) -> AuthError {
    AuthError::new(AuthErrorCode::InvalidCredential, message)
}

pub fn email_already_in_use(email: &str) -> AuthError {
    AuthError::new(
        AuthErrorCode::EmailAlreadyInUse,
        format!("The email address '{email}' is already in use by another account."),
    )
}

pub fn invalid_email(email: &str) -> AuthError {
    AuthError::new(
        AuthErrorCode::InvalidEmail,
        format!("The email address '{email}' is badly formatted."),
    )
}

pub fn weak_password(message: impl Into<String>) -> AuthError {
    AuthError::new(AuthErrorCode::WeakPassword, message)
}

pub fn network_request_failed(message: impl Into<String>) -> AuthError {
    AuthError::new(AuthErrorCode::NetworkRequestFailed, message)
}

pub fn internal_error(message: impl Into<String>) -> AuthError {
    AuthError::new(AuthErrorCode::InternalError, message)
}

pub fn app_deleted() -> AuthError {
    AuthError::new(
        AuthErrorCode::AppDeleted,
        "The identity client has been terminated.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_appends_code() {
        let err = wrong_password();
        assert_eq!(
            err.to_string(),
            "The password is invalid. (auth/wrong-password)"
        );
    }

    #[test]
    fn credential_errors_are_classified() {
        assert!(user_not_found("a@b.c").is_credential_error());
        assert!(invalid_credential("bad").is_credential_error());
        assert!(!network_request_failed("offline").is_credential_error());
        assert!(!app_deleted().is_credential_error());
    }
}
