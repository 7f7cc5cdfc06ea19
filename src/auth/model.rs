use serde::{Deserialize, Serialize};

pub const PASSWORD_PROVIDER_ID: &str = "password";
pub const ANONYMOUS_PROVIDER_ID: &str = "anonymous";

/// Profile of a signed-in account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub is_anonymous: bool,
    pub provider_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationType {
    SignIn,
    SignUp,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::SignIn => "signIn",
            OperationType::SignUp => "signUp",
        }
    }
}

/// Result of a successful sign-in or account creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserCredential {
    pub user: UserInfo,
    pub provider_id: Option<String>,
    pub operation_type: OperationType,
}

impl UserCredential {
    pub(crate) fn new(user: UserInfo, operation_type: OperationType) -> Self {
        let provider_id = if user.is_anonymous {
            None
        } else {
            Some(user.provider_id.clone())
        };
        Self {
            user,
            provider_id,
            operation_type,
        }
    }
}
