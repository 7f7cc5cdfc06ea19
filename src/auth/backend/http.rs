use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::auth::error::{
    internal_error, invalid_credential, network_request_failed, AuthError, AuthErrorCode,
    AuthResult,
};
use crate::auth::model::{UserInfo, ANONYMOUS_PROVIDER_ID, PASSWORD_PROVIDER_ID};

use super::AuthBackend;

const IDENTITY_TOOLKIT_HOST: &str = "identitytoolkit.googleapis.com";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend speaking the Identity Toolkit REST v1 API.
#[derive(Clone, Debug)]
pub struct HttpAuthBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Clone, Debug)]
pub struct HttpAuthBackendBuilder {
    api_key: String,
    client: Option<Client>,
    emulator_url: Option<String>,
    request_timeout: Duration,
}

impl HttpAuthBackendBuilder {
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Routes requests to an emulator, e.g. `http://localhost:9099`.
    pub fn with_emulator_url(mut self, url: impl Into<String>) -> Self {
        self.emulator_url = Some(url.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> AuthResult<HttpAuthBackend> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .timeout(self.request_timeout)
                .build()
                .map_err(|err| internal_error(err.to_string()))?,
        };
        let base_url = match self.emulator_url {
            Some(url) => format!("{}/{IDENTITY_TOOLKIT_HOST}/v1", url.trim_end_matches('/')),
            None => format!("https://{IDENTITY_TOOLKIT_HOST}/v1"),
        };
        Ok(HttpAuthBackend {
            client,
            base_url,
            api_key: self.api_key,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnonymousRequest {
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl HttpAuthBackend {
    pub fn builder(api_key: impl Into<String>) -> HttpAuthBackendBuilder {
        HttpAuthBackendBuilder {
            api_key: api_key.into(),
            client: None,
            emulator_url: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/accounts:{method}", self.base_url)
    }

    async fn post<B: Serialize + Sync>(&self, method: &str, body: &B) -> AuthResult<AccountResponse> {
        let response = self
            .client
            .post(self.endpoint(method))
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|err| network_request_failed(format!("identity request failed: {err}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<AccountResponse>()
                .await
                .map_err(|err| internal_error(format!("malformed identity response: {err}")));
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_error(status, &body))
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<UserInfo> {
        let request = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let account = self.post("signUp", &request).await?;
        Ok(password_user(account, email))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<UserInfo> {
        let request = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let account = self.post("signInWithPassword", &request).await?;
        Ok(password_user(account, email))
    }

    async fn sign_in_anonymously(&self) -> AuthResult<UserInfo> {
        let request = AnonymousRequest {
            return_secure_token: true,
        };
        let account = self.post("signUp", &request).await?;
        Ok(UserInfo {
            uid: account.local_id,
            email: None,
            display_name: account.display_name,
            is_anonymous: true,
            provider_id: ANONYMOUS_PROVIDER_ID.to_string(),
        })
    }
}

fn password_user(account: AccountResponse, email: &str) -> UserInfo {
    UserInfo {
        uid: account.local_id,
        email: account.email.or_else(|| Some(email.to_string())),
        display_name: account.display_name,
        is_anonymous: false,
        provider_id: PASSWORD_PROVIDER_ID.to_string(),
    }
}

fn map_error(status: StatusCode, body: &str) -> AuthError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .and_then(|error| error.message);
    let Some(message) = message else {
        if status.is_server_error() {
            return network_request_failed(format!("identity backend returned {status}"));
        }
        return internal_error(format!("request failed with status {status}: {body}"));
    };

    // WEAK_PASSWORD carries a detail after " : ".
    let (server_code, detail) = match message.split_once(" : ") {
        Some((code, detail)) => (code.trim(), Some(detail.trim().to_string())),
        None => (message.trim(), None),
    };
    let code = match server_code {
        "EMAIL_NOT_FOUND" => AuthErrorCode::UserNotFound,
        "INVALID_PASSWORD" => AuthErrorCode::WrongPassword,
        "INVALID_LOGIN_CREDENTIALS" => AuthErrorCode::InvalidCredential,
        "EMAIL_EXISTS" => AuthErrorCode::EmailAlreadyInUse,
        "INVALID_EMAIL" => AuthErrorCode::InvalidEmail,
        "WEAK_PASSWORD" => AuthErrorCode::WeakPassword,
        "OPERATION_NOT_ALLOWED" | "ADMIN_ONLY_OPERATION" => AuthErrorCode::OperationNotAllowed,
        _ if status == StatusCode::BAD_REQUEST => return invalid_credential(message),
        _ => return internal_error(message),
    };
    AuthError::new(code, detail.unwrap_or(message))
}
