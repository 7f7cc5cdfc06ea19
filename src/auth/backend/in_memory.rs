use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};

use crate::auth::error::{
    email_already_in_use, invalid_email, user_not_found, weak_password, wrong_password,
    AuthResult,
};
use crate::auth::model::{UserInfo, ANONYMOUS_PROVIDER_ID, PASSWORD_PROVIDER_ID};

use super::AuthBackend;

const UID_LENGTH: usize = 28;
const MIN_PASSWORD_LENGTH: usize = 6;

struct Account {
    uid: String,
    password_digest: String,
}

#[derive(Default)]
struct Accounts {
    by_email: HashMap<String, Account>,
    anonymous: Vec<String>,
}

/// Account store living in process memory.
#[derive(Clone, Default)]
pub struct InMemoryAuthBackend {
    accounts: Arc<Mutex<Accounts>>,
}

impl InMemoryAuthBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered accounts, anonymous ones included.
    pub fn account_count(&self) -> usize {
        let accounts = self.lock();
        accounts.by_email.len() + accounts.anonymous.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Accounts> {
        self.accounts.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

#[async_trait]
impl AuthBackend for InMemoryAuthBackend {
    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<UserInfo> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(weak_password(format!(
                "Password should be at least {MIN_PASSWORD_LENGTH} characters."
            )));
        }

        let mut accounts = self.lock();
        if accounts.by_email.contains_key(&email) {
            return Err(email_already_in_use(&email));
        }
        let uid = generate_uid();
        accounts.by_email.insert(
            email.clone(),
            Account {
                uid: uid.clone(),
                password_digest: digest(password),
            },
        );
        Ok(password_user(uid, email))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<UserInfo> {
        let email = normalize_email(email)?;
        let accounts = self.lock();
        let account = accounts
            .by_email
            .get(&email)
            .ok_or_else(|| user_not_found(&email))?;
        if account.password_digest != digest(password) {
            return Err(wrong_password());
        }
        Ok(password_user(account.uid.clone(), email))
    }

    async fn sign_in_anonymously(&self) -> AuthResult<UserInfo> {
        let uid = generate_uid();
        self.lock().anonymous.push(uid.clone());
        Ok(UserInfo {
            uid,
            email: None,
            display_name: None,
            is_anonymous: true,
            provider_id: ANONYMOUS_PROVIDER_ID.to_string(),
        })
    }
}

fn password_user(uid: String, email: String) -> UserInfo {
    UserInfo {
        uid,
        email: Some(email),
        display_name: None,
        is_anonymous: false,
        provider_id: PASSWORD_PROVIDER_ID.to_string(),
    }
}

fn normalize_email(email: &str) -> AuthResult<String> {
    let trimmed = email.trim();
    let valid = match trimmed.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !trimmed.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(invalid_email(email));
    }
    Ok(trimmed.to_ascii_lowercase())
}

fn digest(password: &str) -> String {
    let hash = Sha256::digest(password.as_bytes());
    hash.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn generate_uid() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(UID_LENGTH)
        .map(char::from)
        .collect()
}
