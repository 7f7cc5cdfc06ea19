use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::app::constants::{
    DEFAULT_AUTH_EMULATOR_URL, DEFAULT_ENTRY_NAME, DEFAULT_FIRESTORE_EMULATOR_HOST,
    DEFAULT_FIRESTORE_EMULATOR_PORT, DEFAULT_STORAGE_EMULATOR_HOST, DEFAULT_STORAGE_EMULATOR_PORT,
};
use crate::app::errors::{AppError, AppResult};

/// Connection settings for one app instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(default, alias = "appName", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_bucket: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_emulator",
        skip_serializing_if = "Option::is_none"
    )]
    pub emulator: Option<EmulatorConfig>,
}

impl BackendConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    /// Parses the JSON form, e.g. `{"projectId": "demo", "emulator": true}`.
    pub fn from_json_str(json: &str) -> AppResult<Self> {
        serde_json::from_str(json).map_err(|err| AppError::InvalidConfig {
            message: err.to_string(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_auth_domain(mut self, auth_domain: impl Into<String>) -> Self {
        self.auth_domain = Some(auth_domain.into());
        self
    }

    pub fn with_storage_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.storage_bucket = Some(bucket.into());
        self
    }

    pub fn with_emulator(mut self, emulator: EmulatorConfig) -> Self {
        self.emulator = Some(emulator);
        self
    }

    /// Configured name, or `[DEFAULT]`.
    pub fn app_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_ENTRY_NAME)
    }

    pub(crate) fn validate(&self) -> AppResult<()> {
        if self.app_name().trim().is_empty() {
            return Err(AppError::BadAppName {
                app_name: self.app_name().to_string(),
            });
        }
        if self.project_id.trim().is_empty() {
            return Err(AppError::InvalidConfig {
                message: "projectId is required".to_string(),
            });
        }
        if let Some(auth_url) = self.auth_emulator() {
            let parsed = url::Url::parse(auth_url).map_err(|err| AppError::InvalidConfig {
                message: format!("emulator authUrl '{auth_url}' is not a URL: {err}"),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::InvalidConfig {
                    message: format!("emulator authUrl '{auth_url}' must use http or https"),
                });
            }
        }
        if let Some(bucket) = &self.storage_bucket {
            if bucket.trim().is_empty() || bucket.contains('/') {
                return Err(AppError::InvalidConfig {
                    message: format!("storageBucket '{bucket}' is not a bucket name"),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn firestore_emulator(&self) -> Option<&EmulatorHost> {
        self.emulator.as_ref().and_then(|emulator| emulator.firestore.as_ref())
    }

    pub(crate) fn storage_emulator(&self) -> Option<&EmulatorHost> {
        self.emulator.as_ref().and_then(|emulator| emulator.storage.as_ref())
    }

    pub(crate) fn auth_emulator(&self) -> Option<&str> {
        self.emulator.as_ref().and_then(|emulator| emulator.auth_url.as_deref())
    }
}

/// Per-subsystem emulator overrides; a subsystem without one talks to production.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmulatorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firestore: Option<EmulatorHost>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<EmulatorHost>,
}

impl EmulatorConfig {
    /// Every subsystem on the emulator suite's default ports.
    pub fn local_defaults() -> Self {
        Self {
            auth_url: Some(DEFAULT_AUTH_EMULATOR_URL.to_string()),
            firestore: Some(EmulatorHost::new(
                DEFAULT_FIRESTORE_EMULATOR_HOST,
                DEFAULT_FIRESTORE_EMULATOR_PORT,
            )),
            storage: Some(EmulatorHost::new(
                DEFAULT_STORAGE_EMULATOR_HOST,
                DEFAULT_STORAGE_EMULATOR_PORT,
            )),
        }
    }

    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = Some(url.into());
        self
    }

    pub fn with_firestore(mut self, host: impl Into<String>, port: u16) -> Self {
        self.firestore = Some(EmulatorHost::new(host, port));
        self
    }

    pub fn with_storage(mut self, host: impl Into<String>, port: u16) -> Self {
        self.storage = Some(EmulatorHost::new(host, port));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.auth_url.is_none() && self.firestore.is_none() && self.storage.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmulatorHost {
    pub host: String,
    pub port: u16,
}

impl EmulatorHost {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for EmulatorHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for EmulatorHost {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::InvalidConfig {
            message: format!("emulator host '{value}' must look like host:port"),
        };
        let (host, port) = value.trim().rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmulatorSetting {
    Enabled(bool),
    Detailed(EmulatorConfig),
}

fn deserialize_emulator<'de, D>(deserializer: D) -> Result<Option<EmulatorConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let setting = Option::<EmulatorSetting>::deserialize(deserializer)?;
    Ok(match setting {
        None | Some(EmulatorSetting::Enabled(false)) => None,
        Some(EmulatorSetting::Enabled(true)) => Some(EmulatorConfig::local_defaults()),
        Some(EmulatorSetting::Detailed(config)) => Some(config),
    })
}

/// Source of a [`BackendConfig`] resolved at app creation time.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn resolve(&self) -> AppResult<BackendConfig>;
}

#[async_trait]
impl ConfigProvider for BackendConfig {
    async fn resolve(&self) -> AppResult<BackendConfig> {
        Ok(self.clone())
    }
}

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads the configuration from `FIREBASE_*` environment variables.
///
/// | variable | field |
/// |---|---|
/// | `FIREBASE_PROJECT_ID` | `project_id` (required) |
/// | `FIREBASE_API_KEY` | `api_key` |
/// | `FIREBASE_AUTH_DOMAIN` | `auth_domain` |
/// | `FIREBASE_STORAGE_BUCKET` | `storage_bucket` |
/// | `FIREBASE_APP_NAME` | `name` |
/// | `FIREBASE_AUTH_EMULATOR_URL` | `emulator.auth_url` |
/// | `FIRESTORE_EMULATOR_HOST` | `emulator.firestore` (`host:port`) |
/// | `FIREBASE_STORAGE_EMULATOR_HOST` | `emulator.storage` (`host:port`) |
#[derive(Clone)]
pub struct EnvConfigProvider {
    prefix: String,
    lookup: Lookup,
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            lookup: Arc::new(|key| std::env::var(key).ok()),
        }
    }
}

impl fmt::Debug for EnvConfigProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvConfigProvider")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends `prefix` to every variable name, e.g. `TEST_FIREBASE_PROJECT_ID`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Replaces the process environment with `lookup`.
    pub fn with_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.lookup = Arc::new(lookup);
        self
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{}{name}", self.prefix))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn host_var(&self, name: &str) -> AppResult<Option<EmulatorHost>> {
        self.var(name)
            .map(|value| {
                value.parse::<EmulatorHost>().map_err(|err| AppError::ConfigResolution {
                    message: format!("{}{name}: {err}", self.prefix),
                })
            })
            .transpose()
    }
}

#[async_trait]
impl ConfigProvider for EnvConfigProvider {
    async fn resolve(&self) -> AppResult<BackendConfig> {
        let project_id = self
            .var("FIREBASE_PROJECT_ID")
            .ok_or_else(|| AppError::ConfigResolution {
                message: format!("{}FIREBASE_PROJECT_ID is not set", self.prefix),
            })?;

        let emulator = EmulatorConfig {
            auth_url: self.var("FIREBASE_AUTH_EMULATOR_URL"),
            firestore: self.host_var("FIRESTORE_EMULATOR_HOST")?,
            storage: self.host_var("FIREBASE_STORAGE_EMULATOR_HOST")?,
        };

        Ok(BackendConfig {
            name: self.var("FIREBASE_APP_NAME"),
            project_id,
            api_key: self.var("FIREBASE_API_KEY"),
            auth_domain: self.var("FIREBASE_AUTH_DOMAIN"),
            storage_bucket: self.var("FIREBASE_STORAGE_BUCKET"),
            emulator: (!emulator.is_empty()).then_some(emulator),
        })
    }
}
