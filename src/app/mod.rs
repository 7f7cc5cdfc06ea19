//! Named app instances, their configuration and the transports behind them.
//!
//! ```rust,ignore
//! use firebase_typed::app::{AppRegistry, BackendConfig, EmulatorConfig};
//!
//! let registry = AppRegistry::new();
//! let app = registry.create(
//!     BackendConfig::new("demo-project")
//!         .with_storage_bucket("demo-project.appspot.com")
//!         .with_emulator(EmulatorConfig::local_defaults()),
//! )?;
//! let firestore = app.firestore()?;
//! // ...
//! registry.teardown_all().await?;
//! ```

mod config;
mod constants;
mod errors;
mod instance;
mod registry;
mod transports;

#[doc(inline)]
pub use config::{BackendConfig, ConfigProvider, EmulatorConfig, EmulatorHost, EnvConfigProvider};

#[doc(inline)]
pub use constants::{
    DEFAULT_AUTH_EMULATOR_URL, DEFAULT_ENTRY_NAME, DEFAULT_FIRESTORE_EMULATOR_HOST,
    DEFAULT_FIRESTORE_EMULATOR_PORT, DEFAULT_STORAGE_EMULATOR_HOST, DEFAULT_STORAGE_EMULATOR_PORT,
};

#[doc(inline)]
pub use errors::{AppError, AppResult, Subsystem, SubsystemFailure};

#[doc(inline)]
pub use instance::AppInstance;

#[doc(inline)]
pub use registry::AppRegistry;

#[doc(inline)]
pub use transports::{InMemoryTransports, RestTransports, TransportFactory};
