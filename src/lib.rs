//! Typed clients for a document store, an object store and an identity backend,
//! grouped under named app instances.
//!
//! An [`app::AppRegistry`] owns one [`app::AppInstance`] per name. Each instance hands
//! out a [`firestore::FirestoreClient`], a [`storage::StorageClient`] and an
//! [`auth::AuthClient`], routed to production or to the local emulator suite per
//! subsystem according to its [`app::BackendConfig`].
//!
//! Document operations are generic over a converter supplied at the call site, so the
//! client itself never depends on domain types:
//!
//! ```rust,ignore
//! use firebase_typed::app::{AppRegistry, BackendConfig};
//! use firebase_typed::firestore::SerdeConverter;
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Cat { name: String, age: i64 }
//!
//! let registry = AppRegistry::in_memory();
//! let app = registry.create(BackendConfig::new("demo"))?;
//! let firestore = app.firestore()?;
//! let cats = firestore
//!     .collection(["cats"])?
//!     .with_converter(SerdeConverter::<Cat>::new());
//! let tom = firestore.add_doc(&cats, &Cat { name: "Tom".into(), age: 3 }).await?;
//! let stored = firestore.get_doc(&tom).await?;
//! registry.teardown_all().await?;
//! ```

pub mod app;
pub mod auth;
pub mod firestore;
pub mod platform;
pub mod storage;
pub mod util;
