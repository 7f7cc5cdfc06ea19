//! Typed document store client.
//!
//! References and queries carry a [`FirestoreDataConverter`]; the [`FirestoreClient`]
//! itself is converter-agnostic and works against any [`remote::Datastore`]: the REST
//! transport for production and the emulator, or the in-memory store for tests.
//!
//! ```rust,ignore
//! let client = FirestoreClient::in_memory("demo-project")?;
//! let cats = client.collection(["cats"])?.with_converter(with_identifier::<Cat>("id"));
//! let tom = client.add_doc(&cats, &Cat::new("Tom", 3)).await?;
//! let oldest = query(&cats, [order_by("age", OrderDirection::Descending), limit(1)])?;
//! let cats: Vec<Cat> = client.get_docs(&oldest).await?;
//! ```

pub mod api;
mod constants;
pub mod error;
pub mod model;
mod query_evaluator;
pub mod remote;
pub mod value;

pub use api::*;
pub use constants::{DEFAULT_DATABASE_ID, MAX_BATCH_WRITES};
pub use error::{FirestoreError, FirestoreErrorCode, FirestoreResult};
pub use model::{DatabaseId, DocumentKey, FieldPath, ResourcePath, Timestamp};
pub use value::{FieldMap, FirestoreValue, MapValue, ValueKind};
