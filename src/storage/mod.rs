//! Object store client: references, uploads (whole and resumable), downloads,
//! metadata, deletion and paginated listing.
//!
//! ```rust,ignore
//! use firebase_typed::storage::{StorageClient, StringFormat};
//!
//! let storage = StorageClient::in_memory("demo.appspot.com");
//! let note = storage.reference("notes/hello.txt");
//! storage.upload_string(&note, "hello", StringFormat::Raw, None).await?;
//! let url = storage.get_download_url(&note).await?;
//! ```

pub mod backend;
mod client;
mod constants;
mod error;
mod list;
mod location;
mod metadata;
mod path;
mod reference;
mod string;
mod upload;

#[doc(inline)]
pub use backend::{
    ByteStream, ChunkStatus, HttpStorageBackend, HttpStorageBackendBuilder,
    InMemoryStorageBackend, StorageBackend,
};

#[doc(inline)]
pub use client::{ObjectReader, StorageClient};

#[doc(inline)]
pub use constants::{DEFAULT_HOST, DEFAULT_PROTOCOL, MAX_LIST_RESULTS, RESUMABLE_UPLOAD_CHUNK_SIZE};

#[doc(inline)]
pub use error::{StorageError, StorageErrorCode, StorageResult};

#[doc(inline)]
pub use list::{ListOptions, ListResult};

#[doc(inline)]
pub use location::Location;

#[doc(inline)]
pub use metadata::{ObjectMetadata, SettableMetadata, UploadMetadata};

#[doc(inline)]
pub use reference::StorageReference;

#[doc(inline)]
pub use string::{StringFormat, StringPayload};

#[doc(inline)]
pub use upload::{UploadEvent, UploadResult, UploadSnapshot, UploadTask, UploadTaskState};
