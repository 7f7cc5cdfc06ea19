pub mod connection;
pub mod datastore;
pub mod rpc_error;
pub mod serializer;
mod structured_query;

pub use connection::{Connection, ConnectionBuilder};
pub use datastore::{
    Datastore, FieldTransform, HttpDatastore, InMemoryDatastore, StoredDocument, TransactionId,
    WriteOperation,
};
pub use datastore::http::{HttpDatastoreBuilder, RetrySettings};
pub use serializer::JsonProtoSerializer;
