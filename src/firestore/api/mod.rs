mod client;
mod converter;
mod operations;
pub mod query;
mod reference;
mod snapshot;
mod transaction;
mod write_batch;

pub use client::FirestoreClient;
pub use converter::{
    with_identifier, FirestoreDataConverter, FnConverter, IdentifiedConverter,
    PassthroughConverter, SerdeConverter,
};
pub use operations::SetOptions;
pub use query::{
    end_at, end_before, limit, limit_to_last, order_by, query, start_after, start_at, where_field,
    FilterOperator, IntoCursorValues, IntoQuery, OrderDirection, Query, QueryConstraint,
};
pub use reference::{CollectionReference, DocumentReference};
pub use snapshot::{DocumentSnapshot, QuerySnapshot};
pub use transaction::{Transaction, TransactionOptions};
pub use write_batch::WriteBatch;
