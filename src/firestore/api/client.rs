use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::firestore::error::{client_terminated, invalid_argument, FirestoreResult};
use crate::firestore::model::{DatabaseId, DocumentKey, ResourcePath};
use crate::firestore::remote::datastore::{Datastore, InMemoryDatastore};
use crate::firestore::value::FieldMap;

use super::converter::{FirestoreDataConverter, PassthroughConverter};
use super::operations::{delete_write, set_write, update_write, SetOptions};
use super::query::{IntoQuery, Query};
use super::reference::{CollectionReference, DocumentReference};
use super::snapshot::{DocumentSnapshot, QuerySnapshot};
use super::transaction::{self, Transaction, TransactionOptions};
use super::write_batch::WriteBatch;

/// Document store client bound to one database.
///
/// The client is converter-agnostic: every typed operation takes the converter bound
/// to the reference or query it is given. Cloning is cheap and clones share the
/// underlying transport.
#[derive(Clone)]
pub struct FirestoreClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    database_id: DatabaseId,
    datastore: Arc<dyn Datastore>,
    terminated: AtomicBool,
}

impl FirestoreClient {
    pub fn new(database_id: DatabaseId, datastore: Arc<dyn Datastore>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                database_id,
                datastore,
                terminated: AtomicBool::new(false),
            }),
        }
    }

    /// Client over a fresh process-local store.
    pub fn in_memory(project_id: &str) -> FirestoreResult<Self> {
        Ok(Self::new(
            DatabaseId::for_project(project_id)?,
            Arc::new(InMemoryDatastore::new()),
        ))
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.inner.database_id
    }

    pub(crate) fn datastore(&self) -> FirestoreResult<Arc<dyn Datastore>> {
        if self.is_terminated() {
            return Err(client_terminated());
        }
        Ok(Arc::clone(&self.inner.datastore))
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Reference to the document addressed by `segments`, e.g. `["cats", "tom"]` or
    /// `["cats/tom"]`.
    pub fn doc<I, S>(&self, segments: I) -> FirestoreResult<DocumentReference>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = ResourcePath::root().join_all(segments)?;
        Ok(DocumentReference::new(DocumentKey::from_path(path)?))
    }

    pub fn collection<I, S>(&self, segments: I) -> FirestoreResult<CollectionReference>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        CollectionReference::new(ResourcePath::root().join_all(segments)?)
    }

    /// Query over every collection named `collection_id`, wherever it sits.
    pub fn collection_group(&self, collection_id: &str) -> FirestoreResult<Query> {
        Query::collection_group(collection_id, Arc::new(PassthroughConverter))
    }

    pub async fn get_doc_snapshot<C>(&self, reference: &DocumentReference<C>) -> FirestoreResult<DocumentSnapshot<C>> {
        let data = self.datastore()?.get_document(reference.key(), None).await?;
        Ok(DocumentSnapshot::new(reference.clone(), data))
    }

    /// Reads one document; `Ok(None)` when nothing is stored there.
    pub async fn get_doc<C>(&self, reference: &DocumentReference<C>) -> FirestoreResult<Option<C::Model>>
    where
        C: FirestoreDataConverter,
    {
        self.get_doc_snapshot(reference).await?.to_model()
    }

    pub async fn get_docs_snapshot<Q>(&self, query: Q) -> FirestoreResult<QuerySnapshot<Q::Converter>>
    where
        Q: IntoQuery,
    {
        let query = query.into_query();
        let documents = self.datastore()?.run_query(query.definition()).await?;
        let converter = query.converter_arc();
        let docs = documents
            .into_iter()
            .map(|doc| {
                let reference = DocumentReference::with_key(doc.key, Arc::clone(&converter));
                DocumentSnapshot::new(reference, Some(doc.fields))
            })
            .collect();
        Ok(QuerySnapshot::new(docs))
    }

    /// Runs `query` and decodes every match, in backend order.
    pub async fn get_docs<Q>(&self, query: Q) -> FirestoreResult<Vec<<Q::Converter as FirestoreDataConverter>::Model>>
    where
        Q: IntoQuery,
        Q::Converter: FirestoreDataConverter,
    {
        self.get_docs_snapshot(query).await?.into_models()
    }

    /// Creates or overwrites the document.
    pub async fn set_doc<C>(&self, reference: &DocumentReference<C>, value: &C::Model) -> FirestoreResult<()>
    where
        C: FirestoreDataConverter,
    {
        self.set_doc_with_options(reference, value, SetOptions::default())
            .await
    }

    pub async fn set_doc_with_options<C>(
        &self,
        reference: &DocumentReference<C>,
        value: &C::Model,
        options: SetOptions,
    ) -> FirestoreResult<()>
    where
        C: FirestoreDataConverter,
    {
        let write = set_write(reference, value, options)?;
        self.datastore()?.commit(vec![write], None).await
    }

    /// Stores `value` under a new auto-generated id and returns its reference.
    pub async fn add_doc<C>(&self, collection: &CollectionReference<C>, value: &C::Model) -> FirestoreResult<DocumentReference<C>>
    where
        C: FirestoreDataConverter,
    {
        let reference = collection.new_doc();
        self.set_doc(&reference, value).await?;
        Ok(reference)
    }

    /// Updates dotted field paths of an existing document.
    ///
    /// Fails with `firestore/not-found` when the document does not exist.
    pub async fn update_doc<C>(&self, reference: &DocumentReference<C>, fields: FieldMap) -> FirestoreResult<()> {
        let write = update_write(reference, fields)?;
        self.datastore()?.commit(vec![write], None).await
    }

    /// Deletes the document; deleting a missing document succeeds.
    pub async fn delete_doc<C>(&self, reference: &DocumentReference<C>) -> FirestoreResult<()> {
        self.datastore()?
            .commit(vec![delete_write(reference)], None)
            .await
    }

    pub fn write_batch(&self) -> WriteBatch {
        WriteBatch::new(self.clone())
    }

    /// Runs `update` in a transaction, retrying it on conflicts.
    ///
    /// `update` may run several times, so it must not have side effects beyond the
    /// operations issued through the [`Transaction`] handle.
    ///
    /// ```rust,ignore
    /// let next = client
    ///     .run_transaction(|txn| {
    ///         let counter = counter.clone();
    ///         async move {
    ///             let n = txn.get(&counter).await?.map_or(0, |c| c.value);
    ///             txn.set(&counter, &Counter { value: n + 1 })?;
    ///             Ok(n + 1)
    ///         }
    ///     })
    ///     .await?;
    /// ```
    pub async fn run_transaction<F, Fut, R>(&self, update: F) -> FirestoreResult<R>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = FirestoreResult<R>>,
    {
        self.run_transaction_with_options(TransactionOptions::default(), update)
            .await
    }

    pub async fn run_transaction_with_options<F, Fut, R>(
        &self,
        options: TransactionOptions,
        update: F,
    ) -> FirestoreResult<R>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = FirestoreResult<R>>,
    {
        if options.max_attempts == 0 {
            return Err(invalid_argument("max_attempts must be at least 1"));
        }
        transaction::run_transaction(self.datastore()?, options, update).await
    }

    /// Releases the transport. Later operations fail; repeated calls are no-ops.
    pub async fn terminate(&self) -> FirestoreResult<()> {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.datastore.terminate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::converter::{with_identifier, SerdeConverter};
    use crate::firestore::api::query::{order_by, query, where_field, FilterOperator, OrderDirection};
    use crate::firestore::value::FirestoreValue;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Cat {
        #[serde(default)]
        id: String,
        name: String,
        age: i64,
    }

    fn cat(name: &str, age: i64) -> Cat {
        Cat {
            id: String::new(),
            name: name.into(),
            age,
        }
    }

    #[tokio::test]
    async fn missing_document_reads_as_none_but_update_fails() {
        let client = FirestoreClient::in_memory("demo").unwrap();
        let doc = client
            .doc(["cats", "ghost"])
            .unwrap()
            .with_converter(SerdeConverter::<Cat>::new());
        assert!(client.get_doc(&doc).await.unwrap().is_none());

        let mut fields = FieldMap::new();
        fields.insert("age".into(), FirestoreValue::from(1));
        let err = client.update_doc(&doc, fields).await.unwrap_err();
        assert_eq!(err.code_str(), "firestore/not-found");
    }

    #[tokio::test]
    async fn add_doc_injects_generated_id() {
        let client = FirestoreClient::in_memory("demo").unwrap();
        let cats = client
            .collection(["cats"])
            .unwrap()
            .with_converter(with_identifier::<Cat>("id"));
        let reference = client.add_doc(&cats, &cat("Tom", 3)).await.unwrap();

        let stored = client.get_doc(&reference).await.unwrap().unwrap();
        assert_eq!(stored.id, reference.id());
        assert_eq!(stored.name, "Tom");

        let raw = client.get_doc(&reference.untyped()).await.unwrap().unwrap();
        assert!(raw.get("id").is_none());
    }

    #[tokio::test]
    async fn typed_queries_decode_in_order() {
        let client = FirestoreClient::in_memory("demo").unwrap();
        let cats = client
            .collection(["cats"])
            .unwrap()
            .with_converter(with_identifier::<Cat>("id"));
        for (name, age) in [("Tom", 3), ("Felix", 7), ("Garfield", 5)] {
            client
                .set_doc(&cats.doc(&name.to_lowercase()).unwrap(), &cat(name, age))
                .await
                .unwrap();
        }

        let older = query(
            &cats,
            [
                where_field("age", FilterOperator::GreaterThan, 4),
                order_by("age", OrderDirection::Ascending),
            ],
        )
        .unwrap();
        let names: Vec<String> = client
            .get_docs(&older)
            .await
            .unwrap()
            .into_iter()
            .map(|cat| cat.name)
            .collect();
        assert_eq!(names, vec!["Garfield", "Felix"]);
    }

    #[tokio::test]
    async fn collection_group_spans_parents() {
        let client = FirestoreClient::in_memory("demo").unwrap();
        for path in ["cats/tom/toys/ball", "dogs/rex/toys/bone", "toys/top"] {
            let doc = client.doc([path]).unwrap();
            client.set_doc(&doc, &Default::default()).await.unwrap();
        }
        let toys = client.collection_group("toys").unwrap();
        assert_eq!(client.get_docs_snapshot(&toys).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn terminated_client_rejects_operations() {
        let client = FirestoreClient::in_memory("demo").unwrap();
        let doc = client.doc(["cats/tom"]).unwrap();
        client.terminate().await.unwrap();
        client.terminate().await.unwrap();
        let err = client.get_doc(&doc).await.unwrap_err();
        assert_eq!(err.code_str(), "firestore/internal");
    }
}
