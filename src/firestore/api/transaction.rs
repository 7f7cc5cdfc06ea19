use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::firestore::constants::{DEFAULT_TRANSACTION_MAX_ATTEMPTS, MAX_BATCH_WRITES};
use crate::firestore::error::{aborted, invalid_argument, FirestoreErrorCode, FirestoreResult};
use crate::firestore::remote::datastore::{Datastore, TransactionId, WriteOperation};
use crate::firestore::value::FieldMap;
use crate::platform::runtime;
use crate::util::BackoffConfig;

use super::converter::FirestoreDataConverter;
use super::operations::{delete_write, set_write, update_write, SetOptions};
use super::reference::DocumentReference;
use super::snapshot::DocumentSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Upper bound on how many times the update function runs.
    pub max_attempts: u32,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_TRANSACTION_MAX_ATTEMPTS,
        }
    }
}

impl TransactionOptions {
    pub fn new(max_attempts: u32) -> FirestoreResult<Self> {
        if max_attempts == 0 {
            return Err(invalid_argument("max_attempts must be at least 1"));
        }
        Ok(Self { max_attempts })
    }
}

/// Handle passed to the update function of
/// [`FirestoreClient::run_transaction`](super::FirestoreClient::run_transaction).
///
/// Reads go to the backend immediately and must come before any write. Writes are
/// buffered and committed together once the update function returns `Ok`.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

struct TransactionInner {
    datastore: Arc<dyn Datastore>,
    id: TransactionId,
    writes: Mutex<Vec<WriteOperation>>,
}

impl Transaction {
    fn new(datastore: Arc<dyn Datastore>, id: TransactionId) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                datastore,
                id,
                writes: Mutex::new(Vec::new()),
            }),
        }
    }

    fn writes(&self) -> MutexGuard<'_, Vec<WriteOperation>> {
        self.inner
            .writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_writes(&self) -> Vec<WriteOperation> {
        std::mem::take(&mut *self.writes())
    }

    pub async fn get_snapshot<C>(&self, reference: &DocumentReference<C>) -> FirestoreResult<DocumentSnapshot<C>> {
        if !self.writes().is_empty() {
            return Err(invalid_argument(
                "Firestore transactions require all reads to be executed before all writes",
            ));
        }
        let data = self
            .inner
            .datastore
            .get_document(reference.key(), Some(&self.inner.id))
            .await?;
        Ok(DocumentSnapshot::new(reference.clone(), data))
    }

    /// Reads and decodes one document; `None` when it does not exist.
    pub async fn get<C>(&self, reference: &DocumentReference<C>) -> FirestoreResult<Option<C::Model>>
    where
        C: FirestoreDataConverter,
    {
        self.get_snapshot(reference).await?.to_model()
    }

    pub fn set<C>(&self, reference: &DocumentReference<C>, value: &C::Model) -> FirestoreResult<()>
    where
        C: FirestoreDataConverter,
    {
        self.set_with_options(reference, value, SetOptions::default())
    }

    pub fn set_with_options<C>(
        &self,
        reference: &DocumentReference<C>,
        value: &C::Model,
        options: SetOptions,
    ) -> FirestoreResult<()>
    where
        C: FirestoreDataConverter,
    {
        let write = set_write(reference, value, options)?;
        self.push(write)
    }

    pub fn update<C>(&self, reference: &DocumentReference<C>, fields: FieldMap) -> FirestoreResult<()> {
        let write = update_write(reference, fields)?;
        self.push(write)
    }

    pub fn delete<C>(&self, reference: &DocumentReference<C>) -> FirestoreResult<()> {
        self.push(delete_write(reference))
    }

    fn push(&self, write: WriteOperation) -> FirestoreResult<()> {
        let mut writes = self.writes();
        if writes.len() >= MAX_BATCH_WRITES {
            return Err(invalid_argument(format!(
                "A transaction can contain at most {MAX_BATCH_WRITES} writes"
            )));
        }
        writes.push(write);
        Ok(())
    }
}

/// Runs `update` inside backend transactions until one commits without conflict or
/// `options.max_attempts` is reached.
pub(crate) async fn run_transaction<F, Fut, R>(
    datastore: Arc<dyn Datastore>,
    options: TransactionOptions,
    mut update: F,
) -> FirestoreResult<R>
where
    F: FnMut(Transaction) -> Fut,
    Fut: Future<Output = FirestoreResult<R>>,
{
    let backoff = BackoffConfig::default();
    let mut last_error = None;

    for attempt in 0..options.max_attempts {
        if attempt > 0 {
            runtime::sleep(backoff.delay_for(attempt - 1)).await;
        }
        let id = datastore.begin_transaction().await?;
        let transaction = Transaction::new(Arc::clone(&datastore), id.clone());

        let outcome = match update(transaction.clone()).await {
            Ok(result) => datastore
                .commit(transaction.take_writes(), Some(&id))
                .await
                .map(|()| result),
            Err(err) => {
                if let Err(rollback_err) = datastore.rollback(&id).await {
                    log::warn!("Failed to roll back transaction {id}: {rollback_err}");
                }
                Err(err)
            }
        };

        match outcome {
            Ok(result) => return Ok(result),
            Err(err) if err.code == FirestoreErrorCode::Aborted => {
                log::debug!(
                    "Transaction attempt {} of {} aborted: {}",
                    attempt + 1,
                    options.max_attempts,
                    err.message()
                );
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    let reason = last_error
        .map(|err| err.message().to_string())
        .unwrap_or_default();
    Err(aborted(format!(
        "Transaction failed after {} attempts: {reason}",
        options.max_attempts
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::firestore::api::FirestoreClient;
    use crate::firestore::value::{FirestoreValue, MapValue};

    fn counter(value: i64) -> MapValue {
        let mut fields = FieldMap::new();
        fields.insert("n".into(), value.into());
        MapValue::new(fields)
    }

    #[tokio::test]
    async fn reads_must_precede_writes() {
        let client = FirestoreClient::in_memory("demo").unwrap();
        let doc = client.doc(["counters/c"]).unwrap();
        let err = client
            .run_transaction(|txn| {
                let doc = doc.clone();
                async move {
                    txn.set(&doc, &counter(1))?;
                    txn.get(&doc).await?;
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
        assert!(client.get_doc(&doc).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let client = FirestoreClient::in_memory("demo").unwrap();
        let doc = client.doc(["counters/c"]).unwrap();
        client.set_doc(&doc, &counter(0)).await.unwrap();

        let attempts = Arc::new(AtomicU32::new(0));
        let options = TransactionOptions::new(2).unwrap();
        let err = client
            .run_transaction_with_options(options, |txn| {
                let doc = doc.clone();
                let client = client.clone();
                let attempts = Arc::clone(&attempts);
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) as i64;
                    txn.get(&doc).await?;
                    client.set_doc(&doc, &counter(100 + n)).await?;
                    txn.set(&doc, &counter(n))?;
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.code_str(), "firestore/aborted");
        assert!(err.message().starts_with("Transaction failed after 2 attempts"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        let stored = client.get_doc(&doc).await.unwrap().unwrap();
        assert_eq!(stored.get("n"), Some(&FirestoreValue::from(101)));
    }

    #[test]
    fn zero_attempts_rejected() {
        assert!(TransactionOptions::new(0).is_err());
    }
}
