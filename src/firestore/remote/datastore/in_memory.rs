use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::firestore::api::query::QueryDefinition;
use crate::firestore::error::{aborted, invalid_argument, not_found, FirestoreResult};
use crate::firestore::model::{DocumentKey, Timestamp};
use crate::firestore::query_evaluator::apply_query_to_documents;
use crate::firestore::value::{FirestoreValue, MapValue};

use super::{Datastore, FieldTransform, StoredDocument, TransactionId, WriteOperation};

#[derive(Clone, Debug)]
struct StoredEntry {
    fields: MapValue,
    version: u64,
}

#[derive(Default)]
struct StoreState {
    documents: BTreeMap<String, StoredEntry>,
    /// Versions observed by each open transaction; `None` records a missing document.
    transactions: HashMap<TransactionId, HashMap<String, Option<u64>>>,
    last_commit_time: Option<Timestamp>,
    next_version: u64,
    next_transaction: u64,
}

/// Process-local document store with the same commit semantics as the backend:
/// atomic commits, optimistic transactions and server-assigned timestamps.
#[derive(Clone, Default)]
pub struct InMemoryDatastore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StoreState {
    fn commit_time(&mut self) -> Timestamp {
        let now = Timestamp::now();
        let time = match self.last_commit_time {
            Some(last) if now <= last => last.next_micro(),
            _ => now,
        };
        self.last_commit_time = Some(time);
        time
    }

    fn apply(&mut self, write: WriteOperation, commit_time: Timestamp) -> FirestoreResult<()> {
        self.next_version += 1;
        let version = self.next_version;
        match write {
            WriteOperation::Set {
                key,
                data,
                mask,
                transforms,
            } => {
                let path = key.path().canonical_string();
                let mut fields = match mask {
                    Some(mask) => {
                        let mut fields = self
                            .documents
                            .get(&path)
                            .map(|entry| entry.fields.clone())
                            .unwrap_or_default();
                        for field in &mask {
                            if let Some(value) = data.get_path(field) {
                                fields.set_path(field, value.clone());
                            }
                        }
                        fields
                    }
                    None => data,
                };
                apply_transforms(&mut fields, &transforms, commit_time);
                self.documents.insert(path, StoredEntry { fields, version });
            }
            WriteOperation::Update {
                key,
                data,
                field_paths,
                transforms,
            } => {
                let path = key.path().canonical_string();
                let entry = self
                    .documents
                    .get_mut(&path)
                    .ok_or_else(|| not_found(format!("No document to update: {path}")))?;
                for field in &field_paths {
                    match data.get_path(field) {
                        Some(value) => entry.fields.set_path(field, value.clone()),
                        None => entry.fields.remove_path(field),
                    }
                }
                apply_transforms(&mut entry.fields, &transforms, commit_time);
                entry.version = version;
            }
            WriteOperation::Delete { key } => {
                self.documents.remove(&key.path().canonical_string());
            }
        }
        Ok(())
    }
}

fn apply_transforms(fields: &mut MapValue, transforms: &[FieldTransform], commit_time: Timestamp) {
    for transform in transforms {
        match transform {
            FieldTransform::ServerTimestamp(field) => {
                fields.set_path(field, FirestoreValue::from_timestamp(commit_time))
            }
        }
    }
}

fn unknown_transaction(transaction: &TransactionId) -> crate::firestore::error::FirestoreError {
    invalid_argument(format!("Transaction {transaction} is not active"))
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn get_document(
        &self,
        key: &DocumentKey,
        transaction: Option<&TransactionId>,
    ) -> FirestoreResult<Option<MapValue>> {
        let mut state = self.lock();
        let path = key.path().canonical_string();
        let entry = state.documents.get(&path).cloned();
        if let Some(transaction) = transaction {
            let reads = state
                .transactions
                .get_mut(transaction)
                .ok_or_else(|| unknown_transaction(transaction))?;
            reads.insert(path, entry.as_ref().map(|entry| entry.version));
        }
        Ok(entry.map(|entry| entry.fields))
    }

    async fn run_query(&self, query: &QueryDefinition) -> FirestoreResult<Vec<StoredDocument>> {
        let candidates = {
            let state = self.lock();
            state
                .documents
                .iter()
                .filter_map(|(path, entry)| {
                    DocumentKey::from_string(path).ok().map(|key| StoredDocument {
                        key,
                        fields: entry.fields.clone(),
                    })
                })
                .collect::<Vec<_>>()
        };
        Ok(apply_query_to_documents(candidates, query))
    }

    async fn commit(
        &self,
        writes: Vec<WriteOperation>,
        transaction: Option<&TransactionId>,
    ) -> FirestoreResult<()> {
        let mut state = self.lock();
        if let Some(transaction) = transaction {
            let reads = state
                .transactions
                .remove(transaction)
                .ok_or_else(|| unknown_transaction(transaction))?;
            for (path, seen) in reads {
                let current = state.documents.get(&path).map(|entry| entry.version);
                if current != seen {
                    return Err(aborted(format!(
                        "Transaction conflict: {path} was modified after it was read"
                    )));
                }
            }
        }

        // Stage on a copy so a failing write leaves the store untouched.
        let mut staged = StoreState {
            documents: state.documents.clone(),
            transactions: HashMap::new(),
            last_commit_time: state.last_commit_time,
            next_version: state.next_version,
            next_transaction: state.next_transaction,
        };
        let commit_time = staged.commit_time();
        for write in writes {
            staged.apply(write, commit_time)?;
        }
        state.documents = staged.documents;
        state.last_commit_time = staged.last_commit_time;
        state.next_version = staged.next_version;
        Ok(())
    }

    async fn begin_transaction(&self) -> FirestoreResult<TransactionId> {
        let mut state = self.lock();
        state.next_transaction += 1;
        let id = TransactionId::new(format!("txn-{}", state.next_transaction));
        state.transactions.insert(id.clone(), HashMap::new());
        Ok(id)
    }

    async fn rollback(&self, transaction: &TransactionId) -> FirestoreResult<()> {
        self.lock().transactions.remove(transaction);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::value::FieldMap;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    fn fields(name: &str, value: impl Into<FirestoreValue>) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert(name.to_string(), value.into());
        map
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = InMemoryDatastore::new();
        let write = WriteOperation::set(key("cities/sf"), fields("name", "SF"), false).unwrap();
        store.commit(vec![write], None).await.unwrap();

        let data = store.get_document(&key("cities/sf"), None).await.unwrap().unwrap();
        assert_eq!(data.get("name"), Some(&FirestoreValue::from("SF")));
        assert!(store.get_document(&key("cities/la"), None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_commit_applies_nothing() {
        let store = InMemoryDatastore::new();
        let writes = vec![
            WriteOperation::set(key("cities/sf"), fields("name", "SF"), false).unwrap(),
            WriteOperation::update(key("cities/missing"), fields("name", "?")).unwrap(),
        ];
        let err = store.commit(writes, None).await.unwrap_err();
        assert_eq!(err.code_str(), "firestore/not-found");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn merge_keeps_untouched_fields() {
        let store = InMemoryDatastore::new();
        let mut initial = fields("name", "SF");
        initial.insert("population".into(), 800_000.into());
        store
            .commit(vec![WriteOperation::set(key("cities/sf"), initial, false).unwrap()], None)
            .await
            .unwrap();
        store
            .commit(
                vec![WriteOperation::set(key("cities/sf"), fields("population", 900_000), true).unwrap()],
                None,
            )
            .await
            .unwrap();
        let data = store.get_document(&key("cities/sf"), None).await.unwrap().unwrap();
        assert_eq!(data.get("name"), Some(&FirestoreValue::from("SF")));
        assert_eq!(data.get("population").and_then(FirestoreValue::as_integer), Some(900_000));
    }

    #[tokio::test]
    async fn server_timestamps_strictly_increase() {
        let store = InMemoryDatastore::new();
        for id in ["a", "b", "c"] {
            let write = WriteOperation::set(
                key(&format!("events/{id}")),
                fields("at", FirestoreValue::server_timestamp()),
                false,
            )
            .unwrap();
            store.commit(vec![write], None).await.unwrap();
        }
        let mut times = Vec::new();
        for id in ["a", "b", "c"] {
            let data = store
                .get_document(&key(&format!("events/{id}")), None)
                .await
                .unwrap()
                .unwrap();
            times.push(data.get("at").and_then(FirestoreValue::as_timestamp).unwrap());
        }
        assert!(times[0] < times[1] && times[1] < times[2]);
    }

    #[tokio::test]
    async fn transaction_detects_interleaved_write() {
        let store = InMemoryDatastore::new();
        let doc = key("counters/c");
        store
            .commit(vec![WriteOperation::set(doc.clone(), fields("n", 1), false).unwrap()], None)
            .await
            .unwrap();

        let txn = store.begin_transaction().await.unwrap();
        store.get_document(&doc, Some(&txn)).await.unwrap();
        store
            .commit(vec![WriteOperation::set(doc.clone(), fields("n", 5), false).unwrap()], None)
            .await
            .unwrap();

        let err = store
            .commit(vec![WriteOperation::set(doc, fields("n", 2), false).unwrap()], Some(&txn))
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/aborted");
    }
}
