use crate::firestore::constants::MAX_BATCH_WRITES;
use crate::firestore::error::{invalid_argument, FirestoreError, FirestoreResult};
use crate::firestore::remote::datastore::WriteOperation;
use crate::firestore::value::FieldMap;

use super::client::FirestoreClient;
use super::converter::FirestoreDataConverter;
use super::operations::{delete_write, set_write, update_write, SetOptions};
use super::reference::DocumentReference;

/// Accumulates writes and commits them atomically.
///
/// Operations chain; the first invalid one is remembered and returned from
/// [`commit`](WriteBatch::commit), in which case nothing is written.
///
/// ```rust,ignore
/// let mut batch = client.write_batch();
/// batch
///     .set(&tom, &Cat { name: "Tom".into(), age: 3 })
///     .update(&felix, fields)
///     .delete(&garfield);
/// batch.commit().await?;
/// ```
pub struct WriteBatch {
    client: FirestoreClient,
    writes: Vec<WriteOperation>,
    error: Option<FirestoreError>,
}

impl WriteBatch {
    pub(crate) fn new(client: FirestoreClient) -> Self {
        Self {
            client,
            writes: Vec::new(),
            error: None,
        }
    }

    pub fn set<C>(&mut self, reference: &DocumentReference<C>, value: &C::Model) -> &mut Self
    where
        C: FirestoreDataConverter,
    {
        self.set_with_options(reference, value, SetOptions::default())
    }

    pub fn set_with_options<C>(
        &mut self,
        reference: &DocumentReference<C>,
        value: &C::Model,
        options: SetOptions,
    ) -> &mut Self
    where
        C: FirestoreDataConverter,
    {
        let write = set_write(reference, value, options);
        self.push(write)
    }

    /// Queues an update of dotted field paths; the commit fails if the document is missing.
    pub fn update<C>(&mut self, reference: &DocumentReference<C>, fields: FieldMap) -> &mut Self {
        let write = update_write(reference, fields);
        self.push(write)
    }

    pub fn delete<C>(&mut self, reference: &DocumentReference<C>) -> &mut Self {
        self.push(Ok(delete_write(reference)))
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    fn push(&mut self, write: FirestoreResult<WriteOperation>) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        if self.writes.len() >= MAX_BATCH_WRITES {
            self.error = Some(invalid_argument(format!(
                "A write batch can contain at most {MAX_BATCH_WRITES} operations"
            )));
            return self;
        }
        match write {
            Ok(write) => self.writes.push(write),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Applies every queued write or none of them.
    pub async fn commit(self) -> FirestoreResult<()> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.writes.is_empty() {
            return Ok(());
        }
        let datastore = self.client.datastore()?;
        log::debug!("Committing write batch with {} operations", self.writes.len());
        datastore.commit(self.writes, None).await
    }
}
