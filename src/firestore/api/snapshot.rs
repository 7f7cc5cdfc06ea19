use std::fmt;

use crate::firestore::error::FirestoreResult;
use crate::firestore::value::{FirestoreValue, MapValue};

use super::converter::{FirestoreDataConverter, PassthroughConverter};
use super::reference::DocumentReference;

/// Contents of a single document at the time it was read.
pub struct DocumentSnapshot<C = PassthroughConverter> {
    reference: DocumentReference<C>,
    data: Option<MapValue>,
}

impl<C> DocumentSnapshot<C> {
    pub(crate) fn new(reference: DocumentReference<C>, data: Option<MapValue>) -> Self {
        Self { reference, data }
    }

    pub fn id(&self) -> &str {
        self.reference.id()
    }

    pub fn reference(&self) -> &DocumentReference<C> {
        &self.reference
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// Raw field map, `None` when the document does not exist.
    pub fn data(&self) -> Option<&MapValue> {
        self.data.as_ref()
    }

    pub fn get(&self, field: &str) -> Option<&FirestoreValue> {
        self.data.as_ref().and_then(|data| data.get(field))
    }
}

impl<C> DocumentSnapshot<C>
where
    C: FirestoreDataConverter,
{
    /// Decodes the document through the bound converter.
    pub fn to_model(&self) -> FirestoreResult<Option<C::Model>> {
        match &self.data {
            Some(data) => self
                .reference
                .converter()
                .from_map(data, self.reference.id())
                .map(Some),
            None => Ok(None),
        }
    }
}

impl<C> Clone for DocumentSnapshot<C> {
    fn clone(&self) -> Self {
        Self {
            reference: self.reference.clone(),
            data: self.data.clone(),
        }
    }
}

impl<C> fmt::Debug for DocumentSnapshot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSnapshot")
            .field("path", &self.reference.path())
            .field("data", &self.data)
            .finish()
    }
}

/// Documents matched by a query, in backend order.
pub struct QuerySnapshot<C = PassthroughConverter> {
    docs: Vec<DocumentSnapshot<C>>,
}

impl<C> QuerySnapshot<C> {
    pub(crate) fn new(docs: Vec<DocumentSnapshot<C>>) -> Self {
        Self { docs }
    }

    pub fn docs(&self) -> &[DocumentSnapshot<C>] {
        &self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl<C> QuerySnapshot<C>
where
    C: FirestoreDataConverter,
{
    pub fn into_models(self) -> FirestoreResult<Vec<C::Model>> {
        self.docs
            .iter()
            .filter_map(|doc| doc.to_model().transpose())
            .collect()
    }
}

impl<C> IntoIterator for QuerySnapshot<C> {
    type Item = DocumentSnapshot<C>;
    type IntoIter = std::vec::IntoIter<DocumentSnapshot<C>>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.into_iter()
    }
}

impl<C> fmt::Debug for QuerySnapshot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.docs).finish()
    }
}
