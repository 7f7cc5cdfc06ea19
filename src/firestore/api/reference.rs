use std::fmt;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::firestore::constants::AUTO_ID_LENGTH;
use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DocumentKey, ResourcePath};

use super::converter::{FirestoreDataConverter, PassthroughConverter};
use super::query::Query;

/// Address of a single document, optionally bound to a converter.
///
/// Equality and hashing look at the path only: two references to the same document
/// compare equal whatever converter they carry.
pub struct DocumentReference<C = PassthroughConverter> {
    key: DocumentKey,
    converter: Arc<C>,
}

impl DocumentReference<PassthroughConverter> {
    pub(crate) fn new(key: DocumentKey) -> Self {
        Self {
            key,
            converter: Arc::new(PassthroughConverter),
        }
    }
}

impl<C> DocumentReference<C> {
    pub(crate) fn with_key(key: DocumentKey, converter: Arc<C>) -> Self {
        Self { key, converter }
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    /// Slash separated path, e.g. `cats/tom`.
    pub fn path(&self) -> String {
        self.key.path().canonical_string()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    pub(crate) fn converter_arc(&self) -> Arc<C> {
        Arc::clone(&self.converter)
    }

    /// The collection containing this document, sharing its converter.
    pub fn parent(&self) -> CollectionReference<C> {
        CollectionReference {
            path: self.key.collection_path(),
            converter: self.converter_arc(),
        }
    }

    /// A subcollection below this document.
    pub fn collection(&self, path: &str) -> FirestoreResult<CollectionReference> {
        CollectionReference::new(self.key.path().join(path)?)
    }

    /// Rebinds the reference to another converter; the address is unchanged.
    pub fn with_converter<C2>(&self, converter: C2) -> DocumentReference<C2>
    where
        C2: FirestoreDataConverter,
    {
        DocumentReference {
            key: self.key.clone(),
            converter: Arc::new(converter),
        }
    }

    /// Drops the bound converter.
    pub fn untyped(&self) -> DocumentReference {
        DocumentReference::new(self.key.clone())
    }
}

impl<C> Clone for DocumentReference<C> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            converter: Arc::clone(&self.converter),
        }
    }
}

impl<C, C2> PartialEq<DocumentReference<C2>> for DocumentReference<C> {
    fn eq(&self, other: &DocumentReference<C2>) -> bool {
        self.key == other.key
    }
}

impl<C> Eq for DocumentReference<C> {}

impl<C> std::hash::Hash for DocumentReference<C> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<C> fmt::Debug for DocumentReference<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentReference")
            .field("path", &self.path())
            .finish()
    }
}

impl<C> fmt::Display for DocumentReference<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key.fmt(f)
    }
}

/// Address of a collection: an odd number of path segments.
pub struct CollectionReference<C = PassthroughConverter> {
    path: ResourcePath,
    converter: Arc<C>,
}

impl CollectionReference<PassthroughConverter> {
    pub(crate) fn new(path: ResourcePath) -> FirestoreResult<Self> {
        if path.len() % 2 == 0 {
            return Err(invalid_argument(format!(
                "Invalid collection reference. Collection references must have an odd number of segments, but {} has {}.",
                path,
                path.len()
            )));
        }
        Ok(Self {
            path,
            converter: Arc::new(PassthroughConverter),
        })
    }
}

impl<C> CollectionReference<C> {
    pub fn id(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }

    pub fn path(&self) -> String {
        self.path.canonical_string()
    }

    pub fn resource_path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    pub(crate) fn converter_arc(&self) -> Arc<C> {
        Arc::clone(&self.converter)
    }

    /// The document owning this subcollection, `None` for root collections.
    pub fn parent(&self) -> Option<DocumentReference> {
        let parent = self.path.without_last();
        if parent.is_empty() {
            return None;
        }
        DocumentKey::from_path(parent).ok().map(DocumentReference::new)
    }

    /// Reference to `path` below this collection, sharing its converter.
    ///
    /// `path` may span several segments (`"tom/toys/ball"`) as long as it lands on a
    /// document.
    pub fn doc(&self, path: &str) -> FirestoreResult<DocumentReference<C>> {
        let key = DocumentKey::from_path(self.path.join(path)?)?;
        Ok(DocumentReference::with_key(key, self.converter_arc()))
    }

    /// Reference to a new document with a random 20 character id.
    pub fn new_doc(&self) -> DocumentReference<C> {
        let key = DocumentKey::in_collection(&self.path, generate_auto_id());
        DocumentReference::with_key(key, self.converter_arc())
    }

    pub fn with_converter<C2>(&self, converter: C2) -> CollectionReference<C2>
    where
        C2: FirestoreDataConverter,
    {
        CollectionReference {
            path: self.path.clone(),
            converter: Arc::new(converter),
        }
    }

    /// Unconstrained query over this collection.
    pub fn as_query(&self) -> Query<C> {
        Query::for_collection(self.path.clone(), self.converter_arc())
    }
}

impl<C> Clone for CollectionReference<C> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            converter: Arc::clone(&self.converter),
        }
    }
}

impl<C, C2> PartialEq<CollectionReference<C2>> for CollectionReference<C> {
    fn eq(&self, other: &CollectionReference<C2>) -> bool {
        self.path == other.path
    }
}

impl<C> fmt::Debug for CollectionReference<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionReference")
            .field("path", &self.path())
            .finish()
    }
}

pub(crate) fn generate_auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(AUTO_ID_LENGTH)
        .collect()
}
