use std::fmt::{Display, Formatter};

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::ResourcePath;

/// Path of a single document: always an even, non-zero number of segments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    path: ResourcePath,
    id: String,
}

impl DocumentKey {
    pub fn from_path(path: ResourcePath) -> FirestoreResult<Self> {
        match path.last_segment() {
            Some(id) if path.len() % 2 == 0 => Ok(Self {
                id: id.to_string(),
                path,
            }),
            _ => Err(invalid_argument(format!(
                "Invalid document reference. Document references must have an even number of segments, but {} has {}.",
                path,
                path.len()
            ))),
        }
    }

    /// Key of document `id` inside a collection path, which has an odd segment count.
    pub(crate) fn in_collection(collection: &ResourcePath, id: String) -> Self {
        Self {
            path: collection.child(id.clone()),
            id,
        }
    }

    pub fn from_string(path: &str) -> FirestoreResult<Self> {
        Self::from_path(ResourcePath::from_string(path)?)
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn collection_path(&self) -> ResourcePath {
        self.path.without_last()
    }

    pub fn collection_id(&self) -> &str {
        let segments = self.path.segments();
        &segments[segments.len() - 2]
    }
}

impl Display for DocumentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.path.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_collection_paths() {
        let err = DocumentKey::from_string("cats").unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
        assert!(DocumentKey::from_string("").is_err());
    }

    #[test]
    fn exposes_id_and_collection() {
        let key = DocumentKey::from_string("owners/ann/cats/tom").unwrap();
        assert_eq!(key.id(), "tom");
        assert_eq!(key.collection_id(), "cats");
        assert_eq!(key.collection_path().canonical_string(), "owners/ann/cats");
    }
}
