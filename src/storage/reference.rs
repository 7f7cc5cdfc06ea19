use std::fmt::{Display, Formatter};

use crate::storage::error::{invalid_root_operation, StorageResult};
use crate::storage::location::Location;
use crate::storage::path::{child, last_component, parent};

/// Address of an object (or prefix) inside a bucket.
///
/// References are plain values; every network operation goes through
/// [`StorageClient`](crate::storage::StorageClient).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageReference {
    location: Location,
}

impl StorageReference {
    pub fn new(bucket: impl Into<String>, path: &str) -> Self {
        Self {
            location: Location::new(bucket, path),
        }
    }

    pub(crate) fn from_location(location: Location) -> Self {
        Self { location }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn bucket(&self) -> &str {
        self.location.bucket()
    }

    pub fn full_path(&self) -> &str {
        self.location.path()
    }

    /// Last path component; empty for the root.
    pub fn name(&self) -> &str {
        last_component(self.location.path())
    }

    pub fn is_root(&self) -> bool {
        self.location.is_root()
    }

    pub fn root(&self) -> StorageReference {
        StorageReference::new(self.bucket(), "")
    }

    pub fn parent(&self) -> Option<StorageReference> {
        let path = parent(self.location.path())?;
        Some(StorageReference::new(self.bucket(), &path))
    }

    pub fn child(&self, path: &str) -> StorageReference {
        StorageReference::new(self.bucket(), &child(self.location.path(), path))
    }

    pub fn to_gs_url(&self) -> String {
        format!("gs://{}/{}", self.bucket(), self.full_path())
    }

    pub(crate) fn ensure_not_root(&self, operation: &str) -> StorageResult<()> {
        if self.is_root() {
            Err(invalid_root_operation(operation))
        } else {
            Ok(())
        }
    }
}

impl Display for StorageReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_gs_url())
    }
}
