use crate::firestore::constants::DEFAULT_DATABASE_ID;
use crate::firestore::error::{missing_project_id, FirestoreResult};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatabaseId {
    project_id: String,
    database: String,
}

impl DatabaseId {
    pub fn new(project_id: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: database.into(),
        }
    }

    /// The `(default)` database of `project_id`.
    pub fn for_project(project_id: &str) -> FirestoreResult<Self> {
        if project_id.trim().is_empty() {
            return Err(missing_project_id());
        }
        Ok(Self::new(project_id, DEFAULT_DATABASE_ID))
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// `projects/{project}/databases/{database}`
    pub fn resource_name(&self) -> String {
        format!("projects/{}/databases/{}", self.project_id, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_default_database() {
        let db = DatabaseId::for_project("cats-app").unwrap();
        assert_eq!(db.database(), DEFAULT_DATABASE_ID);
        assert_eq!(db.resource_name(), "projects/cats-app/databases/(default)");
    }

    #[test]
    fn empty_project_is_rejected() {
        let err = DatabaseId::for_project(" ").unwrap_err();
        assert_eq!(err.code_str(), "firestore/missing-project-id");
    }
}
