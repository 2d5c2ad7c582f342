//! Connection acquisition is the caller's responsibility (spec.md §5); the
//! adapter only ever borrows a [`firestore::FirestoreDb`] handle.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FirestoreConnectOptions {
    pub project_id: String,
    pub database_id: String,
    pub collection: String,
    pub request_timeout: Duration,
}

impl FirestoreConnectOptions {
    pub fn new(project_id: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: "(default)".to_string(),
            collection: collection.into(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn database_id(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = database_id.into();
        self
    }

    pub async fn connect(&self) -> Result<firestore::FirestoreDb, firestore::errors::FirestoreError> {
        firestore::FirestoreDb::with_options(
            firestore::FirestoreDbOptions::new(self.project_id.clone())
                .with_database_id(self.database_id.clone())
                .with_request_timeout(self.request_timeout),
        )
        .await
    }
}
