use jobs_core::{JobId, OutputRef, SourceRef};

use db::{DbConfig, DbError, JobStore};

/// Fresh in-memory store. Every `mem://` connection is its own datastore.
pub async fn setup_store() -> Result<JobStore, DbError> {
    db::init(&DbConfig::memory().with_namespace("test")).await
}

pub fn refs(id: &JobId) -> (SourceRef, OutputRef) {
    (
        SourceRef::new(format!("uploads/{id}/document")),
        OutputRef::new("results"),
    )
}
