//! Uploaded source documents.

use bytes::Bytes;
use jobs_core::{JobId, SourceRef};

use crate::{Storage, StorageError};

/// Stores uploads at `<prefix>/<job id>/document`.
///
/// The user-supplied filename never becomes part of the key.
#[derive(Clone)]
pub struct DocumentStore {
    storage: Storage,
    prefix: String,
}

impl DocumentStore {
    pub fn new(storage: Storage, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// Key a document for `id` is stored under.
    pub fn source_ref(&self, id: &JobId) -> SourceRef {
        SourceRef::new(format!("{}/{}/document", self.prefix, id))
    }

    pub async fn put(&self, id: &JobId, bytes: Bytes) -> Result<SourceRef, StorageError> {
        let source = self.source_ref(id);
        self.storage.put(source.as_str(), bytes).await?;
        tracing::debug!("Stored document {}", source);
        Ok(source)
    }

    pub async fn get(&self, source: &SourceRef) -> Result<Bytes, StorageError> {
        self.storage.get(source.as_str()).await
    }
}
