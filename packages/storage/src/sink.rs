//! Result sink: one immutable artifact per job.

use bytes::Bytes;
use chrono::Utc;
use jobs_core::{Artifact, ArtifactMeta, JobId, OutputRef};

use crate::{Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("artifact already exists: {key}")]
    AlreadyExists { key: String },

    #[error("artifact not found: {key}")]
    NotFound { key: String },

    #[error("failed to write artifact {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to read artifact {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("artifact {key} is not valid json: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Writes terminal artifacts as JSON at `<output>/<job id>.json`.
#[derive(Clone)]
pub struct ResultSink {
    storage: Storage,
}

impl ResultSink {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn artifact_key(output: &OutputRef, id: &JobId) -> String {
        format!("{}/{}.json", output.as_str().trim_matches('/'), id)
    }

    /// Create-only write. A second write for the same job fails with
    /// [`SinkError::AlreadyExists`] and leaves the first artifact intact.
    pub async fn write(
        &self,
        output: &OutputRef,
        id: &JobId,
        artifact: &Artifact,
    ) -> Result<ArtifactMeta, SinkError> {
        let key = Self::artifact_key(output, id);
        let body = serde_json::to_vec(artifact).map_err(|e| SinkError::Write {
            key: key.clone(),
            source: StorageError::Json(e),
        })?;
        let size_bytes = body.len() as u64;

        match self.storage.put_if_absent(&key, Bytes::from(body)).await {
            Ok(()) => {}
            Err(StorageError::AlreadyExists(_)) => return Err(SinkError::AlreadyExists { key }),
            Err(source) => return Err(SinkError::Write { key, source }),
        }

        tracing::debug!("Wrote {} artifact {} ({} bytes)", artifact.kind().as_str(), key, size_bytes);

        Ok(ArtifactMeta {
            kind: artifact.kind(),
            key,
            size_bytes,
            written_at: Utc::now(),
        })
    }

    pub async fn read(&self, output: &OutputRef, id: &JobId) -> Result<Artifact, SinkError> {
        self.read_key(&Self::artifact_key(output, id)).await
    }

    /// Read an artifact by the key recorded in its metadata.
    pub async fn read_key(&self, key: &str) -> Result<Artifact, SinkError> {
        let bytes = match self.storage.get(key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                return Err(SinkError::NotFound {
                    key: key.to_string(),
                });
            }
            Err(source) => {
                return Err(SinkError::Read {
                    key: key.to_string(),
                    source,
                });
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| SinkError::Corrupt {
            key: key.to_string(),
            source,
        })
    }

    /// Read an existing artifact along with metadata describing it.
    pub async fn existing(&self, output: &OutputRef, id: &JobId) -> Result<(Artifact, ArtifactMeta), SinkError> {
        let key = Self::artifact_key(output, id);
        let artifact = self.read_key(&key).await?;
        let size_bytes = serde_json::to_vec(&artifact).map(|b| b.len() as u64).unwrap_or(0);
        let meta = ArtifactMeta {
            kind: artifact.kind(),
            key,
            size_bytes,
            written_at: Utc::now(),
        };
        Ok((artifact, meta))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use crate::StorageConfig;
    use jobs_core::{ArtifactKind, FailureReport, TableData};

    fn table() -> Artifact {
        Artifact::Table(TableData::from_iter(vec![
            vec!["h1", "h2"],
            vec!["a", "b"],
            vec!["c", "d"],
        ]))
    }

    #[tokio::test]
    async fn write_is_create_only() -> Result<(), Box<dyn std::error::Error>> {
        let sink = ResultSink::new(Storage::new(StorageConfig::memory()).await?);
        let output = OutputRef::new("results");
        let id = JobId::parse("job-1")?;

        let meta = sink.write(&output, &id, &table()).await?;
        assert_eq!(meta.key, "results/job-1.json");
        assert_eq!(meta.kind, ArtifactKind::Table);

        let second = sink
            .write(&output, &id, &Artifact::Failure(FailureReport::new("late", "")))
            .await;
        assert!(matches!(second, Err(SinkError::AlreadyExists { .. })));

        // First artifact is untouched.
        assert_eq!(sink.read(&output, &id).await?, table());
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_sink_round_trips_and_reports_missing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sink = ResultSink::new(Storage::new(StorageConfig::filesystem(dir.path())).await?);
        let output = OutputRef::new("results");
        let id = JobId::parse("job-2")?;

        let missing = sink.read(&output, &id).await;
        assert!(matches!(missing, Err(SinkError::NotFound { .. })));

        let failure = Artifact::Failure(FailureReport::new("No tables found in the document", "trace"));
        sink.write(&output, &id, &failure).await?;
        assert!(dir.path().join("results").join("job-2.json").exists());

        let (loaded, meta) = sink.existing(&output, &id).await?;
        assert_eq!(loaded, failure);
        assert_eq!(meta.kind, ArtifactKind::Failure);
        Ok(())
    }
}
