//! Terminal artifacts written to the result sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobState;

/// Row-major table. Rows may have different column counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableData {
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl<S: Into<String>> FromIterator<Vec<S>> for TableData {
    fn from_iter<I: IntoIterator<Item = Vec<S>>>(iter: I) -> Self {
        Self {
            rows: iter
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        }
    }
}

/// Human-readable cause plus diagnostic detail for a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub cause: String,
    pub detail: String,
}

impl FailureReport {
    pub fn new(cause: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            detail: detail.into(),
        }
    }

    /// Build a report from an error, walking its `source()` chain for the detail.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut detail = format!("{err:?}");
        let mut source = err.source();
        while let Some(inner) = source {
            detail.push_str("\ncaused by: ");
            detail.push_str(&inner.to_string());
            source = inner.source();
        }
        Self {
            cause: err.to_string(),
            detail,
        }
    }

    /// Text served to clients for a failed job.
    pub fn render(&self) -> String {
        format!("Error occurred: {}\n{}", self.cause, self.detail)
    }
}

/// Artifact stored per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Table(TableData),
    Failure(FailureReport),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Table(_) => ArtifactKind::Table,
            Artifact::Failure(_) => ArtifactKind::Failure,
        }
    }
}

/// Discriminator persisted alongside artifact metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Table,
    Failure,
}

impl ArtifactKind {
    /// Terminal state a job commits to when it holds this kind of artifact.
    pub fn terminal_state(self) -> JobState {
        match self {
            ArtifactKind::Table => JobState::Completed,
            ArtifactKind::Failure => JobState::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Table => "table",
            ArtifactKind::Failure => "failure",
        }
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(ArtifactKind::Table),
            "failure" => Ok(ArtifactKind::Failure),
            other => Err(format!("unknown artifact kind: {other}")),
        }
    }
}

/// Pointer from a job record to its written artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub kind: ArtifactKind,
    pub key: String,
    pub size_bytes: u64,
    pub written_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("failed to read source")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn artifact_json_carries_kind() {
        let table = Artifact::Table(TableData::new(vec![vec!["h1".into(), "h2".into()]]));
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["kind"], "table");
        assert_eq!(json["rows"][0][1], "h2");

        let failure = Artifact::Failure(FailureReport::new("boom", "trace"));
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "failure");
        assert_eq!(json["cause"], "boom");
    }

    #[test]
    fn failure_report_walks_source_chain() {
        let err = Outer(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such object",
        ));
        let report = FailureReport::from_error(&err);
        assert_eq!(report.cause, "failed to read source");
        assert!(report.detail.contains("caused by: no such object"));
        assert!(report.render().starts_with("Error occurred: failed to read source\n"));
    }

    #[test]
    fn kind_maps_to_terminal_state() {
        assert_eq!(ArtifactKind::Table.terminal_state(), JobState::Completed);
        assert_eq!(ArtifactKind::Failure.terminal_state(), JobState::Failed);
    }
}
