//! Job domain types for extraction work items.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::ArtifactMeta;

/// Longest identifier accepted from a client.
const MAX_ID_LEN: usize = 128;

/// Unique identifier for a job.
///
/// Server-generated ids are ULIDs so they sort chronologically. Client-supplied
/// ids are accepted when they are safe to use as a single storage key segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, InvalidJobId> {
        let valid = !s.is_empty()
            && s.len() <= MAX_ID_LEN
            && s != "."
            && s != ".."
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidJobId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = InvalidJobId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// Rejected job identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job id: {0:?}")]
pub struct InvalidJobId(pub String);

/// Opaque handle to the input document. The engine never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRef(pub String);

impl SourceRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle to where a job's artifact is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputRef(pub String);

impl OutputRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OutputRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// Pending -> Processing -> Completed
///                      \-> Failed
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Record exists, invocation message not yet confirmed durable.
    #[default]
    Pending,
    /// Invocation message is queued or a worker is executing it.
    Processing,
    /// Success artifact written.
    Completed,
    /// Failure artifact (or inline reason) written.
    Failed,
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(self) -> bool {
        match self {
            JobState::Pending | JobState::Processing => false,
            JobState::Completed | JobState::Failed => true,
        }
    }

    /// The only state from which `self` can be entered. Every edge of the
    /// lifecycle is encoded here.
    pub fn predecessor(self) -> Option<JobState> {
        match self {
            JobState::Pending => None,
            JobState::Processing => Some(JobState::Pending),
            JobState::Completed | JobState::Failed => Some(JobState::Processing),
        }
    }

    /// Check if `next` is a legal edge from this state.
    pub fn can_transition_to(self, next: JobState) -> bool {
        next.predecessor() == Some(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Time-bounded claim a worker holds on a job while executing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(owner: impl Into<String>, ttl: Duration) -> Self {
        Self {
            owner: owner.into(),
            expires_at: expiry_from_now(ttl),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// `now + ttl`, saturating on absurd durations.
pub fn expiry_from_now(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A job represents one submitted document tracked until a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Display label derived from the uploaded filename.
    pub label: String,
    /// Where the input document lives.
    pub source: SourceRef,
    /// Where the artifact is written.
    pub output: OutputRef,
    /// Current lifecycle state.
    pub state: JobState,
    /// Lease held by the executing worker, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    /// Metadata of the written artifact, set on the terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactMeta>,
    /// Inline diagnostic used when no failure artifact could be written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(id: JobId, label: impl Into<String>, source: SourceRef, output: OutputRef) -> Self {
        let now = Utc::now();
        Self {
            id,
            label: label.into(),
            source,
            output,
            state: JobState::Pending,
            lease: None,
            artifact: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether `owner` currently holds an unexpired lease on this job.
    pub fn is_leased_by(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.lease
            .as_ref()
            .is_some_and(|l| l.owner == owner && !l.is_expired_at(now))
    }
}

/// A requested state change, applied by the record store as a compare-and-swap
/// against [`JobState::predecessor`] of the target state.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub to: JobState,
    pub artifact: Option<ArtifactMeta>,
    pub failure_reason: Option<String>,
    /// When set, the update only applies while this owner holds the lease.
    pub lease_owner: Option<String>,
}

impl Transition {
    pub fn to(state: JobState) -> Self {
        Self {
            to: state,
            artifact: None,
            failure_reason: None,
            lease_owner: None,
        }
    }

    pub fn with_artifact(mut self, artifact: ArtifactMeta) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn held_by(mut self, owner: impl Into<String>) -> Self {
        self.lease_owner = Some(owner.into());
        self
    }

    /// State the job must currently be in for this transition to apply.
    pub fn expected_from(&self) -> Option<JobState> {
        self.to.predecessor()
    }

    /// Check the terminal payload rules: COMPLETED needs an artifact, FAILED
    /// needs an artifact or an inline reason.
    pub fn validate(&self) -> Result<(), String> {
        match self.to {
            JobState::Pending | JobState::Processing => Ok(()),
            JobState::Completed => match &self.artifact {
                Some(meta) if meta.kind.terminal_state() == JobState::Completed => Ok(()),
                Some(_) => Err("completed job needs a table artifact".into()),
                None => Err("completed job needs an artifact".into()),
            },
            JobState::Failed => match (&self.artifact, &self.failure_reason) {
                (Some(meta), _) if meta.kind.terminal_state() == JobState::Failed => Ok(()),
                (Some(_), _) => Err("failed job cannot reference a table artifact".into()),
                (None, Some(_)) => Ok(()),
                (None, None) => Err("failed job needs an artifact or a failure reason".into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArtifactKind;

    fn meta(kind: ArtifactKind) -> ArtifactMeta {
        ArtifactMeta {
            kind,
            key: "results/x.json".into(),
            size_bytes: 10,
            written_at: Utc::now(),
        }
    }

    #[test]
    fn only_forward_edges_are_legal() {
        use JobState::*;
        let all = [Pending, Processing, Completed, Failed];
        let legal = [(Pending, Processing), (Processing, Completed), (Processing, Failed)];

        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }

        // The store guards updates with the target's predecessor.
        for to in all {
            let expected = legal.iter().find(|(_, t)| *t == to).map(|(f, _)| *f);
            assert_eq!(to.predecessor(), expected, "into {to}");
            assert_eq!(Transition::to(to).expected_from(), expected, "into {to}");
        }
    }

    #[test]
    fn terminal_states_have_no_successor() {
        for state in [JobState::Completed, JobState::Failed] {
            assert!(state.is_terminal());
            assert!(!state.can_transition_to(JobState::Processing));
            assert!(!state.can_transition_to(JobState::Pending));
        }
    }

    #[test]
    fn job_id_rejects_path_like_values() {
        assert!(JobId::parse("unknown-id").is_ok());
        assert!(JobId::parse("01J9ZQ3V6K4S8X1B2C3D4E5F6G").is_ok());
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse("..").is_err());
        assert!(JobId::parse("a/b").is_err());
        assert!(JobId::parse("a b").is_err());
        assert!(JobId::parse(&"x".repeat(129)).is_err());
    }

    #[test]
    fn job_id_deserialization_validates() {
        let ok: Result<JobId, _> = serde_json::from_str("\"job-1\"");
        assert!(ok.is_ok());
        let bad: Result<JobId, _> = serde_json::from_str("\"../etc\"");
        assert!(bad.is_err());
    }

    #[test]
    fn transition_payload_rules() {
        assert!(Transition::to(JobState::Processing).validate().is_ok());
        assert!(Transition::to(JobState::Completed).validate().is_err());
        assert!(
            Transition::to(JobState::Completed)
                .with_artifact(meta(ArtifactKind::Table))
                .validate()
                .is_ok()
        );
        assert!(
            Transition::to(JobState::Completed)
                .with_artifact(meta(ArtifactKind::Failure))
                .validate()
                .is_err()
        );
        assert!(
            Transition::to(JobState::Failed)
                .with_failure_reason("disk full")
                .validate()
                .is_ok()
        );
        assert!(Transition::to(JobState::Failed).validate().is_err());
    }

    #[test]
    fn lease_expiry() {
        let lease = Lease::new("worker-1", Duration::from_secs(60));
        assert!(!lease.is_expired_at(Utc::now()));
        assert!(lease.is_expired_at(Utc::now() + chrono::Duration::seconds(61)));
    }
}
