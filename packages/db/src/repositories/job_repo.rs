//! Job record store: creation, lookup, CAS transitions and leases.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jobs_core::{
    ArtifactKind, ArtifactMeta, Job, JobId, JobState, Lease, OutputRef, SourceRef, Transition,
    expiry_from_now,
};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

/// Store for job records.
///
/// Every state change is a single conditional `UPDATE` keyed by the expected
/// current state, so concurrent writers cannot overwrite each other.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    job_id: String,
    label: String,
    source: String,
    output: String,
    state: String,
    #[serde(default)]
    lease_owner: Option<String>,
    #[serde(default)]
    lease_expires_at_ms: Option<i64>,
    #[serde(default)]
    artifact_kind: Option<String>,
    #[serde(default)]
    artifact_key: Option<String>,
    #[serde(default)]
    artifact_size: Option<i64>,
    #[serde(default)]
    artifact_written_at: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRecord {
    fn from_job(job: &Job) -> Self {
        let artifact = job.artifact.as_ref();
        Self {
            job_id: job.id.to_string(),
            label: job.label.clone(),
            source: job.source.to_string(),
            output: job.output.to_string(),
            state: job.state.as_str().to_string(),
            lease_owner: job.lease.as_ref().map(|l| l.owner.clone()),
            lease_expires_at_ms: job.lease.as_ref().map(|l| l.expires_at.timestamp_millis()),
            artifact_kind: artifact.map(|a| a.kind.as_str().to_string()),
            artifact_key: artifact.map(|a| a.key.clone()),
            artifact_size: artifact.map(|a| a.size_bytes as i64),
            artifact_written_at: artifact.map(|a| a.written_at.to_rfc3339()),
            failure_reason: job.failure_reason.clone(),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }

    fn into_job(self) -> Result<Job, DbError> {
        let id = JobId::parse(&self.job_id).map_err(|e| DbError::Serialization(e.to_string()))?;

        let lease = match (self.lease_owner, self.lease_expires_at_ms) {
            (Some(owner), Some(ms)) => Some(Lease {
                owner,
                expires_at: from_millis(ms)?,
            }),
            _ => None,
        };

        let artifact = match (self.artifact_kind, self.artifact_key) {
            (Some(kind), Some(key)) => Some(ArtifactMeta {
                kind: kind.parse::<ArtifactKind>().map_err(DbError::Serialization)?,
                key,
                size_bytes: self.artifact_size.unwrap_or_default().max(0) as u64,
                written_at: match self.artifact_written_at {
                    Some(ts) => parse_timestamp(&ts)?,
                    None => Utc::now(),
                },
            }),
            _ => None,
        };

        Ok(Job {
            id,
            label: self.label,
            source: SourceRef(self.source),
            output: OutputRef(self.output),
            state: self.state.parse().map_err(DbError::Serialization)?,
            lease,
            artifact,
            failure_reason: self.failure_reason,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Serialization(format!("bad timestamp {value:?}: {e}")))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::Serialization(format!("bad lease expiry: {ms}")))
}

fn is_duplicate(err: &surrealdb::Error) -> bool {
    let msg = err.to_string();
    msg.contains("already exists") || msg.contains("already contains")
}

fn not_found(id: &JobId) -> DbError {
    DbError::NotFound(format!("Job not found: {}", id))
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new PENDING job. Fails if the identifier is already taken.
    pub async fn create(
        &self,
        id: JobId,
        label: impl Into<String>,
        source: SourceRef,
        output: OutputRef,
    ) -> Result<Job, DbError> {
        let job = Job::new(id, label, source, output);
        let record = JobRecord::from_job(&job);

        let created: Result<Option<JobRecord>, surrealdb::Error> =
            self.db.create(("job", job.id.to_string())).content(record).await;

        match created {
            Ok(Some(record)) => {
                tracing::debug!("Created job record {}", job.id);
                record.into_job()
            }
            Ok(None) => Err(DbError::Query(format!("Failed to create job {}", job.id))),
            Err(e) if is_duplicate(&e) => Err(DbError::DuplicateIdentifier(job.id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Get a job by ID.
    pub async fn get(&self, id: &JobId) -> Result<Job, DbError> {
        self.find(id).await?.ok_or_else(|| not_found(id))
    }

    async fn find(&self, id: &JobId) -> Result<Option<Job>, DbError> {
        let record: Option<JobRecord> = self.db.select(("job", id.to_string())).await?;
        record.map(JobRecord::into_job).transpose()
    }

    /// Apply a state transition as a compare-and-swap.
    ///
    /// The update only lands when the job is in the predecessor state of the
    /// target (and, for `held_by` transitions, while that owner holds the
    /// lease). Terminal transitions clear the lease.
    pub async fn transition(&self, id: &JobId, transition: Transition) -> Result<Job, DbError> {
        transition.validate().map_err(DbError::InvalidPayload)?;

        let Some(from) = transition.expected_from() else {
            let current = self.get(id).await?;
            return Err(DbError::InvalidTransition {
                from: current.state,
                to: transition.to,
            });
        };

        let mut sets = vec!["state = $to", "updated_at = $now"];
        let mut conditions = vec!["state = $from"];

        if transition.to.is_terminal() {
            sets.push("lease_owner = NONE");
            sets.push("lease_expires_at_ms = NONE");
        }
        if transition.artifact.is_some() {
            sets.push("artifact_kind = $artifact_kind");
            sets.push("artifact_key = $artifact_key");
            sets.push("artifact_size = $artifact_size");
            sets.push("artifact_written_at = $artifact_written_at");
        }
        if transition.failure_reason.is_some() {
            sets.push("failure_reason = $failure_reason");
        }
        if transition.lease_owner.is_some() {
            conditions.push("lease_owner = $owner");
        }

        let query = format!(
            "UPDATE type::thing('job', $id) SET {} WHERE {} RETURN AFTER",
            sets.join(", "),
            conditions.join(" AND ")
        );

        let mut request = self
            .db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("to", transition.to.as_str()))
            .bind(("from", from.as_str()))
            .bind(("now", Utc::now().to_rfc3339()));

        if let Some(meta) = &transition.artifact {
            request = request
                .bind(("artifact_kind", meta.kind.as_str().to_string()))
                .bind(("artifact_key", meta.key.clone()))
                .bind(("artifact_size", meta.size_bytes as i64))
                .bind(("artifact_written_at", meta.written_at.to_rfc3339()));
        }
        if let Some(reason) = &transition.failure_reason {
            request = request.bind(("failure_reason", reason.clone()));
        }
        if let Some(owner) = &transition.lease_owner {
            request = request.bind(("owner", owner.clone()));
        }

        let mut response = request.await?;
        let records: Vec<JobRecord> = response.take(0)?;

        if let Some(record) = records.into_iter().next() {
            let job = record.into_job()?;
            tracing::debug!("Job {} transitioned {} -> {}", id, from, job.state);
            return Ok(job);
        }

        // The conditional update matched nothing: work out why.
        let current = self.get(id).await?;
        match &transition.lease_owner {
            Some(owner) if current.state == from => Err(DbError::LeaseNotHeld {
                id: id.to_string(),
                owner: owner.clone(),
            }),
            _ => Err(DbError::InvalidTransition {
                from: current.state,
                to: transition.to,
            }),
        }
    }

    /// Claim the job for `owner`.
    ///
    /// Succeeds for a PENDING or PROCESSING job whose lease is absent, expired
    /// or already held by `owner`, moving it to PROCESSING. Returns `None`
    /// when the claim is refused (job terminal or leased by someone else).
    pub async fn claim(&self, id: &JobId, owner: &str, ttl: Duration) -> Result<Option<Job>, DbError> {
        let now = Utc::now();
        let expires_at = expiry_from_now(ttl);

        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = "processing",
                    lease_owner = $owner,
                    lease_expires_at_ms = $expires_ms,
                    updated_at = $now
                WHERE state INSIDE ["pending", "processing"]
                    AND (lease_expires_at_ms = NONE
                        OR lease_expires_at_ms <= $now_ms
                        OR lease_owner = $owner)
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("owner", owner.to_string()))
            .bind(("expires_ms", expires_at.timestamp_millis()))
            .bind(("now", now.to_rfc3339()))
            .bind(("now_ms", now.timestamp_millis()))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        match records.into_iter().next() {
            Some(record) => Ok(Some(record.into_job()?)),
            None => {
                // Distinguish a refused claim from a missing record.
                self.get(id).await?;
                Ok(None)
            }
        }
    }

    /// Extend the lease held by `owner`. Returns false if the lease was lost.
    pub async fn renew_lease(&self, id: &JobId, owner: &str, ttl: Duration) -> Result<bool, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET lease_expires_at_ms = $expires_ms
                WHERE state = "processing" AND lease_owner = $owner
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("owner", owner.to_string()))
            .bind(("expires_ms", expiry_from_now(ttl).timestamp_millis()))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        Ok(!records.is_empty())
    }

    /// PROCESSING jobs whose lease expired at or before `now`, oldest first.
    pub async fn expired_leases(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                SELECT * FROM job
                WHERE state = "processing"
                    AND lease_expires_at_ms != NONE
                    AND lease_expires_at_ms <= $now_ms
                ORDER BY lease_expires_at_ms ASC
                LIMIT $limit
                "#,
            )
            .bind(("now_ms", now.timestamp_millis()))
            .bind(("limit", limit as i64))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        records.into_iter().map(JobRecord::into_job).collect()
    }

    /// Drop an expired lease so the job can be redelivered and claimed again.
    ///
    /// Only applies while `owner` still holds a lease that expired at or before
    /// `now`; returns false otherwise.
    pub async fn release_expired_lease(
        &self,
        id: &JobId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET lease_owner = NONE, lease_expires_at_ms = NONE, updated_at = $now
                WHERE state = "processing"
                    AND lease_owner = $owner
                    AND lease_expires_at_ms <= $now_ms
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("owner", owner.to_string()))
            .bind(("now", Utc::now().to_rfc3339()))
            .bind(("now_ms", now.timestamp_millis()))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        Ok(!records.is_empty())
    }

    /// Count jobs per state.
    pub async fn count_by_state(&self, state: JobState) -> Result<u64, DbError> {
        #[derive(Deserialize)]
        struct Count {
            count: i64,
        }

        let mut response = self
            .db
            .query("SELECT count() AS count FROM job WHERE state = $state GROUP ALL")
            .bind(("state", state.as_str()))
            .await?;

        let counts: Vec<Count> = response.take(0)?;
        Ok(counts.first().map(|c| c.count.max(0) as u64).unwrap_or(0))
    }
}
