//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
const JOB_SCHEMA: &str = r#"
-- Job table: one record per submitted document
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS job_id ON job TYPE string;
DEFINE FIELD IF NOT EXISTS label ON job TYPE string;
DEFINE FIELD IF NOT EXISTS source ON job TYPE string;
DEFINE FIELD IF NOT EXISTS output ON job TYPE string;
DEFINE FIELD IF NOT EXISTS state ON job TYPE string
    ASSERT $value INSIDE ["pending", "processing", "completed", "failed"];
DEFINE FIELD IF NOT EXISTS lease_owner ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS lease_expires_at_ms ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS artifact_kind ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS artifact_key ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS artifact_size ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS artifact_written_at ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS failure_reason ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE string;
DEFINE FIELD IF NOT EXISTS updated_at ON job TYPE string;

DEFINE INDEX IF NOT EXISTS job_job_id ON job FIELDS job_id UNIQUE;
DEFINE INDEX IF NOT EXISTS job_state ON job FIELDS state;
DEFINE INDEX IF NOT EXISTS job_lease ON job FIELDS state, lease_expires_at_ms;
"#;
