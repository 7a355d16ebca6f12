//! SurrealDB integration for the extraction job engine.
//!
//! This crate provides database connectivity and the job record store.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use repositories::JobStore;
pub use schema::init_schema;

/// Connect and initialize the schema, returning a ready job store.
pub async fn init(config: &DbConfig) -> Result<JobStore, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(JobStore::new(db))
}
