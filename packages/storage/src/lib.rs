//! Object storage for uploaded documents and job artifacts.
//!
//! Goal:
//! - S3-compatible storage in production/staging
//! - On-disk storage for local dev
//! - In-memory storage for tests
//!
//! A thin wrapper around `object_store`, which already provides S3, local
//! filesystem, and in-memory backends. Artifact writes use create-only puts so
//! each job's artifact is written at most once.

mod backend;
mod documents;
mod sink;

pub use backend::{Backend, Storage, StorageConfig, StorageError};
pub use documents::DocumentStore;
pub use sink::{ResultSink, SinkError};
