//! Extractor capability seam.

use std::future::Future;
use std::pin::Pin;

use crate::{SourceRef, TableData};

/// Result type for extractors.
pub type ExtractResult = Result<TableData, ExtractionError>;

/// Future type for async extractors.
pub type ExtractFuture = Pin<Box<dyn Future<Output = ExtractResult> + Send>>;

/// Turns a source document into tabular data.
///
/// Implementations are free to block inside the returned future only if they
/// move the work onto the blocking pool themselves.
pub trait Extractor: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Extract the first table found in the referenced document.
    fn extract(&self, source: &SourceRef) -> ExtractFuture;
}

/// Errors raised while extracting a table.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("No tables found in the document")]
    NoTables,

    #[error("Source document {source_ref} unavailable: {message}")]
    SourceUnavailable { source_ref: String, message: String },

    #[error("Failed to parse document: {0}")]
    Parse(String),

    #[error("Extractor panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}
