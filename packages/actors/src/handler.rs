//! Closure-backed extractor.

use jobs_core::{ExtractFuture, Extractor, SourceRef};

/// A simple function-based extractor.
///
/// Useful for tests and for wiring an extraction routine that does not need
/// its own type.
pub struct FnExtractor<F>
where
    F: Fn(&SourceRef) -> ExtractFuture + Send + Sync + 'static,
{
    name: String,
    extract: F,
}

impl<F> FnExtractor<F>
where
    F: Fn(&SourceRef) -> ExtractFuture + Send + Sync + 'static,
{
    /// Create a new function-based extractor.
    pub fn new(name: impl Into<String>, extract: F) -> Self {
        Self {
            name: name.into(),
            extract,
        }
    }
}

impl<F> Extractor for FnExtractor<F>
where
    F: Fn(&SourceRef) -> ExtractFuture + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, source: &SourceRef) -> ExtractFuture {
        (self.extract)(source)
    }
}
