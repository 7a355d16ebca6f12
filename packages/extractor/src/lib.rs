//! PDF table extraction.
//!
//! [`PdfTableExtractor`] implements [`jobs_core::Extractor`]: it loads the
//! stored document, parses it with `lopdf` on the blocking pool and returns the
//! first table of the first page that has one.

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
mod pdf;
mod tables;

pub use pdf::PdfTableExtractor;
pub use tables::{first_table, tables_from_text};
