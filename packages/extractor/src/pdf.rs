//! `lopdf`-backed extractor.

use jobs_core::{ExtractFuture, ExtractResult, ExtractionError, Extractor, SourceRef};
use storage::DocumentStore;

use crate::tables::first_table;

/// Extracts the first table from a stored PDF document.
#[derive(Clone)]
pub struct PdfTableExtractor {
    documents: DocumentStore,
}

impl PdfTableExtractor {
    pub fn new(documents: DocumentStore) -> Self {
        Self { documents }
    }

    async fn run(documents: DocumentStore, source: SourceRef) -> ExtractResult {
        let bytes = documents
            .get(&source)
            .await
            .map_err(|e| ExtractionError::SourceUnavailable {
                source_ref: source.to_string(),
                message: e.to_string(),
            })?;

        let table = tokio::task::spawn_blocking(move || extract_first_table(&bytes))
            .await
            .map_err(|e| ExtractionError::Other(format!("Extraction task failed: {e}")))??;

        tracing::debug!("Extracted {} rows from {}", table.row_count(), source);
        Ok(table)
    }
}

impl Extractor for PdfTableExtractor {
    fn name(&self) -> &str {
        "pdf-table"
    }

    fn extract(&self, source: &SourceRef) -> ExtractFuture {
        Box::pin(Self::run(self.documents.clone(), source.clone()))
    }
}

/// Parse a PDF and return the first table found, scanning pages in order.
fn extract_first_table(bytes: &[u8]) -> ExtractResult {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractionError::Parse(e.to_string()))?;

    let pages = doc.get_pages().into_keys().filter_map(|page| {
        match doc.extract_text(&[page]) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!("Skipping page {} without extractable text: {}", page, e);
                None
            }
        }
    });

    first_table(pages).ok_or(ExtractionError::NoTables)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use bytes::Bytes;
    use jobs_core::JobId;
    use storage::{Storage, StorageConfig};

    use super::*;
    use crate::fixtures::{prose_pdf, table_pdf};

    async fn extractor_with(body: Option<Vec<u8>>) -> (PdfTableExtractor, SourceRef) {
        let storage = Storage::new(StorageConfig::memory()).await.unwrap();
        let documents = DocumentStore::new(storage, "uploads");
        let id = JobId::parse("doc-1").unwrap();
        let source = match body {
            Some(body) => documents.put(&id, Bytes::from(body)).await.unwrap(),
            None => documents.source_ref(&id),
        };
        (PdfTableExtractor::new(documents), source)
    }

    #[tokio::test]
    async fn extracts_table_from_pdf() {
        let (extractor, source) = extractor_with(Some(table_pdf().unwrap())).await;

        let table = extractor.extract(&source).await.unwrap();
        assert_eq!(
            table.rows,
            vec![
                vec!["h1".to_string(), "h2".to_string()],
                vec!["a".to_string(), "b".to_string()],
                vec!["c".to_string(), "d".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn pdf_without_table_is_no_tables() {
        let (extractor, source) = extractor_with(Some(prose_pdf().unwrap())).await;

        let err = extractor.extract(&source).await.unwrap_err();
        assert!(matches!(err, ExtractionError::NoTables));
        assert_eq!(err.to_string(), "No tables found in the document");
    }

    #[tokio::test]
    async fn corrupt_bytes_are_a_parse_error() {
        let (extractor, source) = extractor_with(Some(b"not a pdf at all".to_vec())).await;

        let err = extractor.extract(&source).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Parse(_)), "{err}");
    }

    #[tokio::test]
    async fn missing_document_reports_storage_cause() {
        let (extractor, source) = extractor_with(None).await;

        let err = extractor.extract(&source).await.unwrap_err();
        match err {
            ExtractionError::SourceUnavailable { source_ref, message } => {
                assert_eq!(source_ref, "uploads/doc-1/document");
                assert!(message.contains("not found"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
