//! Upload admission checks, applied before a job exists.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// A document received from a client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl Upload {
    pub fn new(filename: impl Into<String>, content_type: Option<String>, bytes: Bytes) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            bytes,
        }
    }

    /// Display label: the filename up to its first dot, without any directory part.
    pub fn label(&self) -> String {
        let base = self
            .filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.filename);
        let stem = base.split('.').next().unwrap_or(base);
        if stem.is_empty() {
            base.to_string()
        } else {
            stem.to_string()
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Reasons an upload is refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdmissionError {
    #[error("Please upload a pdf file.")]
    MissingFile,

    #[error("No file selected.")]
    EmptyFilename,

    #[error("Invalid file type. Only PDF files are allowed.")]
    InvalidContentType { content_type: Option<String> },

    #[error("The uploaded file is empty.")]
    EmptyFile,

    #[error("File size exceeds the limit of {limit_mb} MB. The uploaded file is {size_mb:.2} MB.")]
    TooLarge { size_mb: f64, limit_mb: u64 },

    /// The request body was cut off at the transport limit before the
    /// upload could be measured.
    #[error("File size exceeds the limit of {limit_mb} MB.")]
    BodyTooLarge { limit_mb: u64 },
}

/// Limits applied to incoming uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionPolicy {
    pub max_upload_bytes: u64,
    pub accepted_content_types: Vec<String>,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_upload_bytes: 16 * BYTES_PER_MB,
            accepted_content_types: vec!["application/pdf".to_string()],
        }
    }
}

impl AdmissionPolicy {
    pub fn with_max_upload_mb(mut self, mb: u64) -> Self {
        self.max_upload_bytes = mb.saturating_mul(BYTES_PER_MB);
        self
    }

    /// Upload limit in whole megabytes, as shown to clients.
    pub fn limit_mb(&self) -> u64 {
        self.max_upload_bytes / BYTES_PER_MB
    }

    /// Check an upload against this policy.
    pub fn validate(&self, upload: &Upload) -> Result<(), AdmissionError> {
        if upload.filename.trim().is_empty() {
            return Err(AdmissionError::EmptyFilename);
        }

        let accepted = upload.content_type.as_deref().is_some_and(|ct| {
            let essence = ct.split(';').next().unwrap_or(ct).trim();
            self.accepted_content_types
                .iter()
                .any(|a| a.eq_ignore_ascii_case(essence))
        });
        if !accepted {
            return Err(AdmissionError::InvalidContentType {
                content_type: upload.content_type.clone(),
            });
        }

        let size = upload.size_bytes();
        if size == 0 {
            return Err(AdmissionError::EmptyFile);
        }
        if size > self.max_upload_bytes {
            return Err(AdmissionError::TooLarge {
                size_mb: size as f64 / BYTES_PER_MB as f64,
                limit_mb: self.limit_mb(),
            });
        }

        Ok(())
    }
}
