//! Error types for the edgequake-batch2md library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BatchError`] — **Request-level**: the operation cannot proceed at all
//!   (no valid files uploaded, unknown job id, job still running). Returned as
//!   `Err(BatchError)` from the service and mapped to an HTTP status by
//!   [`crate::server`].
//!
//! * [`UnitError`] — **Unit-level**: one page of one file failed (render
//!   failure, VLM error, timeout) but every sibling unit is unaffected. Stored
//!   inside the job result as the owning file's `error` message, so a batch
//!   with one bad page still completes with a mixed result set.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All request-level errors returned by the edgequake-batch2md library.
///
/// Per-page failures use [`UnitError`] and end up in
/// [`crate::output::FileResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum BatchError {
    // ── Intake errors ─────────────────────────────────────────────────────
    /// None of the uploaded items had an accepted media type.
    #[error("No valid image or PDF files in the upload (accepted: PNG, JPEG, PDF)")]
    NoValidFiles,

    /// More files were accepted than a single job may hold.
    #[error("Too many files in one upload: {count} (limit is {limit})")]
    TooManyFiles { count: usize, limit: usize },

    /// A required request field was absent or empty.
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    /// The request body could not be read.
    #[error("Malformed request: {0}")]
    BadRequest(String),

    /// The upload body exceeded the configured size limit.
    #[error("Upload exceeds the size limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    // ── Job lookup errors ─────────────────────────────────────────────────
    /// No job exists with this id.
    #[error("Job '{0}' not found")]
    JobNotFound(String),

    /// The job exists but has not finished processing.
    #[error("Job '{job_id}' is not ready (status: {status})")]
    JobNotReady { job_id: String, status: String },

    /// Processing the job failed as a whole; no result will ever exist.
    #[error("Job '{job_id}' failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    /// The requested file is absent from the result or has `error` status.
    #[error("File '{filename}' not found in job '{job_id}'")]
    FileNotFound { job_id: String, filename: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Every file in the job failed; the downstream VLM is most likely
    /// unreachable or rejecting the credential.
    #[error("All {total} files failed.\nFirst error: {first_error}")]
    AllFilesFailed { total: usize, first_error: String },

    /// The configured provider could not be constructed.
    #[error("VLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing job storage failed.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Building the zip bundle failed.
    #[error("Failed to build archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchError {
    /// Wrap an I/O error with the path it happened on.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BatchError::Storage {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single processing unit (one page of one file).
///
/// Pages are reported 1-indexed in messages; `page` fields hold the 1-based
/// number as well so the message and the field never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UnitError {
    /// The stored upload could not be read back.
    #[error("file could not be read: {detail}")]
    Unreadable { detail: String },

    /// Declared as PDF but the bytes are not a PDF.
    #[error("file is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// The PDF could not be rasterised.
    #[error("PDF rendering failed: {detail}")]
    RenderFailed { detail: String },

    /// The PDF exceeds the configured page limit and was not rendered.
    #[error("PDF has {pages} pages, more than the limit of {limit}")]
    TooManyPages { pages: usize, limit: usize },

    /// The job already holds as many rendered pages as it may.
    #[error("job page budget exhausted ({remaining} of {limit} pages left)")]
    PageBudgetExceeded { remaining: usize, limit: usize },

    /// The VLM call for this page failed.
    #[error("page {page}: extraction failed: {detail}")]
    ExtractionFailed { page: usize, detail: String },

    /// The VLM call for this page did not finish in time.
    #[error("page {page}: extraction timed out after {after:?}")]
    Timeout { page: usize, after: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_failure_names_one_based_page() {
        let e = UnitError::ExtractionFailed {
            page: 2,
            detail: "quota exceeded".into(),
        };
        assert_eq!(e.to_string(), "page 2: extraction failed: quota exceeded");
    }

    #[test]
    fn too_many_files_display() {
        let e = BatchError::TooManyFiles {
            count: 120,
            limit: 100,
        };
        let msg = e.to_string();
        assert!(msg.contains("120"), "got: {msg}");
        assert!(msg.contains("100"), "got: {msg}");
    }

    #[test]
    fn job_not_ready_mentions_status() {
        let e = BatchError::JobNotReady {
            job_id: "abc".into(),
            status: "processing".into(),
        };
        assert!(e.to_string().contains("processing"));
    }

    #[test]
    fn unit_error_round_trips_through_json() {
        let e = UnitError::Timeout {
            page: 3,
            after: Duration::from_secs(120),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: UnitError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
