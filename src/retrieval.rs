//! Read-only queries against completed jobs.
//!
//! Every lookup goes through the job id first: malformed or unknown ids are
//! `JobNotFound`, jobs still running are `JobNotReady`. Only then is the
//! result consulted.

use crate::error::BatchError;
use crate::output::{Bundle, JobResult, MarkdownArtifact};
use crate::store::{parse_job_id, JobStatusReport, JobStore};
use std::io::{Cursor, Write};
use std::sync::Arc;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// The full result of a completed job.
pub async fn get_result(store: &JobStore, job_id: &str) -> Result<Arc<JobResult>, BatchError> {
    store.result(parse_job_id(job_id)?).await
}

/// Lifecycle status and unit counters; available in every state.
pub async fn get_status(store: &JobStore, job_id: &str) -> Result<JobStatusReport, BatchError> {
    store.status(parse_job_id(job_id)?).await
}

/// One successful file as a downloadable Markdown document.
///
/// `filename` may be the original upload name (`scan.pdf`) or the output
/// name (`scan.md`).
pub async fn get_single_file(
    store: &JobStore,
    job_id: &str,
    filename: &str,
) -> Result<MarkdownArtifact, BatchError> {
    let result = get_result(store, job_id).await?;
    let not_found = || BatchError::FileNotFound {
        job_id: job_id.to_string(),
        filename: filename.to_string(),
    };

    let file = result.find(filename).ok_or_else(not_found)?;
    let content = file.markdown_document().ok_or_else(not_found)?;
    Ok(MarkdownArtifact {
        file_name: file.output_name(),
        content,
    })
}

/// A zip of every successful file in the job.
pub async fn get_bundle(store: &JobStore, job_id: &str) -> Result<Bundle, BatchError> {
    let result = get_result(store, job_id).await?;
    let bytes = tokio::task::spawn_blocking(move || build_bundle(&result))
        .await
        .map_err(|e| BatchError::Internal(format!("Archive task panicked: {}", e)))??;
    let id = parse_job_id(job_id)?;
    Ok(Bundle {
        file_name: format!("results_{}.zip", id.short()),
        bytes,
    })
}

/// Zip one `<stem>.md` entry per successful file. No successes → empty archive.
pub fn build_bundle(result: &JobResult) -> Result<Vec<u8>, BatchError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = 0;
    for file in result.successes() {
        if let Some(doc) = file.markdown_document() {
            zip.start_file(file.output_name(), options)?;
            zip.write_all(doc.as_bytes())
                .map_err(|e| BatchError::Internal(format!("zip write: {e}")))?;
            entries += 1;
        }
    }

    let cursor = zip.finish()?;
    debug!("Bundled {} files for job {}", entries, result.job_id);
    Ok(cursor.into_inner())
}
