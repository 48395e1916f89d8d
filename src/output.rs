//! Result types exposed to callers: per-file results and the per-job result.

use crate::job::{output_name, JobId};
use serde::{Deserialize, Serialize};

/// Whether a file produced Markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Success,
    Error,
}

/// The outcome for one uploaded file.
///
/// Serialises as `{filename, status, content?, tokens?, error?}`. A success
/// carries content and tokens, an error carries only the message; the
/// constructors are the only way to build one, so the two never mix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    pub filename: String,
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl FileResult {
    pub fn success(filename: impl Into<String>, content: String, tokens: u64) -> Self {
        Self {
            filename: filename.into(),
            status: FileStatus::Success,
            content: Some(content),
            tokens: Some(tokens),
            error: None,
        }
    }

    pub fn failure(filename: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: FileStatus::Error,
            content: None,
            tokens: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FileStatus::Success
    }

    /// Extracted Markdown, `None` for failed files.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn tokens(&self) -> Option<u64> {
        self.tokens
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// `<stem>.md`
    pub fn output_name(&self) -> String {
        output_name(&self.filename)
    }

    /// Body of the downloadable Markdown file, headed by the source filename.
    pub fn markdown_document(&self) -> Option<String> {
        self.content
            .as_deref()
            .map(|c| format!("# {}\n\n{}", self.filename, c))
    }
}

/// The complete, immutable result of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub total: usize,
    pub success: usize,
    /// Filenames whose status is `error`.
    pub failed: Vec<String>,
    pub total_tokens: u64,
    /// One entry per accepted upload, in upload order.
    pub results: Vec<FileResult>,
}

impl JobResult {
    pub fn new(job_id: JobId, results: Vec<FileResult>) -> Self {
        let failed: Vec<String> = results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.filename.clone())
            .collect();
        Self {
            job_id,
            total: results.len(),
            success: results.len() - failed.len(),
            failed,
            total_tokens: results.iter().filter_map(FileResult::tokens).sum(),
            results,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            total: self.total,
            success: self.success,
            failed: self.failed.clone(),
            total_tokens: self.total_tokens,
        }
    }

    /// Look a file up by its original name or by its `.md` output name.
    pub fn find(&self, name: &str) -> Option<&FileResult> {
        self.results
            .iter()
            .find(|r| r.filename == name)
            .or_else(|| self.results.iter().find(|r| r.output_name() == name))
    }

    pub fn successes(&self) -> impl Iterator<Item = &FileResult> {
        self.results.iter().filter(|r| r.is_success())
    }
}

/// Counts returned from `POST /api/process`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub total: usize,
    pub success: usize,
    pub failed: Vec<String>,
    pub total_tokens: u64,
}

/// A single downloadable Markdown file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownArtifact {
    pub file_name: String,
    pub content: String,
}

/// A zip archive of every successful file in a job.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub file_name: String,
    pub bytes: Vec<u8>,
}
