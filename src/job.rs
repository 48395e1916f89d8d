//! Job identity and intake-side data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// Opaque job identifier (a v4 UUID).
///
/// Ids double as directory names under the data dir, so parsing from
/// untrusted input only ever succeeds for a well-formed UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Allocate a fresh, random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight characters, used in bundle filenames.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Lifecycle of a job: `created` → `processing` → `completed` | `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// `true` once no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media types accepted at intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Png,
    Jpeg,
    Pdf,
}

impl MediaType {
    /// Map a declared MIME type onto an accepted media type.
    ///
    /// Parameters such as `; charset=...` are ignored and matching is
    /// case-insensitive. `image/jpg` is a common non-standard alias.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/png" => Some(MediaType::Png),
            "image/jpeg" | "image/jpg" => Some(MediaType::Jpeg),
            "application/pdf" => Some(MediaType::Pdf),
            _ => None,
        }
    }

    /// Resolve the media type of an upload.
    ///
    /// The declared type wins when present. Browsers and CLI clients often
    /// send no type or `application/octet-stream`; only then is the type
    /// guessed from the filename extension.
    pub fn resolve(declared: Option<&str>, filename: &str) -> Option<Self> {
        match declared.map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) if !d.eq_ignore_ascii_case("application/octet-stream") => Self::from_mime(d),
            _ => mime_guess::from_path(filename)
                .iter()
                .find_map(|m| Self::from_mime(m.essence_str())),
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            MediaType::Png => "image/png",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Pdf => "application/pdf",
        }
    }

    /// Canonical filename extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Png => "png",
            MediaType::Jpeg => "jpg",
            MediaType::Pdf => "pdf",
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, MediaType::Pdf)
    }
}

/// One accepted, stored upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeFile {
    /// Sanitised filename, unique (by stem) within the job.
    pub filename: String,
    pub media_type: MediaType,
    /// Size in bytes.
    pub size: u64,
    /// Where the bytes were written.
    pub path: PathBuf,
}

impl IntakeFile {
    /// Name of the Markdown output for this file: the extension swapped for `.md`.
    pub fn output_name(&self) -> String {
        output_name(&self.filename)
    }
}

/// Swap a filename's extension for `.md`.
pub fn output_name(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| filename.to_string());
    format!("{stem}.md")
}

/// A batch of files processed together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub files: Vec<IntakeFile>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: JobId, files: Vec<IntakeFile>) -> Self {
        Self {
            id,
            files,
            status: JobStatus::Created,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_parses_its_own_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn job_id_rejects_paths() {
        assert!("../etc/passwd".parse::<JobId>().is_err());
        assert!("".parse::<JobId>().is_err());
    }

    #[test]
    fn declared_mime_types() {
        assert_eq!(MediaType::from_mime("image/png"), Some(MediaType::Png));
        assert_eq!(MediaType::from_mime("image/jpg"), Some(MediaType::Jpeg));
        assert_eq!(MediaType::from_mime("IMAGE/JPEG"), Some(MediaType::Jpeg));
        assert_eq!(
            MediaType::from_mime("application/pdf; q=1"),
            Some(MediaType::Pdf)
        );
        assert_eq!(MediaType::from_mime("text/plain"), None);
        assert_eq!(MediaType::from_mime("image/gif"), None);
    }

    #[test]
    fn declared_type_wins_over_extension() {
        assert_eq!(MediaType::resolve(Some("text/plain"), "scan.png"), None);
        assert_eq!(
            MediaType::resolve(Some("application/pdf"), "noext"),
            Some(MediaType::Pdf)
        );
    }

    #[test]
    fn extension_used_when_type_missing_or_generic() {
        assert_eq!(MediaType::resolve(None, "a.PNG"), Some(MediaType::Png));
        assert_eq!(
            MediaType::resolve(Some("application/octet-stream"), "b.pdf"),
            Some(MediaType::Pdf)
        );
        assert_eq!(MediaType::resolve(None, "c.txt"), None);
    }

    #[test]
    fn output_names_swap_extension() {
        assert_eq!(output_name("a.png"), "a.md");
        assert_eq!(output_name("report.final.pdf"), "report.final.md");
        assert_eq!(output_name("noext"), "noext.md");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Created.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
