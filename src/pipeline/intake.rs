//! Intake: accept uploaded files, filter by media type, store them under a
//! fresh job directory.
//!
//! Filenames come straight from the client, so they are reduced to a safe
//! basename before they touch the filesystem. Two uploads whose stems collide
//! (`a.png` and `a.pdf`) would both produce `a.md`; the later one is renamed
//! `a-2.pdf` so every result and download stays addressable.

use crate::error::BatchError;
use crate::job::{IntakeFile, Job, JobId, MediaType};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One item as it arrived in the request.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    /// The part's `Content-Type`, when the client sent one.
    pub declared_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, declared_type: Option<&str>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            declared_type: declared_type.map(str::to_string),
            bytes,
        }
    }
}

/// Response body of `POST /api/upload`.
#[derive(Debug, Clone, Serialize)]
pub struct IntakeReceipt {
    pub job_id: JobId,
    pub file_count: usize,
    pub files: Vec<String>,
}

impl IntakeReceipt {
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            file_count: job.files.len(),
            files: job.files.iter().map(|f| f.filename.clone()).collect(),
        }
    }
}

/// Reduce a client-supplied filename to a safe basename.
///
/// Directory components are dropped, anything outside `[A-Za-z0-9._-]`
/// becomes `_`, and leading dots are removed so the result is never hidden
/// or a parent reference. When the name has no extension the canonical one
/// for `media_type` is appended.
pub fn sanitize_filename(raw: &str, media_type: MediaType) -> String {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let mut name = if cleaned.trim_matches('_').is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    };

    if Path::new(&name).extension().is_none() {
        name.push('.');
        name.push_str(media_type.extension());
    }
    name
}

/// Split a filename into `(stem, ".ext")`; the extension part may be empty.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}

/// Rename `name` until its stem is not in `seen` (case-insensitive).
fn unique_name(name: String, seen: &mut HashSet<String>) -> String {
    let (stem, ext) = split_name(&name);
    if seen.insert(stem.to_lowercase()) {
        return name;
    }
    let mut n = 2;
    loop {
        let candidate_stem = format!("{stem}-{n}");
        if seen.insert(candidate_stem.to_lowercase()) {
            return format!("{candidate_stem}{ext}");
        }
        n += 1;
    }
}

/// Filter, name and store the uploads of one request.
///
/// Returns the new [`Job`] in `created` status. Unsupported items are dropped
/// with a warning; if nothing remains the whole request fails with
/// [`BatchError::NoValidFiles`].
pub async fn accept_uploads(
    uploads: Vec<Upload>,
    uploads_root: &Path,
    max_files: usize,
) -> Result<Job, BatchError> {
    let mut accepted = Vec::new();
    for upload in uploads {
        match MediaType::resolve(upload.declared_type.as_deref(), &upload.filename) {
            Some(media_type) => accepted.push((upload, media_type)),
            None => warn!(
                "Skipping '{}': unsupported type {:?}",
                upload.filename, upload.declared_type
            ),
        }
    }

    if accepted.is_empty() {
        return Err(BatchError::NoValidFiles);
    }
    if accepted.len() > max_files {
        return Err(BatchError::TooManyFiles {
            count: accepted.len(),
            limit: max_files,
        });
    }

    let id = JobId::new();
    let dir = uploads_root.join(id.to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| BatchError::storage(&dir, e))?;

    match store_files(accepted, &dir).await {
        Ok(files) => {
            info!("Job {}: accepted {} files", id, files.len());
            Ok(Job::new(id, files))
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                warn!("Could not clean up {}: {}", dir.display(), cleanup);
            }
            Err(e)
        }
    }
}

async fn store_files(
    accepted: Vec<(Upload, MediaType)>,
    dir: &Path,
) -> Result<Vec<IntakeFile>, BatchError> {
    let mut seen = HashSet::new();
    let mut files = Vec::with_capacity(accepted.len());

    for (upload, media_type) in accepted {
        let filename = unique_name(sanitize_filename(&upload.filename, media_type), &mut seen);
        let path: PathBuf = dir.join(&filename);
        tokio::fs::write(&path, &upload.bytes)
            .await
            .map_err(|e| BatchError::storage(&path, e))?;
        debug!(
            "Stored '{}' as {} ({} bytes, {})",
            upload.filename,
            filename,
            upload.bytes.len(),
            media_type.mime()
        );
        files.push(IntakeFile {
            filename,
            media_type,
            size: upload.bytes.len() as u64,
            path,
        });
    }
    Ok(files)
}
