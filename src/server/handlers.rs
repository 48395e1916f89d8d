//! Request handlers.
//!
//! Handlers only translate between HTTP and [`crate::batch::BatchService`]; all pipeline
//! behaviour lives in the service.

use super::AppState;
use crate::error::BatchError;
use crate::output::{JobResult, JobSummary};
use crate::pipeline::intake::{IntakeReceipt, Upload};
use crate::pipeline::llm::ApiKey;
use crate::prompts::{ExtractionPrompt, PromptConfig};
use crate::store::JobStatusReport;
use axum::{
    body::Body,
    extract::{multipart::MultipartError, rejection::JsonRejection, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ── Upload ───────────────────────────────────────────────────────────────

/// `POST /api/upload`: multipart `files` (repeated) and `api_key`.
///
/// The key is only checked for presence here; it is sent again with
/// `/api/process` and never stored.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IntakeReceipt>, BatchError> {
    let limit = state.service.config().max_upload_bytes;
    let mut uploads = Vec::new();
    let mut api_key = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        match field.name().unwrap_or("") {
            "files" | "files[]" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let declared = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                if filename.is_empty() && bytes.is_empty() {
                    continue;
                }
                debug!(
                    "Received '{}' ({:?}, {} bytes)",
                    filename,
                    declared,
                    bytes.len()
                );
                uploads.push(Upload {
                    filename,
                    declared_type: declared,
                    bytes: bytes.to_vec(),
                });
            }
            "api_key" => {
                let text = field.text().await.map_err(|e| multipart_error(e, limit))?;
                api_key = ApiKey::new(text);
            }
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }

    if uploads.is_empty() {
        return Err(BatchError::MissingField("files"));
    }
    if api_key.is_none() {
        return Err(BatchError::MissingField("api_key"));
    }

    Ok(Json(state.service.upload(uploads).await?))
}

fn multipart_error(e: MultipartError, limit: usize) -> BatchError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        BatchError::PayloadTooLarge { limit }
    } else {
        BatchError::BadRequest(e.body_text())
    }
}

// ── Process ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub job_id: Option<String>,
    pub api_key: Option<String>,
    pub custom_prompt: Option<String>,
    pub format_example: Option<String>,
    #[serde(default)]
    pub use_custom: bool,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub job_id: String,
    pub status: &'static str,
    pub summary: JobSummary,
}

/// `POST /api/process`: run the job and answer with its summary.
pub async fn process(
    State(state): State<AppState>,
    body: Result<Json<ProcessRequest>, JsonRejection>,
) -> Result<Json<ProcessResponse>, BatchError> {
    let Json(req) = body.map_err(|e| BatchError::BadRequest(e.body_text()))?;

    let job_id = req
        .job_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(BatchError::MissingField("job_id"))?;
    let credential = req
        .api_key
        .and_then(ApiKey::new)
        .ok_or(BatchError::MissingField("api_key"))?;
    let prompt = ExtractionPrompt::from_request(
        req.use_custom,
        req.custom_prompt.as_deref(),
        req.format_example.as_deref(),
    );

    let result = state.service.process(&job_id, credential, prompt).await?;
    Ok(Json(ProcessResponse {
        job_id: result.job_id.to_string(),
        status: "completed",
        summary: result.summary(),
    }))
}

// ── Retrieval ────────────────────────────────────────────────────────────

/// `GET /api/result/:job_id`
pub async fn result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResult>, BatchError> {
    let result = state.service.result(&job_id).await?;
    Ok(Json(JobResult::clone(&result)))
}

/// `GET /api/status/:job_id`
pub async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusReport>, BatchError> {
    Ok(Json(state.service.status(&job_id).await?))
}

/// `GET /api/download/:job_id/:filename`
pub async fn download(
    State(state): State<AppState>,
    Path((job_id, filename)): Path<(String, String)>,
) -> Result<Response, BatchError> {
    let artifact = state.service.single_file(&job_id, &filename).await?;
    attachment(
        "text/markdown; charset=utf-8",
        &artifact.file_name,
        artifact.content.into_bytes(),
    )
}

/// `GET /api/download-all/:job_id`
pub async fn download_all(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, BatchError> {
    let bundle = state.service.bundle(&job_id).await?;
    attachment("application/zip", &bundle.file_name, bundle.bytes)
}

fn attachment(content_type: &str, file_name: &str, body: Vec<u8>) -> Result<Response, BatchError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, content_disposition(file_name))
        .body(Body::from(body))
        .map_err(|e| BatchError::Internal(format!("build response: {e}")))
}

/// `attachment; filename="<ascii>"; filename*=UTF-8''<percent-encoded>`
pub fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        urlencoding::encode(file_name)
    )
}

// ── Prompt settings ──────────────────────────────────────────────────────

/// `GET /api/config/prompt`
pub async fn get_prompt_config(
    State(state): State<AppState>,
) -> Result<Json<PromptConfig>, BatchError> {
    Ok(Json(state.service.prompt_config().await?))
}

#[derive(Debug, Deserialize)]
pub struct PromptConfigUpdate {
    pub prompt: Option<String>,
    pub format_example: Option<String>,
}

/// `POST /api/config/prompt`: fields left out keep their saved value.
pub async fn save_prompt_config(
    State(state): State<AppState>,
    body: Result<Json<PromptConfigUpdate>, JsonRejection>,
) -> Result<impl IntoResponse, BatchError> {
    let Json(update) = body.map_err(|e| BatchError::BadRequest(e.body_text()))?;
    let mut config = state.service.prompt_config().await?;
    if let Some(prompt) = update.prompt {
        config.prompt = prompt;
    }
    if let Some(example) = update.format_example {
        config.format_example = example;
    }
    state.service.save_prompt_config(&config).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}
