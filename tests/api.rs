//! HTTP integration tests for edgequake-batch2md.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`. The VLM
//! and pdfium are replaced by stubs, so no test needs network access or a
//! pdfium library:
//!
//! * PDFs are fake: `%PDF-stub pages=N fail=K` renders N pages, page K of
//!   which makes the extractor fail. Lines after the header, split on form
//!   feeds, replace the default page texts.
//! * The extractor echoes the image bytes back as Markdown and counts calls.

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use edgequake_batch2md::{
    create_router, ApiKey, AppState, BatchService, Extraction, ExtractError, ExtractionPrompt,
    Extractor, MediaType, PageImage, PageRasterizer, RenderSettings, ServiceConfig, UnitError,
};
use serde_json::{json, Value};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

// ── Stubs ────────────────────────────────────────────────────────────────────

struct StubRasterizer;

impl PageRasterizer for StubRasterizer {
    fn rasterize(&self, pdf: &[u8], settings: RenderSettings) -> Result<Vec<PageImage>, UnitError> {
        let text = String::from_utf8_lossy(pdf);
        let field = |key: &str| -> Option<usize> {
            text.split_whitespace()
                .find_map(|tok| tok.strip_prefix(key))
                .and_then(|v| v.parse().ok())
        };
        let pages = field("pages=").ok_or_else(|| UnitError::RenderFailed {
            detail: "corrupt stub pdf".into(),
        })?;
        if pages > settings.max_pages {
            return Err(UnitError::TooManyPages {
                pages,
                limit: settings.max_pages,
            });
        }
        let fail = field("fail=");
        let bodies: Vec<&str> = text
            .split_once('\n')
            .map(|(_, rest)| rest.split('\u{c}').collect())
            .unwrap_or_default();
        Ok((1..=pages)
            .map(|i| {
                let data = match bodies.get(i - 1) {
                    Some(body) if Some(i) != fail => body.to_string(),
                    _ => {
                        let marker = if Some(i) == fail { "FAIL" } else { "PDF" };
                        format!("{marker} page {i}")
                    }
                };
                PageImage {
                    data: data.into_bytes(),
                    media_type: MediaType::Png,
                }
            })
            .collect())
    }
}

#[derive(Default)]
struct StubExtractor {
    calls: AtomicUsize,
    system_prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl Extractor for StubExtractor {
    async fn extract(
        &self,
        image: &PageImage,
        prompt: &ExtractionPrompt,
        credential: &ApiKey,
    ) -> Result<Extraction, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.system_prompts
            .lock()
            .unwrap()
            .push(prompt.system.clone());
        assert_eq!(credential.expose(), "sk-test");

        let text = String::from_utf8_lossy(&image.data).into_owned();
        if text.starts_with("FAIL") {
            return Err(ExtractError::Api {
                status: 500,
                message: "stub failure".into(),
            });
        }
        Ok(Extraction {
            content: text,
            tokens_used: 10,
        })
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

struct TestApp {
    router: Router,
    extractor: Arc<StubExtractor>,
    _dir: TempDir,
}

fn setup_test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig::builder()
        .data_dir(dir.path())
        .max_files_per_job(5)
        .build()
        .unwrap();
    let extractor = Arc::new(StubExtractor::default());
    let service = BatchService::with_components(
        config,
        Arc::clone(&extractor) as Arc<dyn Extractor>,
        Arc::new(StubRasterizer),
    );
    TestApp {
        router: create_router(AppState::new(Arc::new(service))),
        extractor,
        _dir: dir,
    }
}

const BOUNDARY: &str = "batch2md-test-boundary";

/// A multipart part: (field name, filename, content type, body).
type Part<'a> = (&'a str, Option<&'a str>, Option<&'a str>, &'a str);

fn multipart_request(parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, filename, content_type, text) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(f) => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n")
                    .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n").as_bytes(),
            ),
        }
        if let Some(ct) = content_type {
            body.extend_from_slice(format!("Content-Type: {ct}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(text.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = app.router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}

async fn send_json(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(app, req).await;
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// Upload the given files with a valid key and return the job id.
async fn upload(app: &TestApp, files: &[(&str, &str, &str)]) -> String {
    let mut parts: Vec<Part<'_>> = files
        .iter()
        .map(|(name, ct, text)| ("files", Some(*name), Some(*ct), *text))
        .collect();
    parts.push(("api_key", None, None, "sk-test"));

    let (status, json) = send_json(app, multipart_request(&parts)).await;
    assert_eq!(status, StatusCode::OK, "upload failed: {json}");
    json["job_id"].as_str().unwrap().to_string()
}

async fn process(app: &TestApp, job_id: &str) -> (StatusCode, Value) {
    send_json(
        app,
        json_request(
            "POST",
            "/api/process",
            json!({ "job_id": job_id, "api_key": "sk-test" }),
        ),
    )
    .await
}

// ── Intake ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_drops_unsupported_files() {
    let app = setup_test_app();
    let parts: Vec<Part<'_>> = vec![
        ("files", Some("a.png"), Some("image/png"), "A"),
        ("files", Some("b.pdf"), Some("application/pdf"), "%PDF-stub pages=2"),
        ("files", Some("c.txt"), Some("text/plain"), "hello"),
        ("api_key", None, None, "sk-test"),
    ];

    let (status, json) = send_json(&app, multipart_request(&parts)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["file_count"], 2);
    assert_eq!(json["files"], json!(["a.png", "b.pdf"]));
}

#[tokio::test]
async fn upload_requires_key_and_valid_files() {
    let app = setup_test_app();

    let no_key: Vec<Part<'_>> = vec![("files", Some("a.png"), Some("image/png"), "A")];
    let (status, json) = send_json(&app, multipart_request(&no_key)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("api_key"));

    let only_text: Vec<Part<'_>> = vec![
        ("files", Some("notes.txt"), Some("text/plain"), "x"),
        ("api_key", None, None, "sk-test"),
    ];
    let (status, _) = send_json(&app, multipart_request(&only_text)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_over_file_limit_is_rejected() {
    let app = setup_test_app();
    let mut parts: Vec<Part<'_>> = (0..6)
        .map(|_| ("files", Some("p.png"), Some("image/png"), "P"))
        .collect();
    parts.push(("api_key", None, None, "sk-test"));

    let (status, _) = send_json(&app, multipart_request(&parts)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

// ── Processing ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn mixed_batch_isolates_failed_page() {
    let app = setup_test_app();
    let job_id = upload(
        &app,
        &[
            ("a.png", "image/png", "A"),
            ("b.pdf", "application/pdf", "%PDF-stub pages=2 fail=2"),
            ("c.txt", "text/plain", "ignored"),
        ],
    )
    .await;

    let (status, json) = process(&app, &job_id).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["status"], "completed");
    assert_eq!(json["summary"]["total"], 2);
    assert_eq!(json["summary"]["success"], 1);
    assert_eq!(json["summary"]["failed"], json!(["b.pdf"]));

    let (status, result) = send_json(&app, get(&format!("/api/result/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let results = result["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);

    assert_eq!(results[0]["filename"], "a.png");
    assert_eq!(results[0]["status"], "success");
    assert_eq!(results[0]["content"], "A\n");
    assert_eq!(results[0]["tokens"], 10);

    assert_eq!(results[1]["filename"], "b.pdf");
    assert_eq!(results[1]["status"], "error");
    assert!(results[1].get("content").is_none());
    let error = results[1]["error"].as_str().unwrap();
    assert!(error.starts_with("page 2: extraction failed"), "got: {error}");
}

#[tokio::test]
async fn pages_are_joined_in_order() {
    let app = setup_test_app();
    let job_id = upload(
        &app,
        &[("doc.pdf", "application/pdf", "%PDF-stub pages=3")],
    )
    .await;

    let (status, _) = process(&app, &job_id).await;
    assert_eq!(status, StatusCode::OK);

    let (_, result) = send_json(&app, get(&format!("/api/result/{job_id}"))).await;
    assert_eq!(
        result["results"][0]["content"],
        "PDF page 1\n\n---\n\nPDF page 2\n\n---\n\nPDF page 3\n"
    );
    assert_eq!(result["total_tokens"], 30);
}

#[tokio::test]
async fn markdown_layout_survives_to_result_and_bundle() {
    let app = setup_test_app();
    let notes = "# Notes\n\nfirst line  \nsecond line\n\n```\nlet a = 1;\n```\n\nSome prose\n\n```\nlet b = 2;\n```\n";
    let scan = "%PDF-stub pages=2\n    indented code\n\u{c}Second page  \nend\n";
    let job_id = upload(
        &app,
        &[
            ("notes.png", "image/png", notes),
            ("scan.pdf", "application/pdf", scan),
        ],
    )
    .await;

    let (status, _) = process(&app, &job_id).await;
    assert_eq!(status, StatusCode::OK);

    let scan_md = "    indented code\n\n---\n\nSecond page  \nend\n";
    let (_, result) = send_json(&app, get(&format!("/api/result/{job_id}"))).await;
    assert_eq!(result["results"][0]["content"], notes);
    assert_eq!(result["results"][1]["content"], scan_md);

    let (_, _, body) = send(&app, get(&format!("/api/download-all/{job_id}"))).await;
    let mut archive = zip::ZipArchive::new(Cursor::new(body.to_vec())).unwrap();
    let mut entry = String::new();
    archive
        .by_name("notes.md")
        .unwrap()
        .read_to_string(&mut entry)
        .unwrap();
    assert_eq!(entry, format!("# notes.png\n\n{notes}"));
    entry.clear();
    archive
        .by_name("scan.md")
        .unwrap()
        .read_to_string(&mut entry)
        .unwrap();
    assert_eq!(entry, format!("# scan.pdf\n\n{scan_md}"));
}

#[tokio::test]
async fn second_process_does_not_repeat_work() {
    let app = setup_test_app();
    let job_id = upload(
        &app,
        &[
            ("a.png", "image/png", "A"),
            ("b.pdf", "application/pdf", "%PDF-stub pages=2"),
        ],
    )
    .await;

    let (first_status, first) = process(&app, &job_id).await;
    assert_eq!(first_status, StatusCode::OK);
    let calls = app.extractor.calls.load(Ordering::SeqCst);
    assert_eq!(calls, 3);

    let (second_status, second) = process(&app, &job_id).await;
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(second, first);
    assert_eq!(app.extractor.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn every_file_failing_is_bad_gateway_but_result_is_kept() {
    let app = setup_test_app();
    let job_id = upload(
        &app,
        &[
            ("x.pdf", "application/pdf", "%PDF-stub pages=1 fail=1"),
            ("y.pdf", "application/pdf", "not a pdf"),
        ],
    )
    .await;

    let (status, json) = process(&app, &job_id).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(json["error"].as_str().unwrap().contains("page 1"));

    let (status, result) = send_json(&app, get(&format!("/api/result/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["success"], 0);
    assert!(result["results"][1]["error"]
        .as_str()
        .unwrap()
        .contains("not a valid PDF"));
}

#[tokio::test]
async fn process_validates_request() {
    let app = setup_test_app();

    let (status, _) = send_json(
        &app,
        json_request("POST", "/api/process", json!({ "job_id": "abc" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = process(&app, "00000000-0000-4000-8000-000000000000").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn custom_prompt_reaches_the_extractor() {
    let app = setup_test_app();
    let job_id = upload(&app, &[("a.png", "image/png", "A")]).await;

    let (status, _) = send_json(
        &app,
        json_request(
            "POST",
            "/api/process",
            json!({
                "job_id": job_id,
                "api_key": "sk-test",
                "use_custom": true,
                "custom_prompt": "Only bullet points.",
                "format_example": "- item",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let prompts = app.extractor.system_prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("Only bullet points."));
    assert!(prompts[0].ends_with("```- item```"));
}

// ── Retrieval ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn result_before_processing_is_not_ready() {
    let app = setup_test_app();
    let job_id = upload(&app, &[("a.png", "image/png", "A")]).await;

    let (status, json) = send_json(&app, get(&format!("/api/result/{job_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("not ready"));

    let (status, json) = send_json(&app, get(&format!("/api/status/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "created");
    assert_eq!(json["file_count"], 1);
}

#[tokio::test]
async fn status_reports_unit_counters_after_processing() {
    let app = setup_test_app();
    let job_id = upload(
        &app,
        &[("b.pdf", "application/pdf", "%PDF-stub pages=2 fail=2")],
    )
    .await;
    process(&app, &job_id).await;

    let (status, json) = send_json(&app, get(&format!("/api/status/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["units_total"], 2);
    assert_eq!(json["units_completed"], 2);
    assert_eq!(json["units_failed"], 1);
}

#[tokio::test]
async fn unknown_jobs_are_not_found() {
    let app = setup_test_app();
    for uri in [
        "/api/result/00000000-0000-4000-8000-000000000000",
        "/api/status/not-a-job",
        "/api/download-all/00000000-0000-4000-8000-000000000000",
        "/api/download/not-a-job/a.md",
    ] {
        let (status, json) = send_json(&app, get(uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert!(json["error"].is_string(), "{uri}");
    }
}

#[tokio::test]
async fn download_single_file() {
    let app = setup_test_app();
    let job_id = upload(
        &app,
        &[
            ("a.png", "image/png", "A"),
            ("b.pdf", "application/pdf", "%PDF-stub pages=1 fail=1"),
        ],
    )
    .await;
    process(&app, &job_id).await;

    let (status, headers, body) = send(&app, get(&format!("/api/download/{job_id}/a.md"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "# a.png\n\nA\n");
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/markdown"));
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("filename=\"a.md\""));

    let (status, _, by_original) =
        send(&app, get(&format!("/api/download/{job_id}/a.png"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_original, body);

    let (status, _, _) = send(&app, get(&format!("/api/download/{job_id}/b.md"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bundle_contains_successful_files_only() {
    let app = setup_test_app();
    let job_id = upload(
        &app,
        &[
            ("a.png", "image/png", "A"),
            ("b.pdf", "application/pdf", "%PDF-stub pages=2 fail=2"),
            ("c.jpg", "image/jpeg", "C"),
        ],
    )
    .await;
    process(&app, &job_id).await;

    let (status, headers, body) = send(&app, get(&format!("/api/download-all/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.contains(&format!("results_{}.zip", &job_id.replace('-', "")[..8])));

    let mut archive = zip::ZipArchive::new(Cursor::new(body.to_vec())).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, ["a.md", "c.md"]);

    let mut a = String::new();
    archive.by_name("a.md").unwrap().read_to_string(&mut a).unwrap();
    assert_eq!(a, "# a.png\n\nA\n");
}

#[tokio::test]
async fn outputs_are_written_to_the_data_dir() {
    let app = setup_test_app();
    let job_id = upload(&app, &[("a.png", "image/png", "A")]).await;
    process(&app, &job_id).await;

    let out = app._dir.path().join("output").join(&job_id);
    assert_eq!(
        std::fs::read_to_string(out.join("a.md")).unwrap(),
        "# a.png\n\nA\n"
    );
    let summary: Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["total"], 1);
    assert_eq!(summary["success"], 1);
}

// ── Prompt settings ──────────────────────────────────────────────────────────

#[tokio::test]
async fn prompt_config_round_trip() {
    let app = setup_test_app();

    let (status, defaults) = send_json(&app, get("/api/config/prompt")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(defaults["prompt"].as_str().unwrap().contains("Markdown"));
    assert!(defaults["format_example"].is_string());

    let (status, json) = send_json(
        &app,
        json_request(
            "POST",
            "/api/config/prompt",
            json!({ "prompt": "Summarise.", "format_example": "- a" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "success": true }));

    let (_, saved) = send_json(&app, get("/api/config/prompt")).await;
    assert_eq!(saved, json!({ "prompt": "Summarise.", "format_example": "- a" }));
}
