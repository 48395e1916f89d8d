//! # edgequake-batch2md
//!
//! Batch-convert images and PDFs to Markdown using Vision Language Models
//! (VLMs), as a library or as an HTTP service.
//!
//! ## Why this crate?
//!
//! Scanned notes, slides and photographed documents carry structure that
//! plain OCR flattens. Every page is sent to a VLM as an image and comes back
//! as structured Markdown (headings, lists, emphasis). A batch of files is
//! one *job*: files are uploaded together, processed together with bounded
//! concurrency, and retrieved one by one or as a zip.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (PNG / JPEG / PDF)
//!  │
//!  ├─ 1. Intake     filter by media type, sanitise names, store under the job
//!  ├─ 2. Normalize  images pass through; PDFs render one PNG per page (pdfium)
//!  ├─ 3. Invoke     one VLM call per page, `concurrency` at a time, isolated failures
//!  ├─ 4. Aggregate  pages joined in order; any failed page fails its file
//!  └─ 5. Retrieve   JSON result, single `.md` download, or zip bundle
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_batch2md::{ApiKey, BatchService, ExtractionPrompt, ServiceConfig, Upload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder().data_dir("./data").build()?;
//!     let service = BatchService::new(config)?;
//!
//!     let bytes = std::fs::read("scan.png")?;
//!     let receipt = service
//!         .upload(vec![Upload::new("scan.png", Some("image/png"), bytes)])
//!         .await?;
//!
//!     let key = ApiKey::new(std::env::var("DASHSCOPE_API_KEY")?).ok_or("empty key")?;
//!     let result = service
//!         .process(&receipt.job_id.to_string(), key, ExtractionPrompt::default())
//!         .await?;
//!     for file in &result.results {
//!         println!("{}: {:?}", file.filename, file.status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `batch2md` server binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when embedding the library:
//! ```toml
//! edgequake-batch2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod retrieval;
pub mod server;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::BatchService;
pub use config::{ExtractorBackend, PageSeparator, ServiceConfig, ServiceConfigBuilder};
pub use error::{BatchError, UnitError};
pub use job::{IntakeFile, Job, JobId, JobStatus, MediaType};
pub use output::{Bundle, FileResult, FileStatus, JobResult, JobSummary, MarkdownArtifact};
pub use pipeline::intake::{IntakeReceipt, Upload};
pub use pipeline::llm::{ApiKey, Extraction, ExtractError, Extractor};
pub use pipeline::normalize::{PageImage, PageRasterizer, PdfiumRasterizer, RenderSettings};
pub use progress::{NoopProgressCallback, ProgressCallback};
pub use prompts::{ExtractionPrompt, PromptConfig};
pub use server::{create_router, AppState};
