//! Server binary for edgequake-batch2md.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServiceConfig` and serves the HTTP API until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_batch2md::{server, BatchService, ExtractorBackend, PageSeparator, ServiceConfig};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on 0.0.0.0:5000 with the DashScope-compatible endpoint (default)
  batch2md

  # Another OpenAI-compatible endpoint and model
  batch2md --api-base https://api.openai.com/v1 --model gpt-4.1-mini

  # An edgequake-llm provider (authenticates from its own env vars)
  batch2md --provider ollama --model llava

  # Keep data elsewhere, five concurrent VLM calls per job
  batch2md --data-dir /var/lib/batch2md --concurrency 5

API:
  POST /api/upload                      multipart: files (1+), api_key
  POST /api/process                     {job_id, api_key, custom_prompt?, format_example?, use_custom?}
  GET  /api/status/{job_id}             lifecycle + unit counters
  GET  /api/result/{job_id}             per-file results
  GET  /api/download/{job_id}/{file}    one Markdown file
  GET  /api/download-all/{job_id}       zip of every successful file
  GET  /api/config/prompt               saved prompt settings
  POST /api/config/prompt               {prompt?, format_example?}

ENVIRONMENT VARIABLES:
  RUST_LOG                Overrides -v / -q (e.g. edgequake_batch2md=debug)
  PDFIUM_LIB_PATH         Directory containing libpdfium
"#;

/// Batch-convert images and PDFs to Markdown with Vision LLMs over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "batch2md",
    version,
    about = "Batch-convert images and PDFs to Markdown with Vision LLMs over HTTP",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "BATCH2MD_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "BATCH2MD_PORT", default_value_t = 5000)]
    port: u16,

    /// Root directory for uploads, outputs and prompt settings.
    #[arg(long, env = "BATCH2MD_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// OpenAI-compatible API base URL (ignored with --provider).
    #[arg(long, env = "BATCH2MD_API_BASE", default_value = edgequake_batch2md::config::DEFAULT_API_BASE)]
    api_base: String,

    /// Vision model ID.
    #[arg(long, env = "BATCH2MD_MODEL", default_value = edgequake_batch2md::config::DEFAULT_MODEL)]
    model: String,

    /// Use an edgequake-llm provider (openai, anthropic, gemini, ollama, ...)
    /// instead of the chat-completions endpoint.
    #[arg(long, env = "BATCH2MD_PROVIDER")]
    provider: Option<String>,

    /// Number of concurrent VLM calls per job.
    #[arg(short, long, env = "BATCH2MD_CONCURRENCY", default_value_t = 3)]
    concurrency: usize,

    /// PDF render scale relative to 72 DPI (0.5–6.0).
    #[arg(long, env = "BATCH2MD_RENDER_SCALE", default_value_t = 2.0)]
    render_scale: f32,

    /// Longest rendered page edge in pixels.
    #[arg(long, env = "BATCH2MD_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// PDFs with more pages fail instead of rendering.
    #[arg(long, env = "BATCH2MD_MAX_PDF_PAGES", default_value_t = 200)]
    max_pdf_pages: usize,

    /// Maximum accepted files per upload.
    #[arg(long, env = "BATCH2MD_MAX_FILES", default_value_t = 100)]
    max_files: usize,

    /// Maximum pages rendered and extracted per job.
    #[arg(long, env = "BATCH2MD_MAX_UNITS", default_value_t = 1000)]
    max_units: usize,

    /// Maximum upload body size in MiB.
    #[arg(long, env = "BATCH2MD_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "BATCH2MD_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// Max LLM output tokens per page.
    #[arg(long, env = "BATCH2MD_MAX_TOKENS", default_value_t = 3000)]
    max_tokens: usize,

    /// Per-call VLM timeout in seconds.
    #[arg(long, env = "BATCH2MD_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Page separator: blank, hr, comment, or custom string.
    #[arg(long, env = "BATCH2MD_SEPARATOR", default_value = "hr")]
    separator: String,

    /// Where prompt settings are saved (default: <data-dir>/prompt_config.json).
    #[arg(long, env = "BATCH2MD_PROMPT_CONFIG")]
    prompt_config: Option<PathBuf>,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_dir: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BATCH2MD_VERBOSE")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, env = "BATCH2MD_QUIET")]
    quiet: bool,
}

impl Cli {
    fn to_config(&self) -> Result<ServiceConfig> {
        let backend = match &self.provider {
            Some(name) => ExtractorBackend::Provider {
                name: name.clone(),
                model: self.model.clone(),
            },
            None => ExtractorBackend::ChatCompletions {
                api_base: self.api_base.clone(),
                model: self.model.clone(),
            },
        };

        let mut builder = ServiceConfig::builder()
            .data_dir(&self.data_dir)
            .backend(backend)
            .concurrency(self.concurrency)
            .render_scale(self.render_scale)
            .max_rendered_pixels(self.max_pixels)
            .max_pdf_pages(self.max_pdf_pages)
            .max_files_per_job(self.max_files)
            .max_units_per_job(self.max_units)
            .max_upload_bytes(self.max_upload_mb.saturating_mul(1024 * 1024))
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .api_timeout_secs(self.api_timeout)
            .page_separator(PageSeparator::parse(&self.separator));
        if let Some(path) = &self.prompt_config {
            builder = builder.prompt_config_path(path);
        }
        if let Some(dir) = &self.pdfium_lib_dir {
            builder = builder.pdfium_library_dir(dir);
        }
        builder.build().context("Invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "edgequake_batch2md=debug,tower_http=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Service ──────────────────────────────────────────────────────────
    let config = cli.to_config()?;
    for dir in [config.uploads_dir(), config.output_dir()] {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Cannot create {}", dir.display()))?;
    }
    tracing::info!(
        "Data in {}, backend {:?}, concurrency {}",
        config.data_dir.display(),
        config.backend,
        config.concurrency
    );
    let service = Arc::new(BatchService::new(config).context("Cannot start the batch service")?);

    // ── Serve ────────────────────────────────────────────────────────────
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", cli.host, cli.port))?;
    server::serve(service, addr, shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl-C received, shutting down");
}
