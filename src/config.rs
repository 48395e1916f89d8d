//! Configuration for the batch extraction service.
//!
//! Every knob lives in [`ServiceConfig`], built via [`ServiceConfigBuilder`].
//! Setters clamp obviously out-of-range values; [`ServiceConfigBuilder::build`]
//! rejects combinations that cannot work at all.

use crate::error::BatchError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default OpenAI-compatible endpoint (DashScope compatible mode).
pub const DEFAULT_API_BASE: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Default vision model served at [`DEFAULT_API_BASE`].
pub const DEFAULT_MODEL: &str = "qwen-vl-plus";

/// Configuration for a [`crate::batch::BatchService`].
///
/// # Example
/// ```rust
/// use edgequake_batch2md::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .data_dir("/var/lib/batch2md")
///     .concurrency(5)
///     .max_pdf_pages(50)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root of job storage: `uploads/<job_id>/` and `output/<job_id>/`. Default: `./data`.
    pub data_dir: PathBuf,

    /// Which VLM backend extracts Markdown. Default: chat completions at DashScope.
    pub backend: ExtractorBackend,

    /// Number of concurrent VLM calls within one job. Default: 3.
    ///
    /// Each call is an independent network round trip; a small fixed limit
    /// keeps per-key rate limits from turning into a wall of 429s.
    pub concurrency: usize,

    /// Page render scale relative to 72 DPI. Range: 0.5–6.0. Default: 2.0 (144 DPI).
    pub render_scale: f32,

    /// Maximum rendered image edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDFs with more pages than this are not rendered; the file fails. Default: 200.
    pub max_pdf_pages: usize,

    /// Maximum accepted files per upload. Default: 100.
    pub max_files_per_job: usize,

    /// Maximum pages (units) one job renders and extracts. Files beyond the
    /// budget fail instead of being rendered. Default: 1000.
    pub max_units_per_job: usize,

    /// Maximum request body size for uploads in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,

    /// Sampling temperature for the VLM. Default: 0.3.
    pub temperature: f32,

    /// Maximum tokens the VLM may generate per page. Default: 3000.
    pub max_tokens: usize,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Boundary inserted between pages of a multi-page file. Default: horizontal rule.
    pub page_separator: PageSeparator,

    /// Where `GET/POST /api/config/prompt` persists the prompt settings.
    /// Default: `<data_dir>/prompt_config.json`.
    pub prompt_config_path: Option<PathBuf>,

    /// Directory containing the pdfium shared library. If None, the working
    /// directory is tried first, then the system library path.
    pub pdfium_library_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            backend: ExtractorBackend::default(),
            concurrency: 3,
            render_scale: 2.0,
            max_rendered_pixels: 2000,
            max_pdf_pages: 200,
            max_files_per_job: 100,
            max_units_per_job: 1000,
            max_upload_bytes: 50 * 1024 * 1024,
            temperature: 0.3,
            max_tokens: 3000,
            api_timeout_secs: 120,
            page_separator: PageSeparator::default(),
            prompt_config_path: None,
            pdfium_library_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.data_dir.join("output")
    }

    pub fn prompt_config_path(&self) -> PathBuf {
        self.prompt_config_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("prompt_config.json"))
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn backend(mut self, backend: ExtractorBackend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(0.5, 6.0);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_pdf_pages(mut self, n: usize) -> Self {
        self.config.max_pdf_pages = n;
        self
    }

    pub fn max_files_per_job(mut self, n: usize) -> Self {
        self.config.max_files_per_job = n;
        self
    }

    pub fn max_units_per_job(mut self, n: usize) -> Self {
        self.config.max_units_per_job = n;
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn prompt_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.prompt_config_path = Some(path.into());
        self
    }

    pub fn pdfium_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_dir = Some(dir.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, BatchError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(BatchError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.max_pdf_pages == 0 {
            return Err(BatchError::InvalidConfig(
                "max_pdf_pages must be ≥ 1".into(),
            ));
        }
        if c.max_files_per_job == 0 {
            return Err(BatchError::InvalidConfig(
                "max_files_per_job must be ≥ 1".into(),
            ));
        }
        if c.max_units_per_job == 0 {
            return Err(BatchError::InvalidConfig(
                "max_units_per_job must be ≥ 1".into(),
            ));
        }
        if c.max_upload_bytes < 1024 {
            return Err(BatchError::InvalidConfig(format!(
                "max_upload_bytes must be at least 1 KiB, got {}",
                c.max_upload_bytes
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(BatchError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        match &c.backend {
            ExtractorBackend::ChatCompletions { api_base, model } => {
                if !(api_base.starts_with("http://") || api_base.starts_with("https://")) {
                    return Err(BatchError::InvalidConfig(format!(
                        "api_base must be an HTTP(S) URL, got '{api_base}'"
                    )));
                }
                if model.trim().is_empty() {
                    return Err(BatchError::InvalidConfig("model must not be empty".into()));
                }
            }
            ExtractorBackend::Provider { name, .. } => {
                if name.trim().is_empty() {
                    return Err(BatchError::InvalidConfig(
                        "provider name must not be empty".into(),
                    ));
                }
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which VLM implementation the service talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractorBackend {
    /// An OpenAI-compatible `/chat/completions` endpoint. The caller's API key
    /// is forwarded as the bearer token on every call.
    ChatCompletions { api_base: String, model: String },
    /// A provider resolved through `edgequake_llm::ProviderFactory`
    /// (e.g. `ollama`, `anthropic`). Authenticates with the provider's own
    /// environment configuration.
    Provider { name: String, model: String },
}

impl Default for ExtractorBackend {
    fn default() -> Self {
        ExtractorBackend::ChatCompletions {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// How to separate pages of one file in its combined Markdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Blank line only: "\n\n".
    Blank,
    /// Horizontal rule: "\n\n---\n\n". (default)
    #[default]
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before the given page (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::Blank => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }

    /// Parse a CLI value: `blank`, `hr`, `comment`, or any custom string.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "blank" | "none" => PageSeparator::Blank,
            "hr" | "---" => PageSeparator::HorizontalRule,
            "comment" => PageSeparator::Comment,
            _ => PageSeparator::Custom(s.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServiceConfig::builder().build().unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.max_tokens, 3000);
        assert_eq!(config.page_separator, PageSeparator::HorizontalRule);
        assert_eq!(config.backend, ExtractorBackend::default());
    }

    #[test]
    fn setters_clamp() {
        let config = ServiceConfig::builder()
            .concurrency(0)
            .render_scale(100.0)
            .temperature(-1.0)
            .build()
            .unwrap();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.render_scale, 6.0);
        assert_eq!(config.temperature, 0.0);
    }

    #[test]
    fn rejects_bad_api_base() {
        let err = ServiceConfig::builder()
            .backend(ExtractorBackend::ChatCompletions {
                api_base: "dashscope".into(),
                model: "qwen-vl-plus".into(),
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_zero_page_limit() {
        assert!(ServiceConfig::builder().max_pdf_pages(0).build().is_err());
        assert!(ServiceConfig::builder().max_units_per_job(0).build().is_err());
    }

    #[test]
    fn derived_paths() {
        let config = ServiceConfig::builder().data_dir("/srv/b2m").build().unwrap();
        assert_eq!(config.uploads_dir(), PathBuf::from("/srv/b2m/uploads"));
        assert_eq!(config.output_dir(), PathBuf::from("/srv/b2m/output"));
        assert_eq!(
            config.prompt_config_path(),
            PathBuf::from("/srv/b2m/prompt_config.json")
        );
    }

    #[test]
    fn separator_rendering() {
        assert_eq!(PageSeparator::HorizontalRule.render(2), "\n\n---\n\n");
        assert_eq!(PageSeparator::Comment.render(3), "\n\n<!-- page 3 -->\n\n");
        assert_eq!(PageSeparator::parse("hr"), PageSeparator::HorizontalRule);
        assert_eq!(
            PageSeparator::parse("* * *"),
            PageSeparator::Custom("* * *".into())
        );
    }
}
