//! The batch service: intake, processing and retrieval behind one handle.
//!
//! [`BatchService`] owns the configuration, the job store and the two
//! external seams (the VLM [`Extractor`] and the PDF [`PageRasterizer`]).
//! The HTTP layer is a thin adapter over it; embedders and tests call it
//! directly.
//!
//! ## Process lifecycle
//!
//! ```text
//! upload ──▶ created ──process──▶ processing ──▶ completed
//!                                     │
//!                                     └──────▶ failed   (service error, panic)
//! ```
//!
//! The pipeline run is spawned onto its own task. If the caller of
//! [`BatchService::process`] goes away mid-run (client disconnect), the run
//! still finishes and its result is stored; a later `process` or
//! `result` call picks it up.

use crate::config::{PageSeparator, ServiceConfig};
use crate::error::BatchError;
use crate::job::Job;
use crate::output::{Bundle, JobResult, MarkdownArtifact};
use crate::pipeline::aggregate::aggregate;
use crate::pipeline::intake::{accept_uploads, IntakeReceipt, Upload};
use crate::pipeline::invoke::{invoke_units, InvokeContext};
use crate::pipeline::llm::{build_extractor, ApiKey, Extractor};
use crate::pipeline::normalize::{normalize_files, PageRasterizer, PdfiumRasterizer, RenderSettings};
use crate::progress::{JobProgress, ProgressCallback};
use crate::prompts::{ExtractionPrompt, PromptConfig};
use crate::retrieval;
use crate::store::{parse_job_id, JobStatusReport, JobStore, ProcessTicket};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Batch image/PDF-to-Markdown service.
pub struct BatchService {
    config: ServiceConfig,
    store: Arc<JobStore>,
    extractor: Arc<dyn Extractor>,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl BatchService {
    /// Build a service with the extractor the config names and pdfium rendering.
    pub fn new(config: ServiceConfig) -> Result<Self, BatchError> {
        let extractor = build_extractor(&config)?;
        let rasterizer = Arc::new(PdfiumRasterizer::new(config.pdfium_library_dir.clone()));
        Ok(Self::with_components(config, extractor, rasterizer))
    }

    /// Build a service around caller-supplied seams.
    pub fn with_components(
        config: ServiceConfig,
        extractor: Arc<dyn Extractor>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Self {
        let store = Arc::new(JobStore::new(config.uploads_dir(), config.output_dir()));
        Self {
            config,
            store,
            extractor,
            rasterizer,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // ── Intake ───────────────────────────────────────────────────────────

    /// Accept a set of uploads as a new job.
    pub async fn upload(&self, uploads: Vec<Upload>) -> Result<IntakeReceipt, BatchError> {
        let job = accept_uploads(
            uploads,
            &self.config.uploads_dir(),
            self.config.max_files_per_job,
        )
        .await?;
        let receipt = IntakeReceipt::for_job(&job);
        self.store.insert(job).await;
        Ok(receipt)
    }

    // ── Processing ───────────────────────────────────────────────────────

    /// Run the job's pipeline and return its result.
    ///
    /// Calling this again for a job that is processing waits for that run;
    /// for a completed job it returns the stored result without new VLM
    /// calls. When every file failed the result is still stored, but
    /// [`BatchError::AllFilesFailed`] is returned.
    pub async fn process(
        &self,
        job_id: &str,
        credential: ApiKey,
        prompt: ExtractionPrompt,
    ) -> Result<Arc<JobResult>, BatchError> {
        let id = parse_job_id(job_id)?;
        let result = match self.store.begin_processing(id).await? {
            ProcessTicket::Done(result) => result,
            ProcessTicket::Wait(rx) => self.store.wait_for_result(id, rx).await?,
            ProcessTicket::Start { job, progress } => {
                self.spawn_run(job, credential, prompt, progress).await?
            }
        };

        if result.total > 0 && result.success == 0 {
            let first_error = result
                .results
                .iter()
                .find_map(|r| r.error())
                .unwrap_or("unknown error")
                .to_string();
            return Err(BatchError::AllFilesFailed {
                total: result.total,
                first_error,
            });
        }
        Ok(result)
    }

    /// Spawn the pipeline and settle the job's status however it ends.
    async fn spawn_run(
        &self,
        job: Job,
        credential: ApiKey,
        prompt: ExtractionPrompt,
        progress: Arc<JobProgress>,
    ) -> Result<Arc<JobResult>, BatchError> {
        let id = job.id;
        let run = PipelineRun {
            job,
            credential,
            prompt,
            progress,
            store: Arc::clone(&self.store),
            extractor: Arc::clone(&self.extractor),
            rasterizer: Arc::clone(&self.rasterizer),
            settings: RenderSettings {
                scale: self.config.render_scale,
                max_pixels: self.config.max_rendered_pixels,
                max_pages: self.config.max_pdf_pages,
                max_units: self.config.max_units_per_job,
            },
            concurrency: self.config.concurrency,
            timeout: Duration::from_secs(self.config.api_timeout_secs),
            separator: self.config.page_separator.clone(),
        };
        let store = Arc::clone(&self.store);

        // The inner task isolates panics; the outer one outlives this call.
        let settle = tokio::spawn(async move {
            match tokio::spawn(run.execute()).await {
                Ok(Ok(result)) => store.complete(id, result).await,
                Ok(Err(e)) => {
                    store.fail(id, e.to_string()).await;
                    Err(e)
                }
                Err(join) => {
                    let reason = format!("processing task aborted: {join}");
                    store.fail(id, reason.clone()).await;
                    Err(BatchError::Internal(reason))
                }
            }
        });

        settle
            .await
            .map_err(|e| BatchError::Internal(format!("Job task panicked: {}", e)))?
    }

    // ── Retrieval ────────────────────────────────────────────────────────

    pub async fn result(&self, job_id: &str) -> Result<Arc<JobResult>, BatchError> {
        retrieval::get_result(&self.store, job_id).await
    }

    pub async fn status(&self, job_id: &str) -> Result<JobStatusReport, BatchError> {
        retrieval::get_status(&self.store, job_id).await
    }

    pub async fn single_file(
        &self,
        job_id: &str,
        filename: &str,
    ) -> Result<MarkdownArtifact, BatchError> {
        retrieval::get_single_file(&self.store, job_id, filename).await
    }

    pub async fn bundle(&self, job_id: &str) -> Result<Bundle, BatchError> {
        retrieval::get_bundle(&self.store, job_id).await
    }

    /// Drop a completed or failed job from memory; its files stay on disk.
    pub async fn forget_job(&self, job_id: &str) -> Result<(), BatchError> {
        self.store.remove(parse_job_id(job_id)?).await
    }

    // ── Prompt settings ──────────────────────────────────────────────────

    pub async fn prompt_config(&self) -> Result<PromptConfig, BatchError> {
        PromptConfig::load(&self.config.prompt_config_path()).await
    }

    pub async fn save_prompt_config(&self, prompt: &PromptConfig) -> Result<(), BatchError> {
        prompt.save(&self.config.prompt_config_path()).await
    }
}

/// Everything one pipeline run needs, owned so it can move onto a task.
struct PipelineRun {
    job: Job,
    credential: ApiKey,
    prompt: ExtractionPrompt,
    progress: Arc<JobProgress>,
    store: Arc<JobStore>,
    extractor: Arc<dyn Extractor>,
    rasterizer: Arc<dyn PageRasterizer>,
    settings: RenderSettings,
    concurrency: usize,
    timeout: Duration,
    separator: PageSeparator,
}

impl PipelineRun {
    async fn execute(self) -> Result<JobResult, BatchError> {
        let start = Instant::now();
        let job = &self.job;

        // ── Step 1: Normalize ────────────────────────────────────────────
        let units = normalize_files(&job.files, Arc::clone(&self.rasterizer), self.settings).await?;

        // ── Step 2: Extract ──────────────────────────────────────────────
        let ctx = InvokeContext {
            extractor: self.extractor.as_ref(),
            prompt: &self.prompt,
            credential: &self.credential,
            concurrency: self.concurrency,
            timeout: self.timeout,
            progress: self.progress.as_ref(),
        };
        let outcomes = invoke_units(&job.files, units, &ctx).await;

        // ── Step 3: Aggregate ────────────────────────────────────────────
        let results = aggregate(&job.files, outcomes, &self.separator);
        let result = JobResult::new(job.id, results);
        self.progress.on_job_complete(result.total, result.success);

        // ── Step 4: Persist ──────────────────────────────────────────────
        if let Err(e) = self.store.write_outputs(&result).await {
            error!("Job {}: could not write outputs: {}", job.id, e);
            return Err(e);
        }

        info!(
            "Job {} processed in {:.1}s: {}/{} files succeeded",
            job.id,
            start.elapsed().as_secs_f64(),
            result.success,
            result.total
        );
        Ok(result)
    }
}
