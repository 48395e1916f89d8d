//! Invocation: run the extractor over every unit of a job with bounded
//! concurrency.
//!
//! At most `concurrency` VLM calls are in flight at once
//! (`buffer_unordered`). Collecting the stream is the join barrier: this
//! function returns only after every unit has settled, successfully or not.
//! One unit failing never cancels its siblings.

use crate::error::UnitError;
use crate::job::IntakeFile;
use crate::pipeline::llm::{ApiKey, Extraction, Extractor};
use crate::pipeline::normalize::ProcessingUnit;
use crate::pipeline::postprocess::clean_markdown;
use crate::progress::ProgressCallback;
use crate::prompts::ExtractionPrompt;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settled outcome for one unit.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub file_index: usize,
    pub page_index: usize,
    pub outcome: Result<Extraction, UnitError>,
}

/// Everything a batch of calls shares.
pub struct InvokeContext<'a> {
    pub extractor: &'a dyn Extractor,
    pub prompt: &'a ExtractionPrompt,
    pub credential: &'a ApiKey,
    pub concurrency: usize,
    pub timeout: Duration,
    pub progress: &'a dyn ProgressCallback,
}

/// Extract every unit, returning one outcome per unit (in completion order).
pub async fn invoke_units(
    files: &[IntakeFile],
    units: Vec<ProcessingUnit>,
    ctx: &InvokeContext<'_>,
) -> Vec<UnitOutcome> {
    let total = units.len();
    ctx.progress.on_job_start(total);
    info!(
        "Extracting {} units with concurrency {}",
        total, ctx.concurrency
    );

    let outcomes: Vec<UnitOutcome> = stream::iter(units)
        .map(|unit| {
            let filename = files
                .get(unit.file_index)
                .map(|f| f.filename.as_str())
                .unwrap_or("<unknown>");
            invoke_unit(filename, unit, ctx)
        })
        .buffer_unordered(ctx.concurrency.max(1))
        .collect()
        .await;

    let failed = outcomes.iter().filter(|o| o.outcome.is_err()).count();
    info!("Extraction finished: {}/{} units succeeded", total - failed, total);
    outcomes
}

async fn invoke_unit(
    filename: &str,
    unit: ProcessingUnit,
    ctx: &InvokeContext<'_>,
) -> UnitOutcome {
    let page = unit.page_index + 1;
    let outcome = match unit.payload {
        // Normalization already failed; nothing to send.
        Err(e) => Err(e),
        Ok(image) => {
            ctx.progress.on_unit_start(filename, page);
            let call = ctx.extractor.extract(&image, ctx.prompt, ctx.credential);
            match tokio::time::timeout(ctx.timeout, call).await {
                Ok(Ok(extraction)) => Ok(Extraction {
                    content: clean_markdown(&extraction.content),
                    tokens_used: extraction.tokens_used,
                }),
                Ok(Err(e)) => Err(UnitError::ExtractionFailed {
                    page,
                    detail: e.to_string(),
                }),
                Err(_) => Err(UnitError::Timeout {
                    page,
                    after: ctx.timeout,
                }),
            }
        }
    };

    match &outcome {
        Ok(extraction) => {
            debug!("{} page {}: {} tokens", filename, page, extraction.tokens_used);
            ctx.progress
                .on_unit_complete(filename, page, extraction.tokens_used);
        }
        Err(e) => {
            warn!("{} page {}: {}", filename, page, e);
            ctx.progress.on_unit_error(filename, page, &e.to_string());
        }
    }

    UnitOutcome {
        file_index: unit.file_index,
        page_index: unit.page_index,
        outcome,
    }
}
