//! Normalization: turn every intake file into processing units.
//!
//! An image is exactly one unit. A PDF becomes one unit per page, rendered
//! to PNG. A file that cannot be read or rendered still yields a single unit
//! carrying the [`UnitError`], so the failure reaches aggregation instead of
//! silently dropping the file.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and CPU-heavy rendering.
//! All pdfium calls run on the blocking pool so Tokio workers never stall.

use crate::error::{BatchError, UnitError};
use crate::job::{IntakeFile, MediaType};
use crate::pipeline::encode::encode_png;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Image bytes ready for the VLM, plus their media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub data: Vec<u8>,
    pub media_type: MediaType,
}

/// Render parameters for PDF pages.
#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    /// Scale relative to 72 DPI.
    pub scale: f32,
    /// Longest rendered edge in pixels.
    pub max_pixels: u32,
    /// Documents with more pages are refused.
    pub max_pages: usize,
    /// Units one job may expand into; bounds the rendered pages held in memory.
    pub max_units: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            scale: 2.0,
            max_pixels: 2000,
            max_pages: 200,
            max_units: 1000,
        }
    }
}

/// Rasterises a PDF into page images, in page order.
///
/// Implementations are blocking; callers run them on the blocking pool.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, pdf: &[u8], settings: RenderSettings) -> Result<Vec<PageImage>, UnitError>;
}

/// [`PageRasterizer`] backed by pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library_dir: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self { library_dir }
    }

    fn bind(&self) -> Result<Pdfium, UnitError> {
        let dir = self
            .library_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("./"));
        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| UnitError::RenderFailed {
                detail: format!("pdfium library not available: {e:?}"),
            })?;
        Ok(Pdfium::new(bindings))
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(&self, pdf: &[u8], settings: RenderSettings) -> Result<Vec<PageImage>, UnitError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf, None)
            .map_err(|e| UnitError::RenderFailed {
                detail: format!("{e:?}"),
            })?;

        let pages = document.pages();
        let total = pages.len() as usize;
        if total == 0 {
            return Err(UnitError::RenderFailed {
                detail: "document has no pages".into(),
            });
        }
        if total > settings.max_pages {
            return Err(UnitError::TooManyPages {
                pages: total,
                limit: settings.max_pages,
            });
        }
        info!("PDF loaded: {} pages", total);

        let max_px = settings.max_pixels as i32;
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(settings.scale)
            .set_maximum_width(max_px)
            .set_maximum_height(max_px);

        let mut images = Vec::with_capacity(total);
        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| UnitError::RenderFailed {
                    detail: format!("page {}: {e:?}", idx + 1),
                })?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            let data = encode_png(&image).map_err(|e| UnitError::RenderFailed {
                detail: format!("page {}: PNG encoding failed: {e}", idx + 1),
            })?;
            images.push(PageImage {
                data,
                media_type: MediaType::Png,
            });
        }
        Ok(images)
    }
}

/// One unit of work: a page (or the whole image) of one file.
#[derive(Debug, Clone)]
pub struct ProcessingUnit {
    /// Position of the owning file in the job.
    pub file_index: usize,
    /// 0-based page within the file; always 0 for images.
    pub page_index: usize,
    /// The image, or why there is none.
    pub payload: Result<PageImage, UnitError>,
}

/// Expand every file of a job into its units, in file order then page order.
///
/// Once `settings.max_units` images exist, later files fail with
/// [`UnitError::PageBudgetExceeded`] instead of being rendered.
pub async fn normalize_files(
    files: &[IntakeFile],
    rasterizer: Arc<dyn PageRasterizer>,
    settings: RenderSettings,
) -> Result<Vec<ProcessingUnit>, BatchError> {
    let mut units = Vec::new();
    let mut rendered = 0usize;
    for (file_index, file) in files.iter().enumerate() {
        let remaining = settings.max_units.saturating_sub(rendered);
        let pages = if remaining == 0 {
            Err(UnitError::PageBudgetExceeded {
                remaining,
                limit: settings.max_units,
            })
        } else {
            let file_settings = RenderSettings {
                max_pages: settings.max_pages.min(remaining),
                ..settings
            };
            match normalize_file(file, Arc::clone(&rasterizer), file_settings).await? {
                Err(UnitError::TooManyPages { pages, .. }) if pages <= settings.max_pages => {
                    Err(UnitError::PageBudgetExceeded {
                        remaining,
                        limit: settings.max_units,
                    })
                }
                other => other,
            }
        };
        match pages {
            Ok(images) => {
                rendered += images.len();
                units.extend(images.into_iter().enumerate().map(|(page_index, image)| {
                    ProcessingUnit {
                        file_index,
                        page_index,
                        payload: Ok(image),
                    }
                }));
            }
            Err(e) => {
                warn!("'{}' could not be normalized: {}", file.filename, e);
                units.push(ProcessingUnit {
                    file_index,
                    page_index: 0,
                    payload: Err(e),
                });
            }
        }
    }
    debug!("Normalized {} files into {} units", files.len(), units.len());
    Ok(units)
}

/// The outer `Result` is for failures of the service itself (a panicked
/// render task); the inner one is the file's own outcome.
async fn normalize_file(
    file: &IntakeFile,
    rasterizer: Arc<dyn PageRasterizer>,
    settings: RenderSettings,
) -> Result<Result<Vec<PageImage>, UnitError>, BatchError> {
    let bytes = match tokio::fs::read(&file.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return Ok(Err(UnitError::Unreadable {
                detail: e.to_string(),
            }))
        }
    };

    if file.media_type.is_image() {
        return Ok(Ok(vec![PageImage {
            data: bytes,
            media_type: file.media_type,
        }]));
    }

    if !bytes.starts_with(b"%PDF") {
        return Ok(Err(UnitError::NotAPdf {
            magic: bytes.iter().take(4).copied().collect(),
        }));
    }

    tokio::task::spawn_blocking(move || rasterizer.rasterize(&bytes, settings))
        .await
        .map_err(|e| BatchError::Internal(format!("Render task panicked: {}", e)))
}
