//! Pipeline stages for batch image/PDF-to-Markdown extraction.
//!
//! Each submodule implements exactly one step, so each is testable on its own
//! and the network-facing stage can be replaced by a stub.
//!
//! ## Data Flow
//!
//! ```text
//! intake ──▶ normalize ──▶ invoke (encode + llm + postprocess) ──▶ aggregate
//! (store)     (pdfium)       (bounded-concurrency VLM calls)        (per file)
//! ```
//!
//! 1. [`intake`]    — filter uploads by media type, sanitise names, store them
//! 2. [`normalize`] — expand each file into units; PDFs render one PNG per page
//!    inside `spawn_blocking`
//! 3. [`encode`]    — base64-wrap images for the multimodal request body
//! 4. [`llm`]       — the [`llm::Extractor`] seam; one VLM call per unit
//! 5. [`invoke`]    — run every unit under the concurrency limit and a timeout
//! 6. [`postprocess`] — deterministic cleanup of each page's Markdown
//! 7. [`aggregate`] — group by file, order by page, decide success or failure

pub mod aggregate;
pub mod encode;
pub mod intake;
pub mod invoke;
pub mod llm;
pub mod normalize;
pub mod postprocess;
