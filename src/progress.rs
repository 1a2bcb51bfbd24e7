//! Progress callbacks for long-running ingestion runs.
//!
//! A full run for a 300-page textbook spends minutes in OCR and possibly tens
//! of minutes in LLM correction. The CLI wants a live progress bar; a job
//! runner wants to log batch counts. Both plug in here.
//!
//! All methods have default no-op implementations so callers implement only
//! what they need. The trait is `Send + Sync` so one callback can be shared
//! by a run and the dispatcher that spawned it.

use std::sync::Arc;

/// Pipeline stage reported to [`IngestProgressCallback::on_stage_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Render,
    Ocr,
    Normalize,
    Correct,
    Distribute,
    Segment,
    Persist,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Render => "Rendering",
            Stage::Ocr => "OCR",
            Stage::Normalize => "Normalizing",
            Stage::Correct => "Correcting",
            Stage::Distribute => "Distributing",
            Stage::Segment => "Segmenting",
            Stage::Persist => "Saving",
        }
    }
}

/// Receives events during an ingestion run.
pub trait IngestProgressCallback: Send + Sync {
    /// Called when a stage begins.
    ///
    /// # Arguments
    /// * `stage` — the stage starting
    /// * `units` — pages for render/OCR/normalize, batches for correct and
    ///   distribute, 0 when unknown
    fn on_stage_start(&self, stage: Stage, units: usize) {
        let _ = (stage, units);
    }

    /// Called after a page finished OCR.
    ///
    /// # Arguments
    /// * `page_num` — 1-indexed page number
    /// * `text_len` — characters recognised (0 on failure)
    fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
        let _ = (page_num, total_pages, text_len);
    }

    /// Called when a page failed OCR and was stored empty.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called after each correction or distribution batch, success or not.
    fn on_batch_complete(&self, stage: Stage, batch: usize, total_batches: usize) {
        let _ = (stage, batch, total_batches);
    }

    /// Called once when the run ends, including cancelled runs.
    fn on_run_complete(&self, problems: usize, cancelled: bool) {
        let _ = (problems, cancelled);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;
