//! Checkpointed LLM correction of normalized page text.
//!
//! ## Why a checkpoint?
//!
//! A 300-page book is 30 correction calls and can take tens of minutes.
//! After every batch the set of finished pages and their corrected text is
//! written to `{source}.llm_checkpoint.json` (temp file + rename). A crash or
//! a cancellation therefore loses at most the batch in flight, and a rerun
//! with the same checkpoint path never resends a finished page.
//!
//! ## Batch rules
//!
//! 1. Pages already done in the checkpoint are never sent.
//! 2. Pages whose normalizer score is above the quality gate, blank pages
//!    and pages an earlier completed run already corrected are never sent
//!    and keep their text.
//! 3. The remaining pages are sent `batch_size` at a time as `## Page N`
//!    blocks; pages missing from the response keep their text.
//! 4. A failed call is logged, its pages keep their text and are still
//!    marked done, and the job moves on.
//! 5. Cancellation is polled before each batch.
//! 6. When every batch has run the checkpoint is deleted.

use crate::artifacts::{parse_pages, ArtifactStore};
use crate::cancel::{CancelCheck, Outcome};
use crate::error::{IngestError, PageError};
use crate::llm::prompts::{correction_user_prompt, CORRECTION_SYSTEM_PROMPT};
use crate::llm::CompletionService;
use crate::progress::{ProgressCallback, Stage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Persisted progress of one correction job. Indices are 0-based.
///
/// `total_pages` of 0 means the writer did not record it; such a checkpoint
/// is trusted as long as its indices fit the current source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub total_pages: usize,
    #[serde(default)]
    pub done_page_indices: BTreeSet<usize>,
    #[serde(default)]
    pub corrected_text_by_index: BTreeMap<usize, String>,
}

/// Pages of a normalized artefact that a completed correction run has
/// already rewritten, kept next to the artefact. Page numbers are 1-based.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectedPages {
    #[serde(default)]
    pub pages: BTreeSet<usize>,
}

impl Checkpoint {
    fn fits(&self, total_pages: usize) -> bool {
        if self.total_pages != 0 {
            return self.total_pages == total_pages;
        }
        self.done_page_indices
            .iter()
            .chain(self.corrected_text_by_index.keys())
            .all(|&i| i < total_pages)
    }
}

/// Everything a correction run needs besides the pages.
pub struct CorrectionJob<'a> {
    pub service: &'a dyn CompletionService,
    pub artifacts: &'a ArtifactStore,
    pub checkpoint_path: &'a Path,
    pub subject: &'a str,
    pub batch_size: usize,
    pub temperature: f32,
    pub quality_gate: Option<u8>,
    /// 0-based indices that are already corrected and must not be resent.
    pub already_corrected: &'a BTreeSet<usize>,
    pub cancel: &'a dyn CancelCheck,
    pub progress: Option<&'a ProgressCallback>,
}

/// Output of a correction run.
#[derive(Debug, Clone, Default)]
pub struct Corrected {
    /// One text per input page, same order.
    pub pages: Vec<String>,
    /// LLM calls issued by this run.
    pub calls: usize,
    /// Pages skipped by the quality gate, because they were blank, or
    /// because an earlier run corrected them.
    pub skipped: usize,
    /// Pages restored from the checkpoint.
    pub resumed: usize,
    /// 0-based indices whose text came back from the LLM in this run or a
    /// resumed one.
    pub corrected: BTreeSet<usize>,
    pub errors: Vec<PageError>,
}

/// Correct `pages` (normalized text, 0-based order). `quality[i]` is the
/// normalizer score of page `i`, if known.
pub async fn correct_normalized_pages(
    pages: &[String],
    quality: &[Option<u8>],
    job: &CorrectionJob<'_>,
) -> Result<Outcome<Corrected>, IngestError> {
    let mut out = Corrected {
        pages: pages.to_vec(),
        ..Default::default()
    };
    if pages.is_empty() {
        return Ok(Outcome::Completed(out));
    }

    let mut checkpoint = load_checkpoint(job, pages.len())?;
    for (&idx, text) in &checkpoint.corrected_text_by_index {
        if checkpoint.done_page_indices.contains(&idx) && idx < pages.len() {
            out.pages[idx] = text.clone();
            out.resumed += 1;
            out.corrected.insert(idx);
        }
    }

    let pending: Vec<usize> = (0..pages.len())
        .filter(|i| !checkpoint.done_page_indices.contains(i))
        .filter(|&i| {
            let gated = match (job.quality_gate, quality.get(i).copied().flatten()) {
                (Some(gate), Some(score)) => score > gate,
                _ => false,
            };
            let skip = gated || pages[i].trim().is_empty() || job.already_corrected.contains(&i);
            if skip {
                out.skipped += 1;
            }
            !skip
        })
        .collect();

    let batch_size = job.batch_size.max(1);
    let total_batches = pending.len().div_ceil(batch_size);
    info!(
        "Correction: {} pages pending in {} batches ({} resumed, {} skipped)",
        pending.len(),
        total_batches,
        out.resumed,
        out.skipped
    );
    if let Some(cb) = job.progress {
        cb.on_stage_start(Stage::Correct, total_batches);
    }

    for (batch_idx, batch) in pending.chunks(batch_size).enumerate() {
        if job.cancel.is_cancelled() {
            info!(
                "Correction cancelled before batch {}/{}; checkpoint kept at {}",
                batch_idx + 1,
                total_batches,
                job.checkpoint_path.display()
            );
            return Ok(Outcome::Cancelled(out));
        }

        let chunk = build_chunk(pages, batch);
        let prompt = correction_user_prompt(job.subject, &chunk);
        out.calls += 1;
        match job
            .service
            .complete(CORRECTION_SYSTEM_PROMPT, &prompt, job.temperature)
            .await
        {
            Ok(answer) => {
                let returned: BTreeMap<usize, String> = parse_pages(&answer)
                    .into_iter()
                    .filter(|(_, text)| !text.is_empty())
                    .map(|(num, text)| (num.saturating_sub(1), text))
                    .collect();
                for &idx in batch {
                    match returned.get(&idx) {
                        Some(text) => {
                            out.pages[idx] = text.clone();
                            out.corrected.insert(idx);
                        }
                        None => debug!("Correction: page {} missing from response", idx + 1),
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Correction batch {}/{} failed — {}",
                    batch_idx + 1,
                    total_batches,
                    e
                );
                out.errors.push(PageError::CorrectionBatchFailed {
                    batch: batch_idx + 1,
                    first_page: batch.first().map_or(0, |i| i + 1),
                    last_page: batch.last().map_or(0, |i| i + 1),
                    detail: e.to_string(),
                });
            }
        }

        for &idx in batch {
            checkpoint.done_page_indices.insert(idx);
            checkpoint
                .corrected_text_by_index
                .insert(idx, out.pages[idx].clone());
        }
        job.artifacts.write_json(job.checkpoint_path, &checkpoint)?;

        if let Some(cb) = job.progress {
            cb.on_batch_complete(Stage::Correct, batch_idx + 1, total_batches);
        }
    }

    job.artifacts.remove(job.checkpoint_path)?;
    info!(
        "Correction done: {} calls, {} failed batches",
        out.calls,
        out.errors.len()
    );
    Ok(Outcome::Completed(out))
}

fn load_checkpoint(job: &CorrectionJob<'_>, total_pages: usize) -> Result<Checkpoint, IngestError> {
    match job.artifacts.read_json::<Checkpoint>(job.checkpoint_path)? {
        Some(cp) if cp.fits(total_pages) => {
            info!(
                "Resuming correction from {} ({} pages done)",
                job.checkpoint_path.display(),
                cp.done_page_indices.len()
            );
            Ok(Checkpoint { total_pages, ..cp })
        }
        Some(cp) => {
            warn!(
                "Checkpoint {} is for {} pages, source has {}; starting over",
                job.checkpoint_path.display(),
                cp.total_pages,
                total_pages
            );
            Ok(Checkpoint {
                total_pages,
                ..Default::default()
            })
        }
        None => Ok(Checkpoint {
            total_pages,
            ..Default::default()
        }),
    }
}

/// `## Page N` blocks for the pages of one batch.
fn build_chunk(pages: &[String], batch: &[usize]) -> String {
    batch
        .iter()
        .map(|&i| format!("## Page {}\n\n{}\n", i + 1, pages[i].trim()))
        .collect::<Vec<_>>()
        .join("\n")
}
