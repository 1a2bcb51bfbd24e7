//! Ingestion runs: one source, one mode, start to finish.
//!
//! ## Modes
//!
//! ```text
//! full                 render → OCR → normalize → segment → persist
//! from_normalized      normalized artefact → segment → persist
//! reanalyze            stored page text → segment → persist
//! llm_correct_only     normalized artefact → correct (checkpointed) → segment → persist
//! from_normalized_llm  normalized artefact → correct (checkpointed) → distribute → persist
//! ```
//!
//! ## Status and failure
//!
//! A run first claims the source (`rendering` for `full`, `ocr` otherwise).
//! A source already in one of those states is refused with
//! [`IngestError::SourceBusy`]. Preconditions such as a missing normalized
//! artefact fail before anything derived is touched, and any fatal error
//! marks the source `failed` with the error text.
//!
//! Every mode ends in [`Store::replace_source_content`], so a source's pages
//! and problems are either fully replaced or left as they were.
//!
//! ## Cancellation
//!
//! The flag is polled between OCR pages and between correction and
//! distribution batches. A cancelled run commits nothing, puts the source
//! back in the status it had before the claim, and returns
//! [`Outcome::Cancelled`]. A correction checkpoint survives for the next run.
//!
//! ## Repeated correction
//!
//! A completed correction records its pages in `{source}.llm_corrected.json`
//! next to the normalized artefact; later correcting modes skip those pages.
//! `full` rewrites the artefact from fresh OCR and drops the record.

use crate::artifacts::ArtifactStore;
use crate::cancel::{CancelCheck, Outcome};
use crate::config::PipelineConfig;
use crate::document_map::{self, DocumentMap};
use crate::error::{IngestError, PageError};
use crate::llm::provider::{model_label, resolve_provider};
use crate::llm::{CompletionService, ProviderCompletion};
use crate::model::{Book, Page, Source, SourceStatus};
use crate::normalize::{normalize_page, quality_score};
use crate::pipeline::correct::{correct_normalized_pages, CorrectedPages, CorrectionJob};
use crate::pipeline::distribute::{distribute, Distribution, DistributionJob};
use crate::pipeline::ocr::{OcrEngine, VisionLlmOcr};
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::progress::Stage;
use crate::segment::answers::extract_answers;
use crate::segment::problems::extract_problems;
use crate::segment::theory::{extract_fragments, merge_fragments};
use crate::store::{ReplaceReport, SourceContent, Store, TheoryWrite};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Pages rasterised per pdfium call. Bounds the images held in memory.
const RENDER_CHUNK: usize = 8;

/// Theory sections from distribution shorter than this are dropped.
const MIN_DISTRIBUTED_THEORY_LEN: usize = 30;

/// What a run does with a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    Full,
    FromNormalized,
    Reanalyze,
    LlmCorrectOnly,
    FromNormalizedLlm,
}

impl IngestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestMode::Full => "full",
            IngestMode::FromNormalized => "from_normalized",
            IngestMode::Reanalyze => "reanalyze",
            IngestMode::LlmCorrectOnly => "llm_correct_only",
            IngestMode::FromNormalizedLlm => "from_normalized_llm",
        }
    }

    /// Status the source is claimed with.
    fn claim_status(self) -> SourceStatus {
        match self {
            IngestMode::Full => SourceStatus::Rendering,
            _ => SourceStatus::Ocr,
        }
    }
}

impl fmt::Display for IngestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(IngestMode::Full),
            "from_normalized" => Ok(IngestMode::FromNormalized),
            "reanalyze" => Ok(IngestMode::Reanalyze),
            "llm_correct_only" => Ok(IngestMode::LlmCorrectOnly),
            "from_normalized_llm" => Ok(IngestMode::FromNormalizedLlm),
            other => Err(IngestError::InvalidConfig(format!(
                "unknown ingestion mode '{other}'; use full, from_normalized, reanalyze, \
                 llm_correct_only or from_normalized_llm"
            ))),
        }
    }
}

/// Summary of one run, complete or cancelled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub source_id: i64,
    pub mode: Option<IngestMode>,
    pub pages: usize,
    /// Pages stored with empty text after a render or OCR failure.
    pub pages_failed: usize,
    pub problems: usize,
    pub parts: usize,
    pub theory_sections: usize,
    pub answers_linked: usize,
    pub answers_not_found: usize,
    pub answers_skipped_existing: usize,
    pub correction_calls: usize,
    pub distribution_calls: usize,
    pub batches_failed: usize,
    pub quarantined_blocks: usize,
    pub errors: Vec<PageError>,
    pub duration_ms: u64,
}

impl IngestReport {
    fn absorb_replace(&mut self, replaced: &ReplaceReport) {
        self.pages = replaced.pages;
        self.problems = replaced.problems;
        self.parts = replaced.parts;
        self.theory_sections = replaced.theory_sections;
        self.answers_linked = replaced.links.updated;
        self.answers_not_found = replaced.links.not_found;
        self.answers_skipped_existing = replaced.links.skipped_existing;
    }
}

/// Runs ingestion for sources of the store.
///
/// OCR and completion engines are resolved from the config's LLM provider
/// on first use unless set explicitly.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<Store>,
    config: PipelineConfig,
    artifacts: ArtifactStore,
    rasterizer: Arc<dyn Rasterizer>,
    ocr: Option<Arc<dyn OcrEngine>>,
    completion: Option<Arc<dyn CompletionService>>,
}

impl Ingestor {
    pub fn new(store: Arc<Store>, config: PipelineConfig) -> Self {
        let rasterizer = Arc::new(PdfiumRasterizer::new(
            config.max_rendered_pixels,
            config.password.clone(),
        ));
        Self {
            artifacts: ArtifactStore::new(config.data_dir.clone()),
            store,
            config,
            rasterizer,
            ocr: None,
            completion: None,
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    fn ocr_engine(&self) -> Result<Arc<dyn OcrEngine>, IngestError> {
        match &self.ocr {
            Some(ocr) => Ok(Arc::clone(ocr)),
            None => Ok(Arc::new(VisionLlmOcr::new(
                resolve_provider(&self.config)?,
                &self.config,
            ))),
        }
    }

    fn completion_service(&self) -> Result<Arc<dyn CompletionService>, IngestError> {
        match &self.completion {
            Some(service) => Ok(Arc::clone(service)),
            None => Ok(Arc::new(ProviderCompletion::new(
                resolve_provider(&self.config)?,
                &self.config,
            ))),
        }
    }

    /// Run `mode` for `source_id`.
    ///
    /// # Errors
    /// [`IngestError::SourceNotFound`] and [`IngestError::SourceBusy`] leave
    /// the source untouched. Every other error marks it `failed`.
    pub async fn run(
        &self,
        source_id: i64,
        mode: IngestMode,
        cancel: &dyn CancelCheck,
    ) -> Result<Outcome<IngestReport>, IngestError> {
        let started = Instant::now();
        let previous = self.store.get_source(source_id)?.status;
        let source = self.store.claim_source(source_id, mode.claim_status())?;
        info!("Ingestion started: source {} in mode '{}'", source_id, mode);

        let result = match self.store.get_book(source.book_id) {
            Ok(book) => self.run_claimed(&source, &book, mode, cancel).await,
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Ingestion of source {} failed — {}", source_id, e);
                self.store.fail_source(source_id, &e.to_string())?;
                return Err(e);
            }
        };

        let outcome = outcome.map(|mut report| {
            report.source_id = source_id;
            report.mode = Some(mode);
            report.duration_ms = started.elapsed().as_millis() as u64;
            report
        });
        match &outcome {
            Outcome::Completed(report) => {
                self.store.set_status(source_id, SourceStatus::Done)?;
                info!(
                    "Ingestion complete: source {}, {} pages, {} problems, {} theory sections in {}ms",
                    source_id, report.pages, report.problems, report.theory_sections, report.duration_ms
                );
            }
            Outcome::Cancelled(_) => {
                self.store.set_status(source_id, previous)?;
                info!("Ingestion of source {} cancelled; nothing committed", source_id);
            }
        }
        if let Some(cb) = &self.config.progress_callback {
            let report = match &outcome {
                Outcome::Completed(r) | Outcome::Cancelled(r) => r,
            };
            cb.on_run_complete(report.problems, outcome.is_cancelled());
        }
        Ok(outcome)
    }

    async fn run_claimed(
        &self,
        source: &Source,
        book: &Book,
        mode: IngestMode,
        cancel: &dyn CancelCheck,
    ) -> Result<Outcome<IngestReport>, IngestError> {
        match mode {
            IngestMode::Full => {
                let mut report = IngestReport::default();
                let Some(pages) = self.render_and_ocr(source, &mut report, cancel).await? else {
                    return Ok(Outcome::Cancelled(report));
                };
                self.persist_segmented(source, book, pages, report).map(Outcome::Completed)
            }
            IngestMode::FromNormalized => {
                let pages = self.pages_from_artifact(source)?;
                self.persist_segmented(source, book, pages, IngestReport::default())
                    .map(Outcome::Completed)
            }
            IngestMode::Reanalyze => {
                let pages = self.store.load_pages(source.id)?;
                if pages.iter().all(|p| p.normalized_text.trim().is_empty()) {
                    warn!("Source {}: no stored page text to reanalyze", source.id);
                }
                self.persist_segmented(source, book, pages, IngestReport::default())
                    .map(Outcome::Completed)
            }
            IngestMode::LlmCorrectOnly => {
                let pages = self.pages_from_artifact(source)?;
                let mut report = IngestReport::default();
                let Some(pages) = self.correct(source, book, pages, &mut report, cancel).await? else {
                    return Ok(Outcome::Cancelled(report));
                };
                self.persist_segmented(source, book, pages, report).map(Outcome::Completed)
            }
            IngestMode::FromNormalizedLlm => {
                let pages = self.pages_from_artifact(source)?;
                let mut report = IngestReport::default();
                let Some(pages) = self.correct(source, book, pages, &mut report, cancel).await? else {
                    return Ok(Outcome::Cancelled(report));
                };
                self.persist_distributed(source, book, pages, report, cancel).await
            }
        }
    }

    // ── Render + OCR ─────────────────────────────────────────────────────

    /// `None` when cancelled.
    async fn render_and_ocr(
        &self,
        source: &Source,
        report: &mut IngestReport,
        cancel: &dyn CancelCheck,
    ) -> Result<Option<Vec<Page>>, IngestError> {
        let progress = self.config.progress_callback.as_ref();
        let total = self.rasterizer.page_count(&source.pdf_path).await?;
        self.store.set_page_count(source.id, total)?;
        info!("Source {}: {} pages to render", source.id, total);

        let ocr = self.ocr_engine()?;
        if let Some(cb) = progress {
            cb.on_stage_start(Stage::Render, total);
        }
        self.store.set_status(source.id, SourceStatus::Ocr)?;
        if let Some(cb) = progress {
            cb.on_stage_start(Stage::Ocr, total);
        }

        let indices: Vec<usize> = (0..total).collect();
        let mut pages = Vec::with_capacity(total);
        for chunk in indices.chunks(RENDER_CHUNK) {
            let rendered = self.rasterizer.render_pages(&source.pdf_path, chunk).await?;
            for (idx, image) in rendered {
                if cancel.is_cancelled() {
                    info!("OCR cancelled at page {}/{}", idx + 1, total);
                    return Ok(None);
                }
                let mut page = Page {
                    page_num: idx,
                    ..Default::default()
                };
                let image = match image {
                    Ok(image) => image,
                    Err(detail) => {
                        warn!("Page {}: render failed — {}", idx + 1, detail);
                        if let Some(cb) = progress {
                            cb.on_page_error(idx + 1, total, &detail);
                        }
                        report.errors.push(PageError::RenderFailed { page: idx + 1, detail });
                        report.pages_failed += 1;
                        pages.push(page);
                        continue;
                    }
                };
                if self.config.keep_page_images {
                    let path = self.artifacts.page_image_path(source.book_id, source.id, idx + 1);
                    self.artifacts.save_image(&path, &image)?;
                    page.image_path = Some(path);
                }
                match ocr.ocr(&image).await {
                    Ok(text) => {
                        debug!("Page {}: {} chars recognised", idx + 1, text.text.len());
                        if let Some(cb) = progress {
                            cb.on_page_complete(idx + 1, total, text.text.chars().count());
                        }
                        page.raw_text = text.text;
                        page.ocr_confidence = text.confidence;
                    }
                    Err(e) => {
                        warn!("Page {}: OCR failed — {}", idx + 1, e);
                        if let Some(cb) = progress {
                            cb.on_page_error(idx + 1, total, &e.to_string());
                        }
                        report.errors.push(PageError::OcrFailed {
                            page: idx + 1,
                            detail: e.to_string(),
                        });
                        report.pages_failed += 1;
                    }
                }
                pages.push(page);
            }
        }

        let raw: Vec<(usize, &str)> = pages
            .iter()
            .map(|p| (p.display_num(), p.raw_text.as_str()))
            .collect();
        let raw_path = self
            .artifacts
            .raw_ocr_path(source.book_id, source.id, &model_label(&self.config));
        self.artifacts
            .write_pages(&raw_path, &artifact_title(source), &raw)?;
        info!("Raw OCR written to {}", raw_path.display());

        if let Some(cb) = progress {
            cb.on_stage_start(Stage::Normalize, pages.len());
        }
        for page in &mut pages {
            let normalized = normalize_page(&page.raw_text, &self.config.normalizer);
            page.normalized_text = normalized.text;
            page.quality = Some(normalized.quality);
        }
        self.write_normalized(source, &pages)?;
        self.artifacts
            .remove(&self.artifacts.corrected_pages_path(source.book_id, source.id))?;
        Ok(Some(pages))
    }

    // ── Artefacts ────────────────────────────────────────────────────────

    /// Pages from the normalized artefact. Raw text is carried over from the
    /// stored pages where they exist.
    fn pages_from_artifact(&self, source: &Source) -> Result<Vec<Page>, IngestError> {
        let path = self.artifacts.normalized_path(source.book_id, source.id);
        if !path.exists() {
            return Err(IngestError::MissingArtifact {
                source_id: source.id,
                path,
            });
        }
        let blob = self.artifacts.read_pages(&path)?;
        if blob.is_empty() {
            return Err(IngestError::MalformedArtifact {
                path,
                detail: "no '## Page N' sections".to_string(),
            });
        }
        let mut stored: HashMap<usize, Page> = self
            .store
            .load_pages(source.id)?
            .into_iter()
            .map(|p| (p.page_num, p))
            .collect();

        let pages = blob
            .into_iter()
            .map(|(num, text)| {
                let page_num = num.saturating_sub(1);
                let previous = stored.remove(&page_num).unwrap_or_default();
                Page {
                    page_num,
                    raw_text: if previous.raw_text.is_empty() {
                        text.clone()
                    } else {
                        previous.raw_text
                    },
                    quality: Some(quality_score(&text)),
                    normalized_text: text,
                    ocr_confidence: previous.ocr_confidence,
                    image_path: previous.image_path,
                }
            })
            .collect::<Vec<_>>();
        info!("Read {} pages from {}", pages.len(), path.display());
        Ok(pages)
    }

    fn write_normalized(&self, source: &Source, pages: &[Page]) -> Result<(), IngestError> {
        let path = self.artifacts.normalized_path(source.book_id, source.id);
        let texts: Vec<(usize, &str)> = pages
            .iter()
            .map(|p| (p.display_num(), p.normalized_text.as_str()))
            .collect();
        self.artifacts
            .write_pages(&path, &artifact_title(source), &texts)?;
        info!("Normalized text written to {}", path.display());
        Ok(())
    }

    fn save_doc_map(&self, source: &Source, map: &DocumentMap) -> Result<(), IngestError> {
        if !self.config.save_doc_map {
            return Ok(());
        }
        let path = self.artifacts.doc_map_path(source.book_id, source.id);
        self.artifacts.write_json(&path, map)?;
        debug!("Document map written to {}", path.display());
        Ok(())
    }

    // ── Correction ───────────────────────────────────────────────────────

    /// Correct the pages' normalized text and rewrite the artefact. `None`
    /// when cancelled.
    async fn correct(
        &self,
        source: &Source,
        book: &Book,
        mut pages: Vec<Page>,
        report: &mut IngestReport,
        cancel: &dyn CancelCheck,
    ) -> Result<Option<Vec<Page>>, IngestError> {
        let service = self.completion_service()?;
        let texts: Vec<String> = pages.iter().map(|p| p.normalized_text.clone()).collect();
        let quality: Vec<Option<u8>> = pages.iter().map(|p| p.quality).collect();
        let checkpoint_path = self.artifacts.checkpoint_path(source.book_id, source.id);
        let ledger_path = self.artifacts.corrected_pages_path(source.book_id, source.id);
        let mut ledger: CorrectedPages = self.artifacts.read_json(&ledger_path)?.unwrap_or_default();
        let already_corrected: BTreeSet<usize> = pages
            .iter()
            .enumerate()
            .filter(|(_, p)| ledger.pages.contains(&p.display_num()))
            .map(|(i, _)| i)
            .collect();
        if !already_corrected.is_empty() {
            info!(
                "Source {}: {} pages already corrected by an earlier run",
                source.id,
                already_corrected.len()
            );
        }
        let job = CorrectionJob {
            service: service.as_ref(),
            artifacts: &self.artifacts,
            checkpoint_path: &checkpoint_path,
            subject: &book.subject,
            batch_size: self.config.correction_batch_size,
            temperature: self.config.correction_temperature,
            quality_gate: self.config.quality_gate,
            already_corrected: &already_corrected,
            cancel,
            progress: self.config.progress_callback.as_ref(),
        };

        let outcome = correct_normalized_pages(&texts, &quality, &job).await?;
        let cancelled = outcome.is_cancelled();
        let corrected = outcome.into_inner();
        report.correction_calls = corrected.calls;
        report.batches_failed += corrected.errors.len();
        report.errors.extend(corrected.errors);
        if cancelled {
            return Ok(None);
        }

        ledger
            .pages
            .extend(corrected.corrected.iter().filter_map(|&i| pages.get(i)).map(Page::display_num));
        for (page, text) in pages.iter_mut().zip(corrected.pages) {
            if page.normalized_text != text {
                page.quality = Some(quality_score(&text));
                page.normalized_text = text;
            }
        }
        self.write_normalized(source, &pages)?;
        self.artifacts.write_json(&ledger_path, &ledger)?;
        Ok(Some(pages))
    }

    // ── Persist ──────────────────────────────────────────────────────────

    /// Deterministic path: document map, segmentation, theory merge.
    fn persist_segmented(
        &self,
        source: &Source,
        book: &Book,
        pages: Vec<Page>,
        mut report: IngestReport,
    ) -> Result<IngestReport, IngestError> {
        let progress = self.config.progress_callback.as_ref();
        if let Some(cb) = progress {
            cb.on_stage_start(Stage::Segment, pages.len());
        }
        let texts: Vec<(usize, &str)> = pages
            .iter()
            .map(|p| (p.display_num(), p.normalized_text.as_str()))
            .collect();

        let map = document_map::build(&texts);
        self.save_doc_map(source, &map)?;
        let problems = extract_problems(&texts, Some(&map), self.config.min_problem_len);
        let answers = extract_answers(&texts, &map);
        let fragments = extract_fragments(&texts, &map, self.config.min_theory_len);
        let theory = merge_fragments(book.id, &fragments, self.config.min_theory_len);
        info!(
            "Source {}: {} spans, {} problems, {} answers, {} theory sections",
            source.id,
            map.spans.len(),
            problems.len(),
            answers.len(),
            theory.len()
        );

        if let Some(cb) = progress {
            cb.on_stage_start(Stage::Persist, 0);
        }
        let content = SourceContent {
            pages,
            problems,
            theory: TheoryWrite::Merge(theory),
            answers,
        };
        let replaced = self
            .store
            .replace_source_content(book.id, source.id, &content)?;
        report.absorb_replace(&replaced);
        Ok(report)
    }

    /// LLM path: classification calls, then a full rewrite including the
    /// book's section theory.
    async fn persist_distributed(
        &self,
        source: &Source,
        book: &Book,
        pages: Vec<Page>,
        mut report: IngestReport,
        cancel: &dyn CancelCheck,
    ) -> Result<Outcome<IngestReport>, IngestError> {
        let service = self.completion_service()?;
        let audit_dir = self.artifacts.audit_dir(source.book_id, source.id);
        let job = DistributionJob {
            service: service.as_ref(),
            audit_dir: &audit_dir,
            subject: &book.subject,
            batch_size: self.config.distribution_batch_size,
            temperature: self.config.distribution_temperature,
            paragraph_size_cap: self.config.paragraph_size_cap,
            merge_block_cap: self.config.merge_block_cap,
            context_snippet_chars: self.config.context_snippet_chars,
            cancel,
            progress: self.config.progress_callback.as_ref(),
        };
        let texts: Vec<(usize, &str)> = pages
            .iter()
            .map(|p| (p.display_num(), p.normalized_text.as_str()))
            .collect();

        let outcome = distribute(&texts, &job).await;
        let cancelled = outcome.is_cancelled();
        let distribution = outcome.into_inner();
        report.distribution_calls = distribution.calls;
        report.batches_failed += distribution.failed_batches.len();
        report.quarantined_blocks = distribution.quarantined;
        if cancelled {
            report.errors.extend(distribution.failed_batches);
            return Ok(Outcome::Cancelled(report));
        }
        if is_empty(&distribution) && distribution.calls > 0 {
            return Err(IngestError::Internal(format!(
                "distribution returned no blocks for source {} ({} of {} calls failed)",
                source.id,
                distribution.failed_batches.len(),
                distribution.calls
            )));
        }

        let Distribution {
            fragments,
            mut problems,
            answers,
            failed_batches,
            ..
        } = distribution;
        report.errors.extend(failed_batches);
        for problem in &mut problems {
            problem.dedup_parts();
        }
        let theory = merge_fragments(book.id, &fragments, MIN_DISTRIBUTED_THEORY_LEN);

        if let Some(cb) = self.config.progress_callback.as_ref() {
            cb.on_stage_start(Stage::Persist, 0);
        }
        let content = SourceContent {
            pages,
            problems,
            theory: TheoryWrite::ReplaceBook(theory),
            answers,
        };
        let replaced = self
            .store
            .replace_source_content(book.id, source.id, &content)?;
        report.absorb_replace(&replaced);
        Ok(Outcome::Completed(report))
    }
}

fn is_empty(distribution: &Distribution) -> bool {
    distribution.fragments.is_empty()
        && distribution.problems.is_empty()
        && distribution.answers.is_empty()
}

fn artifact_title(source: &Source) -> String {
    format!("Book {} — source {}", source.book_id, source.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_parse_and_display() {
        for mode in [
            IngestMode::Full,
            IngestMode::FromNormalized,
            IngestMode::Reanalyze,
            IngestMode::LlmCorrectOnly,
            IngestMode::FromNormalizedLlm,
        ] {
            assert_eq!(mode.as_str().parse::<IngestMode>().unwrap(), mode);
        }
        assert_eq!(" FULL ".parse::<IngestMode>().unwrap(), IngestMode::Full);
        assert!(matches!(
            "ocr_only".parse::<IngestMode>(),
            Err(IngestError::InvalidConfig(_))
        ));
    }

    #[test]
    fn only_full_claims_rendering() {
        assert_eq!(IngestMode::Full.claim_status(), SourceStatus::Rendering);
        assert_eq!(IngestMode::Reanalyze.claim_status(), SourceStatus::Ocr);
        assert_eq!(IngestMode::FromNormalizedLlm.claim_status(), SourceStatus::Ocr);
    }

    #[test]
    fn report_serialises_mode_in_snake_case() {
        let report = IngestReport {
            mode: Some(IngestMode::LlmCorrectOnly),
            ..Default::default()
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"llm_correct_only\""), "got: {json}");
    }
}
