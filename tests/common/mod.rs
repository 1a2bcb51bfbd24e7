//! Scripted fakes and fixtures shared by the integration tests.
//!
//! Nothing here touches the network or pdfium: pages come from
//! [`FakePdf`], OCR text from [`ScriptedOcr`] and LLM answers from
//! [`ScriptedCompletion`].

#![allow(dead_code)]

use async_trait::async_trait;
use image::DynamicImage;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use textbook_ingest::llm::CompletionService;
use textbook_ingest::pipeline::ocr::{OcrEngine, OcrError, OcrText};
use textbook_ingest::pipeline::render::{Rasterizer, RenderedPage};
use textbook_ingest::{
    ArtifactStore, Book, CancelFlag, IngestError, Ingestor, LlmError, NewBook, PipelineConfig,
    PipelineConfigBuilder, Source, Store,
};
use tracing_subscriber::EnvFilter;

/// Route `RUST_LOG`-filtered logs to the test harness. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Rendering + OCR ──────────────────────────────────────────────────────────

/// A PDF of `pages` blank pages.
pub struct FakePdf {
    pub pages: usize,
}

#[async_trait]
impl Rasterizer for FakePdf {
    async fn page_count(&self, _: &Path) -> Result<usize, IngestError> {
        Ok(self.pages)
    }

    async fn render_pages(&self, _: &Path, indices: &[usize]) -> Result<Vec<RenderedPage>, IngestError> {
        Ok(indices
            .iter()
            .map(|&i| (i, Ok(DynamicImage::new_rgb8(8, 8))))
            .collect())
    }
}

/// Hands out one scripted result per OCR call, in order. `None` fails the
/// page.
pub struct ScriptedOcr {
    pages: Mutex<VecDeque<Option<String>>>,
}

impl ScriptedOcr {
    pub fn new<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            pages: Mutex::new(pages.into_iter().map(|p| p.map(Into::into)).collect()),
        }
    }

    pub fn all(pages: &[&str]) -> Self {
        Self::new(pages.iter().map(|p| Some(*p)))
    }
}

#[async_trait]
impl OcrEngine for ScriptedOcr {
    async fn ocr(&self, _: &DynamicImage) -> Result<OcrText, OcrError> {
        match self.pages.lock().unwrap().pop_front().flatten() {
            Some(text) => Ok(OcrText {
                text,
                confidence: None,
            }),
            None => Err(OcrError::Engine {
                detail: "scanner glare".into(),
                retries: 0,
            }),
        }
    }
}

// ── Completion ───────────────────────────────────────────────────────────────

type Responder = dyn Fn(&str, &str) -> Result<String, LlmError> + Send + Sync;

/// A completion service driven by a closure `(system, prompt) -> answer`.
/// Counts calls and can trip a cancel flag after a given number of them.
pub struct ScriptedCompletion {
    respond: Box<Responder>,
    calls: AtomicUsize,
    cancel_after: Option<(usize, CancelFlag)>,
}

impl ScriptedCompletion {
    pub fn new(respond: impl Fn(&str, &str) -> Result<String, LlmError> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            cancel_after: None,
        }
    }

    /// Correction answers that repair the Latin `H` in `Hайдите` and echo
    /// everything else. Distribution prompts get `blocks_json`.
    pub fn textbook(blocks_json: &'static str) -> Self {
        Self::new(move |_, prompt| {
            if prompt.contains("## Page ") {
                Ok(echo_pages(prompt).replace("Hайдите", "Найдите"))
            } else {
                Ok(blocks_json.to_string())
            }
        })
    }

    pub fn cancelling_after(mut self, calls: usize, flag: CancelFlag) -> Self {
        self.cancel_after = Some((calls, flag));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, system: &str, prompt: &str, _: f32) -> Result<String, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, flag)) = &self.cancel_after {
            if n >= *after {
                flag.cancel();
            }
        }
        (self.respond)(system, prompt)
    }
}

/// The `## Page N` blocks of a correction prompt, unchanged.
pub fn echo_pages(prompt: &str) -> String {
    prompt
        .find("## Page ")
        .map_or_else(String::new, |start| prompt[start..].to_string())
}

// ── Fixture ──────────────────────────────────────────────────────────────────

/// A temp data directory, an in-memory store and one registered source.
pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<Store>,
    pub book: Book,
    pub source: Source,
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let book = store
            .find_or_create_book(&NewBook {
                subject: "geometry".into(),
                grade: 7,
                title: "Геометрия 7–9".into(),
                authors: Some("Атанасян Л. С.".into()),
                ..Default::default()
            })
            .unwrap();
        let source = store
            .add_source(book.id, Path::new("geometry-7.pdf"))
            .unwrap();
        Self {
            dir,
            store,
            book,
            source,
        }
    }

    pub fn config(&self) -> PipelineConfigBuilder {
        PipelineConfig::builder().data_dir(self.dir.path())
    }

    pub fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(self.dir.path())
    }

    pub fn ingestor(&self, config: PipelineConfig) -> Ingestor {
        Ingestor::new(Arc::clone(&self.store), config)
    }

    /// Write the normalized artefact for the source, one text per page.
    pub fn write_normalized(&self, pages: &[&str]) {
        let numbered: Vec<(usize, &str)> = pages
            .iter()
            .enumerate()
            .map(|(i, text)| (i + 1, *text))
            .collect();
        let artifacts = self.artifacts();
        artifacts
            .write_pages(
                &artifacts.normalized_path(self.book.id, self.source.id),
                "Геометрия 7–9",
                &numbered,
            )
            .unwrap();
    }

    pub fn problem_numbers(&self) -> Vec<String> {
        self.store
            .problems_for_source(self.source.id)
            .unwrap()
            .into_iter()
            .filter_map(|p| p.number)
            .collect()
    }
}
