//! # textbook-ingest
//!
//! Turn scanned textbook PDFs into a searchable base of section theory,
//! problems, multi-part sub-items and answers.
//!
//! ## Why this crate?
//!
//! Scanned school textbooks carry no text layer, and plain OCR output is
//! too noisy to match a student's question against: Latin letters stand in
//! for Cyrillic ones, degree signs vanish, problem numbers run together on
//! one line. This crate OCRs every page, repairs the text with deterministic
//! rules, optionally lets an LLM correct and classify it, and stores the
//! result in SQLite with a full-text index tuned for "find this exercise".
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Render     rasterise pages via pdfium (spawn_blocking)
//!  ├─ 2. OCR        one vision-model call per page
//!  ├─ 3. Normalize  rule-based cleanup + 0–100 quality score
//!  ├─ 4. Correct    checkpointed LLM correction, gated by quality (optional)
//!  ├─ 5. Structure  document map + segmentation, or LLM distribution
//!  ├─ 6. Persist    one-transaction rewrite of the source + answer linking
//!  └─ 7. Retrieve   bm25 + answer/solution/parts bonuses, part resolution
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use textbook_ingest::{IngestMode, Ingestor, NeverCancel, NewBook, PipelineConfig, Store};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder().data_dir("data").build()?;
//!     let store = Arc::new(Store::open("data/textbooks.db")?);
//!     let book = store.find_or_create_book(&NewBook {
//!         subject: "geometry".into(),
//!         grade: 7,
//!         title: "Геометрия 7–9".into(),
//!         ..Default::default()
//!     })?;
//!     let source = store.add_source(book.id, Path::new("geometry.pdf"))?;
//!
//!     let ingestor = Ingestor::new(Arc::clone(&store), config.clone());
//!     let report = ingestor.run(source.id, IngestMode::Full, &NeverCancel).await?;
//!     eprintln!("{} problems", report.into_inner().problems);
//!
//!     let found = textbook_ingest::search(&store, &config, "смежные углы 2 вариант", &Default::default())?;
//!     println!("{}", textbook_ingest::format_answer_message(&found));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `textbook-ingest` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! textbook-ingest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifacts;
pub mod cancel;
pub mod config;
pub mod document_map;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod model;
pub mod normalize;
pub mod notify;
pub mod pipeline;
pub mod progress;
pub mod retrieval;
pub mod segment;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifacts::ArtifactStore;
pub use cancel::{CancelCheck, CancelFlag, NeverCancel, Outcome};
pub use config::{NormalizerOptions, PartHint, PipelineConfig, PipelineConfigBuilder};
pub use document_map::{DocumentMap, Span, SpanKind};
pub use error::{IngestError, LlmError, PageError};
pub use ingest::{IngestMode, IngestReport, Ingestor};
pub use jobs::{JobDispatcher, JobId, JobRequest, JobStatus, LocalDispatcher};
pub use model::{
    Book, NewBook, Page, ParsedAnswer, ProblemPart, ProblemRecord, ProblemType, SectionTheory,
    Source, SourceStatus, StoredProblem,
};
pub use normalize::{normalize_page, quality_score, Normalized};
pub use notify::{format_answer_message, LogNotifier, Notifier};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use retrieval::{search, SearchFilter, SearchHit, SearchResponse};
pub use store::Store;
