//! Pipeline stages that turn a PDF into page text and typed records.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested alone and swapped behind its trait.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ encode ──▶ ocr ──▶ (normalize) ──▶ correct ──▶ distribute
//! (pdfium)   (PNG)     (VLM)    (rules)         (LLM, opt)   (LLM, opt)
//! ```
//!
//! 1. [`render`]     — rasterise pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 2. [`encode`]     — PNG-encode pages for the vision request and for the
//!    optional page-image artefacts
//! 3. [`ocr`]        — the [`ocr::OcrEngine`] seam; one call per page
//! 4. [`correct`]    — checkpointed LLM clean-up of normalized pages
//! 5. [`distribute`] — LLM classification into theory, problems and answers
//!
//! Normalization and deterministic segmentation live in
//! [`crate::normalize`] and [`crate::segment`]; the stages are wired
//! together by [`crate::ingest`].

pub mod correct;
pub mod distribute;
pub mod encode;
pub mod ocr;
pub mod render;
