//! Error types for the textbook-ingest library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`IngestError`] — **Fatal** for one run: the source cannot be processed
//!   (missing artefact, source already in flight, database failure). Returned
//!   as `Err(IngestError)` from [`crate::ingest::Ingestor::run`].
//!
//! * [`PageError`] — **Non-fatal**: one page failed OCR or one LLM batch
//!   failed, and the run fell back to the pre-call text. Collected in
//!   [`crate::ingest::IngestReport`] so operators can audit what degraded.
//!
//! * [`LlmError`] — one LLM call failed. The `Unparseable` variant carries
//!   the path of the audit artefact holding the raw response, so every
//!   structured-output failure can be reproduced offline.
//!
//! Cancellation is none of these: it surfaces as
//! [`crate::cancel::Outcome::Cancelled`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the textbook-ingest library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The PDF registered for a source does not exist on disk.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// No source row with this id.
    #[error("Source {source_id} not found")]
    SourceNotFound { source_id: i64 },

    /// No book row with this id.
    #[error("Book {book_id} not found")]
    BookNotFound { book_id: i64 },

    /// A mode that re-imports text needs an artefact an earlier run writes.
    #[error(
        "Normalized text for source {source_id} is missing: '{path}'\n\
Run a full ingestion for this source first."
    )]
    MissingArtifact { source_id: i64, path: PathBuf },

    /// A run for this source is already in flight.
    #[error("Source {source_id} is already being processed (status '{status}')")]
    SourceBusy { source_id: i64, status: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/dir/containing/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A single LLM call failed in a way the caller could not absorb.
    #[error(transparent)]
    Llm(#[from] LlmError),

    // ── Storage errors ────────────────────────────────────────────────────
    /// SQLite returned an error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Schema migration could not be applied.
    #[error("Database migration failed: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    /// Could not create or write an artefact under the data directory.
    #[error("Failed to write artefact '{path}': {source}")]
    ArtifactWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not read an artefact under the data directory.
    #[error("Failed to read artefact '{path}': {source}")]
    ArtifactReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An artefact exists but does not deserialise.
    #[error("Artefact '{path}' is malformed: {detail}")]
    MalformedArtifact { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Job errors ────────────────────────────────────────────────────────
    /// The dispatcher's deadline for a job elapsed.
    #[error("Job {job_id} timed out after {secs}s")]
    JobTimeout { job_id: u64, secs: u64 },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of one call to the completion service.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider returned an error after all retries.
    #[error("LLM API error after {retries} retries: {message}")]
    Api { message: String, retries: u32 },

    /// Neither the raw nor the repaired response could be parsed.
    #[error(
        "LLM output for mode '{mode}' could not be parsed ({reason}); \
raw response saved to '{audit_path}'"
    )]
    Unparseable {
        mode: String,
        reason: String,
        audit_path: PathBuf,
    },

    /// The raw response could not be persisted for audit.
    #[error("Failed to persist LLM audit artefact '{path}': {source}")]
    AuditWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LlmError {
    /// Audit artefact path, when the failure was a parse failure.
    pub fn audit_path(&self) -> Option<&std::path::Path> {
        match self {
            LlmError::Unparseable { audit_path, .. } => Some(audit_path),
            _ => None,
        }
    }
}

/// A non-fatal error recorded while the run continues.
///
/// Page numbers are 1-indexed for display.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed; the page is stored with empty text.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// OCR failed; the page is stored with empty text.
    #[error("Page {page}: OCR failed: {detail}")]
    OcrFailed { page: usize, detail: String },

    /// A correction batch failed; its pages keep their normalized text.
    #[error("Correction batch {batch} (pages {first_page}–{last_page}) failed: {detail}")]
    CorrectionBatchFailed {
        batch: usize,
        first_page: usize,
        last_page: usize,
        detail: String,
    },

    /// A distribution call failed; its text produced no records.
    #[error("Distribution batch {batch} (page {page}) failed: {detail}")]
    DistributionBatchFailed {
        batch: usize,
        page: usize,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_busy_display() {
        let e = IngestError::SourceBusy {
            source_id: 7,
            status: "ocr".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Source 7"), "got: {msg}");
        assert!(msg.contains("'ocr'"), "got: {msg}");
    }

    #[test]
    fn missing_artifact_mentions_path() {
        let e = IngestError::MissingArtifact {
            source_id: 3,
            path: PathBuf::from("data/ocr_normalized/1/3.md"),
        };
        assert!(e.to_string().contains("ocr_normalized/1/3.md"));
    }

    #[test]
    fn unparseable_carries_audit_path() {
        let e = LlmError::Unparseable {
            mode: "distribute".into(),
            reason: "expected value at line 1".into(),
            audit_path: PathBuf::from("data/llm_audit/1/2/20240101_000000_distribute.json"),
        };
        assert!(e.to_string().contains("distribute"));
        assert_eq!(
            e.audit_path().map(|p| p.to_string_lossy().into_owned()),
            Some("data/llm_audit/1/2/20240101_000000_distribute.json".to_string())
        );
    }

    #[test]
    fn api_error_has_no_audit_path() {
        let e = LlmError::Api {
            message: "503".into(),
            retries: 3,
        };
        assert!(e.audit_path().is_none());
        assert!(e.to_string().contains("3 retries"));
    }

    #[test]
    fn llm_error_converts_into_ingest_error() {
        let e: IngestError = LlmError::Api {
            message: "rate limited".into(),
            retries: 1,
        }
        .into();
        assert!(e.to_string().contains("rate limited"));
    }

    #[test]
    fn page_error_round_trips_through_json() {
        let e = PageError::CorrectionBatchFailed {
            batch: 2,
            first_page: 11,
            last_page: 20,
            detail: "timeout".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: PageError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_string(), e.to_string());
    }
}
