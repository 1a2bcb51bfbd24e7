//! Domain records shared by the pipeline stages and the store.
//!
//! Records without an `id` are what the pipeline produces and stages for
//! insertion; the `Stored*` variants are what the store hands back.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ── Book / Source ────────────────────────────────────────────────────────

/// A textbook. Created on the first upload for a (subject, grade, authors,
/// part) tuple and never deleted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub subject: String,
    pub grade: i32,
    pub title: String,
    pub authors: Option<String>,
    pub part: Option<String>,
    pub is_solutions_book: bool,
}

/// Fields needed to find or create a [`Book`].
#[derive(Debug, Clone, Default)]
pub struct NewBook {
    pub subject: String,
    pub grade: i32,
    pub title: String,
    pub authors: Option<String>,
    pub part: Option<String>,
    pub is_solutions_book: bool,
}

/// Processing status of one uploaded document.
///
/// This is the only progress signal visible outside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Rendering,
    Ocr,
    Done,
    Failed,
}

impl SourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceStatus::Pending => "pending",
            SourceStatus::Rendering => "rendering",
            SourceStatus::Ocr => "ocr",
            SourceStatus::Done => "done",
            SourceStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SourceStatus::Pending),
            "rendering" => Some(SourceStatus::Rendering),
            "ocr" => Some(SourceStatus::Ocr),
            "done" => Some(SourceStatus::Done),
            "failed" => Some(SourceStatus::Failed),
            _ => None,
        }
    }

    /// True while a run owns the source.
    pub fn is_in_flight(self) -> bool {
        matches!(self, SourceStatus::Rendering | SourceStatus::Ocr)
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub book_id: i64,
    pub pdf_path: PathBuf,
    pub status: SourceStatus,
    pub page_count: Option<usize>,
    pub error_message: Option<String>,
}

// ── Pages ────────────────────────────────────────────────────────────────

/// One page of a source, as produced by OCR and normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 0-based position within the source.
    pub page_num: usize,
    pub raw_text: String,
    pub normalized_text: String,
    pub ocr_confidence: Option<f32>,
    /// Normalizer quality score, 0–100.
    pub quality: Option<u8>,
    pub image_path: Option<PathBuf>,
}

impl Page {
    /// 1-based page number used in artefacts, spans and page references.
    pub fn display_num(&self) -> usize {
        self.page_num + 1
    }
}

// ── Problems ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    Question,
    Exercise,
    #[default]
    Unknown,
}

impl ProblemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProblemType::Question => "question",
            ProblemType::Exercise => "exercise",
            ProblemType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "question" => ProblemType::Question,
            "exercise" => ProblemType::Exercise,
            _ => ProblemType::Unknown,
        }
    }
}

/// One independently answerable sub-item of a problem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemPart {
    /// Numeral or letter: "1", "2", "а", "b".
    pub part_number: String,
    pub part_text: String,
    pub answer_text: Option<String>,
    pub solution_text: Option<String>,
}

/// A problem produced by segmentation or distribution, not yet stored.
///
/// `has_parts` is derived from `parts`, so a problem flagged as multi-part
/// always carries at least one part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemRecord {
    pub number: Option<String>,
    /// Section label such as "§7".
    pub section: Option<String>,
    pub text: String,
    pub clean_text: String,
    pub solution_text: Option<String>,
    pub answer_text: Option<String>,
    /// 0-based page the problem was found on.
    pub page_index: Option<usize>,
    pub page_ref: Option<String>,
    pub problem_type: ProblemType,
    pub parts: Vec<ProblemPart>,
    pub confidence: f32,
}

impl ProblemRecord {
    pub fn has_parts(&self) -> bool {
        !self.parts.is_empty()
    }

    /// Drop parts that repeat an earlier part number. The store enforces
    /// uniqueness per (problem, part_number).
    pub fn dedup_parts(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.parts.retain(|p| seen.insert(p.part_number.clone()));
    }
}

/// A problem as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProblem {
    pub id: i64,
    pub book_id: i64,
    pub source_id: Option<i64>,
    pub page_id: Option<i64>,
    pub number: Option<String>,
    pub section: Option<String>,
    pub text: String,
    pub clean_text: String,
    pub solution_text: Option<String>,
    pub answer_text: Option<String>,
    pub page_ref: Option<String>,
    pub problem_type: ProblemType,
    pub has_parts: bool,
    pub confidence: f32,
}

// ── Theory / answers ─────────────────────────────────────────────────────

/// Theory text for one section found in one source.
///
/// Fragments from every source of a book merge into one [`SectionTheory`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TheoryFragment {
    pub section: String,
    pub text: String,
    /// 1-based.
    pub start_page: usize,
    /// 1-based, inclusive.
    pub end_page: usize,
}

/// Merged theory for one (book, section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionTheory {
    pub book_id: i64,
    pub section: String,
    pub text: String,
    pub page_ref: Option<String>,
}

/// One answer parsed from an answers span or an answers block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedAnswer {
    pub number: String,
    pub answer_text: String,
    /// Section label such as "§7", when the answer key named one.
    pub section: Option<String>,
}

/// Counts returned by answer linking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReport {
    pub updated: usize,
    pub not_found: usize,
    /// Matches that already had an answer and were left untouched.
    pub skipped_existing: usize,
}

impl LinkReport {
    pub fn absorb(&mut self, other: LinkReport) {
        self.updated += other.updated;
        self.not_found += other.not_found;
        self.skipped_existing += other.skipped_existing;
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Format a 1-based page range the way textbooks cite it.
pub fn page_ref(start: usize, end: usize) -> String {
    if start == end {
        format!("стр. {start}")
    } else {
        format!("стр. {start}–{end}")
    }
}

/// Normalise a bare section number or label into "§N".
pub fn section_label(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('§') {
        trimmed.to_string()
    } else {
        format!("§{trimmed}")
    }
}
