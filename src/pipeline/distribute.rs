//! LLM-assisted distribution of normalized text into typed records.
//!
//! ## Two modes
//!
//! **Paragraph mode** (preferred): the text is split at paragraph headers.
//! With two or more paragraphs, or a single one under
//! `paragraph_size_cap`, each paragraph goes to the model whole, so theory
//! and its exercises are classified with their full context. Every block
//! the model returns inherits the paragraph's page and section.
//!
//! **Block mode** (fallback): the text is cut into [`PreprocessBlock`]s at
//! header/task/solution/problem boundaries, short adjacent theory blocks are
//! merged, and `distribution_batch_size` blocks go per call with a snippet
//! of the neighbouring blocks as context.
//!
//! ## Parse boundary
//!
//! Each returned element is validated into a [`DistributedBlock`]. An
//! unknown `type`, a theory block without section or text, or a problem
//! without text is quarantined: counted and logged, never guessed at.
//!
//! ## Failure and cancellation
//!
//! A failed call (API error or unparseable output, whose raw response is
//! already in the audit directory) is recorded as a
//! [`PageError::DistributionBatchFailed`] and the run moves on. Cancellation
//! is polled before every call and returns [`Outcome::Cancelled`] with the
//! records gathered so far; the caller does not persist them.

use crate::cancel::{CancelCheck, Outcome};
use crate::error::PageError;
use crate::llm::prompts::{
    distribution_user_prompt, format_block, format_context, paragraph_user_prompt,
    DISTRIBUTION_SYSTEM_PROMPT,
};
use crate::llm::structured::{call_structured, StructuredRequest};
use crate::llm::CompletionService;
use crate::model::{page_ref, section_label, ParsedAnswer, ProblemPart, ProblemRecord, TheoryFragment};
use crate::progress::{ProgressCallback, Stage};
use crate::segment::classify::classify_problem;
use crate::segment::parts::parse_parts;
use crate::segment::patterns::{classify_line, LineKind, RE_FALLBACK_HEADING, RE_SECTION_HEADER};
use crate::segment::problems::clean_problem_text;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// Confidence given to LLM-distributed problems.
const DISTRIBUTION_CONFIDENCE: f32 = 0.7;

// ── Preprocessing ────────────────────────────────────────────────────────────

/// Heuristic hint attached to a block. The model makes the final call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHint {
    Theory,
    SectionHeader,
    Solution,
    ProblemStart,
    /// Tasks-block labels and similar framing text.
    Other,
}

impl BlockHint {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockHint::Theory => "theory",
            BlockHint::SectionHeader => "section_header",
            BlockHint::Solution => "solution",
            BlockHint::ProblemStart => "problem_start",
            BlockHint::Other => "other",
        }
    }

    fn is_theory_like(self) -> bool {
        matches!(self, BlockHint::Theory | BlockHint::SectionHeader)
    }
}

/// A contiguous run of lines handed to the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessBlock {
    pub block_id: usize,
    /// 1-based.
    pub page: usize,
    pub hint: BlockHint,
    pub text: String,
}

/// Cut pages into blocks at structural boundaries. Blocks never span pages.
/// `pages` are `(page_num, text)` with 1-based numbers.
pub fn preprocess_blocks(pages: &[(usize, &str)]) -> Vec<PreprocessBlock> {
    let mut blocks = Vec::new();
    for &(page, text) in pages {
        if text.trim().is_empty() {
            continue;
        }
        let mut lines: Vec<&str> = Vec::new();
        let mut hint = BlockHint::Theory;
        let mut flush = |lines: &mut Vec<&str>, hint: BlockHint| {
            let body = lines.join("\n").trim().to_string();
            lines.clear();
            if !body.is_empty() {
                blocks.push(PreprocessBlock {
                    block_id: 0,
                    page,
                    hint,
                    text: body,
                });
            }
        };

        for line in text.lines() {
            let boundary = match classify_line(line) {
                LineKind::SectionHeader(_) => Some(BlockHint::SectionHeader),
                LineKind::TasksLabel => Some(BlockHint::Other),
                LineKind::SolutionStart => Some(BlockHint::Solution),
                LineKind::ProblemStart { .. } => Some(BlockHint::ProblemStart),
                LineKind::Text => None,
            };
            if let Some(next) = boundary {
                flush(&mut lines, hint);
                hint = next;
            }
            lines.push(line.trim_end());
        }
        flush(&mut lines, hint);
    }
    number_blocks(&mut blocks);
    blocks
}

/// Merge runs of adjacent theory/header blocks while the merged text stays
/// under `cap` characters. Ids are renumbered.
pub fn merge_short_blocks(blocks: Vec<PreprocessBlock>, cap: usize) -> Vec<PreprocessBlock> {
    let mut out: Vec<PreprocessBlock> = Vec::with_capacity(blocks.len());
    for block in blocks {
        if let Some(prev) = out.last_mut() {
            let fits = prev.text.chars().count() + block.text.chars().count() + 2 < cap;
            // a new header starts its own run
            if fits && prev.hint.is_theory_like() && block.hint == BlockHint::Theory {
                prev.text.push_str("\n\n");
                prev.text.push_str(&block.text);
                continue;
            }
        }
        out.push(block);
    }
    number_blocks(&mut out);
    out
}

fn number_blocks(blocks: &mut [PreprocessBlock]) {
    for (i, b) in blocks.iter_mut().enumerate() {
        b.block_id = i + 1;
    }
}

/// A whole paragraph: from its header to the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct Paragraph {
    pub section: Option<String>,
    /// 1-based page of the header.
    pub page: usize,
    pub text: String,
}

/// Split the text at paragraph headers. When no `§`/`Параграф` header
/// exists, numbered headings after a blank line are used instead, as long
/// as their numbers increase. Text before the first header is not part of
/// any paragraph.
pub fn split_paragraphs(pages: &[(usize, &str)]) -> Vec<Paragraph> {
    let has_headers = pages
        .iter()
        .any(|(_, t)| t.lines().any(|l| RE_SECTION_HEADER.is_match(l.trim())));

    let mut paragraphs: Vec<Paragraph> = Vec::new();
    let mut last_fallback: u32 = 0;
    for &(page, text) in pages {
        let mut prev_blank = true;
        for line in text.lines() {
            let trimmed = line.trim();
            let header = if has_headers {
                RE_SECTION_HEADER
                    .is_match(trimmed)
                    .then(|| crate::segment::patterns::section_of(trimmed))
            } else if prev_blank {
                RE_FALLBACK_HEADING
                    .captures(trimmed)
                    .and_then(|c| c[1].parse::<u32>().ok())
                    .filter(|&n| n > last_fallback)
                    .map(|n| {
                        last_fallback = n;
                        Some(format!("§{n}"))
                    })
            } else {
                None
            };
            prev_blank = trimmed.is_empty();

            match header {
                Some(section) => paragraphs.push(Paragraph {
                    section,
                    page,
                    text: trimmed.to_string(),
                }),
                None => {
                    if let Some(p) = paragraphs.last_mut() {
                        p.text.push('\n');
                        p.text.push_str(line.trim_end());
                    }
                }
            }
        }
    }
    for p in &mut paragraphs {
        p.text = p.text.trim().to_string();
    }
    paragraphs
}

// ── Parse boundary ───────────────────────────────────────────────────────────

/// One validated block returned by the classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum DistributedBlock {
    SectionTheory { section: String, text: String },
    Theory { section: String, text: String },
    Problem(Box<ProblemRecord>),
    SolutionOnly {
        solution_text: Option<String>,
        answer_text: Option<String>,
    },
    AnswersBlock { answers: Vec<ParsedAnswer> },
    Other,
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    section: Option<Value>,
    #[serde(default)]
    number: Option<Value>,
    #[serde(default)]
    theory_text: Option<String>,
    #[serde(default)]
    problem_text: Option<String>,
    #[serde(default)]
    solution_text: Option<String>,
    #[serde(default)]
    answer_text: Option<String>,
    #[serde(default)]
    parts: Option<Vec<WirePart>>,
    #[serde(default)]
    answers: Option<Vec<WireAnswer>>,
}

#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(default)]
    part_number: Option<Value>,
    #[serde(default)]
    part_text: Option<String>,
    #[serde(default)]
    answer_text: Option<String>,
    #[serde(default)]
    solution_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAnswer {
    #[serde(default)]
    number: Option<Value>,
    #[serde(default)]
    answer_text: Option<String>,
}

/// Top-level shape: an object with a `blocks` array (absent means empty).
pub fn parse_blocks_response(raw: &str) -> Result<Vec<Value>, String> {
    let data: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let Value::Object(mut map) = data else {
        return Err("expected a JSON object".into());
    };
    match map.remove("blocks") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err("'blocks' must be a list".into()),
    }
}

/// String or number, trimmed, non-empty.
fn scalar(v: Option<&Value>) -> Option<String> {
    let s = match v? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn text(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Validated block, or the quarantine reason.
fn validate_block(
    value: Value,
    page: usize,
    default_section: Option<&str>,
) -> Result<DistributedBlock, String> {
    let wire: WireBlock = serde_json::from_value(value).map_err(|e| e.to_string())?;
    let section = scalar(wire.section.as_ref())
        .or_else(|| default_section.map(str::to_string))
        .map(|s| section_label(&s));
    let kind = wire
        .kind
        .as_deref()
        .map(|k| k.trim().to_lowercase())
        .unwrap_or_default();

    let block = match kind.as_str() {
        "section_theory" | "theory" => {
            let section = section.ok_or("theory block without section")?;
            let text = text(wire.theory_text).ok_or("theory block without theory_text")?;
            if kind == "theory" {
                DistributedBlock::Theory { section, text }
            } else {
                DistributedBlock::SectionTheory { section, text }
            }
        }
        "problem" => {
            let problem_text = text(wire.problem_text).ok_or("problem block without problem_text")?;
            let mut parts: Vec<ProblemPart> = wire
                .parts
                .unwrap_or_default()
                .into_iter()
                .filter_map(|p| {
                    let number = scalar(p.part_number.as_ref());
                    let part_text = text(p.part_text);
                    if number.is_none() && part_text.is_none() {
                        return None;
                    }
                    Some(ProblemPart {
                        part_number: number.unwrap_or_else(|| "?".to_string()),
                        part_text: part_text.unwrap_or_default(),
                        answer_text: text(p.answer_text),
                        solution_text: text(p.solution_text),
                    })
                })
                .collect();
            if parts.is_empty() {
                parts = parse_parts(&problem_text);
            }
            let mut record = ProblemRecord {
                number: scalar(wire.number.as_ref()),
                section,
                clean_text: clean_problem_text(&problem_text),
                problem_type: classify_problem(&problem_text),
                solution_text: text(wire.solution_text),
                answer_text: text(wire.answer_text),
                page_index: Some(page.saturating_sub(1)),
                page_ref: Some(page_ref(page, page)),
                parts,
                confidence: DISTRIBUTION_CONFIDENCE,
                text: problem_text,
            };
            record.dedup_parts();
            DistributedBlock::Problem(Box::new(record))
        }
        "solution_only" => DistributedBlock::SolutionOnly {
            solution_text: text(wire.solution_text),
            answer_text: text(wire.answer_text),
        },
        "answers_block" => DistributedBlock::AnswersBlock {
            answers: wire
                .answers
                .unwrap_or_default()
                .into_iter()
                .filter_map(|a| {
                    Some(ParsedAnswer {
                        number: scalar(a.number.as_ref())?,
                        answer_text: text(a.answer_text)?,
                        section: None,
                    })
                })
                .collect(),
        },
        "other" => DistributedBlock::Other,
        "" => return Err("block without type".into()),
        unknown => return Err(format!("unknown block type '{unknown}'")),
    };
    Ok(block)
}

// ── Run ──────────────────────────────────────────────────────────────────────

/// Which split the run used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistributionMode {
    #[default]
    Paragraphs,
    Blocks,
}

/// Records produced by one distribution run.
#[derive(Debug, Clone, Default)]
pub struct Distribution {
    pub mode: DistributionMode,
    pub fragments: Vec<TheoryFragment>,
    pub problems: Vec<ProblemRecord>,
    pub answers: Vec<ParsedAnswer>,
    pub failed_batches: Vec<PageError>,
    /// Blocks rejected at the parse boundary.
    pub quarantined: usize,
    pub calls: usize,
}

impl Distribution {
    fn absorb(&mut self, block: DistributedBlock, page: usize) {
        match block {
            DistributedBlock::SectionTheory { section, text }
            | DistributedBlock::Theory { section, text } => {
                self.fragments.push(TheoryFragment {
                    section,
                    text,
                    start_page: page,
                    end_page: page,
                });
            }
            DistributedBlock::Problem(record) => self.problems.push(*record),
            DistributedBlock::SolutionOnly {
                solution_text,
                answer_text,
            } => {
                let Some(last) = self.problems.last_mut() else {
                    warn!("Page {}: solution block with no preceding problem", page);
                    self.quarantined += 1;
                    return;
                };
                if let Some(sol) = solution_text {
                    last.solution_text = Some(match last.solution_text.take() {
                        Some(prev) => format!("{prev}\n\n{sol}"),
                        None => sol,
                    });
                }
                if last.answer_text.is_none() {
                    last.answer_text = answer_text;
                }
            }
            DistributedBlock::AnswersBlock { answers } => self.answers.extend(answers),
            DistributedBlock::Other => {}
        }
    }
}

/// Everything a distribution run needs besides the pages.
pub struct DistributionJob<'a> {
    pub service: &'a dyn CompletionService,
    pub audit_dir: &'a Path,
    pub subject: &'a str,
    pub batch_size: usize,
    pub temperature: f32,
    pub paragraph_size_cap: usize,
    pub merge_block_cap: usize,
    pub context_snippet_chars: usize,
    pub cancel: &'a dyn CancelCheck,
    pub progress: Option<&'a ProgressCallback>,
}

/// One classification call: prompt, mode label, and how to place its blocks.
struct Call {
    prompt: String,
    mode: &'static str,
    /// `(block_id, page)` of the blocks sent; empty in paragraph mode.
    pages_by_id: Vec<(usize, usize)>,
    default_page: usize,
    default_section: Option<String>,
}

/// Classify `pages` (`(page_num, text)`, 1-based) into typed records.
pub async fn distribute(pages: &[(usize, &str)], job: &DistributionJob<'_>) -> Outcome<Distribution> {
    let mut out = Distribution::default();
    let paragraphs = split_paragraphs(pages);
    let use_paragraphs = paragraphs.len() >= 2
        || (paragraphs.len() == 1
            && paragraphs[0].text.chars().count() <= job.paragraph_size_cap);

    let calls: Vec<Call> = if use_paragraphs {
        out.mode = DistributionMode::Paragraphs;
        paragraphs
            .iter()
            .map(|p| Call {
                prompt: paragraph_user_prompt(job.subject, p.section.as_deref(), p.page, &p.text),
                mode: "distribute_paragraph",
                pages_by_id: Vec::new(),
                default_page: p.page,
                default_section: p.section.clone(),
            })
            .collect()
    } else {
        out.mode = DistributionMode::Blocks;
        block_calls(pages, job)
    };

    info!(
        "Distribution: {} calls in {:?} mode",
        calls.len(),
        out.mode
    );
    if let Some(cb) = job.progress {
        cb.on_stage_start(Stage::Distribute, calls.len());
    }

    let total = calls.len();
    for (idx, call) in calls.into_iter().enumerate() {
        if job.cancel.is_cancelled() {
            info!("Distribution cancelled before call {}/{}", idx + 1, total);
            return Outcome::Cancelled(out);
        }
        out.calls += 1;
        let request = StructuredRequest {
            system: DISTRIBUTION_SYSTEM_PROMPT,
            prompt: &call.prompt,
            temperature: job.temperature,
            mode: call.mode,
            audit_dir: job.audit_dir,
        };
        match call_structured(job.service, request, parse_blocks_response).await {
            Ok(values) => {
                debug!("Distribution call {}/{}: {} blocks", idx + 1, total, values.len());
                for value in values {
                    let page = block_page(&value, &call);
                    match validate_block(value, page, call.default_section.as_deref()) {
                        Ok(block) => out.absorb(block, page),
                        Err(reason) => {
                            warn!("Page {}: quarantined block — {}", page, reason);
                            out.quarantined += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Distribution call {}/{} failed — {}", idx + 1, total, e);
                out.failed_batches.push(PageError::DistributionBatchFailed {
                    batch: idx + 1,
                    page: call.default_page,
                    detail: e.to_string(),
                });
            }
        }
        if let Some(cb) = job.progress {
            cb.on_batch_complete(Stage::Distribute, idx + 1, total);
        }
    }

    info!(
        "Distribution done: {} theory fragments, {} problems, {} answers, {} quarantined",
        out.fragments.len(),
        out.problems.len(),
        out.answers.len(),
        out.quarantined
    );
    Outcome::Completed(out)
}

/// Page of a returned block: looked up by `block_id` among the blocks sent,
/// otherwise the call's default.
fn block_page(value: &Value, call: &Call) -> usize {
    scalar(value.get("block_id"))
        .and_then(|s| s.parse::<usize>().ok())
        .and_then(|id| call.pages_by_id.iter().find(|(bid, _)| *bid == id))
        .map_or(call.default_page, |&(_, page)| page)
}

fn block_calls(pages: &[(usize, &str)], job: &DistributionJob<'_>) -> Vec<Call> {
    let blocks = merge_short_blocks(preprocess_blocks(pages), job.merge_block_cap);
    let batch_size = job.batch_size.max(1);
    let n = job.context_snippet_chars;
    let mut calls = Vec::new();
    for start in (0..blocks.len()).step_by(batch_size) {
        let end = (start + batch_size).min(blocks.len());
        let batch = &blocks[start..end];
        let mut formatted = Vec::with_capacity(batch.len() + 2);
        if n > 0 && start > 0 {
            formatted.push(format_context("before", &tail_chars(&blocks[start - 1].text, n)));
        }
        formatted.extend(
            batch
                .iter()
                .map(|b| format_block(b.block_id, b.page, b.hint.as_str(), &b.text)),
        );
        if n > 0 && end < blocks.len() {
            formatted.push(format_context("after", &head_chars(&blocks[end].text, n)));
        }
        calls.push(Call {
            prompt: distribution_user_prompt(job.subject, &formatted),
            mode: "distribute_blocks",
            pages_by_id: batch.iter().map(|b| (b.block_id, b.page)).collect(),
            default_page: batch[0].page,
            default_section: None,
        });
    }
    calls
}

fn head_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancelFlag, NeverCancel};
    use crate::error::LlmError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Value>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().map(|v| v.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionService for Scripted {
        async fn complete(&self, _: &str, prompt: &str, _: f32) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies.lock().unwrap().pop().ok_or(LlmError::Api {
                message: "no more replies".into(),
                retries: 0,
            })
        }
    }

    fn job<'a>(svc: &'a Scripted, dir: &'a Path, cancel: &'a dyn CancelCheck) -> DistributionJob<'a> {
        DistributionJob {
            service: svc,
            audit_dir: dir,
            subject: "geometry",
            batch_size: 2,
            temperature: 0.1,
            paragraph_size_cap: 24_000,
            merge_block_cap: 600,
            context_snippet_chars: 40,
            cancel,
            progress: None,
        }
    }

    #[test]
    fn preprocess_cuts_at_boundaries() {
        let pages = [(
            3,
            "§2. Углы\nУгол — фигура.\nУпражнения\n1. Найдите угол.\nРешение. 40°.",
        )];
        let hints: Vec<_> = preprocess_blocks(&pages)
            .iter()
            .map(|b| (b.block_id, b.page, b.hint))
            .collect();
        assert_eq!(
            hints,
            vec![
                (1, 3, BlockHint::SectionHeader),
                (2, 3, BlockHint::Other),
                (3, 3, BlockHint::ProblemStart),
                (4, 3, BlockHint::Solution),
            ]
        );
    }

    #[test]
    fn short_theory_blocks_merge_until_cap() {
        let block = |hint, text: &str| PreprocessBlock {
            block_id: 0,
            page: 1,
            hint,
            text: text.into(),
        };
        let merged = merge_short_blocks(
            vec![
                block(BlockHint::SectionHeader, "§1. Точки"),
                block(BlockHint::Theory, "Точка — основная фигура."),
                block(BlockHint::ProblemStart, "1. Отметьте точку."),
                block(BlockHint::Theory, &"а".repeat(50)),
                block(BlockHint::Theory, &"б".repeat(50)),
            ],
            80,
        );
        assert_eq!(merged.len(), 4);
        assert_eq!(merged[0].text, "§1. Точки\n\nТочка — основная фигура.");
        assert_eq!(merged[3].block_id, 4);
    }

    #[test]
    fn paragraphs_split_at_headers_across_pages() {
        let pages = [
            (1, "Предисловие"),
            (2, "§1. Точки\nТеория точек."),
            (3, "Продолжение.\n§2. Прямые\nТеория прямых."),
        ];
        let paras = split_paragraphs(&pages);
        assert_eq!(paras.len(), 2);
        assert_eq!(paras[0].section.as_deref(), Some("§1"));
        assert_eq!(paras[0].page, 2);
        assert_eq!(paras[0].text, "§1. Точки\nТеория точек.\nПродолжение.");
        assert_eq!(paras[1].page, 3);
    }

    #[test]
    fn fallback_headings_need_increasing_numbers() {
        let pages = [(
            1,
            "1. Начальные понятия\nТекст.\n\n2. Отрезки и лучи\nТекст.\n\n1. Найдите длину отрезка",
        )];
        let paras = split_paragraphs(&pages);
        assert_eq!(paras.len(), 2);
        assert!(paras[1].text.ends_with("1. Найдите длину отрезка"));
    }

    #[test]
    fn validation_quarantines_bad_blocks() {
        assert!(validate_block(json!({"type": "chapter"}), 1, None).is_err());
        assert!(validate_block(json!({"type": "theory", "theory_text": "x"}), 1, None).is_err());
        assert!(validate_block(json!({"type": "problem"}), 1, None).is_err());
        assert!(validate_block(json!("not an object"), 1, None).is_err());
        assert_eq!(
            validate_block(json!({"type": "other"}), 1, None),
            Ok(DistributedBlock::Other)
        );
    }

    #[test]
    fn validation_accepts_numeric_number_and_parts() {
        let block = validate_block(
            json!({
                "block_id": 2,
                "type": "problem",
                "section": "12",
                "number": 315,
                "problem_text": "Найдите углы.",
                "parts": [
                    {"part_number": "1", "part_text": "один на 80° больше"},
                    {"part_number": 2, "part_text": "разность равна 20°"},
                    {"part_number": null, "part_text": null}
                ]
            }),
            7,
            None,
        )
        .unwrap();
        let DistributedBlock::Problem(p) = block else {
            panic!("expected problem");
        };
        assert_eq!(p.number.as_deref(), Some("315"));
        assert_eq!(p.section.as_deref(), Some("§12"));
        assert_eq!(p.parts.len(), 2);
        assert_eq!(p.parts[1].part_number, "2");
        assert_eq!(p.page_ref.as_deref(), Some("стр. 7"));
    }

    #[test]
    fn blocks_response_shape() {
        assert_eq!(parse_blocks_response("{}").unwrap().len(), 0);
        assert!(parse_blocks_response("[]").is_err());
        assert!(parse_blocks_response(r#"{"blocks": 3}"#).is_err());
    }

    #[tokio::test]
    async fn paragraph_mode_distributes_and_attaches_solutions() {
        let dir = tempfile::tempdir().unwrap();
        let svc = Scripted::new(vec![
            json!({"blocks": [
                {"block_id": 1, "type": "section_theory", "theory_text": "Точка — основная фигура."},
                {"block_id": 2, "type": "problem", "number": "1", "problem_text": "Отметьте точку A."},
                {"block_id": 3, "type": "solution_only", "solution_text": "Ставим точку.", "answer_text": "A"},
                {"block_id": 4, "type": "mystery"}
            ]}),
            json!({"blocks": [
                {"block_id": 1, "type": "answers_block", "answers": [{"number": 1, "answer_text": "40°"}]}
            ]}),
        ]);
        let pages = [(4, "§1. Точки\nТочка."), (5, "§2. Ответы\n1. 40°")];
        let out = distribute(&pages, &job(&svc, dir.path(), &NeverCancel))
            .await
            .into_inner();
        assert_eq!(out.mode, DistributionMode::Paragraphs);
        assert_eq!(out.calls, 2);
        assert_eq!(out.fragments.len(), 1);
        assert_eq!(out.fragments[0].section, "§1");
        assert_eq!(out.fragments[0].start_page, 4);
        assert_eq!(out.problems.len(), 1);
        assert_eq!(out.problems[0].section.as_deref(), Some("§1"));
        assert_eq!(out.problems[0].solution_text.as_deref(), Some("Ставим точку."));
        assert_eq!(out.problems[0].answer_text.as_deref(), Some("A"));
        assert_eq!(out.answers.len(), 1);
        assert_eq!(out.quarantined, 1);
    }

    #[tokio::test]
    async fn block_mode_maps_pages_by_block_id_and_records_failures() {
        let dir = tempfile::tempdir().unwrap();
        let svc = Scripted::new(vec![json!({"blocks": [
            {"block_id": 2, "type": "problem", "number": "5", "problem_text": "Найдите периметр."}
        ]})]);
        let pages = [
            (10, "Вводный текст без заголовков."),
            (11, "№ 5 Найдите периметр."),
            (12, "№ 6 Найдите площадь."),
        ];
        let out = distribute(&pages, &job(&svc, dir.path(), &NeverCancel))
            .await
            .into_inner();
        assert_eq!(out.mode, DistributionMode::Blocks);
        assert_eq!(out.calls, 2);
        assert_eq!(out.problems[0].page_index, Some(10));
        assert_eq!(out.failed_batches.len(), 1);
        let prompts = svc.prompts.lock().unwrap();
        assert!(prompts[0].contains("--- CONTEXT (after) ---"));
        assert!(prompts[1].contains("--- CONTEXT (before) ---"));
    }

    #[tokio::test]
    async fn unparseable_reply_is_audited_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let svc = Scripted {
            replies: Mutex::new(vec!["I cannot help with that".to_string()]),
            prompts: Mutex::new(Vec::new()),
        };
        let pages = [(1, "§1. Точки\nТочка.")];
        let out = distribute(&pages, &job(&svc, dir.path(), &NeverCancel))
            .await
            .into_inner();
        assert_eq!(out.failed_batches.len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_call() {
        let dir = tempfile::tempdir().unwrap();
        let svc = Scripted::new(vec![]);
        let flag = CancelFlag::new();
        flag.cancel();
        let pages = [(1, "§1. Точки\nТочка."), (2, "§2. Прямые\nПрямая.")];
        let outcome = distribute(&pages, &job(&svc, dir.path(), &flag)).await;
        assert!(outcome.is_cancelled());
        assert!(svc.prompts.lock().unwrap().is_empty());
    }
}
