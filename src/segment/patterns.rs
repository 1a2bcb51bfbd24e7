//! Ordered line-marker tables shared by the document map, the segmenter and
//! the distribution preprocessor.
//!
//! Every structural decision in deterministic segmentation is a lookup in
//! [`MARKER_RULES`]: the first rule whose regex matches the start of a line
//! wins. Rules are ordered from most to least specific, so labelled forms
//! (`Задача 5`, `Упражнение (3)`) are tried before a bare `5.` and section
//! headers (`§7.`, `Параграф 7`) are tried before the bare-number rules they
//! would otherwise be mistaken for.

use once_cell::sync::Lazy;
use regex::Regex;

/// What a matching rule means for the line it matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// Opens a new section. Never starts a problem.
    Section,
    /// Starts a numbered problem.
    Problem,
}

/// One row of the ordered marker table.
#[derive(Debug)]
pub struct MarkerRule {
    pub name: &'static str,
    pub regex: Regex,
    pub kind: MarkerKind,
}

/// A marker found at the start of a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub rule: &'static str,
    pub kind: MarkerKind,
    /// The captured number, e.g. "5" or "2.1".
    pub number: String,
}

/// Classification of one non-blank line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// `§N` / `Параграф N`; carries the "§N" label.
    SectionHeader(String),
    /// `Упражнения`, `Контрольные задания`, ...
    TasksLabel,
    /// `Решение.` / `Ответ.`, possibly letter-spaced.
    SolutionStart,
    ProblemStart { number: String, rule: &'static str },
    Text,
}

fn rule(name: &'static str, pattern: &str, kind: MarkerKind) -> MarkerRule {
    MarkerRule {
        name,
        regex: Regex::new(&format!(r"(?i)^\s*{pattern}")).unwrap(),
        kind,
    }
}

/// Problem and section markers, most specific first. Group 1 is the number.
pub static MARKER_RULES: Lazy<Vec<MarkerRule>> = Lazy::new(|| {
    use MarkerKind::{Problem, Section};
    vec![
        rule(
            "control_task",
            r"Контрольное\s+задание\s*(?:№\s*)?\(?\s*(\d+)\)?",
            Problem,
        ),
        rule(
            "control_tasks",
            r"Контрольные\s+задания\s*(?:№\s*)?\(?\s*(\d+)\)?",
            Problem,
        ),
        rule(
            "practical_task",
            r"Практическое\s+задание\s*(?:№\s*)?\(?\s*(\d+)\)?",
            Problem,
        ),
        rule("problem_paren", r"Задача\s*\(\s*(\d+)\s*\)", Problem),
        rule("problem", r"Задача\s+(\d+)", Problem),
        rule("exercise", r"Упражнение\s+(\d+)", Problem),
        rule("exercise_paren", r"Упражнение\s*\(\s*(\d+)\s*\)", Problem),
        rule("question", r"Вопрос\s*(?:№\s*)?\(?\s*(\d+)\)?", Problem),
        rule("questions", r"Вопросы\s+(?:к\s*)?(?:№\s*)?(\d+)", Problem),
        rule("assignment_paren", r"Задание\s*\(\s*(\d+)\s*\)", Problem),
        rule("assignment", r"Задание\s*(?:№\s*)?(\d+)", Problem),
        rule("exercise_en", r"Exercise\s+(\d+)", Problem),
        rule("section", r"[§$]\s*(\d+(?:\.\d+)?)(?:[.,\s]|$)", Section),
        rule("section_word", r"Параграф\s*(\d+)(?:[.,\s]|$)", Section),
        rule("numero", r"№\s*(\d+(?:\.\d+)?)", Problem),
        rule("number_dot", r"(\d+)\.\s+", Problem),
        rule("number_paren", r"(\d+)\)\s+", Problem),
    ]
});

/// Paragraph header: `§ N`, `$ N` (OCR confusion) or `Параграф N`.
pub static RE_SECTION_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:[§$]\s*(\d+(?:\.\d+)?)(?:[.,\s]|$)|Параграф\s*(\d+)(?:[.,\s]|$))")
        .unwrap()
});

/// Short capitalised numbered heading, used when OCR dropped the `§`.
pub static RE_FALLBACK_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*[.)]\s+[А-ЯЁA-Z].{3,120}$").unwrap());

pub static RE_TASKS_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:Задачи|Упражнения|Вопросы\s+к\s+параграфу|Контрольные\s+задания|Практические\s+задания)\s*[.:]?",
    )
    .unwrap()
});

pub static RE_SOLUTION_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:Р\s*е\s*ш\s*е\s*н\s*и\s*е|О\s*т\s*в\s*е\s*т)\s*[.:]").unwrap()
});

/// The first marker rule matching the start of `line`.
pub fn match_marker(line: &str) -> Option<Marker> {
    MARKER_RULES.iter().find_map(|r| {
        let caps = r.regex.captures(line)?;
        Some(Marker {
            rule: r.name,
            kind: r.kind,
            number: caps.get(1)?.as_str().to_string(),
        })
    })
}

/// The "§N" label of a paragraph-header line.
pub fn section_of(line: &str) -> Option<String> {
    let caps = RE_SECTION_HEADER.captures(line)?;
    let num = caps.get(1).or_else(|| caps.get(2))?.as_str();
    Some(format!("§{num}"))
}

/// Classify one line. Solution starts win over markers; a tasks label only
/// applies when no numbered marker matched.
pub fn classify_line(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Text;
    }
    if RE_SOLUTION_START.is_match(trimmed) {
        return LineKind::SolutionStart;
    }
    match match_marker(trimmed) {
        Some(Marker {
            kind: MarkerKind::Section,
            number,
            ..
        }) => LineKind::SectionHeader(format!("§{number}")),
        Some(Marker {
            kind: MarkerKind::Problem,
            number,
            rule,
        }) => LineKind::ProblemStart { number, rule },
        None if RE_TASKS_LABEL.is_match(trimmed) => LineKind::TasksLabel,
        None => LineKind::Text,
    }
}
