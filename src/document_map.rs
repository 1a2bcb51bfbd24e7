//! Structural map of one source: which page ranges hold theory, tasks,
//! answers, the table of contents or the index.
//!
//! The map is recomputed on every run and only persisted as a debugging
//! artefact. Page numbers in spans are 1-based.

use crate::segment::patterns::{section_of, RE_FALLBACK_HEADING, RE_SECTION_HEADER, RE_TASKS_LABEL};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    FrontMatter,
    Paragraph,
    TasksBlock,
    Answers,
    Toc,
    Index,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    #[serde(rename = "type")]
    pub kind: SpanKind,
    pub start_page: usize,
    /// Inclusive.
    pub end_page: usize,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl Span {
    fn new(kind: SpanKind, start_page: usize, end_page: usize, confidence: f32) -> Self {
        Self {
            kind,
            start_page,
            end_page,
            confidence,
            section: None,
        }
    }

    pub fn contains(&self, page: usize) -> bool {
        (self.start_page..=self.end_page).contains(&page)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMap {
    pub total_pages: usize,
    pub spans: Vec<Span>,
}

// ── Detection patterns ───────────────────────────────────────────────────────

static RE_TOC_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:Содержание|Оглавление)\s*$").unwrap());
static RE_INDEX_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:Предметный\s+указатель|Указатель)\s*$").unwrap());
static RE_TOC_ENTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[§$]?\s*\d+[.)]\s+").unwrap());

/// Only the first pages are checked for a table of contents.
const TOC_SEARCH_PAGES: usize = 20;
/// The index is only looked for in the last pages.
const INDEX_SEARCH_PAGES: usize = 20;
/// Books shorter than this get no answers span.
const MIN_PAGES_FOR_ANSWERS: usize = 10;

/// Build the map from `(page_num, text)` pairs, `page_num` 1-based.
pub fn build(pages: &[(usize, &str)]) -> DocumentMap {
    let mut pages: Vec<(usize, &str)> = pages.to_vec();
    pages.sort_by_key(|(n, _)| *n);
    let Some(&(total_pages, _)) = pages.last() else {
        return DocumentMap::default();
    };

    let mut spans = paragraph_spans(&pages);
    spans.extend(tasks_spans(&pages));
    spans.extend(answers_span(&pages, total_pages));
    spans.extend(toc_span(&pages));
    spans.extend(index_span(&pages, total_pages));

    let first_content = spans
        .iter()
        .filter(|s| matches!(s.kind, SpanKind::Paragraph | SpanKind::Toc))
        .map(|s| s.start_page)
        .min()
        .unwrap_or(total_pages + 1);
    if first_content > 1 {
        spans.insert(0, Span::new(SpanKind::FrontMatter, 1, first_content - 1, 0.8));
    }

    tracing::debug!(
        "Document map: {} pages, {} spans ({} paragraphs)",
        total_pages,
        spans.len(),
        spans.iter().filter(|s| s.kind == SpanKind::Paragraph).count()
    );
    DocumentMap { total_pages, spans }
}

// ── Paragraph spans ──────────────────────────────────────────────────────────

/// One forward pass. A header closes the open paragraph and opens the next;
/// any other line extends the open paragraph to its page. Without headers,
/// a short capitalised numbered heading after a blank line opens one.
fn paragraph_spans(pages: &[(usize, &str)]) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut open: Option<Span> = None;
    let mut prev_blank = true;

    for &(page, text) in pages {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                prev_blank = true;
                continue;
            }
            if RE_SECTION_HEADER.is_match(line) {
                if let Some(done) = open.take() {
                    spans.push(done);
                }
                let mut span = Span::new(SpanKind::Paragraph, page, page, 0.9);
                span.section = section_of(line);
                open = Some(span);
                prev_blank = false;
                continue;
            }
            if open.is_none() && prev_blank {
                if let Some(caps) = RE_FALLBACK_HEADING.captures(line) {
                    let mut span = Span::new(SpanKind::Paragraph, page, page, 0.9);
                    span.section = Some(format!("§{}", &caps[1]));
                    open = Some(span);
                }
            }
            if let Some(span) = open.as_mut() {
                span.end_page = page;
            }
            prev_blank = false;
        }
        prev_blank = true;
    }

    if let Some(mut last) = open {
        // the last paragraph's end is a guess: it runs to the last text line
        last.confidence = 0.8;
        spans.push(last);
    }
    spans
}

// ── Tasks / answers / toc / index ────────────────────────────────────────────

fn tasks_spans(pages: &[(usize, &str)]) -> Vec<Span> {
    pages
        .iter()
        .filter(|(_, text)| text.lines().any(|l| RE_TASKS_LABEL.is_match(l.trim())))
        .map(|&(page, _)| Span::new(SpanKind::TasksBlock, page, page, 0.85))
        .collect()
}

/// Score a page as the start of the answer key: an answers label near the
/// top, weighted by how late in the book the page is.
fn answers_score(page: usize, total_pages: usize, text: &str) -> f32 {
    if text.is_empty() || total_pages < MIN_PAGES_FOR_ANSWERS {
        return 0.0;
    }
    let head = text
        .lines()
        .take(8)
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase();
    if !head.contains("ответ") {
        return 0.0;
    }
    let ratio = page as f32 / total_pages.max(1) as f32;
    if ratio < 0.5 {
        0.3
    } else if ratio >= 0.85 {
        0.95
    } else {
        0.5 + 0.45 * (ratio - 0.5) / 0.35
    }
}

fn answers_span(pages: &[(usize, &str)], total_pages: usize) -> Option<Span> {
    let mut best: Option<(usize, f32)> = None;
    for &(page, text) in pages {
        let score = answers_score(page, total_pages, text);
        if score > best.map_or(0.0, |(_, s)| s) {
            best = Some((page, score));
        }
    }
    let (page, score) = best.filter(|(_, s)| *s >= 0.5)?;
    let confidence = (score * 100.0).round() / 100.0;
    Some(Span::new(SpanKind::Answers, page, total_pages, confidence))
}

fn toc_score(text: &str) -> f32 {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.len() < 5 {
        return 0.0;
    }
    let short = lines.iter().filter(|l| l.chars().count() < 80).count();
    let numbered = lines.iter().filter(|l| RE_TOC_ENTRY.is_match(l)).count();
    if short * 10 >= lines.len() * 6 && numbered >= 3 {
        0.85
    } else {
        0.0
    }
}

fn toc_span(pages: &[(usize, &str)]) -> Option<Span> {
    let by_shape = pages
        .iter()
        .take_while(|(page, _)| *page <= TOC_SEARCH_PAGES)
        .find(|(_, text)| toc_score(text) >= 0.8)
        .map(|&(page, _)| Span::new(SpanKind::Toc, page, page, 0.8));
    by_shape.or_else(|| {
        pages
            .iter()
            .find(|(_, text)| text.lines().take(5).any(|l| RE_TOC_LABEL.is_match(l.trim())))
            .map(|&(page, _)| Span::new(SpanKind::Toc, page, page, 0.9))
    })
}

fn index_span(pages: &[(usize, &str)], total_pages: usize) -> Option<Span> {
    let from = total_pages.saturating_sub(INDEX_SEARCH_PAGES);
    pages
        .iter()
        .filter(|(page, _)| *page >= from)
        .find(|(_, text)| text.lines().take(5).any(|l| RE_INDEX_LABEL.is_match(l.trim())))
        .map(|&(page, _)| Span::new(SpanKind::Index, page, total_pages, 0.8))
}

// ── Accessors ────────────────────────────────────────────────────────────────

impl DocumentMap {
    /// Pages holding exercises: from the first tasks block to the page before
    /// the answer key, or to the last page. `None` when no tasks block was
    /// found; callers then scan every page.
    pub fn tasks_page_range(&self) -> Option<(usize, usize)> {
        let start = self
            .spans
            .iter()
            .find(|s| s.kind == SpanKind::TasksBlock)?
            .start_page;
        let max_page = self
            .spans
            .iter()
            .map(|s| s.end_page.max(s.start_page))
            .max()
            .unwrap_or(start);
        let end = match self.answers_range() {
            Some((answers_start, _)) if answers_start > start => answers_start - 1,
            _ => max_page,
        };
        (end >= start).then_some((start, end))
    }

    pub fn paragraph_spans(&self) -> impl Iterator<Item = &Span> {
        self.spans.iter().filter(|s| s.kind == SpanKind::Paragraph)
    }

    pub fn answers_range(&self) -> Option<(usize, usize)> {
        self.spans
            .iter()
            .find(|s| s.kind == SpanKind::Answers)
            .map(|s| (s.start_page, s.end_page))
    }

    /// Section of the paragraph span covering `page`, if any.
    pub fn section_at(&self, page: usize) -> Option<&str> {
        self.paragraph_spans()
            .filter(|s| s.contains(page))
            .last()
            .and_then(|s| s.section.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(map: &DocumentMap, kind: SpanKind) -> Vec<&Span> {
        map.spans.iter().filter(|s| s.kind == kind).collect()
    }

    #[test]
    fn empty_input_gives_empty_map() {
        assert_eq!(build(&[]), DocumentMap::default());
    }

    #[test]
    fn three_paragraph_headers() {
        let pages = [
            (1, "§1. Точки и прямые\nПрямая бесконечна."),
            (2, "Через две точки проходит прямая."),
            (3, "§2. Отрезки\nОтрезок имеет длину."),
            (4, "§3. Углы\nУгол образован лучами."),
            (5, "Развернутый угол равен 180°."),
        ];
        let map = build(&pages);
        let paras = kinds(&map, SpanKind::Paragraph);
        let ranges: Vec<_> = paras
            .iter()
            .map(|s| (s.section.as_deref().unwrap_or(""), s.start_page, s.end_page))
            .collect();
        assert_eq!(ranges, [("§1", 1, 2), ("§2", 3, 3), ("§3", 4, 5)]);
        assert!(kinds(&map, SpanKind::TasksBlock).is_empty());
        assert!(kinds(&map, SpanKind::Answers).is_empty());
        assert!(kinds(&map, SpanKind::FrontMatter).is_empty());
    }

    #[test]
    fn fallback_heading_after_blank_line() {
        let pages = [(1, "Введение\n\n1. Начальные понятия геометрии\nТекст.")];
        let map = build(&pages);
        let paras = kinds(&map, SpanKind::Paragraph);
        assert_eq!(paras.len(), 1);
        assert_eq!(paras[0].section.as_deref(), Some("§1"));
    }

    #[test]
    fn scenario_theory_then_problems() {
        let pages = [(1, "§1. Теория..."), (2, "1. Найдите x. 2. Докажите y.")];
        let map = build(&pages);
        let paras = kinds(&map, SpanKind::Paragraph);
        assert_eq!(paras.len(), 1);
        assert_eq!((paras[0].start_page, paras[0].end_page), (1, 2));
    }

    #[test]
    fn tasks_answers_and_front_matter() {
        let mut pages: Vec<(usize, String)> = vec![(1, "Учебник геометрии".into())];
        pages.push((2, "§1. Углы\nТеория об углах.".into()));
        pages.push((3, "Упражнения\n1. Найдите угол.".into()));
        for p in 4..=18 {
            pages.push((p, format!("{p}. Задача номер {p}.")));
        }
        pages.push((19, "Ответы\n1. 40°".into()));
        pages.push((20, "2. 50°".into()));
        let refs: Vec<(usize, &str)> = pages.iter().map(|(n, t)| (*n, t.as_str())).collect();
        let map = build(&refs);

        let front = kinds(&map, SpanKind::FrontMatter);
        assert_eq!((front[0].start_page, front[0].end_page), (1, 1));
        assert_eq!(map.answers_range(), Some((19, 20)));
        assert_eq!(map.tasks_page_range(), Some((3, 18)));
    }

    #[test]
    fn answers_need_late_position() {
        let mut pages: Vec<(usize, String)> = vec![(1, "Ответы к разделу".into())];
        for p in 2..=12 {
            pages.push((p, "Текст".into()));
        }
        let refs: Vec<(usize, &str)> = pages.iter().map(|(n, t)| (*n, t.as_str())).collect();
        assert_eq!(build(&refs).answers_range(), None);
    }

    #[test]
    fn toc_by_shape_and_by_label() {
        let toc = "§1. Точки\n§2. Прямые\n§3. Углы\n§4. Отрезки\nПредисловие";
        let map = build(&[(1, toc), (2, "§1. Точки\nТекст")]);
        let t = kinds(&map, SpanKind::Toc);
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].confidence, 0.8);

        let map = build(&[(1, "Оглавление\nГлава 1"), (2, "Текст")]);
        assert_eq!(kinds(&map, SpanKind::Toc)[0].confidence, 0.9);
    }

    #[test]
    fn index_near_end() {
        let map = build(&[(1, "Текст"), (2, "Предметный указатель\nугол 5")]);
        let idx = kinds(&map, SpanKind::Index);
        assert_eq!((idx[0].start_page, idx[0].end_page), (2, 2));
    }

    #[test]
    fn tasks_range_absent_without_tasks_block() {
        let map = build(&[(1, "§1. Текст")]);
        assert_eq!(map.tasks_page_range(), None);
    }

    #[test]
    fn span_kind_serialises_snake_case() {
        let span = Span::new(SpanKind::TasksBlock, 3, 3, 0.85);
        let json = serde_json::to_string(&span).unwrap();
        assert!(json.contains(r#""type":"tasks_block""#), "{json}");
        assert!(!json.contains("section"));
    }
}
