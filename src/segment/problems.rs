//! Deterministic problem segmentation.
//!
//! A line-scanning state machine (idle → in problem → in solution) driven by
//! [`classify_line`]. Buffers are flushed on every transition; problem
//! buffers shorter than the configured minimum are dropped as OCR noise, and
//! a solution buffer attaches to the problem flushed just before it.
//!
//! After a page is segmented, every problem is re-scanned for several
//! `N. ` markers collapsed onto one block (`206. Найдите x. 207. Докажите y.`)
//! and split when the numbers run consecutively.

use super::classify::classify_problem;
use super::parts::parse_parts;
use super::patterns::{classify_line, LineKind};
use crate::document_map::DocumentMap;
use crate::model::{page_ref, ProblemRecord};
use once_cell::sync::Lazy;
use regex::Regex;

/// Confidence assigned to deterministically segmented problems.
const SEGMENT_CONFIDENCE: f32 = 0.6;

static RE_CLEAN_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:№\s*)?\d+(?:\.\d+)?[.)]\s*").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_NUMBER_DOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\.\s+").unwrap());

/// Searchable text: leading number stripped, whitespace collapsed.
pub fn clean_problem_text(text: &str) -> String {
    let stripped = RE_CLEAN_MARKER.replace(text, "");
    RE_WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

fn make_record(
    number: Option<String>,
    text: String,
    section: Option<String>,
    page_index: usize,
) -> ProblemRecord {
    let mut record = ProblemRecord {
        number,
        section,
        clean_text: clean_problem_text(&text),
        problem_type: classify_problem(&text),
        parts: parse_parts(&text),
        page_index: Some(page_index),
        page_ref: Some(page_ref(page_index + 1, page_index + 1)),
        confidence: SEGMENT_CONFIDENCE,
        text,
        ..Default::default()
    };
    record.dedup_parts();
    record
}

// ── State machine ────────────────────────────────────────────────────────────

struct OpenProblem {
    number: String,
    rule: &'static str,
    buf: String,
}

struct Segmenter {
    min_len: usize,
    page_index: usize,
    section: Option<String>,
    problems: Vec<ProblemRecord>,
    current: Option<OpenProblem>,
    solution: Option<Vec<String>>,
}

impl Segmenter {
    fn flush_problem(&mut self) {
        let Some(open) = self.current.take() else {
            return;
        };
        let text = open.buf.trim();
        if text.chars().count() <= self.min_len {
            tracing::trace!("Page {}: dropped short fragment {:?}", self.page_index + 1, text);
            return;
        }
        self.problems.push(make_record(
            Some(open.number),
            text.to_string(),
            self.section.clone(),
            self.page_index,
        ));
    }

    fn attach_solution(&mut self) {
        let Some(lines) = self.solution.take() else {
            return;
        };
        let text = lines
            .iter()
            .filter(|l| !l.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.problems.last_mut() {
            last.solution_text = Some(text);
        }
    }

    /// A bare `N)` line is a sub-item of the open problem when it is `1)` or
    /// the open problem already holds `(N-1))`.
    fn continues_open_problem(&self, number: &str, rule: &str) -> bool {
        if rule != "number_paren" || self.solution.is_some() {
            return false;
        }
        let Some(open) = self.current.as_ref().filter(|o| o.rule != "number_paren") else {
            return false;
        };
        match number.parse::<u32>() {
            Ok(1) => true,
            Ok(n) => n
                .checked_sub(1)
                .is_some_and(|prev| open.buf.contains(&format!("{prev})"))),
            Err(_) => false,
        }
    }

    fn feed(&mut self, line: &str) {
        let stripped = line.trim();
        if stripped.is_empty() {
            if let Some(sol) = self.solution.as_mut() {
                sol.push(String::new());
            } else if let Some(open) = self.current.as_mut() {
                open.buf.push('\n');
            }
            return;
        }

        match classify_line(stripped) {
            LineKind::SolutionStart => {
                if let Some(sol) = self.solution.as_mut() {
                    sol.push(stripped.to_string());
                } else {
                    self.flush_problem();
                    self.solution = Some(vec![stripped.to_string()]);
                }
            }
            LineKind::SectionHeader(label) => {
                self.attach_solution();
                self.flush_problem();
                self.section = Some(label);
            }
            LineKind::TasksLabel => {
                self.attach_solution();
                self.flush_problem();
            }
            LineKind::ProblemStart { number, rule } => {
                if self.continues_open_problem(&number, rule) {
                    self.append(stripped);
                    return;
                }
                self.attach_solution();
                self.flush_problem();
                self.current = Some(OpenProblem {
                    number,
                    rule,
                    buf: stripped.to_string(),
                });
            }
            LineKind::Text => {
                if let Some(sol) = self.solution.as_mut() {
                    sol.push(stripped.to_string());
                } else {
                    self.append(stripped);
                }
            }
        }
    }

    fn append(&mut self, line: &str) {
        if let Some(open) = self.current.as_mut() {
            if !open.buf.ends_with('\n') {
                open.buf.push('\n');
            }
            open.buf.push_str(line);
        }
    }

    fn finish(mut self) -> (Vec<ProblemRecord>, Option<String>) {
        self.attach_solution();
        self.flush_problem();
        (self.problems, self.section)
    }
}

/// Segment one page. `section` carries the current section label across
/// pages and is updated by headers found on this page.
pub fn segment_page(
    text: &str,
    page_index: usize,
    section: &mut Option<String>,
    min_len: usize,
) -> Vec<ProblemRecord> {
    if text.trim().chars().count() < 10 {
        return Vec::new();
    }
    let mut seg = Segmenter {
        min_len,
        page_index,
        section: section.take(),
        problems: Vec::new(),
        current: None,
        solution: None,
    };
    for line in text.lines() {
        seg.feed(line);
    }
    let (problems, last_section) = seg.finish();
    *section = last_section;
    problems.into_iter().flat_map(split_multi_problem).collect()
}

// ── Multi-problem splitter ───────────────────────────────────────────────────

/// `N. ` markers that plausibly start a problem: at the very start, or after
/// whitespace that follows a sentence end, numbered consecutively from the
/// first marker.
fn problem_markers(text: &str) -> Vec<(usize, String)> {
    let mut markers: Vec<(usize, u64, String)> = Vec::new();
    for caps in RE_NUMBER_DOT.captures_iter(text) {
        let (Some(m), Ok(n)) = (caps.get(0), caps[1].parse::<u64>()) else {
            continue;
        };
        let start = m.start();
        if markers.is_empty() {
            if start != 0 {
                return Vec::new();
            }
            markers.push((start, n, caps[1].to_string()));
            continue;
        }
        let before = &text[..start];
        let after_sentence = before.ends_with(char::is_whitespace)
            && before
                .trim_end()
                .ends_with(|c: char| matches!(c, '.' | '!' | '?' | ')' | ';'));
        let consecutive = markers.last().is_some_and(|(_, prev, _)| n == prev + 1);
        if after_sentence && consecutive {
            markers.push((start, n, caps[1].to_string()));
        }
    }
    markers.into_iter().map(|(pos, _, num)| (pos, num)).collect()
}

/// Split one flushed problem into one problem per `N. ` marker. The
/// solution stays with the last piece.
pub fn split_multi_problem(problem: ProblemRecord) -> Vec<ProblemRecord> {
    let text = problem.text.trim().to_string();
    let markers = problem_markers(&text);
    if markers.len() < 2 {
        return vec![problem];
    }
    let page_index = problem.page_index.unwrap_or_default();
    let mut pieces: Vec<ProblemRecord> = markers
        .iter()
        .enumerate()
        .filter_map(|(i, (start, number))| {
            let end = markers.get(i + 1).map_or(text.len(), |(s, _)| *s);
            let segment = text[*start..end].trim();
            (!clean_problem_text(segment).is_empty()).then(|| {
                let mut rec = make_record(
                    Some(number.clone()),
                    segment.to_string(),
                    problem.section.clone(),
                    page_index,
                );
                rec.page_ref = problem.page_ref.clone();
                rec
            })
        })
        .collect();
    if let Some(last) = pieces.last_mut() {
        last.solution_text = problem.solution_text;
    }
    pieces
}

// ── Whole-source extraction ──────────────────────────────────────────────────

/// Segment every page of the tasks range (or every page when the map found
/// no tasks block). `pages` are `(page_num, text)` with 1-based numbers.
pub fn extract_problems(
    pages: &[(usize, &str)],
    map: Option<&DocumentMap>,
    min_len: usize,
) -> Vec<ProblemRecord> {
    let range = map.and_then(DocumentMap::tasks_page_range);
    let mut section: Option<String> = None;
    let mut out = Vec::new();
    for &(page, text) in pages {
        if let Some((start, end)) = range {
            if page < start || page > end {
                continue;
            }
        }
        if section.is_none() {
            section = map.and_then(|m| m.section_at(page)).map(str::to_string);
        }
        out.extend(segment_page(text, page.saturating_sub(1), &mut section, min_len));
    }
    tracing::debug!("Segmented {} problems from {} pages", out.len(), pages.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_map;

    fn numbers(problems: &[ProblemRecord]) -> Vec<&str> {
        problems.iter().filter_map(|p| p.number.as_deref()).collect()
    }

    fn seg(text: &str) -> Vec<ProblemRecord> {
        segment_page(text, 0, &mut None, 20)
    }

    #[test]
    fn two_numbered_sentences_on_one_line() {
        let problems = seg("1. Найдите x. 2. Докажите y.");
        assert_eq!(numbers(&problems), ["1", "2"]);
        assert_eq!(problems[0].text, "1. Найдите x.");
        assert_eq!(problems[1].text, "2. Докажите y.");
    }

    #[test]
    fn inline_numbers_that_are_not_markers_do_not_split() {
        let problems = seg("5. Угол равен 2. Найдите смежный угол.");
        assert_eq!(numbers(&problems), ["5"]);
    }

    #[test]
    fn section_header_never_starts_a_problem() {
        let text = "§7. Смежные углы и их свойства\nДва угла называются смежными.\n\
                    Параграф 8. Вертикальные углы и их свойства";
        let problems = seg(text);
        assert!(problems.is_empty());
        let text = "§7.\n1. Найдите угол, смежный с углом 30°.";
        let problems = seg(text);
        assert_eq!(problems.len(), 1);
        assert!(!problems[0].text.starts_with('§'));
        assert_eq!(problems[0].section.as_deref(), Some("§7"));
    }

    #[test]
    fn solution_attaches_to_previous_problem() {
        let text = "1. Найдите угол, смежный с углом 30°.\n\
                    Решение. Сумма смежных углов 180°.\n\
                    Ответ. 150°.\n\
                    2. Найдите угол, смежный с углом 45°.";
        let problems = seg(text);
        assert_eq!(numbers(&problems), ["1", "2"]);
        assert_eq!(
            problems[0].solution_text.as_deref(),
            Some("Решение. Сумма смежных углов 180°.\nОтвет. 150°.")
        );
        assert_eq!(problems[1].solution_text, None);
    }

    #[test]
    fn short_fragments_are_dropped() {
        assert!(seg("12. Да.\n13. Нет.").is_empty());
    }

    #[test]
    fn multi_line_problem_keeps_continuations() {
        let problems = seg("3. Найдите смежные углы,\nесли один из них равен 40°.");
        assert_eq!(problems.len(), 1);
        assert!(problems[0].text.contains("\nесли один"));
        assert_eq!(problems[0].clean_text, "Найдите смежные углы, если один из них равен 40°.");
    }

    #[test]
    fn bare_paren_items_stay_inside_problem() {
        let text = "4. Найдите смежные углы, если:\n\
                    1) один из них на 80° больше другого;\n\
                    2) их разность равна 40°.";
        let problems = seg(text);
        assert_eq!(numbers(&problems), ["4"]);
        assert_eq!(problems[0].parts.len(), 2);
        assert!(problems[0].has_parts());
    }

    #[test]
    fn bare_paren_problems_without_open_problem_are_separate() {
        let text = "1) Постройте угол, равный 60 градусам.\n\
                    2) Постройте угол, равный 120 градусам.";
        let problems = seg(text);
        assert_eq!(numbers(&problems), ["1", "2"]);
    }

    #[test]
    fn section_carries_across_pages() {
        let pages = [
            (1, "§3. Треугольники\nТреугольник состоит из трех отрезков."),
            (2, "1. Найдите периметр треугольника со сторонами 3, 4 и 5 см."),
        ];
        let problems = extract_problems(&pages, None, 20);
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].section.as_deref(), Some("§3"));
        assert_eq!(problems[0].page_index, Some(1));
        assert_eq!(problems[0].page_ref.as_deref(), Some("стр. 2"));
    }

    #[test]
    fn scenario_two_problems_on_page_two() {
        let pages = [(1, "§1. Теория..."), (2, "1. Найдите x. 2. Докажите y.")];
        let map = document_map::build(&pages);
        let problems = extract_problems(&pages, Some(&map), 20);
        assert_eq!(numbers(&problems), ["1", "2"]);
        assert!(problems.iter().all(|p| p.page_index == Some(1)));
    }

    #[test]
    fn tasks_range_limits_pages() {
        let pages = [
            (1, "1. Это пример в теории, а не задача для ученика."),
            (2, "Упражнения\n1. Найдите угол между биссектрисами."),
        ];
        let map = document_map::build(&pages);
        let problems = extract_problems(&pages, Some(&map), 20);
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].page_index, Some(1));
    }
}
