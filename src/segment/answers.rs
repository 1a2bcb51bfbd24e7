//! Answer-key parsing.
//!
//! Answer keys at the back of a textbook are dense: `§ 8. 1. 40°. 2. 50°;
//! 130°` puts a section marker and two answers on one line, and a long
//! answer may wrap onto lines that carry no number at all. The parser keeps
//! one answer open at a time; a line without a leading number extends it,
//! and a line with numbers closes it and opens one answer per number.

use crate::document_map::DocumentMap;
use crate::model::{section_label, ParsedAnswer};
use once_cell::sync::Lazy;
use regex::Regex;

/// Longest answer text kept, in characters.
pub const MAX_ANSWER_CHARS: usize = 2000;

static RE_SECTION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[§$S]\s*(\d+(?:\.\d+)?)[.\s,]*$").unwrap());
static RE_SECTION_INLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[§$S]\s*(\d+(?:\.\d+)?)[.\s,]").unwrap());
static RE_ANSWER_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*[.)]\s*").unwrap());

fn is_heading(line: &str) -> bool {
    let upper = line.to_uppercase();
    upper.contains("ОТВЕТЫ") && upper.contains("УКАЗАНИЯ")
}

fn finish_text(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['.', ',', ';'])
        .trim()
        .chars()
        .take(MAX_ANSWER_CHARS)
        .collect()
}

/// `(number, start, end)` of answer numbers not glued to a preceding digit.
fn answer_numbers(line: &str) -> Vec<(String, usize, usize)> {
    RE_ANSWER_NUMBER
        .captures_iter(line)
        .filter_map(|c| {
            let m = c.get(0)?;
            let glued = line[..m.start()]
                .chars()
                .next_back()
                .is_some_and(|ch| ch.is_ascii_digit());
            (!glued).then(|| (c[1].to_string(), m.start(), m.end()))
        })
        .collect()
}

#[derive(Default)]
struct AnswerParser {
    section: Option<String>,
    open: Option<(String, Vec<String>)>,
    out: Vec<ParsedAnswer>,
}

impl AnswerParser {
    fn push(&mut self, number: String, text: &str) {
        let answer_text = finish_text(text);
        if answer_text.is_empty() {
            return;
        }
        self.out.push(ParsedAnswer {
            number,
            answer_text,
            section: self.section.as_deref().map(section_label),
        });
    }

    fn flush(&mut self) {
        if let Some((number, lines)) = self.open.take() {
            self.push(number, &lines.join(" "));
        }
    }

    fn feed(&mut self, line: &str) {
        let mut rest = line.trim();
        if rest.is_empty() || is_heading(rest) {
            return;
        }
        if let Some(caps) = RE_SECTION_LINE.captures(rest) {
            self.flush();
            self.section = Some(caps[1].to_string());
            return;
        }
        while let Some(caps) = RE_SECTION_INLINE.captures(rest) {
            let (Some(whole), Some(num)) = (caps.get(0), caps.get(1)) else {
                break;
            };
            // answers before the marker still belong to the previous section
            let before = rest[..whole.start()].trim();
            if !before.is_empty() {
                self.feed_numbers(before);
            }
            self.flush();
            self.section = Some(num.as_str().to_string());
            rest = rest[whole.end()..].trim();
        }
        if !rest.is_empty() {
            self.feed_numbers(rest);
        }
    }

    fn feed_numbers(&mut self, line: &str) {
        let numbers = answer_numbers(line);
        let Some(first) = numbers.first() else {
            if let Some((_, lines)) = self.open.as_mut() {
                lines.push(line.to_string());
            }
            return;
        };

        let prefix = line[..first.1].trim();
        if !prefix.is_empty() {
            if let Some((_, lines)) = self.open.as_mut() {
                lines.push(prefix.to_string());
            }
        }
        self.flush();

        for (i, (number, _, end)) in numbers.iter().enumerate() {
            let seg_end = numbers.get(i + 1).map_or(line.len(), |n| n.1);
            let segment = line[*end..seg_end].trim();
            if i + 1 == numbers.len() {
                // the last answer on a line may continue on the next one
                self.open = Some((number.clone(), vec![segment.to_string()]));
            } else {
                self.push(number.clone(), segment);
            }
        }
    }
}

/// Parse an answer key into `{number, answer_text, section}` records.
pub fn parse_answers(text: &str) -> Vec<ParsedAnswer> {
    let mut parser = AnswerParser::default();
    for line in text.lines() {
        parser.feed(line);
    }
    parser.flush();
    parser.out
}

/// Parse the answers span of a source. `pages` are `(page_num, text)` with
/// 1-based numbers.
pub fn extract_answers(pages: &[(usize, &str)], map: &DocumentMap) -> Vec<ParsedAnswer> {
    let Some((start, end)) = map.answers_range() else {
        return Vec::new();
    };
    let text = pages
        .iter()
        .filter(|(n, t)| (start..=end).contains(n) && !t.trim().is_empty())
        .map(|(_, t)| t.trim())
        .collect::<Vec<_>>()
        .join("\n\n");
    let answers = parse_answers(&text);
    tracing::debug!("Parsed {} answers from pages {}–{}", answers.len(), start, end);
    answers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triples(answers: &[ParsedAnswer]) -> Vec<(Option<&str>, &str, &str)> {
        answers
            .iter()
            .map(|a| (a.section.as_deref(), a.number.as_str(), a.answer_text.as_str()))
            .collect()
    }

    #[test]
    fn several_answers_per_line() {
        let answers = parse_answers("§ 1.\n1. 40°. 2. 50°; 130°. 3) 90°.");
        assert_eq!(
            triples(&answers),
            [
                (Some("§1"), "1", "40°"),
                (Some("§1"), "2", "50°; 130°"),
                (Some("§1"), "3", "90°")
            ]
        );
    }

    #[test]
    fn continuation_lines_extend_open_answer() {
        let answers = parse_answers("4. Указание: рассмотрите\nсмежные углы.\n5. 30°");
        assert_eq!(
            triples(&answers),
            [
                (None, "4", "Указание: рассмотрите смежные углы"),
                (None, "5", "30°")
            ]
        );
    }

    #[test]
    fn inline_section_marker_switches_section() {
        let answers = parse_answers("§ 2. 1. 60°. § 3. 1. 45°");
        assert_eq!(
            triples(&answers),
            [(Some("§2"), "1", "60°"), (Some("§3"), "1", "45°")]
        );
    }

    #[test]
    fn heading_lines_are_skipped() {
        let answers = parse_answers("ОТВЕТЫ И УКАЗАНИЯ\n7. 12 см");
        assert_eq!(triples(&answers), [(None, "7", "12 см")]);
    }

    #[test]
    fn decimal_numbers_are_kept_whole() {
        let answers = parse_answers("4.1. 2,5 см. 4.2. 3 см");
        assert_eq!(triples(&answers), [(None, "4.1", "2,5 см"), (None, "4.2", "3 см")]);
    }

    #[test]
    fn answer_text_is_capped() {
        let long = format!("1. {}", "а".repeat(3000));
        let answers = parse_answers(&long);
        assert_eq!(answers[0].answer_text.chars().count(), MAX_ANSWER_CHARS);
    }

    #[test]
    fn extract_reads_only_answers_span() {
        let mut pages: Vec<(usize, String)> = (1..=9)
            .map(|n| (n, format!("{n}. Найдите угол номер {n}.")))
            .collect();
        pages.push((10, "Ответы\n1. 40°".into()));
        let refs: Vec<(usize, &str)> = pages.iter().map(|(n, t)| (*n, t.as_str())).collect();
        let map = crate::document_map::build(&refs);
        let answers = extract_answers(&refs, &map);
        assert_eq!(triples(&answers), [(None, "1", "40°")]);
    }
}
