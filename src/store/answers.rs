//! Linking parsed answers to stored problems.
//!
//! Lookup order for each answer:
//!
//! 1. exact `(book, section, number)` when the answer names a section;
//! 2. otherwise `(book, number)`, earliest problem first.
//!
//! Both steps only consider problems whose `answer_text` is still empty, so
//! an answered exact match falls through to step 2 and a repeated number
//! reaches the next unanswered problem. Answered problems are never
//! rewritten; an answer whose every match is answered counts as
//! `skipped_existing`. When an answer is written and it is shaped `1) … 2) …`, the
//! pieces fill the matching parts whose answers are still empty.

use super::content::parts_of;
use super::{is_blank, Store};
use crate::error::IngestError;
use crate::model::{LinkReport, ParsedAnswer};
use crate::segment::parts::{ordinal, parse_answer_parts};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

/// Where an answer lands.
enum Target {
    /// Earliest matching problem that still has no answer.
    Empty(i64),
    /// Every matching problem is answered already.
    Answered,
    Missing,
}

fn find_target(conn: &Connection, book_id: i64, answer: &ParsedAnswer) -> Result<Target, IngestError> {
    if let Some(section) = &answer.section {
        let exact: Option<i64> = conn
            .query_row(
                "SELECT id FROM problems
                 WHERE book_id = ?1 AND section = ?2 AND number = ?3
                   AND (answer_text IS NULL OR TRIM(answer_text) = '')
                 ORDER BY id LIMIT 1",
                params![book_id, section, answer.number],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = exact {
            return Ok(Target::Empty(id));
        }
    }
    let any_empty: Option<i64> = conn
        .query_row(
            "SELECT id FROM problems
             WHERE book_id = ?1 AND number = ?2
               AND (answer_text IS NULL OR TRIM(answer_text) = '')
             ORDER BY id LIMIT 1",
            params![book_id, answer.number],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = any_empty {
        return Ok(Target::Empty(id));
    }
    let matches: i64 = conn.query_row(
        "SELECT COUNT(*) FROM problems WHERE book_id = ?1 AND number = ?2",
        params![book_id, answer.number],
        |r| r.get(0),
    )?;
    Ok(if matches > 0 {
        Target::Answered
    } else {
        Target::Missing
    })
}

/// Fill empty part answers from a `1) … 2) …` shaped answer.
fn fill_part_answers(conn: &Connection, problem_id: i64, answer_text: &str) -> Result<usize, IngestError> {
    let pieces = parse_answer_parts(answer_text);
    if pieces.is_empty() {
        return Ok(0);
    }
    let mut filled = 0;
    for part in parts_of(conn, problem_id)? {
        if !is_blank(part.answer_text.as_deref()) {
            continue;
        }
        let key = ordinal(&part.part_number);
        if let Some((_, piece)) = pieces.iter().find(|(n, _)| *n == key) {
            filled += conn.execute(
                "UPDATE problem_parts SET answer_text = ?3 WHERE problem_id = ?1 AND part_number = ?2",
                params![problem_id, part.part_number, piece],
            )?;
        }
    }
    Ok(filled)
}

pub(crate) fn link_answers_tx(
    conn: &Connection,
    book_id: i64,
    answers: &[ParsedAnswer],
) -> Result<LinkReport, IngestError> {
    let mut report = LinkReport::default();
    for answer in answers {
        match find_target(conn, book_id, answer)? {
            Target::Missing => report.not_found += 1,
            Target::Answered => report.skipped_existing += 1,
            Target::Empty(problem_id) => {
                conn.execute(
                    "UPDATE problems SET answer_text = ?2 WHERE id = ?1",
                    params![problem_id, answer.answer_text],
                )?;
                let parts = fill_part_answers(conn, problem_id, &answer.answer_text)?;
                debug!(
                    "Answer {} → problem {} ({} parts filled)",
                    answer.number, problem_id, parts
                );
                report.updated += 1;
            }
        }
    }
    Ok(report)
}

impl Store {
    /// Link answers to the book's problems in one transaction.
    pub fn link_answers(&self, book_id: i64, answers: &[ParsedAnswer]) -> Result<LinkReport, IngestError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let report = link_answers_tx(&tx, book_id, answers)?;
        tx.commit()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewBook, Page, ProblemPart, ProblemRecord};
    use crate::store::{SourceContent, TheoryWrite};
    use std::path::Path;

    fn store_with(problems: Vec<ProblemRecord>) -> (Store, i64, i64) {
        let store = Store::open_in_memory().unwrap();
        let book = store
            .find_or_create_book(&NewBook {
                subject: "geometry".into(),
                grade: 7,
                title: "Геометрия".into(),
                ..Default::default()
            })
            .unwrap();
        let source = store.add_source(book.id, Path::new("g.pdf")).unwrap();
        store
            .replace_source_content(
                book.id,
                source.id,
                &SourceContent {
                    pages: vec![Page::default()],
                    problems,
                    theory: TheoryWrite::Keep,
                    answers: Vec::new(),
                },
            )
            .unwrap();
        (store, book.id, source.id)
    }

    fn problem(section: &str, number: &str, answer: Option<&str>) -> ProblemRecord {
        ProblemRecord {
            number: Some(number.into()),
            section: Some(section.into()),
            text: "Найдите угол.".into(),
            clean_text: "Найдите угол.".into(),
            answer_text: answer.map(str::to_string),
            ..Default::default()
        }
    }

    fn answer(section: Option<&str>, number: &str, text: &str) -> ParsedAnswer {
        ParsedAnswer {
            number: number.into(),
            answer_text: text.into(),
            section: section.map(str::to_string),
        }
    }

    #[test]
    fn exact_section_match_wins() {
        let (store, book_id, source_id) =
            store_with(vec![problem("§1", "5", None), problem("§2", "5", None)]);
        let report = store
            .link_answers(book_id, &[answer(Some("§2"), "5", "12 см")])
            .unwrap();
        assert_eq!(report.updated, 1);
        let problems = store.problems_for_source(source_id).unwrap();
        assert_eq!(problems[0].answer_text, None);
        assert_eq!(problems[1].answer_text.as_deref(), Some("12 см"));
    }

    #[test]
    fn falls_back_to_number_only() {
        let (store, book_id, source_id) = store_with(vec![problem("§3", "8", None)]);
        let report = store
            .link_answers(book_id, &[answer(Some("§9"), "8", "40°"), answer(None, "99", "x")])
            .unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.not_found, 1);
        assert_eq!(
            store.problems_for_source(source_id).unwrap()[0].answer_text.as_deref(),
            Some("40°")
        );
    }

    #[test]
    fn existing_answer_is_never_overwritten() {
        let (store, book_id, source_id) = store_with(vec![problem("§1", "3", Some("60°"))]);
        let report = store
            .link_answers(book_id, &[answer(Some("§1"), "3", "90°"), answer(None, "3", "90°")])
            .unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(report.skipped_existing, 2);
        assert_eq!(
            store.problems_for_source(source_id).unwrap()[0].answer_text.as_deref(),
            Some("60°")
        );
    }

    #[test]
    fn answered_match_passes_to_next_empty_problem() {
        let (store, book_id, source_id) =
            store_with(vec![problem("§1", "5", Some("40°")), problem("§2", "5", None)]);
        let report = store
            .link_answers(book_id, &[answer(None, "5", "60°")])
            .unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.skipped_existing, 0);
        let problems = store.problems_for_source(source_id).unwrap();
        assert_eq!(problems[0].answer_text.as_deref(), Some("40°"));
        assert_eq!(problems[1].answer_text.as_deref(), Some("60°"));
    }

    #[test]
    fn answered_exact_section_falls_back_to_number() {
        let (store, book_id, source_id) =
            store_with(vec![problem("§1", "7", Some("5 см")), problem("§3", "7", None)]);
        let report = store
            .link_answers(book_id, &[answer(Some("§1"), "7", "8 см")])
            .unwrap();
        assert_eq!(report.updated, 1);
        let problems = store.problems_for_source(source_id).unwrap();
        assert_eq!(problems[0].answer_text.as_deref(), Some("5 см"));
        assert_eq!(problems[1].answer_text.as_deref(), Some("8 см"));
    }

    #[test]
    fn part_answers_fill_empty_parts_only() {
        let mut p = problem("§2", "4", None);
        p.parts = vec![
            ProblemPart {
                part_number: "а".into(),
                part_text: "один на 80° больше".into(),
                ..Default::default()
            },
            ProblemPart {
                part_number: "б".into(),
                part_text: "разность 20°".into(),
                answer_text: Some("keep".into()),
                ..Default::default()
            },
        ];
        let (store, book_id, source_id) = store_with(vec![p]);
        store
            .link_answers(book_id, &[answer(Some("§2"), "4", "1) 130° и 50°; 2) 100° и 80°")])
            .unwrap();
        let id = store.problems_for_source(source_id).unwrap()[0].id;
        let parts = store.problem_parts(id).unwrap();
        assert_eq!(parts[0].answer_text.as_deref(), Some("130° и 50°"));
        assert_eq!(parts[1].answer_text.as_deref(), Some("keep"));
    }
}
