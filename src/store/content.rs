//! Pages, problems, parts and section theory.
//!
//! ## Why one transaction per rewrite?
//!
//! Reprocessing a source deletes its pages and problems and inserts the new
//! set. Doing both inside one transaction means a failure anywhere (a bad
//! row, a full disk) rolls back to the old data instead of leaving the
//! source half-empty.

use super::answers::link_answers_tx;
use super::{is_blank, Store};
use crate::error::IngestError;
use crate::model::{
    LinkReport, Page, ParsedAnswer, ProblemPart, ProblemRecord, ProblemType, SectionTheory,
    StoredProblem,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// How a rewrite treats the book's section theory.
#[derive(Debug, Clone, PartialEq)]
pub enum TheoryWrite {
    /// Leave stored theory alone.
    Keep,
    /// Merge each section into what the book already has.
    Merge(Vec<SectionTheory>),
    /// Delete all theory of the book, then insert these sections.
    ReplaceBook(Vec<SectionTheory>),
}

/// Everything one run derived for a source.
#[derive(Debug, Clone)]
pub struct SourceContent {
    pub pages: Vec<Page>,
    pub problems: Vec<ProblemRecord>,
    pub theory: TheoryWrite,
    /// Linked against the book's problems after the insert.
    pub answers: Vec<ParsedAnswer>,
}

/// Row counts written by [`Store::replace_source_content`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaceReport {
    pub pages: usize,
    pub problems: usize,
    pub parts: usize,
    pub theory_sections: usize,
    pub links: LinkReport,
}

pub(crate) const PROBLEM_COLUMNS: &str = "p.id, p.book_id, p.source_id, p.page_id, p.number, p.section, \
     p.text, p.clean_text, p.solution_text, p.answer_text, p.page_ref, p.problem_type, \
     p.has_parts, p.confidence";

pub(crate) fn problem_from_row(row: &Row<'_>) -> rusqlite::Result<StoredProblem> {
    let problem_type: String = row.get(11)?;
    let confidence: f64 = row.get(13)?;
    Ok(StoredProblem {
        id: row.get(0)?,
        book_id: row.get(1)?,
        source_id: row.get(2)?,
        page_id: row.get(3)?,
        number: row.get(4)?,
        section: row.get(5)?,
        text: row.get(6)?,
        clean_text: row.get(7)?,
        solution_text: row.get(8)?,
        answer_text: row.get(9)?,
        page_ref: row.get(10)?,
        problem_type: ProblemType::parse(&problem_type),
        has_parts: row.get(12)?,
        confidence: confidence as f32,
    })
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<Page> {
    let page_num: i64 = row.get(0)?;
    let confidence: Option<f64> = row.get(3)?;
    let quality: Option<i64> = row.get(4)?;
    let image_path: Option<String> = row.get(5)?;
    Ok(Page {
        page_num: page_num as usize,
        raw_text: row.get(1)?,
        normalized_text: row.get(2)?,
        ocr_confidence: confidence.map(|c| c as f32),
        quality: quality.map(|q| q.clamp(0, 100) as u8),
        image_path: image_path.map(PathBuf::from),
    })
}

pub(crate) fn parts_of(conn: &Connection, problem_id: i64) -> Result<Vec<ProblemPart>, IngestError> {
    let mut stmt = conn.prepare(
        "SELECT part_number, part_text, answer_text, solution_text
         FROM problem_parts WHERE problem_id = ?1 ORDER BY id",
    )?;
    let parts = stmt
        .query_map(params![problem_id], |row| {
            Ok(ProblemPart {
                part_number: row.get(0)?,
                part_text: row.get(1)?,
                answer_text: row.get(2)?,
                solution_text: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts)
}

/// Merge `incoming` into the stored text for its section: identical or
/// contained text is not repeated, a superset replaces, anything else is
/// appended.
fn merge_theory_tx(conn: &Connection, theory: &SectionTheory) -> Result<(), IngestError> {
    let existing: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT text, page_ref FROM section_theory WHERE book_id = ?1 AND section = ?2",
            params![theory.book_id, theory.section],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (text, page_ref) = match existing {
        None => (theory.text.clone(), theory.page_ref.clone()),
        Some((old, old_ref)) if old.contains(theory.text.trim()) => (old, old_ref),
        Some((old, _)) if theory.text.contains(old.trim()) => {
            (theory.text.clone(), theory.page_ref.clone())
        }
        Some((old, old_ref)) => (
            format!("{}\n\n{}", old.trim_end(), theory.text.trim()),
            old_ref.or_else(|| theory.page_ref.clone()),
        ),
    };

    conn.execute(
        "INSERT INTO section_theory (book_id, section, text, page_ref, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (book_id, section) DO UPDATE
         SET text = excluded.text, page_ref = excluded.page_ref, updated_at = excluded.updated_at",
        params![theory.book_id, theory.section, text, page_ref, Utc::now()],
    )?;
    Ok(())
}

fn insert_problem(
    conn: &Connection,
    book_id: i64,
    source_id: i64,
    page_ids: &HashMap<usize, i64>,
    problem: &ProblemRecord,
) -> Result<usize, IngestError> {
    let page_id = problem.page_index.and_then(|i| page_ids.get(&i).copied());
    conn.execute(
        "INSERT INTO problems (book_id, source_id, page_id, number, section, text, clean_text,
                               solution_text, answer_text, page_ref, problem_type, has_parts,
                               confidence, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            book_id,
            source_id,
            page_id,
            problem.number,
            problem.section,
            problem.text,
            problem.clean_text,
            problem.solution_text,
            problem.answer_text,
            problem.page_ref,
            problem.problem_type.as_str(),
            problem.has_parts(),
            problem.confidence as f64,
            Utc::now()
        ],
    )?;
    let problem_id = conn.last_insert_rowid();

    let mut parts = 0;
    for part in &problem.parts {
        parts += conn.execute(
            "INSERT OR IGNORE INTO problem_parts (problem_id, part_number, part_text, answer_text, solution_text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                problem_id,
                part.part_number,
                part.part_text,
                part.answer_text,
                part.solution_text
            ],
        )?;
    }
    Ok(parts)
}

impl Store {
    /// Replace everything derived from `source_id` in one transaction.
    ///
    /// Deletes the source's pages and problems (parts follow by cascade),
    /// inserts `content`, applies the theory write, links `content.answers`
    /// and records the page count. Nothing is visible until commit.
    pub fn replace_source_content(
        &self,
        book_id: i64,
        source_id: i64,
        content: &SourceContent,
    ) -> Result<ReplaceReport, IngestError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut report = ReplaceReport::default();

        let removed_problems = tx.execute("DELETE FROM problems WHERE source_id = ?1", params![source_id])?;
        let removed_pages = tx.execute("DELETE FROM pages WHERE source_id = ?1", params![source_id])?;
        debug!(
            "Source {}: removed {} pages, {} problems",
            source_id, removed_pages, removed_problems
        );

        let mut page_ids = HashMap::with_capacity(content.pages.len());
        for page in &content.pages {
            tx.execute(
                "INSERT INTO pages (source_id, page_num, raw_text, normalized_text, ocr_confidence, quality, image_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    source_id,
                    page.page_num as i64,
                    page.raw_text,
                    page.normalized_text,
                    page.ocr_confidence.map(f64::from),
                    page.quality.map(i64::from),
                    page.image_path.as_ref().map(|p| p.to_string_lossy().into_owned())
                ],
            )?;
            page_ids.insert(page.page_num, tx.last_insert_rowid());
            report.pages += 1;
        }

        for problem in &content.problems {
            report.parts += insert_problem(&tx, book_id, source_id, &page_ids, problem)?;
            report.problems += 1;
        }

        match &content.theory {
            TheoryWrite::Keep => {}
            TheoryWrite::Merge(sections) => {
                for theory in sections {
                    merge_theory_tx(&tx, theory)?;
                }
                report.theory_sections = sections.len();
            }
            TheoryWrite::ReplaceBook(sections) => {
                tx.execute("DELETE FROM section_theory WHERE book_id = ?1", params![book_id])?;
                for theory in sections {
                    merge_theory_tx(&tx, theory)?;
                }
                report.theory_sections = sections.len();
            }
        }

        report.links = link_answers_tx(&tx, book_id, &content.answers)?;

        tx.execute(
            "UPDATE sources SET page_count = ?2, updated_at = ?3 WHERE id = ?1",
            params![source_id, content.pages.len() as i64, Utc::now()],
        )?;
        tx.commit()?;

        info!(
            "Source {}: stored {} pages, {} problems ({} parts), {} theory sections, {} answers linked",
            source_id,
            report.pages,
            report.problems,
            report.parts,
            report.theory_sections,
            report.links.updated
        );
        Ok(report)
    }

    /// Pages of a source in page order.
    pub fn load_pages(&self, source_id: i64) -> Result<Vec<Page>, IngestError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT page_num, raw_text, normalized_text, ocr_confidence, quality, image_path
             FROM pages WHERE source_id = ?1 ORDER BY page_num",
        )?;
        let pages = stmt
            .query_map(params![source_id], page_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    pub fn get_problem(&self, problem_id: i64) -> Result<Option<StoredProblem>, IngestError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {PROBLEM_COLUMNS} FROM problems p WHERE p.id = ?1"),
                params![problem_id],
                problem_from_row,
            )
            .optional()?)
    }

    /// Problems anchored to a source, in insertion order.
    pub fn problems_for_source(&self, source_id: i64) -> Result<Vec<StoredProblem>, IngestError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROBLEM_COLUMNS} FROM problems p WHERE p.source_id = ?1 ORDER BY p.id"
        ))?;
        let problems = stmt
            .query_map(params![source_id], problem_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(problems)
    }

    pub fn count_problems(&self, book_id: i64) -> Result<usize, IngestError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM problems WHERE book_id = ?1",
            params![book_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn problem_parts(&self, problem_id: i64) -> Result<Vec<ProblemPart>, IngestError> {
        let conn = self.conn()?;
        parts_of(&conn, problem_id)
    }

    /// Non-empty answer of one part.
    pub fn part_answer(&self, problem_id: i64, part_number: &str) -> Result<Option<String>, IngestError> {
        let conn = self.conn()?;
        let answer: Option<Option<String>> = conn
            .query_row(
                "SELECT answer_text FROM problem_parts WHERE problem_id = ?1 AND part_number = ?2",
                params![problem_id, part_number],
                |row| row.get(0),
            )
            .optional()?;
        Ok(answer.flatten().filter(|a| !is_blank(Some(a))))
    }

    /// Merge section theory outside a source rewrite.
    pub fn merge_theory(&self, sections: &[SectionTheory]) -> Result<(), IngestError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for theory in sections {
            merge_theory_tx(&tx, theory)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_theory(&self, book_id: i64, section: &str) -> Result<Option<SectionTheory>, IngestError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT book_id, section, text, page_ref FROM section_theory
                 WHERE book_id = ?1 AND section = ?2",
                params![book_id, section],
                |row| {
                    Ok(SectionTheory {
                        book_id: row.get(0)?,
                        section: row.get(1)?,
                        text: row.get(2)?,
                        page_ref: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn list_theory(&self, book_id: i64) -> Result<Vec<String>, IngestError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT section FROM section_theory WHERE book_id = ?1 ORDER BY id")?;
        let sections = stmt
            .query_map(params![book_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(sections)
    }
}
