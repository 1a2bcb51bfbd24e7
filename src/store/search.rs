//! Full-text candidate lookup over problem text.
//!
//! The FTS5 index only matches whole tokens. When it finds nothing, the
//! lookup falls back to case-folded substring matching over `clean_text`,
//! so word stems and OCR-split words still reach a candidate.

use super::content::{problem_from_row, PROBLEM_COLUMNS};
use super::Store;
use crate::error::IngestError;
use crate::model::StoredProblem;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::debug;

/// A problem matched by the full-text index, with its book.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub problem: StoredProblem,
    pub book_title: String,
    pub book_subject: String,
    pub book_grade: i32,
    /// Native relevance, higher is better: negated FTS5 `bm25`, or the share
    /// of terms found for substring matches.
    pub rank: f64,
}

/// Shorter terms are ignored by the substring fallback.
const MIN_SUBSTRING_TERM_CHARS: usize = 3;

/// `%term%` for `LIKE … ESCAPE '\'`, lowercased.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn candidate_from_row(row: &Row<'_>) -> rusqlite::Result<Candidate> {
    Ok(Candidate {
        problem: problem_from_row(row)?,
        book_title: row.get(14)?,
        book_subject: row.get(15)?,
        book_grade: row.get(16)?,
        rank: row.get(17)?,
    })
}

/// FTS5 query matching any of `terms`, each quoted as a literal.
pub fn fts_query(terms: &[&str]) -> String {
    terms
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

impl Store {
    /// Problems whose text matches any term, best `bm25` first, optionally
    /// filtered by the book's subject and grade. Falls back to substring
    /// matching when no token matches.
    pub fn search_candidates(
        &self,
        terms: &[&str],
        subject: Option<&str>,
        grade: Option<i32>,
        limit: usize,
    ) -> Result<Vec<Candidate>, IngestError> {
        let query = fts_query(terms);
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROBLEM_COLUMNS}, b.title, b.subject, b.grade, -bm25(problems_fts) AS relevance
             FROM problems_fts
             JOIN problems p ON p.id = problems_fts.rowid
             JOIN books b ON b.id = p.book_id
             WHERE problems_fts MATCH ?1
               AND (?2 IS NULL OR b.subject = ?2)
               AND (?3 IS NULL OR b.grade = ?3)
             ORDER BY relevance DESC
             LIMIT ?4"
        ))?;
        let candidates = stmt
            .query_map(params![query, subject, grade, limit as i64], candidate_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        if !candidates.is_empty() {
            return Ok(candidates);
        }
        let fallback = substring_candidates(&conn, terms, subject, grade, limit)?;
        debug!(
            "No full-text match for {:?}; {} substring candidates",
            terms,
            fallback.len()
        );
        Ok(fallback)
    }
}

/// Problems whose case-folded `clean_text` contains any term of at least
/// [`MIN_SUBSTRING_TERM_CHARS`] characters, ranked by the share of those
/// terms found.
fn substring_candidates(
    conn: &Connection,
    terms: &[&str],
    subject: Option<&str>,
    grade: Option<i32>,
    limit: usize,
) -> Result<Vec<Candidate>, IngestError> {
    let patterns: Vec<String> = terms
        .iter()
        .filter(|t| t.chars().count() >= MIN_SUBSTRING_TERM_CHARS)
        .map(|t| like_pattern(t))
        .collect();
    if patterns.is_empty() {
        return Ok(Vec::new());
    }
    let hits = (0..patterns.len())
        .map(|i| format!("(fold_lower(p.clean_text) LIKE ?{} ESCAPE '\\')", i + 4))
        .collect::<Vec<_>>()
        .join(" + ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {PROBLEM_COLUMNS}, b.title, b.subject, b.grade,
                CAST({hits} AS REAL) / {n} AS relevance
         FROM problems p
         JOIN books b ON b.id = p.book_id
         WHERE ({hits}) > 0
           AND (?1 IS NULL OR b.subject = ?1)
           AND (?2 IS NULL OR b.grade = ?2)
         ORDER BY relevance DESC, p.id
         LIMIT ?3",
        n = patterns.len()
    ))?;
    let mut values = vec![
        subject.map_or(Value::Null, |s| Value::Text(s.to_string())),
        grade.map_or(Value::Null, |g| Value::Integer(i64::from(g))),
        Value::Integer(limit as i64),
    ];
    values.extend(patterns.into_iter().map(Value::Text));
    let candidates = stmt
        .query_map(params_from_iter(values), candidate_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(candidates)
}
