//! Hybrid problem retrieval.
//!
//! ## Scoring
//!
//! ```text
//! score = bm25 relevance                      (native full-text rank)
//!       + 0.5  query words appear in order     (literal match)
//!       + 1.0  answer longer than 3 chars
//!       + 0.5  solution longer than 10 chars
//!       + 0.5  multi-part problem
//! ```
//!
//! The bonuses favour problems a student can actually be answered from.
//!
//! ## Requested part
//!
//! "Смежные углы, 2 вариант" asks for part 2 of a multi-part problem. The
//! query is scanned for an explicit reference first (`2 вариант`, `3)`,
//! `№4.1`), then for the configured implicit phrases
//! ([`PipelineConfig::part_hints`]). Each multi-part hit gets that part's
//! answer, or every part's answer when no part was requested.

use crate::config::{PartHint, PipelineConfig};
use crate::error::IngestError;
use crate::model::StoredProblem;
use crate::store::Store;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

const LITERAL_BONUS: f64 = 0.5;
const ANSWER_BONUS: f64 = 1.0;
const SOLUTION_BONUS: f64 = 0.5;
const PARTS_BONUS: f64 = 0.5;
/// Query words used for the in-order literal check.
const LITERAL_WORDS: usize = 4;

static RE_DEGREE_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)градусов|градуса|градус").unwrap());
static RE_NOISE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Explicit part references, tried in order. Group 1 is the part.
static EXPLICIT_PART: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(\d)\s*(?:вариант|пункт|часть|подпункт)",
        r"(?i)(?:вариант|пункт|часть)\s*(\d)\b",
        r"\b(\d)\s*\)",
        r"(?i)(?:номер|№)\s*\d+[.,]?\s*(\d)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Normalise a query for full-text matching: degree words and signs go,
/// punctuation goes, whitespace collapses, everything is lowercased.
pub fn preprocess_query(query: &str) -> String {
    let q = RE_DEGREE_WORD.replace_all(query, "°");
    let q = q.replace('°', " ");
    let q = RE_NOISE.replace_all(&q, " ");
    q.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The part a query asks for, explicit references first, then `hints`.
pub fn extract_part_number(query: &str, hints: &[PartHint]) -> Option<String> {
    EXPLICIT_PART
        .iter()
        .find_map(|re| re.captures(query).map(|c| c[1].to_string()))
        .or_else(|| {
            hints
                .iter()
                .find(|h| h.pattern.is_match(query))
                .map(|h| h.part.clone())
        })
}

/// True when `words` occur in `haystack` in this order.
fn words_in_order(haystack: &str, words: &[&str]) -> bool {
    let mut rest = haystack;
    for word in words {
        match rest.find(word) {
            Some(pos) => rest = &rest[pos + word.len()..],
            None => return false,
        }
    }
    !words.is_empty()
}

fn longer_than(text: Option<&str>, chars: usize) -> bool {
    text.is_some_and(|t| t.trim().chars().count() > chars)
}

/// Bonus signals on top of the native rank.
pub fn score_bonus(cleaned_query: &str, problem: &StoredProblem) -> f64 {
    let words: Vec<&str> = cleaned_query.split_whitespace().take(LITERAL_WORDS).collect();
    let mut bonus = 0.0;
    if words_in_order(&problem.clean_text.to_lowercase(), &words) {
        bonus += LITERAL_BONUS;
    }
    if longer_than(problem.answer_text.as_deref(), 3) {
        bonus += ANSWER_BONUS;
    }
    if longer_than(problem.solution_text.as_deref(), 10) {
        bonus += SOLUTION_BONUS;
    }
    if problem.has_parts {
        bonus += PARTS_BONUS;
    }
    bonus
}

/// Optional book filters.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub subject: Option<String>,
    pub grade: Option<i32>,
}

/// One ranked problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub problem: StoredProblem,
    pub book_title: String,
    pub book_subject: String,
    pub book_grade: i32,
    pub score: f64,
    /// Answer of the requested part, or `1) …; 2) …` for all parts.
    pub part_answer: Option<String>,
}

impl SearchHit {
    /// The part answer for multi-part problems, else the problem's answer.
    pub fn effective_answer(&self) -> Option<&str> {
        match (&self.part_answer, self.problem.has_parts) {
            (Some(part), true) => Some(part),
            _ => self.problem.answer_text.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResponse {
    pub cleaned_query: String,
    pub requested_part: Option<String>,
    /// Best first.
    pub hits: Vec<SearchHit>,
}

impl SearchResponse {
    pub fn best(&self) -> Option<&SearchHit> {
        self.hits.first()
    }

    /// True when the best hit reaches `threshold`.
    pub fn is_confident(&self, threshold: f64) -> bool {
        self.best().is_some_and(|h| h.score >= threshold)
    }
}

/// Rank stored problems against a free-text query.
pub fn search(
    store: &Store,
    config: &PipelineConfig,
    query: &str,
    filter: &SearchFilter,
) -> Result<SearchResponse, IngestError> {
    let cleaned = preprocess_query(query);
    let requested_part = extract_part_number(query, &config.part_hints);
    let mut response = SearchResponse {
        cleaned_query: cleaned.clone(),
        requested_part: requested_part.clone(),
        hits: Vec::new(),
    };
    if cleaned.is_empty() {
        return Ok(response);
    }

    let terms: Vec<&str> = cleaned.split_whitespace().collect();
    let limit = config.search_limit.max(1);
    let candidates = store.search_candidates(
        &terms,
        filter.subject.as_deref(),
        filter.grade,
        limit * 2,
    )?;
    debug!("Search '{}': {} candidates", cleaned, candidates.len());

    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .map(|c| SearchHit {
            score: c.rank + score_bonus(&cleaned, &c.problem),
            problem: c.problem,
            book_title: c.book_title,
            book_subject: c.book_subject,
            book_grade: c.book_grade,
            part_answer: None,
        })
        .collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(limit);

    for hit in hits.iter_mut().filter(|h| h.problem.has_parts) {
        hit.part_answer = match &requested_part {
            Some(part) => store.part_answer(hit.problem.id, part)?,
            None => {
                let all: Vec<String> = store
                    .problem_parts(hit.problem.id)?
                    .into_iter()
                    .filter_map(|p| {
                        let answer = p.answer_text?;
                        (!answer.trim().is_empty()).then(|| format!("{}) {}", p.part_number, answer))
                    })
                    .collect();
                (!all.is_empty()).then(|| all.join("; "))
            }
        };
    }

    if let Some(best) = hits.first() {
        info!(
            "Search '{}': best #{} in '{}' (score {:.3}, part {:?})",
            cleaned,
            best.problem.number.as_deref().unwrap_or("?"),
            best.book_title,
            best.score,
            requested_part
        );
    }
    response.hits = hits;
    Ok(response)
}
