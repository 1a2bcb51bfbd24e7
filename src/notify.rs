//! Finished-answer messages and the notification seam.
//!
//! The pipeline never talks to a chat service itself. It formats the text
//! with [`format_answer_message`] and hands it to a [`Notifier`] together
//! with a destination id.

use crate::model::ProblemType;
use crate::retrieval::{SearchHit, SearchResponse};
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Longest answer body kept in one message.
const MAX_MESSAGE_CHARS: usize = 3000;
/// Longest standalone solution or theory excerpt.
const MAX_SOLUTION_CHARS: usize = 2000;
/// Longest solution shown after an answer.
const MAX_TRAILING_SOLUTION_CHARS: usize = 1500;

const NOT_FOUND: &str = "❌ Задача не найдена\n\n\
Не удалось найти похожую задачу в базе.\n\n\
Попробуйте:\n\
• Переформулировать запрос\n\
• Указать номер задачи из учебника\n\
• Отправить фото условия";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification to '{destination}' failed: {detail}")]
    Delivery { destination: String, detail: String },
}

/// Delivers a finished answer to a user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError>;
}

/// Writes messages to the log. For the CLI and for deployments without a
/// chat integration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        info!("Notification for {}:\n{}", destination, message);
        Ok(())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}

/// `[THEOREM]\n…` solutions carry a label line.
fn labelled_theory(solution: &str) -> Option<(&'static str, &str)> {
    let rest = solution.strip_prefix('[')?;
    let (tag, body) = rest.split_once('\n').unwrap_or((rest, ""));
    let label = match tag.trim_end_matches(']').to_lowercase().as_str() {
        "definition" => "📖 Определение",
        "theorem" => "📐 Теорема",
        "proof" => "📝 Доказательство",
        "property" => "📋 Свойство",
        _ => "💡 Ответ",
    };
    Some((label, if body.is_empty() { solution } else { body }))
}

fn answer_then_solution(answer: &str, solution: Option<&str>) -> String {
    let mut msg = format!("✅ Ответ: {answer}");
    if let Some(sol) = solution {
        msg.push_str("\n\n✏️ Решение:\n");
        msg.push_str(&truncate(sol, MAX_TRAILING_SOLUTION_CHARS));
    }
    msg
}

/// Answer body for one hit: part answers first, then by problem type.
pub fn format_short_answer(hit: &SearchHit, requested_part: Option<&str>) -> String {
    let p = &hit.problem;
    let answer = non_blank(p.answer_text.as_deref());
    let solution = non_blank(p.solution_text.as_deref());

    if let (true, Some(part_answer)) = (p.has_parts, non_blank(hit.part_answer.as_deref())) {
        return match requested_part {
            Some(part) => format!("✅ Ответ на вариант {part}): {part_answer}"),
            None => format!("✅ Ответы:\n{part_answer}"),
        };
    }

    match (p.problem_type, answer, solution) {
        (ProblemType::Question, _, Some(sol)) => match labelled_theory(sol) {
            Some((label, body)) => format!("{label}:\n\n{}", truncate(body, MAX_SOLUTION_CHARS)),
            None => format!("💡 Ответ:\n\n{}", truncate(sol, MAX_SOLUTION_CHARS)),
        },
        (ProblemType::Question, Some(ans), None) => format!("💡 Ответ:\n\n{ans}"),
        (ProblemType::Question, None, None) => {
            "ℹ️ К сожалению, ответ на этот вопрос пока не добавлен в базу.".to_string()
        }
        (_, Some(ans), sol) => answer_then_solution(ans, sol),
        (_, None, Some(sol)) => format!("✏️ Решение:\n\n{}", truncate(sol, MAX_SOLUTION_CHARS)),
        (ProblemType::Exercise, None, None) => {
            "ℹ️ К сожалению, ответ на эту задачу пока не добавлен в базу.".to_string()
        }
        (_, None, None) => "ℹ️ Ответ пока не найден в базе.".to_string(),
    }
}

/// The full message for a search: source line plus answer body, or the
/// not-found text.
pub fn format_answer_message(response: &SearchResponse) -> String {
    let Some(best) = response.best() else {
        return NOT_FOUND.to_string();
    };
    let body = format_short_answer(best, response.requested_part.as_deref());
    let body = if body.chars().count() > MAX_MESSAGE_CHARS {
        let head: String = body.chars().take(MAX_MESSAGE_CHARS).collect();
        format!("{head}\n\n... (сокращено)")
    } else {
        body
    };
    match best.problem.number.as_deref() {
        Some(number) => format!("📚 {}, №{}\n\n{}", best.book_title, number, body),
        None => format!("📚 {}\n\n{}", best.book_title, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StoredProblem;

    fn hit(problem_type: ProblemType, answer: Option<&str>, solution: Option<&str>) -> SearchHit {
        SearchHit {
            problem: StoredProblem {
                id: 1,
                book_id: 1,
                source_id: None,
                page_id: None,
                number: Some("12".into()),
                section: Some("§2".into()),
                text: String::new(),
                clean_text: String::new(),
                solution_text: solution.map(str::to_string),
                answer_text: answer.map(str::to_string),
                page_ref: None,
                problem_type,
                has_parts: false,
                confidence: 1.0,
            },
            book_title: "Геометрия 7".into(),
            book_subject: "geometry".into(),
            book_grade: 7,
            score: 1.0,
            part_answer: None,
        }
    }

    #[test]
    fn exercise_shows_answer_then_solution() {
        let msg = format_short_answer(&hit(ProblemType::Exercise, Some("40°"), Some("180 − 140")), None);
        assert_eq!(msg, "✅ Ответ: 40°\n\n✏️ Решение:\n180 − 140");
    }

    #[test]
    fn long_trailing_solution_is_cut() {
        let long = "x".repeat(1600);
        let msg = format_short_answer(&hit(ProblemType::Unknown, Some("5"), Some(&long)), None);
        assert!(msg.ends_with(&format!("{}...", "x".repeat(10))));
        assert_eq!(msg.chars().filter(|c| *c == 'x').count(), 1500);
    }

    #[test]
    fn question_prefers_solution_with_label() {
        let msg = format_short_answer(
            &hit(ProblemType::Question, Some("да"), Some("[THEOREM]\nСумма углов 180°.")),
            None,
        );
        assert_eq!(msg, "📐 Теорема:\n\nСумма углов 180°.");
        let plain = format_short_answer(&hit(ProblemType::Question, None, Some("Потому что.")), None);
        assert_eq!(plain, "💡 Ответ:\n\nПотому что.");
    }

    #[test]
    fn missing_answers_have_type_specific_text() {
        assert!(format_short_answer(&hit(ProblemType::Exercise, None, None), None)
            .contains("на эту задачу"));
        assert!(format_short_answer(&hit(ProblemType::Question, None, None), None)
            .contains("на этот вопрос"));
        assert_eq!(
            format_short_answer(&hit(ProblemType::Unknown, Some("  "), None), None),
            "ℹ️ Ответ пока не найден в базе."
        );
    }

    #[test]
    fn part_answers_take_precedence() {
        let mut h = hit(ProblemType::Exercise, Some("см. рисунок"), None);
        h.problem.has_parts = true;
        h.part_answer = Some("130° и 50°".into());
        assert_eq!(
            format_short_answer(&h, Some("1")),
            "✅ Ответ на вариант 1): 130° и 50°"
        );
        h.part_answer = Some("1) 130° и 50°; 2) 110° и 70°".into());
        assert_eq!(
            format_short_answer(&h, None),
            "✅ Ответы:\n1) 130° и 50°; 2) 110° и 70°"
        );
    }

    #[test]
    fn message_names_book_and_number() {
        let response = SearchResponse {
            cleaned_query: "угол".into(),
            requested_part: None,
            hits: vec![hit(ProblemType::Exercise, Some("40°"), None)],
        };
        assert_eq!(
            format_answer_message(&response),
            "📚 Геометрия 7, №12\n\n✅ Ответ: 40°"
        );
        assert!(format_answer_message(&SearchResponse::default()).starts_with("❌ Задача не найдена"));
    }

    #[tokio::test]
    async fn log_notifier_accepts_messages() {
        assert!(LogNotifier.send("user-1", "✅ Ответ: 40°").await.is_ok());
    }
}
