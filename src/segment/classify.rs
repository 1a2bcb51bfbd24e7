//! Question vs exercise classification.
//!
//! Theory questions ("Сформулируйте теорему…") are answered from theory or
//! a worked proof; exercises ("Найдите угол…") have a short numeric answer.
//! The notifier formats them differently, so each problem gets a type.

use crate::model::ProblemType;
use once_cell::sync::Lazy;
use regex::Regex;

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
}

static QUESTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"^докажите",
        r"^что\s+(?:такое|называется|означает)",
        r"^какой\s+(?:угол|отрезок|треугольник|вектор)",
        r"^какая\s+(?:фигура|прямая|точка)",
        r"^какие\s+(?:углы|отрезки|точки|прямые|фигуры|векторы)",
        r"^как\s+(?:называ|обознача|доказ|определ)",
        r"^сформулируйте",
        r"^объясните",
        r"^в\s+ч[её]м\s+состоит",
        r"^чему\s+равен",
        r"^когда\s+говорят",
        r"^при\s+каком\s+условии",
        r"^верно\s+ли",
    ])
});

static EXERCISE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"^найдите",
        r"^вычислите",
        r"^решите",
        r"^постройте",
        r"^определите",
        r"^дан[оаы]?[\s:]",
        r"^\d+[.)]\s*\d",
        r"^отрезки?\s",
        r"^треугольник",
        r"^в\s+(?:треугольнике|параллелограмме)",
        r"^на\s+(?:прямой|отрезке|плоскости)",
        r"^через\s+точк",
        r"^из\s+точки",
        r"^стороны?\s",
        r"^угол\s",
        r"^диагонал",
        r"^радиус",
        r"^основани[ея]",
        r"^высота",
        r"^медиана",
        r"^биссектриса",
        r"^окружност",
        r"^могут\s+ли",
    ])
});

static RE_MEASUREMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\s*(?:см|мм|км|м\b|°|градус)").unwrap());
static RE_LEADING_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+[.)]\s*").unwrap());

/// Classify a problem by its opening words.
pub fn classify_problem(text: &str) -> ProblemType {
    let head: String = text.trim().chars().take(200).collect::<String>().to_lowercase();
    let head = RE_LEADING_MARKER.replace(&head, "");

    if QUESTION_PATTERNS.iter().any(|re| re.is_match(&head)) {
        return ProblemType::Question;
    }
    if EXERCISE_PATTERNS.iter().any(|re| re.is_match(&head)) {
        return ProblemType::Exercise;
    }
    if RE_MEASUREMENT.is_match(&head) {
        return ProblemType::Exercise;
    }
    if head.chars().take(100).any(|c| c == '?') {
        return ProblemType::Question;
    }
    ProblemType::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_verbs() {
        assert_eq!(classify_problem("3. Докажите, что углы равны."), ProblemType::Question);
        assert_eq!(classify_problem("Что называется биссектрисой?"), ProblemType::Question);
        assert_eq!(classify_problem("12. Найдите угол ABC."), ProblemType::Exercise);
        assert_eq!(classify_problem("Дано: AB = CD."), ProblemType::Exercise);
    }

    #[test]
    fn measurements_imply_exercise() {
        assert_eq!(
            classify_problem("Периметр равен 24 см. Каковы стороны?"),
            ProblemType::Exercise
        );
    }

    #[test]
    fn question_mark_fallback() {
        assert_eq!(classify_problem("Бывают ли такие фигуры?"), ProblemType::Question);
        assert_eq!(classify_problem("Рассмотрим рисунок."), ProblemType::Unknown);
    }
}
