//! Sub-item parsing for multi-part problems and their answers.
//!
//! `4. Найдите смежные углы, если: 1) один из них на 80° больше другого;
//! 2) их разность равна 40°` is one problem with two independently
//! answerable parts. Three marker families are tried in order: `1)`,
//! `а)`, `a)`. The first family with at least two markers, at least 70% of
//! them in their expected position, wins.

use crate::model::ProblemPart;
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Numeric,
    Cyrillic,
    Latin,
}

const CYRILLIC_SEQ: [char; 5] = ['а', 'б', 'в', 'г', 'д'];
const LATIN_SEQ: [char; 4] = ['a', 'b', 'c', 'd'];

// `(?:^|[^\p{L}\p{N}])` stands in for a word boundary in front of the marker.
static RE_NUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\p{L}\p{N}])([1-9])\)").unwrap());
static RE_CYRILLIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\p{L}\p{N}])([а-д])\)").unwrap());
static RE_LATIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|[^\p{L}\p{N}])([a-d])\)").unwrap());

static RE_LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:№\s*)?\d+(?:\.\d+)?\.\s+").unwrap());
static RE_TRAILING_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[;,.]\s*$").unwrap());

static FAMILIES: [(Family, &Lazy<Regex>); 3] = [
    (Family::Numeric, &RE_NUMERIC),
    (Family::Cyrillic, &RE_CYRILLIC),
    (Family::Latin, &RE_LATIN),
];

impl Family {
    /// Expected marker at position `i`, or `None` past the family's range.
    fn expected(self, i: usize) -> Option<String> {
        match self {
            Family::Numeric => (i < 9).then(|| (i + 1).to_string()),
            Family::Cyrillic => CYRILLIC_SEQ.get(i).map(char::to_string),
            Family::Latin => LATIN_SEQ.get(i).map(char::to_string),
        }
    }
}

/// A marker: its label and the byte range of `N)` within the text.
struct PartMarker {
    label: String,
    start: usize,
    end: usize,
}

fn find_markers(text: &str, re: &Regex) -> Vec<PartMarker> {
    re.captures_iter(text)
        .filter_map(|c| {
            let g = c.get(1)?;
            // the `)` follows the captured label
            Some(PartMarker {
                label: g.as_str().to_string(),
                start: g.start(),
                end: g.end() + 1,
            })
        })
        .collect()
}

/// First family whose markers form a plausible sequence.
fn detect(text: &str) -> Option<(Family, Vec<PartMarker>)> {
    FAMILIES.iter().find_map(|(family, re)| {
        let markers = find_markers(text, re);
        if markers.len() < 2 {
            return None;
        }
        let in_place = markers
            .iter()
            .enumerate()
            .filter(|(i, m)| family.expected(*i).as_deref() == Some(m.label.as_str()))
            .count();
        // 70% of markers at their expected position
        (in_place * 10 >= markers.len() * 7).then_some((*family, markers))
    })
}

fn segment_text(text: &str, markers: &[PartMarker], i: usize) -> String {
    let end = markers.get(i + 1).map_or(text.len(), |m| m.start);
    let raw = text[markers[i].end..end].trim();
    RE_TRAILING_SEPARATOR.replace(raw, "").trim().to_string()
}

/// Split a problem's text into parts. Empty when it is not multi-part.
pub fn parse_parts(problem_text: &str) -> Vec<ProblemPart> {
    let body = RE_LEADING_NUMBER.replace(problem_text, "");
    let Some((family, markers)) = detect(&body) else {
        return Vec::new();
    };
    (0..markers.len())
        .map(|i| ProblemPart {
            part_number: family
                .expected(i)
                .unwrap_or_else(|| markers[i].label.clone()),
            part_text: segment_text(&body, &markers, i),
            answer_text: None,
            solution_text: None,
        })
        .filter(|p| !p.part_text.is_empty())
        .collect()
}

/// Statement shared by all parts: the text before the first marker.
pub fn common_stem(problem_text: &str) -> String {
    let body = RE_LEADING_NUMBER.replace(problem_text, "");
    match detect(&body) {
        Some((_, markers)) => body[..markers[0].start].trim().to_string(),
        None => body.trim().to_string(),
    }
}

/// Split an answer like `1) 130° и 50°; 2) 110° и 70°` into
/// `(ordinal, answer)` pairs. Letter markers map to ordinals, `б)` → "2".
pub fn parse_answer_parts(answer_text: &str) -> Vec<(String, String)> {
    let Some((_, markers)) = FAMILIES.iter().find_map(|(family, re)| {
        let markers = find_markers(answer_text, re);
        (markers.len() >= 2).then_some((*family, markers))
    }) else {
        return Vec::new();
    };
    markers
        .iter()
        .enumerate()
        .map(|(i, m)| (ordinal(&m.label), segment_text(answer_text, &markers, i)))
        .filter(|(_, a)| !a.is_empty())
        .collect()
}

/// "б" → "2", "c" → "3", "4" → "4".
pub fn ordinal(label: &str) -> String {
    let mut chars = label.chars();
    let (Some(c), None) = (chars.next(), chars.next()) else {
        return label.to_string();
    };
    let pos = CYRILLIC_SEQ
        .iter()
        .position(|x| *x == c)
        .or_else(|| LATIN_SEQ.iter().position(|x| *x == c));
    match pos {
        Some(p) => (p + 1).to_string(),
        None => label.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADJACENT_ANGLES: &str = "4. Найдите смежные углы, если: 1) один из них на 80° больше \
        другого; 2) их разность равна 40°; 3) один из них в 3 раза меньше другого; 4) они равны.";

    #[test]
    fn numeric_parts() {
        let parts = parse_parts(ADJACENT_ANGLES);
        let numbers: Vec<_> = parts.iter().map(|p| p.part_number.as_str()).collect();
        assert_eq!(numbers, ["1", "2", "3", "4"]);
        assert_eq!(parts[0].part_text, "один из них на 80° больше другого");
        assert_eq!(parts[3].part_text, "они равны");
    }

    #[test]
    fn cyrillic_parts() {
        let parts = parse_parts("Постройте угол: а) острый; б) тупой; в) прямой.");
        let numbers: Vec<_> = parts.iter().map(|p| p.part_number.as_str()).collect();
        assert_eq!(numbers, ["а", "б", "в"]);
        assert_eq!(parts[1].part_text, "тупой");
    }

    #[test]
    fn latin_parts() {
        let parts = parse_parts("Вычислите: a) 2 + 3; b) 4 × 5");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].part_number, "b");
    }

    #[test]
    fn single_marker_is_not_multi_part() {
        assert!(parse_parts("5. Решите: 1) уравнение x + 2 = 5").is_empty());
    }

    #[test]
    fn out_of_sequence_markers_rejected() {
        // none of the three in place
        assert!(parse_parts("Сравните 3) и 1) и 7)").is_empty());
    }

    #[test]
    fn leading_problem_number_is_not_a_part() {
        let parts = parse_parts("1. Найдите: 1) x; 2) y");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part_text, "x");
    }

    #[test]
    fn stem_before_first_part() {
        assert_eq!(common_stem(ADJACENT_ANGLES), "Найдите смежные углы, если:");
        assert_eq!(common_stem("7. Докажите теорему."), "Докажите теорему.");
    }

    #[test]
    fn answer_parts_with_letters_map_to_ordinals() {
        let parsed = parse_answer_parts("а) 130° и 50°; б) 110° и 70°.");
        assert_eq!(
            parsed,
            vec![
                ("1".to_string(), "130° и 50°".to_string()),
                ("2".to_string(), "110° и 70°".to_string())
            ]
        );
    }

    #[test]
    fn plain_answer_has_no_parts() {
        assert!(parse_answer_parts("40°").is_empty());
    }
}
