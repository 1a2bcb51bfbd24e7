//! OCR text normalizer: deterministic cleanup of raw OCR output.
//!
//! ## Why is normalization necessary?
//!
//! OCR engines reading Russian textbooks make a small number of very
//! repetitive mistakes: Latin letters that look like Cyrillic ones
//! (`OTBeT` for `ОТВЕТ`), words hyphenated across line breaks, `8)` read
//! for `3)`, degree signs spelled out or lost. Every later stage matches
//! Cyrillic keywords with regexes, so these errors must be repaired before
//! the document map or the segmenter ever sees the text.
//!
//! ## Rule Order
//!
//! Rules run in this order and each is idempotent:
//! 1. Normalise line endings and strip invisible Unicode
//! 2. Repair hyphenation across line breaks
//! 3. Repair Latin/Cyrillic look-alikes (whole tokens, then mixed tokens)
//! 4. Canonicalise math and unit symbols
//! 5. Apply context regexes for frequent OCR error patterns
//! 6. Repair spacing around variables and operators
//! 7. Optionally repair one out-of-sequence `N)` enumerator
//! 8. Optionally correct near-miss words against a domain vocabulary
//! 9. Whitespace and page-artifact cleanup
//!
//! Hyphenation runs before script repair so that `боль-\nme` first becomes
//! the mixed token `больme` and then `больше`.

use crate::config::NormalizerOptions;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};

/// Cleaned text plus its 0–100 quality score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    pub quality: u8,
}

/// Clean one page of raw OCR text and score the result.
pub fn normalize_page(raw: &str, opts: &NormalizerOptions) -> Normalized {
    let text = clean_ocr_text(raw, opts);
    let quality = quality_score(&text);
    Normalized { text, quality }
}

/// Apply every normalization rule in order.
pub fn clean_ocr_text(input: &str, opts: &NormalizerOptions) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = repair_hyphenation(&s);
    let s = repair_script_confusions(&s);
    let s = canonicalise_math_symbols(&s);
    let s = apply_context_fixes(&s);
    let s = repair_equation_spacing(&s);
    let s = if opts.repair_numbering {
        repair_enumeration(&s)
    } else {
        s
    };
    let s = if opts.vocabulary_correction {
        correct_by_vocabulary(&s, MAX_VOCABULARY_WORDS)
    } else {
        s
    };
    clean_whitespace(&s)
}

// ── Rule 1: Line endings and invisible characters ───────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 2: Hyphenation ─────────────────────────────────────────────────────

static RE_HYPHEN_LINEBREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{L}+)-[ \t]*\n[ \t]*(\p{L}+)").unwrap());
static RE_HYPHEN_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{L}+)-[ \t]+(\p{Ll}+)").unwrap());

fn repair_hyphenation(input: &str) -> String {
    let s = RE_HYPHEN_LINEBREAK.replace_all(input, "${1}${2}");
    RE_HYPHEN_SPACE.replace_all(&s, "${1}${2}").into_owned()
}

// ── Rule 3: Latin/Cyrillic look-alikes ──────────────────────────────────────

/// Whole OCR tokens that are fully Latin but stand for a Russian word.
static LATIN_WORDS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("ux", "их"),
        ("OHH", "они"),
        ("OHU", "они"),
        ("pa3a", "раза"),
        ("pasa", "раза"),
        ("pa3", "раз"),
        ("caMbIX", "самых"),
        ("yroJI", "угол"),
        ("yrJIa", "угла"),
        ("yroJIa", "угла"),
        ("yrJIoB", "углов"),
        ("CMeXHbIe", "смежные"),
        ("CMeXHbIX", "смежных"),
        ("cMeXHbIe", "смежные"),
        ("paBHo", "равно"),
        ("paBHa", "равна"),
        ("paBHbI", "равны"),
        ("MeHbme", "меньше"),
        ("MeHee", "менее"),
        ("6oJIbme", "больше"),
        ("6oJIee", "более"),
        ("HafiTH", "найти"),
        ("HafiAHTe", "найдите"),
        ("3HaK", "знак"),
        ("qepTa", "черта"),
        ("npHMofi", "прямой"),
        ("OCTpbIfi", "острый"),
        ("TynOfi", "тупой"),
        ("3aAaqH", "задачи"),
        ("3aAaqa", "задача"),
        ("OTBeT", "ответ"),
        ("OTBeTbI", "ответы"),
        ("pemeHHe", "решение"),
        ("ynpaxHeHHe", "упражнение"),
        ("AoKa3aTb", "доказать"),
        ("TeopeMa", "теорема"),
        ("onpeAeJIeHHe", "определение"),
        ("cBofiCTBo", "свойство"),
        ("CJIeACTBHe", "следствие"),
        ("aKCHoMa", "аксиома"),
        ("naparpap", "параграф"),
        ("rJIaBa", "глава"),
    ])
});

/// Latin runs inside mixed-script tokens that map to more than one letter
/// or to a letter that does not look alike on its own.
static LATIN_RUNS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("me", "ше"),
        ("ux", "их"),
        ("JI", "л"),
        ("bI", "ы"),
        ("bl", "ы"),
    ])
});

fn latin_to_cyrillic(c: char) -> Option<char> {
    Some(match c {
        'a' => 'а',
        'A' => 'А',
        'e' => 'е',
        'E' => 'Е',
        'o' => 'о',
        'O' => 'О',
        'p' => 'р',
        'P' => 'Р',
        'c' => 'с',
        'C' => 'С',
        'x' => 'х',
        'X' => 'Х',
        'y' => 'у',
        'Y' => 'У',
        'H' => 'Н',
        'K' => 'К',
        'k' => 'к',
        'M' => 'М',
        'T' => 'Т',
        'B' => 'В',
        'm' => 'т',
        'u' => 'и',
        'n' => 'п',
        'r' => 'г',
        _ => return None,
    })
}

fn is_cyrillic(c: char) -> bool {
    matches!(c, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё')
}

static RE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-zА-Яа-яЁё0-9]+").unwrap());

fn repair_script_confusions(input: &str) -> String {
    let cyrillic = input.chars().filter(|c| is_cyrillic(*c)).count();
    let latin = input.chars().filter(|c| c.is_ascii_alphabetic()).count();
    // Whole-token substitutions only make sense in Russian text.
    let russian_context = cyrillic > latin;

    RE_TOKEN
        .replace_all(input, |caps: &Captures<'_>| {
            let token = &caps[0];
            if russian_context {
                if let Some(word) = LATIN_WORDS.get(token) {
                    return (*word).to_string();
                }
            }
            let token = fix_mixed_token(token);
            fix_digits_in_word(&token)
        })
        .into_owned()
}

/// Map Latin letters inside a token that also contains Cyrillic letters.
fn fix_mixed_token(token: &str) -> String {
    let has_cyr = token.chars().any(is_cyrillic);
    let has_lat = token.chars().any(|c| c.is_ascii_alphabetic());
    if !(has_cyr && has_lat) {
        return token.to_string();
    }

    let mut out = String::with_capacity(token.len() + 4);
    let mut run = String::new();
    let flush = |run: &mut String, out: &mut String| {
        if run.is_empty() {
            return;
        }
        if let Some(rep) = LATIN_RUNS.get(run.as_str()) {
            out.push_str(rep);
        } else {
            out.extend(run.chars().map(|c| latin_to_cyrillic(c).unwrap_or(c)));
        }
        run.clear();
    };
    for c in token.chars() {
        if c.is_ascii_alphabetic() {
            run.push(c);
        } else {
            flush(&mut run, &mut out);
            out.push(c);
        }
    }
    flush(&mut run, &mut out);
    out
}

/// `6`, `3`, `0` between two Cyrillic letters are misread `б`, `з`, `о`.
fn fix_digits_in_word(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if !chars.iter().any(|c| matches!(c, '0' | '3' | '6')) {
        return token.to_string();
    }
    let mut out = String::with_capacity(token.len());
    for (i, &c) in chars.iter().enumerate() {
        let between = i > 0
            && i + 1 < chars.len()
            && is_cyrillic(chars[i - 1])
            && is_cyrillic(chars[i + 1]);
        let fixed = match (c, between) {
            ('6', true) => 'б',
            ('3', true) => 'з',
            ('0', true) => 'о',
            _ => c,
        };
        out.push(fixed);
    }
    out
}

// ── Rule 4: Math and unit symbols ───────────────────────────────────────────

static RE_DEGREE_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d)[ \t]*градус(?:ов|а)?\b").unwrap());
static RE_UNIT_POWER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(см|мм|дм|км|м|cm|mm|m)([23])\b").unwrap());
static RE_ANGLE_TRIPLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([A-ZА-Я]{3})\b").unwrap());

const SYMBOL_FIXES: &[(&str, &str)] = &[
    ("<=", "≤"),
    (">=", "≥"),
    ("!=", "≠"),
    ("+-", "±"),
    ("~=", "≈"),
    ("_|_", "⊥"),
    ("/_", "∠"),
];

fn canonicalise_math_symbols(input: &str) -> String {
    let mut s = RE_DEGREE_WORD.replace_all(input, "${1}°").into_owned();
    s = RE_UNIT_POWER
        .replace_all(&s, |caps: &Captures<'_>| {
            let unit = match &caps[1] {
                "cm" => "см",
                "mm" => "мм",
                other => other,
            };
            let power = if &caps[2] == "2" { '²' } else { '³' };
            format!("{unit}{power}")
        })
        .into_owned();
    s = RE_ANGLE_TRIPLE.replace_all(&s, "∠${1}").into_owned();
    for (wrong, right) in SYMBOL_FIXES {
        s = s.replace(wrong, right);
    }
    s
}

// ── Rule 5: Context regexes ─────────────────────────────────────────────────

static CONTEXT_FIXES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        // "сме.ные углы": a dot or junk read for "ж"
        (r"\b([Сс])ме[.,*]ные\b", "${1}межные"),
        // "80 rpaдycoв"
        (r"(\d+)[ \t]*rp[aа][дdн][yу][cс][oо][вB]", "${1}°"),
        // "в 3 pa3a"
        (r"\b([Вв])[ \t]+(\d+)[ \t]*[pр][aа][3з][aа]\b", "${1} ${2} раза"),
        (r"\b([Дд])ока3ательств", "${1}оказательств"),
        // "один из нux"
        (r"\b([Оо])дин[ \t]+из[ \t]+н[uи][xх]\b", "${1}дин из них"),
        // degree sign read as a letter o right after a number
        (r"\b(\d{1,3})[oо]\b", "${1}°"),
    ]
    .into_iter()
    .map(|(p, r)| (Regex::new(p).unwrap(), r))
    .collect()
});

fn apply_context_fixes(input: &str) -> String {
    let mut s = input.to_string();
    for (re, rep) in CONTEXT_FIXES.iter() {
        s = re.replace_all(&s, *rep).into_owned();
    }
    s
}

// ── Rule 6: Variable and operator spacing ───────────────────────────────────

static RE_DIGIT_CYR_X: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d)х\b").unwrap());
static RE_CYR_X_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bх(\d)").unwrap());
static RE_DIGIT_CYR_Y: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d)у\b").unwrap());
static RE_CYR_Y_EQ: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bу[ \t]*=").unwrap());
static RE_TIMES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d)[ \t]*[хx][ \t]*(\d)").unwrap());
static RE_OPEN_PAREN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([ \t]+").unwrap());
static RE_CLOSE_PAREN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+\)").unwrap());
static RE_EQUALS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]*=[ \t]*").unwrap());

fn repair_equation_spacing(input: &str) -> String {
    let s = RE_TIMES.replace_all(input, "${1} × ${2}");
    let s = RE_DIGIT_CYR_X.replace_all(&s, "${1}x");
    let s = RE_CYR_X_DIGIT.replace_all(&s, "x${1}");
    let s = RE_DIGIT_CYR_Y.replace_all(&s, "${1}y");
    let s = RE_CYR_Y_EQ.replace_all(&s, "y =");
    let s = RE_OPEN_PAREN.replace_all(&s, "(");
    let s = RE_CLOSE_PAREN.replace_all(&s, ")");
    RE_EQUALS.replace_all(&s, " = ").into_owned()
}

// ── Rule 7: Enumeration repair ──────────────────────────────────────────────

static RE_ENUMERATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d)\)").unwrap());

/// Repair `1) … 2) … 8) … 4)` into `1) … 2) … 3) … 4)`.
///
/// Only a jump of more than one from the expected value is corrected; a
/// neighbouring value may be a genuine renumbering.
fn repair_enumeration(input: &str) -> String {
    let matches: Vec<(usize, usize, u32)> = RE_ENUMERATOR
        .captures_iter(input)
        .filter_map(|c| {
            let m = c.get(0)?;
            let n = c[1].parse().ok()?;
            Some((m.start(), m.end(), n))
        })
        .collect();
    if matches.len() < 2 {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    let mut expected: Option<u32> = None;
    for (start, end, current) in matches {
        let Some(exp) = expected else {
            expected = Some(current + 1);
            continue;
        };
        if current != exp && exp <= 9 && current.abs_diff(exp) > 1 {
            out.push_str(&input[cursor..start]);
            out.push_str(&format!("{exp})"));
            cursor = end;
        }
        expected = Some(if current == exp { current + 1 } else { exp + 1 });
    }
    out.push_str(&input[cursor..]);
    out
}

// ── Rule 8: Vocabulary correction ───────────────────────────────────────────

/// Texts with more words than this skip vocabulary correction.
const MAX_VOCABULARY_WORDS: usize = 200;

static VOCABULARY: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "угол", "углы", "угла", "углов", "угле", "углом", "смежные", "смежных", "смежный",
        "вертикальные", "вертикальных", "прямой", "прямая", "прямую", "прямые", "прямых",
        "острый", "острые", "тупой", "тупые", "развернутый", "треугольник",
        "треугольника", "треугольники", "треугольников", "квадрат", "квадрата",
        "прямоугольник", "прямоугольника", "окружность", "окружности", "радиус",
        "радиуса", "диаметр", "диаметра", "периметр", "периметра", "площадь", "площади",
        "сторона", "стороны", "сторон", "вершина", "вершины", "вершин", "основание",
        "основания", "высота", "высоты", "медиана", "медианы", "биссектриса",
        "биссектрисы", "перпендикуляр", "перпендикулярны", "параллельны", "параллельные",
        "точка", "точки", "точек", "отрезок", "отрезка", "отрезки", "отрезков", "луча",
        "лучи", "лучей", "плоскость", "плоскости", "уравнение", "уравнения",
        "неравенство", "неравенства", "выражение", "выражения", "формула", "формулы",
        "корень", "корни", "корней", "решение", "решения", "ответ", "ответы", "значение",
        "значения", "переменная", "коэффициент", "множитель", "делитель", "произведение",
        "сумма", "суммы", "разность", "разности", "дробь", "дроби", "числитель",
        "знаменатель", "степень", "степени", "функция", "функции", "график", "графика",
        "найдите", "найти", "вычислите", "вычислить", "докажите", "доказать",
        "доказательство", "определите", "постройте", "построить", "решите", "решить",
        "упростите", "сравните", "равно", "равны", "равна", "равен", "больше", "меньше",
        "если", "когда", "тогда", "дано", "данный", "данные", "известно", "следовательно",
        "значит", "поэтому", "теорема", "теоремы", "определение", "определения",
        "свойство", "свойства", "признак", "признаки", "аксиома", "аксиомы", "следствие",
    ]
    .into_iter()
    .collect()
});

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{L}+").unwrap());

fn correct_by_vocabulary(input: &str, max_words: usize) -> String {
    if input.split_whitespace().count() > max_words {
        return input.to_string();
    }
    RE_WORD
        .replace_all(input, |caps: &Captures<'_>| {
            let word = &caps[0];
            closest_vocabulary_word(word).unwrap_or_else(|| word.to_string())
        })
        .into_owned()
}

/// Closest vocabulary word within edit distance 2, case preserved.
fn closest_vocabulary_word(word: &str) -> Option<String> {
    let lower = word.to_lowercase();
    let len = lower.chars().count();
    if !(4..=15).contains(&len) || VOCABULARY.contains(lower.as_str()) {
        return None;
    }
    let first = lower.chars().next()?;
    let (best, dist) = VOCABULARY
        .iter()
        .filter(|v| v.starts_with(first) && v.chars().count().abs_diff(len) <= 2)
        .map(|v| (*v, levenshtein(&lower, v)))
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))?;
    if dist == 0 || dist > 2 {
        return None;
    }
    Some(preserve_case(word, best))
}

fn preserve_case(original: &str, replacement: &str) -> String {
    if original.chars().all(|c| !c.is_lowercase()) {
        return replacement.to_uppercase();
    }
    if original.chars().next().is_some_and(char::is_uppercase) {
        let mut chars = replacement.chars();
        return match chars.next() {
            Some(f) => f.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
    }
    replacement.to_string()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

// ── Rule 9: Whitespace and page artifacts ───────────────────────────────────

static RE_INLINE_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static RE_SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r" ([,;:!?])").unwrap());
static RE_MISSING_SENTENCE_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([а-яё][.!?])([А-ЯЁ][а-яё])").unwrap());
static RE_PAGE_NUMBER_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}$").unwrap());
static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn clean_whitespace(input: &str) -> String {
    let s = RE_INLINE_SPACE.replace_all(input, " ");
    let s = RE_SPACE_BEFORE_PUNCT.replace_all(&s, "${1}");
    let s = RE_MISSING_SENTENCE_SPACE.replace_all(&s, "${1} ${2}");
    let joined = s
        .lines()
        .map(str::trim)
        .filter(|line| !RE_PAGE_NUMBER_LINE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n");
    RE_BLANK_LINES
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

// ── Quality score ───────────────────────────────────────────────────────────

static RE_UNUSUAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[@#$%&*{}|<>]").unwrap());
static RE_DIGIT_IN_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[А-Яа-яЁё]+\d+[А-Яа-яЁё]+").unwrap());
static RE_LETTER_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-zА-Яа-яЁё]+").unwrap());

/// Score cleaned text from 0 (garbage) to 100 (no known OCR symptoms).
pub fn quality_score(text: &str) -> u8 {
    let mut score: i64 = 100;

    let mixed = RE_LETTER_TOKEN
        .find_iter(text)
        .filter(|m| {
            let t = m.as_str();
            t.chars().any(is_cyrillic) && t.chars().any(|c| c.is_ascii_alphabetic())
        })
        .count() as i64;
    score -= (mixed * 5).min(30);

    let unusual = RE_UNUSUAL.find_iter(text).count() as i64;
    score -= (unusual * 2).min(10);

    if has_enumeration_anomaly(text) {
        score -= 10;
    }

    let digit_words = RE_DIGIT_IN_WORD.find_iter(text).count() as i64;
    score -= (digit_words * 5).min(20);

    score.clamp(0, 100) as u8
}

fn has_enumeration_anomaly(text: &str) -> bool {
    let nums: Vec<u32> = RE_ENUMERATOR
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    nums.windows(2).any(|w| w[1] != w[0] + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> NormalizerOptions {
        NormalizerOptions::default()
    }

    // ── Rule 2 ───────────────────────────────────────────────────────────

    #[test]
    fn hyphenation_across_line_break() {
        assert_eq!(repair_hyphenation("боль-\nше другого"), "больше другого");
        assert_eq!(repair_hyphenation("боль- ше"), "больше");
    }

    #[test]
    fn hyphenation_keeps_compound_words() {
        assert_eq!(repair_hyphenation("какой-то"), "какой-то");
        assert_eq!(repair_hyphenation("x - Y"), "x - Y");
    }

    // ── Rule 3 ───────────────────────────────────────────────────────────

    #[test]
    fn whole_latin_tokens_in_russian_text() {
        let out = repair_script_confusions("OTBeT: ux разность равна 40");
        assert_eq!(out, "ответ: их разность равна 40");
    }

    #[test]
    fn whole_latin_tokens_untouched_in_latin_text() {
        let out = repair_script_confusions("ux is not a word here");
        assert_eq!(out, "ux is not a word here");
    }

    #[test]
    fn mixed_token_uses_runs_then_chars() {
        assert_eq!(fix_mixed_token("больme"), "больше");
        assert_eq!(fix_mixed_token("yгол"), "угол");
        assert_eq!(fix_mixed_token("yroл"), "угол");
        assert_eq!(fix_mixed_token("угоJI"), "угол");
    }

    #[test]
    fn pure_tokens_are_not_mixed() {
        assert_eq!(fix_mixed_token("угол"), "угол");
        assert_eq!(fix_mixed_token("ABC"), "ABC");
    }

    #[test]
    fn digits_inside_cyrillic_words() {
        assert_eq!(fix_digits_in_word("до6ыть"), "добыть");
        assert_eq!(fix_digits_in_word("ра3ность"), "разность");
        assert_eq!(fix_digits_in_word("т0чка"), "точка");
        assert_eq!(fix_digits_in_word("30"), "30");
    }

    // ── Rule 4 ───────────────────────────────────────────────────────────

    #[test]
    fn degree_words_after_numbers() {
        assert_eq!(canonicalise_math_symbols("на 80 градусов"), "на 80°");
        assert_eq!(canonicalise_math_symbols("сколько градусов"), "сколько градусов");
    }

    #[test]
    fn unit_powers_and_operators() {
        assert_eq!(canonicalise_math_symbols("5 см2"), "5 см²");
        assert_eq!(canonicalise_math_symbols("8 m3"), "8 m³");
        assert_eq!(canonicalise_math_symbols("a <= b"), "a ≤ b");
        assert_eq!(canonicalise_math_symbols("<ABC = 30"), "∠ABC = 30");
    }

    // ── Rule 5 ───────────────────────────────────────────────────────────

    #[test]
    fn context_fixes() {
        assert_eq!(apply_context_fixes("сме.ные углы"), "смежные углы");
        assert_eq!(apply_context_fixes("в 3 pa3a меньше"), "в 3 раза меньше");
        assert_eq!(apply_context_fixes("Дока3ательство"), "Доказательство");
        assert_eq!(apply_context_fixes("угол 45o"), "угол 45°");
    }

    // ── Rule 6 ───────────────────────────────────────────────────────────

    #[test]
    fn equation_spacing() {
        assert_eq!(repair_equation_spacing("2х=6"), "2x = 6");
        assert_eq!(repair_equation_spacing("3 х 4"), "3 × 4");
        assert_eq!(repair_equation_spacing("( a + b )"), "(a + b)");
    }

    // ── Rule 7 ───────────────────────────────────────────────────────────

    #[test]
    fn enumeration_gap_repaired() {
        let s = "1) один; 2) два; 8) три; 4) четыре";
        assert_eq!(repair_enumeration(s), "1) один; 2) два; 3) три; 4) четыре");
    }

    #[test]
    fn enumeration_off_by_one_left_alone() {
        let s = "1) один; 2) два; 4) четыре";
        assert_eq!(repair_enumeration(s), s);
    }

    // ── Rule 8 ───────────────────────────────────────────────────────────

    #[test]
    fn vocabulary_fixes_near_miss() {
        assert_eq!(correct_by_vocabulary("Найдитв угол", 200), "Найдите угол");
    }

    #[test]
    fn vocabulary_skips_long_inputs() {
        let long = "найдитв ".repeat(300);
        assert_eq!(correct_by_vocabulary(&long, 200), long);
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("угол", "угол"), 0);
        assert_eq!(levenshtein("угол", "угла"), 2);
        assert_eq!(levenshtein("угол", "уголь"), 1);
        assert_eq!(levenshtein("найдитв", "найдите"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    // ── Rule 9 ───────────────────────────────────────────────────────────

    #[test]
    fn whitespace_and_page_numbers() {
        let s = "  Первая   строка \n\n\n\n 17 \nВторая ,строка";
        assert_eq!(clean_whitespace(s), "Первая строка\n\nВторая,строка");
    }

    // ── Pipeline ─────────────────────────────────────────────────────────

    #[test]
    fn textbook_excerpt_end_to_end() {
        let raw = "4. Найдите смежные углы, если: 1) один из них на 80 градусов боль-\n\
                   me другого; 2) ux разность равна 40°; 8) один из них в\n\
                   3 pasa меньше другого; 4) OHH равны.";
        let out = clean_ocr_text(raw, &opts());
        assert!(out.contains("на 80° больше другого"), "got: {out}");
        assert!(out.contains("2) их разность"), "got: {out}");
        assert!(out.contains("3) один из них"), "got: {out}");
        assert!(out.contains("3 раза меньше"), "got: {out}");
        assert!(out.contains("4) они равны"), "got: {out}");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let raw = "§3. Смежные yглы\n\nOTBeT: 2х=6, угол 45o; 1) a 2) b 8) c";
        let once = clean_ocr_text(raw, &opts());
        let twice = clean_ocr_text(&once, &opts());
        assert_eq!(once, twice);
    }

    // ── Quality score ────────────────────────────────────────────────────

    #[test]
    fn clean_text_scores_100() {
        assert_eq!(quality_score("Найдите смежные углы, если один равен 30°."), 100);
    }

    #[test]
    fn penalties_accumulate_and_clamp() {
        assert_eq!(quality_score("yгол"), 95);
        assert_eq!(quality_score("1) a 5) b"), 90);
        let garbage = "yгол ".repeat(10) + &"@".repeat(10) + &"ра3ность ".repeat(10);
        assert_eq!(quality_score(&garbage), 100 - 30 - 10 - 20);
    }

    #[test]
    fn normalize_page_scores_cleaned_text() {
        let n = normalize_page("OTBeT: yгол равен", &opts());
        assert_eq!(n.text, "ответ: угол равен");
        assert_eq!(n.quality, 100);
    }
}
