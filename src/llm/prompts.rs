//! Prompts for every LLM-calling stage.
//!
//! Centralising the prompts keeps them reviewable in one place and lets
//! unit tests pin the contract each stage relies on: the correction prompt
//! must keep `## Page N` blocks, the distribution prompt must name every
//! block kind the parser accepts.

/// System prompt for page transcription by a vision model.
pub const OCR_SYSTEM_PROMPT: &str = r#"You transcribe one scanned textbook page into plain text.

Rules:
1. Transcribe ALL text in reading order, exactly as printed. Do not translate, summarise or solve anything.
2. Keep line breaks between paragraphs, list items, problem numbers ("1.", "2)", "№ 5") and section headers ("§ 3.").
3. Write formulas in plain text with Unicode symbols: ², ³, √, ∠, °, ×, ÷, π, ≤, ≥, ≠, ±, ≈. Use ^ for other powers (x^5) and a/b for fractions. Never use LaTeX.
4. Skip running headers, footers and the page number.
5. Describe nothing: no comments, no markdown fences, no "Here is the text"."#;

/// System prompt for the correction job. The response must keep the
/// `## Page N` block layout of the request.
pub const CORRECTION_SYSTEM_PROMPT: &str = r###"Ты исправляешь текст после OCR учебника. Исходный текст содержит ошибки распознавания и неудобные обозначения формул.

ЗАДАЧИ:
1. Исправить ошибки OCR: латиница вместо кириллицы (TEOPEMA → ТЕОРЕМА, CHHYCOB → СИНУСОВ), перепутанные символы (6↔b, ?↔²), склеенные слова.
2. Привести формулы к единому формату:
   - Только символы, которые читаются в обычном тексте, мессенджерах и БД: Unicode (², ³, √, ∠, °, ×, ÷, π, ≤, ≥, ≠, ∞, ±, ≈) и ^ для степени (x^2).
   - Без LaTeX с обратным слэшем (\frac, \sqrt и т.п.).
   - Дроби записывать как a/b или через ÷.
3. Сохранить структуру: каждый блок начинается с заголовка "## Page N" и содержит только текст этой страницы. Порядок страниц не менять, страницы не объединять и не пропускать.
4. Учитывать предмет учебника при исправлении терминов и формул.

ФОРМАТ ОТВЕТА: тот же текст блоками "## Page 1", "## Page 2", ... с пустой строкой после заголовка. Никаких комментариев до или после блоков."###;

/// System prompt for block classification. The JSON shape here is the one
/// [`crate::pipeline::distribute`] parses.
pub const DISTRIBUTION_SYSTEM_PROMPT: &str = r#"Ты размечаешь блоки текста учебника (после OCR). Для каждого блока определи тип и заполни поля.

Типы блоков:
- section_theory: заголовок параграфа с началом теории ("§ N. Название ...").
- theory: продолжение теории параграфа.
- problem: условие задачи или упражнения; решение и ответ, если они в том же блоке, клади в solution_text и answer_text. Подпункты 1), 2), а), б) перечисли в "parts".
- solution_only: решение или ответ без условия; относится к предыдущей задаче.
- answers_block: раздел ответов ("Ответы", "Ответы и указания"); перечисли ответы в "answers".
- other: оглавление, вводные фразы, заголовки вида "Задачи к параграфу" и всё прочее.

Ответ — только валидный JSON без markdown-обёртки:
{"blocks": [{"block_id": 1, "type": "problem", "section": "§12", "number": "315", "theory_text": null, "problem_text": "...", "solution_text": null, "answer_text": null, "parts": [{"part_number": "1", "part_text": "...", "answer_text": null, "solution_text": null}], "answers": null}]}

Правила:
- block_id — номер блока из запроса.
- section — номер параграфа в виде §N. Обязателен для section_theory и theory.
- number — номер задачи ("315" или "4.1"), только для problem.
- parts — только для problem с подпунктами, иначе null.
- answers — только для answers_block: [{"number": "315", "answer_text": "40°"}].
- Блоки "context" даны только для понимания соседства; их не размечай.
- Не придумывай текст. Пустой или неразборчивый блок — type "other", остальные поля null."#;

/// User prompt for one correction batch.
pub fn correction_user_prompt(subject: &str, chunk: &str) -> String {
    format!("Предмет: {subject}.\n\nИсходный текст (блоки страниц):\n\n{chunk}")
}

/// Header line of one block in a distribution request.
pub fn format_block(block_id: usize, page: usize, hint: &str, text: &str) -> String {
    format!("--- BLOCK {block_id} ---\npage: {page}\nhint: {hint}\n\n{text}\n")
}

/// Neighbouring text shown around a batch. Never classified.
pub fn format_context(position: &str, text: &str) -> String {
    format!("--- CONTEXT ({position}) ---\nhint: context\n\n{text}\n")
}

/// User prompt for a whole paragraph sent in one call.
pub fn paragraph_user_prompt(subject: &str, section: Option<&str>, page: usize, text: &str) -> String {
    let section = section.unwrap_or("не определён");
    format!(
        "Предмет: {subject}. Ниже целый параграф учебника ({section}, начинается на странице {page}). \
Раздели его на блоки сам, нумеруя block_id с 1, и верни JSON с полем \"blocks\".\n\n{text}\n"
    )
}

/// User prompt for one distribution call over pre-formatted blocks.
pub fn distribution_user_prompt(subject: &str, blocks: &[String]) -> String {
    let mut out = format!(
        "Предмет: {subject}. Ниже блоки текста из учебника. Верни JSON с полем \"blocks\".\n"
    );
    for block in blocks {
        out.push('\n');
        out.push_str(block);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_prompt_keeps_page_blocks() {
        assert!(CORRECTION_SYSTEM_PROMPT.contains("## Page N"));
        assert!(CORRECTION_SYSTEM_PROMPT.contains("Без LaTeX"));
    }

    #[test]
    fn distribution_prompt_names_every_kind() {
        for kind in [
            "section_theory",
            "theory",
            "problem",
            "solution_only",
            "answers_block",
            "other",
        ] {
            assert!(
                DISTRIBUTION_SYSTEM_PROMPT.contains(kind),
                "missing kind {kind}"
            );
        }
    }

    #[test]
    fn block_layout() {
        let b = format_block(3, 12, "problem_start", "5. Найдите угол.");
        assert_eq!(
            b,
            "--- BLOCK 3 ---\npage: 12\nhint: problem_start\n\n5. Найдите угол.\n"
        );
        let prompt = distribution_user_prompt("geometry", &[b]);
        assert!(prompt.starts_with("Предмет: geometry."));
        assert!(prompt.contains("--- BLOCK 3 ---"));
    }

    #[test]
    fn paragraph_prompt_names_section_and_page() {
        let p = paragraph_user_prompt("geometry", Some("§4"), 17, "§4. Треугольники");
        assert!(p.contains("§4, начинается на странице 17"));
        assert!(p.ends_with("§4. Треугольники\n"));
        let p = paragraph_user_prompt("geometry", None, 1, "текст");
        assert!(p.contains("не определён"));
    }

    #[test]
    fn correction_user_prompt_carries_subject() {
        let p = correction_user_prompt("physics", "## Page 1\n\ntext");
        assert!(p.starts_with("Предмет: physics."));
        assert!(p.ends_with("## Page 1\n\ntext"));
    }
}
