//! Section theory from paragraph spans.
//!
//! Each paragraph span contributes one fragment: its text from the section
//! header up to the first tasks label or the next section header. Fragments
//! from every source of a book are merged into one [`SectionTheory`] per
//! section.

use super::patterns::{classify_line, LineKind};
use crate::document_map::DocumentMap;
use crate::model::{page_ref, SectionTheory, TheoryFragment};

/// Collect theory fragments for every paragraph span. `pages` are
/// `(page_num, text)` with 1-based numbers.
pub fn extract_fragments(
    pages: &[(usize, &str)],
    map: &DocumentMap,
    min_len: usize,
) -> Vec<TheoryFragment> {
    let mut fragments = Vec::new();
    for span in map.paragraph_spans() {
        let Some(section) = span.section.clone() else {
            continue;
        };
        let mut lines: Vec<&str> = Vec::new();
        let mut started = false;
        let mut last_page = span.start_page;

        'pages: for &(page, text) in pages {
            if !span.contains(page) {
                continue;
            }
            for line in text.lines() {
                match classify_line(line) {
                    LineKind::SectionHeader(label) if label == section && !started => {
                        started = true;
                    }
                    LineKind::SectionHeader(_) | LineKind::TasksLabel if started => {
                        break 'pages;
                    }
                    _ => {}
                }
                if started {
                    lines.push(line.trim_end());
                    last_page = page;
                }
            }
            // header lost to OCR: the span's first page still counts
            if !started && page == span.start_page {
                lines.extend(text.lines().map(str::trim_end));
                started = true;
            }
        }

        let text = lines.join("\n").trim().to_string();
        if text.chars().count() < min_len {
            tracing::debug!("{}: theory fragment too short ({} chars)", section, text.len());
            continue;
        }
        fragments.push(TheoryFragment {
            section,
            text,
            start_page: span.start_page,
            end_page: last_page,
        });
    }
    fragments
}

/// Merge fragments into one record per section, in order of first
/// appearance. Sections whose merged text is shorter than `min_len` are
/// dropped.
pub fn merge_fragments(
    book_id: i64,
    fragments: &[TheoryFragment],
    min_len: usize,
) -> Vec<SectionTheory> {
    let mut order: Vec<&str> = Vec::new();
    for f in fragments {
        if !order.contains(&f.section.as_str()) {
            order.push(&f.section);
        }
    }
    order
        .into_iter()
        .filter_map(|section| {
            let group: Vec<&TheoryFragment> =
                fragments.iter().filter(|f| f.section == section).collect();
            let text = group
                .iter()
                .map(|f| f.text.trim())
                .collect::<Vec<_>>()
                .join("\n\n");
            if text.chars().count() < min_len {
                return None;
            }
            let start = group.iter().map(|f| f.start_page).min()?;
            let end = group.iter().map(|f| f.end_page).max()?;
            Some(SectionTheory {
                book_id,
                section: section.to_string(),
                text,
                page_ref: Some(page_ref(start, end)),
            })
        })
        .collect()
}
