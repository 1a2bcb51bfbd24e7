//! Deterministic segmentation of page text into theory, problems and answers.
//!
//! ```text
//! pages ──▶ document map ──▶ theory   (paragraph spans)
//!                       ├──▶ problems (tasks range, or every page)
//!                       └──▶ answers  (answers span)
//! ```
//!
//! 1. [`patterns`] — the ordered marker table every other module consults
//! 2. [`problems`] — line state machine plus the multi-problem splitter
//! 3. [`parts`]    — `1) 2)` / `а) б)` sub-items of one problem
//! 4. [`answers`]  — answer-key parser
//! 5. [`theory`]   — section theory fragments and their per-book merge
//! 6. [`classify`] — question vs exercise

pub mod answers;
pub mod classify;
pub mod parts;
pub mod patterns;
pub mod problems;
pub mod theory;
