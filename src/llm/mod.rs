//! Everything that talks to a language model.
//!
//! 1. [`provider`]   — resolve an `edgequake_llm` provider from config/env
//! 2. [`completion`] — the `complete(system, prompt, temperature)` seam with
//!    retry and per-call timeout
//! 3. [`structured`] — parse → repair → persist-and-fail contract for JSON
//! 4. [`prompts`]    — OCR, correction and distribution prompts

pub mod completion;
pub mod prompts;
pub mod provider;
pub mod structured;

pub use completion::{CompletionService, ProviderCompletion};
pub use structured::{call_structured, parse_json, repair_json, StructuredRequest};
