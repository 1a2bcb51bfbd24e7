//! Structured LLM output: parse, repair, or persist and fail.
//!
//! ## Why
//!
//! Models asked for JSON sometimes wrap it in a markdown fence, add a
//! sentence before it, or stop mid-array when they hit the token limit.
//! Each call here follows the same three steps:
//!
//! 1. `parse(raw)`
//! 2. `parse(repair_json(raw))`: fence stripped, leading chatter dropped,
//!    open strings and brackets closed
//! 3. persist `raw` to `llm_audit/{book}/{source}/{ts}_{mode}.json` and
//!    return [`LlmError::Unparseable`] carrying that path
//!
//! No path drops or fabricates a result; every terminal failure leaves an
//! artefact that reproduces it.

use super::completion::CompletionService;
use crate::error::LlmError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n?(.*?)\s*```\s*$").unwrap());

/// One structured call.
#[derive(Debug, Clone, Copy)]
pub struct StructuredRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub temperature: f32,
    /// Label in the audit file name, e.g. `distribute_paragraph`.
    pub mode: &'a str,
    /// Directory that receives the raw response on failure.
    pub audit_dir: &'a Path,
}

/// Call the model once and parse its response with `parse`.
pub async fn call_structured<T, F>(
    service: &dyn CompletionService,
    request: StructuredRequest<'_>,
    parse: F,
) -> Result<T, LlmError>
where
    F: Fn(&str) -> Result<T, String>,
{
    let raw = service
        .complete(request.system, request.prompt, request.temperature)
        .await?;
    parse_or_audit(&raw, request.mode, request.audit_dir, parse)
}

/// Steps 1–3 without the call, for responses obtained elsewhere.
pub fn parse_or_audit<T, F>(raw: &str, mode: &str, audit_dir: &Path, parse: F) -> Result<T, LlmError>
where
    F: Fn(&str) -> Result<T, String>,
{
    let trimmed = raw.trim();
    let first_err = if trimmed.is_empty() {
        "empty response".to_string()
    } else {
        match parse(trimmed) {
            Ok(v) => return Ok(v),
            Err(e) => e,
        }
    };

    let repaired = repair_json(trimmed);
    let reason = if !repaired.is_empty() && repaired != trimmed {
        match parse(&repaired) {
            Ok(v) => {
                debug!("Structured output for '{}' parsed after repair", mode);
                return Ok(v);
            }
            Err(e) => e,
        }
    } else {
        first_err
    };

    let audit_path = persist_raw(raw, audit_dir, mode)?;
    warn!(
        "Structured output for '{}' unparseable ({}); raw saved to {}",
        mode,
        reason,
        audit_path.display()
    );
    Err(LlmError::Unparseable {
        mode: mode.to_string(),
        reason,
        audit_path,
    })
}

/// Parse function for any `serde` type.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    serde_json::from_str(raw).map_err(|e| e.to_string())
}

/// Best-effort repair of near-JSON model output.
///
/// Strips a markdown fence, drops anything before the first `{` or `[`,
/// drops a trailing comma, and closes an unterminated string plus every
/// bracket still open at the end.
pub fn repair_json(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(caps) = RE_FENCE.captures(s) {
        if let Some(inner) = caps.get(1) {
            s = inner.as_str().trim();
        }
    } else if let Some(rest) = s.strip_prefix("```") {
        // fence opened but never closed (truncated)
        s = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()).trim();
    }
    let Some(start) = s.find(['{', '[']) else {
        return s.to_string();
    };
    let s = &s[start..];

    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut end = s.len();
    for (i, ch) in s.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
                if stack.is_empty() {
                    end = i + ch.len_utf8();
                    break;
                }
            }
            _ => {}
        }
    }

    let mut out = s[..end].to_string();
    if in_string {
        out.push('"');
    }
    if !stack.is_empty() {
        let keep = out.trim_end().trim_end_matches(',').len();
        out.truncate(keep);
        out.extend(stack.iter().rev());
    }
    out
}

fn persist_raw(raw: &str, audit_dir: &Path, mode: &str) -> Result<PathBuf, LlmError> {
    let audit_err = |path: &Path, source| LlmError::AuditWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(audit_dir).map_err(|e| audit_err(audit_dir, e))?;
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let mut path = audit_dir.join(format!("{stamp}_{mode}.json"));
    let mut n = 2;
    while path.exists() {
        path = audit_dir.join(format!("{stamp}_{mode}_{n}.json"));
        n += 1;
    }
    std::fs::write(&path, raw).map_err(|e| audit_err(&path, e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Blocks {
        blocks: Vec<serde_json::Value>,
    }

    struct Canned(&'static str);

    #[async_trait]
    impl CompletionService for Canned {
        async fn complete(&self, _: &str, _: &str, _: f32) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn repair_strips_fence() {
        assert_eq!(repair_json("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn repair_closes_truncated_array() {
        let repaired = repair_json(r#"{"blocks": [{"block_id": 1}, {"block_id": 2"#);
        assert_eq!(repaired, r#"{"blocks": [{"block_id": 1}, {"block_id": 2}]}"#);
        let v: Blocks = parse_json(&repaired).unwrap();
        assert_eq!(v.blocks.len(), 2);
    }

    #[test]
    fn repair_closes_open_string_and_trailing_comma() {
        let repaired = repair_json(r#"{"blocks": [{"t": "Найди"#);
        assert_eq!(repaired, r#"{"blocks": [{"t": "Найди"}]}"#);
        assert_eq!(repair_json(r#"[1, 2,"#), "[1, 2]");
    }

    #[test]
    fn repair_drops_leading_chatter_and_trailing_text() {
        assert_eq!(
            repair_json("Here is the JSON:\n{\"a\": [1]} hope it helps"),
            "{\"a\": [1]}"
        );
    }

    #[test]
    fn repair_ignores_brackets_inside_strings() {
        let s = r#"{"t": "a } b ] c"}"#;
        assert_eq!(repair_json(s), s);
    }

    #[test]
    fn fenced_response_parses_without_audit() {
        let dir = tempfile::tempdir().unwrap();
        let svc = Canned("```json\n{\"blocks\": []}\n```");
        let req = StructuredRequest {
            system: "s",
            prompt: "p",
            temperature: 0.1,
            mode: "distribute",
            audit_dir: dir.path(),
        };
        let v: Blocks = tokio_test::block_on(call_structured(&svc, req, parse_json)).unwrap();
        assert!(v.blocks.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn garbage_is_persisted_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let audit = dir.path().join("llm_audit/1/2");
        let err = parse_or_audit::<Blocks, _>("not json at all", "distribute", &audit, parse_json)
            .unwrap_err();
        let path = err.audit_path().unwrap().to_path_buf();
        assert!(path.starts_with(&audit));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_distribute.json"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json at all");
    }

    #[test]
    fn empty_response_is_unparseable() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_or_audit::<Blocks, _>("  ", "correct", dir.path(), parse_json).unwrap_err();
        match err {
            LlmError::Unparseable { reason, .. } => assert_eq!(reason, "empty response"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn two_failures_in_one_second_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = parse_or_audit::<Blocks, _>("x", "m", dir.path(), parse_json).unwrap_err();
        let b = parse_or_audit::<Blocks, _>("y", "m", dir.path(), parse_json).unwrap_err();
        assert_ne!(a.audit_path(), b.audit_path());
    }
}
