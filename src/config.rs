//! Configuration for ingestion runs and retrieval.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. One value is threaded explicitly through every
//! entry point; no stage reads process-global settings, so two runs with
//! different configs can share a process.
//!
//! # Design choice: builder over constructor
//! Most callers change two or three fields (data directory, model, batch
//! size). The builder lets them set only those and rely on documented
//! defaults for the rest, and `build()` rejects combinations that cannot work.

use crate::error::IngestError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for ingestion and retrieval.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use textbook_ingest::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .data_dir("/var/lib/textbooks")
///     .correction_batch_size(8)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root for every artefact: OCR text, checkpoints, audit files, page
    /// images. Default: `data`.
    pub data_dir: PathBuf,

    // ── Rendering / OCR ──────────────────────────────────────────────────
    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Textbook scans are usually A4/A5; 2000 px on the long edge keeps small
    /// indices and exponents legible to the OCR model without sending
    /// multi-megabyte images.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Keep rendered PNGs under `pages/{book}/{source}/`. Default: false.
    pub keep_page_images: bool,

    // ── LLM ──────────────────────────────────────────────────────────────
    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for OCR transcription. Default: 0.0.
    pub ocr_temperature: f32,

    /// Maximum tokens the LLM may generate per call. Default: 8192.
    ///
    /// A correction batch returns ten pages of text; 8 192 tokens covers a
    /// dense batch of Cyrillic text without truncating the last page.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient API failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 180.
    pub api_timeout_secs: u64,

    // ── Normalizer ───────────────────────────────────────────────────────
    pub normalizer: NormalizerOptions,

    // ── Correction job ───────────────────────────────────────────────────
    /// Pages per correction call. Default: 10.
    pub correction_batch_size: usize,

    /// Default: 0.2.
    pub correction_temperature: f32,

    /// Skip LLM correction for pages whose normalizer score is above this.
    /// Default: `Some(95)`. `None` sends every page.
    pub quality_gate: Option<u8>,

    // ── Distribution ─────────────────────────────────────────────────────
    /// Blocks per classification call in fallback mode. Default: 18.
    pub distribution_batch_size: usize,

    /// Default: 0.1.
    pub distribution_temperature: f32,

    /// A single paragraph longer than this (chars) is not sent whole; the
    /// run falls back to block batching. Default: 24 000.
    pub paragraph_size_cap: usize,

    /// Adjacent theory/header blocks are merged while the merged text stays
    /// under this many chars. Default: 600.
    pub merge_block_cap: usize,

    /// Characters of neighbouring blocks shown as context. Default: 160.
    pub context_snippet_chars: usize,

    // ── Segmentation ─────────────────────────────────────────────────────
    /// A flushed problem buffer shorter than this is noise. Default: 20.
    pub min_problem_len: usize,

    /// Theory shorter than this is dropped. Default: 50.
    pub min_theory_len: usize,

    /// Write `doc_maps/{book}/{source}.json` on each run. Default: true.
    pub save_doc_map: bool,

    // ── Retrieval ────────────────────────────────────────────────────────
    /// Default result count. Default: 5.
    pub search_limit: usize,

    /// Minimum top score for a confident answer. Default: 0.15.
    pub confidence_threshold: f64,

    /// Implicit phrase → part mapping, tried in order when the query names
    /// no part explicitly.
    ///
    /// The defaults were read off one geometry textbook's phrasing
    /// ("один на 80° больше другого" is always part 1 there). Replace them
    /// per book series.
    pub part_hints: Vec<PartHint>,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            max_rendered_pixels: 2000,
            password: None,
            keep_page_images: false,
            model: None,
            provider_name: None,
            provider: None,
            ocr_temperature: 0.0,
            max_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 180,
            normalizer: NormalizerOptions::default(),
            correction_batch_size: 10,
            correction_temperature: 0.2,
            quality_gate: Some(95),
            distribution_batch_size: 18,
            distribution_temperature: 0.1,
            paragraph_size_cap: 24_000,
            merge_block_cap: 600,
            context_snippet_chars: 160,
            min_problem_len: 20,
            min_theory_len: 50,
            save_doc_map: true,
            search_limit: 5,
            confidence_threshold: 0.15,
            part_hints: DEFAULT_PART_HINTS.clone(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("data_dir", &self.data_dir)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("normalizer", &self.normalizer)
            .field("correction_batch_size", &self.correction_batch_size)
            .field("quality_gate", &self.quality_gate)
            .field("distribution_batch_size", &self.distribution_batch_size)
            .field("paragraph_size_cap", &self.paragraph_size_cap)
            .field("search_limit", &self.search_limit)
            .field("part_hints", &self.part_hints.len())
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn keep_page_images(mut self, v: bool) -> Self {
        self.config.keep_page_images = v;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn normalizer(mut self, opts: NormalizerOptions) -> Self {
        self.config.normalizer = opts;
        self
    }

    pub fn correction_batch_size(mut self, n: usize) -> Self {
        self.config.correction_batch_size = n.max(1);
        self
    }

    pub fn correction_temperature(mut self, t: f32) -> Self {
        self.config.correction_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn quality_gate(mut self, gate: Option<u8>) -> Self {
        self.config.quality_gate = gate.map(|g| g.min(100));
        self
    }

    pub fn distribution_batch_size(mut self, n: usize) -> Self {
        self.config.distribution_batch_size = n.max(1);
        self
    }

    pub fn distribution_temperature(mut self, t: f32) -> Self {
        self.config.distribution_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn paragraph_size_cap(mut self, chars: usize) -> Self {
        self.config.paragraph_size_cap = chars;
        self
    }

    pub fn merge_block_cap(mut self, chars: usize) -> Self {
        self.config.merge_block_cap = chars;
        self
    }

    pub fn min_problem_len(mut self, chars: usize) -> Self {
        self.config.min_problem_len = chars;
        self
    }

    pub fn min_theory_len(mut self, chars: usize) -> Self {
        self.config.min_theory_len = chars;
        self
    }

    pub fn save_doc_map(mut self, v: bool) -> Self {
        self.config.save_doc_map = v;
        self
    }

    pub fn search_limit(mut self, n: usize) -> Self {
        self.config.search_limit = n.max(1);
        self
    }

    pub fn confidence_threshold(mut self, t: f64) -> Self {
        self.config.confidence_threshold = t;
        self
    }

    pub fn part_hints(mut self, hints: Vec<PartHint>) -> Self {
        self.config.part_hints = hints;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, IngestError> {
        let c = &self.config;
        if c.data_dir.as_os_str().is_empty() {
            return Err(IngestError::InvalidConfig(
                "data_dir must not be empty".into(),
            ));
        }
        if c.paragraph_size_cap < c.merge_block_cap {
            return Err(IngestError::InvalidConfig(format!(
                "paragraph_size_cap ({}) must be ≥ merge_block_cap ({})",
                c.paragraph_size_cap, c.merge_block_cap
            )));
        }
        if c.max_tokens == 0 {
            return Err(IngestError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Normalizer options ───────────────────────────────────────────────────

/// Optional steps of the OCR normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizerOptions {
    /// Repair a single out-of-sequence `N)` enumerator. Default: true.
    pub repair_numbering: bool,
    /// Edit-distance correction against the domain vocabulary. Default: false.
    pub vocabulary_correction: bool,
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            repair_numbering: true,
            vocabulary_correction: false,
        }
    }
}

// ── Part hints ───────────────────────────────────────────────────────────

/// One implicit phrase → part rule used by retrieval.
#[derive(Debug, Clone)]
pub struct PartHint {
    pub pattern: Regex,
    pub part: String,
}

impl PartHint {
    /// Compile a case-insensitive hint.
    pub fn new(pattern: &str, part: impl Into<String>) -> Result<Self, IngestError> {
        let pattern = Regex::new(&format!("(?i){pattern}")).map_err(|e| {
            IngestError::InvalidConfig(format!("invalid part hint pattern '{pattern}': {e}"))
        })?;
        Ok(Self {
            pattern,
            part: part.into(),
        })
    }
}

static DEFAULT_PART_HINTS: Lazy<Vec<PartHint>> = Lazy::new(|| {
    [
        (r"на\s+\d+\s*(?:°|градус(?:ов|а)?)", "1"),
        (r"разность\s+равна", "2"),
        (r"в\s+\d+\s*раз", "3"),
        (r"\bравны\b", "4"),
    ]
    .into_iter()
    .map(|(p, part)| PartHint::new(p, part).unwrap())
    .collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = PipelineConfig::default();
        assert_eq!(c.correction_batch_size, 10);
        assert_eq!(c.distribution_batch_size, 18);
        assert_eq!(c.quality_gate, Some(95));
        assert_eq!(c.part_hints.len(), 4);
        assert!(c.normalizer.repair_numbering);
        assert!(!c.normalizer.vocabulary_correction);
    }

    #[test]
    fn builder_clamps_batch_sizes() {
        let c = PipelineConfig::builder()
            .correction_batch_size(0)
            .distribution_batch_size(0)
            .build()
            .unwrap();
        assert_eq!(c.correction_batch_size, 1);
        assert_eq!(c.distribution_batch_size, 1);
    }

    #[test]
    fn builder_rejects_empty_data_dir() {
        let err = PipelineConfig::builder().data_dir("").build().unwrap_err();
        assert!(err.to_string().contains("data_dir"), "got: {err}");
    }

    #[test]
    fn builder_rejects_paragraph_cap_below_merge_cap() {
        let err = PipelineConfig::builder()
            .merge_block_cap(1000)
            .paragraph_size_cap(500)
            .build()
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(_)));
    }

    #[test]
    fn invalid_part_hint_is_config_error() {
        let err = PartHint::new("(unclosed", "1").unwrap_err();
        assert!(err.to_string().contains("part hint"), "got: {err}");
    }

    #[test]
    fn default_hints_cover_degree_phrase() {
        let c = PipelineConfig::default();
        let hit = c
            .part_hints
            .iter()
            .find(|h| h.pattern.is_match("один на 80 градусов больше"))
            .map(|h| h.part.as_str());
        assert_eq!(hit, Some("1"));
    }

    #[test]
    fn debug_hides_provider() {
        let c = PipelineConfig::default();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("PipelineConfig"));
        assert!(dbg.contains("provider: None"));
    }
}
