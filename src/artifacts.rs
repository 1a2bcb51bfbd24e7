//! Path-stable artefacts under the data directory.
//!
//! ```text
//! {data_dir}/
//!   ocr_raw/{book}/{source}_{model}.md                 raw OCR, one blob per source
//!   ocr_normalized/{book}/{source}.md                  normalized (and corrected) text
//!   ocr_normalized/{book}/{source}.llm_checkpoint.json correction checkpoint
//!   ocr_normalized/{book}/{source}.llm_corrected.json  pages already LLM-corrected
//!   doc_maps/{book}/{source}.json                      document map
//!   pages/{book}/{source}/{n}.png                      rendered page images
//!   llm_audit/{book}/{source}/{ts}_{mode}.json         unparseable LLM responses
//! ```
//!
//! Text blobs start with a `# Book …` header followed by one `## Page N`
//! section per page (N 1-based). Older files used `## Страница N`; both
//! headings are read.
//!
//! Every write goes through a temp file in the target directory followed by
//! a rename, so a reader never sees a half-written artefact.

use crate::error::IngestError;
use crate::pipeline::encode::png_bytes;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

static RE_PAGE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^##\s+(?:Page|Страница)\s+(\d+)\s*$").unwrap());

/// Resolves and reads/writes every artefact of the pipeline.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    data_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // ── Paths ────────────────────────────────────────────────────────────

    pub fn raw_ocr_path(&self, book_id: i64, source_id: i64, model: &str) -> PathBuf {
        self.data_dir
            .join("ocr_raw")
            .join(book_id.to_string())
            .join(format!("{source_id}_{model}.md"))
    }

    pub fn normalized_path(&self, book_id: i64, source_id: i64) -> PathBuf {
        self.data_dir
            .join("ocr_normalized")
            .join(book_id.to_string())
            .join(format!("{source_id}.md"))
    }

    pub fn checkpoint_path(&self, book_id: i64, source_id: i64) -> PathBuf {
        self.data_dir
            .join("ocr_normalized")
            .join(book_id.to_string())
            .join(format!("{source_id}.llm_checkpoint.json"))
    }

    /// Pages of the normalized artefact that went through LLM correction.
    pub fn corrected_pages_path(&self, book_id: i64, source_id: i64) -> PathBuf {
        self.data_dir
            .join("ocr_normalized")
            .join(book_id.to_string())
            .join(format!("{source_id}.llm_corrected.json"))
    }

    pub fn doc_map_path(&self, book_id: i64, source_id: i64) -> PathBuf {
        self.data_dir
            .join("doc_maps")
            .join(book_id.to_string())
            .join(format!("{source_id}.json"))
    }

    /// `page` is 1-based.
    pub fn page_image_path(&self, book_id: i64, source_id: i64, page: usize) -> PathBuf {
        self.data_dir
            .join("pages")
            .join(book_id.to_string())
            .join(source_id.to_string())
            .join(format!("{page}.png"))
    }

    pub fn audit_dir(&self, book_id: i64, source_id: i64) -> PathBuf {
        self.data_dir
            .join("llm_audit")
            .join(book_id.to_string())
            .join(source_id.to_string())
    }

    // ── Page blobs ───────────────────────────────────────────────────────

    /// Write `pages` (`(page_num, text)`, 1-based) as one blob.
    pub fn write_pages(
        &self,
        path: &Path,
        title: &str,
        pages: &[(usize, &str)],
    ) -> Result<(), IngestError> {
        write_atomic(path, format_pages(title, pages).as_bytes())
    }

    /// Read a page blob back into `(page_num, text)` pairs in file order.
    pub fn read_pages(&self, path: &Path) -> Result<Vec<(usize, String)>, IngestError> {
        let text = std::fs::read_to_string(path).map_err(|e| IngestError::ArtifactReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(parse_pages(&text))
    }

    // ── JSON ─────────────────────────────────────────────────────────────

    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), IngestError> {
        let json = serde_json::to_vec_pretty(value).map_err(|e| IngestError::MalformedArtifact {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        write_atomic(path, &json)
    }

    /// `Ok(None)` when the file does not exist.
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, IngestError> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(IngestError::ArtifactReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| IngestError::MalformedArtifact {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
    }

    /// Remove an artefact; a missing file is not an error.
    pub fn remove(&self, path: &Path) -> Result<(), IngestError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IngestError::ArtifactWriteFailed {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    // ── Images ───────────────────────────────────────────────────────────

    pub fn save_image(&self, path: &Path, image: &DynamicImage) -> Result<(), IngestError> {
        let png = png_bytes(image).map_err(|e| IngestError::ArtifactWriteFailed {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        })?;
        write_atomic(path, &png)
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IngestError> {
    let write_err = |source| IngestError::ArtifactWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Render pages into the blob layout.
pub fn format_pages(title: &str, pages: &[(usize, &str)]) -> String {
    let mut out = format!("# {title}\n");
    for (num, text) in pages {
        out.push_str(&format!("\n## Page {num}\n\n"));
        let body = text.trim();
        if !body.is_empty() {
            out.push_str(body);
            out.push('\n');
        }
    }
    out
}

/// Split a blob into `(page_num, text)` pairs. Text before the first page
/// heading is ignored.
pub fn parse_pages(text: &str) -> Vec<(usize, String)> {
    let mut pages = Vec::new();
    let mut current: Option<(usize, Vec<&str>)> = None;
    for line in text.lines() {
        if let Some(caps) = RE_PAGE_HEADER.captures(line.trim()) {
            if let Some((num, lines)) = current.take() {
                pages.push((num, lines.join("\n").trim().to_string()));
            }
            if let Ok(num) = caps[1].parse() {
                current = Some((num, Vec::new()));
            }
            continue;
        }
        if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some((num, lines)) = current {
        pages.push((num, lines.join("\n").trim().to_string()));
    }
    pages
}
