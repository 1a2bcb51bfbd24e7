//! PDF rasterisation.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and keeps
//! thread-local state. Rendering runs on the blocking pool so the tokio
//! workers driving LLM calls never stall.
//!
//! ## Why cap pixels, not DPI?
//!
//! Scans come in at anything from 150 to 600 DPI and A5 to A3. Capping the
//! longest edge keeps memory bounded and the image inside the range vision
//! models read best, whatever the physical size.
//!
//! [`Rasterizer`] is the seam: [`PdfiumRasterizer`] for real documents, and
//! tests hand the pipeline pre-made pages instead.

use crate::error::IngestError;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One rendered page, or the reason it could not be rendered.
pub type RenderedPage = (usize, Result<DynamicImage, String>);

/// Turns a PDF into page images.
///
/// A document that cannot be opened is fatal; a single page that fails to
/// render is returned as `Err` in its slot so the run can continue.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn page_count(&self, pdf_path: &Path) -> Result<usize, IngestError>;

    /// Render pages by 0-based index, in the order given.
    async fn render_pages(
        &self,
        pdf_path: &Path,
        page_indices: &[usize],
    ) -> Result<Vec<RenderedPage>, IngestError>;
}

/// pdfium-backed [`Rasterizer`].
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    max_pixels: u32,
    password: Option<String>,
}

impl PdfiumRasterizer {
    pub fn new(max_pixels: u32, password: Option<String>) -> Self {
        Self {
            max_pixels,
            password,
        }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn page_count(&self, pdf_path: &Path) -> Result<usize, IngestError> {
        let path = pdf_path.to_path_buf();
        let password = self.password.clone();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium()?;
            let document = open_document(&pdfium, &path, password.as_deref())?;
            Ok(document.pages().len() as usize)
        })
        .await
        .map_err(|e| IngestError::Internal(format!("Page count task panicked: {}", e)))?
    }

    async fn render_pages(
        &self,
        pdf_path: &Path,
        page_indices: &[usize],
    ) -> Result<Vec<RenderedPage>, IngestError> {
        let path = pdf_path.to_path_buf();
        let max_pixels = self.max_pixels;
        let password = self.password.clone();
        let indices = page_indices.to_vec();

        tokio::task::spawn_blocking(move || {
            render_pages_blocking(&path, max_pixels, password.as_deref(), &indices)
        })
        .await
        .map_err(|e| IngestError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Bind pdfium from `PDFIUM_LIB_PATH` (or the working directory), then from
/// the system library path.
fn bind_pdfium() -> Result<Pdfium, IngestError> {
    let dir = std::env::var("PDFIUM_LIB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./"));
    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| IngestError::PdfiumBindingFailed(format!("{:?}", e)))
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, IngestError> {
    if !pdf_path.exists() {
        return Err(IngestError::FileNotFound {
            path: pdf_path.to_path_buf(),
        });
    }
    pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| IngestError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{:?}", e),
        })
}

fn render_pages_blocking(
    pdf_path: &Path,
    max_pixels: u32,
    password: Option<&str>,
    page_indices: &[usize],
) -> Result<Vec<RenderedPage>, IngestError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_path, password)?;
    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(page_indices.len());
    for &idx in page_indices {
        if idx >= total_pages {
            warn!(
                "Skipping page {} (out of range, total={})",
                idx + 1,
                total_pages
            );
            continue;
        }

        let rendered = render_one(&pages, idx, &render_config);

        match &rendered {
            Ok(image) => debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            ),
            Err(e) => warn!("Page {}: render failed — {}", idx + 1, e),
        }
        results.push((idx, rendered));
    }

    Ok(results)
}

fn render_one(
    pages: &PdfPages<'_>,
    idx: usize,
    render_config: &PdfRenderConfig,
) -> Result<DynamicImage, String> {
    let page = pages.get(idx as u16).map_err(|e| format!("{:?}", e))?;
    let bitmap = page
        .render_with_config(render_config)
        .map_err(|e| format!("{:?}", e))?;
    Ok(bitmap.as_image())
}
