//! Text-layer extraction from PDF bytes using poppler tools.
//!
//! Shells out to `pdfinfo` for page counts, `pdftotext -layout` for the
//! text layer, and `pdftoppm` for page images. Every invocation writes to
//! its own scoped temp path; cleanup is RAII on all exit paths. Children
//! spawn with `kill_on_drop` so cancelling the calling future does not
//! leak a subprocess.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::{NamedTempFile, TempDir};
use thiserror::Error;
use tokio::process::Command;

/// Errors from the text-layer capability.
#[derive(Debug, Error)]
pub enum PdfTextError {
    #[error("external tool not found: {0}")]
    ToolNotFound(String),

    #[error("text extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recovered text layer of a document.
#[derive(Debug, Clone)]
pub struct TextLayer {
    /// Per-page text, index 0 = page 1.
    pub pages: Vec<String>,
    pub page_count: u32,
}

impl TextLayer {
    /// All pages joined with newlines.
    pub fn full_text(&self) -> String {
        self.pages.join("\n")
    }
}

/// Capability: given PDF bytes, return the raw text layer and page count,
/// or indicate extraction is impossible.
#[async_trait]
pub trait TextLayerExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8]) -> Result<TextLayer, PdfTextError>;
}

/// Check if a binary is available in PATH.
pub fn check_binary(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Handle command output, extracting stdout on success.
fn handle_output(
    output: std::process::Output,
    error_prefix: &str,
) -> Result<String, PdfTextError> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(PdfTextError::ExtractionFailed(format!(
            "{}: {}",
            error_prefix,
            stderr.trim()
        )))
    }
}

fn map_spawn_err(e: std::io::Error, tool: &str, hint: &str) -> PdfTextError {
    if e.kind() == std::io::ErrorKind::NotFound {
        PdfTextError::ToolNotFound(format!("{} ({})", tool, hint))
    } else {
        PdfTextError::Io(e)
    }
}

/// Poppler-backed text-layer extractor.
#[derive(Debug, Clone)]
pub struct PdfToText {
    /// DPI for page image rendering.
    render_dpi: u32,
}

impl Default for PdfToText {
    fn default() -> Self {
        Self { render_dpi: 200 }
    }
}

impl PdfToText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_render_dpi(mut self, dpi: u32) -> Self {
        self.render_dpi = dpi;
        self
    }

    /// Write bytes to a scoped temp file for the external tools.
    async fn write_temp_pdf(&self, bytes: &[u8]) -> Result<NamedTempFile, PdfTextError> {
        let tmp = tempfile::Builder::new()
            .prefix("ledgerscan-")
            .suffix(".pdf")
            .tempfile()?;
        tokio::fs::write(tmp.path(), bytes).await?;
        Ok(tmp)
    }

    /// Get the page count of a PDF via pdfinfo.
    async fn page_count(&self, pdf_path: &Path) -> Result<u32, PdfTextError> {
        let output = Command::new("pdfinfo")
            .arg(pdf_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| map_spawn_err(e, "pdfinfo", "install poppler-utils"))?;

        let stdout = handle_output(output, "pdfinfo failed")?;
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix("Pages:") {
                if let Ok(n) = rest.trim().parse::<u32>() {
                    return Ok(n);
                }
            }
        }
        Err(PdfTextError::ExtractionFailed(
            "pdfinfo reported no page count".to_string(),
        ))
    }

    /// Run pdftotext on a single page, preserving layout columns.
    async fn page_text(&self, pdf_path: &Path, page: u32) -> Result<String, PdfTextError> {
        let page_str = page.to_string();
        let output = Command::new("pdftotext")
            .args(["-layout", "-enc", "UTF-8", "-f", &page_str, "-l", &page_str])
            .arg(pdf_path)
            .arg("-")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| map_spawn_err(e, "pdftotext", "install poppler-utils"))?;

        handle_output(output, &format!("pdftotext failed on page {}", page))
    }

    /// Render the first `max_pages` pages to PNG bytes via pdftoppm.
    ///
    /// Used by the vision strategy to build inline image payloads.
    pub async fn render_page_images(
        &self,
        bytes: &[u8],
        max_pages: u32,
    ) -> Result<Vec<Vec<u8>>, PdfTextError> {
        let tmp = self.write_temp_pdf(bytes).await?;
        let out_dir = TempDir::new()?;
        let prefix = out_dir.path().join("page");

        let last = max_pages.max(1).to_string();
        let dpi = self.render_dpi.to_string();
        let status = Command::new("pdftoppm")
            .args(["-png", "-r", &dpi, "-f", "1", "-l", &last])
            .arg(tmp.path())
            .arg(&prefix)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| map_spawn_err(e, "pdftoppm", "install poppler-utils"))?;

        if !status.success() {
            return Err(PdfTextError::ExtractionFailed(
                "pdftoppm failed to render pages".to_string(),
            ));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(out_dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "png").unwrap_or(false))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(PdfTextError::ExtractionFailed(
                "no page images generated".to_string(),
            ));
        }

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            images.push(tokio::fs::read(&path).await?);
        }
        Ok(images)
    }

    /// Report availability of the external tools this module uses.
    pub fn check_tools() -> Vec<(String, bool)> {
        ["pdftotext", "pdfinfo", "pdftoppm"]
            .iter()
            .map(|tool| (tool.to_string(), check_binary(tool)))
            .collect()
    }
}

#[async_trait]
impl TextLayerExtractor for PdfToText {
    async fn extract(&self, bytes: &[u8]) -> Result<TextLayer, PdfTextError> {
        let tmp = self.write_temp_pdf(bytes).await?;
        let page_count = self.page_count(tmp.path()).await?;

        let mut pages = Vec::with_capacity(page_count as usize);
        for page in 1..=page_count {
            match self.page_text(tmp.path(), page).await {
                Ok(text) => pages.push(text),
                Err(e) => {
                    tracing::debug!("pdftotext failed on page {}: {}", page, e);
                    pages.push(String::new());
                }
            }
        }

        Ok(TextLayer { pages, page_count })
    }
}
