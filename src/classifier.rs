//! Document classification: native text layer vs. scanned images.
//!
//! Classification is fail-soft: if the text-layer capability itself breaks
//! (corrupt xref tables, missing poppler), the pipeline still deserves one
//! extraction attempt, so a degraded low-confidence result is returned
//! instead of an error. Only byte streams that are not a PDF at all are
//! rejected outright.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ClassifierConfig;
use crate::pdftext::TextLayerExtractor;

/// The byte stream is not a parseable document at all.
#[derive(Debug, Error)]
#[error("unreadable document: {0}")]
pub struct UnreadableDocument(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Native,
    Scanned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanQuality {
    Good,
    Poor,
    None,
}

/// Produced once per document; consumed by the orchestrator to pick the
/// first strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub kind: DocumentKind,
    pub scan_quality: ScanQuality,
    pub page_count: u32,
    /// Average non-whitespace characters per page.
    pub text_density: f64,
    pub has_text: bool,
    pub confidence: f32,
}

/// Classifies documents by text density of the recovered text layer.
pub struct Classifier {
    extractor: Arc<dyn TextLayerExtractor>,
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(extractor: Arc<dyn TextLayerExtractor>, config: ClassifierConfig) -> Self {
        Self { extractor, config }
    }

    /// Classify a document from its raw bytes.
    ///
    /// Fails only when the bytes are not a PDF at all; a broken text layer
    /// degrades to a low-confidence native guess so the orchestrator's
    /// escalation logic can take over.
    pub async fn classify(&self, bytes: &[u8]) -> Result<ClassificationResult, UnreadableDocument> {
        if !bytes.starts_with(b"%PDF-") {
            return Err(UnreadableDocument(
                "byte stream has no PDF header".to_string(),
            ));
        }

        let layer = match self.extractor.extract(bytes).await {
            Ok(layer) => layer,
            Err(e) => {
                tracing::warn!("text layer unavailable, degrading classification: {}", e);
                return Ok(ClassificationResult {
                    kind: DocumentKind::Native,
                    scan_quality: ScanQuality::None,
                    page_count: 0,
                    text_density: 0.0,
                    has_text: false,
                    confidence: 0.3,
                });
            }
        };

        let chars: usize = layer
            .pages
            .iter()
            .map(|p| p.chars().filter(|c| !c.is_whitespace()).count())
            .sum();
        let density = chars as f64 / layer.page_count.max(1) as f64;

        let cfg = &self.config;
        let result = if density > cfg.native_min_chars_per_page {
            ClassificationResult {
                kind: DocumentKind::Native,
                scan_quality: ScanQuality::None,
                page_count: layer.page_count,
                text_density: density,
                has_text: true,
                confidence: 0.9,
            }
        } else if density > cfg.scanned_min_chars_per_page {
            let quality = if density > cfg.good_scan_min_chars_per_page {
                ScanQuality::Good
            } else {
                ScanQuality::Poor
            };
            ClassificationResult {
                kind: DocumentKind::Scanned,
                scan_quality: quality,
                page_count: layer.page_count,
                text_density: density,
                has_text: true,
                confidence: if quality == ScanQuality::Good { 0.7 } else { 0.5 },
            }
        } else {
            ClassificationResult {
                kind: DocumentKind::Scanned,
                scan_quality: ScanQuality::None,
                page_count: layer.page_count,
                text_density: density,
                has_text: false,
                confidence: 0.6,
            }
        };

        tracing::debug!(
            "classified document: {:?}, {:.0} chars/page over {} pages",
            result.kind,
            result.text_density,
            result.page_count
        );
        Ok(result)
    }
}
