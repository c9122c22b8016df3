//! OCR-service extraction strategy.
//!
//! Delegates scanned documents to the external OCR/table-detection worker.
//! The core owns only the request/response contract and the timeout policy;
//! recognition internals live behind the endpoint.

use std::time::Duration;

use base64::Engine;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ExtractionStrategy, StrategyError, StrategyKind, StrategyOutput};
use crate::config::OcrServiceConfig;
use crate::models::{BoundingBox, RawTransaction, SignedType, SourceLocation};

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    pdf_base64: String,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    success: bool,
    #[serde(default)]
    transactions: Vec<OcrTransaction>,
    opening_balance: Option<Decimal>,
    closing_balance: Option<Decimal>,
    confidence: Option<f32>,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OcrTransaction {
    date: Option<String>,
    #[serde(default)]
    description: String,
    amount: Option<Decimal>,
    #[serde(rename = "type")]
    kind: Option<String>,
    balance: Option<Decimal>,
    confidence: Option<f32>,
    bbox: Option<OcrBbox>,
    raw_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OcrBbox {
    page: Option<u32>,
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
}

impl OcrTransaction {
    fn into_raw(self, fallback_confidence: f32) -> RawTransaction {
        let source = self.bbox.map(|b| SourceLocation {
            page: b.page.unwrap_or(1),
            bbox: Some(BoundingBox {
                x1: b.x1,
                y1: b.y1,
                x2: b.x2,
                y2: b.y2,
            }),
        });
        let raw_text = self.raw_text.unwrap_or_else(|| self.description.clone());
        RawTransaction {
            date: self.date,
            description: self.description,
            amount: self.amount,
            signed_type: self
                .kind
                .as_deref()
                .map(SignedType::from_str)
                .unwrap_or(SignedType::Unknown),
            running_balance: self.balance,
            // A reported zero is meaningful and kept as-is.
            confidence: self.confidence.unwrap_or(fallback_confidence),
            source,
            raw_text,
        }
    }
}

/// Strategy backed by the external OCR worker endpoint.
pub struct OcrServiceStrategy {
    config: OcrServiceConfig,
    client: reqwest::Client,
}

impl OcrServiceStrategy {
    pub fn new(config: OcrServiceConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }
}

#[async_trait::async_trait]
impl ExtractionStrategy for OcrServiceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Ocr
    }

    fn is_available(&self) -> bool {
        self.config.endpoint.is_some()
    }

    fn availability_hint(&self) -> String {
        match &self.config.endpoint {
            Some(endpoint) => format!("OCR service configured at {}", endpoint),
            None => "no OCR endpoint configured (set LEDGERSCAN_OCR_ENDPOINT)".to_string(),
        }
    }

    async fn extract(&self, bytes: &[u8]) -> Result<StrategyOutput, StrategyError> {
        let endpoint = self.config.endpoint.as_ref().ok_or_else(|| {
            StrategyError::Unavailable(self.availability_hint())
        })?;
        let url = format!("{}/extract", endpoint.trim_end_matches('/'));

        let request = OcrRequest {
            pdf_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            language: &self.config.language,
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StrategyError::Timeout(self.timeout())
                } else {
                    StrategyError::Failed(format!("OCR request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StrategyError::Failed(format!(
                "OCR service error ({}): {}",
                status,
                body.trim()
            )));
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| StrategyError::Failed(format!("malformed OCR response: {}", e)))?;

        if !parsed.success && parsed.transactions.is_empty() {
            let detail = if parsed.errors.is_empty() {
                "OCR service reported failure".to_string()
            } else {
                parsed.errors.join("; ")
            };
            return Err(StrategyError::Failed(detail));
        }

        let fallback_confidence = parsed.confidence.unwrap_or(0.5);
        let transactions: Vec<RawTransaction> = parsed
            .transactions
            .into_iter()
            .map(|tx| tx.into_raw(fallback_confidence))
            .collect();

        let confidence = parsed.confidence.unwrap_or_else(|| {
            if transactions.is_empty() {
                0.0
            } else {
                transactions.iter().map(|t| t.confidence).sum::<f32>()
                    / transactions.len() as f32
            }
        });

        tracing::debug!(
            "OCR service returned {} transactions (confidence {:.2})",
            transactions.len(),
            confidence
        );

        Ok(StrategyOutput {
            transactions,
            opening_balance: parsed.opening_balance,
            closing_balance: parsed.closing_balance,
            bank_detected: None,
            confidence,
            errors: parsed.errors,
        })
    }
}
