//! Vision-model extraction strategy.
//!
//! Renders statement pages to images and asks a multimodal model for
//! structured transaction JSON. The strongest and costliest backend; it
//! handles native and scanned documents equally well and is the only one
//! with native multi-account statement support.
//!
//! Rate limiting: 429 responses retry with exponential backoff, honoring
//! the Retry-After header, before the attempt is failed.

use std::time::Duration;

use base64::Engine;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ExtractionStrategy, StrategyError, StrategyKind, StrategyOutput};
use crate::config::VisionConfig;
use crate::models::{RawTransaction, SignedType, SourceLocation};
use crate::pdftext::PdfToText;

/// Maximum retry attempts on rate limit errors.
const MAX_RETRIES: u32 = 3;

const EXTRACTION_PROMPT: &str = "\
You are reading pages of a bank statement. Extract every transaction row.\n\
Respond with ONLY a JSON object, no commentary, shaped like:\n\
{\n\
  \"bank_name\": string or null,\n\
  \"opening_balance\": number or null,\n\
  \"closing_balance\": number or null,\n\
  \"confidence\": number between 0 and 1,\n\
  \"transactions\": [{\"date\": \"MM/DD/YYYY\", \"description\": string,\n\
    \"amount\": number, \"type\": \"debit\"|\"credit\", \"balance\": number or null,\n\
    \"page\": number}],\n\
  \"accounts\": []\n\
}\n\
If the statement covers multiple accounts, leave \"transactions\" empty and\n\
instead fill \"accounts\" with objects of the same shape plus a \"name\" field.\n\
Amounts are positive numbers; use \"type\" for direction. Keep dates exactly\n\
as printed.";

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// The model's structured answer: either a flat transaction list or
/// per-account sub-objects.
#[derive(Debug, Deserialize)]
struct VisionPayload {
    #[serde(default)]
    transactions: Vec<VisionTransaction>,
    #[serde(default)]
    accounts: Vec<VisionAccount>,
    opening_balance: Option<Decimal>,
    closing_balance: Option<Decimal>,
    bank_name: Option<String>,
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct VisionAccount {
    name: Option<String>,
    #[serde(default)]
    transactions: Vec<VisionTransaction>,
    opening_balance: Option<Decimal>,
    closing_balance: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct VisionTransaction {
    date: Option<String>,
    #[serde(default)]
    description: String,
    amount: Option<Decimal>,
    #[serde(rename = "type")]
    kind: Option<String>,
    balance: Option<Decimal>,
    confidence: Option<f32>,
    page: Option<u32>,
}

impl VisionTransaction {
    fn into_raw(self, account: Option<&str>, fallback_confidence: f32) -> RawTransaction {
        let description = match account {
            Some(name) => format!("[{}] {}", name, self.description),
            None => self.description.clone(),
        };
        let raw_text = self.description;
        RawTransaction {
            date: self.date,
            description,
            amount: self.amount,
            signed_type: self
                .kind
                .as_deref()
                .map(SignedType::from_str)
                .unwrap_or(SignedType::Unknown),
            running_balance: self.balance,
            confidence: self.confidence.unwrap_or(fallback_confidence),
            source: self.page.map(|page| SourceLocation { page, bbox: None }),
            raw_text,
        }
    }
}

/// Strip markdown code fences some models wrap around JSON answers.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Sum per-account balances; `None` unless every account reports one.
fn sum_account_balances(values: &[Option<Decimal>]) -> Option<Decimal> {
    values
        .iter()
        .copied()
        .collect::<Option<Vec<Decimal>>>()
        .map(|v| v.into_iter().sum())
}

/// Normalize the model answer to the flat orchestrator-facing contract.
fn flatten_payload(payload: VisionPayload) -> StrategyOutput {
    let fallback_confidence = payload.confidence.unwrap_or(0.85);

    if payload.accounts.is_empty() {
        let transactions: Vec<RawTransaction> = payload
            .transactions
            .into_iter()
            .map(|tx| tx.into_raw(None, fallback_confidence))
            .collect();
        return StrategyOutput {
            transactions,
            opening_balance: payload.opening_balance,
            closing_balance: payload.closing_balance,
            bank_detected: payload.bank_name,
            confidence: fallback_confidence,
            errors: Vec::new(),
        };
    }

    let openings: Vec<Option<Decimal>> =
        payload.accounts.iter().map(|a| a.opening_balance).collect();
    let closings: Vec<Option<Decimal>> =
        payload.accounts.iter().map(|a| a.closing_balance).collect();

    let mut transactions = Vec::new();
    for (index, account) in payload.accounts.into_iter().enumerate() {
        let tag = account
            .name
            .unwrap_or_else(|| format!("account {}", index + 1));
        for tx in account.transactions {
            transactions.push(tx.into_raw(Some(&tag), fallback_confidence));
        }
    }

    StrategyOutput {
        transactions,
        opening_balance: sum_account_balances(&openings).or(payload.opening_balance),
        closing_balance: sum_account_balances(&closings).or(payload.closing_balance),
        bank_detected: payload.bank_name,
        confidence: fallback_confidence,
        errors: Vec::new(),
    }
}

/// Strategy backed by a multimodal extraction model.
pub struct VisionModelStrategy {
    config: VisionConfig,
    renderer: PdfToText,
    client: reqwest::Client,
}

impl VisionModelStrategy {
    pub fn new(config: VisionConfig) -> Self {
        let renderer = PdfToText::new().with_render_dpi(config.render_dpi);
        Self {
            config,
            renderer,
            client: reqwest::Client::new(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn build_request(&self, images: Vec<Vec<u8>>) -> GenerateRequest {
        let mut parts = vec![Part::Text {
            text: EXTRACTION_PROMPT.to_string(),
        }];
        for image in images {
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: "image/png".to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(image),
                },
            });
        }
        GenerateRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 8192,
                response_mime_type: "application/json",
            },
        }
    }

    async fn call_model(&self, request: &GenerateRequest) -> Result<String, StrategyError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| StrategyError::Unavailable(self.availability_hint()))?;
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.api_base.trim_end_matches('/'),
            self.config.model,
            api_key
        );

        let mut attempt = 0;
        loop {
            let response = self
                .client
                .post(&url)
                .timeout(self.timeout())
                .json(request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        StrategyError::Timeout(self.timeout())
                    } else {
                        StrategyError::Failed(format!("vision request failed: {}", e))
                    }
                })?;

            if response.status().as_u16() == 429 {
                if attempt >= MAX_RETRIES {
                    return Err(StrategyError::Failed(
                        "vision model rate limited after retries".to_string(),
                    ));
                }
                let wait = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| Duration::from_millis(1000 * 2u64.pow(attempt)));
                tracing::warn!(
                    "vision model rate limited (attempt {}), waiting {:?}",
                    attempt + 1,
                    wait
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
                continue;
            }

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(StrategyError::Failed(format!(
                    "vision API error ({}): {}",
                    status,
                    body.trim()
                )));
            }

            let parsed: GenerateResponse = response
                .json()
                .await
                .map_err(|e| StrategyError::Failed(format!("malformed vision response: {}", e)))?;

            if let Some(error) = parsed.error {
                return Err(StrategyError::Failed(format!(
                    "vision API error: {}",
                    error.message
                )));
            }

            let text = parsed
                .candidates
                .and_then(|c| c.into_iter().next())
                .and_then(|c| c.content.parts.into_iter().next())
                .and_then(|p| p.text)
                .unwrap_or_default();

            return Ok(text);
        }
    }
}

#[async_trait::async_trait]
impl ExtractionStrategy for VisionModelStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::VisionModel
    }

    fn is_available(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn availability_hint(&self) -> String {
        if self.config.api_key.is_none() {
            "vision model key not set (LEDGERSCAN_VISION_API_KEY or GEMINI_API_KEY)".to_string()
        } else {
            format!("vision model available ({})", self.config.model)
        }
    }

    async fn extract(&self, bytes: &[u8]) -> Result<StrategyOutput, StrategyError> {
        let images = self
            .renderer
            .render_page_images(bytes, self.config.max_pages)
            .await
            .map_err(|e| StrategyError::Failed(format!("page rendering failed: {}", e)))?;

        let request = self.build_request(images);
        let answer = self.call_model(&request).await?;

        let payload: VisionPayload = serde_json::from_str(strip_code_fences(&answer))
            .map_err(|e| StrategyError::Failed(format!("unparseable vision answer: {}", e)))?;

        let output = flatten_payload(payload);
        tracing::debug!(
            "vision model returned {} transactions (confidence {:.2})",
            output.transactions.len(),
            output.confidence
        );
        Ok(output)
    }
}
