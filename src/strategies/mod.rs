//! Extraction strategy abstraction.
//!
//! Every backend converts a document into raw candidate transactions plus
//! balance guesses and a confidence score. The orchestrator treats
//! strategies interchangeably aside from cost ordering: layout text is the
//! cheapest, the vision model the strongest and costliest.

mod layout;
mod ocr;
mod vision;

pub use layout::LayoutTextStrategy;
pub use ocr::OcrServiceStrategy;
pub use vision::VisionModelStrategy;

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::RawTransaction;

/// Errors from extraction strategies.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("strategy not available: {0}")]
    Unavailable(String),

    #[error("strategy timed out after {0:?}")]
    Timeout(Duration),

    #[error("extraction failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Available strategy kinds, ordered by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    LayoutText,
    Ocr,
    VisionModel,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LayoutText => "layout_text",
            Self::Ocr => "ocr",
            Self::VisionModel => "vision_model",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "layout_text" | "layout" | "text" => Some(Self::LayoutText),
            "ocr" => Some(Self::Ocr),
            "vision_model" | "vision" => Some(Self::VisionModel),
            _ => None,
        }
    }

    /// Relative strength used by escalation: a retry must pick a strictly
    /// stronger strategy than the one that just ran.
    pub fn strength(&self) -> u8 {
        match self {
            Self::LayoutText => 1,
            Self::Ocr => 2,
            Self::VisionModel => 3,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Common output shape of one strategy invocation.
#[derive(Debug, Clone, Default)]
pub struct StrategyOutput {
    pub transactions: Vec<RawTransaction>,
    pub opening_balance: Option<Decimal>,
    pub closing_balance: Option<Decimal>,
    pub bank_detected: Option<String>,
    /// Overall confidence in 0.0..=1.0.
    pub confidence: f32,
    /// Non-fatal diagnostics from this attempt.
    pub errors: Vec<String>,
}

/// Trait implemented by every extraction backend.
#[async_trait::async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether this backend can run (credentials present, endpoint
    /// configured). Unavailability means "skip", never a document failure.
    fn is_available(&self) -> bool;

    /// What is needed to make this backend available.
    fn availability_hint(&self) -> String;

    /// Extract candidate transactions from document bytes.
    async fn extract(&self, bytes: &[u8]) -> Result<StrategyOutput, StrategyError>;
}
