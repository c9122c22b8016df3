//! The terminal artifact of one orchestration run.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::NormalizedTransaction;
use crate::reconcile::ReconciliationVerdict;
use crate::strategies::StrategyKind;

/// Which extraction path produced the final result.
///
/// `Hybrid` is the composite tag used whenever escalation ran more than one
/// strategy during the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    LayoutText,
    Ocr,
    VisionModel,
    Hybrid,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LayoutText => "layout_text",
            Self::Ocr => "ocr",
            Self::VisionModel => "vision_model",
            Self::Hybrid => "hybrid",
        }
    }
}

impl From<StrategyKind> for ExtractionMethod {
    fn from(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::LayoutText => Self::LayoutText,
            StrategyKind::Ocr => Self::Ocr,
            StrategyKind::VisionModel => Self::VisionModel,
        }
    }
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of processing one document.
///
/// Escalation replaces the candidate result wholesale under the merge
/// policy; `errors` and `warnings` accumulate across every attempt and are
/// never overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    /// `true` iff the final transaction count is greater than zero.
    pub success: bool,
    pub method: ExtractionMethod,
    /// Every strategy attempted during this run, in order.
    pub strategies_tried: Vec<StrategyKind>,
    pub transactions: Vec<NormalizedTransaction>,
    pub opening_balance: Option<Decimal>,
    pub closing_balance: Option<Decimal>,
    pub bank_detected: Option<String>,
    /// Confidence of the accepted attempt, 0.0..=1.0.
    pub overall_confidence: f32,
    /// Verdict for the accepted attempt, when reconciliation was enabled.
    pub reconciliation: Option<ReconciliationVerdict>,
    /// Strategy-attributed diagnostics from every attempt.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Wall-clock processing time. Metadata only; never drives control flow.
    pub duration_ms: u64,
}
