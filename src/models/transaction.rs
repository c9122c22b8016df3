//! Transaction models shared by every extraction strategy.
//!
//! `RawTransaction` is the strategy-agnostic candidate a backend emits;
//! it is never mutated after creation. Normalization produces the canonical
//! `NormalizedTransaction` rows that downstream consumers persist.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Sign classification of a candidate transaction as reported by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignedType {
    Debit,
    Credit,
    Unknown,
}

impl SignedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "debit" | "dr" | "withdrawal" => Self::Debit,
            "credit" | "cr" | "deposit" => Self::Credit,
            _ => Self::Unknown,
        }
    }
}

/// Axis-aligned bounding box in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// Where a candidate transaction was found in the source document.
///
/// Preserved end-to-end so the presentation layer can highlight the source
/// region when a user clicks a row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// 1-based page number.
    pub page: u32,
    pub bbox: Option<BoundingBox>,
}

/// A candidate transaction as produced by a single strategy invocation.
///
/// The date is free-form (not yet validated) and the amount carries whatever
/// sign the strategy saw; both are resolved during normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub date: Option<String>,
    pub description: String,
    pub amount: Option<Decimal>,
    pub signed_type: SignedType,
    pub running_balance: Option<Decimal>,
    /// Per-item confidence in 0.0..=1.0. Zero is a meaningful value.
    pub confidence: f32,
    pub source: Option<SourceLocation>,
    pub raw_text: String,
}

/// The canonical post-processing transaction row.
///
/// Invariant: `debit` and `credit` are never both `Some`. The amount sign is
/// resolved into exactly one of the two fields, or both stay `None` for
/// zero or missing amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTransaction {
    /// Stable 0-based ordering assigned by extraction order.
    pub sequence_index: usize,
    /// Strict `YYYY-MM-DD`, or `None` when no date could be parsed.
    pub iso_date: Option<String>,
    pub description: String,
    pub debit: Option<Decimal>,
    pub credit: Option<Decimal>,
    pub balance: Option<Decimal>,
    /// 0..=100. Zero is preserved, never coerced upward.
    pub confidence_percent: u8,
    /// Ghost rows are kept in the record but excluded from reconciliation.
    pub excluded: bool,
    pub source_page: Option<u32>,
    pub source_bbox: Option<BoundingBox>,
}

impl NormalizedTransaction {
    /// Signed amount of this row: credits positive, debits negative.
    pub fn signed_amount(&self) -> Decimal {
        match (self.credit, self.debit) {
            (Some(c), _) => c,
            (None, Some(d)) => -d,
            (None, None) => Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signed_type_roundtrip() {
        assert_eq!(SignedType::from_str("debit"), SignedType::Debit);
        assert_eq!(SignedType::from_str("Deposit"), SignedType::Credit);
        assert_eq!(SignedType::from_str("???"), SignedType::Unknown);
        assert_eq!(SignedType::Debit.as_str(), "debit");
    }

    #[test]
    fn signed_amount_prefers_credit() {
        let tx = NormalizedTransaction {
            sequence_index: 0,
            iso_date: None,
            description: "x".into(),
            debit: None,
            credit: Some(dec!(12.34)),
            balance: None,
            confidence_percent: 80,
            excluded: false,
            source_page: None,
            source_bbox: None,
        };
        assert_eq!(tx.signed_amount(), dec!(12.34));

        let tx = NormalizedTransaction {
            debit: Some(dec!(5.00)),
            credit: None,
            ..tx
        };
        assert_eq!(tx.signed_amount(), dec!(-5.00));
    }
}
