//! Layout-text extraction strategy for native PDFs.
//!
//! Parses the column-preserving text layer (`pdftotext -layout`) into
//! transaction rows. Column positions are resolved from a detected header
//! row; a row whose amount/balance columns cannot be resolved is marked
//! `SignedType::Unknown` and emitted with a confidence penalty so it
//! surfaces for manual review instead of being silently guessed.

use std::sync::Arc;

use chrono::Datelike;
use regex::Regex;
use rust_decimal::Decimal;

use super::{ExtractionStrategy, StrategyError, StrategyKind, StrategyOutput};
use crate::banks::BankTable;
use crate::config::{ClosingBalancePolicy, LayoutConfig};
use crate::models::{RawTransaction, SignedType, SourceLocation};
use crate::pdftext::{check_binary, PdfTextError, TextLayerExtractor};

/// Lines that are statement furniture, never transactions.
const SKIP_PATTERNS: &[&str] = &[
    r"(?i)^\s*page\s+\d+",
    r"(?i)\bcontinued\b",
    r"(?i)statement\s+(?:period|date)",
    r"(?i)account\s+(?:number|no\.?)\b",
    r"(?i)customer\s+service",
    r"(?i)balance\s+(?:brought|carried)\s+forward",
    r"(?i)member\s+fdic",
    r"(?i)www\.",
];

/// Ordered date token matchers: explicit-year forms first, year-optional
/// forms last.
const DATE_PATTERNS: &[&str] = &[
    r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b",
    r"\b\d{4}-\d{1,2}-\d{1,2}\b",
    r"(?i)\b\d{1,2}\s+(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?(?:,?\s+\d{4})?",
    r"(?i)\b(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{1,2}(?:,?\s+\d{4})?",
    r"\b\d{1,2}[/-]\d{1,2}\b",
];

const OPENING_BALANCE_PATTERNS: &[&str] = &[
    r"(?i)(?:opening|beginning|starting|previous)\s+balance",
    r"(?i)balance\s+(?:brought\s+)?forward",
];

const CLOSING_BALANCE_PATTERNS: &[&str] = &[
    r"(?i)(?:closing|ending|new|current)\s+balance",
    r"(?i)balance\s+carried\s+forward",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnchorKind {
    Debit,
    Credit,
    Amount,
    Balance,
}

/// Character-column anchors recovered from a header row.
#[derive(Debug, Default)]
struct ColumnAnchors {
    columns: Vec<(AnchorKind, usize)>,
}

impl ColumnAnchors {
    fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Nearest anchor to a token midpoint, within the tolerance window.
    fn nearest(&self, mid: usize, tolerance: usize) -> Option<AnchorKind> {
        self.columns
            .iter()
            .map(|(kind, col)| (*kind, col.abs_diff(mid)))
            .min_by_key(|(_, dist)| *dist)
            .filter(|(_, dist)| *dist <= tolerance)
            .map(|(kind, _)| kind)
    }
}

/// A numeric token located on a line.
#[derive(Debug, Clone)]
struct AmountToken {
    value: Decimal,
    start: usize,
    end: usize,
    mid: usize,
}

struct Patterns {
    skip: Vec<Regex>,
    date: Vec<Regex>,
    amount: Regex,
    opening: Vec<Regex>,
    closing: Vec<Regex>,
    period_line: Regex,
    year: Regex,
}

impl Patterns {
    fn compile() -> Self {
        let build = |set: &[&str]| {
            set.iter()
                .map(|p| Regex::new(p).expect("valid pattern"))
                .collect::<Vec<_>>()
        };
        Self {
            skip: build(SKIP_PATTERNS),
            date: build(DATE_PATTERNS),
            amount: Regex::new(r"\(?-?[$£€]?\d[\d,]*(?:\.\d{1,2})?\)?").expect("valid pattern"),
            opening: build(OPENING_BALANCE_PATTERNS),
            closing: build(CLOSING_BALANCE_PATTERNS),
            period_line: Regex::new(
                r"(?i)(?:statement\s+period|statement\s+date|period\s+(?:covered|ending)|for\s+the\s+period)",
            )
            .expect("valid pattern"),
            year: Regex::new(r"\b(?:19|20)\d{2}\b").expect("valid pattern"),
        }
    }
}

/// Parse a currency token into a signed decimal.
fn parse_amount_str(raw: &str) -> Option<Decimal> {
    let negative = raw.contains('(') || raw.trim_start().starts_with('-');
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let value: Decimal = cleaned.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Extraction strategy that parses the recovered text layout.
pub struct LayoutTextStrategy {
    extractor: Arc<dyn TextLayerExtractor>,
    banks: BankTable,
    config: LayoutConfig,
    patterns: Patterns,
}

impl LayoutTextStrategy {
    pub fn new(extractor: Arc<dyn TextLayerExtractor>, banks: BankTable, config: LayoutConfig) -> Self {
        Self {
            extractor,
            banks,
            config,
            patterns: Patterns::compile(),
        }
    }

    /// End year of the statement period, when one is stated.
    fn detect_period_year(&self, text: &str) -> Option<i32> {
        let mut years: Vec<i32> = Vec::new();
        for line in text.lines() {
            if self.patterns.period_line.is_match(line) {
                for m in self.patterns.year.find_iter(line) {
                    if let Ok(y) = m.as_str().parse() {
                        years.push(y);
                    }
                }
            }
        }
        years.into_iter().max()
    }

    /// Find labelled balance amounts: `(byte offset, value)` per hit.
    fn labeled_amounts(&self, text: &str, labels: &[Regex]) -> Vec<(usize, Decimal)> {
        let mut hits = Vec::new();
        for label in labels {
            for m in label.find_iter(text) {
                let tail_end = text[m.end()..]
                    .find('\n')
                    .map(|i| m.end() + i)
                    .unwrap_or(text.len());
                let tail = &text[m.end()..tail_end];
                if let Some(am) = self.patterns.amount.find(tail) {
                    if am.start() <= 48 {
                        if let Some(value) = parse_amount_str(am.as_str()) {
                            hits.push((m.start(), value));
                        }
                    }
                }
            }
        }
        hits.sort_by_key(|(offset, _)| *offset);
        hits
    }

    fn detect_opening_balance(&self, text: &str) -> Option<Decimal> {
        self.labeled_amounts(text, &self.patterns.opening)
            .first()
            .map(|(_, value)| *value)
    }

    fn detect_closing_balance(&self, text: &str) -> Option<Decimal> {
        let hits = self.labeled_amounts(text, &self.patterns.closing);
        match self.config.closing_balance_policy {
            ClosingBalancePolicy::LastOccurrence => hits.last().map(|(_, value)| *value),
            ClosingBalancePolicy::MaxValue => {
                hits.into_iter().map(|(_, value)| value).max()
            }
        }
    }

    /// Recover column anchors from a header row near the top of a page.
    fn detect_column_anchors(&self, page_text: &str) -> ColumnAnchors {
        let keyword_sets: [(AnchorKind, &[&str]); 4] = [
            (AnchorKind::Debit, &["debit", "withdrawal", "payments out"]),
            (AnchorKind::Credit, &["credit", "deposit", "payments in"]),
            (AnchorKind::Amount, &["amount"]),
            (AnchorKind::Balance, &["balance"]),
        ];

        for line in page_text.lines().take(40) {
            let lower = line.to_lowercase();
            if !lower.contains("date") {
                continue;
            }
            // Header rows carry column labels, not values.
            if lower.chars().filter(|c| c.is_ascii_digit()).count() >= 4 {
                continue;
            }
            let mut anchors = ColumnAnchors::default();
            for (kind, keywords) in keyword_sets {
                for keyword in keywords {
                    if let Some(pos) = lower.find(keyword) {
                        anchors.columns.push((kind, pos + keyword.len() / 2));
                        break;
                    }
                }
            }
            if !anchors.is_empty() {
                return anchors;
            }
        }
        ColumnAnchors::default()
    }

    /// Locate the date token on a line: `(start, end, token, has_year)`.
    fn find_date(&self, line: &str) -> Option<(usize, usize, String, bool)> {
        for (i, pattern) in self.patterns.date.iter().enumerate() {
            if let Some(m) = pattern.find(line) {
                // Transaction dates live in the leading columns.
                if m.start() > 24 {
                    continue;
                }
                let token = m.as_str().to_string();
                let has_year = match i {
                    0 => token.split(['/', '-']).count() == 3,
                    1 => true,
                    2 | 3 => self.patterns.year.is_match(&token),
                    _ => false,
                };
                return Some((m.start(), m.end(), token, has_year));
            }
        }
        None
    }

    /// Collect plausible amount tokens outside the date span.
    fn find_amounts(&self, line: &str, date_span: (usize, usize)) -> Vec<AmountToken> {
        let mut tokens = Vec::new();
        for m in self.patterns.amount.find_iter(line) {
            if m.start() < date_span.1 && m.end() > date_span.0 {
                continue;
            }
            let raw = m.as_str();
            // Bare integers are page/reference numbers far more often than
            // amounts; require a cents part, thousands separator, or
            // currency symbol.
            if !raw.contains('.') && !raw.contains(',') && !raw.contains(['$', '£', '€']) {
                continue;
            }
            let Some(value) = parse_amount_str(raw) else {
                continue;
            };
            if value.abs() > self.config.max_amount {
                continue;
            }
            tokens.push(AmountToken {
                value,
                start: m.start(),
                end: m.end(),
                mid: (m.start() + m.end()) / 2,
            });
        }
        tokens
    }

    fn parse_line(
        &self,
        line: &str,
        anchors: &ColumnAnchors,
        page: u32,
        fallback_year: i32,
    ) -> Option<RawTransaction> {
        if line.trim().is_empty() {
            return None;
        }
        if self.patterns.skip.iter().any(|p| p.is_match(line)) {
            return None;
        }

        let (date_start, date_end, date_token, has_year) = self.find_date(line)?;
        let date = if has_year {
            date_token.clone()
        } else if date_token.contains(['/', '-']) {
            format!("{}/{}", date_token, fallback_year)
        } else {
            format!("{} {}", date_token, fallback_year)
        };

        let amounts = self.find_amounts(line, (date_start, date_end));
        if amounts.is_empty() {
            return None;
        }

        let mut amount: Option<Decimal> = None;
        let mut signed_type = SignedType::Unknown;
        let mut running_balance: Option<Decimal> = None;
        let mut ambiguous = false;

        if !anchors.is_empty() {
            let mut unassigned: Vec<&AmountToken> = Vec::new();
            for token in &amounts {
                match anchors.nearest(token.mid, self.config.column_tolerance) {
                    Some(AnchorKind::Balance) => {
                        if running_balance.is_none() {
                            running_balance = Some(token.value);
                        }
                    }
                    Some(AnchorKind::Debit) => {
                        if amount.is_none() {
                            amount = Some(token.value);
                            signed_type = SignedType::Debit;
                        }
                    }
                    Some(AnchorKind::Credit) => {
                        if amount.is_none() {
                            amount = Some(token.value);
                            signed_type = SignedType::Credit;
                        }
                    }
                    Some(AnchorKind::Amount) => {
                        if amount.is_none() {
                            amount = Some(token.value);
                            signed_type = if token.value.is_sign_negative() {
                                SignedType::Debit
                            } else {
                                SignedType::Credit
                            };
                        }
                    }
                    None => unassigned.push(token),
                }
            }
            if amount.is_none() {
                if let Some(token) = unassigned.first() {
                    amount = Some(token.value);
                    signed_type = if token.value.is_sign_negative() {
                        SignedType::Debit
                    } else {
                        SignedType::Unknown
                    };
                    ambiguous = unassigned.len() > 1;
                }
            }
        } else if amounts.len() == 1 {
            let token = &amounts[0];
            amount = Some(token.value);
            signed_type = if token.value.is_sign_negative() {
                SignedType::Debit
            } else {
                SignedType::Credit
            };
        } else {
            // No anchors to resolve amount vs. running balance. Keep the
            // conventional rightmost-is-balance assignment but mark the row
            // unknown so it is surfaced for review, not silently guessed.
            let mut by_col: Vec<&AmountToken> = amounts.iter().collect();
            by_col.sort_by_key(|t| t.mid);
            let balance_token = by_col[by_col.len() - 1];
            let amount_token = by_col[by_col.len() - 2];
            running_balance = Some(balance_token.value);
            amount = Some(amount_token.value);
            signed_type = if amount_token.value.is_sign_negative() {
                SignedType::Debit
            } else {
                SignedType::Unknown
            };
            ambiguous = true;
        }

        let amount = amount?;

        // Description = residual text outside the date and amount spans.
        let mut covered: Vec<(usize, usize)> = vec![(date_start, date_end)];
        covered.extend(amounts.iter().map(|t| (t.start, t.end)));
        let mut description = String::new();
        for (i, ch) in line.char_indices() {
            if covered.iter().any(|(s, e)| i >= *s && i < *e) {
                continue;
            }
            description.push(ch);
        }
        let description: String = description
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(self.config.max_description_len)
            .collect();

        let mut confidence: f32 = 0.4;
        if !amount.is_zero() {
            confidence += 0.4;
        }
        if description.chars().count() >= 4 {
            confidence += 0.2;
        }
        if ambiguous || signed_type == SignedType::Unknown {
            confidence -= 0.2;
        }

        Some(RawTransaction {
            date: Some(date),
            description,
            amount: Some(amount),
            signed_type,
            running_balance,
            confidence: confidence.clamp(0.0, 1.0),
            source: Some(SourceLocation { page, bbox: None }),
            raw_text: line.trim_end().to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ExtractionStrategy for LayoutTextStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LayoutText
    }

    fn is_available(&self) -> bool {
        check_binary("pdftotext")
    }

    fn availability_hint(&self) -> String {
        if self.is_available() {
            "layout-text extraction is available".to_string()
        } else {
            "pdftotext not found (install poppler-utils)".to_string()
        }
    }

    async fn extract(&self, bytes: &[u8]) -> Result<StrategyOutput, StrategyError> {
        let layer = self.extractor.extract(bytes).await.map_err(|e| match e {
            PdfTextError::ToolNotFound(tool) => StrategyError::Unavailable(tool),
            other => StrategyError::Failed(other.to_string()),
        })?;

        let full_text = layer.full_text();
        if full_text.trim().is_empty() {
            return Ok(StrategyOutput {
                errors: vec!["text layer is empty".to_string()],
                ..Default::default()
            });
        }

        let fallback_year = self
            .detect_period_year(&full_text)
            .unwrap_or_else(|| chrono::Utc::now().year());

        let mut transactions = Vec::new();
        for (page_index, page_text) in layer.pages.iter().enumerate() {
            let anchors = self.detect_column_anchors(page_text);
            for line in page_text.lines() {
                if let Some(tx) =
                    self.parse_line(line, &anchors, page_index as u32 + 1, fallback_year)
                {
                    transactions.push(tx);
                }
            }
        }

        let confidence = if transactions.is_empty() {
            0.0
        } else {
            transactions.iter().map(|t| t.confidence).sum::<f32>() / transactions.len() as f32
        };

        tracing::debug!(
            "layout strategy parsed {} rows across {} pages",
            transactions.len(),
            layer.page_count
        );

        Ok(StrategyOutput {
            opening_balance: self.detect_opening_balance(&full_text),
            closing_balance: self.detect_closing_balance(&full_text),
            bank_detected: self.banks.detect(&full_text),
            transactions,
            confidence,
            errors: Vec::new(),
        })
    }
}
