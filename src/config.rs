//! Configuration for the extraction pipeline.
//!
//! Loaded from an optional TOML file with environment overrides for
//! credentials. Every tuning knob the heuristics use lives here; nothing
//! in the pipeline reads hidden global state.

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::banks::BankEntry;
use crate::strategies::StrategyKind;

/// Text-density thresholds for document classification.
///
/// Empirical tuning knobs, not physical constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Above this average chars/page the document is native.
    #[serde(default = "default_native_min")]
    pub native_min_chars_per_page: f64,
    /// Above this a scanned document counts as a good scan.
    #[serde(default = "default_good_scan_min")]
    pub good_scan_min_chars_per_page: f64,
    /// At or below this the text layer is considered absent.
    #[serde(default = "default_scanned_min")]
    pub scanned_min_chars_per_page: f64,
}

fn default_native_min() -> f64 {
    500.0
}
fn default_good_scan_min() -> f64 {
    200.0
}
fn default_scanned_min() -> f64 {
    50.0
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            native_min_chars_per_page: default_native_min(),
            good_scan_min_chars_per_page: default_good_scan_min(),
            scanned_min_chars_per_page: default_scanned_min(),
        }
    }
}

/// How to choose among multiple closing-balance candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosingBalancePolicy {
    /// Prefer the occurrence nearest the document end.
    LastOccurrence,
    /// Legacy behavior: pick the maximum numeric value. Known to misfire
    /// on negative balances and multi-account statements.
    MaxValue,
}

impl Default for ClosingBalancePolicy {
    fn default() -> Self {
        Self::LastOccurrence
    }
}

/// Knobs for the layout-text parsing strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_layout_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_description_len")]
    pub max_description_len: usize,
    /// Amounts above this magnitude are rejected as parse noise.
    #[serde(default = "default_max_amount")]
    pub max_amount: Decimal,
    /// Max distance in character columns for snapping a number to a header
    /// anchor.
    #[serde(default = "default_column_tolerance")]
    pub column_tolerance: usize,
    #[serde(default)]
    pub closing_balance_policy: ClosingBalancePolicy,
}

fn default_layout_timeout() -> u64 {
    10
}
fn default_max_description_len() -> usize {
    200
}
fn default_max_amount() -> Decimal {
    Decimal::new(50_000_000, 0)
}
fn default_column_tolerance() -> usize {
    10
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_layout_timeout(),
            max_description_len: default_max_description_len(),
            max_amount: default_max_amount(),
            column_tolerance: default_column_tolerance(),
            closing_balance_policy: ClosingBalancePolicy::default(),
        }
    }
}

/// External OCR/table-detection worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrServiceConfig {
    /// Base URL of the worker. Unset means the strategy is unavailable.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_ocr_language")]
    pub language: String,
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
}

fn default_ocr_language() -> String {
    "eng".to_string()
}
fn default_ocr_timeout() -> u64 {
    60
}

impl Default for OcrServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            language: default_ocr_language(),
            timeout_secs: default_ocr_timeout(),
        }
    }
}

/// Vision-model extraction backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// API key; sourced from `LEDGERSCAN_VISION_API_KEY` or
    /// `GEMINI_API_KEY` when not set here. Unset means unavailable.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_vision_api_base")]
    pub api_base: String,
    #[serde(default = "default_vision_model")]
    pub model: String,
    #[serde(default = "default_vision_timeout")]
    pub timeout_secs: u64,
    /// Pages rendered and sent per document.
    #[serde(default = "default_vision_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_vision_dpi")]
    pub render_dpi: u32,
}

fn default_vision_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_vision_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_vision_timeout() -> u64 {
    90
}
fn default_vision_max_pages() -> u32 {
    8
}
fn default_vision_dpi() -> u32 {
    200
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_vision_api_base(),
            model: default_vision_model(),
            timeout_secs: default_vision_timeout(),
            max_pages: default_vision_max_pages(),
            render_dpi: default_vision_dpi(),
        }
    }
}

/// Strategy selection and escalation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Explicit strategy order. Empty means automatic: prefer the vision
    /// model when available, otherwise classification-driven choice.
    #[serde(default)]
    pub order: Vec<StrategyKind>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_max_escalations")]
    pub max_escalations: u32,
    #[serde(default = "default_enable_reconciliation")]
    pub enable_reconciliation: bool,
}

fn default_confidence_threshold() -> f32 {
    0.7
}
fn default_max_escalations() -> u32 {
    2
}
fn default_enable_reconciliation() -> bool {
    true
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            confidence_threshold: default_confidence_threshold(),
            max_escalations: default_max_escalations(),
            enable_reconciliation: default_enable_reconciliation(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub ocr: OcrServiceConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    /// Extra bank keyword entries appended to the built-in table.
    #[serde(default)]
    pub extra_banks: Vec<BankEntry>,
}

impl Config {
    /// Load configuration from an optional TOML file plus env overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply environment overrides for credentials and endpoints.
    pub fn apply_env(&mut self) {
        if self.ocr.endpoint.is_none() {
            self.ocr.endpoint = non_empty_env("LEDGERSCAN_OCR_ENDPOINT");
        }
        if self.vision.api_key.is_none() {
            self.vision.api_key = non_empty_env("LEDGERSCAN_VISION_API_KEY")
                .or_else(|| non_empty_env("GEMINI_API_KEY"));
        }
    }

    /// Per-strategy call timeout.
    pub fn strategy_timeout(&self, kind: StrategyKind) -> Duration {
        let secs = match kind {
            StrategyKind::LayoutText => self.layout.timeout_secs,
            StrategyKind::Ocr => self.ocr.timeout_secs,
            StrategyKind::VisionModel => self.vision.timeout_secs,
        };
        Duration::from_secs(secs)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
