//! Extraction orchestration: the state machine that routes a document
//! through classification, strategy attempts, reconciliation, and bounded
//! escalation.
//!
//! The orchestrator is stateless across documents and reentrant; one call
//! to [`Pipeline::process`] is a single sequential unit of work. Each
//! attempt produces an immutable candidate value; an explicit merge
//! decision replaces the candidate only when the new attempt is strictly
//! better, so a weaker retry can never silently overwrite a better earlier
//! result. Every attempt's diagnostics accumulate into the final outcome.

use std::sync::Arc;
use std::time::Instant;

use chrono::Datelike;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::banks::BankTable;
use crate::classifier::{ClassificationResult, Classifier, DocumentKind, UnreadableDocument};
use crate::config::Config;
use crate::models::{ExtractionMethod, ExtractionOutcome, NormalizedTransaction};
use crate::normalize::normalize_transactions;
use crate::pdftext::{PdfToText, TextLayerExtractor};
use crate::reconcile::{reconcile, validate_running_balances, ReconciliationVerdict};
use crate::strategies::{
    ExtractionStrategy, LayoutTextStrategy, OcrServiceStrategy, StrategyError, StrategyKind,
    VisionModelStrategy,
};

/// Fatal pipeline errors. Everything else is reported through the outcome's
/// `errors` list with `success = false`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Unreadable(#[from] UnreadableDocument),

    #[error("no extraction strategy available: {0}")]
    NoStrategyAvailable(String),
}

/// Per-call options. Unset fields fall back to the pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Run exactly this strategy, with escalation disabled.
    pub force_strategy: Option<StrategyKind>,
    pub confidence_threshold: Option<f32>,
    pub enable_reconciliation: Option<bool>,
    pub max_escalations: Option<u32>,
}

/// One extraction attempt, frozen after reconciliation.
struct Attempt {
    kind: StrategyKind,
    transactions: Vec<NormalizedTransaction>,
    opening_balance: Option<Decimal>,
    closing_balance: Option<Decimal>,
    bank_detected: Option<String>,
    confidence: f32,
    verdict: Option<ReconciliationVerdict>,
    /// Both balances were present, so the verdict is meaningful.
    reconciliation_attempted: bool,
}

impl Attempt {
    fn reconciled(&self) -> bool {
        self.verdict
            .as_ref()
            .map(|v| v.is_reconciled)
            .unwrap_or(false)
    }

    /// Strictly better: higher confidence, or reconciled where the other
    /// attempt was not.
    fn better_than(&self, other: &Attempt) -> bool {
        self.confidence > other.confidence || (self.reconciled() && !other.reconciled())
    }
}

/// How the attempt sequence is chosen.
enum Plan {
    /// Caller forced a single strategy; no escalation.
    Forced(StrategyKind),
    /// Configured explicit order; escalation walks the list.
    Explicit(Vec<StrategyKind>),
    /// Prefer the vision model when available, otherwise the
    /// classification-driven choice; escalation picks the next strictly
    /// stronger untried strategy.
    Auto,
}

/// The document extraction and reconciliation pipeline.
pub struct Pipeline {
    config: Config,
    classifier: Classifier,
    strategies: Vec<Arc<dyn ExtractionStrategy>>,
}

impl Pipeline {
    /// Build a pipeline from injected collaborators.
    pub fn new(
        config: Config,
        extractor: Arc<dyn TextLayerExtractor>,
        strategies: Vec<Arc<dyn ExtractionStrategy>>,
    ) -> Self {
        let classifier = Classifier::new(extractor, config.classifier.clone());
        Self {
            config,
            classifier,
            strategies,
        }
    }

    /// Wire the production strategy set.
    pub fn with_defaults(config: Config) -> Self {
        let extractor: Arc<dyn TextLayerExtractor> = Arc::new(PdfToText::new());
        let banks = BankTable::with_extras(&config.extra_banks);
        let strategies: Vec<Arc<dyn ExtractionStrategy>> = vec![
            Arc::new(LayoutTextStrategy::new(
                extractor.clone(),
                banks,
                config.layout.clone(),
            )),
            Arc::new(OcrServiceStrategy::new(config.ocr.clone())),
            Arc::new(VisionModelStrategy::new(config.vision.clone())),
        ];
        Self::new(config, extractor, strategies)
    }

    /// Registered strategies with availability state, for diagnostics.
    pub fn strategy_status(&self) -> Vec<(StrategyKind, bool, String)> {
        self.strategies
            .iter()
            .map(|s| (s.kind(), s.is_available(), s.availability_hint()))
            .collect()
    }

    fn strategy(&self, kind: StrategyKind) -> Option<&Arc<dyn ExtractionStrategy>> {
        self.strategies.iter().find(|s| s.kind() == kind)
    }

    fn is_viable(&self, kind: StrategyKind) -> bool {
        self.strategy(kind).map(|s| s.is_available()).unwrap_or(false)
    }

    fn unavailability_note(&self, kind: StrategyKind) -> String {
        match self.strategy(kind) {
            Some(s) => format!("{} skipped: {}", kind, s.availability_hint()),
            None => format!("{} skipped: not registered", kind),
        }
    }

    /// Classification-driven preference used when no explicit order is set.
    fn auto_order(&self, classification: &ClassificationResult) -> Vec<StrategyKind> {
        let mut order = vec![StrategyKind::VisionModel];
        match classification.kind {
            DocumentKind::Native => {
                order.push(StrategyKind::LayoutText);
                order.push(StrategyKind::Ocr);
            }
            DocumentKind::Scanned => {
                order.push(StrategyKind::Ocr);
                order.push(StrategyKind::LayoutText);
            }
        }
        order
    }

    fn select_initial(
        &self,
        plan: &Plan,
        classification: &ClassificationResult,
        warnings: &mut Vec<String>,
    ) -> Result<StrategyKind, PipelineError> {
        let candidates = match plan {
            Plan::Forced(kind) => vec![*kind],
            Plan::Explicit(order) => order.clone(),
            Plan::Auto => self.auto_order(classification),
        };
        for kind in &candidates {
            if self.is_viable(*kind) {
                return Ok(*kind);
            }
            warnings.push(self.unavailability_note(*kind));
        }
        Err(PipelineError::NoStrategyAvailable(
            candidates
                .iter()
                .map(|k| self.unavailability_note(*k))
                .collect::<Vec<_>>()
                .join("; "),
        ))
    }

    fn select_escalation(
        &self,
        plan: &Plan,
        tried: &[StrategyKind],
        last: StrategyKind,
        warnings: &mut Vec<String>,
    ) -> Option<StrategyKind> {
        match plan {
            Plan::Forced(_) => None,
            Plan::Explicit(order) => {
                for kind in order.iter().skip_while(|k| **k != last).skip(1) {
                    if tried.contains(kind) {
                        continue;
                    }
                    if self.is_viable(*kind) {
                        return Some(*kind);
                    }
                    warnings.push(self.unavailability_note(*kind));
                }
                None
            }
            Plan::Auto => {
                let mut stronger: Vec<StrategyKind> = self
                    .strategies
                    .iter()
                    .map(|s| s.kind())
                    .filter(|k| !tried.contains(k))
                    .filter(|k| k.strength() > last.strength())
                    .filter(|k| self.is_viable(*k))
                    .collect();
                stronger.sort_by_key(|k| k.strength());
                stronger.first().copied()
            }
        }
    }

    /// Process one document: classify, extract, reconcile, escalate as
    /// needed, and return the terminal outcome.
    ///
    /// Fails only for unreadable bytes or when no strategy is viable at
    /// all; every other failure mode is reported in the outcome.
    pub async fn process(
        &self,
        bytes: &[u8],
        options: &ProcessOptions,
    ) -> Result<ExtractionOutcome, PipelineError> {
        let started = Instant::now();
        let selection = &self.config.selection;
        let threshold = options
            .confidence_threshold
            .unwrap_or(selection.confidence_threshold);
        let enable_reconciliation = options
            .enable_reconciliation
            .unwrap_or(selection.enable_reconciliation);
        let max_attempts =
            options.max_escalations.unwrap_or(selection.max_escalations) as usize + 1;
        let fallback_year = chrono::Utc::now().year();

        let plan = if let Some(kind) = options.force_strategy {
            Plan::Forced(kind)
        } else if !selection.order.is_empty() {
            Plan::Explicit(selection.order.clone())
        } else {
            Plan::Auto
        };

        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut tried: Vec<StrategyKind> = Vec::new();
        let mut candidate: Option<Attempt> = None;

        tracing::debug!("pipeline state: classifying");
        let classification = self.classifier.classify(bytes).await?;

        let mut next = Some(self.select_initial(&plan, &classification, &mut warnings)?);

        while let Some(kind) = next {
            if tried.len() >= max_attempts {
                warnings.push(format!(
                    "attempt cap reached before trying {}",
                    kind
                ));
                break;
            }
            tried.push(kind);

            tracing::debug!("pipeline state: extracting with {}", kind);
            let attempt = match self.run_strategy(kind, bytes).await {
                Err(e) => {
                    tracing::warn!("strategy {} failed: {}", kind, e);
                    errors.push(format!("{}: {}", kind, e));
                    None
                }
                Ok(output) => {
                    for err in &output.errors {
                        errors.push(format!("{}: {}", kind, err));
                    }
                    tracing::debug!("pipeline state: reconciling {} result", kind);
                    let transactions =
                        normalize_transactions(&output.transactions, fallback_year);
                    let balances_known =
                        output.opening_balance.is_some() && output.closing_balance.is_some();
                    let verdict = if enable_reconciliation {
                        Some(reconcile(
                            &transactions,
                            output.opening_balance,
                            output.closing_balance,
                        ))
                    } else {
                        None
                    };
                    Some(Attempt {
                        kind,
                        transactions,
                        opening_balance: output.opening_balance,
                        closing_balance: output.closing_balance,
                        bank_detected: output.bank_detected,
                        confidence: output.confidence,
                        verdict,
                        reconciliation_attempted: enable_reconciliation && balances_known,
                    })
                }
            };

            let mut accepted = false;
            let mut replaced = false;
            if let Some(attempt) = attempt {
                let escalation_reason = if attempt.transactions.is_empty() {
                    Some(format!("{} returned no transactions", kind))
                } else if attempt.confidence < threshold {
                    Some(format!(
                        "{} confidence {:.2} below threshold {:.2}",
                        kind, attempt.confidence, threshold
                    ))
                } else if attempt.reconciliation_attempted && !attempt.reconciled() {
                    let difference = attempt
                        .verdict
                        .as_ref()
                        .and_then(|v| v.difference_abs)
                        .unwrap_or_default();
                    Some(format!(
                        "{} result did not reconcile (difference {})",
                        kind, difference
                    ))
                } else {
                    None
                };
                accepted = escalation_reason.is_none();

                match &candidate {
                    None => {
                        candidate = Some(attempt);
                        replaced = true;
                    }
                    Some(current) => {
                        if attempt.better_than(current) {
                            candidate = Some(attempt);
                            replaced = true;
                        } else {
                            warnings.push(format!(
                                "{} escalation did not improve on the {} result \
                                 (confidence {:.2} vs {:.2}); keeping the earlier result",
                                kind, current.kind, attempt.confidence, current.confidence
                            ));
                        }
                    }
                }
                if let Some(reason) = escalation_reason {
                    warnings.push(reason);
                }
            }

            // An acceptable result only ends the run when the merge policy
            // actually made it the candidate.
            if accepted && replaced {
                tracing::debug!("pipeline state: accepted {} result", kind);
                break;
            }

            tracing::debug!("pipeline state: escalating past {}", kind);
            next = self.select_escalation(&plan, &tried, kind, &mut warnings);
        }

        let tried_names = tried
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let method = if tried.len() > 1 {
            ExtractionMethod::Hybrid
        } else {
            tried
                .first()
                .copied()
                .map(ExtractionMethod::from)
                // Unreachable in practice: select_initial either returns a
                // strategy or errors out.
                .unwrap_or(ExtractionMethod::LayoutText)
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match candidate {
            Some(attempt) => {
                let success = !attempt.transactions.is_empty();
                if !success {
                    errors.push(format!(
                        "no transactions extracted; strategies tried: {}",
                        tried_names
                    ));
                }
                if success {
                    if let Some(opening) = attempt.opening_balance {
                        let mismatched =
                            validate_running_balances(&attempt.transactions, opening);
                        if !mismatched.is_empty() {
                            warnings.push(format!(
                                "{} row(s) disagree with the computed running balance",
                                mismatched.len()
                            ));
                        }
                    }
                }
                ExtractionOutcome {
                    success,
                    method,
                    strategies_tried: tried,
                    transactions: attempt.transactions,
                    opening_balance: attempt.opening_balance,
                    closing_balance: attempt.closing_balance,
                    bank_detected: attempt.bank_detected,
                    overall_confidence: attempt.confidence,
                    reconciliation: attempt.verdict,
                    errors,
                    warnings,
                    duration_ms,
                }
            }
            None => {
                errors.push(format!(
                    "no transactions extracted; strategies tried: {}",
                    tried_names
                ));
                ExtractionOutcome {
                    success: false,
                    method,
                    strategies_tried: tried,
                    transactions: Vec::new(),
                    opening_balance: None,
                    closing_balance: None,
                    bank_detected: None,
                    overall_confidence: 0.0,
                    reconciliation: None,
                    errors,
                    warnings,
                    duration_ms,
                }
            }
        };

        Ok(outcome)
    }

    /// Run a single strategy under its configured timeout.
    async fn run_strategy(
        &self,
        kind: StrategyKind,
        bytes: &[u8],
    ) -> Result<crate::strategies::StrategyOutput, StrategyError> {
        let strategy = self
            .strategy(kind)
            .ok_or_else(|| StrategyError::Unavailable(format!("{} not registered", kind)))?;
        let timeout = self.config.strategy_timeout(kind);
        match tokio::time::timeout(timeout, strategy.extract(bytes)).await {
            Ok(result) => result,
            Err(_) => Err(StrategyError::Timeout(timeout)),
        }
    }
}
