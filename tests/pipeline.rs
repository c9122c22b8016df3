//! Orchestration tests over mock strategies and a mock text layer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use ledgerscan::config::Config;
use ledgerscan::models::{BoundingBox, RawTransaction, SignedType, SourceLocation};
use ledgerscan::pdftext::{PdfTextError, TextLayer, TextLayerExtractor};
use ledgerscan::pipeline::{Pipeline, PipelineError, ProcessOptions};
use ledgerscan::strategies::{
    ExtractionStrategy, StrategyError, StrategyKind, StrategyOutput,
};
use ledgerscan::ExtractionMethod;

const PDF: &[u8] = b"%PDF-1.7 mock document";

struct MockExtractor;

#[async_trait]
impl TextLayerExtractor for MockExtractor {
    async fn extract(&self, _bytes: &[u8]) -> Result<TextLayer, PdfTextError> {
        // Dense enough to classify as native.
        Ok(TextLayer {
            pages: vec!["x".repeat(800)],
            page_count: 1,
        })
    }
}

enum Behavior {
    Succeed(StrategyOutput),
    Fail(String),
    Sleep(Duration),
    Unavailable,
}

struct MockStrategy {
    kind: StrategyKind,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl MockStrategy {
    fn succeeding(kind: StrategyKind, output: StrategyOutput) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behavior: Behavior::Succeed(output),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(kind: StrategyKind, message: &str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behavior: Behavior::Fail(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    fn sleeping(kind: StrategyKind, duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behavior: Behavior::Sleep(duration),
            calls: AtomicUsize::new(0),
        })
    }

    fn unavailable(kind: StrategyKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behavior: Behavior::Unavailable,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionStrategy for MockStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        !matches!(self.behavior, Behavior::Unavailable)
    }

    fn availability_hint(&self) -> String {
        format!("mock backend for {}", self.kind)
    }

    async fn extract(&self, _bytes: &[u8]) -> Result<StrategyOutput, StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed(output) => Ok(output.clone()),
            Behavior::Fail(message) => Err(StrategyError::Failed(message.clone())),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(StrategyOutput::default())
            }
            Behavior::Unavailable => {
                Err(StrategyError::Unavailable("mock unavailable".to_string()))
            }
        }
    }
}

fn credit(amount: Decimal, confidence: f32) -> RawTransaction {
    RawTransaction {
        date: Some("01/15/2024".to_string()),
        description: "MOCK CREDIT".to_string(),
        amount: Some(amount),
        signed_type: SignedType::Credit,
        running_balance: None,
        confidence,
        source: None,
        raw_text: "mock".to_string(),
    }
}

/// Opening 1000.00 + one 500.00 credit = stated closing 1500.00.
fn reconciled_output(confidence: f32) -> StrategyOutput {
    StrategyOutput {
        transactions: vec![credit(dec!(500.00), confidence)],
        opening_balance: Some(dec!(1000.00)),
        closing_balance: Some(dec!(1500.00)),
        bank_detected: None,
        confidence,
        errors: Vec::new(),
    }
}

/// Stated closing is 100.00 off from the computed one.
fn mismatched_output(confidence: f32) -> StrategyOutput {
    StrategyOutput {
        transactions: vec![credit(dec!(400.00), confidence)],
        opening_balance: Some(dec!(1000.00)),
        closing_balance: Some(dec!(1500.00)),
        bank_detected: None,
        confidence,
        errors: Vec::new(),
    }
}

/// Transactions without any stated balances.
fn no_balance_output(confidence: f32) -> StrategyOutput {
    StrategyOutput {
        transactions: vec![credit(dec!(42.00), confidence)],
        opening_balance: None,
        closing_balance: None,
        bank_detected: None,
        confidence,
        errors: Vec::new(),
    }
}

fn pipeline(config: Config, strategies: Vec<Arc<MockStrategy>>) -> Pipeline {
    let dyn_strategies: Vec<Arc<dyn ExtractionStrategy>> = strategies
        .into_iter()
        .map(|s| s as Arc<dyn ExtractionStrategy>)
        .collect();
    Pipeline::new(config, Arc::new(MockExtractor), dyn_strategies)
}

fn config_with_order(order: Vec<StrategyKind>) -> Config {
    let mut config = Config::default();
    config.selection.order = order;
    config
}

#[tokio::test]
async fn good_first_attempt_is_accepted_without_escalation() {
    let layout = MockStrategy::succeeding(StrategyKind::LayoutText, reconciled_output(0.9));
    let ocr = MockStrategy::unavailable(StrategyKind::Ocr);
    let vision = MockStrategy::unavailable(StrategyKind::VisionModel);
    let p = pipeline(
        Config::default(),
        vec![layout.clone(), ocr.clone(), vision.clone()],
    );

    let outcome = p.process(PDF, &ProcessOptions::default()).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.method, ExtractionMethod::LayoutText);
    assert_eq!(outcome.strategies_tried, vec![StrategyKind::LayoutText]);
    assert!(outcome.reconciliation.unwrap().is_reconciled);
    assert_eq!(layout.calls(), 1);
    assert_eq!(ocr.calls(), 0);
    assert_eq!(vision.calls(), 0);
}

#[tokio::test]
async fn low_confidence_escalates_and_takes_the_better_result() {
    let layout = MockStrategy::succeeding(StrategyKind::LayoutText, no_balance_output(0.3));
    let ocr = MockStrategy::succeeding(StrategyKind::Ocr, reconciled_output(0.9));
    let vision = MockStrategy::unavailable(StrategyKind::VisionModel);
    let p = pipeline(Config::default(), vec![layout.clone(), ocr.clone(), vision]);

    let outcome = p.process(PDF, &ProcessOptions::default()).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.method, ExtractionMethod::Hybrid);
    assert_eq!(
        outcome.strategies_tried,
        vec![StrategyKind::LayoutText, StrategyKind::Ocr]
    );
    assert!((outcome.overall_confidence - 0.9).abs() < f32::EPSILON);
    assert_eq!(ocr.calls(), 1);
}

#[tokio::test]
async fn worse_escalation_result_does_not_overwrite_the_earlier_one() {
    let layout = MockStrategy::succeeding(StrategyKind::LayoutText, no_balance_output(0.6));
    let ocr = MockStrategy::succeeding(StrategyKind::Ocr, no_balance_output(0.2));
    let vision = MockStrategy::unavailable(StrategyKind::VisionModel);
    let p = pipeline(Config::default(), vec![layout, ocr, vision]);

    let outcome = p.process(PDF, &ProcessOptions::default()).await.unwrap();

    assert!(outcome.success);
    // The weaker retry was recorded but the earlier result kept.
    assert!((outcome.overall_confidence - 0.6).abs() < f32::EPSILON);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("keeping the earlier result")));
}

#[tokio::test]
async fn newly_reconciled_result_replaces_a_higher_confidence_mismatch() {
    let layout = MockStrategy::succeeding(StrategyKind::LayoutText, mismatched_output(0.9));
    let ocr = MockStrategy::succeeding(StrategyKind::Ocr, reconciled_output(0.5));
    let vision = MockStrategy::unavailable(StrategyKind::VisionModel);
    let p = pipeline(Config::default(), vec![layout, ocr, vision]);

    let outcome = p.process(PDF, &ProcessOptions::default()).await.unwrap();

    assert!(outcome.success);
    assert!((outcome.overall_confidence - 0.5).abs() < f32::EPSILON);
    assert!(outcome.reconciliation.unwrap().is_reconciled);
}

#[tokio::test]
async fn every_failed_strategy_leaves_an_attributable_error() {
    let layout = MockStrategy::failing(StrategyKind::LayoutText, "column detection exploded");
    let ocr = MockStrategy::failing(StrategyKind::Ocr, "worker returned 500");
    let p = pipeline(
        config_with_order(vec![StrategyKind::LayoutText, StrategyKind::Ocr]),
        vec![layout, ocr],
    );

    let outcome = p.process(PDF, &ProcessOptions::default()).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome
        .errors
        .iter()
        .any(|e| e.starts_with("layout_text:") && e.contains("column detection exploded")));
    assert!(outcome
        .errors
        .iter()
        .any(|e| e.starts_with("ocr:") && e.contains("worker returned 500")));
    assert!(outcome
        .errors
        .iter()
        .any(|e| e.contains("strategies tried: layout_text, ocr")));
}

#[tokio::test]
async fn zero_rows_from_every_strategy_is_a_named_failure() {
    let empty_a = StrategyOutput {
        confidence: 0.9,
        ..Default::default()
    };
    let empty_b = StrategyOutput {
        confidence: 0.8,
        ..Default::default()
    };
    let layout = MockStrategy::succeeding(StrategyKind::LayoutText, empty_a);
    let ocr = MockStrategy::succeeding(StrategyKind::Ocr, empty_b);
    let p = pipeline(
        config_with_order(vec![StrategyKind::LayoutText, StrategyKind::Ocr]),
        vec![layout, ocr],
    );

    let outcome = p.process(PDF, &ProcessOptions::default()).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.transactions.is_empty());
    assert!(outcome
        .errors
        .iter()
        .any(|e| e.contains("layout_text") && e.contains("ocr")));
}

#[tokio::test]
async fn attempt_cap_bounds_escalation() {
    let layout = MockStrategy::succeeding(StrategyKind::LayoutText, no_balance_output(0.1));
    let ocr = MockStrategy::succeeding(StrategyKind::Ocr, no_balance_output(0.1));
    let vision = MockStrategy::succeeding(StrategyKind::VisionModel, no_balance_output(0.1));
    let p = pipeline(
        config_with_order(vec![
            StrategyKind::LayoutText,
            StrategyKind::Ocr,
            StrategyKind::VisionModel,
        ]),
        vec![layout, ocr, vision.clone()],
    );

    let options = ProcessOptions {
        max_escalations: Some(1),
        ..Default::default()
    };
    let outcome = p.process(PDF, &options).await.unwrap();

    assert_eq!(
        outcome.strategies_tried,
        vec![StrategyKind::LayoutText, StrategyKind::Ocr]
    );
    assert_eq!(vision.calls(), 0);
}

#[tokio::test]
async fn forced_strategy_never_escalates() {
    let layout = MockStrategy::succeeding(StrategyKind::LayoutText, reconciled_output(0.9));
    let ocr = MockStrategy::succeeding(StrategyKind::Ocr, no_balance_output(0.1));
    let vision = MockStrategy::succeeding(StrategyKind::VisionModel, reconciled_output(0.95));
    let p = pipeline(Config::default(), vec![layout.clone(), ocr.clone(), vision.clone()]);

    let options = ProcessOptions {
        force_strategy: Some(StrategyKind::Ocr),
        ..Default::default()
    };
    let outcome = p.process(PDF, &options).await.unwrap();

    assert_eq!(outcome.strategies_tried, vec![StrategyKind::Ocr]);
    assert_eq!(outcome.method, ExtractionMethod::Ocr);
    assert_eq!(layout.calls(), 0);
    assert_eq!(vision.calls(), 0);
}

#[tokio::test]
async fn forcing_an_unavailable_strategy_is_fatal() {
    let vision = MockStrategy::unavailable(StrategyKind::VisionModel);
    let layout = MockStrategy::succeeding(StrategyKind::LayoutText, reconciled_output(0.9));
    let p = pipeline(Config::default(), vec![layout, vision]);

    let options = ProcessOptions {
        force_strategy: Some(StrategyKind::VisionModel),
        ..Default::default()
    };
    let err = p.process(PDF, &options).await.unwrap_err();
    assert!(matches!(err, PipelineError::NoStrategyAvailable(_)));
}

#[tokio::test]
async fn non_pdf_bytes_fail_before_any_extraction() {
    let layout = MockStrategy::succeeding(StrategyKind::LayoutText, reconciled_output(0.9));
    let p = pipeline(Config::default(), vec![layout.clone()]);

    let err = p
        .process(b"GIF89a not a pdf", &ProcessOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Unreadable(_)));
    assert_eq!(layout.calls(), 0);
}

#[tokio::test]
async fn no_viable_strategy_is_an_error() {
    let layout = MockStrategy::unavailable(StrategyKind::LayoutText);
    let ocr = MockStrategy::unavailable(StrategyKind::Ocr);
    let p = pipeline(Config::default(), vec![layout, ocr]);

    let err = p.process(PDF, &ProcessOptions::default()).await.unwrap_err();
    assert!(matches!(err, PipelineError::NoStrategyAvailable(_)));
}

#[tokio::test]
async fn unknown_balances_do_not_block_acceptance() {
    let layout = MockStrategy::succeeding(StrategyKind::LayoutText, no_balance_output(0.9));
    let ocr = MockStrategy::unavailable(StrategyKind::Ocr);
    let vision = MockStrategy::unavailable(StrategyKind::VisionModel);
    let p = pipeline(Config::default(), vec![layout, ocr, vision]);

    let outcome = p.process(PDF, &ProcessOptions::default()).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.strategies_tried, vec![StrategyKind::LayoutText]);
    // The expected-unknown state, distinct from a computed mismatch.
    let verdict = outcome.reconciliation.unwrap();
    assert!(verdict.is_unknown());
    assert!(!verdict.is_reconciled);
}

#[tokio::test]
async fn reconciliation_can_be_disabled_per_call() {
    let layout = MockStrategy::succeeding(StrategyKind::LayoutText, mismatched_output(0.9));
    let ocr = MockStrategy::succeeding(StrategyKind::Ocr, reconciled_output(0.95));
    let vision = MockStrategy::unavailable(StrategyKind::VisionModel);
    let p = pipeline(Config::default(), vec![layout, ocr.clone(), vision]);

    let options = ProcessOptions {
        enable_reconciliation: Some(false),
        ..Default::default()
    };
    let outcome = p.process(PDF, &options).await.unwrap();

    assert!(outcome.success);
    assert!(outcome.reconciliation.is_none());
    // The mismatch cannot trigger escalation when reconciliation is off.
    assert_eq!(outcome.strategies_tried, vec![StrategyKind::LayoutText]);
    assert_eq!(ocr.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_strategy_is_recorded_and_escalated_past() {
    let layout = MockStrategy::sleeping(StrategyKind::LayoutText, Duration::from_secs(600));
    let ocr = MockStrategy::succeeding(StrategyKind::Ocr, reconciled_output(0.9));
    let p = pipeline(
        config_with_order(vec![StrategyKind::LayoutText, StrategyKind::Ocr]),
        vec![layout.clone(), ocr.clone()],
    );

    let outcome = p.process(PDF, &ProcessOptions::default()).await.unwrap();

    assert!(outcome.success);
    assert_eq!(layout.calls(), 1);
    assert_eq!(ocr.calls(), 1);
    assert!(outcome
        .errors
        .iter()
        .any(|e| e.starts_with("layout_text:") && e.contains("timed out")));
}

#[tokio::test]
async fn provenance_survives_to_the_outcome() {
    let mut output = no_balance_output(0.9);
    output.transactions[0].source = Some(SourceLocation {
        page: 3,
        bbox: Some(BoundingBox {
            x1: 10.0,
            y1: 20.0,
            x2: 300.0,
            y2: 34.0,
        }),
    });
    let layout = MockStrategy::succeeding(StrategyKind::LayoutText, output);
    let ocr = MockStrategy::unavailable(StrategyKind::Ocr);
    let vision = MockStrategy::unavailable(StrategyKind::VisionModel);
    let p = pipeline(Config::default(), vec![layout, ocr, vision]);

    let outcome = p.process(PDF, &ProcessOptions::default()).await.unwrap();

    let tx = &outcome.transactions[0];
    assert_eq!(tx.source_page, Some(3));
    assert_eq!(tx.source_bbox.unwrap().x2, 300.0);
    assert_eq!(tx.iso_date.as_deref(), Some("2024-01-15"));
    assert_eq!(tx.credit, Some(dec!(42.00)));
}
