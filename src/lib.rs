//! Bank statement extraction and reconciliation pipeline.
//!
//! Converts statement PDFs into structured transaction ledgers: a
//! classifier routes each document to one of several extraction strategies
//! (layout-text parsing, an external OCR service, or a vision model), the
//! heterogeneous results are normalized into a common transaction model,
//! and a reconciliation engine verifies that opening balance plus credits
//! minus debits matches the stated closing balance. An orchestrator
//! escalates to stronger strategies when a cheaper one under-performs.

pub mod banks;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod models;
pub mod normalize;
pub mod pdftext;
pub mod pipeline;
pub mod reconcile;
pub mod strategies;

pub use classifier::{ClassificationResult, Classifier, DocumentKind, ScanQuality};
pub use config::Config;
pub use models::{
    BoundingBox, ExtractionMethod, ExtractionOutcome, NormalizedTransaction, RawTransaction,
    SignedType, SourceLocation,
};
pub use pipeline::{Pipeline, PipelineError, ProcessOptions};
pub use reconcile::{reconcile, validate_running_balances, ReconciliationVerdict};
pub use strategies::{ExtractionStrategy, StrategyError, StrategyKind, StrategyOutput};
