//! CLI commands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;

use crate::classifier::Classifier;
use crate::config::Config;
use crate::pdftext::PdfToText;
use crate::pipeline::{Pipeline, ProcessOptions};
use crate::strategies::StrategyKind;

#[derive(Parser)]
#[command(name = "lscan")]
#[command(about = "Bank statement extraction and reconciliation pipeline")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Extract transactions from a statement PDF
    Process {
        /// Path to the PDF file
        file: PathBuf,
        /// Force a single strategy: layout_text, ocr, or vision_model
        #[arg(short, long)]
        strategy: Option<String>,
        /// Minimum confidence before escalating
        #[arg(long)]
        threshold: Option<f32>,
        /// Maximum escalations after the first attempt
        #[arg(long)]
        max_escalations: Option<u32>,
        /// Skip balance reconciliation
        #[arg(long)]
        no_reconcile: bool,
        /// Emit the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify a PDF as native or scanned
    Classify {
        /// Path to the PDF file
        file: PathBuf,
        /// Emit the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check external tool and backend availability
    Tools,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Process {
            file,
            strategy,
            threshold,
            max_escalations,
            no_reconcile,
            json,
        } => {
            process(
                config,
                file,
                strategy,
                threshold,
                max_escalations,
                no_reconcile,
                json,
            )
            .await
        }
        Commands::Classify { file, json } => classify(config, file, json).await,
        Commands::Tools => tools(config),
    }
}

#[allow(clippy::too_many_arguments)]
async fn process(
    config: Config,
    file: PathBuf,
    strategy: Option<String>,
    threshold: Option<f32>,
    max_escalations: Option<u32>,
    no_reconcile: bool,
    json: bool,
) -> anyhow::Result<()> {
    let force_strategy = match strategy.as_deref() {
        None => None,
        Some(name) => Some(
            StrategyKind::from_str(name)
                .ok_or_else(|| anyhow::anyhow!("unknown strategy: {}", name))?,
        ),
    };

    let bytes = tokio::fs::read(&file).await?;
    let pipeline = Pipeline::with_defaults(config);
    let options = ProcessOptions {
        force_strategy,
        confidence_threshold: threshold,
        enable_reconciliation: no_reconcile.then_some(false),
        max_escalations,
    };

    let outcome = pipeline.process(&bytes, &options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        let mark = if outcome.success {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!(
            "{} {} transactions via {} ({} ms, confidence {:.2})",
            mark,
            outcome.transactions.len(),
            outcome.method,
            outcome.duration_ms,
            outcome.overall_confidence
        );
        if let Some(bank) = &outcome.bank_detected {
            println!("  bank: {}", bank);
        }
        if let (Some(open), Some(close)) = (outcome.opening_balance, outcome.closing_balance) {
            println!("  balances: {} -> {}", open, close);
        }
        match &outcome.reconciliation {
            Some(verdict) if verdict.is_reconciled => {
                println!("  {} reconciled", style("✓").green());
            }
            Some(verdict) => match verdict.difference_abs {
                Some(difference) => println!(
                    "  {} reconciliation mismatch (difference {})",
                    style("✗").red(),
                    difference
                ),
                None => println!("  reconciliation unavailable (balances unknown)"),
            },
            None => {}
        }
        for warning in &outcome.warnings {
            println!("  {} {}", style("warning:").yellow(), warning);
        }
        for error in &outcome.errors {
            println!("  {} {}", style("error:").red(), error);
        }
    }

    if !outcome.success {
        anyhow::bail!("extraction failed for {}", file.display());
    }
    Ok(())
}

async fn classify(config: Config, file: PathBuf, json: bool) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&file).await?;
    let classifier = Classifier::new(std::sync::Arc::new(PdfToText::new()), config.classifier);
    let result = classifier.classify(&bytes).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "{:?} ({:?} scan), {} pages, {:.0} chars/page, confidence {:.2}",
            result.kind,
            result.scan_quality,
            result.page_count,
            result.text_density,
            result.confidence
        );
    }
    Ok(())
}

fn tools(config: Config) -> anyhow::Result<()> {
    println!("External tools:");
    for (tool, available) in PdfToText::check_tools() {
        let mark = if available {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!("  {} {}", mark, tool);
    }

    println!("Strategies:");
    let pipeline = Pipeline::with_defaults(config);
    for (kind, available, hint) in pipeline.strategy_status() {
        let mark = if available {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!("  {} {}: {}", mark, kind, hint);
    }
    Ok(())
}
