//! ratewatch - chunked LLM analysis of central bank communications
//!
//! A CLI tool that splits long monetary policy documents into overlapping
//! segments, analyzes each one through an LLM, and synthesizes a single
//! stance assessment per document.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (unreadable document, bad config, interrupted run, etc.)
//!   2 - A document failed or was degraded and --fail-on-degraded is set

use anyhow::{Context, Result};
use chrono::Utc;
use ratewatch::analysis::overall_bias;
use ratewatch::capability;
use ratewatch::cli::{Args, DocumentArg, DocumentSource};
use ratewatch::config::{Config, DEFAULT_CONFIG_FILE};
use ratewatch::models::{
    AggregateSummary, Document, DocumentOutcome, DocumentReport, Report, ReportMetadata,
    SynthesizedResult,
};
use ratewatch::pipeline::{segment, Pacer, Pipeline, PipelineSettings};
use ratewatch::progress::SegmentProgress;
use ratewatch::report;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("ratewatch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_analysis(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default config file.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize the provider, segment sizes, pacing, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("⚠️  Failed to set tracing subscriber: {}", e);
    }
}

/// A document read from its source, ready for the pipeline.
struct LoadedDocument {
    document: Document,
    origin: String,
}

/// Run the complete analysis workflow. Returns exit code (0, 1 or 2).
async fn run_analysis(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let settings = PipelineSettings::from(&config.pipeline);
    settings
        .validate()
        .context("Invalid pipeline configuration")?;

    // Step 1: Read the documents
    println!("📥 Reading {} document(s)...", args.docs.len());
    let documents = args
        .docs
        .iter()
        .map(read_document)
        .collect::<Result<Vec<_>>>()?;

    // Handle --dry-run: segment and exit
    if args.dry_run {
        return handle_dry_run(&documents, &settings);
    }

    // Step 2: Initialize the capability
    println!("🤖 Initializing analysis backend...");
    println!("   Provider: {}", config.model.provider);
    println!("   Model: {}", config.model.name);
    println!("   Endpoint: {}", config.model.endpoint());
    println!(
        "   Segments: up to {} chars, {} overlap",
        settings.max_segment_size, settings.overlap_size
    );
    println!(
        "   Pacing: {} concurrent call(s), {}ms spacing",
        settings.max_concurrent_calls,
        settings.min_call_spacing.as_millis()
    );

    let capability = capability::from_config(&config.model)?;

    // One pacer for every document: they all hit the same service.
    let pacer = Arc::new(Pacer::new(
        settings.max_concurrent_calls,
        settings.min_call_spacing,
    ));

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        })
    };

    let run_timeout = config.pipeline.run_timeout_seconds.map(Duration::from_secs);

    // Step 3: Run the pipeline over each document
    let mut reports = Vec::with_capacity(documents.len());
    for loaded in documents {
        let report = analyze_document(
            loaded,
            capability.clone(),
            &settings,
            pacer.clone(),
            &cancel,
            run_timeout,
            !args.quiet,
        )
        .await?;
        reports.push(report);
    }
    interrupt.abort();

    // Step 4: Build the report
    println!("\n📝 Generating report...");

    let duration = start_time.elapsed().as_secs_f64();
    let results: Vec<&SynthesizedResult> = reports.iter().filter_map(|d| d.result()).collect();
    let aggregate = AggregateSummary::from_results(&results);
    let documents_failed = reports.len() - results.len();

    let metadata = ReportMetadata {
        generated_at: Utc::now(),
        provider: config.model.provider.to_string(),
        model_used: config.model.name.clone(),
        documents_analyzed: reports.len(),
        documents_failed,
        duration_seconds: duration,
    };

    let report = Report {
        metadata,
        documents: reports,
        aggregate,
    };

    // Step 5: Save the report
    let output_path = PathBuf::from(&config.general.output);
    report::write_report(&report, &output_path, args.format, &config.report)?;

    print_summary(&report, duration);
    println!(
        "\n✅ Analysis complete! Report saved to: {}",
        output_path.display()
    );

    Ok(exit_code(&report, cancel.is_cancelled(), args.fail_on_degraded))
}

/// Exit code for a finished run: 1 if interrupted, 2 if a document failed or
/// was degraded and `fail_on_degraded` is set, else 0.
fn exit_code(report: &Report, interrupted: bool, fail_on_degraded: bool) -> i32 {
    if interrupted {
        eprintln!("\n⛔ Run was interrupted; the report is incomplete.");
        return 1;
    }

    let failed = report.metadata.documents_failed;
    let degraded = report
        .documents
        .iter()
        .filter_map(|d| d.result())
        .filter(|r| r.degraded)
        .count();

    if fail_on_degraded && (failed > 0 || degraded > 0) {
        eprintln!(
            "\n⛔ {} document(s) failed and {} degraded. Failing (exit code 2).",
            failed, degraded
        );
        return 2;
    }

    0
}

/// Run the pipeline over one document and turn the outcome into a report entry.
async fn analyze_document(
    loaded: LoadedDocument,
    capability: Arc<dyn capability::AnalysisCapability>,
    settings: &PipelineSettings,
    pacer: Arc<Pacer>,
    cancel: &CancellationToken,
    run_timeout: Option<Duration>,
    show_progress: bool,
) -> Result<DocumentReport> {
    let LoadedDocument { document, origin } = loaded;
    let char_count = document.char_len();

    println!(
        "\n🔬 Analyzing {} ({} chars)...",
        document.source_label, char_count
    );

    let progress = Arc::new(SegmentProgress::new(
        document.source_label.clone(),
        show_progress,
    ));
    let pipeline = Pipeline::new(capability, settings.clone())?
        .with_pacer(pacer)
        .with_observer(progress);

    // The run timeout cancels this document only.
    let run_cancel = cancel.child_token();
    let watchdog = run_timeout.map(|limit| {
        let token = run_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            token.cancel();
        })
    });

    let outcome = pipeline.run(&document, &run_cancel).await;
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }

    let outcome = match outcome {
        Ok(outcome) => {
            let result = &outcome.result;
            println!(
                "   {} {} (confidence {:.0}%, {})",
                result.stance.emoji(),
                result.stance,
                result.confidence * 100.0,
                result.coverage
            );
            if result.degraded {
                println!("   ⚠️  Degraded: too many segments failed, confidence capped");
            }
            DocumentOutcome::Completed {
                result: outcome.result,
                partials: outcome.partials,
            }
        }
        Err(failure) => {
            let timed_out = run_cancel.is_cancelled() && !cancel.is_cancelled();
            let message = match run_timeout {
                Some(limit) if timed_out => {
                    format!("run timed out after {}s", limit.as_secs())
                }
                _ => failure.error.to_string(),
            };
            error!("{}: {}", document.source_label, failure);
            println!("   ❌ {}: {}", failure.error.kind(), message);

            DocumentOutcome::Failed {
                error_kind: failure.error.kind().to_string(),
                message,
                state: failure.state.to_string(),
                coverage: failure.coverage,
                partials: failure.partials,
            }
        }
    };

    Ok(DocumentReport {
        source_label: document.source_label,
        origin,
        char_count,
        outcome,
    })
}

/// Read one `--doc` argument into memory.
fn read_document(arg: &DocumentArg) -> Result<LoadedDocument> {
    let text = match &arg.source {
        DocumentSource::Stdin => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read document from stdin")?;
            buffer
        }
        DocumentSource::File(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document: {}", path.display()))?,
    };

    info!(
        "Loaded {} from {} ({} bytes)",
        arg.label,
        arg.source,
        text.len()
    );

    Ok(LoadedDocument {
        document: Document::new(text, arg.label.clone()),
        origin: arg.source.to_string(),
    })
}

/// Handle --dry-run: print the segment plan, exit.
fn handle_dry_run(documents: &[LoadedDocument], settings: &PipelineSettings) -> Result<i32> {
    println!("\n🔍 Dry run: segmenting documents (no model calls)...\n");

    let mut total_segments = 0;
    for loaded in documents {
        let document = &loaded.document;
        let segments = segment(
            &document.text,
            settings.max_segment_size,
            settings.overlap_size,
        )
        .with_context(|| format!("Failed to segment {}", document.source_label))?;

        println!(
            "   📄 {} ({} chars): {} segment(s)",
            document.source_label,
            document.char_len(),
            segments.len()
        );
        for seg in &segments {
            println!(
                "     part {} of {}: chars {}..{} ({} chars)",
                seg.ordinal(),
                seg.total_count,
                seg.start_offset,
                seg.end_offset,
                seg.char_len()
            );
        }
        total_segments += segments.len();
    }

    // Map calls plus one reduce call per non-empty document.
    let reduce_calls = documents
        .iter()
        .filter(|d| !d.document.text.is_empty())
        .count();
    println!(
        "\n   Total: {} segment(s), at least {} model call(s)",
        total_segments,
        total_segments + reduce_calls
    );

    println!("\n✅ Dry run complete. No model calls were made.");
    Ok(0)
}

/// Print the console summary.
fn print_summary(report: &Report, duration: f64) {
    let aggregate = &report.aggregate;

    println!("\n📊 Analysis Summary:");
    println!(
        "   Documents: {} analyzed, {} failed",
        report.metadata.documents_analyzed, report.metadata.documents_failed
    );
    println!(
        "   - 🔴 Hawkish: {} | 🟢 Dovish: {} | 🟡 Neutral: {} | 🔵 Hold: {}",
        aggregate.hawkish, aggregate.dovish, aggregate.neutral, aggregate.hold
    );
    if aggregate.sources > 0 {
        let bias = overall_bias(aggregate);
        println!("   Overall: {} {}", bias.emoji(), bias);
    }
    if let Some(probability) = aggregate.average_rate_change_probability {
        println!(
            "   Avg. rate change probability: {:.0}%",
            probability * 100.0
        );
    }
    println!("   Duration: {:.1}s", duration);
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewatch::models::{Coverage, GrowthOutlook, InflationConcern, Stance};

    fn completed(label: &str, degraded: bool) -> DocumentReport {
        DocumentReport {
            source_label: label.to_string(),
            origin: format!("{}.txt", label),
            char_count: 1_000,
            outcome: DocumentOutcome::Completed {
                result: SynthesizedResult {
                    source_label: label.to_string(),
                    stance: Stance::Hold,
                    confidence: 0.4,
                    raw_confidence: 0.8,
                    rate_change_probability: None,
                    direction: None,
                    top_signals: vec![],
                    inflation_concern: InflationConcern::Medium,
                    growth_outlook: GrowthOutlook::Moderate,
                    summary: "Rates on hold.".to_string(),
                    coverage: Coverage {
                        total: 2,
                        succeeded: 1,
                        failed: 1,
                    },
                    degraded,
                    analyzed_at: Utc::now(),
                },
                partials: vec![],
            },
        }
    }

    fn report_of(documents: Vec<DocumentReport>, documents_failed: usize) -> Report {
        let results: Vec<&SynthesizedResult> =
            documents.iter().filter_map(|d| d.result()).collect();
        let aggregate = AggregateSummary::from_results(&results);
        Report {
            metadata: ReportMetadata {
                generated_at: Utc::now(),
                provider: "ollama".to_string(),
                model_used: "test-model".to_string(),
                documents_analyzed: documents.len(),
                documents_failed,
                duration_seconds: 1.0,
            },
            documents,
            aggregate,
        }
    }

    #[test]
    fn test_exit_code_success() {
        let report = report_of(vec![completed("Minutes", false)], 0);
        assert_eq!(exit_code(&report, false, true), 0);
    }

    #[test]
    fn test_exit_code_degraded() {
        let report = report_of(vec![completed("Minutes", true), completed("Speech", false)], 0);
        assert_eq!(exit_code(&report, false, true), 2);
        assert_eq!(exit_code(&report, false, false), 0);
    }

    #[test]
    fn test_exit_code_failed_document() {
        let report = report_of(vec![completed("Minutes", false)], 1);
        assert_eq!(exit_code(&report, false, true), 2);
    }

    #[test]
    fn test_exit_code_interrupted() {
        let report = report_of(vec![completed("Minutes", true)], 0);
        assert_eq!(exit_code(&report, true, true), 1);
    }
}
