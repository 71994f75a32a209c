//! Markdown report generation.
//!
//! This module generates Markdown and JSON monitoring reports from the
//! results of one run over one or more documents.

use crate::analysis::{failure_breakdown, overall_bias, rate_outlook};
use crate::cli::OutputFormat;
use crate::config::ReportConfig;
use crate::models::{
    AggregateSummary, DocumentOutcome, DocumentReport, PartialResult, Report, ReportMetadata,
    SegmentStatus, Stance, SynthesizedResult,
};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report, options: &ReportConfig) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# Monetary Policy Monitoring Report\n\n");

    // Metadata section
    output.push_str(&generate_metadata_section(&report.metadata));

    // Table of contents
    output.push_str(&generate_table_of_contents(report));

    // Aggregate analysis
    output.push_str(&generate_aggregate_section(&report.aggregate));

    // One section per document
    output.push_str("## Individual Source Analyses\n\n");
    for (i, document) in report.documents.iter().enumerate() {
        output.push_str(&generate_document_section(i + 1, document, options));
    }

    // Insights
    output.push_str(&generate_insights_section(&report.aggregate));

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Provider:** {}\n", metadata.provider));
    section.push_str(&format!("- **Model Used:** `{}`\n", metadata.model_used));
    section.push_str(&format!(
        "- **Documents Analyzed:** {}\n",
        metadata.documents_analyzed
    ));
    if metadata.documents_failed > 0 {
        section.push_str(&format!(
            "- **Documents Failed:** {}\n",
            metadata.documents_failed
        ));
    }
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &Report) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Aggregate Analysis](#aggregate-analysis)\n");
    toc.push_str("- [Individual Source Analyses](#individual-source-analyses)\n");

    for (i, document) in report.documents.iter().enumerate() {
        toc.push_str(&format!(
            "  - [{}. {}](#{})\n",
            i + 1,
            document.source_label,
            anchor(i + 1, &document.source_label)
        ));
    }

    toc.push_str("- [Actionable Insights](#actionable-insights)\n\n");

    toc
}

fn anchor(position: usize, label: &str) -> String {
    let slug: String = label
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!("{}-{}", position, slug)
}

/// Generate the cross-document aggregate section.
fn generate_aggregate_section(aggregate: &AggregateSummary) -> String {
    let mut section = String::new();

    section.push_str(&format!(
        "## Aggregate Analysis\n\n*Based on {} source(s)*\n\n",
        aggregate.sources
    ));

    if aggregate.sources == 0 {
        section.push_str("No document produced a final assessment.\n\n");
        return section;
    }

    if let Some(confidence) = aggregate.average_confidence {
        section.push_str(&format!(
            "- **Average Confidence:** {:.1}%\n",
            confidence * 100.0
        ));
    }
    if let Some(probability) = aggregate.average_rate_change_probability {
        section.push_str(&format!(
            "- **Average Rate Change Probability (3 months):** {:.1}%\n",
            probability * 100.0
        ));
    }
    section.push('\n');

    section.push_str("### Stance Distribution\n\n");
    section.push_str("| Stance | Meaning | Sources |\n");
    section.push_str("|:---|:---|:---:|\n");
    for (stance, count) in [
        (Stance::Hawkish, aggregate.hawkish),
        (Stance::Dovish, aggregate.dovish),
        (Stance::Neutral, aggregate.neutral),
        (Stance::Hold, aggregate.hold),
    ] {
        section.push_str(&format!(
            "| {} {} | {} | {} |\n",
            stance.emoji(),
            stance,
            stance.description(),
            count
        ));
    }
    section.push('\n');

    let bias = overall_bias(aggregate);
    section.push_str(&format!(
        "**Overall Assessment:** {} {} - {}\n\n",
        bias.emoji(),
        bias,
        bias.description()
    ));

    section
}

/// Generate the section for one document.
fn generate_document_section(
    position: usize,
    document: &DocumentReport,
    options: &ReportConfig,
) -> String {
    let mut section = String::new();

    let emoji = document.result().map(|r| r.stance.emoji()).unwrap_or("❌");
    section.push_str(&format!(
        "### {} {}. {} {{#{}}}\n\n",
        emoji,
        position,
        document.source_label,
        anchor(position, &document.source_label)
    ));
    section.push_str(&format!(
        "*Source: {} | Length: {} chars*\n\n",
        document.origin, document.char_count
    ));

    match &document.outcome {
        DocumentOutcome::Completed { result, .. } => {
            section.push_str(&generate_assessment_block(result));
        }
        DocumentOutcome::Failed {
            error_kind,
            message,
            state,
            coverage,
            partials,
        } => {
            section.push_str(&format!(
                "> ❌ **Analysis failed ({})** while {}\n>\n",
                error_kind, state
            ));
            section.push_str(&format!("> {}\n\n", message));
            section.push_str(&format!("**Coverage:** {}\n\n", coverage));

            let breakdown = failure_breakdown(partials);
            if !breakdown.is_empty() {
                section.push_str("| Failure | Segments |\n");
                section.push_str("|:---|:---:|\n");
                for (kind, count) in breakdown {
                    section.push_str(&format!("| {} | {} |\n", kind, count));
                }
                section.push('\n');
            }
        }
    }

    if options.include_segments && !document.partials().is_empty() {
        section.push_str(&generate_segment_table(
            document.partials(),
            options.max_signals_per_segment,
        ));
    }

    section.push_str("---\n\n");

    section
}

/// Generate the final assessment block of a completed document.
fn generate_assessment_block(result: &SynthesizedResult) -> String {
    let mut block = String::new();

    if result.degraded {
        block.push_str(&format!(
            "> ⚠️ **Degraded result:** only {}. Confidence capped.\n\n",
            result.coverage
        ));
    }

    block.push_str("| Field | Value |\n");
    block.push_str("|:---|:---|\n");
    block.push_str(&format!(
        "| Stance | {} {} ({}) |\n",
        result.stance.emoji(),
        result.stance,
        result.stance.description()
    ));
    block.push_str(&format!(
        "| Confidence | {:.0}% (reported {:.0}%) |\n",
        result.confidence * 100.0,
        result.raw_confidence * 100.0
    ));
    match result.rate_change_probability {
        Some(p) => block.push_str(&format!("| Rate Change Probability | {:.0}% |\n", p * 100.0)),
        None => block.push_str("| Rate Change Probability | N/A |\n"),
    }
    block.push_str(&format!(
        "| Direction | {} |\n",
        result
            .direction
            .map(|d| d.to_string())
            .unwrap_or_else(|| "N/A".to_string())
    ));
    block.push_str(&format!("| Inflation Concern | {} |\n", result.inflation_concern));
    block.push_str(&format!("| Growth Outlook | {} |\n", result.growth_outlook));
    block.push_str(&format!("| Coverage | {} |\n\n", result.coverage));

    if !result.summary.is_empty() {
        block.push_str(&format!("**Summary:** {}\n\n", result.summary));
    }

    if !result.top_signals.is_empty() {
        block.push_str("**Key Signals:**\n\n");
        block.push_str("| # | Signal | Importance | Polarity | Parts |\n");
        block.push_str("|:---:|:---|:---:|:---:|:---:|\n");
        for (i, signal) in result.top_signals.iter().enumerate() {
            block.push_str(&format!(
                "| {} | {} | {:.2} | {} | {} |\n",
                i + 1,
                escape_cell(&signal.text),
                signal.importance,
                signal
                    .polarity
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                signal.parts_label()
            ));
        }
        block.push('\n');
    }

    block
}

/// Generate the per-segment audit table.
fn generate_segment_table(partials: &[PartialResult], max_signals: usize) -> String {
    let mut table = String::new();

    table.push_str("<details>\n<summary>Segment audit</summary>\n\n");
    table.push_str("| Part | Status | Attempts | Inflation | Growth | Signals |\n");
    table.push_str("|:---:|:---|:---:|:---:|:---:|:---|\n");

    for partial in partials {
        let part = partial.segment_index + 1;
        match &partial.status {
            SegmentStatus::Succeeded(findings) => {
                let signals: Vec<String> = findings
                    .key_signals
                    .iter()
                    .take(max_signals)
                    .map(|s| escape_cell(&s.text))
                    .collect();
                table.push_str(&format!(
                    "| {} | ✅ ok | {} | {} | {} | {} |\n",
                    part,
                    partial.attempts,
                    findings.inflation_concern,
                    findings.growth_outlook,
                    signals.join("; ")
                ));
            }
            SegmentStatus::Failed(failure) => {
                table.push_str(&format!(
                    "| {} | ❌ {} | {} | - | - | {} |\n",
                    part,
                    failure.kind,
                    partial.attempts,
                    escape_cell(&failure.message)
                ));
            }
        }
    }

    table.push_str("\n</details>\n\n");

    table
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Generate the actionable insights section.
fn generate_insights_section(aggregate: &AggregateSummary) -> String {
    let mut section = String::new();

    section.push_str("## Actionable Insights\n\n");

    match aggregate.average_rate_change_probability {
        Some(probability) => {
            let outlook = rate_outlook(probability);
            section.push_str(&format!("**{} {}**\n\n", outlook.emoji(), outlook.headline()));
            for line in outlook.advice() {
                section.push_str(&format!("- {}\n", line));
            }
            section.push('\n');
        }
        None => {
            section.push_str("No rate change probability was reported.\n\n");
        }
    }

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by ratewatch v{}. Automated analysis; not financial advice.*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Render the report in the requested format and write it to `path`.
pub fn write_report(
    report: &Report,
    path: &Path,
    format: OutputFormat,
    options: &ReportConfig,
) -> Result<()> {
    let content = match format {
        OutputFormat::Json => generate_json_report(report)?,
        OutputFormat::Markdown => generate_markdown_report(report, options),
    };

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Coverage, Direction, FailureKind, GrowthOutlook, InflationConcern, Polarity,
        RankedSignal, SegmentFailure, SegmentFindings, SegmentSignal,
    };
    use chrono::Utc;

    fn create_test_result(degraded: bool) -> SynthesizedResult {
        SynthesizedResult {
            source_label: "Press Release".to_string(),
            stance: Stance::Hawkish,
            confidence: 0.6,
            raw_confidence: 0.8,
            rate_change_probability: Some(0.7),
            direction: Some(Direction::Up),
            top_signals: vec![RankedSignal {
                text: "Core inflation | sticky".to_string(),
                importance: 0.9,
                polarity: Some(Polarity::Hawkish),
                supporting_segments: vec![0, 2],
            }],
            inflation_concern: InflationConcern::High,
            growth_outlook: GrowthOutlook::Moderate,
            summary: "Further tightening is possible.".to_string(),
            coverage: Coverage {
                total: 4,
                succeeded: 3,
                failed: 1,
            },
            degraded,
            analyzed_at: Utc::now(),
        }
    }

    fn create_test_partials() -> Vec<PartialResult> {
        vec![
            PartialResult::succeeded(
                0,
                SegmentFindings {
                    key_signals: vec![SegmentSignal {
                        text: "Core inflation sticky".to_string(),
                        polarity: Polarity::Hawkish,
                        strength: 0.8,
                    }],
                    inflation_concern: InflationConcern::High,
                    growth_outlook: GrowthOutlook::Moderate,
                    rate_change_indicators: vec![],
                    summary: "Inflation focus".to_string(),
                },
                1,
            ),
            PartialResult::failed(
                1,
                SegmentFailure {
                    kind: FailureKind::Timeout,
                    message: "capability call timed out after 120s".to_string(),
                },
                2,
            ),
        ]
    }

    fn create_test_report() -> Report {
        let result = create_test_result(false);
        let aggregate = AggregateSummary::from_results(&[&result]);

        Report {
            metadata: ReportMetadata {
                generated_at: Utc::now(),
                provider: "ollama".to_string(),
                model_used: "test-model".to_string(),
                documents_analyzed: 2,
                documents_failed: 1,
                duration_seconds: 12.5,
            },
            documents: vec![
                DocumentReport {
                    source_label: "Press Release".to_string(),
                    origin: "release.txt".to_string(),
                    char_count: 120_000,
                    outcome: DocumentOutcome::Completed {
                        result,
                        partials: create_test_partials(),
                    },
                },
                DocumentReport {
                    source_label: "Speech".to_string(),
                    origin: "<stdin>".to_string(),
                    char_count: 900,
                    outcome: DocumentOutcome::Failed {
                        error_kind: "AllSegmentsFailed".to_string(),
                        message: "all 1 segment(s) failed analysis".to_string(),
                        state: "synthesizing".to_string(),
                        coverage: Coverage {
                            total: 1,
                            succeeded: 0,
                            failed: 1,
                        },
                        partials: vec![create_test_partials().remove(1)],
                    },
                },
            ],
            aggregate,
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report, &ReportConfig::default());

        assert!(markdown.contains("# Monetary Policy Monitoring Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Aggregate Analysis"));
        assert!(markdown.contains("🔴 1. Press Release"));
        assert!(markdown.contains("❌ 2. Speech"));
        assert!(markdown.contains("AllSegmentsFailed"));
        assert!(markdown.contains("Segment audit"));
        assert!(markdown.contains("HIGH probability of rate change"));
    }

    #[test]
    fn test_segments_can_be_omitted() {
        let report = create_test_report();
        let options = ReportConfig {
            include_segments: false,
            ..ReportConfig::default()
        };
        let markdown = generate_markdown_report(&report, &options);
        assert!(!markdown.contains("Segment audit"));
    }

    #[test]
    fn test_generate_assessment_block() {
        let block = generate_assessment_block(&create_test_result(true));

        assert!(block.contains("Degraded result"));
        assert!(block.contains("60% (reported 80%)"));
        assert!(block.contains("| Direction | UP |"));
        assert!(block.contains("Core inflation \\| sticky"));
        assert!(block.contains("| 1, 3 |"));
    }

    #[test]
    fn test_generate_segment_table() {
        let table = generate_segment_table(&create_test_partials(), 3);
        assert!(table.contains("| 1 | ✅ ok | 1 | HIGH | MODERATE | Core inflation sticky |"));
        assert!(table.contains("| 2 | ❌ Timeout | 2 |"));
    }

    #[test]
    fn test_aggregate_section_without_results() {
        let section = generate_aggregate_section(&AggregateSummary::default());
        assert!(section.contains("No document produced a final assessment"));
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"outcome\": \"completed\""));
        assert!(json.contains("\"outcome\": \"failed\""));
        assert!(json.contains("\"supporting_segments\""));
        assert!(json.contains("\"status\": \"failed\""));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_report(
            &create_test_report(),
            &path,
            OutputFormat::Json,
            &ReportConfig::default(),
        )
        .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed["documents"].as_array().unwrap().len(), 2);
    }
}
