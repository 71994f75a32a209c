//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::Provider;
use clap::Parser;
use std::fmt;
use std::path::PathBuf;

/// ratewatch - chunked LLM analysis of central bank communications
///
/// Splits each document into overlapping segments, analyzes every segment
/// independently, and synthesizes one monetary policy assessment per
/// document. Markdown/JSON reports.
///
/// Examples:
///   ratewatch --doc "Press Release=statement.txt"
///   ratewatch --doc "MPC Minutes=minutes.txt" --doc "Speech=speech.txt"
///   ratewatch --doc "Minutes=minutes.txt" --provider anthropic --model claude-3-haiku-20240307
///   cat report.txt | ratewatch --doc "Monetary Policy Report=-" --format json
///   ratewatch --doc "Minutes=minutes.txt" --dry-run
///   ratewatch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Document to analyze, as LABEL=PATH
    ///
    /// The label is the document type used in the analysis framing
    /// (e.g. "Press Release"). Use "-" as the path to read stdin.
    /// May be given several times.
    #[arg(
        short,
        long = "doc",
        value_name = "LABEL=PATH",
        value_parser = parse_document_arg,
        required_unless_present = "init_config"
    )]
    pub docs: Vec<DocumentArg>,

    /// Analysis backend
    #[arg(long, value_name = "PROVIDER")]
    pub provider: Option<Provider>,

    /// Model to use for analysis
    ///
    /// Can also be set via RATEWATCH_MODEL env var or .ratewatch.toml config.
    #[arg(short, long, env = "RATEWATCH_MODEL")]
    pub model: Option<String>,

    /// API endpoint URL (defaults to the provider's standard endpoint)
    #[arg(long, value_name = "URL", env = "RATEWATCH_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .ratewatch.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Temperature for LLM responses (0.0 - 1.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Timeout for a single analysis call, in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Largest segment size, in characters
    #[arg(long, value_name = "CHARS")]
    pub max_segment_size: Option<usize>,

    /// Characters shared by consecutive segments
    #[arg(long, value_name = "CHARS")]
    pub overlap: Option<usize>,

    /// Maximum analysis calls in flight at once
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Minimum gap between the starts of consecutive calls, in milliseconds
    #[arg(long, value_name = "MS")]
    pub min_spacing_ms: Option<u64>,

    /// Abandon a document's run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub run_timeout: Option<u64>,

    /// Exit with code 2 if any document failed or came back degraded
    ///
    /// Useful for scheduled jobs that should alert on partial coverage.
    #[arg(long)]
    pub fail_on_degraded: bool,

    /// Dry run: segment the documents without calling the model
    ///
    /// Shows the segment plan for each document and exits.
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .ratewatch.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Where a document's text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    Stdin,
    File(PathBuf),
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::Stdin => write!(f, "<stdin>"),
            DocumentSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A `--doc` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentArg {
    pub label: String,
    pub source: DocumentSource,
}

/// Parse `LABEL=PATH`. A bare path is labelled with its file stem.
fn parse_document_arg(raw: &str) -> Result<DocumentArg, String> {
    let (label, path) = match raw.split_once('=') {
        Some((label, path)) => (label.trim().to_string(), path.trim()),
        None => {
            let path = raw.trim();
            let stem = std::path::Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Document".to_string());
            (stem, path)
        }
    };

    if label.is_empty() {
        return Err(format!("missing document label in '{}'", raw));
    }
    if path.is_empty() {
        return Err(format!("missing document path in '{}'", raw));
    }

    let source = if path == "-" {
        DocumentSource::Stdin
    } else {
        DocumentSource::File(PathBuf::from(path))
    };

    Ok(DocumentArg { label, source })
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.docs.is_empty() {
            return Err("At least one --doc is required".to_string());
        }

        let stdin_docs = self
            .docs
            .iter()
            .filter(|d| d.source == DocumentSource::Stdin)
            .count();
        if stdin_docs > 1 {
            return Err("Only one document can be read from stdin".to_string());
        }

        for doc in &self.docs {
            if let DocumentSource::File(ref path) = doc.source {
                if !path.is_file() {
                    return Err(format!("Document file does not exist: {}", path.display()));
                }
            }
        }

        // Endpoint format only matters when the model is called
        if !self.dry_run {
            if let Some(ref endpoint) = self.endpoint {
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    return Err("Endpoint URL must start with 'http://' or 'https://'".to_string());
                }
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.max_segment_size == Some(0) {
            return Err("Max segment size must be at least 1".to_string());
        }

        if let (Some(size), Some(overlap)) = (self.max_segment_size, self.overlap) {
            if overlap >= size {
                return Err("Overlap must be smaller than the max segment size".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.run_timeout == Some(0) {
            return Err("Run timeout must be at least 1 second".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            docs: vec![DocumentArg {
                label: "Press Release".to_string(),
                source: DocumentSource::Stdin,
            }],
            provider: None,
            model: None,
            endpoint: None,
            output: None,
            config: None,
            verbose: false,
            quiet: false,
            format: OutputFormat::Markdown,
            temperature: None,
            timeout: None,
            max_segment_size: None,
            overlap: None,
            concurrency: None,
            min_spacing_ms: None,
            run_timeout: None,
            fail_on_degraded: false,
            dry_run: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_document_arg() {
        let doc = parse_document_arg("MPC Minutes=minutes.txt").unwrap();
        assert_eq!(doc.label, "MPC Minutes");
        assert_eq!(doc.source, DocumentSource::File(PathBuf::from("minutes.txt")));

        let doc = parse_document_arg("Speech=-").unwrap();
        assert_eq!(doc.source, DocumentSource::Stdin);

        let doc = parse_document_arg("reports/statement.txt").unwrap();
        assert_eq!(doc.label, "statement");

        assert!(parse_document_arg("=file.txt").is_err());
        assert!(parse_document_arg("Label=").is_err());
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "ratewatch",
            "--doc",
            "Minutes=-",
            "--provider",
            "anthropic",
            "--overlap",
            "200",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.docs.len(), 1);
        assert_eq!(args.provider, Some(Provider::Anthropic));
        assert_eq!(args.overlap, Some(200));
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_doc_required_unless_init_config() {
        assert!(Args::try_parse_from(["ratewatch"]).is_err());
        assert!(Args::try_parse_from(["ratewatch", "--init-config"]).is_ok());
    }

    #[test]
    fn test_validation_missing_file() {
        let mut args = make_args();
        args.docs[0].source = DocumentSource::File(PathBuf::from("/nonexistent/doc.txt"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_two_stdin_docs() {
        let mut args = make_args();
        args.docs.push(args.docs[0].clone());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_overlap_too_large() {
        let mut args = make_args();
        args.max_segment_size = Some(1000);
        args.overlap = Some(1000);
        assert!(args.validate().is_err());

        args.overlap = Some(999);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_endpoint() {
        let mut args = make_args();
        args.endpoint = Some("localhost:11434".to_string());
        assert!(args.validate().is_err());

        args.dry_run = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
