//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.ratewatch.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".ratewatch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "ratewatch_report.md".to_string()
}

/// Which backend serves analysis requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Ollama chat API (default)
    #[default]
    Ollama,
    /// Anthropic Messages API
    Anthropic,
}

impl Provider {
    /// Endpoint used when none is configured.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Provider::Ollama => "http://localhost:11434",
            Provider::Anthropic => "https://api.anthropic.com",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Ollama => write!(f, "ollama"),
            Provider::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Backend serving the model.
    #[serde(default)]
    pub provider: Provider,

    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// API base URL. Falls back to the provider's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Environment variable holding the Anthropic API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens in response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// HTTP client timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            name: default_model(),
            endpoint: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout_seconds: default_timeout(),
        }
    }
}

impl ModelConfig {
    /// Effective API base URL.
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| self.provider.default_endpoint().to_string())
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_timeout() -> u64 {
    300
}

/// Segmenting, pacing and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Largest segment, in characters.
    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: usize,

    /// Characters shared by consecutive segments.
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,

    /// Capability calls allowed in flight at once.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Minimum gap between consecutive call starts, in milliseconds.
    #[serde(default = "default_min_call_spacing_ms")]
    pub min_call_spacing_ms: u64,

    /// Total attempts per segment, including the first.
    #[serde(default = "default_retry_budget")]
    pub retry_budget_per_segment: u32,

    /// Total attempts for the synthesis call.
    #[serde(default = "default_retry_budget")]
    pub synthesis_retry_budget: u32,

    /// Pause between attempts, in milliseconds.
    #[serde(default = "default_retry_pause_ms")]
    pub retry_pause_ms: u64,

    /// Timeout for a single capability call, in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,

    /// Failed fraction above which a result is flagged degraded.
    #[serde(default = "default_failure_tolerance")]
    pub failure_tolerance_fraction: f64,

    /// Confidence ceiling for degraded results.
    #[serde(default = "default_degraded_confidence_cap")]
    pub degraded_confidence_cap: f64,

    /// Signals kept in the final result.
    #[serde(default = "default_top_signal_count")]
    pub top_signal_count: usize,

    /// Wall-clock limit for one document run, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_seconds: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_segment_size: default_max_segment_size(),
            overlap_size: default_overlap_size(),
            max_concurrent_calls: default_max_concurrent_calls(),
            min_call_spacing_ms: default_min_call_spacing_ms(),
            retry_budget_per_segment: default_retry_budget(),
            synthesis_retry_budget: default_retry_budget(),
            retry_pause_ms: default_retry_pause_ms(),
            call_timeout_seconds: default_call_timeout(),
            failure_tolerance_fraction: default_failure_tolerance(),
            degraded_confidence_cap: default_degraded_confidence_cap(),
            top_signal_count: default_top_signal_count(),
            run_timeout_seconds: None,
        }
    }
}

fn default_max_segment_size() -> usize {
    50_000
}

fn default_overlap_size() -> usize {
    1_000
}

fn default_max_concurrent_calls() -> usize {
    2
}

fn default_min_call_spacing_ms() -> u64 {
    1_000
}

fn default_retry_budget() -> u32 {
    2
}

fn default_retry_pause_ms() -> u64 {
    500
}

fn default_call_timeout() -> u64 {
    120
}

fn default_failure_tolerance() -> f64 {
    0.5
}

fn default_degraded_confidence_cap() -> f64 {
    0.5
}

fn default_top_signal_count() -> usize {
    5
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Include the per-segment audit table.
    #[serde(default = "default_true")]
    pub include_segments: bool,

    /// Signals listed per segment in the audit table.
    #[serde(default = "default_max_signals_per_segment")]
    pub max_signals_per_segment: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            include_segments: true,
            max_signals_per_segment: default_max_signals_per_segment(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_signals_per_segment() -> usize {
    3
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.ratewatch.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(DEFAULT_CONFIG_FILE);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(provider) = args.provider {
            self.model.provider = provider;
        }
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref endpoint) = args.endpoint {
            self.model.endpoint = Some(endpoint.clone());
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.pipeline.call_timeout_seconds = timeout;
        }

        if let Some(size) = args.max_segment_size {
            self.pipeline.max_segment_size = size;
        }
        if let Some(overlap) = args.overlap {
            self.pipeline.overlap_size = overlap;
        }
        if let Some(concurrency) = args.concurrency {
            self.pipeline.max_concurrent_calls = concurrency;
        }
        if let Some(spacing) = args.min_spacing_ms {
            self.pipeline.min_call_spacing_ms = spacing;
        }
        if let Some(run_timeout) = args.run_timeout {
            self.pipeline.run_timeout_seconds = Some(run_timeout);
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }

        // The HTTP client must never cut a call shorter than the pipeline allows.
        self.model.timeout_seconds = self
            .model
            .timeout_seconds
            .max(self.pipeline.call_timeout_seconds);
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
