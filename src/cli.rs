//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::provider::{Credentials, ProviderPreference};
use clap::Parser;
use std::path::PathBuf;

/// ThreadPulse - LLM-powered sentiment analysis for community threads
///
/// Scores every post title, body and comment in a JSON export of forum
/// threads, then reports overall mood, themes, per-community and daily
/// breakdowns.
///
/// Examples:
///   threadpulse --input posts.json
///   threadpulse --input posts.json --provider anthropic --format markdown
///   threadpulse --input posts.json --dry-run
///   threadpulse --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// JSON file with an array of posts to analyze
    #[arg(
        short,
        long,
        value_name = "FILE",
        required_unless_present = "init_config"
    )]
    pub input: Option<PathBuf>,

    /// Output file path for the report
    ///
    /// Default: from config or threadpulse_report.json
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (json, markdown)
    #[arg(long, default_value = "json", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Provider to use (auto, gemini, anthropic)
    ///
    /// auto prefers Gemini when GEMINI_API_KEY is set.
    #[arg(short, long, value_name = "PROVIDER")]
    pub provider: Option<ProviderPreference>,

    /// Texts per provider request
    ///
    /// Overrides the per-provider default (Gemini 50, Anthropic 20).
    #[arg(long, value_name = "COUNT")]
    pub batch_size: Option<usize>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .threadpulse.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: collect and plan batches without calling a provider
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .threadpulse.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Markdown format
    Markdown,
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

        match self.input {
            Some(ref input) if !input.is_file() => {
                return Err(format!("Input file does not exist: {}", input.display()));
            }
            None => return Err("An --input file is required".to_string()),
            _ => {}
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.batch_size == Some(0) {
            return Err("Batch size must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
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

    /// API keys given on the command line or in the environment.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.gemini_api_key.clone(), self.anthropic_api_key.clone())
    }
}
