//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.threadpulse.toml` files. API keys never live here; they come from the
//! environment or the command line.

use crate::batching::BatchProfile;
use crate::error::ConfigurationError;
use crate::provider::{ProviderKind, ProviderPreference, ProviderSettings};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".threadpulse.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Retry settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Text filter settings.
    #[serde(default)]
    pub filter: FilterConfig,
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
    "threadpulse_report.json".to_string()
}

/// Provider selection and generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Which backend to prefer: auto, gemini or anthropic.
    #[serde(default)]
    pub preference: ProviderPreference,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Maximum tokens in each response.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Primary backend.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Fallback backend.
    #[serde(default)]
    pub anthropic: AnthropicConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            preference: ProviderPreference::Auto,
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
            max_output_tokens: default_max_output_tokens(),
            gemini: GeminiConfig::default(),
            anthropic: AnthropicConfig::default(),
        }
    }
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    120
}

fn default_max_output_tokens() -> u32 {
    8192
}

/// Gemini settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_model")]
    pub model: String,

    #[serde(default = "default_gemini_url")]
    pub base_url: String,

    /// Texts per request.
    #[serde(default = "default_gemini_batch_size")]
    pub batch_size: usize,

    /// Per-text character limit.
    #[serde(default = "default_gemini_max_text_chars")]
    pub max_text_chars: usize,

    /// Pause between batches in milliseconds.
    #[serde(default = "default_gemini_pacing")]
    pub pacing_ms: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: default_gemini_model(),
            base_url: default_gemini_url(),
            batch_size: default_gemini_batch_size(),
            max_text_chars: default_gemini_max_text_chars(),
            pacing_ms: default_gemini_pacing(),
        }
    }
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_gemini_batch_size() -> usize {
    BatchProfile::primary().batch_size
}

fn default_gemini_max_text_chars() -> usize {
    BatchProfile::primary().max_text_chars
}

fn default_gemini_pacing() -> u64 {
    BatchProfile::primary().pacing.as_millis() as u64
}

/// Anthropic settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default = "default_anthropic_model")]
    pub model: String,

    #[serde(default = "default_anthropic_url")]
    pub base_url: String,

    /// Texts per request.
    #[serde(default = "default_anthropic_batch_size")]
    pub batch_size: usize,

    /// Per-text character limit.
    #[serde(default = "default_anthropic_max_text_chars")]
    pub max_text_chars: usize,

    /// Pause between batches in milliseconds.
    #[serde(default = "default_anthropic_pacing")]
    pub pacing_ms: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            model: default_anthropic_model(),
            base_url: default_anthropic_url(),
            batch_size: default_anthropic_batch_size(),
            max_text_chars: default_anthropic_max_text_chars(),
            pacing_ms: default_anthropic_pacing(),
        }
    }
}

fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_anthropic_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_batch_size() -> usize {
    BatchProfile::fallback().batch_size
}

fn default_anthropic_max_text_chars() -> usize {
    BatchProfile::fallback().max_text_chars
}

fn default_anthropic_pacing() -> u64 {
    BatchProfile::fallback().pacing.as_millis() as u64
}

/// Retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per batch, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Backoff scale for rate-limited calls.
    #[serde(default = "default_rate_limit_backoff")]
    pub rate_limit_backoff_ms: u64,

    /// Backoff scale for overloaded backends.
    #[serde(default = "default_overloaded_backoff")]
    pub overloaded_backoff_ms: u64,

    /// Backoff scale for other transient failures.
    #[serde(default = "default_transient_backoff")]
    pub transient_backoff_ms: u64,

    /// Longest server-requested wait that is honored.
    #[serde(default = "default_max_retry_after")]
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            rate_limit_backoff_ms: default_rate_limit_backoff(),
            overloaded_backoff_ms: default_overloaded_backoff(),
            transient_backoff_ms: default_transient_backoff(),
            max_retry_after_secs: default_max_retry_after(),
        }
    }
}

fn default_max_attempts() -> usize {
    3
}

fn default_rate_limit_backoff() -> u64 {
    5000
}

fn default_overloaded_backoff() -> u64 {
    2000
}

fn default_transient_backoff() -> u64 {
    3000
}

fn default_max_retry_after() -> u64 {
    60
}

/// Text filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Texts shorter than this are dropped.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,

    /// Texts shorter than this need a word or some votes.
    #[serde(default = "default_short_text_chars")]
    pub short_text_chars: usize,

    /// Votes that keep a short, wordless text.
    #[serde(default = "default_short_text_min_weight")]
    pub short_text_min_weight: i64,

    /// Votes that keep a low-effort phrase.
    #[serde(default = "default_low_effort_min_weight")]
    pub low_effort_min_weight: i64,

    /// Extra low-effort phrases.
    #[serde(default)]
    pub extra_low_effort: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_chars: default_min_chars(),
            short_text_chars: default_short_text_chars(),
            short_text_min_weight: default_short_text_min_weight(),
            low_effort_min_weight: default_low_effort_min_weight(),
            extra_low_effort: Vec::new(),
        }
    }
}

fn default_min_chars() -> usize {
    5
}

fn default_short_text_chars() -> usize {
    15
}

fn default_short_text_min_weight() -> i64 {
    5
}

fn default_low_effort_min_weight() -> i64 {
    10
}

impl ProviderConfig {
    /// Resolved connection settings for one variant.
    pub fn settings(&self, kind: ProviderKind) -> Result<ProviderSettings, ConfigurationError> {
        let (model, base_url, batch_size, max_text_chars, pacing_ms) = match kind {
            ProviderKind::Gemini => (
                &self.gemini.model,
                &self.gemini.base_url,
                self.gemini.batch_size,
                self.gemini.max_text_chars,
                self.gemini.pacing_ms,
            ),
            ProviderKind::Anthropic => (
                &self.anthropic.model,
                &self.anthropic.base_url,
                self.anthropic.batch_size,
                self.anthropic.max_text_chars,
                self.anthropic.pacing_ms,
            ),
        };

        let invalid = |setting: &'static str, message: &str| ConfigurationError::InvalidSetting {
            provider: kind,
            setting,
            message: message.to_string(),
        };

        if model.trim().is_empty() {
            return Err(invalid("model", "must not be empty"));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(invalid("base URL", "must start with 'http://' or 'https://'"));
        }
        if batch_size == 0 {
            return Err(invalid("batch size", "must be at least 1"));
        }
        if max_text_chars == 0 {
            return Err(invalid("max text chars", "must be at least 1"));
        }
        if self.timeout_seconds == 0 {
            return Err(invalid("timeout", "must be at least 1 second"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("temperature", "must be between 0.0 and 2.0"));
        }

        Ok(ProviderSettings {
            model: model.clone(),
            base_url: base_url.clone(),
            profile: BatchProfile {
                batch_size,
                max_text_chars,
                pacing: Duration::from_millis(pacing_ms),
            },
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            timeout: Duration::from_secs(self.timeout_seconds),
        })
    }
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

    /// Try to load `.threadpulse.toml` from a directory.
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
    /// Only values given explicitly on the command line override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        if let Some(preference) = args.provider {
            self.provider.preference = preference;
        }

        if let Some(timeout) = args.timeout {
            self.provider.timeout_seconds = timeout;
        }

        // Applies to whichever variant ends up serving the run
        if let Some(batch_size) = args.batch_size {
            self.provider.gemini.batch_size = batch_size;
            self.provider.anthropic.batch_size = batch_size;
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.provider.preference, ProviderPreference::Auto);
        assert_eq!(config.provider.gemini.batch_size, 50);
        assert_eq!(config.provider.anthropic.batch_size, 20);
        assert_eq!(config.provider.anthropic.pacing_ms, 3000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.filter.min_chars, 5);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "sentiment.json"
verbose = true

[provider]
preference = "anthropic"
temperature = 0.3

[provider.anthropic]
model = "claude-sonnet-4-0"
batch_size = 10

[retry]
max_attempts = 5

[filter]
extra_low_effort = ["nice"]
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "sentiment.json");
        assert!(config.general.verbose);
        assert_eq!(config.provider.preference, ProviderPreference::Anthropic);
        assert_eq!(config.provider.temperature, 0.3);
        assert_eq!(config.provider.anthropic.model, "claude-sonnet-4-0");
        assert_eq!(config.provider.anthropic.batch_size, 10);
        // Unset fields keep their per-variant defaults
        assert_eq!(config.provider.anthropic.max_text_chars, 500);
        assert_eq!(config.provider.gemini.model, "gemini-2.0-flash");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.transient_backoff_ms, 3000);
        assert_eq!(config.filter.extra_low_effort, vec!["nice"]);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[provider]"));
        assert!(toml_str.contains("[provider.gemini]"));
        assert!(toml_str.contains("[provider.anthropic]"));
        assert!(toml_str.contains("[retry]"));
        assert!(toml_str.contains("[filter]"));

        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.provider.gemini.pacing_ms, 1000);
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from_dir(dir.path()).unwrap().is_none());

        let mut file = std::fs::File::create(dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        writeln!(file, "[provider]\ntimeout_seconds = 45").unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(config.provider.timeout_seconds, 45);
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[provider\npreference = ").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_settings_per_variant() {
        let config = ProviderConfig::default();

        let gemini = config.settings(ProviderKind::Gemini).unwrap();
        assert_eq!(gemini.profile, BatchProfile::primary());
        assert_eq!(gemini.timeout, Duration::from_secs(120));

        let anthropic = config.settings(ProviderKind::Anthropic).unwrap();
        assert_eq!(anthropic.profile, BatchProfile::fallback());
        assert_eq!(anthropic.model, "claude-3-5-haiku-latest");
    }

    #[test]
    fn test_settings_reject_invalid_values() {
        let mut config = ProviderConfig::default();
        config.anthropic.batch_size = 0;
        assert!(matches!(
            config.settings(ProviderKind::Anthropic),
            Err(ConfigurationError::InvalidSetting { setting: "batch size", .. })
        ));
        assert!(config.settings(ProviderKind::Gemini).is_ok());

        config.gemini.base_url = "localhost:8080".to_string();
        assert!(config.settings(ProviderKind::Gemini).is_err());
    }
}
