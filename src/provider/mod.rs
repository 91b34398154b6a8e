//! Model backends for batch sentiment analysis.
//!
//! Two interchangeable variants implement [`AnalysisProvider`]:
//!
//! - **Gemini**: high-context primary backend, large batches, long texts
//! - **Anthropic**: constrained fallback backend, small batches, short texts
//!
//! A provider turns one [`Batch`] into one HTTP call and hands back the raw
//! completion text. It has no other behavior and keeps no state between
//! calls. The variant is picked once per run by [`select_provider`].

mod anthropic;
mod gemini;
pub mod prompt;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;

use crate::batching::BatchProfile;
use crate::error::ConfigurationError;
use crate::models::Batch;
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Result type for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// A sentiment backend (Strategy pattern).
///
/// Implementors must be `Send + Sync` so the pipeline can hold them behind a
/// trait object across await points.
pub trait AnalysisProvider: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> ProviderKind;

    /// Model identifier sent with each request.
    fn model(&self) -> &str;

    /// Batch size, truncation and pacing limits for this backend.
    fn profile(&self) -> &BatchProfile;

    /// Send one batch and return the raw completion text.
    fn analyze<'a>(&'a self, batch: &'a Batch) -> BoxFuture<'a, ProviderResult<String>>;
}

/// Provider variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Gemini,
    Anthropic,
}

impl ProviderKind {
    /// Environment variable holding this variant's API key.
    pub fn env_var(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    /// The other variant.
    pub fn alternate(&self) -> Self {
        match self {
            ProviderKind::Gemini => ProviderKind::Anthropic,
            ProviderKind::Anthropic => ProviderKind::Gemini,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Gemini => write!(f, "Gemini"),
            ProviderKind::Anthropic => write!(f, "Anthropic"),
        }
    }
}

/// Which variant the caller would like.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPreference {
    /// Primary if its key is set, otherwise fallback
    #[default]
    Auto,
    /// Gemini (falls back to Anthropic when no Gemini key is set)
    Gemini,
    /// Anthropic (falls back to Gemini when no Anthropic key is set)
    Anthropic,
}

/// API keys available to this run.
#[derive(Clone, Default)]
pub struct Credentials {
    pub gemini: Option<String>,
    pub anthropic: Option<String>,
}

impl Credentials {
    pub fn new(gemini: Option<String>, anthropic: Option<String>) -> Self {
        let usable = |key: Option<String>| key.filter(|k| !k.trim().is_empty());
        Self {
            gemini: usable(gemini),
            anthropic: usable(anthropic),
        }
    }

    /// Key for a variant, if one is set.
    pub fn get(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::Gemini => self.gemini.as_deref(),
            ProviderKind::Anthropic => self.anthropic.as_deref(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("gemini", &self.gemini.as_ref().map(|_| "<set>"))
            .field("anthropic", &self.anthropic.as_ref().map(|_| "<set>"))
            .finish()
    }
}

/// Connection and generation settings of one variant.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub model: String,
    pub base_url: String,
    pub profile: BatchProfile,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

/// Decide which variant serves the run.
///
/// `Auto` prefers the primary backend. An explicit preference without a key
/// falls back to the other variant if that one has a key.
pub fn resolve_kind(
    preference: ProviderPreference,
    credentials: &Credentials,
) -> Result<ProviderKind, ConfigurationError> {
    let wanted = match preference {
        ProviderPreference::Auto | ProviderPreference::Gemini => ProviderKind::Gemini,
        ProviderPreference::Anthropic => ProviderKind::Anthropic,
    };

    if credentials.get(wanted).is_some() {
        return Ok(wanted);
    }

    let alternate = wanted.alternate();
    if credentials.get(alternate).is_some() {
        if preference != ProviderPreference::Auto {
            warn!(
                "{} requested but {} is not set; falling back to {}",
                wanted,
                wanted.env_var(),
                alternate
            );
        }
        return Ok(alternate);
    }

    Err(ConfigurationError::NoCredentials)
}

/// Build the provider that serves this run.
///
/// `settings` is only asked for the variant that was chosen.
pub fn select_provider<F>(
    preference: ProviderPreference,
    credentials: &Credentials,
    settings: F,
) -> Result<Box<dyn AnalysisProvider>, ConfigurationError>
where
    F: FnOnce(ProviderKind) -> Result<ProviderSettings, ConfigurationError>,
{
    let kind = resolve_kind(preference, credentials)?;
    let api_key = credentials
        .get(kind)
        .ok_or(ConfigurationError::NoCredentials)?
        .to_string();
    let settings = settings(kind)?;

    let provider: Box<dyn AnalysisProvider> = match kind {
        ProviderKind::Gemini => Box::new(GeminiProvider::new(api_key, settings)?),
        ProviderKind::Anthropic => Box::new(AnthropicProvider::new(api_key, settings)?),
    };

    info!(
        "Using {} provider (model {}, batch size {})",
        provider.kind(),
        provider.model(),
        provider.profile().batch_size
    );

    Ok(provider)
}

/// Errors from a single provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} returned {status}: {}", truncate_body(body))]
    Status {
        provider: ProviderKind,
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cannot connect to {0}")]
    Connect(String),

    #[error("Failed to send request: {0}")]
    Request(String),

    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    #[error("Provider response contained no text")]
    EmptyResponse,
}

impl ProviderError {
    /// Server-requested wait, if the response carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Build an HTTP client with the per-call timeout.
pub(crate) fn build_client(
    kind: ProviderKind,
    timeout: Duration,
) -> Result<reqwest::Client, ConfigurationError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigurationError::HttpClient {
            provider: kind,
            message: e.to_string(),
        })
}

/// Send a prepared request and fail on non-success status.
pub(crate) async fn send(
    kind: ProviderKind,
    timeout: Duration,
    request: reqwest::RequestBuilder,
) -> ProviderResult<reqwest::Response> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Timeout(timeout)
        } else if e.is_connect() {
            ProviderError::Connect(kind.to_string())
        } else {
            ProviderError::Request(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            provider: kind,
            status,
            body,
            retry_after,
        });
    }

    Ok(response)
}

/// Read a `Retry-After` header given in whole seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// First line of an error body, at most 200 characters.
fn truncate_body(body: &str) -> String {
    let first_line = body.lines().next().unwrap_or("").trim();
    match first_line.char_indices().nth(200) {
        Some((idx, _)) => format!("{}...", &first_line[..idx]),
        None => first_line.to_string(),
    }
}
