//! Fatal errors raised before a run starts.
//!
//! Everything that can go wrong once batches are flowing is isolated to its
//! batch (see [`crate::retry`] and [`crate::parser`]); only configuration
//! problems abort a run.

use crate::provider::ProviderKind;
use thiserror::Error;

/// No usable provider could be set up.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("No API key configured for any provider. Set GEMINI_API_KEY or ANTHROPIC_API_KEY.")]
    NoCredentials,

    #[error("Failed to build HTTP client for {provider}: {message}")]
    HttpClient {
        provider: ProviderKind,
        message: String,
    },

    #[error("Invalid {setting} for {provider}: {message}")]
    InvalidSetting {
        provider: ProviderKind,
        setting: &'static str,
        message: String,
    },
}
