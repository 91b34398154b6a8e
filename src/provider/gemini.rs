//! Gemini backend: the high-context primary provider.

use super::prompt::build_prompt;
use super::{
    build_client, send, AnalysisProvider, ProviderError, ProviderKind, ProviderResult,
    ProviderSettings,
};
use crate::batching::BatchProfile;
use crate::error::ConfigurationError;
use crate::models::Batch;
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub struct GeminiProvider {
    headers: HeaderMap,
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: String, settings: ProviderSettings) -> Result<Self, ConfigurationError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(api_key.trim()).map_err(|e| {
                ConfigurationError::InvalidSetting {
                    provider: ProviderKind::Gemini,
                    setting: "API key",
                    message: e.to_string(),
                }
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = build_client(ProviderKind::Gemini, settings.timeout)?;
        Ok(Self {
            headers,
            settings,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.model
        )
    }

    async fn generate(&self, batch: &Batch) -> ProviderResult<String> {
        let prompt = build_prompt(batch, &self.settings.profile);
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.settings.temperature,
                max_output_tokens: self.settings.max_output_tokens,
                response_mime_type: "application/json",
            },
        };

        debug!(
            "Sending batch {} ({} texts, {} prompt chars) to Gemini",
            batch.ordinal,
            batch.len(),
            prompt.len()
        );

        let request = self
            .client
            .post(self.endpoint())
            .headers(self.headers.clone())
            .json(&body);
        let response = send(ProviderKind::Gemini, self.settings.timeout, request).await?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        extract_text(parsed)
    }
}

impl AnalysisProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn profile(&self) -> &BatchProfile {
        &self.settings.profile
    }

    fn analyze<'a>(&'a self, batch: &'a Batch) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(self.generate(batch))
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: GenerateResponse) -> ProviderResult<String> {
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(text)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}
