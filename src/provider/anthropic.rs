//! Anthropic backend: the constrained fallback provider.

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

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    headers: HeaderMap,
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String, settings: ProviderSettings) -> Result<Self, ConfigurationError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.trim()).map_err(|e| {
                ConfigurationError::InvalidSetting {
                    provider: ProviderKind::Anthropic,
                    setting: "API key",
                    message: e.to_string(),
                }
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = build_client(ProviderKind::Anthropic, settings.timeout)?;
        Ok(Self {
            headers,
            settings,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.settings.base_url.trim_end_matches('/'))
    }

    async fn complete(&self, batch: &Batch) -> ProviderResult<String> {
        let prompt = build_prompt(batch, &self.settings.profile);
        let body = MessagesRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_output_tokens,
            temperature: self.settings.temperature,
            messages: vec![Message {
                role: "user",
                content: vec![ContentBlock {
                    kind: "text",
                    text: &prompt,
                }],
            }],
        };

        debug!(
            "Sending batch {} ({} texts, {} prompt chars) to Anthropic",
            batch.ordinal,
            batch.len(),
            prompt.len()
        );

        let request = self
            .client
            .post(self.endpoint())
            .headers(self.headers.clone())
            .json(&body);
        let response = send(ProviderKind::Anthropic, self.settings.timeout, request).await?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        extract_text(parsed)
    }
}

impl AnalysisProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn profile(&self) -> &BatchProfile {
        &self.settings.profile
    }

    fn analyze<'a>(&'a self, batch: &'a Batch) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(self.complete(batch))
    }
}

/// Join the text blocks of a messages response.
fn extract_text(response: MessagesResponse) -> ProviderResult<String> {
    let text = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseBlock::Text { text } => Some(text),
            ResponseBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    if text.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(text)
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
struct ContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> ProviderSettings {
        ProviderSettings {
            model: "claude-3-5-haiku-latest".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            profile: BatchProfile::fallback(),
            temperature: 0.1,
            max_output_tokens: 4096,
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_provider_identity() {
        let provider = AnthropicProvider::new("key".to_string(), settings()).unwrap();
        assert_eq!(provider.endpoint(), "https://api.anthropic.com/v1/messages");
        assert_eq!(provider.kind(), ProviderKind::Anthropic);
        assert_eq!(provider.model(), "claude-3-5-haiku-latest");
        assert_eq!(provider.profile().batch_size, 20);
        assert_eq!(
            provider.headers["anthropic-version"].to_str().unwrap(),
            ANTHROPIC_VERSION
        );
    }

    #[test]
    fn test_extract_text_skips_non_text_blocks() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"{\"items\":[]}"}],"stop_reason":"end_turn"}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), r#"{"items":[]}"#);
    }

    #[test]
    fn test_extract_text_without_text_blocks() {
        let response: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert!(matches!(
            extract_text(response),
            Err(ProviderError::EmptyResponse)
        ));
    }

    #[test]
    fn test_request_shape() {
        let body = MessagesRequest {
            model: "m",
            max_tokens: 10,
            temperature: 0.0,
            messages: vec![Message {
                role: "user",
                content: vec![ContentBlock {
                    kind: "text",
                    text: "hello",
                }],
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_tokens"], 10);
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
    }
}
