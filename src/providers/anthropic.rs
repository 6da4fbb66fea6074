//! Messages API generator.
//!
//! Sends the system prompt as a cacheable content block and attaches
//! screenshots as base64 image blocks ahead of the text prompt. JSON requests
//! are prefilled with `{` so the reply starts inside the object.

use async_trait::async_trait;
use clonewright_common::{
    CollaboratorError, Completion, CompletionRequest, Generator, ResponseFormat, TokenUsage,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    timeout: Option<Duration>,
}

impl AnthropicGenerator {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: None,
        }
    }

    /// Read the key from the named environment variable.
    pub fn from_env(
        api_url: impl Into<String>,
        api_key_env: &str,
        model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let api_key = std::env::var(api_key_env)
            .map_err(|_| anyhow::anyhow!("{api_key_env} is not set"))?;
        Ok(Self::new(api_url, api_key, model))
    }

    /// Client-side ceiling on a single HTTP exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let Ok(client) = reqwest::Client::builder().timeout(timeout).build() {
            self.client = client;
            self.timeout = Some(timeout);
        }
        self
    }
}

/// Request body for one completion.
fn build_body(model: &str, request: &CompletionRequest) -> Value {
    let mut system_block = json!({ "type": "text", "text": request.system });
    if request.cache_system {
        system_block["cache_control"] = json!({ "type": "ephemeral" });
    }

    let mut content: Vec<Value> = request
        .images
        .iter()
        .map(|image| {
            json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": image.media_type,
                    "data": image.data,
                }
            })
        })
        .collect();
    content.push(json!({ "type": "text", "text": request.prompt }));

    let mut messages = vec![json!({ "role": "user", "content": content })];
    if request.format == ResponseFormat::Json {
        messages.push(json!({ "role": "assistant", "content": "{" }));
    }

    json!({
        "model": model,
        "max_tokens": request.max_tokens,
        "system": [system_block],
        "messages": messages,
    })
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn parse_response(body: Value, format: ResponseFormat) -> Result<Completion, CollaboratorError> {
    let response: MessagesResponse = serde_json::from_value(body)
        .map_err(|e| CollaboratorError::Malformed(format!("messages response: {e}")))?;

    let mut text: String = response
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text.as_str())
        .collect();
    if text.trim().is_empty() {
        return Err(CollaboratorError::Malformed(
            "response contained no text".to_string(),
        ));
    }
    if format == ResponseFormat::Json && !text.trim_start().starts_with('{') {
        text.insert(0, '{');
    }

    let usage = response
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        })
        .unwrap_or_default();
    Ok(Completion { text, usage })
}

#[async_trait]
impl Generator for AnthropicGenerator {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CollaboratorError> {
        let body = build_body(&self.model, &request);
        debug!(
            model = %self.model,
            images = request.images.len(),
            max_tokens = request.max_tokens,
            "Sending completion request"
        );

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollaboratorError::timeout("completion", self.timeout.unwrap_or_default())
                } else {
                    CollaboratorError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let preview: String = detail.chars().take(300).collect();
            return Err(CollaboratorError::Transport(format!(
                "messages API returned {status}: {preview}"
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Malformed(e.to_string()))?;
        let completion = parse_response(json, request.format)?;
        debug!(
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            "Completion received"
        );
        Ok(completion)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clonewright_common::ImageInput;

    #[test]
    fn test_body_with_cached_system_and_images() {
        let request = CompletionRequest::new("You write React.", "Build the hero")
            .with_cached_system()
            .with_images(vec![ImageInput {
                media_type: "image/png".into(),
                data: "aGk=".into(),
            }])
            .with_max_tokens(2000);
        let body = build_body("claude-sonnet-4-5", &request);

        assert_eq!(body["model"], "claude-sonnet-4-5");
        assert_eq!(body["max_tokens"], 2000);
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["data"], "aGk=");
        assert_eq!(content[1]["text"], "Build the hero");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_json_request_is_prefilled() {
        let request = CompletionRequest::new("sys", "tokens please").expecting_json();
        let body = build_body("m", &request);
        assert!(body["system"][0].get("cache_control").is_none());
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert_eq!(body["messages"][1]["content"], "{");
    }

    #[test]
    fn test_parse_response_restores_prefill() {
        let body = json!({
            "content": [
                { "type": "text", "text": "\"primary\": \"#112233\"}" }
            ],
            "usage": { "input_tokens": 1200, "output_tokens": 40 }
        });
        let completion = parse_response(body, ResponseFormat::Json).unwrap();
        assert_eq!(completion.text, "{\"primary\": \"#112233\"}");
        assert_eq!(completion.usage.input_tokens, 1200);
    }

    #[test]
    fn test_parse_response_without_text_is_malformed() {
        let body = json!({ "content": [{ "type": "tool_use", "id": "x" }] });
        let err = parse_response(body, ResponseFormat::Text).unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));

        let err = parse_response(json!({ "content": "nope" }), ResponseFormat::Text).unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));
    }
}
