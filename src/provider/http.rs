//! OpenAI-compatible chat completions provider

use super::{GenerationContext, ProviderConfig, ProviderError, ProviderPricing, ProviderResponse, TextProvider, TokenUsage};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::LazyLock;
use tracing::debug;

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(?P<body>.*?)```").expect("valid json fence regex"));

const SYSTEM_PROMPT: &str = "You are a narrative engine for an interactive travel story. \
Write the next scene, then offer the reader branching choices. \
After the scene, include a ```json block of the form \
{\"choices\": [{\"question\": \"...\", \"options\": [{\"text\": \"...\", \"description\": \"...\"}]}]}.";

pub struct HttpProvider {
    config: ProviderConfig,
    client: Client,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn build_request(&self, prompt: &str, context: &GenerationContext) -> Value {
        let mut messages = vec![json!({
            "role": "system",
            "content": SYSTEM_PROMPT
        })];

        let mut setting = Vec::new();
        if !context.location.is_empty() {
            setting.push(format!("Location: {}", context.location));
        }
        let prefs = &context.preferences;
        for (label, value) in [("Genre", &prefs.genre), ("Style", &prefs.style), ("Mood", &prefs.mood)] {
            if !value.is_empty() {
                setting.push(format!("{}: {}", label, value));
            }
        }
        if context.max_choices > 0 {
            setting.push(format!("Offer at most {} choices.", context.max_choices));
        }
        if !context.prior_choices.is_empty() {
            let history = context
                .prior_choices
                .iter()
                .map(|c| format!("{}. {}", c.ordinal, c.text))
                .collect::<Vec<_>>()
                .join("\n");
            setting.push(format!("Choices made so far:\n{}", history));
        }
        if !setting.is_empty() {
            messages.push(json!({
                "role": "user",
                "content": setting.join("\n")
            }));
        }

        messages.push(json!({
            "role": "user",
            "content": prompt
        }));

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
        });

        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if let Some(temp) = self.config.temperature {
            body["temperature"] = json!(temp);
        }

        body
    }

    fn parse_response(&self, response: Value) -> Result<ProviderResponse, ProviderError> {
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::Provider("Response has no message content".into()))?;

        let count = |field: &str| {
            let raw = response["usage"][field].as_u64().unwrap_or(0);
            u32::try_from(raw).unwrap_or(u32::MAX)
        };
        let usage = TokenUsage::new(count("prompt_tokens"), count("completion_tokens"));

        let (content, raw_choices) = split_choice_block(content);

        Ok(ProviderResponse {
            content,
            raw_choices,
            token_usage: usage,
        })
    }
}

#[async_trait]
impl TextProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn pricing(&self) -> ProviderPricing {
        self.config.pricing
    }

    async fn generate(&self, prompt: &str, context: &GenerationContext) -> Result<ProviderResponse, ProviderError> {
        let body = self.build_request(prompt, context);
        debug!("Sending generation request to {} ({})", self.config.name, self.config.model);

        let response = self
            .client
            .post(&self.config.base_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let json: Value = response.json().await?;
            return self.parse_response(json);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let error_text = response.text().await.unwrap_or_default();
        Err(status_error(status, error_text, retry_after))
    }
}

/// Map a non-success status to the error taxonomy
fn status_error(status: StatusCode, body: String, retry_after: Option<u64>) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(body),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(60),
        },
        StatusCode::PAYMENT_REQUIRED => ProviderError::Quota(body),
        _ => ProviderError::Provider(format!("{}: {}", status, body)),
    }
}

/// Pull a fenced JSON choice block out of the content; the scene text stays as content
fn split_choice_block(content: &str) -> (String, Value) {
    if let Some(caps) = JSON_FENCE.captures(content) {
        if let (Some(whole), Some(body)) = (caps.get(0), caps.name("body")) {
            if let Ok(value) = serde_json::from_str::<Value>(body.as_str().trim()) {
                let mut scene = String::with_capacity(content.len());
                scene.push_str(&content[..whole.start()]);
                scene.push_str(&content[whole.end()..]);
                return (scene.trim().to_string(), value);
            }
        }
    }
    (content.trim().to_string(), Value::Null)
}
