//! Text completion providers.
//!
//! Two wire dialects are supported:
//!
//! | `[llm].provider` | Endpoint | Auth |
//! |------------------|----------|------|
//! | `"openai"` | `POST {base_url}/chat/completions` | `Authorization: Bearer $OPENAI_API_KEY` |
//! | `"anthropic"` | `POST {base_url}/v1/messages` | `x-api-key: $ANTHROPIC_API_KEY` |
//!
//! The OpenAI dialect also serves Ollama, LM Studio and other compatible
//! servers by pointing `base_url` at them; the key is then optional.
//! Failures are returned as-is, never retried.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::models::{PromptMessage, Role};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Produces an assistant reply for an ordered list of messages.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, messages: &[PromptMessage], max_tokens: u32) -> Result<String>;
}

/// Create the [`CompletionProvider`] selected by `[llm].provider`.
pub fn create_completion_provider(config: &LlmConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiCompatible::new(config)?)),
        "anthropic" => Ok(Arc::new(Anthropic::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

async fn read_json(label: &str, resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("{} completion error {}: {}", label, status, body);
    }
    resp.json()
        .await
        .with_context(|| format!("{} returned invalid JSON", label))
}

// ============ OpenAI-compatible ============

pub struct OpenAiCompatible {
    model: String,
    temperature: f32,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatible {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        if api_key.is_none() && base_url == OPENAI_BASE_URL {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            base_url,
            api_key,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatible {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[PromptMessage], max_tokens: u32) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": max_tokens,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.context("chat completion request failed")?;
        let payload = read_json("OpenAI", resp).await?;
        parse_openai_completion(&payload)
    }
}

fn parse_openai_completion(payload: &Value) -> Result<String> {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing choices[0].message.content"))
}

// ============ Anthropic ============

pub struct Anthropic {
    model: String,
    temperature: f32,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl Anthropic {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            base_url,
            api_key,
            client: http_client(config.timeout_secs)?,
        })
    }
}

/// Split system messages into the top-level `system` field.
fn anthropic_body(model: &str, temperature: f32, messages: &[PromptMessage], max_tokens: u32) -> Value {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let turns: Vec<&PromptMessage> = messages.iter().filter(|m| m.role != Role::System).collect();

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "messages": turns,
    });
    if !system.is_empty() {
        body["system"] = json!(system.join("\n\n"));
    }
    body
}

#[async_trait]
impl CompletionProvider for Anthropic {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[PromptMessage], max_tokens: u32) -> Result<String> {
        let body = anthropic_body(&self.model, self.temperature, messages, max_tokens);
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("messages request failed")?;
        let payload = read_json("Anthropic", resp).await?;
        parse_anthropic_completion(&payload)
    }
}

fn parse_anthropic_completion(payload: &Value) -> Result<String> {
    let blocks = payload["content"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid messages response: missing content"))?;
    let text: String = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();
    Ok(text.trim().to_string())
}
