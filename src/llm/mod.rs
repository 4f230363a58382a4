//! LLM provider abstraction.
//!
//! Three call shapes: plain/tool completion, JSON mode for sub-agents that
//! return structured data, and token streaming for output agents. Providers
//! are selected by configuration; both can be active at once.

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::models::TokenTotals;

pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// One chat message in provider-neutral form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Tool definition passed through to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Non-streaming completion result.
#[derive(Debug, Clone)]
pub enum Completion {
    Text {
        content: String,
        usage: TokenTotals,
    },
    ToolUse {
        tool_name: String,
        tool_input: Value,
        tool_use_id: String,
        usage: TokenTotals,
    },
}

impl Completion {
    pub fn usage(&self) -> TokenTotals {
        match self {
            Completion::Text { usage, .. } => *usage,
            Completion::ToolUse { usage, .. } => *usage,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Completion::Text { content, .. } => content,
            Completion::ToolUse { .. } => "",
        }
    }
}

/// JSON-mode result: parsed object plus usage.
#[derive(Debug, Clone)]
pub struct JsonResponse {
    pub content: Value,
    pub usage: TokenTotals,
}

/// One item from a streaming call: a text delta, then a terminal usage record.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Delta(String),
    Usage(TokenTotals),
}

pub type TextStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn call(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
        model: &str,
        max_tokens: u32,
    ) -> Result<Completion>;

    async fn call_json(
        &self,
        system: &str,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<JsonResponse>;

    async fn call_stream(
        &self,
        system: &str,
        messages: &[ChatMessage],
        model: &str,
        max_tokens: u32,
    ) -> Result<TextStream>;
}

/// Build the configured provider.
pub fn provider_from_config(config: &Config) -> Result<Arc<dyn LlmProvider>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.external_timeout_secs))
        .build()
        .context("Failed to build LLM HTTP client")?;

    match config.llm_provider.as_str() {
        "anthropic" => {
            let api_key = config
                .anthropic_api_key
                .clone()
                .context("ANTHROPIC_API_KEY is not set")?;
            Ok(Arc::new(AnthropicProvider::new(http, api_key)))
        }
        "openai" => {
            let api_key = config
                .openai_api_key
                .clone()
                .context("OPENAI_API_KEY is not set")?;
            Ok(Arc::new(OpenAiProvider::new(http, api_key)))
        }
        other => anyhow::bail!("Unknown LLM provider: {other}"),
    }
}

/// Strip markdown code-block wrappers that JSON-mode responses sometimes
/// arrive in.
pub fn strip_markdown_json(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.strip_suffix("```").map(str::trim_end).unwrap_or(rest)
}

/// Parse a JSON-mode body, tolerating markdown fences. Unparseable text is
/// wrapped as `{"raw_text": ...}` so callers can degrade.
pub fn parse_json_content(raw: &str) -> Value {
    if let Ok(value) = serde_json::from_str(raw) {
        return value;
    }
    let stripped = strip_markdown_json(raw);
    if let Ok(value) = serde_json::from_str(stripped) {
        return value;
    }
    let preview: String = raw.chars().take(300).collect();
    tracing::warn!(raw = %preview, "LLM JSON parse failed");
    serde_json::json!({ "raw_text": raw })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markdown_json() {
        assert_eq!(strip_markdown_json("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_markdown_json("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_markdown_json("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_json_content_fallback() {
        let parsed = parse_json_content("```json\n{\"intents\": []}\n```");
        assert!(parsed["intents"].is_array());

        let degraded = parse_json_content("not json at all");
        assert_eq!(degraded["raw_text"], "not json at all");
    }
}
