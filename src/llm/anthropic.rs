//! Anthropic messages-API provider.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::debug;

use super::{
    parse_json_content, ChatMessage, Completion, JsonResponse, LlmProvider, StreamChunk,
    TextStream, ToolSpec,
};
use crate::models::TokenTotals;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self { http, api_key }
    }

    fn extract_usage(body: &Value) -> TokenTotals {
        TokenTotals {
            input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0),
        }
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic returned {status}: {body}");
        }
        response
            .json()
            .await
            .context("Anthropic response was not JSON")
    }

    fn messages_json(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect()
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn call(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
        model: &str,
        max_tokens: u32,
    ) -> Result<Completion> {
        let mut payload = json!({
            "model": model,
            "system": system,
            "messages": Self::messages_json(messages),
            "max_tokens": max_tokens,
        });
        if let Some(tools) = tools {
            payload["tools"] = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
        }

        let body = self.post(payload).await?;
        let usage = Self::extract_usage(&body);

        let mut text_parts = Vec::new();
        if let Some(blocks) = body["content"].as_array() {
            for block in blocks {
                match block["type"].as_str() {
                    Some("text") => {
                        text_parts.push(block["text"].as_str().unwrap_or_default());
                    }
                    Some("tool_use") => {
                        return Ok(Completion::ToolUse {
                            tool_name: block["name"].as_str().unwrap_or_default().to_string(),
                            tool_input: block["input"].clone(),
                            tool_use_id: block["id"].as_str().unwrap_or_default().to_string(),
                            usage,
                        });
                    }
                    _ => {}
                }
            }
        }

        Ok(Completion::Text {
            content: text_parts.concat(),
            usage,
        })
    }

    async fn call_json(
        &self,
        system: &str,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<JsonResponse> {
        let system = format!("{system}\n\nYou MUST respond with valid JSON only. No other text.");
        let payload = json!({
            "model": model,
            "system": system,
            "messages": Self::messages_json(messages),
            "max_tokens": super::DEFAULT_MAX_TOKENS,
        });

        let body = self.post(payload).await?;
        let usage = Self::extract_usage(&body);

        let text: String = body["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect()
            })
            .unwrap_or_default();

        Ok(JsonResponse {
            content: parse_json_content(&text),
            usage,
        })
    }

    async fn call_stream(
        &self,
        system: &str,
        messages: &[ChatMessage],
        model: &str,
        max_tokens: u32,
    ) -> Result<TextStream> {
        debug!(model, "Anthropic stream starting");
        let payload = json!({
            "model": model,
            "system": system,
            "messages": Self::messages_json(messages),
            "max_tokens": max_tokens,
            "stream": true,
        });

        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .send()
            .await
            .context("Anthropic stream request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic returned {status}: {body}");
        }

        Ok(Box::pin(decode_sse(Box::pin(response.bytes_stream()))))
    }
}

/// Interpret one Anthropic SSE data payload. Input tokens arrive on
/// `message_start`; output tokens on `message_delta`, which ends the stream.
fn parse_event(data: &str, input_tokens: &mut u64) -> Option<(StreamChunk, bool)> {
    let event: Value = serde_json::from_str(data).ok()?;
    match event["type"].as_str()? {
        "message_start" => {
            *input_tokens = event["message"]["usage"]["input_tokens"]
                .as_u64()
                .unwrap_or(0);
            None
        }
        "content_block_delta" => {
            let text = event["delta"]["text"].as_str()?;
            (!text.is_empty()).then(|| (StreamChunk::Delta(text.to_string()), false))
        }
        "message_delta" => {
            let usage = TokenTotals {
                input_tokens: *input_tokens,
                output_tokens: event["usage"]["output_tokens"].as_u64().unwrap_or(0),
            };
            Some((StreamChunk::Usage(usage), true))
        }
        _ => None,
    }
}

fn decode_sse<B, S>(bytes: S) -> impl Stream<Item = Result<StreamChunk>> + Send
where
    B: AsRef<[u8]>,
    S: Stream<Item = reqwest::Result<B>> + Unpin + Send + 'static,
{
    futures_util::stream::unfold(
        (bytes, String::new(), 0u64, false),
        |(mut bytes, mut buffer, mut input_tokens, done)| async move {
            if done {
                return None;
            }
            loop {
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if let Some((chunk, is_terminal)) = parse_event(data, &mut input_tokens) {
                        return Some((Ok(chunk), (bytes, buffer, input_tokens, is_terminal)));
                    }
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        buffer.push_str(&String::from_utf8_lossy(chunk.as_ref()));
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(anyhow::anyhow!("Anthropic stream error: {e}")),
                            (bytes, buffer, input_tokens, true),
                        ));
                    }
                    None => return None,
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_sequence() {
        let mut input_tokens = 0u64;

        let start = r#"{"type":"message_start","message":{"usage":{"input_tokens":40}}}"#;
        assert!(parse_event(start, &mut input_tokens).is_none());
        assert_eq!(input_tokens, 40);

        let delta = r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}"#;
        match parse_event(delta, &mut input_tokens) {
            Some((StreamChunk::Delta(text), false)) => assert_eq!(text, "Hi"),
            other => panic!("unexpected: {other:?}"),
        }

        let end = r#"{"type":"message_delta","usage":{"output_tokens":7}}"#;
        match parse_event(end, &mut input_tokens) {
            Some((StreamChunk::Usage(usage), true)) => {
                assert_eq!(usage.input_tokens, 40);
                assert_eq!(usage.output_tokens, 7);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
