//! OpenAI chat-completions provider.

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

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self { http, api_key }
    }

    fn build_messages(system: &str, messages: &[ChatMessage]) -> Vec<Value> {
        let mut out = vec![json!({"role": "system", "content": system})];
        out.extend(
            messages
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content})),
        );
        out
    }

    fn extract_usage(body: &Value) -> TokenTotals {
        TokenTotals {
            input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        }
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let response = self
            .http
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("OpenAI request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI returned {status}: {body}");
        }
        response.json().await.context("OpenAI response was not JSON")
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
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
            "messages": Self::build_messages(system, messages),
            "max_tokens": max_tokens,
        });
        if let Some(tools) = tools {
            payload["tools"] = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect();
        }

        let body = self.post(payload).await?;
        let usage = Self::extract_usage(&body);
        let message = &body["choices"][0]["message"];

        if let Some(tool_call) = message["tool_calls"].get(0) {
            let arguments = tool_call["function"]["arguments"].as_str().unwrap_or("{}");
            return Ok(Completion::ToolUse {
                tool_name: tool_call["function"]["name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                tool_input: serde_json::from_str(arguments).unwrap_or(Value::Null),
                tool_use_id: tool_call["id"].as_str().unwrap_or_default().to_string(),
                usage,
            });
        }

        Ok(Completion::Text {
            content: message["content"].as_str().unwrap_or_default().to_string(),
            usage,
        })
    }

    async fn call_json(
        &self,
        system: &str,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<JsonResponse> {
        let payload = json!({
            "model": model,
            "messages": Self::build_messages(system, messages),
            "response_format": {"type": "json_object"},
            "temperature": 0.0,
        });

        let body = self.post(payload).await?;
        let usage = Self::extract_usage(&body);
        let raw = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default();

        Ok(JsonResponse {
            content: parse_json_content(raw),
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
        debug!(model, "OpenAI stream starting");
        let payload = json!({
            "model": model,
            "messages": Self::build_messages(system, messages),
            "temperature": 0.0,
            "max_tokens": max_tokens,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        let response = self
            .http
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("OpenAI stream request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI returned {status}: {body}");
        }

        Ok(Box::pin(decode_sse(Box::pin(response.bytes_stream()))))
    }
}

/// Parse one OpenAI SSE data line into a stream chunk, if it carries one.
fn parse_event(data: &str) -> Option<(StreamChunk, bool)> {
    let event: Value = serde_json::from_str(data).ok()?;
    if let Some(delta) = event["choices"][0]["delta"]["content"].as_str() {
        if !delta.is_empty() {
            return Some((StreamChunk::Delta(delta.to_string()), false));
        }
    }
    if event["usage"].is_object() {
        let usage = TokenTotals {
            input_tokens: event["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: event["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        };
        return Some((StreamChunk::Usage(usage), true));
    }
    None
}

/// Decode the SSE byte stream into text deltas followed by a usage record.
fn decode_sse<B, S>(bytes: S) -> impl Stream<Item = Result<StreamChunk>> + Send
where
    B: AsRef<[u8]>,
    S: Stream<Item = reqwest::Result<B>> + Unpin + Send + 'static,
{
    futures_util::stream::unfold(
        (bytes, String::new(), false),
        |(mut bytes, mut buffer, done)| async move {
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
                    if data == "[DONE]" {
                        return None;
                    }
                    if let Some((chunk, is_terminal)) = parse_event(data) {
                        return Some((Ok(chunk), (bytes, buffer, is_terminal)));
                    }
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        buffer.push_str(&String::from_utf8_lossy(chunk.as_ref()));
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(anyhow::anyhow!("OpenAI stream error: {e}")),
                            (bytes, buffer, true),
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
    fn test_parse_delta_event() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"}}]}"#;
        match parse_event(data) {
            Some((StreamChunk::Delta(text), false)) => assert_eq!(text, "Hello"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_usage_event_is_terminal() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":5}}"#;
        match parse_event(data) {
            Some((StreamChunk::Usage(usage), true)) => {
                assert_eq!(usage.input_tokens, 12);
                assert_eq!(usage.output_tokens, 5);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
