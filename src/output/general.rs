//! General output agent: greetings, scope questions, and anything that
//! needs no engine.

use anyhow::Result;

use crate::broker::StreamingBroker;
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

pub const NAME: &str = "general_output_agent";

const GENERAL_SYSTEM_PROMPT: &str = r#"You are a medical device compatibility assistant for neurovascular physicians.

You can:
- Check compatibility between named devices
- Find devices in a category that work with a named device
- Look up device specifications and compare devices
- Answer IFU/510(k) documentation questions
- Assess stroke treatment eligibility from a patient presentation

The current message needs no device analysis (greeting, thanks, scope
question, or off-topic). Respond briefly and helpfully. For off-topic
requests, say what you can help with instead. Never invent device data."#;

pub async fn run(
    provider: &dyn LlmProvider,
    model: &str,
    broker: Option<&StreamingBroker>,
    user_query: &str,
) -> Result<(String, TokenTotals)> {
    super::stream_response(
        provider,
        broker,
        NAME,
        GENERAL_SYSTEM_PROMPT,
        &[ChatMessage::user(user_query)],
        model,
    )
    .await
}
