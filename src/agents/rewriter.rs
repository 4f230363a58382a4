//! Input rewriter: normalizes the raw query and resolves follow-ups against
//! recent conversation turns.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, LlmProvider};
use crate::models::{TokenTotals, TurnMessage};

const REWRITER_SYSTEM_PROMPT: &str = r#"You are the INPUT REWRITER for a medical device compatibility system.

Rules:
- DO NOT invent any new information.
- DO NOT add nouns or device types not present.
- DO NOT reinterpret alphanumeric shorthand (e.g., "cat 5", "c5", "p7") as non-medical objects.
- Only resolve pronouns if clearly supported by recent conversation messages.
- If rewrite is unnecessary, return the input unchanged.
- Identify any explicit source mentions from the user's message (e.g., "IFU", "510k", "company website").
- DO NOT infer or guess sources — only include those explicitly named by the user.

For follow-up queries, use conversation history to:
- Resolve "what about X instead of Y" (substitution)
- Resolve "what if I add X" (addition)
- Resolve "without X" (removal)
- Resolve spec follow-ups to previous device context
- If completely new topic, don't carry forward previous context

Return STRICT JSON:
{
  "rewritten_user_prompt": "<string>",
  "source_filter": ["<string>", ...]
}"#;

const HISTORY_WINDOW: usize = 6;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewriteOutput {
    #[serde(default)]
    pub rewritten_user_prompt: String,
    #[serde(default)]
    pub source_filter: Vec<String>,
}

pub struct InputRewriter;

impl InputRewriter {
    pub const NAME: &'static str = "input_rewriter";

    pub async fn run(
        provider: &dyn LlmProvider,
        model: &str,
        raw_query: &str,
        history: &[TurnMessage],
    ) -> Result<(RewriteOutput, TokenTotals)> {
        let mut messages = super::history_messages(history, HISTORY_WINDOW);
        messages.push(ChatMessage::user(raw_query));

        let response = provider
            .call_json(REWRITER_SYSTEM_PROMPT, &messages, model)
            .await?;

        let mut output: RewriteOutput =
            serde_json::from_value(response.content).unwrap_or_default();
        // Never lose the query: fall back to the raw input.
        if output.rewritten_user_prompt.trim().is_empty() {
            output.rewritten_user_prompt = raw_query.to_string();
        }
        Ok((output, response.usage))
    }
}
