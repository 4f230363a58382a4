//! Clarification output agent.
//!
//! Used for relational intents where one or more device names could not be
//! resolved: partial results would be misleading, so the response asks the
//! user to clarify, with fuzzy suggestions when available.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::broker::StreamingBroker;
use crate::catalog::Suggestion;
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

pub const NAME: &str = "clarification_output_agent";

const CLARIFICATION_SYSTEM_PROMPT: &str = r#"You are a medical device compatibility assistant. The user asked a question that references one or more devices you could not find in your device database.

Your job: Write a SHORT, helpful clarification message.

Rules:
1. Acknowledge what you DID find (if anything).
2. For each unresolved device name, explain it was not found.
3. If close-match suggestions are provided, present them naturally:
   - One suggestion: "Did you mean **[suggestion]**?"
   - Multiple suggestions: "Did you mean one of these: **[A]**, **[B]**, or **[C]**?"
4. If NO suggestions exist, ask the user to verify the full product name or check spelling.
5. Keep it conversational — one short paragraph, no bullet lists.
6. Do NOT attempt to answer the original question. Just ask for clarification.
7. Do NOT apologize excessively. Be direct and helpful.
8. Use **bold** for device names."#;

fn build_user_prompt(
    user_query: &str,
    resolved: &[String],
    not_found: &[String],
    suggestions: &BTreeMap<String, Vec<Suggestion>>,
) -> String {
    let mut parts = vec![format!("User's original question: {user_query}")];

    if resolved.is_empty() {
        parts.push("Devices found in database: none".to_string());
    } else {
        parts.push(format!("Devices found in database: {}", resolved.join(", ")));
    }
    parts.push(format!("Devices NOT found: {}", not_found.join(", ")));

    if suggestions.values().any(|s| !s.is_empty()) {
        let lines: Vec<String> = not_found
            .iter()
            .map(|name| {
                let matches = suggestions.get(name).map(|s| s.as_slice()).unwrap_or(&[]);
                if matches.is_empty() {
                    format!("  '{name}' -> no close matches found")
                } else {
                    let names: Vec<&str> = matches
                        .iter()
                        .take(3)
                        .map(|m| m.product_name.as_str())
                        .collect();
                    format!("  '{name}' -> possible matches: {}", names.join(", "))
                }
            })
            .collect();
        parts.push(format!("Close match suggestions:\n{}", lines.join("\n")));
    } else {
        parts.push("Close match suggestions: none available".to_string());
    }

    parts.push("Generate a clarification message.".to_string());
    parts.join("\n\n")
}

pub async fn run(
    provider: &dyn LlmProvider,
    model: &str,
    broker: Option<&StreamingBroker>,
    user_query: &str,
    resolved: &[String],
    not_found: &[String],
    suggestions: &BTreeMap<String, Vec<Suggestion>>,
) -> Result<(String, TokenTotals)> {
    let user_prompt = build_user_prompt(user_query, resolved, not_found, suggestions);
    super::stream_response(
        provider,
        broker,
        NAME,
        CLARIFICATION_SYSTEM_PROMPT,
        &[ChatMessage::user(user_prompt)],
        model,
    )
    .await
}
