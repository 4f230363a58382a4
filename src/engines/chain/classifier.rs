//! Chain-engine query classifier.
//!
//! Classifies a compatibility query along mode, framing, and structure so
//! decision logic and the output agent can shape the answer.

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::json;

use crate::catalog::DeviceRef;
use crate::engines::Classification;
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

const CLASSIFIER_SYSTEM_PROMPT: &str = r#"You are a medical device query classifier. Given a user query and extracted device information, classify the query along three dimensions.

## Classification Schema

### query_mode — what is the user trying to accomplish?
- "exploratory": Open-ended, "what works with", "what can I use", wants options
- "specific": Named devices, yes/no question, "can I use X with Y"
- "comparison": "X or Y", "which is better", comparing options
- "discovery": Wants to find devices in a category that work with a named device
- "stack_validation": 3+ named devices, full setup check

### framing — what tone does the user expect?
- "positive": User expects/hopes it works ("Can I use X with Y?", hopeful tone)
- "negative": User expects it won't work ("I don't think X works with Y", skeptical)
- "neutral": No expectation either way ("Check if X works with Y", "List...")

### structure — what shape does the input take?
- "two_device": Exactly 2 named devices, no categories
- "multi_device": 3+ named devices
- "named_plus_category": At least 1 named device + at least 1 category mention
- "single_device": 1 named device, asking about its specs or what works with it
- "category_only": Only category mentions, no named devices

## Response Format
Return valid JSON only:
{
    "query_mode": "exploratory|specific|comparison|discovery|stack_validation",
    "framing": "positive|negative|neutral",
    "structure": "two_device|multi_device|named_plus_category|single_device|category_only",
    "sub_type": "COMPATIBILITY_CHECK|DEVICE_DISCOVERY|STACK_VALIDATION|SPEC_LOOKUP",
    "confidence": 0.0-1.0,
    "reasoning": "Brief explanation of classification"
}"#;

pub struct QueryClassifier;

impl QueryClassifier {
    pub const NAME: &'static str = "query_classifier";

    pub async fn run(
        provider: &dyn LlmProvider,
        model: &str,
        normalized_query: &str,
        devices: &BTreeMap<String, DeviceRef>,
        categories: &[String],
    ) -> Result<(Classification, TokenTotals)> {
        let device_view: BTreeMap<&String, &String> = devices
            .iter()
            .map(|(name, d)| (name, &d.conical_category))
            .collect();
        let user_prompt = json!({
            "user_query": normalized_query,
            "devices": device_view,
            "categories": categories,
        })
        .to_string();

        let response = provider
            .call_json(
                CLASSIFIER_SYSTEM_PROMPT,
                &[ChatMessage::user(user_prompt)],
                model,
            )
            .await?;

        let classification: Classification =
            serde_json::from_value(response.content).unwrap_or_default();
        Ok((classification, response.usage))
    }
}
