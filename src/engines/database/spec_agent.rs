//! Query-spec agent: turns a natural-language lookup into a structured
//! catalog query.

use anyhow::Result;
use serde_json::json;

use super::executor::QuerySpec;
use crate::engines::EngineInput;
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

const SPEC_AGENT_SYSTEM_PROMPT: &str = r#"You are the QUERY SPEC agent for a medical device database.

Given a user query and the devices already resolved to database ids, produce
one structured query spec.

Actions:
- "get_device_specs": look up full records for specific device ids. Use when
  the user asks about named devices (specs, dimensions, manufacturer).
- "compare_devices": look up records for 2+ named devices to compare.
- "filter_by_spec": filter the catalog by category and attribute filters.
  Categories: "catheter", "microcatheter", "wire", "sheath",
  "stent_retriever", "intermediate_catheter", "aspiration", "guide_catheter".
  Filter fields: "manufacturer" (contains), "ID_in", "OD_in", "length_cm"
  (numeric, operators >=, <=, =, >, <).

Rules:
1. Named devices already have ids — use them with get_device_specs or
   compare_devices rather than re-filtering by name.
2. Dimensional criteria ("ID greater than .021") become numeric filters.
3. Keep the spec minimal; one action per query.

Return STRICT JSON:
{
    "action": "get_device_specs|compare_devices|filter_by_spec",
    "category": "<category or null>",
    "filters": [{"field": "...", "operator": "...", "value": ...}],
    "device_ids": ["..."]
}"#;

pub struct QuerySpecAgent;

impl QuerySpecAgent {
    pub const NAME: &'static str = "query_spec_agent";

    pub async fn run(
        provider: &dyn LlmProvider,
        model: &str,
        input: &EngineInput,
    ) -> Result<(QuerySpec, TokenTotals)> {
        let device_info: Vec<String> = input
            .devices
            .iter()
            .map(|(name, d)| format!("  \"{name}\": ids={:?}", d.ids))
            .collect();

        let user_prompt = format!(
            "User Question: {}\n\nResolved devices:\n{}\nCategories mentioned: {}\nConstraints: {}\n\nGenerate one query spec. Respond with ONLY valid JSON.",
            input.normalized_query,
            if device_info.is_empty() {
                "  none".to_string()
            } else {
                device_info.join("\n")
            },
            if input.categories.is_empty() {
                "none".to_string()
            } else {
                input.categories.join(", ")
            },
            json!(input.constraints),
        );

        let response = provider
            .call_json(
                SPEC_AGENT_SYSTEM_PROMPT,
                &[ChatMessage::user(user_prompt)],
                model,
            )
            .await?;

        let spec: QuerySpec = serde_json::from_value(response.content).unwrap_or_default();
        Ok((spec, response.usage))
    }
}
