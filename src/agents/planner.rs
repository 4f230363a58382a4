//! Query planner: generates multi-engine execution plans for constraint-
//! driven queries (database filter -> chain compatibility, docs lookups).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::agents::extraction::ExtractionResult;
use crate::engines::Constraint;
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

const PLANNER_SYSTEM_PROMPT: &str = r#"You are a query planner for a medical device system. You decide HOW to answer a query by selecting which engines to use and in what order.

## Available Engines

### database
Queries a structured catalog of medical devices.
- action "filter_by_spec": filter by category and/or attribute filters
  - category: "catheter", "microcatheter", "wire", "sheath", "stent_retriever", "intermediate_catheter", "aspiration", "guide_catheter"
  - filters: [{"field": "manufacturer", "operator": "contains", "value": "Medtronic"}, {"field": "ID_in", "operator": ">=", "value": 0.021}]
- action "get_device_specs": look up records for specific device ids

### chain
Evaluates full compatibility chains between devices. Takes pre-resolved
devices plus devices injected from a prior database step, and tests every
junction.
- action "compat_check"
- "inject_devices_from": the step_id whose device results feed this step
- "named_devices": device names the user mentioned (ids already resolved)

### vector
Searches IFU/510(k) document chunks semantically.
- action "search_documents"
- "query_focus": a focused but context-aware query string
- "named_devices": devices whose ids should scope the search

## Strategy Patterns

- filter_then_compat: attribute filter + compatibility question. database then chain.
- filter_only: only needs the database filter.
- compat_then_docs: filter + compatibility + documentation. database, chain, vector.
- filter_then_docs: filter + documentation, no compatibility.
- docs_only: only document search.

## Rules

1. "depends_on" lists step_ids that must complete first; independent steps run in parallel.
2. Always include "store_as" for each step.
3. For filter_only use "database_output_agent"; plans ending with chain use "chain_output_agent"; docs_only uses "vector_output_agent"; chain + vector combinations use "synthesis_output_agent".
4. Keep plans minimal — the fewest steps that answer the query.

Return ONLY valid JSON:
{
    "strategy": "filter_then_compat",
    "steps": [
        {"step_id": "s1", "engine": "database", "action": "filter_by_spec", "category": "catheter", "filters": [{"field": "manufacturer", "operator": "contains", "value": "Medtronic"}], "store_as": "filtered_devices"},
        {"step_id": "s2", "engine": "chain", "action": "compat_check", "depends_on": ["s1"], "inject_devices_from": "s1", "named_devices": ["atlas stent"], "store_as": "compat_results"}
    ],
    "output_agent": "chain_output_agent"
}"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(default)]
    pub step_id: String,
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub filters: Vec<Constraint>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub inject_devices_from: Option<String>,
    #[serde(default)]
    pub named_devices: Vec<String>,
    #[serde(default)]
    pub query_focus: Option<String>,
    #[serde(default)]
    pub store_as: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub output_agent: String,
}

impl Plan {
    /// Fill in missing fields: infer `depends_on` from `inject_devices_from`
    /// and default `store_as` to the step id.
    pub fn normalize(&mut self) {
        for step in &mut self.steps {
            if step.depends_on.is_empty() {
                if let Some(source) = &step.inject_devices_from {
                    step.depends_on.push(source.clone());
                }
            }
            if step.store_as.is_empty() {
                step.store_as = step.step_id.clone();
            }
        }
    }
}

pub struct QueryPlanner;

impl QueryPlanner {
    pub const NAME: &'static str = "query_planner";

    pub async fn run(
        provider: &dyn LlmProvider,
        model: &str,
        normalized_query: &str,
        extraction: &ExtractionResult,
    ) -> Result<(Plan, TokenTotals)> {
        let device_info: Vec<String> = extraction
            .devices
            .iter()
            .map(|(name, d)| format!("  \"{name}\": conical_category={}", d.conical_category))
            .collect();

        let user_prompt = format!(
            "User Question: {normalized_query}\n\nDevices found: {}\n{}\nCategories mentioned: {}\nConstraints: {}\n\nGenerate an execution plan. Respond with ONLY valid JSON.",
            if extraction.devices.is_empty() {
                "none".to_string()
            } else {
                extraction.devices.keys().cloned().collect::<Vec<_>>().join(", ")
            },
            device_info.join("\n"),
            if extraction.categories.is_empty() {
                "none".to_string()
            } else {
                extraction.categories.join(", ")
            },
            json!(extraction.constraints),
        );

        let response = provider
            .call_json(PLANNER_SYSTEM_PROMPT, &[ChatMessage::user(user_prompt)], model)
            .await?;

        let mut plan: Plan = serde_json::from_value(response.content).unwrap_or_default();
        plan.normalize();
        info!(
            strategy = %plan.strategy,
            steps = plan.steps.len(),
            "Query planner produced plan"
        );
        Ok((plan, response.usage))
    }
}
