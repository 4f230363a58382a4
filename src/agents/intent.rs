//! Intent classifier: classifies what the user wants to accomplish before
//! equipment extraction, driving engine routing.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

const INTENT_SYSTEM_PROMPT: &str = r#"You are the INTENT CLASSIFIER for a medical device compatibility system.

Given a user query about medical devices, classify the user's INTENT — what they want to accomplish.

## Intent Types

| Intent | Description | Example Queries |
|---|---|---|
| equipment_compatibility | Check if specific named devices work together | "Can I use Vecta 46 with Neuron Max?" |
| device_discovery | Find devices in a category compatible with a named device | "What microcatheters work with Vecta 46?" |
| filtered_discovery | Find devices matching attribute filters + check compatibility | "What Medtronic catheters work with Atlas stent?" |
| specification_lookup | Look up specs of a specific named device | "What is the OD of Vecta 46?" |
| spec_reasoning | Reason about which specs/sizes are needed based on a device | "What length catheter do I need with Neuron Max?" |
| device_search | Search/filter devices by dimensional or attribute criteria | "What catheters have ID greater than 0.074?" |
| device_comparison | Compare two or more named devices side by side | "Compare Vecta 46 and Vecta 71" |
| documentation | Questions about IFU, 510K, FDA clearance, or manufacturer instructions | "What does the IFU say about Solitaire?" |
| knowledge_base | General medical device knowledge, guidelines, trial data | "What are the AHA guidelines for thrombectomy?" |
| device_definition | Define a device type or clinical concept | "What is a microcatheter?" |
| manufacturer_lookup | Identify who makes a device | "Who makes the Solitaire?" |
| clinical_support | Patient presentations asking about treatment eligibility | "72yo, NIHSS 18, M1 occlusion, 3 hours out — eligible for EVT?" |
| deep_research | Complex scenarios requiring multiple data sources | "Compare all retriever trials and device options for this case" |
| general | Greetings, thanks, off-topic, scope questions | "Hi", "What can you do?", "Thanks" |

## Classification Rules

1. Choose the MOST SPECIFIC intent. "What catheters have ID > .074?" is device_search, NOT device_discovery.
2. A query can have MULTIPLE intents.
3. "work with" / "use with" / "fit" / "compatible" with named devices -> equipment_compatibility.
4. "What [category] work with [device]?" -> device_discovery.
5. Dimensional search with NO compatibility relationship -> device_search.
6. Generic specs WITH a compatibility relationship -> equipment_compatibility.
7. Manufacturer/brand + category + compatibility keyword -> filtered_discovery.
8. "Compare X and Y" -> device_comparison.
9. Patient vitals, NIHSS scores, clinical eligibility -> clinical_support.

## Planning Rules

Set needs_planning=true when:
- The query has multiple intents requiring different engines
- The intent is filtered_discovery (database filter then chain compatibility)
- The query requires sequential engine calls where output of one feeds into another

Set needs_planning=false for single-intent queries that map to one engine.

## Output Format

Return STRICT JSON only:
{
    "intents": [
        {"type": "<intent_type>", "confidence": <0.0-1.0>}
    ],
    "is_multi_intent": <true|false>,
    "needs_planning": <true|false>,
    "rationale": "<brief explanation of classification>"
}"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub intent_type: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentOutput {
    #[serde(default)]
    pub intents: Vec<Intent>,
    #[serde(default)]
    pub is_multi_intent: bool,
    #[serde(default)]
    pub needs_planning: bool,
    #[serde(default)]
    pub rationale: String,
}

impl IntentOutput {
    pub fn primary_intent(&self) -> &str {
        self.intents
            .first()
            .map(|i| i.intent_type.as_str())
            .unwrap_or("general")
    }
}

pub struct IntentClassifier;

impl IntentClassifier {
    pub const NAME: &'static str = "intent_classifier";

    pub async fn run(
        provider: &dyn LlmProvider,
        model: &str,
        normalized_query: &str,
    ) -> Result<(IntentOutput, TokenTotals)> {
        let response = provider
            .call_json(
                INTENT_SYSTEM_PROMPT,
                &[ChatMessage::user(normalized_query)],
                model,
            )
            .await?;

        let output: IntentOutput = serde_json::from_value(response.content).unwrap_or_default();
        info!(
            intent = output.primary_intent(),
            multi = output.is_multi_intent,
            planning = output.needs_planning,
            "Intent classified"
        );
        Ok((output, response.usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_intent_defaults_to_general() {
        assert_eq!(IntentOutput::default().primary_intent(), "general");

        let output = IntentOutput {
            intents: vec![Intent {
                intent_type: "equipment_compatibility".to_string(),
                confidence: 0.95,
            }],
            ..Default::default()
        };
        assert_eq!(output.primary_intent(), "equipment_compatibility");
    }
}
