//! Chain output agent.
//!
//! Formats chain engine results into the user-facing answer. The system
//! message is assembled dynamically from the classification sub-type,
//! response framing, and query mode; tokens stream in real time.

use anyhow::Result;

use crate::broker::StreamingBroker;
use crate::engines::chain::decision::SubsetResult;
use crate::engines::chain::ChainData;
use crate::engines::Classification;
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

pub const NAME: &str = "chain_output_agent";

const BASE_CONTEXT: &str = r#"You are a medical device compatibility assistant helping physicians with device selection.
- DISTAL = innermost device (closest to treatment site)
- PROXIMAL = outermost device (closest to access point)
- Use "configuration" instead of "chain"
- Data provided is verified from device specifications - don't add outside knowledge
- Be concise and clinically relevant
- Answer naturally - avoid starting with blunt "YES" or "NO" responses
- Stay neutral and clinical - no marketing language
- AVOID words like: "popular", "best", "commonly used", "leading", "preferred", "top", "recommended"
- Do not favor any manufacturer over another
- Present all options objectively based on specifications

CRITICAL - HANDLING MULTI-SIZE DEVICES:
When a device has MULTIPLE SIZES with DIFFERENT specifications:
- Present the FULL RANGE across all sizes, not just one size's specs
- If compatibility varies by size, state: "Some sizes of [Device] are compatible while others are not"
- NEVER cherry-pick just one size's requirements"#;

const COMPATIBILITY_CHECK_INSTRUCTIONS: &str = r#"
TASK: Answer a compatibility question between specific devices.

FORMAT: Use inline prose (no tables) for 2-device checks.

STRUCTURE:
1. Lead with a natural, direct answer that flows conversationally
2. Include the dimensional fit inline (OD -> ID)
3. Note any length considerations if relevant
4. Keep it to 2-3 sentences max

RESPONSE QUALITY RULES:
- SAFETY: When the analysis says "Not Compatible", report it as Not Compatible. Do NOT re-evaluate or override the verdict based on dimensional proximity. The compatibility engine has already applied the correct evaluation logic — your job is to present its findings, not second-guess them.
- Do NOT repeat the same numbers twice
- When a connection fails on a clear blocker, focus on the reason it fails
- Keep it to 2-3 sentences. Every sentence should add new information"#;

const DISCOVERY_TABLE_INSTRUCTIONS: &str = r#"
TASK: Present compatible devices found for the source device.

FORMAT: Use a markdown table:

| Device | ID | OD | Length | Manufacturer |
|--------|-----|-----|--------|--------------|

STRUCTURE:
1. Brief intro stating the source device requirements (1 sentence)
2. Neutral transition like: "The following meet these requirements:"
3. Markdown table with up to 15 options
4. Note total count if more exist

LANGUAGE RULES:
- NEVER use: "commonly used", "popular", "best", "recommended", "preferred"
- USE: "compatible", "meet the requirements", "within specifications"
- List devices alphabetically, not by preference"#;

const DISCOVERY_PROSE_INSTRUCTIONS: &str = r#"
TASK: Present compatible devices found for the source device.

FORMAT: Use inline prose for few results.

STRUCTURE:
1. Briefly state what the source device requires (ID range, length)
2. List the compatible devices with key specs inline
3. Keep it concise and neutral - no marketing language"#;

const STACK_VALIDATION_INSTRUCTIONS: &str = r#"
TASK: Validate a multi-device configuration (3+ devices).

CRITICAL - CHECK FOR N-1 SCENARIOS:
If NOT all requested devices can fit in a single configuration:
1. FIRST clearly state: "All X devices cannot be used in a single configuration."
2. EXPLAIN WHY - identify which devices conflict and the reason
3. THEN present the valid subset configurations as labeled options
4. Note which device is EXCLUDED in each option

FORMAT FOR STANDARD STACK (all devices fit):
1. Natural opening stating the configuration works
2. Show device order: [distal] -> ... -> [proximal]
3. Markdown table showing each connection with dimensions

| Connection | Distal OD | Proximal ID | Status |
|------------|-----------|-------------|--------|

If incompatible, clearly mark which connection fails."#;

const FALLBACK_INSTRUCTIONS: &str = r#"
TASK: Provide compatibility analysis.

FORMAT:
- For single device or 2-device checks: inline prose
- For multiple devices (3+): markdown table
- For comparisons: side-by-side table

Always present the full range of specifications across all sizes."#;

fn framing_note(framing: &str) -> &'static str {
    match framing {
        "negative" => {
            "\nNOTE: The user expressed doubt about compatibility.\n\
             - If devices ARE compatible: gently correct with \"Actually, these are compatible...\"\n\
             - If devices are NOT compatible: confirm their intuition\n\
             - If n-1 scenario: acknowledge their concern was valid"
        }
        "positive" => {
            "\nNOTE: The user expects/hopes for compatibility.\n\
             - If compatible: confirm naturally\n\
             - If NOT compatible: be direct but gentle \"Unfortunately, these aren't compatible because...\"\n\
             - If n-1 scenario: acknowledge partial success and present valid options"
        }
        _ => "",
    }
}

fn mode_note(query_mode: &str) -> &'static str {
    match query_mode {
        "discovery" => {
            "\nMODE: Discovery - user is exploring options. Use a table to help them \
             compare. Present all options neutrally without ranking."
        }
        "comparison" => {
            "\nMODE: Comparison - use a side-by-side specification table. Let the \
             specifications speak for themselves - do not state which is \"better\"."
        }
        _ => "",
    }
}

fn build_system_message(
    result_type: &str,
    classification: &Classification,
    device_count: usize,
) -> String {
    let sub_type_instructions = match result_type {
        "compatibility_check" => COMPATIBILITY_CHECK_INSTRUCTIONS,
        "device_discovery" => {
            if device_count >= 3 {
                DISCOVERY_TABLE_INSTRUCTIONS
            } else {
                DISCOVERY_PROSE_INSTRUCTIONS
            }
        }
        "stack_validation" => STACK_VALIDATION_INSTRUCTIONS,
        _ => FALLBACK_INSTRUCTIONS,
    };

    format!(
        "{BASE_CONTEXT}\n{sub_type_instructions}{}{}",
        framing_note(&classification.framing),
        mode_note(&classification.query_mode)
    )
}

fn format_subsets(subsets: &[SubsetResult]) -> String {
    if subsets.is_empty() {
        return "No subset data available.".to_string();
    }
    let mut lines = Vec::new();
    for subset in subsets {
        let label = if subset.status == "pass" { "Valid" } else { "Invalid" };
        lines.push(format!("  Excluding {}: {label}", subset.excluded_device));
        if subset.status == "pass" && !subset.subset_sequence.is_empty() {
            lines.push(format!("    Order: {}", subset.subset_sequence.join(" -> ")));
        }
    }
    lines.join("\n")
}

/// Generate and stream the chain response; returns text and usage.
pub async fn run(
    provider: &dyn LlmProvider,
    model: &str,
    broker: Option<&StreamingBroker>,
    user_query: &str,
    result_type: &str,
    classification: &Classification,
    data: &ChainData,
) -> Result<(String, TokenTotals)> {
    let system = build_system_message(result_type, classification, data.flat_data.len());

    let mut user_prompt = format!(
        "User Question: {user_query}\n\nCompatibility Analysis:\n\n{}",
        data.text_summary
    );
    if let Some(subsets) = &data.subset_analysis {
        user_prompt.push_str(&format!(
            "\n\nN-1 Subset Configurations:\n{}",
            format_subsets(subsets)
        ));
    }

    super::stream_response(
        provider,
        broker,
        NAME,
        &system,
        &[ChatMessage::user(user_prompt)],
        model,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_message_varies_by_result_type() {
        let classification = Classification {
            framing: "positive".to_string(),
            query_mode: "discovery".to_string(),
            ..Default::default()
        };
        let compat = build_system_message("compatibility_check", &classification, 2);
        assert!(compat.contains("2-device checks"));
        assert!(compat.contains("expects/hopes"));

        let discovery_many = build_system_message("device_discovery", &classification, 12);
        assert!(discovery_many.contains("markdown table"));

        let discovery_few = build_system_message("device_discovery", &classification, 2);
        assert!(discovery_few.contains("inline prose"));

        let stack = build_system_message("stack_validation", &classification, 5);
        assert!(stack.contains("N-1 SCENARIOS"));
    }

    #[test]
    fn test_subset_formatting() {
        let subsets = vec![SubsetResult {
            excluded_device: "Neuron MAX".to_string(),
            subset_sequence: vec!["A".to_string(), "B".to_string()],
            subset_levels: vec!["L3".to_string(), "L2".to_string()],
            status: "pass".to_string(),
        }];
        let text = format_subsets(&subsets);
        assert!(text.contains("Excluding Neuron MAX: Valid"));
        assert!(text.contains("Order: A -> B"));
    }
}
