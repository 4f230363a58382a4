//! Database output agent.
//!
//! Formats query results into the user-facing answer, then streams the
//! device list as `query_result_device_chunk` events for the client UI.

use anyhow::Result;

use crate::broker::{EventKind, StreamingBroker};
use crate::catalog::Suggestion;
use crate::engines::database::DatabaseData;
use crate::engines::GenericSpec;
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

pub const NAME: &str = "database_output_agent";

const DEVICE_CHUNK_SIZE: usize = 20;

const BASE_MESSAGE: &str = r#"You are presenting query results to the user.

## CRITICAL ACCURACY RULES

1. ONLY describe what was actually done. Do NOT embellish or add claims about checks that were not performed.
2. If the query was a spec filter only (no named devices, no compatibility check), say "matching your criteria" — do NOT say "compatible with" any device.
3. Only mention compatibility if the results explicitly include compatibility data.
4. If no named devices were involved, do NOT reference "the devices you mentioned."

## Guidelines

1. Answer the user's question directly
2. Be concise but thorough
3. Mention any devices that were not found
4. Do NOT ask follow-up questions
"#;

fn format_guidance(device_count: usize) -> String {
    match device_count {
        0 => "\n## FORMAT: No Results\n\nExplain that no devices matched the criteria and \
              suggest alternatives if possible.\n"
            .to_string(),
        1 => "\n## FORMAT: Single Device (Inline Prose)\n\nUse natural sentences, no table \
              needed.\n"
            .to_string(),
        2 => "\n## FORMAT: Two Devices (Comparison Table)\n\nUse a side-by-side comparison \
              table:\n\n| Spec | Device A | Device B |\n|------|----------|----------|\n"
            .to_string(),
        n => format!(
            "\n## FORMAT: Multiple Devices ({n} results) - Use Table\n\n\
             | Device | ID | OD | Length | Manufacturer |\n\
             |--------|-----|-----|--------|--------------|\n\n\
             - Show up to 15 devices in the table\n\
             - Brief intro sentence stating total count\n\
             - If more than 15, note that additional options exist\n"
        ),
    }
}

fn not_found_note(
    not_found: &[String],
    suggestions: &std::collections::BTreeMap<String, Vec<Suggestion>>,
) -> String {
    if not_found.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = not_found
        .iter()
        .map(|name| {
            let matches = suggestions.get(name).map(|s| s.as_slice()).unwrap_or(&[]);
            if matches.is_empty() {
                format!("'{name}'")
            } else {
                let alts: Vec<&str> = matches
                    .iter()
                    .take(3)
                    .map(|m| m.product_name.as_str())
                    .collect();
                format!("'{name}' (did you mean: {}?)", alts.join(", "))
            }
        })
        .collect();
    format!("\n\nDevices NOT found in database: {}", parts.join("; "))
}

/// Generate and stream the database response, then the device chunks.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    provider: &dyn LlmProvider,
    model: &str,
    broker: Option<&StreamingBroker>,
    user_query: &str,
    data: &DatabaseData,
    not_found: &[String],
    suggestions: &std::collections::BTreeMap<String, Vec<Suggestion>>,
    generic_specs: &[GenericSpec],
) -> Result<(String, TokenTotals)> {
    let system = format!("{BASE_MESSAGE}{}", format_guidance(data.device_list.len()));

    let generic_note = if generic_specs.is_empty() {
        String::new()
    } else {
        format!(
            "\n\nUser's generic device specs: {}",
            serde_json::to_string_pretty(generic_specs)?
        )
    };

    let user_prompt = format!(
        "User Question: {user_query}\n\nQuery Executed:\n{}\n\nResults:\n{}{}{}\n\nPlease answer the user's question based on these results.",
        serde_json::to_string_pretty(&data.query_spec)?,
        data.summary,
        not_found_note(not_found, suggestions),
        generic_note,
    );

    let result = super::stream_response(
        provider,
        broker,
        NAME,
        &system,
        &[ChatMessage::user(user_prompt)],
        model,
    )
    .await?;

    // Stream the device list in chunks for the client UI.
    if let Some(broker) = broker {
        if !data.device_list.is_empty() {
            let records: Vec<serde_json::Value> = data
                .device_list
                .iter()
                .map(|d| d.summary_record())
                .collect();
            super::stream_device_chunks(
                broker,
                EventKind::QueryResultDeviceChunk,
                NAME,
                &records,
                DEVICE_CHUNK_SIZE,
            )
            .await?;
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_guidance_tiers() {
        assert!(format_guidance(0).contains("No Results"));
        assert!(format_guidance(1).contains("Inline Prose"));
        assert!(format_guidance(2).contains("Comparison Table"));
        assert!(format_guidance(7).contains("7 results"));
    }

    #[test]
    fn test_not_found_note_with_suggestions() {
        let mut suggestions = std::collections::BTreeMap::new();
        suggestions.insert(
            "Vectaa 46".to_string(),
            vec![Suggestion {
                product_name: "Vecta 46".to_string(),
                score: 0.9,
            }],
        );
        let note = not_found_note(&["Vectaa 46".to_string()], &suggestions);
        assert!(note.contains("did you mean: Vecta 46"));
    }
}
