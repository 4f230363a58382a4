//! Synthesis output agent: combines results from multiple planned steps
//! (e.g., chain compatibility plus document search) into one answer.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::broker::StreamingBroker;
use crate::engines::{EngineData, EngineOutput};
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

pub const NAME: &str = "synthesis_output_agent";

const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are a medical device assistant synthesizing results from multiple analysis engines into one coherent answer.

You will receive labeled result sections (compatibility analysis, database
results, document excerpts). Combine them into a single response that:
1. Answers the user's question directly, compatibility verdict first.
2. Keeps each source's facts attributed to that source — never mix a
   documentation claim into the compatibility verdict or vice versa.
3. Reports compatibility verdicts exactly as computed; never re-derive them.
4. Stays neutral and clinical; no marketing language.
5. Uses a table only when presenting 3+ devices."#;

fn section_for(step_label: &str, output: &EngineOutput) -> String {
    let body = match &output.data {
        EngineData::Chain(data) => data.text_summary.clone(),
        EngineData::Database(data) => {
            let names: Vec<&str> = data
                .device_list
                .iter()
                .take(25)
                .map(|d| d.device_name.as_str())
                .collect();
            format!("{}\nDevices: {}", data.summary, names.join(", "))
        }
        EngineData::Vector(data) => data
            .chunks
            .iter()
            .map(|c| format!("[{}] {}", c.source, c.text))
            .collect::<Vec<_>>()
            .join("\n\n"),
        EngineData::Clinical(data) => data
            .eligibility
            .iter()
            .map(|e| format!("{}: {} — {}", e.treatment, e.eligibility.as_str(), e.reasoning))
            .collect::<Vec<_>>()
            .join("\n"),
        EngineData::Error { message } => format!("(step failed: {message})"),
    };
    format!("### {step_label} ({})\n{body}", output.engine)
}

pub async fn run(
    provider: &dyn LlmProvider,
    model: &str,
    broker: Option<&StreamingBroker>,
    user_query: &str,
    step_results: &BTreeMap<String, EngineOutput>,
) -> Result<(String, TokenTotals)> {
    let sections: Vec<String> = step_results
        .iter()
        .map(|(label, output)| section_for(label, output))
        .collect();

    let user_prompt = format!(
        "User Question: {user_query}\n\nEngine results:\n\n{}",
        sections.join("\n\n")
    );

    super::stream_response(
        provider,
        broker,
        NAME,
        SYNTHESIS_SYSTEM_PROMPT,
        &[ChatMessage::user(user_prompt)],
        model,
    )
    .await
}
