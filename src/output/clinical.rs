//! Clinical output agent: narrates the deterministic eligibility assessment
//! for the clinician.

use anyhow::Result;

use crate::broker::StreamingBroker;
use crate::engines::clinical::ClinicalData;
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

pub const NAME: &str = "clinical_output_agent";

const CLINICAL_SYSTEM_PROMPT: &str = r#"You are a stroke treatment decision-support assistant for physicians.

You receive a structured eligibility assessment computed by a deterministic
rule engine over the parsed patient presentation. Your job is to present it,
not to re-derive it.

Rules:
1. Report each pathway's eligibility exactly as computed (YES / NO /
   CONDITIONAL / UNCERTAIN / CONTRAINDICATED), with its COR/LOE when present.
2. Lead with the actionable pathways, then the excluded ones in one line.
3. Include the stated reasoning and caveats; do not add criteria of your own.
4. Mention the assumptions that were applied for missing data.
5. End with a one-line reminder that this supports, not replaces, clinical
   judgment.
6. Be structured and terse — a physician is reading this under time
   pressure."#;

pub async fn run(
    provider: &dyn LlmProvider,
    model: &str,
    broker: Option<&StreamingBroker>,
    user_query: &str,
    data: &ClinicalData,
) -> Result<(String, TokenTotals)> {
    let assessment = serde_json::to_string_pretty(data)?;
    let user_prompt = format!(
        "User Question: {user_query}\n\nStructured eligibility assessment:\n{assessment}"
    );

    super::stream_response(
        provider,
        broker,
        NAME,
        CLINICAL_SYSTEM_PROMPT,
        &[ChatMessage::user(user_prompt)],
        model,
    )
    .await
}

/// Deterministic clarification text for missing clinical parameters. The
/// questions are pre-built by the completeness assessment, so no LLM runs.
pub fn format_clinical_clarification(data: &ClinicalData) -> String {
    let mut parts: Vec<String> = data.completeness.clarification_questions.clone();

    // Compact echo of what was parsed so the clinician can verify it.
    let patient = &data.patient;
    let mut parsed = Vec::new();
    if let Some(age) = patient.age {
        let sex_abbr = patient
            .sex
            .as_deref()
            .and_then(|s| s.chars().next())
            .map(|c| c.to_uppercase().to_string())
            .unwrap_or_default();
        parsed.push(format!("{age}{sex_abbr}"));
    }
    if let Some(nihss) = patient.nihss {
        parsed.push(format!("NIHSS {nihss}"));
    }
    if let Some(aspects) = patient.aspects {
        parsed.push(format!("ASPECTS {aspects}"));
    }
    if let Some(lkw) = patient.last_known_well_hours {
        parsed.push(format!("LKW {lkw}h"));
    }
    if let Some(location) = &patient.occlusion_location {
        parsed.push(location.clone());
    }
    if let Some(mrs) = patient.mrs_pre {
        parsed.push(format!("mRS {mrs}"));
    }
    if patient.dementia {
        parsed.push("dementia".to_string());
    }
    if patient.on_anticoagulation {
        parsed.push(format!(
            "on {}",
            patient
                .anticoagulant_type
                .as_deref()
                .unwrap_or("anticoagulation")
        ));
    }

    if !parsed.is_empty() {
        parts.push(format!("\n**Patient data received:** {}", parsed.join(", ")));
    }
    parts.join("\n")
}
