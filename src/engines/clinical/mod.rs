//! Clinical support engine scaffolding.
//!
//! Deterministic pipeline: parse the patient presentation, assess data
//! completeness, and run the eligibility rule set. Missing critical
//! parameters short-circuit into a clarification result that the
//! orchestrator renders without an LLM.

mod patient;
mod rules;

pub use patient::{
    assess_completeness, parse_patient, CompletenessResult, MissingParam, PatientPresentation,
};
pub use rules::{evaluate_all, Eligibility, EligibilityResult};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engines::{EngineData, EngineOutput, EngineStatus};
use crate::models::TokenTotals;

pub const ENGINE_NAME: &str = "clinical_support_engine";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalData {
    pub patient: PatientPresentation,
    pub completeness: CompletenessResult,
    #[serde(default)]
    pub eligibility: Vec<EligibilityResult>,
    /// Treatments whose assessment flagged a deeper guideline lookup.
    #[serde(default)]
    pub needs_guideline_search: Vec<String>,
}

pub struct ClinicalSupportEngine;

impl ClinicalSupportEngine {
    /// Evaluate a clinical query. `raw_query` carries the patient text (on
    /// a clarification follow-up the merged presentation is passed here).
    pub fn run(raw_query: &str) -> EngineOutput {
        let patient = parse_patient(raw_query);
        let completeness = assess_completeness(&patient);

        if completeness.should_ask_clarification {
            info!(
                missing = completeness.missing_critical.len(),
                "Clinical engine: missing critical parameters, asking for clarification"
            );
            return EngineOutput {
                status: EngineStatus::NeedsClarification,
                engine: ENGINE_NAME.to_string(),
                result_type: "clinical_assessment".to_string(),
                data: EngineData::Clinical(ClinicalData {
                    patient,
                    completeness,
                    eligibility: Vec::new(),
                    needs_guideline_search: Vec::new(),
                }),
                classification: None,
                confidence: 0.9,
                usage: TokenTotals::default(),
            };
        }

        let eligibility = evaluate_all(&patient);
        let needs_guideline_search: Vec<String> = eligibility
            .iter()
            .filter(|r| r.needs_vector_search)
            .map(|r| r.treatment.clone())
            .collect();

        info!(
            pathways = eligibility.len(),
            flagged = needs_guideline_search.len(),
            "Clinical engine: eligibility evaluation complete"
        );

        EngineOutput {
            status: EngineStatus::Complete,
            engine: ENGINE_NAME.to_string(),
            result_type: "clinical_assessment".to_string(),
            data: EngineData::Clinical(ClinicalData {
                patient,
                completeness,
                eligibility,
                needs_guideline_search,
            }),
            classification: None,
            confidence: 0.9,
            usage: TokenTotals::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_presentation_needs_clarification() {
        let output = ClinicalSupportEngine::run("is my patient eligible for thrombectomy?");
        assert_eq!(output.status, EngineStatus::NeedsClarification);
        let EngineData::Clinical(data) = &output.data else {
            panic!("expected clinical data");
        };
        assert!(data.eligibility.is_empty());
        assert!(!data.completeness.clarification_questions.is_empty());
    }

    #[test]
    fn test_complete_presentation_evaluates_pathways() {
        let output = ClinicalSupportEngine::run(
            "72yo, NIHSS 18, left M1 occlusion, ASPECTS 8, last known well 3 hours",
        );
        assert_eq!(output.status, EngineStatus::Complete);
        let EngineData::Clinical(data) = &output.data else {
            panic!("expected clinical data");
        };
        assert!(data.eligibility.len() >= 5);
        assert!(data
            .eligibility
            .iter()
            .any(|r| r.eligibility == Eligibility::Yes));
    }
}
