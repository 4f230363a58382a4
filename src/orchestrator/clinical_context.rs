//! Clinical conversation context carried across turns.
//!
//! Two deterministic helpers: merging a clarification follow-up back into
//! the original patient presentation, and enriching a guideline question
//! with the context of the last completed assessment.

use lazy_static::lazy_static;
use regex::Regex;

use crate::engines::clinical::Eligibility;
use crate::session::{ClinicalAssessment, PendingClinical};

const CLINICAL_KEYWORDS: &[&str] = &[
    "nihss", "aspects", "aspect", "lkw", "last known well", "mca", "occlusion", "lvo", "mrs",
    "hour", "hr", "wake-up", "wake up", "cta", "perfusion", "m1", "m2", "m3", "ica", "basilar",
    "vertebral", "pca", "carotid",
];

const GUIDELINE_KEYWORDS: &[&str] = &[
    "guideline",
    "evidence",
    "trial",
    "study",
    "data",
    "cor ",
    "loe ",
    "class of recommendation",
    "level of evidence",
    "what did",
    "what does",
    "what about",
    "tell me more",
    "show me",
    "explain",
    "can you elaborate",
    "subgroup",
    "analysis",
    "outcome",
    "result",
    "hermes",
    "dawn",
    "defuse",
    "select2",
    "angel",
    "tension",
    "timeless",
    "ninds",
    "ecass",
    "escape",
    "revascat",
    "baoche",
    "attention",
    "wake-up",
    "extend",
];

const PATIENT_KEYWORDS: &[&str] = &[
    "nihss",
    "aspects",
    "lkw",
    "last known well",
    "year-old",
    "yo ",
    "occlusion",
    "cta shows",
];

const DEVICE_KEYWORDS: &[&str] = &[
    "device",
    "catheter",
    "microcatheter",
    "stent retriever",
    "configuration",
    "compatible",
];

lazy_static! {
    // Terse numeric answers like "15, 9, 3 hours".
    static ref NUMERIC_CLINICAL_RE: Regex = Regex::new(r"\d+\s*[,;]\s*\d+").unwrap();
}

/// Decide whether the current turn answers a pending clinical clarification
/// and, if so, merge the known Turn-1 patient data with the new message into
/// one combined presentation. `None` means the user changed topic.
pub fn merge_clinical_followup(pending: &PendingClinical, raw_query: &str) -> Option<String> {
    let query_lower = raw_query.to_lowercase();

    let has_clinical_content = CLINICAL_KEYWORDS.iter().any(|kw| query_lower.contains(kw));
    let has_numeric_clinical = NUMERIC_CLINICAL_RE.is_match(raw_query);
    if !has_clinical_content && !has_numeric_clinical {
        return None;
    }

    let patient = &pending.patient;
    let mut known = Vec::new();
    if let Some(age) = patient.age {
        let sex = patient.sex.as_deref().unwrap_or("");
        known.push(format!("{age}yo {sex}").trim().to_string());
    }
    if let Some(location) = &patient.occlusion_location {
        known.push(format!("{location} occlusion"));
    }
    if patient.lvo {
        known.push("LVO confirmed".to_string());
    }
    if patient.wake_up_stroke {
        known.push("wake-up stroke".to_string());
    } else if patient.unknown_onset {
        known.push("unknown onset".to_string());
    }
    if let Some(lkw) = patient.last_known_well_hours {
        known.push(format!("LKW {lkw}h"));
    }
    if let Some(nihss) = patient.nihss {
        known.push(format!("NIHSS {nihss}"));
    }
    if let Some(aspects) = patient.aspects {
        known.push(format!("ASPECTS {aspects}"));
    }
    if let Some(mrs) = patient.mrs_pre {
        known.push(format!("mRS {mrs}"));
    }
    if patient.on_anticoagulation {
        known.push(format!(
            "on {}",
            patient
                .anticoagulant_type
                .as_deref()
                .unwrap_or("anticoagulation")
        ));
    }
    if patient.has_perfusion_imaging {
        known.push("perfusion imaging available".to_string());
    }

    if known.is_empty() {
        Some(raw_query.to_string())
    } else {
        Some(format!("{}, {raw_query}", known.join(", ")))
    }
}

/// Enrich a guideline/trial question with compact context from the previous
/// assessment. `None` when the turn is not a guideline follow-up (new
/// patient data or device intent take other paths).
pub fn enrich_guideline_query(raw_query: &str, context: &ClinicalAssessment) -> Option<String> {
    let query_lower = raw_query.to_lowercase();

    if !GUIDELINE_KEYWORDS.iter().any(|kw| query_lower.contains(kw)) {
        return None;
    }
    if PATIENT_KEYWORDS.iter().any(|kw| query_lower.contains(kw)) {
        return None;
    }
    if DEVICE_KEYWORDS.iter().any(|kw| query_lower.contains(kw)) {
        return None;
    }

    let patient = &context.patient;
    let mut parts = Vec::new();
    if let Some(mrs) = patient.mrs_pre {
        parts.push(format!("pre-stroke mRS {mrs}"));
    }
    if let Some(lkw) = patient.last_known_well_hours {
        parts.push(format!("LKW {lkw}h"));
    }
    if let Some(aspects) = patient.aspects {
        parts.push(format!("ASPECTS {aspects}"));
    }
    if let Some(location) = &patient.occlusion_location {
        parts.push(format!("{location} occlusion"));
    }
    if let Some(age) = patient.age {
        parts.push(format!("age {age}"));
    }

    let flagged: Vec<&str> = context
        .eligibility
        .iter()
        .filter(|e| {
            matches!(
                e.eligibility,
                Eligibility::Uncertain | Eligibility::Conditional
            )
        })
        .map(|e| e.treatment.as_str())
        .collect();
    if !flagged.is_empty() {
        parts.push(format!("pathways flagged: {}", flagged.join(", ")));
    }

    if parts.is_empty() {
        return None;
    }
    Some(format!("{raw_query} [Clinical context: {}]", parts.join("; ")))
}
