//! Eligibility rule engine.
//!
//! Deterministic pathway evaluations over a parsed patient presentation.
//! Each rule returns an `EligibilityResult`; edge cases are flagged with
//! `needs_vector_search` so the guideline store can be consulted. The rule
//! content is data; the engine only guarantees the evaluation interface.

use serde::{Deserialize, Serialize};

use super::patient::PatientPresentation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eligibility {
    #[serde(rename = "YES")]
    Yes,
    #[serde(rename = "NO")]
    No,
    #[serde(rename = "CONDITIONAL")]
    Conditional,
    #[serde(rename = "UNCERTAIN")]
    Uncertain,
    #[serde(rename = "CONTRAINDICATED")]
    Contraindicated,
}

impl Eligibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Eligibility::Yes => "YES",
            Eligibility::No => "NO",
            Eligibility::Conditional => "CONDITIONAL",
            Eligibility::Uncertain => "UNCERTAIN",
            Eligibility::Contraindicated => "CONTRAINDICATED",
        }
    }
}

/// Result of a single treatment-pathway assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub treatment: String,
    pub eligibility: Eligibility,
    pub cor: Option<String>,
    pub loe: Option<String>,
    pub reasoning: String,
    #[serde(default)]
    pub key_criteria: Vec<String>,
    #[serde(default)]
    pub relevant_trials: Vec<String>,
    #[serde(default)]
    pub caveats: Vec<String>,
    #[serde(default)]
    pub needs_vector_search: bool,
}

impl EligibilityResult {
    fn new(treatment: &str) -> Self {
        Self {
            treatment: treatment.to_string(),
            eligibility: Eligibility::Uncertain,
            cor: None,
            loe: None,
            reasoning: String::new(),
            key_criteria: Vec::new(),
            relevant_trials: Vec::new(),
            caveats: Vec::new(),
            needs_vector_search: false,
        }
    }
}

/// Evaluate every applicable pathway for the patient.
pub fn evaluate_all(patient: &PatientPresentation) -> Vec<EligibilityResult> {
    let mut results = vec![
        ivt_standard_window(patient),
        ivt_extended_window(patient),
        evt_standard_window(patient),
        evt_extended_window(patient),
        evt_large_core(patient),
        bp_management(patient),
    ];
    if patient.posterior_circulation {
        results.push(evt_posterior(patient));
    }
    results
}

fn ivt_standard_window(patient: &PatientPresentation) -> EligibilityResult {
    let mut r = EligibilityResult::new("IVT (standard window, 0-4.5h)");
    r.relevant_trials = vec!["NINDS".to_string(), "ECASS III".to_string()];

    let Some(lkw) = patient.last_known_well_hours else {
        r.eligibility = Eligibility::Uncertain;
        r.reasoning = "Time from last known well is unknown; the 4.5h window cannot be verified."
            .to_string();
        return r;
    };

    if lkw > 4.5 {
        r.eligibility = Eligibility::No;
        r.reasoning = format!("LKW {lkw}h is outside the 0-4.5h IVT window.");
        return r;
    }

    if patient.on_anticoagulation {
        if patient.inr.map(|inr| inr > 1.7).unwrap_or(true) {
            r.eligibility = Eligibility::Contraindicated;
            r.reasoning =
                "Therapeutic anticoagulation (INR > 1.7 or unverified) contraindicates IVT."
                    .to_string();
            r.needs_vector_search = true;
            return r;
        }
        r.caveats
            .push("Anticoagulated but INR <= 1.7; verify timing of last dose.".to_string());
    }

    r.eligibility = Eligibility::Yes;
    r.cor = Some("1".to_string());
    r.loe = Some("A".to_string());
    r.reasoning = format!("Within the 0-4.5h window (LKW {lkw}h) with no parsed contraindication.");
    r.key_criteria.push(format!("LKW {lkw}h <= 4.5h"));
    if let Some(nihss) = patient.nihss {
        r.key_criteria.push(format!("NIHSS {nihss}"));
    }
    r
}

fn ivt_extended_window(patient: &PatientPresentation) -> EligibilityResult {
    let mut r = EligibilityResult::new("IVT (extended/unknown onset)");
    r.relevant_trials = vec!["WAKE-UP".to_string(), "EXTEND".to_string()];

    let in_extended_window = patient
        .last_known_well_hours
        .map(|lkw| lkw > 4.5 && lkw <= 9.0)
        .unwrap_or(false);

    if !patient.unknown_onset && !in_extended_window {
        r.eligibility = Eligibility::No;
        r.reasoning =
            "Neither an unknown/wake-up onset nor a 4.5-9h window applies.".to_string();
        return r;
    }

    if patient.has_perfusion_imaging {
        r.eligibility = Eligibility::Conditional;
        r.cor = Some("2a".to_string());
        r.loe = Some("B-R".to_string());
        r.reasoning =
            "Extended-window IVT is reasonable with favorable perfusion or DWI-FLAIR mismatch."
                .to_string();
        r.needs_vector_search = true;
    } else {
        r.eligibility = Eligibility::Uncertain;
        r.reasoning =
            "Extended-window IVT requires advanced imaging selection; none was provided."
                .to_string();
    }
    r
}

fn evt_standard_window(patient: &PatientPresentation) -> EligibilityResult {
    let mut r = EligibilityResult::new("EVT (standard window, 0-6h)");
    r.relevant_trials = vec!["HERMES meta-analysis".to_string(), "ESCAPE".to_string()];

    if !patient.lvo && !patient.mvo {
        r.eligibility = Eligibility::No;
        r.reasoning = "No large or medium vessel occlusion identified.".to_string();
        return r;
    }
    let Some(lkw) = patient.last_known_well_hours else {
        r.eligibility = Eligibility::Uncertain;
        r.reasoning = "Time from last known well is unknown.".to_string();
        return r;
    };
    if lkw > 6.0 {
        r.eligibility = Eligibility::No;
        r.reasoning = format!("LKW {lkw}h is outside the 0-6h standard EVT window.");
        return r;
    }

    if patient.mvo {
        r.eligibility = Eligibility::Conditional;
        r.cor = Some("2b".to_string());
        r.loe = Some("B-NR".to_string());
        r.reasoning =
            "M2/distal occlusions: EVT may be reasonable in selected patients.".to_string();
        r.needs_vector_search = true;
        return r;
    }

    match patient.aspects {
        Some(aspects) if aspects >= 6 => {
            r.eligibility = Eligibility::Yes;
            r.cor = Some("1".to_string());
            r.loe = Some("A".to_string());
            r.reasoning = format!(
                "LVO within 6h with ASPECTS {aspects} >= 6 meets standard EVT criteria."
            );
            r.key_criteria.push(format!("ASPECTS {aspects} >= 6"));
        }
        Some(aspects) => {
            r.eligibility = Eligibility::Conditional;
            r.reasoning = format!(
                "ASPECTS {aspects} < 6: see the large-core pathway for eligibility."
            );
        }
        None => {
            r.eligibility = Eligibility::Conditional;
            r.reasoning = "LVO within 6h; ASPECTS unavailable to confirm core size.".to_string();
        }
    }

    if patient.mrs_pre.map(|m| m >= 2).unwrap_or(false) {
        r.caveats.push(
            "Pre-stroke mRS >= 2: trial populations were mRS 0-1; benefit less certain."
                .to_string(),
        );
        r.needs_vector_search = true;
    }
    r
}

fn evt_extended_window(patient: &PatientPresentation) -> EligibilityResult {
    let mut r = EligibilityResult::new("EVT (extended window, 6-24h)");
    r.relevant_trials = vec!["DAWN".to_string(), "DEFUSE 3".to_string()];

    if !patient.lvo {
        r.eligibility = Eligibility::No;
        r.reasoning = "Extended-window EVT evidence applies to LVO.".to_string();
        return r;
    }

    let in_window = patient
        .last_known_well_hours
        .map(|lkw| lkw > 6.0 && lkw <= 24.0)
        .unwrap_or(patient.unknown_onset);

    if !in_window {
        r.eligibility = Eligibility::No;
        r.reasoning = "Not in the 6-24h window (and onset is not unknown).".to_string();
        return r;
    }

    if patient.has_perfusion_imaging {
        r.eligibility = Eligibility::Yes;
        r.cor = Some("1".to_string());
        r.loe = Some("A".to_string());
        r.reasoning =
            "LVO in the 6-24h window with perfusion imaging for DAWN/DEFUSE 3 selection."
                .to_string();
    } else {
        r.eligibility = Eligibility::Conditional;
        r.reasoning =
            "LVO in the 6-24h window; perfusion-based selection imaging is required.".to_string();
        r.needs_vector_search = true;
    }
    r
}

fn evt_large_core(patient: &PatientPresentation) -> EligibilityResult {
    let mut r = EligibilityResult::new("EVT (large core)");
    r.relevant_trials = vec![
        "SELECT2".to_string(),
        "ANGEL-ASPECT".to_string(),
        "TENSION".to_string(),
    ];

    let large_core = patient.aspects.map(|a| a <= 5).unwrap_or(false)
        || patient.core_volume_ml.map(|v| v >= 50.0).unwrap_or(false);

    if !large_core {
        r.eligibility = Eligibility::No;
        r.reasoning = "No large-core marker (ASPECTS <= 5 or core >= 50ml) present.".to_string();
        return r;
    }
    if !patient.lvo {
        r.eligibility = Eligibility::Uncertain;
        r.reasoning = "Large core noted but LVO status is unclear.".to_string();
        return r;
    }

    r.eligibility = Eligibility::Conditional;
    r.cor = Some("2a".to_string());
    r.loe = Some("B-R".to_string());
    r.reasoning =
        "Large-core LVO: EVT showed benefit in SELECT2/ANGEL-ASPECT populations; individualize."
            .to_string();
    r.needs_vector_search = true;
    r
}

fn evt_posterior(patient: &PatientPresentation) -> EligibilityResult {
    let mut r = EligibilityResult::new("EVT (posterior circulation)");
    r.relevant_trials = vec!["ATTENTION".to_string(), "BAOCHE".to_string()];

    if patient
        .occlusion_segment
        .as_deref()
        .map(|s| s == "basilar")
        .unwrap_or(false)
    {
        r.eligibility = Eligibility::Conditional;
        r.cor = Some("1".to_string());
        r.loe = Some("B-R".to_string());
        r.reasoning =
            "Basilar occlusion: EVT is indicated in ATTENTION/BAOCHE-like presentations."
                .to_string();
        r.needs_vector_search = true;
    } else {
        r.eligibility = Eligibility::Uncertain;
        r.reasoning =
            "Posterior-circulation features without a confirmed basilar occlusion.".to_string();
    }
    r
}

fn bp_management(patient: &PatientPresentation) -> EligibilityResult {
    let mut r = EligibilityResult::new("Blood pressure management");
    r.eligibility = Eligibility::Conditional;
    r.cor = Some("1".to_string());
    r.loe = Some("B-NR".to_string());
    r.reasoning = if patient.ivt_given {
        "Post-IVT: maintain BP < 180/105 for 24h.".to_string()
    } else {
        "Pre-treatment target < 185/110 if reperfusion therapy is planned.".to_string()
    };
    r
}
