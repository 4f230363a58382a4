//! Deterministic patient presentation parsing and completeness assessment.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Structured patient data extracted from natural-language input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientPresentation {
    pub age: Option<u32>,
    pub sex: Option<String>,

    // Time
    pub last_known_well_hours: Option<f64>,
    #[serde(default)]
    pub wake_up_stroke: bool,
    #[serde(default)]
    pub unknown_onset: bool,

    // Clinical scores
    pub nihss: Option<u32>,
    pub mrs_pre: Option<u32>,
    pub aspects: Option<u32>,

    // Imaging
    pub occlusion_location: Option<String>,
    pub occlusion_segment: Option<String>,
    #[serde(default)]
    pub occlusion_segment_unspecified: bool,
    #[serde(default)]
    pub lvo: bool,
    #[serde(default)]
    pub mvo: bool,
    #[serde(default = "default_true")]
    pub anterior_circulation: bool,
    #[serde(default)]
    pub posterior_circulation: bool,

    // Perfusion imaging
    #[serde(default)]
    pub has_perfusion_imaging: bool,
    pub core_volume_ml: Option<f64>,
    pub penumbra_volume_ml: Option<f64>,
    pub mismatch_ratio: Option<f64>,

    // Comorbidities
    #[serde(default)]
    pub on_anticoagulation: bool,
    pub anticoagulant_type: Option<String>,
    pub inr: Option<f64>,
    #[serde(default)]
    pub dementia: bool,

    // Treatment already given
    #[serde(default)]
    pub ivt_given: bool,

    pub raw_presentation: String,
}

fn default_true() -> bool {
    true
}

/// Missing-parameter entry with the question to ask the clinician.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingParam {
    pub param: String,
    pub label: String,
    #[serde(default)]
    pub question: Option<String>,
}

/// Whether enough data exists to assess each treatment pathway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletenessResult {
    #[serde(default)]
    pub can_assess_ivt: bool,
    #[serde(default)]
    pub can_assess_evt: bool,
    #[serde(default)]
    pub can_assess_extended: bool,
    #[serde(default)]
    pub can_assess_large_core: bool,

    #[serde(default)]
    pub missing_critical: Vec<MissingParam>,
    #[serde(default)]
    pub missing_important: Vec<MissingParam>,
    #[serde(default)]
    pub assumptions_made: Vec<String>,

    #[serde(default)]
    pub should_ask_clarification: bool,
    #[serde(default)]
    pub clarification_questions: Vec<String>,
}

lazy_static! {
    static ref AGE_RE: Regex = Regex::new(r"(\d{1,3})[\s-]*(?:year|yr|y/?o)").unwrap();
    static ref LKW_RE: Regex =
        Regex::new(r"last\s+known\s+well\s+(\d+\.?\d*)\s*(?:hour|hr|h)").unwrap();
    static ref HOURS_AGO_RE: Regex =
        Regex::new(r"(\d+\.?\d*)\s*(?:hour|hr|h)s?\s*(?:ago|since|from|out)").unwrap();
    static ref LKW_SHORT_RE: Regex = Regex::new(r"lkw\s+(\d+\.?\d*)\s*h?").unwrap();
    static ref NIHSS_RE: Regex = Regex::new(r"nihss\s*(?:score\s*)?(?:of\s*)?(\d+)").unwrap();
    static ref MRS_RE: Regex =
        Regex::new(r"(?:pre-?stroke\s+)?m?rs\s*(?:score\s*)?(?:of\s*)?(\d)").unwrap();
    static ref ASPECTS_RE: Regex =
        Regex::new(r"aspects?\s*(?:score\s*)?(?:of\s*)?(\d+)").unwrap();
    static ref INR_RE: Regex = Regex::new(r"inr\s*(?:of\s*)?(\d+\.?\d*)").unwrap();
    static ref CORE_RE: Regex =
        Regex::new(r"core\s*(?:volume\s*)?(?:of\s*)?(\d+\.?\d*)\s*ml").unwrap();
    static ref PENUMBRA_RE: Regex =
        Regex::new(r"penumbra\s*(?:volume\s*)?(?:of\s*)?(\d+\.?\d*)\s*ml").unwrap();
    static ref MISMATCH_RE: Regex =
        Regex::new(r"mismatch\s*(?:ratio\s*)?(?:of\s*)?(\d+\.?\d*)").unwrap();
    static ref OCCLUSION_RES: Vec<Regex> = vec![
        Regex::new(r"(?:left|right|bilateral)\s+(?:mca|m1|m2|m3)").unwrap(),
        Regex::new(r"(?:mca|m1|m2)\s+occlusion").unwrap(),
        Regex::new(r"(?:ica|internal\s+carotid)\s+(?:occlusion|terminus)").unwrap(),
        Regex::new(r"basilar\s+(?:artery\s+)?occlusion").unwrap(),
        Regex::new(r"(?:left|right)\s+(?:ica|mca|aca|pca|vertebral|basilar)").unwrap(),
    ];
    static ref WORD_M1: Regex = Regex::new(r"\bm1\b").unwrap();
    static ref WORD_M2: Regex = Regex::new(r"\bm2\b").unwrap();
    static ref WORD_M3_M4: Regex = Regex::new(r"\bm[34]\b").unwrap();
    static ref WORD_ICA: Regex =
        Regex::new(r"\bica\b|internal\s+carotid|carotid terminus").unwrap();
    static ref WORD_BASILAR: Regex = Regex::new(r"\bbasilar\b").unwrap();
    static ref WORD_MCA: Regex = Regex::new(r"\bmca\b|middle\s+cerebral").unwrap();
}

fn capture_u32(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

fn capture_f64(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Regex extraction of structured patient data.
pub fn parse_patient(text: &str) -> PatientPresentation {
    let t = text.to_lowercase();
    let mut p = PatientPresentation {
        raw_presentation: text.to_string(),
        anterior_circulation: true,
        ..Default::default()
    };

    p.age = capture_u32(&AGE_RE, &t);

    if ["female", "woman", " f,", " f "].iter().any(|w| t.contains(w)) {
        p.sex = Some("female".to_string());
    } else if ["male", " man", " m,", " m "].iter().any(|w| t.contains(w)) {
        p.sex = Some("male".to_string());
    }

    p.last_known_well_hours = capture_f64(&LKW_RE, &t)
        .or_else(|| capture_f64(&HOURS_AGO_RE, &t))
        .or_else(|| capture_f64(&LKW_SHORT_RE, &t));

    if t.contains("wake-up") || t.contains("wake up stroke") || t.contains("woke up with") {
        p.wake_up_stroke = true;
        p.unknown_onset = true;
    }
    if t.contains("unknown onset") || t.contains("unwitnessed") {
        p.unknown_onset = true;
    }

    p.nihss = capture_u32(&NIHSS_RE, &t);
    p.mrs_pre = capture_u32(&MRS_RE, &t).filter(|&v| v <= 5);
    p.aspects = capture_u32(&ASPECTS_RE, &t);

    for pattern in OCCLUSION_RES.iter() {
        if let Some(m) = pattern.find(&t) {
            p.occlusion_location = Some(m.as_str().trim().to_string());
            break;
        }
    }

    // Vessel segment detection drives LVO/MVO status.
    if WORD_M1.is_match(&t) {
        p.occlusion_segment = Some("M1".to_string());
        p.lvo = true;
    } else if WORD_M2.is_match(&t) {
        p.occlusion_segment = Some("M2".to_string());
        p.mvo = true;
    } else if WORD_M3_M4.is_match(&t) {
        p.occlusion_segment = Some("distal".to_string());
        p.mvo = true;
    } else if WORD_ICA.is_match(&t) {
        p.occlusion_segment = Some("ICA".to_string());
        p.lvo = true;
    } else if WORD_BASILAR.is_match(&t) {
        p.occlusion_segment = Some("basilar".to_string());
        p.lvo = true;
    } else if WORD_MCA.is_match(&t) {
        // MCA named without a segment: assume proximal but flag it.
        p.occlusion_segment = Some("MCA (segment unspecified)".to_string());
        p.occlusion_segment_unspecified = true;
        p.lvo = true;
    }

    if !p.lvo && !p.mvo && (t.contains("lvo") || t.contains("large vessel occlusion")) {
        p.lvo = true;
    }

    if ["basilar", "posterior", "vertebral", "pca"]
        .iter()
        .any(|k| t.contains(k))
    {
        p.posterior_circulation = true;
        p.anterior_circulation = false;
    }

    if ["ctp", "ct perfusion", "perfusion imaging", "dwi-pwi", "mismatch"]
        .iter()
        .any(|k| t.contains(k))
    {
        p.has_perfusion_imaging = true;
    }
    p.core_volume_ml = capture_f64(&CORE_RE, &t);
    if p.core_volume_ml.is_some() {
        p.has_perfusion_imaging = true;
    }
    p.penumbra_volume_ml = capture_f64(&PENUMBRA_RE, &t);
    p.mismatch_ratio = capture_f64(&MISMATCH_RE, &t);

    if ["anticoagul", "warfarin", "doac", "coumadin"]
        .iter()
        .any(|k| t.contains(k))
    {
        p.on_anticoagulation = true;
        if t.contains("warfarin") || t.contains("coumadin") {
            p.anticoagulant_type = Some("warfarin".to_string());
        } else if ["apixaban", "rivaroxaban", "dabigatran", "edoxaban", "doac"]
            .iter()
            .any(|d| t.contains(d))
        {
            p.anticoagulant_type = Some("DOAC".to_string());
        }
    }
    p.inr = capture_f64(&INR_RE, &t);

    if t.contains("dementia") || t.contains("cognitive decline") || t.contains("alzheimer") {
        p.dementia = true;
    }

    if t.contains("tpa given") || t.contains("tnk given") || t.contains("ivt given") {
        p.ivt_given = true;
    }

    p
}

/// Tiered completeness assessment: tier-1 gaps block pathway evaluation and
/// generate clarification questions; tier-2 gaps get defaults.
pub fn assess_completeness(patient: &PatientPresentation) -> CompletenessResult {
    let mut c = CompletenessResult::default();

    let has_time = patient.last_known_well_hours.is_some()
        || patient.unknown_onset
        || patient.wake_up_stroke;
    if !has_time {
        c.missing_critical.push(MissingParam {
            param: "last_known_well".to_string(),
            label: "Time from Last Known Well".to_string(),
            question: Some(
                "When was the patient last known to be at neurological baseline? If unknown, \
                 is this a wake-up stroke or unwitnessed onset?"
                    .to_string(),
            ),
        });
    }

    if patient.nihss.is_none() {
        c.missing_critical.push(MissingParam {
            param: "nihss".to_string(),
            label: "NIHSS Score".to_string(),
            question: Some("What is the current NIHSS score?".to_string()),
        });
    }

    if patient.aspects.is_none() && patient.anterior_circulation {
        c.missing_critical.push(MissingParam {
            param: "aspects".to_string(),
            label: "ASPECTS Score".to_string(),
            question: Some("What is the CT ASPECTS score?".to_string()),
        });
    }

    let has_lvo_info = patient.lvo || patient.mvo || patient.occlusion_location.is_some();
    if !has_lvo_info {
        c.missing_critical.push(MissingParam {
            param: "occlusion_location".to_string(),
            label: "Vessel Occlusion Status".to_string(),
            question: Some(
                "Has CTA been performed? Is there a large vessel occlusion (LVO)? If so, \
                 what is the occlusion location?"
                    .to_string(),
            ),
        });
    }

    if patient.occlusion_segment_unspecified {
        c.missing_critical.push(MissingParam {
            param: "occlusion_segment".to_string(),
            label: "MCA Occlusion Segment (M1 vs M2)".to_string(),
            question: Some(
                "The MCA occlusion was noted but the segment level was not specified. Is this \
                 an M1 (proximal) or M2 (branch) occlusion?"
                    .to_string(),
            ),
        });
        c.assumptions_made.push(
            "MCA occlusion segment not specified — assuming proximal M1. If this is an M2 \
             occlusion, EVT recommendations differ significantly."
                .to_string(),
        );
        c.should_ask_clarification = true;
    }

    if patient.mrs_pre.is_none() {
        c.missing_important.push(MissingParam {
            param: "mrs_pre".to_string(),
            label: "Pre-stroke mRS".to_string(),
            question: None,
        });
        c.assumptions_made.push(
            "Pre-stroke mRS assumed 0 (functionally independent) — common default per trial \
             populations"
                .to_string(),
        );
    }
    if patient.age.is_none() {
        c.missing_important.push(MissingParam {
            param: "age".to_string(),
            label: "Patient Age".to_string(),
            question: None,
        });
    }
    if !patient.has_perfusion_imaging {
        c.missing_important.push(MissingParam {
            param: "perfusion_imaging".to_string(),
            label: "Perfusion Imaging (CTP/MR DWI-PWI)".to_string(),
            question: None,
        });
    }
    if patient.on_anticoagulation && patient.anticoagulant_type.is_none() {
        c.missing_important.push(MissingParam {
            param: "anticoagulant_type".to_string(),
            label: "Anticoagulant Type and Timing".to_string(),
            question: None,
        });
    }

    c.can_assess_ivt = has_time && patient.nihss.is_some();
    c.can_assess_evt = has_time && has_lvo_info && patient.nihss.is_some();
    let has_imaging_selection = patient.has_perfusion_imaging || patient.aspects.is_some();
    c.can_assess_extended = (has_time || patient.unknown_onset) && has_imaging_selection;
    let has_core_info = patient.aspects.is_some() || patient.core_volume_ml.is_some();
    c.can_assess_large_core = has_core_info && has_lvo_info;

    let can_assess_any = c.can_assess_ivt
        || c.can_assess_evt
        || c.can_assess_extended
        || c.can_assess_large_core;
    c.should_ask_clarification = c.should_ask_clarification || !can_assess_any;

    if c.should_ask_clarification {
        c.clarification_questions = c
            .missing_critical
            .iter()
            .filter_map(|m| m.question.clone())
            .collect();
    }

    c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_presentation() {
        let p = parse_patient(
            "72 year old female, NIHSS 18, left M1 occlusion on CTA, ASPECTS 8, \
             last known well 3 hours, pre-stroke mRS 1",
        );
        assert_eq!(p.age, Some(72));
        assert_eq!(p.sex.as_deref(), Some("female"));
        assert_eq!(p.nihss, Some(18));
        assert_eq!(p.aspects, Some(8));
        assert_eq!(p.last_known_well_hours, Some(3.0));
        assert_eq!(p.mrs_pre, Some(1));
        assert_eq!(p.occlusion_segment.as_deref(), Some("M1"));
        assert!(p.lvo);
        assert!(!p.mvo);
    }

    #[test]
    fn test_parse_lkw_shorthand() {
        let p = parse_patient("NIHSS 12, LKW 6h, M2 occlusion");
        assert_eq!(p.last_known_well_hours, Some(6.0));
        assert_eq!(p.occlusion_segment.as_deref(), Some("M2"));
        assert!(p.mvo);
        assert!(!p.lvo);
    }

    #[test]
    fn test_wake_up_stroke_flags_unknown_onset() {
        let p = parse_patient("woke up with right-sided weakness, NIHSS 14, MCA occlusion");
        assert!(p.wake_up_stroke);
        assert!(p.unknown_onset);
        assert!(p.occlusion_segment_unspecified);
        assert!(p.lvo);
    }

    #[test]
    fn test_posterior_circulation() {
        let p = parse_patient("basilar artery occlusion, NIHSS 20, 5 hours ago");
        assert!(p.posterior_circulation);
        assert!(!p.anterior_circulation);
        assert_eq!(p.occlusion_segment.as_deref(), Some("basilar"));
    }

    #[test]
    fn test_anticoagulation_detection() {
        let p = parse_patient("on warfarin, INR of 2.8, NIHSS 10");
        assert!(p.on_anticoagulation);
        assert_eq!(p.anticoagulant_type.as_deref(), Some("warfarin"));
        assert_eq!(p.inr, Some(2.8));
    }

    #[test]
    fn test_completeness_missing_everything_asks() {
        let p = parse_patient("is this patient eligible for thrombectomy?");
        let c = assess_completeness(&p);
        assert!(c.should_ask_clarification);
        assert!(!c.clarification_questions.is_empty());
        assert!(!c.can_assess_evt);
    }

    #[test]
    fn test_completeness_full_presentation_passes() {
        let p = parse_patient(
            "72yo, NIHSS 18, left M1 occlusion, ASPECTS 8, last known well 3 hours",
        );
        let c = assess_completeness(&p);
        assert!(c.can_assess_ivt);
        assert!(c.can_assess_evt);
        assert!(c.can_assess_large_core);
        assert!(!c.should_ask_clarification);
    }

    #[test]
    fn test_unspecified_mca_segment_forces_clarification() {
        let p = parse_patient("NIHSS 15, MCA occlusion, ASPECTS 9, LKW 2h");
        let c = assess_completeness(&p);
        assert!(c.should_ask_clarification);
        assert!(c
            .missing_critical
            .iter()
            .any(|m| m.param == "occlusion_segment"));
    }
}
