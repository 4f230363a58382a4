//! Compatibility evaluator.
//!
//! Pure pair grading: one (inner, outer) device pair is judged by two
//! parallel schemes, the manufacturer compatibility table and geometric
//! fit, and the two are reconciled into a single overall verdict. The
//! overall verdict is the only status downstream rollups may consult.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{CompatBound, Device, DiameterUnit, FitLogic};
use crate::models::{CompatStatus, GeoGrade, LogicType, OverallStatus};

// Geometry pass thresholds per unit.
const DIAMETER_THRESHOLD_IN: f64 = 0.003;
const DIAMETER_THRESHOLD_MM: f64 = 0.0762;
const DIAMETER_THRESHOLD_F: f64 = 0.23091;
const LENGTH_THRESHOLD_CM: f64 = 5.0;

/// Which device makes the compatibility claim for a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimantRole {
    Inner,
    Outer,
}

/// The four recognized compatibility-table fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatField {
    WireMaxOd,
    CatheterMaxOd,
    CatheterReqId,
    GuideMinId,
}

impl CompatField {
    pub const ALL: [CompatField; 4] = [
        CompatField::WireMaxOd,
        CompatField::CatheterMaxOd,
        CompatField::CatheterReqId,
        CompatField::GuideMinId,
    ];

    /// Catalog field stem, used in human-readable notes.
    pub fn label(&self) -> &'static str {
        match self {
            CompatField::WireMaxOd => "wire_max_outer-diameter",
            CompatField::CatheterMaxOd => "catheter_max_outer-diameter",
            CompatField::CatheterReqId => "catheter_req_inner-diameter",
            CompatField::GuideMinId => "guide_or_catheter_or_sheath_min_inner-diameter",
        }
    }

    pub fn operator(&self) -> CompareOp {
        match self {
            CompatField::WireMaxOd | CompatField::CatheterMaxOd => CompareOp::Le,
            CompatField::CatheterReqId => CompareOp::Eq,
            CompatField::GuideMinId => CompareOp::Ge,
        }
    }

    /// Category tags the counterpart device must carry for the rule to apply.
    pub fn required_categories(&self) -> &'static [&'static str] {
        match self {
            CompatField::WireMaxOd => &["wire", "guidewire"],
            CompatField::CatheterMaxOd => &[
                "catheter",
                "microcatheter",
                "intermediate_catheter",
                "aspiration",
            ],
            CompatField::CatheterReqId | CompatField::GuideMinId => &[
                "catheter",
                "microcatheter",
                "intermediate_catheter",
                "guide_catheter",
                "sheath",
                "aspiration",
            ],
        }
    }

    /// The dimensional side of the counterpart this rule reads.
    pub fn applicable_spec_fields(&self) -> &'static [SpecField] {
        match self {
            CompatField::WireMaxOd | CompatField::CatheterMaxOd => {
                &[SpecField::OuterDiameterDistal, SpecField::OuterDiameterProximal]
            }
            CompatField::CatheterReqId | CompatField::GuideMinId => &[SpecField::InnerDiameter],
        }
    }
}

/// Spec fields a compat rule can be crossed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecField {
    InnerDiameter,
    OuterDiameterDistal,
    OuterDiameterProximal,
}

impl SpecField {
    pub const ALL: [SpecField; 3] = [
        SpecField::InnerDiameter,
        SpecField::OuterDiameterDistal,
        SpecField::OuterDiameterProximal,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SpecField::InnerDiameter => "inner-diameter",
            SpecField::OuterDiameterDistal => "outer-diameter-distal",
            SpecField::OuterDiameterProximal => "outer-diameter-proximal",
        }
    }

    fn read(&self, device: &Device, unit: DiameterUnit) -> Option<f64> {
        match self {
            SpecField::InnerDiameter => device.specs.inner_diameter.get(unit),
            SpecField::OuterDiameterDistal => device.specs.outer_diameter_distal.get(unit),
            SpecField::OuterDiameterProximal => device.specs.outer_diameter_proximal.get(unit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "=")]
    Eq,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "=",
        }
    }
}

/// One compatibility-table row: a claim crossed with a counterpart spec field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatRow {
    pub claimant_role: ClaimantRole,
    pub field: CompatField,
    pub unit: DiameterUnit,
    pub spec_field: SpecField,
    pub operator: CompareOp,
    pub claim_raw: Option<String>,
    pub spec_value: Option<f64>,
    pub applicable_category: bool,
    pub applicable_spec_field: bool,
    pub status: CompatStatus,
    pub note: String,
}

/// Geometric dimension compared between the two devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoDimension {
    DiameterDistal,
    DiameterProximal,
    Length,
}

impl GeoDimension {
    pub fn is_diameter(&self) -> bool {
        !matches!(self, GeoDimension::Length)
    }

    pub fn label(&self) -> &'static str {
        match self {
            GeoDimension::DiameterDistal => "outer-diameter-distal",
            GeoDimension::DiameterProximal => "outer-diameter-proximal",
            GeoDimension::Length => "length",
        }
    }
}

/// One geometry row: a signed clearance against a unit-specific threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryRow {
    pub dimension: GeoDimension,
    pub unit: Option<DiameterUnit>,
    pub inner_value: Option<f64>,
    pub outer_value: Option<f64>,
    pub difference: Option<f64>,
    pub threshold: f64,
    pub status: GeoGrade,
}

/// Connection label: same conical level or adjacent levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    IntraLevel,
    InterLevel,
}

/// Full evaluation of one (inner, outer) device pair.
#[derive(Debug, Clone)]
pub struct PairResult {
    pub inner: Arc<Device>,
    pub outer: Arc<Device>,
    pub connection_type: ConnectionType,
    pub compat_rows: Vec<CompatRow>,
    pub geometry_rows: Vec<GeometryRow>,
    pub compatibility_status: CompatStatus,
    pub diameter_status: GeoGrade,
    pub length_status: GeoGrade,
    pub geometry_status: GeoGrade,
    pub overall_status: OverallStatus,
    pub logic_type: LogicType,
}

/// Evaluate one pair. Deterministic; running twice yields identical output.
pub fn evaluate_pair(
    inner: Arc<Device>,
    outer: Arc<Device>,
    connection_type: ConnectionType,
) -> PairResult {
    let compat_rows = build_compat_rows(&inner, &outer);
    let compatibility_status = grade_compat(&compat_rows);

    let geometry_rows = build_geometry_rows(&inner, &outer);
    let diameter_status = grade_diameter_subset(&geometry_rows);
    let length_status = grade_length_subset(&geometry_rows);
    let geometry_status = combine_geometry(diameter_status, length_status);

    let (overall_status, logic_type) = grade_overall(
        inner.fit_logic,
        outer.fit_logic,
        compatibility_status,
        diameter_status,
        length_status,
        geometry_status,
    );

    PairResult {
        inner,
        outer,
        connection_type,
        compat_rows,
        geometry_rows,
        compatibility_status,
        diameter_status,
        length_status,
        geometry_status,
        overall_status,
        logic_type,
    }
}

// ── Compatibility grading ─────────────────────────────────────────

fn claim_raw(device: &Device, field: CompatField, unit: DiameterUnit) -> Option<String> {
    let tri = match field {
        CompatField::WireMaxOd => &device.compat.wire_max_od,
        CompatField::CatheterMaxOd => &device.compat.catheter_max_od,
        CompatField::CatheterReqId => &device.compat.catheter_req_id,
        CompatField::GuideMinId => &device.compat.guide_min_id,
    };
    tri.raw(unit).map(|s| s.to_string())
}

fn category_applies(target: &Device, field: CompatField) -> bool {
    let target_categories = target.logic_categories();
    field
        .required_categories()
        .iter()
        .any(|required| target_categories.iter().any(|c| c == required))
}

fn compare(spec_value: f64, bound: CompatBound, op: CompareOp) -> CompatStatus {
    let pass = match (op, bound) {
        (CompareOp::Le, CompatBound::Single(max)) => spec_value <= max,
        (CompareOp::Ge, CompatBound::Single(min)) => spec_value >= min,
        (CompareOp::Eq, CompatBound::Single(exact)) => (spec_value - exact).abs() < f64::EPSILON,
        // `=` permits a declared low-high range.
        (_, CompatBound::Range(low, high)) => spec_value >= low && spec_value <= high,
    };
    if pass {
        CompatStatus::Pass
    } else {
        CompatStatus::Fail
    }
}

fn build_compat_rows(inner: &Device, outer: &Device) -> Vec<CompatRow> {
    let mut rows = Vec::new();

    for (role, claimant, target) in [
        (ClaimantRole::Inner, inner, outer),
        (ClaimantRole::Outer, outer, inner),
    ] {
        for field in CompatField::ALL {
            let applicable_category = category_applies(target, field);
            for unit in DiameterUnit::ALL {
                let raw = claim_raw(claimant, field, unit);
                for spec_field in SpecField::ALL {
                    let applicable_spec_field =
                        field.applicable_spec_fields().contains(&spec_field);
                    let spec_value = spec_field.read(target, unit);

                    let status = if !applicable_category || !applicable_spec_field {
                        CompatStatus::Na
                    } else {
                        match (raw.as_deref().and_then(CompatBound::parse), spec_value) {
                            (Some(bound), Some(value)) => compare(value, bound, field.operator()),
                            _ => CompatStatus::Na,
                        }
                    };

                    let note = format!(
                        "{claimant_name} {field} {op} {claim}: {target_name} {spec_field} = {spec} [{status}]",
                        claimant_name = claimant.device_name,
                        field = field.label(),
                        op = field.operator().symbol(),
                        claim = raw.as_deref().unwrap_or("N/A"),
                        target_name = target.device_name,
                        spec_field = spec_field.label(),
                        spec = spec_value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".into()),
                        status = status.as_str(),
                    );

                    rows.push(CompatRow {
                        claimant_role: role,
                        field,
                        unit,
                        spec_field,
                        operator: field.operator(),
                        claim_raw: raw.clone(),
                        spec_value,
                        applicable_category,
                        applicable_spec_field,
                        status,
                        note,
                    });
                }
            }
        }
    }
    rows
}

/// Pair-level compatibility verdict: pass if any row passes, else fail if
/// any row fails, else NA.
fn grade_compat(rows: &[CompatRow]) -> CompatStatus {
    if rows.iter().any(|r| r.status == CompatStatus::Pass) {
        CompatStatus::Pass
    } else if rows.iter().any(|r| r.status == CompatStatus::Fail) {
        CompatStatus::Fail
    } else {
        CompatStatus::Na
    }
}

// ── Geometry grading ──────────────────────────────────────────────

fn diameter_threshold(unit: DiameterUnit) -> f64 {
    match unit {
        DiameterUnit::Inches => DIAMETER_THRESHOLD_IN,
        DiameterUnit::Mm => DIAMETER_THRESHOLD_MM,
        DiameterUnit::French => DIAMETER_THRESHOLD_F,
    }
}

fn grade_difference(difference: Option<f64>, threshold: f64) -> GeoGrade {
    match difference {
        None => GeoGrade::Na,
        Some(diff) if diff >= threshold => GeoGrade::Pass,
        Some(diff) if diff > 0.0 => GeoGrade::Warning,
        Some(_) => GeoGrade::Fail,
    }
}

fn build_geometry_rows(inner: &Device, outer: &Device) -> Vec<GeometryRow> {
    let mut rows = Vec::new();

    // Diameter: the outer device's ID must clear the inner device's OD,
    // checked at both the distal and proximal OD.
    for (dimension, inner_tri) in [
        (GeoDimension::DiameterDistal, &inner.specs.outer_diameter_distal),
        (
            GeoDimension::DiameterProximal,
            &inner.specs.outer_diameter_proximal,
        ),
    ] {
        for unit in DiameterUnit::ALL {
            let inner_value = inner_tri.get(unit);
            let outer_value = outer.specs.inner_diameter.get(unit);
            let difference = match (inner_value, outer_value) {
                (Some(i), Some(o)) => Some(o - i),
                _ => None,
            };
            let threshold = diameter_threshold(unit);
            rows.push(GeometryRow {
                dimension,
                unit: Some(unit),
                inner_value,
                outer_value,
                difference,
                threshold,
                status: grade_difference(difference, threshold),
            });
        }
    }

    // Length: the inner device must be longer to reach past the outer.
    let inner_len = inner.specs.length_cm;
    let outer_len = outer.specs.length_cm;
    let difference = match (inner_len, outer_len) {
        (Some(i), Some(o)) => Some(i - o),
        _ => None,
    };
    rows.push(GeometryRow {
        dimension: GeoDimension::Length,
        unit: None,
        inner_value: inner_len,
        outer_value: outer_len,
        difference,
        threshold: LENGTH_THRESHOLD_CM,
        status: grade_difference(difference, LENGTH_THRESHOLD_CM),
    });

    rows
}

fn grade_subset(rows: &[&GeometryRow]) -> GeoGrade {
    if rows.iter().any(|r| r.status == GeoGrade::Fail) {
        return GeoGrade::Fail;
    }
    let passes = rows.iter().filter(|r| r.status == GeoGrade::Pass).count();
    let warnings = rows.iter().filter(|r| r.status == GeoGrade::Warning).count();

    if passes > 0 {
        if warnings > 0 {
            GeoGrade::PassWithWarning
        } else {
            GeoGrade::Pass
        }
    } else if warnings > 0 {
        GeoGrade::Warning
    } else {
        GeoGrade::Na
    }
}

fn grade_diameter_subset(rows: &[GeometryRow]) -> GeoGrade {
    let diameter_rows: Vec<&GeometryRow> =
        rows.iter().filter(|r| r.dimension.is_diameter()).collect();

    let graded = grade_subset(&diameter_rows);

    // "Not enough data" rule, preserved literally: fires only when there is
    // no fail, fewer than 2 passes, fewer than 2 pass+warning rows, and
    // every row is NA.
    let fails = diameter_rows.iter().any(|r| r.status == GeoGrade::Fail);
    let passes = diameter_rows
        .iter()
        .filter(|r| r.status == GeoGrade::Pass)
        .count();
    let pass_or_warning = diameter_rows
        .iter()
        .filter(|r| matches!(r.status, GeoGrade::Pass | GeoGrade::Warning))
        .count();
    let all_na = diameter_rows.iter().all(|r| r.status == GeoGrade::Na);

    if !fails && passes < 2 && pass_or_warning < 2 && all_na {
        return GeoGrade::Na;
    }
    graded
}

fn grade_length_subset(rows: &[GeometryRow]) -> GeoGrade {
    let length_rows: Vec<&GeometryRow> = rows
        .iter()
        .filter(|r| r.dimension == GeoDimension::Length)
        .collect();
    grade_subset(&length_rows)
}

fn combine_geometry(diameter: GeoGrade, length: GeoGrade) -> GeoGrade {
    if diameter == GeoGrade::Fail || length == GeoGrade::Fail {
        GeoGrade::Fail
    } else if diameter == GeoGrade::Na && length == GeoGrade::Na {
        GeoGrade::Na
    } else if diameter.has_warning() || length.has_warning() {
        GeoGrade::PassWithWarning
    } else if diameter == GeoGrade::Pass || length == GeoGrade::Pass {
        GeoGrade::Pass
    } else {
        GeoGrade::Na
    }
}

// ── Overall reconciliation ────────────────────────────────────────

fn grade_overall(
    inner_logic: FitLogic,
    outer_logic: FitLogic,
    compat: CompatStatus,
    diameter: GeoGrade,
    length: GeoGrade,
    geometry: GeoGrade,
) -> (OverallStatus, LogicType) {
    // Both devices judged by dimensional math: the geometry verdict stands.
    if inner_logic == FitLogic::Math && outer_logic == FitLogic::Math {
        let status = match geometry {
            GeoGrade::Pass => OverallStatus::Pass,
            GeoGrade::PassWithWarning => OverallStatus::PassWithWarning,
            GeoGrade::Fail => OverallStatus::Fail,
            GeoGrade::Warning | GeoGrade::Na => OverallStatus::Fail,
        };
        return (status, LogicType::Math);
    }

    match compat {
        CompatStatus::Fail => (OverallStatus::Fail, LogicType::Compat),
        CompatStatus::Na => {
            // Geometry fallback: both subsets must actually demonstrate fit.
            if diameter.is_passing() && length.is_passing() {
                let status = if diameter.has_warning() || length.has_warning() {
                    OverallStatus::PassWithWarning
                } else {
                    OverallStatus::Pass
                };
                (status, LogicType::GeometryFallback)
            } else {
                (OverallStatus::Fail, LogicType::GeometryFallback)
            }
        }
        CompatStatus::Pass => {
            // A length failure overrides declared compatibility.
            if length == GeoGrade::Fail {
                return (OverallStatus::Fail, LogicType::CompatLengthFail);
            }
            if diameter == GeoGrade::Fail {
                return (OverallStatus::PassWithWarning, LogicType::CompatGeometryWarning);
            }
            if diameter.has_warning() || length.has_warning() {
                return (OverallStatus::PassWithWarning, LogicType::CompatGeometryWarning);
            }
            (OverallStatus::Pass, LogicType::Compat)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{test_support, CompatTriUnit};

    fn math_device(id: &str, product: &str) -> Device {
        test_support::device(id, product, "L2", FitLogic::Math)
    }

    fn with_dims(mut device: Device, od_in: f64, id_in: f64, length_cm: f64) -> Device {
        device.specs.outer_diameter_distal.inches = Some(od_in);
        device.specs.outer_diameter_proximal.inches = Some(od_in);
        device.specs.inner_diameter.inches = Some(id_in);
        device.specs.length_cm = Some(length_cm);
        device
    }

    fn eval(inner: Device, outer: Device) -> PairResult {
        evaluate_pair(Arc::new(inner), Arc::new(outer), ConnectionType::InterLevel)
    }

    #[test]
    fn test_diameter_at_threshold_passes_exactly() {
        // outer ID - inner OD == 0.003 exactly: pass, not warning.
        let inner = with_dims(math_device("i", "Inner"), 0.085, 0.070, 150.0);
        let outer = with_dims(math_device("o", "Outer"), 0.100, 0.088, 90.0);
        let pair = eval(inner, outer);
        assert_eq!(pair.diameter_status, GeoGrade::Pass);
    }

    #[test]
    fn test_diameter_zero_clearance_fails() {
        let inner = with_dims(math_device("i", "Inner"), 0.088, 0.070, 150.0);
        let outer = with_dims(math_device("o", "Outer"), 0.100, 0.088, 90.0);
        let pair = eval(inner, outer);
        assert_eq!(pair.diameter_status, GeoGrade::Fail);
        assert_eq!(pair.overall_status, OverallStatus::Fail);
    }

    #[test]
    fn test_diameter_between_zero_and_threshold_warns() {
        let inner = with_dims(math_device("i", "Inner"), 0.0865, 0.070, 150.0);
        let outer = with_dims(math_device("o", "Outer"), 0.100, 0.088, 90.0);
        let pair = eval(inner, outer);
        assert_eq!(pair.diameter_status, GeoGrade::Warning);
    }

    #[test]
    fn test_length_pass_boundary() {
        // inner - outer == 5cm exactly: pass.
        let inner = with_dims(math_device("i", "Inner"), 0.058, 0.046, 95.0);
        let outer = with_dims(math_device("o", "Outer"), 0.100, 0.088, 90.0);
        let pair = eval(inner, outer);
        assert_eq!(pair.length_status, GeoGrade::Pass);
    }

    #[test]
    fn test_math_pair_overall_follows_geometry() {
        let inner = with_dims(math_device("i", "Inner"), 0.058, 0.046, 132.0);
        let outer = with_dims(math_device("o", "Outer"), 0.100, 0.088, 80.0);
        let pair = eval(inner, outer);
        assert_eq!(pair.geometry_status, GeoGrade::Pass);
        assert_eq!(pair.overall_status, OverallStatus::Pass);
        assert_eq!(pair.logic_type, LogicType::Math);
    }

    #[test]
    fn test_math_pair_geometry_na_fails() {
        // No dimensions at all: geometry NA, math pair fails.
        let pair = eval(math_device("i", "Inner"), math_device("o", "Outer"));
        assert_eq!(pair.geometry_status, GeoGrade::Na);
        assert_eq!(pair.overall_status, OverallStatus::Fail);
        assert_eq!(pair.logic_type, LogicType::Math);
    }

    #[test]
    fn test_scenario_compat_na_geometry_fallback() {
        // S1: inner OD 0.058 / 132cm math; outer compat-logic, ID 0.088 /
        // 80cm with no applicable compat claim. Fallback passes on geometry.
        let inner = with_dims(math_device("i", "Vecta 46"), 0.058, 0.046, 132.0);
        let mut outer = with_dims(
            test_support::device("o", "Neuron MAX", "L0", FitLogic::Compat),
            0.108,
            0.088,
            80.0,
        );
        outer.logic_category = "sheath".to_string();
        let pair = eval(inner, outer);

        assert_eq!(pair.compatibility_status, CompatStatus::Na);
        assert_eq!(pair.diameter_status, GeoGrade::Pass);
        assert_eq!(pair.length_status, GeoGrade::Pass);
        assert_eq!(pair.overall_status, OverallStatus::Pass);
        assert_eq!(pair.logic_type, LogicType::GeometryFallback);
    }

    #[test]
    fn test_scenario_length_overrides_compat() {
        // S2: compat pass via required-ID range, but the inner device is
        // 30cm shorter than the outer.
        let mut inner = with_dims(
            test_support::device("i", "Trevo", "L4", FitLogic::Compat),
            0.025,
            0.021,
            100.0,
        );
        inner.compat.catheter_req_id = CompatTriUnit {
            inches: Some("0.021-0.071".to_string()),
            mm: None,
            french: None,
        };
        let mut outer = with_dims(math_device("o", "Outer Cath"), 0.090, 0.070, 130.0);
        outer.fit_logic = FitLogic::Compat;
        outer.logic_category = "catheter".to_string();

        let pair = eval(inner, outer);
        assert_eq!(pair.compatibility_status, CompatStatus::Pass);
        assert_eq!(pair.length_status, GeoGrade::Fail);
        assert_eq!(pair.overall_status, OverallStatus::Fail);
        assert_eq!(pair.logic_type, LogicType::CompatLengthFail);
    }

    #[test]
    fn test_compat_fail_is_overall_fail() {
        let mut inner = with_dims(
            test_support::device("i", "Wire", "LW", FitLogic::Compat),
            0.018,
            0.0,
            200.0,
        );
        inner.logic_category = "wire".to_string();
        let mut outer = with_dims(
            test_support::device("o", "Micro", "L3", FitLogic::Compat),
            0.030,
            0.021,
            150.0,
        );
        outer.logic_category = "microcatheter".to_string();
        // Outer declares a max wire OD smaller than the inner wire's OD.
        outer.compat.wire_max_od = CompatTriUnit {
            inches: Some("0.014".to_string()),
            mm: None,
            french: None,
        };

        let pair = eval(inner, outer);
        assert_eq!(pair.compatibility_status, CompatStatus::Fail);
        assert_eq!(pair.overall_status, OverallStatus::Fail);
        assert_eq!(pair.logic_type, LogicType::Compat);
    }

    #[test]
    fn test_compat_pass_diameter_fail_warns() {
        let mut inner = with_dims(
            test_support::device("i", "Stent", "L4", FitLogic::Compat),
            0.080,
            0.0,
            160.0,
        );
        inner.compat.catheter_req_id = CompatTriUnit {
            inches: Some("0.070".to_string()),
            mm: None,
            french: None,
        };
        let mut outer = with_dims(math_device("o", "Cath"), 0.090, 0.070, 130.0);
        outer.fit_logic = FitLogic::Compat;
        outer.logic_category = "catheter".to_string();

        let pair = eval(inner, outer);
        assert_eq!(pair.compatibility_status, CompatStatus::Pass);
        assert_eq!(pair.diameter_status, GeoGrade::Fail);
        assert_eq!(pair.length_status, GeoGrade::Pass);
        assert_eq!(pair.overall_status, OverallStatus::PassWithWarning);
        assert_eq!(pair.logic_type, LogicType::CompatGeometryWarning);
    }

    #[test]
    fn test_range_boundary_inclusive() {
        // Declared range 0.017-0.021 against spec 0.021: pass. 0.0211: fail.
        let mut inner = test_support::device("i", "Retriever", "L4", FitLogic::Compat);
        inner.compat.catheter_req_id = CompatTriUnit {
            inches: Some("0.017-0.021".to_string()),
            mm: None,
            french: None,
        };
        let make_outer = |id_in: f64| {
            let mut outer = with_dims(math_device("o", "Micro"), 0.030, id_in, 150.0);
            outer.fit_logic = FitLogic::Compat;
            outer.logic_category = "microcatheter".to_string();
            outer
        };

        let at_edge = eval(inner.clone(), make_outer(0.021));
        assert_eq!(at_edge.compatibility_status, CompatStatus::Pass);

        let past_edge = eval(inner, make_outer(0.0211));
        assert_eq!(past_edge.compatibility_status, CompatStatus::Fail);
    }

    #[test]
    fn test_units_never_cross() {
        // Claim only in mm, spec only in inches: every row is NA.
        let mut inner = test_support::device("i", "Stent", "L4", FitLogic::Compat);
        inner.compat.catheter_req_id = CompatTriUnit {
            inches: None,
            mm: Some("0.53".to_string()),
            french: None,
        };
        let mut outer = test_support::device("o", "Micro", "L3", FitLogic::Compat);
        outer.logic_category = "microcatheter".to_string();
        outer.specs.inner_diameter.inches = Some(0.021);

        let pair = eval(inner, outer);
        assert_eq!(pair.compatibility_status, CompatStatus::Na);
    }

    #[test]
    fn test_evaluator_is_deterministic() {
        let inner = with_dims(math_device("i", "Inner"), 0.058, 0.046, 132.0);
        let outer = with_dims(math_device("o", "Outer"), 0.100, 0.088, 80.0);
        let first = eval(inner.clone(), outer.clone());
        let second = eval(inner, outer);
        assert_eq!(first.overall_status, second.overall_status);
        assert_eq!(first.logic_type, second.logic_type);
        assert_eq!(first.compat_rows.len(), second.compat_rows.len());
    }
}
