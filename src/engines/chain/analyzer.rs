//! Chain analyzer.
//!
//! Rolls evaluated pairs up into connection, path, and chain outcomes, and
//! extracts human-readable pass/fail reasons with unit disambiguation.
//! Verdicts come exclusively from each pair's overall status; sub-statuses
//! are read only for reason text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::evaluator::{CompatRow, GeoDimension, GeometryRow, PairResult};
use super::pairs::{ChainEvaluation, ConnectionEvaluation, PathEvaluation};
use crate::models::{CompatStatus, GeoGrade, LogicType, OverallStatus};

/// Why a passing pair passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassReasonType {
    Standard,
    GeometryOverride,
}

/// Reason bundle for one evaluated pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairReasons {
    pub inner_device_name: String,
    pub outer_device_name: String,
    pub compatibility_reasons: Vec<String>,
    pub geometry_reasons: GeometryReasons,
    pub summary: String,
    #[serde(default)]
    pub pass_reason_type: Option<PassReasonType>,
    #[serde(default)]
    pub override_note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeometryReasons {
    pub diameter: Vec<String>,
    pub length: Vec<String>,
}

/// Detailed record for one failing compatibility rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatFailure {
    pub inner_device_name: String,
    pub outer_device_name: String,
    pub compatibility_field: String,
    pub compat_value: String,
    pub spec_value: String,
    pub reason: String,
}

/// Detailed record for one failing geometry dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryFailure {
    pub inner_device_name: String,
    pub outer_device_name: String,
    pub dimension: String,
    pub inner_value: String,
    pub outer_value: String,
    pub difference: String,
    pub reason: String,
}

/// Per-pair reason entry inside a pass/failure group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairReasonEntry {
    pub overall_status: OverallStatus,
    pub logic_type: LogicType,
    pub reasons: PairReasons,
}

/// Passing variant pairs for one product combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassGroup {
    pub device_combination: String,
    pub pair_reasons: Vec<PairReasonEntry>,
}

/// Failing variant pairs for one product combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureGroup {
    pub device_combination: String,
    pub pair_reasons: Vec<PairReasonEntry>,
    pub compatibility_failures: Vec<CompatFailure>,
    pub geometry_failures: Vec<GeometryFailure>,
}

/// Variant tallies for one `(inner_product, outer_product)` combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductComboResult {
    pub product_combination: String,
    pub total_variants: usize,
    pub passing_variants: usize,
    pub failing_variants: usize,
    pub status: OverallStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOutcome {
    pub inner_device: String,
    pub outer_device: String,
    pub status: OverallStatus,
    pub product_results: Vec<ProductComboResult>,
    pub passes: Vec<PassGroup>,
    pub failures: Vec<FailureGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathOutcome {
    pub device_path: Vec<String>,
    pub status: OverallStatus,
    pub connection_results: Vec<ConnectionOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainOutcome {
    pub status: OverallStatus,
    pub path_results: Vec<PathOutcome>,
}

/// Top-level rollup consumed by decision logic and text synthesis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainSummary {
    pub total_chains: usize,
    pub passing_chain_count: usize,
    pub failing_chain_count: usize,
    pub passed_chains: Vec<ChainOutcome>,
    pub failed_chains: Vec<ChainOutcome>,
}

/// Analyze all evaluated chains into the summary rollup.
pub fn analyze(chains: &[ChainEvaluation]) -> ChainSummary {
    let mut summary = ChainSummary {
        total_chains: chains.len(),
        ..Default::default()
    };

    for chain in chains {
        let outcome = analyze_chain(chain);
        if outcome.status.is_passing() {
            summary.passing_chain_count += 1;
            summary.passed_chains.push(outcome);
        } else {
            summary.failing_chain_count += 1;
            summary.failed_chains.push(outcome);
        }
    }
    summary
}

fn analyze_chain(chain: &ChainEvaluation) -> ChainOutcome {
    let path_results: Vec<PathOutcome> = chain.paths.iter().map(analyze_path).collect();
    // A chain passes iff at least one path passes.
    let passing = path_results.iter().any(|p| p.status.is_passing());
    ChainOutcome {
        status: if passing {
            OverallStatus::Pass
        } else {
            OverallStatus::Fail
        },
        path_results,
    }
}

fn analyze_path(path: &PathEvaluation) -> PathOutcome {
    let connection_results: Vec<ConnectionOutcome> =
        path.connections.iter().map(analyze_connection).collect();
    // A path passes iff every connection passes.
    let passing = !connection_results.is_empty()
        && connection_results.iter().all(|c| c.status.is_passing());
    PathOutcome {
        device_path: path.device_path.clone(),
        status: if passing {
            OverallStatus::Pass
        } else {
            OverallStatus::Fail
        },
        connection_results,
    }
}

fn analyze_connection(connection: &ConnectionEvaluation) -> ConnectionOutcome {
    // Group variant pairs by (inner_product, outer_product).
    let mut combos: BTreeMap<String, Vec<&PairResult>> = BTreeMap::new();
    for pair in &connection.pairs {
        let key = format!("{} -> {}", pair.inner.product_name, pair.outer.product_name);
        combos.entry(key).or_default().push(pair);
    }

    let mut product_results = Vec::new();
    let mut passes = Vec::new();
    let mut failures = Vec::new();

    for (combination, pairs) in &combos {
        let passing: Vec<&&PairResult> = pairs
            .iter()
            .filter(|p| p.overall_status.is_passing())
            .collect();
        let failing: Vec<&&PairResult> = pairs
            .iter()
            .filter(|p| !p.overall_status.is_passing())
            .collect();

        // A product combination passes iff any variant pair passes.
        let combo_status = if passing.is_empty() {
            OverallStatus::Fail
        } else {
            OverallStatus::Pass
        };

        product_results.push(ProductComboResult {
            product_combination: combination.clone(),
            total_variants: pairs.len(),
            passing_variants: passing.len(),
            failing_variants: failing.len(),
            status: combo_status,
        });

        if !passing.is_empty() {
            passes.push(PassGroup {
                device_combination: combination.clone(),
                pair_reasons: passing
                    .iter()
                    .map(|pair| pair_reason_entry(pair))
                    .collect(),
            });
        }
        if !failing.is_empty() {
            let mut compat_failures = Vec::new();
            let mut geometry_failures = Vec::new();
            for pair in &failing {
                compat_failures.extend(extract_compat_failures(pair));
                geometry_failures.extend(extract_geometry_failures(pair));
            }
            failures.push(FailureGroup {
                device_combination: combination.clone(),
                pair_reasons: failing
                    .iter()
                    .map(|pair| pair_reason_entry(pair))
                    .collect(),
                compatibility_failures: compat_failures,
                geometry_failures,
            });
        }
    }

    // The connection passes iff every product combination passes. An empty
    // connection (no resolvable pairs) fails.
    let passing = !product_results.is_empty()
        && product_results.iter().all(|c| c.status.is_passing());

    ConnectionOutcome {
        inner_device: connection.inner_product.clone(),
        outer_device: connection.outer_product.clone(),
        status: if passing {
            OverallStatus::Pass
        } else {
            OverallStatus::Fail
        },
        product_results,
        passes,
        failures,
    }
}

// ── Reason extraction ─────────────────────────────────────────────

/// Among rows that differ only in unit, keep the most preferred unit
/// (inches > mm > French).
fn collapse_compat_rows<'a>(rows: impl Iterator<Item = &'a CompatRow>) -> Vec<&'a CompatRow> {
    let mut best: BTreeMap<String, &CompatRow> = BTreeMap::new();
    for row in rows {
        let key = format!("{:?}|{:?}|{:?}", row.claimant_role, row.field, row.spec_field);
        match best.get(&key) {
            Some(existing) if existing.unit.preference() <= row.unit.preference() => {}
            _ => {
                best.insert(key, row);
            }
        }
    }
    best.into_values().collect()
}

fn collapse_geometry_rows<'a>(rows: impl Iterator<Item = &'a GeometryRow>) -> Vec<&'a GeometryRow> {
    let mut best: BTreeMap<String, &GeometryRow> = BTreeMap::new();
    for row in rows {
        let key = format!("{:?}", row.dimension);
        let preference = row.unit.map(|u| u.preference()).unwrap_or(0);
        match best.get(&key) {
            Some(existing)
                if existing.unit.map(|u| u.preference()).unwrap_or(0) <= preference => {}
            _ => {
                best.insert(key, row);
            }
        }
    }
    best.into_values().collect()
}

fn fmt_value(value: Option<f64>) -> String {
    value.map(|v| format!("{v}")).unwrap_or_else(|| "N/A".into())
}

fn geometry_reason_text(pair: &PairResult, row: &GeometryRow) -> String {
    let unit = row.unit.map(|u| u.label()).unwrap_or("cm");
    match row.dimension {
        GeoDimension::Length => format!(
            "Length: {} {}cm vs {} {}cm (difference: {}) [{}]",
            pair.inner.device_name,
            fmt_value(row.inner_value),
            pair.outer.device_name,
            fmt_value(row.outer_value),
            fmt_value(row.difference),
            row.status.as_str(),
        ),
        dimension => format!(
            "{}: {} OD {}{} vs {} ID {}{} (clearance: {}) [{}]",
            dimension.label(),
            pair.inner.device_name,
            fmt_value(row.inner_value),
            unit,
            pair.outer.device_name,
            fmt_value(row.outer_value),
            unit,
            fmt_value(row.difference),
            row.status.as_str(),
        ),
    }
}

fn pair_reason_entry(pair: &PairResult) -> PairReasonEntry {
    // Compatibility reasons: the rows that determined the verdict, unit-collapsed.
    let relevant_status = match pair.compatibility_status {
        CompatStatus::Pass => Some(CompatStatus::Pass),
        CompatStatus::Fail => Some(CompatStatus::Fail),
        CompatStatus::Na => None,
    };
    let compatibility_reasons = match relevant_status {
        Some(status) => {
            collapse_compat_rows(pair.compat_rows.iter().filter(|r| r.status == status))
                .into_iter()
                .map(|r| r.note.clone())
                .collect()
        }
        None => Vec::new(),
    };

    let diameter_rows = collapse_geometry_rows(
        pair.geometry_rows
            .iter()
            .filter(|r| r.dimension.is_diameter() && r.status != GeoGrade::Na),
    );
    let length_rows = collapse_geometry_rows(
        pair.geometry_rows
            .iter()
            .filter(|r| r.dimension == GeoDimension::Length && r.status != GeoGrade::Na),
    );

    let geometry_reasons = GeometryReasons {
        diameter: diameter_rows
            .iter()
            .map(|r| geometry_reason_text(pair, r))
            .collect(),
        length: length_rows
            .iter()
            .map(|r| geometry_reason_text(pair, r))
            .collect(),
    };

    let (pass_reason_type, override_note) = if pair.overall_status.is_passing() {
        if pair.logic_type == LogicType::GeometryFallback {
            (
                Some(PassReasonType::GeometryOverride),
                Some(
                    "Passed via geometry check (manufacturer compatibility not available)"
                        .to_string(),
                ),
            )
        } else {
            (Some(PassReasonType::Standard), None)
        }
    } else {
        (None, None)
    };

    PairReasonEntry {
        overall_status: pair.overall_status,
        logic_type: pair.logic_type,
        reasons: PairReasons {
            inner_device_name: pair.inner.device_name.clone(),
            outer_device_name: pair.outer.device_name.clone(),
            compatibility_reasons,
            geometry_reasons,
            summary: summarize_pair(pair),
            pass_reason_type,
            override_note,
        },
    }
}

/// One-sentence explanation following the verdict decision table.
fn summarize_pair(pair: &PairResult) -> String {
    let inner = &pair.inner.device_name;
    let outer = &pair.outer.device_name;

    match (pair.compatibility_status, pair.length_status) {
        (CompatStatus::Pass, GeoGrade::Fail) => format!(
            "{inner} is declared compatible with {outer}, but {inner} is too short to \
             extend past {outer} — the length failure overrides the declared compatibility."
        ),
        (CompatStatus::Pass, GeoGrade::Pass | GeoGrade::PassWithWarning) => {
            if pair.diameter_status == GeoGrade::Fail {
                format!(
                    "{inner} is declared compatible with {outer}, though the dimensional \
                     clearance check did not confirm the fit."
                )
            } else {
                format!(
                    "{inner} is compatible with {outer} per the manufacturer \
                     compatibility table, and the length check passes."
                )
            }
        }
        (CompatStatus::Pass, _) => format!(
            "{inner} is declared compatible with {outer}; length information was \
             insufficient to verify reach."
        ),
        (CompatStatus::Fail, _) => format!(
            "{inner} is not compatible with {outer} per the manufacturer \
             compatibility table."
        ),
        (CompatStatus::Na, GeoGrade::Fail) => format!(
            "No manufacturer compatibility entry applies, and {inner} is too short \
             to extend past {outer}."
        ),
        (CompatStatus::Na, _) => {
            if pair.overall_status.is_passing() {
                format!(
                    "No manufacturer compatibility entry applies; dimensional fit \
                     confirms {inner} passes through {outer}."
                )
            } else {
                format!(
                    "No manufacturer compatibility entry applies, and the dimensions \
                     do not confirm that {inner} fits within {outer}."
                )
            }
        }
    }
}

fn compat_failure_reason(row: &CompatRow, pair: &PairResult) -> String {
    let inner = &pair.inner.device_name;
    let outer = &pair.outer.device_name;
    let claim = row.claim_raw.as_deref().unwrap_or("N/A");
    let spec = fmt_value(row.spec_value);
    match row.field {
        super::evaluator::CompatField::WireMaxOd => {
            format!("Max wire OD: {claim}, but {inner} OD: {spec}")
        }
        super::evaluator::CompatField::CatheterMaxOd => {
            format!("Max catheter OD: {claim}, but {inner} OD: {spec}")
        }
        super::evaluator::CompatField::CatheterReqId => {
            format!("Required catheter ID: {claim}, but {outer} ID: {spec}")
        }
        super::evaluator::CompatField::GuideMinId => {
            format!("Min guide/catheter ID: {claim}, but {outer} ID: {spec}")
        }
    }
}

fn extract_compat_failures(pair: &PairResult) -> Vec<CompatFailure> {
    if pair.compatibility_status != CompatStatus::Fail {
        return Vec::new();
    }
    collapse_compat_rows(
        pair.compat_rows
            .iter()
            .filter(|r| r.status == CompatStatus::Fail),
    )
    .into_iter()
    .map(|row| CompatFailure {
        inner_device_name: pair.inner.device_name.clone(),
        outer_device_name: pair.outer.device_name.clone(),
        compatibility_field: format!("{}_{}", row.field.label(), row.unit.label()),
        compat_value: row.claim_raw.clone().unwrap_or_default(),
        spec_value: fmt_value(row.spec_value),
        reason: compat_failure_reason(row, pair),
    })
    .collect()
}

fn extract_geometry_failures(pair: &PairResult) -> Vec<GeometryFailure> {
    collapse_geometry_rows(
        pair.geometry_rows
            .iter()
            .filter(|r| r.status == GeoGrade::Fail),
    )
    .into_iter()
    .map(|row| GeometryFailure {
        inner_device_name: pair.inner.device_name.clone(),
        outer_device_name: pair.outer.device_name.clone(),
        dimension: row.dimension.label().to_string(),
        inner_value: fmt_value(row.inner_value),
        outer_value: fmt_value(row.outer_value),
        difference: fmt_value(row.difference),
        reason: geometry_reason_text(pair, row),
    })
    .collect()
}

/// Linear scan for a pair by product combination, used by text synthesis.
pub fn find_pair_by_key<'a>(
    chains: &'a [ChainEvaluation],
    inner_product: &str,
    outer_product: &str,
) -> Option<&'a PairResult> {
    for chain in chains {
        for path in &chain.paths {
            for connection in &path.connections {
                for pair in &connection.pairs {
                    if pair.inner.product_name == inner_product
                        && pair.outer.product_name == outer_product
                    {
                        return Some(pair);
                    }
                }
            }
        }
    }
    None
}
