//! Deterministic rich-text rendering of chain analysis results.
//!
//! Produces the dimensionally-detailed summary that is fed as context to the
//! streaming output agent. The output LLM only formats and narrates; every
//! number and verdict in the narrative originates here.

use std::collections::HashMap;

use super::analyzer::{ChainSummary, ConnectionOutcome, PassReasonType};
use super::decision::SubsetResult;
use super::pairs::ChainEvaluation;
use crate::catalog::Device;
use crate::models::OverallStatus;

#[derive(Debug, Clone, Default)]
struct SpecsEntry {
    product_name: String,
    manufacturer: String,
    od_distal_in: Option<f64>,
    id_in: Option<f64>,
    length_cm: Option<f64>,
}

/// Builds rich text summaries from already-computed analysis data.
pub struct ChainTextBuilder<'a> {
    summary: &'a ChainSummary,
    subset_analysis: Option<&'a [SubsetResult]>,
    specs_cache: HashMap<String, SpecsEntry>,
}

impl<'a> ChainTextBuilder<'a> {
    pub fn new(
        summary: &'a ChainSummary,
        evaluations: &'a [ChainEvaluation],
        subset_analysis: Option<&'a [SubsetResult]>,
    ) -> Self {
        Self {
            summary,
            subset_analysis,
            specs_cache: build_specs_cache(evaluations),
        }
    }

    /// Dispatch to the result-type-specific formatter.
    pub fn build(&self, result_type: &str) -> String {
        match result_type {
            "device_discovery" => self.build_device_discovery(),
            "stack_validation" => self.build_stack_validation(),
            _ => self.build_compatibility_check(),
        }
    }

    fn specs(&self, name: &str) -> Option<&SpecsEntry> {
        self.specs_cache.get(name)
    }

    fn fmt_in(value: Option<f64>) -> String {
        match value {
            Some(v) => format!("{v:.3}\""),
            None => "N/A".to_string(),
        }
    }

    fn fmt_cm(value: Option<f64>) -> String {
        match value {
            Some(v) => format!("{v:.0}cm"),
            None => "N/A".to_string(),
        }
    }

    /// `Vecta 46 (TestMed | OD: 0.058" | ID: 0.046" | 132cm)`
    fn format_device_inline(&self, name: &str) -> String {
        let Some(specs) = self.specs(name) else {
            return name.to_string();
        };
        let mut parts = Vec::new();
        if !specs.manufacturer.is_empty() {
            parts.push(specs.manufacturer.clone());
        }
        if specs.od_distal_in.is_some() {
            parts.push(format!("OD: {}", Self::fmt_in(specs.od_distal_in)));
        }
        if specs.id_in.is_some() {
            parts.push(format!("ID: {}", Self::fmt_in(specs.id_in)));
        }
        if specs.length_cm.is_some() {
            parts.push(Self::fmt_cm(specs.length_cm));
        }
        if parts.is_empty() {
            name.to_string()
        } else {
            format!("{name} ({})", parts.join(" | "))
        }
    }

    /// Per-connection evidence lines: one representative pass per group,
    /// one representative failure reason per group.
    fn connection_spec_lines(&self, connection: &ConnectionOutcome) -> Vec<String> {
        let mut lines = Vec::new();

        for pass_group in &connection.passes {
            let Some(entry) = pass_group.pair_reasons.first() else {
                continue;
            };
            let inner_name = &entry.reasons.inner_device_name;
            let outer_name = &entry.reasons.outer_device_name;

            let inner_specs = self.specs(inner_name);
            let outer_specs = self.specs(outer_name);
            let (Some(inner_specs), Some(outer_specs)) = (inner_specs, outer_specs) else {
                lines.push(format!("  {inner_name} -> {outer_name}: Compatible"));
                continue;
            };

            let mut line = format!("  {inner_name} -> {outer_name}: Compatible");
            if inner_specs.od_distal_in.is_some() && outer_specs.id_in.is_some() {
                line.push_str(&format!(
                    " (OD {} -> ID {})",
                    Self::fmt_in(inner_specs.od_distal_in),
                    Self::fmt_in(outer_specs.id_in)
                ));
            }
            lines.push(line);
            if inner_specs.length_cm.is_some() && outer_specs.length_cm.is_some() {
                lines.push(format!(
                    "    Length: {inner_name} {}, {outer_name} {}",
                    Self::fmt_cm(inner_specs.length_cm),
                    Self::fmt_cm(outer_specs.length_cm)
                ));
            }
            if entry.reasons.pass_reason_type == Some(PassReasonType::GeometryOverride) {
                lines.push(
                    "    Note: Passed via geometry check (manufacturer compatibility not available)"
                        .to_string(),
                );
            }
        }

        for fail_group in &connection.failures {
            if let Some(cf) = fail_group.compatibility_failures.first() {
                lines.push(format!(
                    "  {} -> {}: Not Compatible",
                    cf.inner_device_name, cf.outer_device_name
                ));
                lines.push(format!("    {}", cf.reason));
            } else if let Some(gf) = fail_group.geometry_failures.first() {
                lines.push(format!(
                    "  {} -> {}: Not Compatible",
                    gf.inner_device_name, gf.outer_device_name
                ));
                lines.push(format!(
                    "    Geometry fail: outer {} vs inner {} (diff: {})",
                    gf.outer_value, gf.inner_value, gf.difference
                ));
            }
        }

        lines
    }

    // ── compatibility_check ───────────────────────────────────────

    fn build_compatibility_check(&self) -> String {
        let mut sections = Vec::new();
        sections.push(format!(
            "Chains tested: {} | Passing: {} | Failing: {}\n",
            self.summary.total_chains,
            self.summary.passing_chain_count,
            self.summary.failing_chain_count
        ));

        for chain in self
            .summary
            .passed_chains
            .iter()
            .chain(self.summary.failed_chains.iter())
        {
            for path in &chain.path_results {
                let path_str = if path.device_path.is_empty() {
                    "Unknown path".to_string()
                } else {
                    path.device_path.join(" -> ")
                };
                let label = if path.status.is_passing() {
                    "COMPATIBLE"
                } else {
                    "NOT COMPATIBLE"
                };
                let mut lines = vec![format!("{label}: {path_str}")];

                for connection in &path.connection_results {
                    for combo in &connection.product_results {
                        if combo.total_variants > 1 {
                            lines.push(format!(
                                "\n  {}: {} of {} variants compatible",
                                combo.product_combination,
                                combo.passing_variants,
                                combo.total_variants
                            ));
                            if combo.failing_variants > 0 {
                                lines.push(format!(
                                    "    ({} variant(s) not compatible)",
                                    combo.failing_variants
                                ));
                            }
                        }
                    }

                    lines.extend(self.connection_spec_lines(connection));

                    // Detailed reason rows for failing variants.
                    for fail_group in &connection.failures {
                        for entry in &fail_group.pair_reasons {
                            for reason in &entry.reasons.compatibility_reasons {
                                lines.push(format!("    - {reason}"));
                            }
                            for reason in &entry.reasons.geometry_reasons.diameter {
                                lines.push(format!("    - {reason}"));
                            }
                            for reason in &entry.reasons.geometry_reasons.length {
                                lines.push(format!("    - {reason}"));
                            }
                        }
                    }
                }

                sections.push(lines.join("\n"));
            }
        }

        if self.subset_analysis.is_some() {
            sections.push(self.format_subset_analysis());
        }
        sections.join("\n\n")
    }

    // ── device_discovery ──────────────────────────────────────────

    fn build_device_discovery(&self) -> String {
        if self.summary.passed_chains.is_empty() {
            return "No compatible devices found.".to_string();
        }

        let mut source_devices = std::collections::BTreeSet::new();
        let mut compatible: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

        for chain in &self.summary.passed_chains {
            for path in &chain.path_results {
                if let Some(first) = path.device_path.first() {
                    source_devices.insert(first.clone());
                }
                for connection in &path.connection_results {
                    if !connection.status.is_passing() {
                        continue;
                    }
                    for pass_group in &connection.passes {
                        for entry in &pass_group.pair_reasons {
                            let outer = &entry.reasons.outer_device_name;
                            if !outer.is_empty() && !source_devices.contains(outer) {
                                compatible.insert(outer.clone());
                            }
                        }
                    }
                }
            }
        }

        let mut sections = vec!["SOURCE DEVICE(S):\n".to_string()];
        for source in &source_devices {
            sections.push(format!("  {}", self.format_device_inline(source)));
        }

        if !compatible.is_empty() {
            sections.push(format!("\nCOMPATIBLE DEVICES ({} found):\n", compatible.len()));
            for name in &compatible {
                sections.push(format!("  {}", self.format_device_inline(name)));
            }
        }

        if !self.summary.failed_chains.is_empty() {
            sections.push("\nINCOMPATIBLE CONFIGURATIONS:".to_string());
            for chain in &self.summary.failed_chains {
                for path in &chain.path_results {
                    sections.push(format!("\n  NOT COMPATIBLE: {}", path.device_path.join(" -> ")));
                    for connection in &path.connection_results {
                        for fail_group in &connection.failures {
                            if let Some(cf) = fail_group.compatibility_failures.first() {
                                sections.push(format!("    {}", cf.reason));
                            } else if let Some(gf) = fail_group.geometry_failures.first() {
                                sections.push(format!("    {}", gf.reason));
                            }
                        }
                    }
                }
            }
        }

        sections.join("\n")
    }

    // ── stack_validation ──────────────────────────────────────────

    fn build_stack_validation(&self) -> String {
        if self.summary.passed_chains.is_empty() && self.summary.failed_chains.is_empty() {
            return "No chain configurations were tested.".to_string();
        }

        let mut sections = Vec::new();
        sections.push(format!(
            "Configurations tested: {} | Valid: {}\n",
            self.summary.total_chains, self.summary.passing_chain_count
        ));

        for chain in &self.summary.passed_chains {
            for path in &chain.path_results {
                if path.device_path.is_empty() {
                    continue;
                }
                let mut lines = vec![format!(
                    "VALID CONFIGURATION: {}\n",
                    path.device_path.join(" -> ")
                )];

                lines.push("Stack order (distal -> proximal):".to_string());
                let last = path.device_path.len() - 1;
                for (i, device) in path.device_path.iter().enumerate() {
                    let position = if i == 0 {
                        "DISTAL"
                    } else if i == last {
                        "PROXIMAL"
                    } else {
                        "MIDDLE"
                    };
                    lines.push(format!(
                        "  {}. [{position}] {}",
                        i + 1,
                        self.format_device_inline(device)
                    ));
                }

                lines.push("\nConnection details:".to_string());
                for connection in &path.connection_results {
                    let status = if connection.status.is_passing() {
                        "Compatible"
                    } else {
                        "Not Compatible"
                    };
                    let inner_od = self
                        .specs(&connection.inner_device)
                        .map(|s| Self::fmt_in(s.od_distal_in))
                        .unwrap_or_else(|| "N/A".into());
                    let outer_id = self
                        .specs(&connection.outer_device)
                        .map(|s| Self::fmt_in(s.id_in))
                        .unwrap_or_else(|| "N/A".into());
                    lines.push(format!(
                        "  {} (OD {inner_od}) -> {} (ID {outer_id}): {status}",
                        connection.inner_device, connection.outer_device
                    ));

                    for combo in &connection.product_results {
                        if combo.total_variants > 1 {
                            lines.push(format!(
                                "    {} of {} variants compatible",
                                combo.passing_variants, combo.total_variants
                            ));
                        }
                    }
                    for fail_group in &connection.failures {
                        for cf in fail_group.compatibility_failures.iter().take(3) {
                            lines.push(format!("    Fail: {}", cf.reason));
                        }
                    }
                }

                sections.push(lines.join("\n"));
            }
        }

        for chain in &self.summary.failed_chains {
            for path in &chain.path_results {
                let mut lines = vec![format!(
                    "INVALID CONFIGURATION: {}",
                    path.device_path.join(" -> ")
                )];
                for connection in &path.connection_results {
                    if connection.status == OverallStatus::Pass {
                        continue;
                    }
                    lines.push(format!(
                        "  Failing connection: {} -> {}",
                        connection.inner_device, connection.outer_device
                    ));
                    for fail_group in &connection.failures {
                        for cf in fail_group.compatibility_failures.iter().take(2) {
                            lines.push(format!("    {}", cf.reason));
                        }
                        for gf in fail_group.geometry_failures.iter().take(2) {
                            lines.push(format!(
                                "    Geometry: outer {} vs inner {} (diff: {})",
                                gf.outer_value, gf.inner_value, gf.difference
                            ));
                        }
                    }
                }
                sections.push(lines.join("\n"));
            }
        }

        if self.subset_analysis.is_some() {
            sections.push(self.format_subset_analysis());
        }
        sections.join("\n\n")
    }

    // ── N-1 subsets ───────────────────────────────────────────────

    fn format_subset_analysis(&self) -> String {
        let Some(subsets) = self.subset_analysis else {
            return String::new();
        };

        let mut lines = vec!["N-1 SUBSET CONFIGURATIONS:".to_string()];
        for subset in subsets {
            let label = if subset.status == "pass" { "Valid" } else { "Invalid" };
            lines.push(format!("\n  Excluding {}: {label}", subset.excluded_device));
            if subset.status == "pass" && !subset.subset_sequence.is_empty() {
                lines.push(format!("    Order: {}", subset.subset_sequence.join(" -> ")));
            }
        }
        lines.join("\n")
    }
}

/// Index every device seen in the evaluations by id, device name, and
/// product name.
fn build_specs_cache(evaluations: &[ChainEvaluation]) -> HashMap<String, SpecsEntry> {
    let mut cache = HashMap::new();

    let mut insert = |device: &Device| {
        let entry = SpecsEntry {
            product_name: device.product_name.clone(),
            manufacturer: device.manufacturer.clone(),
            od_distal_in: device.specs.outer_diameter_distal.inches,
            id_in: device.specs.inner_diameter.inches,
            length_cm: device.specs.length_cm,
        };
        for key in [
            device.id.clone(),
            device.device_name.clone(),
            device.product_name.clone(),
        ] {
            if !key.is_empty() {
                cache.entry(key).or_insert_with(|| entry.clone());
            }
        }
    };

    for chain in evaluations {
        for path in &chain.paths {
            for connection in &path.connections {
                for pair in &connection.pairs {
                    insert(&pair.inner);
                    insert(&pair.outer);
                }
            }
        }
    }
    cache
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{test_support, Device, DeviceRef, DeviceStore, FitLogic, RequestCatalog};
    use crate::engines::chain::analyzer::analyze;
    use crate::engines::chain::builder::{ChainConfig, ExpandedChain, PathSpec};
    use crate::engines::chain::pairs::generate_chain_pairs;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn sized(mut device: Device, od_in: f64, id_in: f64, length_cm: f64) -> Device {
        device.specs.outer_diameter_distal.inches = Some(od_in);
        device.specs.outer_diameter_proximal.inches = Some(od_in);
        device.specs.inner_diameter.inches = Some(id_in);
        device.specs.length_cm = Some(length_cm);
        device
    }

    fn evaluate(devices: Vec<Device>, sequence: &[&str], levels: &[&str]) -> Vec<ChainEvaluation> {
        let store = DeviceStore::from_devices(devices);
        let mut lookup = BTreeMap::new();
        for group in store.groups() {
            lookup.insert(
                group.product_name.clone(),
                DeviceRef {
                    ids: group.ids.clone(),
                    conical_category: group.conical_category.clone(),
                },
            );
        }
        let config = ChainConfig {
            sequence: sequence.iter().map(|s| s.to_string()).collect(),
            levels: levels.iter().map(|s| s.to_string()).collect(),
            contains_category: false,
        };
        let expanded = vec![ExpandedChain {
            paths: vec![PathSpec {
                sequence: config.sequence.clone(),
                levels: config.levels.clone(),
            }],
            config,
        }];
        generate_chain_pairs(&expanded, &lookup, &RequestCatalog::new(Arc::new(store)))
    }

    #[test]
    fn test_compatibility_check_text_has_verdict_and_dimensions() {
        let evaluations = evaluate(
            vec![
                sized(test_support::device("v1", "Vecta 46", "L2", FitLogic::Math), 0.058, 0.046, 132.0),
                sized(test_support::device("n1", "Neuron MAX", "L0", FitLogic::Math), 0.110, 0.088, 80.0),
            ],
            &["Vecta 46", "Neuron MAX"],
            &["L2", "L0"],
        );
        let summary = analyze(&evaluations);
        let builder = ChainTextBuilder::new(&summary, &evaluations, None);
        let text = builder.build("compatibility_check");

        assert!(text.contains("Chains tested: 1 | Passing: 1 | Failing: 0"));
        assert!(text.contains("COMPATIBLE: Vecta 46 -> Neuron MAX"));
        assert!(text.contains("0.058"));
        assert!(text.contains("0.088"));
    }

    #[test]
    fn test_stack_validation_text_orders_stack() {
        let evaluations = evaluate(
            vec![
                sized(test_support::device("a1", "A", "L3", FitLogic::Math), 0.026, 0.021, 160.0),
                sized(test_support::device("b1", "B", "L2", FitLogic::Math), 0.058, 0.046, 132.0),
                sized(test_support::device("c1", "C", "L0", FitLogic::Math), 0.110, 0.088, 90.0),
            ],
            &["A", "B", "C"],
            &["L3", "L2", "L0"],
        );
        let summary = analyze(&evaluations);
        let builder = ChainTextBuilder::new(&summary, &evaluations, None);
        let text = builder.build("stack_validation");

        assert!(text.contains("VALID CONFIGURATION: A -> B -> C"));
        assert!(text.contains("[DISTAL] A"));
        assert!(text.contains("[MIDDLE] B"));
        assert!(text.contains("[PROXIMAL] C"));
        assert!(text.contains("Connection details:"));
    }

    #[test]
    fn test_subset_section_lists_exclusions() {
        let evaluations = evaluate(
            vec![
                sized(test_support::device("a1", "A", "L3", FitLogic::Math), 0.070, 0.021, 160.0),
                sized(test_support::device("b1", "B", "L2", FitLogic::Math), 0.058, 0.046, 132.0),
            ],
            &["A", "B"],
            &["L3", "L2"],
        );
        let summary = analyze(&evaluations);
        let subsets = vec![crate::engines::chain::decision::SubsetResult {
            excluded_device: "A".to_string(),
            subset_sequence: vec!["B".to_string(), "C".to_string()],
            subset_levels: vec!["L2".to_string(), "L0".to_string()],
            status: "pass".to_string(),
        }];
        let builder = ChainTextBuilder::new(&summary, &evaluations, Some(&subsets));
        let text = builder.build("stack_validation");

        assert!(text.contains("N-1 SUBSET CONFIGURATIONS:"));
        assert!(text.contains("Excluding A: Valid"));
        assert!(text.contains("Order: B -> C"));
    }

    #[test]
    fn test_discovery_lists_compatible_devices() {
        let evaluations = evaluate(
            vec![
                sized(test_support::device("s1", "Solitaire", "L4", FitLogic::Math), 0.022, 0.0, 180.0),
                sized(test_support::device("h1", "Headway 21", "L3", FitLogic::Math), 0.030, 0.027, 156.0),
            ],
            &["Solitaire", "Headway 21"],
            &["L4", "L3"],
        );
        let summary = analyze(&evaluations);
        let builder = ChainTextBuilder::new(&summary, &evaluations, None);
        let text = builder.build("device_discovery");

        assert!(text.contains("SOURCE DEVICE(S):"));
        assert!(text.contains("Solitaire"));
        assert!(text.contains("COMPATIBLE DEVICES"));
        assert!(text.contains("Headway 21"));
    }
}
