//! Post-analysis decision rules.
//!
//! Deterministic business rules that decide what happens after the rollup:
//! return as-is, run N-1 subset analysis on a failed multi-device stack, or
//! flag a gentle correction for a hopeful two-device question.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::analyzer::ChainSummary;
use super::builder::{ChainConfig, ExpandedChain, PathSpec};
use super::pairs::generate_chain_pairs;
use crate::catalog::{DeviceRef, RequestCatalog};
use crate::engines::Classification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    ReturnAsIs,
    RunN1Subsets,
    FlagGentleCorrection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    pub reason: String,
}

/// One chain variant produced by removing a single device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsetResult {
    pub excluded_device: String,
    pub subset_sequence: Vec<String>,
    pub subset_levels: Vec<String>,
    pub status: String,
}

/// Decide what additional processing the result needs.
pub fn decide_next_action(classification: &Classification, summary: &ChainSummary) -> Decision {
    let query_mode = if classification.query_mode.is_empty() {
        "specific"
    } else {
        &classification.query_mode
    };
    let framing = if classification.framing.is_empty() {
        "neutral"
    } else {
        &classification.framing
    };
    let structure = if classification.structure.is_empty() {
        "two_device"
    } else {
        &classification.structure
    };

    let passing = summary.passing_chain_count;
    let failing = summary.failing_chain_count;

    if failing == 0 && passing > 0 {
        return Decision {
            action: DecisionAction::ReturnAsIs,
            reason: "All chains pass".to_string(),
        };
    }

    if passing == 0 && failing > 0 {
        if structure == "multi_device"
            && matches!(query_mode, "exploratory" | "discovery" | "stack_validation")
        {
            return Decision {
                action: DecisionAction::RunN1Subsets,
                reason: "Full stack failed, analyzing subsets to find what works".to_string(),
            };
        }
        if structure == "two_device" && framing == "positive" {
            return Decision {
                action: DecisionAction::FlagGentleCorrection,
                reason: "User expected compatibility but devices are incompatible".to_string(),
            };
        }
        return Decision {
            action: DecisionAction::ReturnAsIs,
            reason: "Incompatible - returning failure details".to_string(),
        };
    }

    Decision {
        action: DecisionAction::ReturnAsIs,
        reason: format!("{passing} passing, {failing} failing chains"),
    }
}

/// Remove one device at a time from each chain and re-evaluate the subset.
/// Only chains of three or more devices are considered; a subset passes iff
/// every evaluated pair passes.
pub fn run_n1_subsets(
    chains: &[ChainConfig],
    devices: &BTreeMap<String, DeviceRef>,
    catalog: &RequestCatalog,
) -> Vec<SubsetResult> {
    let mut results = Vec::new();

    for chain in chains {
        if chain.sequence.len() < 3 {
            continue;
        }

        for remove_idx in 0..chain.sequence.len() {
            let mut subset_sequence = chain.sequence.clone();
            let excluded_device = subset_sequence.remove(remove_idx);
            let mut subset_levels = chain.levels.clone();
            if remove_idx < subset_levels.len() {
                subset_levels.remove(remove_idx);
            }

            if subset_sequence.len() < 2 {
                continue;
            }

            let subset = ExpandedChain {
                config: ChainConfig {
                    sequence: subset_sequence.clone(),
                    levels: subset_levels.clone(),
                    contains_category: false,
                },
                paths: vec![PathSpec {
                    sequence: subset_sequence.clone(),
                    levels: subset_levels.clone(),
                }],
            };
            let evaluated = generate_chain_pairs(&[subset], devices, catalog);

            let mut all_pass = true;
            for chain_eval in &evaluated {
                for path in &chain_eval.paths {
                    for connection in &path.connections {
                        if connection.pairs.is_empty() {
                            all_pass = false;
                        }
                        for pair in &connection.pairs {
                            if !pair.overall_status.is_passing() {
                                all_pass = false;
                            }
                        }
                    }
                }
            }

            results.push(SubsetResult {
                excluded_device,
                subset_sequence,
                subset_levels,
                status: if all_pass { "pass" } else { "fail" }.to_string(),
            });
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{test_support, Device, DeviceStore, FitLogic};
    use std::sync::Arc;

    fn classification(mode: &str, framing: &str, structure: &str) -> Classification {
        Classification {
            query_mode: mode.to_string(),
            framing: framing.to_string(),
            structure: structure.to_string(),
            ..Default::default()
        }
    }

    fn summary(passing: usize, failing: usize) -> ChainSummary {
        ChainSummary {
            total_chains: passing + failing,
            passing_chain_count: passing,
            failing_chain_count: failing,
            ..Default::default()
        }
    }

    #[test]
    fn test_all_pass_returns_as_is() {
        let decision = decide_next_action(
            &classification("stack_validation", "neutral", "multi_device"),
            &summary(2, 0),
        );
        assert_eq!(decision.action, DecisionAction::ReturnAsIs);
    }

    #[test]
    fn test_failed_multi_device_runs_subsets() {
        for mode in ["exploratory", "discovery", "stack_validation"] {
            let decision = decide_next_action(
                &classification(mode, "neutral", "multi_device"),
                &summary(0, 1),
            );
            assert_eq!(decision.action, DecisionAction::RunN1Subsets, "mode {mode}");
        }
    }

    #[test]
    fn test_failed_two_device_positive_flags_correction() {
        let decision = decide_next_action(
            &classification("specific", "positive", "two_device"),
            &summary(0, 1),
        );
        assert_eq!(decision.action, DecisionAction::FlagGentleCorrection);
    }

    #[test]
    fn test_failed_two_device_neutral_returns_as_is() {
        let decision = decide_next_action(
            &classification("specific", "neutral", "two_device"),
            &summary(0, 1),
        );
        assert_eq!(decision.action, DecisionAction::ReturnAsIs);
    }

    #[test]
    fn test_mixed_results_return_as_is() {
        let decision = decide_next_action(
            &classification("discovery", "neutral", "multi_device"),
            &summary(1, 2),
        );
        assert_eq!(decision.action, DecisionAction::ReturnAsIs);
        assert!(decision.reason.contains("1 passing"));
    }

    fn sized(mut device: Device, od_in: f64, id_in: f64, length_cm: f64) -> Device {
        device.specs.outer_diameter_distal.inches = Some(od_in);
        device.specs.outer_diameter_proximal.inches = Some(od_in);
        device.specs.inner_diameter.inches = Some(id_in);
        device.specs.length_cm = Some(length_cm);
        device
    }

    #[test]
    fn test_n1_subsets_find_working_pair() {
        // A -> B fails (A too large for B); B -> C passes. Removing A
        // leaves a passing B -> C subset.
        let store = DeviceStore::from_devices(vec![
            sized(test_support::device("a1", "A", "L3", FitLogic::Math), 0.070, 0.021, 160.0),
            sized(test_support::device("b1", "B", "L2", FitLogic::Math), 0.058, 0.046, 132.0),
            sized(test_support::device("c1", "C", "L0", FitLogic::Math), 0.110, 0.088, 90.0),
        ]);
        let mut devices = BTreeMap::new();
        for group in store.groups() {
            devices.insert(
                group.product_name.clone(),
                DeviceRef {
                    ids: group.ids.clone(),
                    conical_category: group.conical_category.clone(),
                },
            );
        }
        let catalog = RequestCatalog::new(Arc::new(store));

        let chains = vec![ChainConfig {
            sequence: vec!["A".into(), "B".into(), "C".into()],
            levels: vec!["L3".into(), "L2".into(), "L0".into()],
            contains_category: false,
        }];
        let results = run_n1_subsets(&chains, &devices, &catalog);

        assert_eq!(results.len(), 3);
        let without_a = results.iter().find(|r| r.excluded_device == "A").unwrap();
        assert_eq!(without_a.status, "pass");
        assert_eq!(without_a.subset_sequence, vec!["B", "C"]);

        let without_c = results.iter().find(|r| r.excluded_device == "C").unwrap();
        assert_eq!(without_c.status, "fail");
    }

    #[test]
    fn test_two_device_chains_skip_subsets() {
        let store = DeviceStore::from_devices(vec![]);
        let catalog = RequestCatalog::new(Arc::new(store));
        let chains = vec![ChainConfig {
            sequence: vec!["A".into(), "B".into()],
            levels: vec!["L3".into(), "L2".into()],
            contains_category: false,
        }];
        assert!(run_n1_subsets(&chains, &BTreeMap::new(), &catalog).is_empty());
    }
}
