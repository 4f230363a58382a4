//! Post-run validation that chain engine results are complete.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ChainData;
use crate::engines::Classification;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheck {
    pub passed: bool,
    pub issues: Vec<String>,
}

/// Validate the engine result: chains were evaluated, every input device is
/// addressed somewhere in the results, and the classification is usable.
pub fn check_quality(
    input_devices: &BTreeSet<String>,
    data: &ChainData,
    classification: &Classification,
) -> QualityCheck {
    let mut issues = Vec::new();

    if data.chain_summary.total_chains == 0 {
        issues.push("No chains were evaluated".to_string());
    }

    let mut result_devices = BTreeSet::new();
    for chain in data
        .chain_summary
        .passed_chains
        .iter()
        .chain(data.chain_summary.failed_chains.iter())
    {
        for path in &chain.path_results {
            for device in &path.device_path {
                result_devices.insert(device.clone());
            }
        }
    }

    let missing: Vec<&String> = input_devices.difference(&result_devices).collect();
    if !missing.is_empty() {
        issues.push(format!(
            "Devices not addressed in results: {}",
            missing
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    if classification.query_mode.is_empty() {
        issues.push("Missing query_mode in classification".to_string());
    }

    QualityCheck {
        passed: issues.is_empty(),
        issues,
    }
}
