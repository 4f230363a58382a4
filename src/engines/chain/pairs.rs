//! Pair generation: turn expanded chains into evaluated variant pairs.
//!
//! For each adjacent position in each concrete path, every combination of
//! (inner variant, outer variant) is evaluated. The sweep is pure math and
//! runs on the rayon pool.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::builder::{ChainConfig, ExpandedChain, PathSpec};
use super::evaluator::{evaluate_pair, ConnectionType, PairResult};
use crate::catalog::{DeviceRef, RequestCatalog};

/// All pair evaluations for one connection (adjacent path positions).
#[derive(Debug, Clone)]
pub struct ConnectionEvaluation {
    pub inner_product: String,
    pub outer_product: String,
    pub connection_type: ConnectionType,
    pub pairs: Vec<PairResult>,
}

/// All connections for one concrete path.
#[derive(Debug, Clone)]
pub struct PathEvaluation {
    pub device_path: Vec<String>,
    pub levels: Vec<String>,
    pub connections: Vec<ConnectionEvaluation>,
}

/// Everything evaluated for one abstract chain.
#[derive(Debug, Clone)]
pub struct ChainEvaluation {
    pub config: ChainConfig,
    pub paths: Vec<PathEvaluation>,
}

/// Spec fragment describing an unevaluated variant combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PairSpec {
    inner_id: String,
    outer_id: String,
}

fn connection_type(levels: &[String], index: usize) -> ConnectionType {
    match (levels.get(index), levels.get(index + 1)) {
        (Some(a), Some(b)) if a == b => ConnectionType::IntraLevel,
        _ => ConnectionType::InterLevel,
    }
}

fn evaluate_path(
    path: &PathSpec,
    devices: &BTreeMap<String, DeviceRef>,
    catalog: &RequestCatalog,
) -> PathEvaluation {
    let mut connections = Vec::new();

    for i in 0..path.sequence.len().saturating_sub(1) {
        let inner_product = &path.sequence[i];
        let outer_product = &path.sequence[i + 1];
        let conn_type = connection_type(&path.levels, i);

        let inner_ids = devices
            .get(inner_product)
            .map(|d| d.ids.clone())
            .unwrap_or_default();
        let outer_ids = devices
            .get(outer_product)
            .map(|d| d.ids.clone())
            .unwrap_or_default();

        let mut specs = Vec::with_capacity(inner_ids.len() * outer_ids.len());
        for inner_id in &inner_ids {
            for outer_id in &outer_ids {
                specs.push(PairSpec {
                    inner_id: inner_id.clone(),
                    outer_id: outer_id.clone(),
                });
            }
        }

        let pairs: Vec<PairResult> = specs
            .par_iter()
            .filter_map(|spec| {
                let inner = catalog.get(&spec.inner_id)?;
                let outer = catalog.get(&spec.outer_id)?;
                Some(evaluate_pair(inner, outer, conn_type))
            })
            .collect();

        connections.push(ConnectionEvaluation {
            inner_product: inner_product.clone(),
            outer_product: outer_product.clone(),
            connection_type: conn_type,
            pairs,
        });
    }

    PathEvaluation {
        device_path: path.sequence.clone(),
        levels: path.levels.clone(),
        connections,
    }
}

/// Evaluate every variant pair across all chains and paths.
pub fn generate_chain_pairs(
    expanded: &[ExpandedChain],
    devices: &BTreeMap<String, DeviceRef>,
    catalog: &RequestCatalog,
) -> Vec<ChainEvaluation> {
    expanded
        .iter()
        .map(|chain| ChainEvaluation {
            config: chain.config.clone(),
            paths: chain
                .paths
                .iter()
                .map(|path| evaluate_path(path, devices, catalog))
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{test_support, Device, DeviceStore, FitLogic};
    use std::sync::Arc;

    fn sized(mut device: Device, od_in: f64, id_in: f64, length_cm: f64) -> Device {
        device.specs.outer_diameter_distal.inches = Some(od_in);
        device.specs.outer_diameter_proximal.inches = Some(od_in);
        device.specs.inner_diameter.inches = Some(id_in);
        device.specs.length_cm = Some(length_cm);
        device
    }

    fn setup() -> (RequestCatalog, BTreeMap<String, DeviceRef>) {
        let store = DeviceStore::from_devices(vec![
            sized(
                test_support::device("a1", "Micro A", "L3", FitLogic::Math),
                0.026,
                0.021,
                150.0,
            ),
            sized(
                test_support::device("a2", "Micro A", "L3", FitLogic::Math),
                0.028,
                0.021,
                150.0,
            ),
            sized(
                test_support::device("b1", "Guide B", "L1", FitLogic::Math),
                0.090,
                0.071,
                90.0,
            ),
        ]);
        let mut devices = BTreeMap::new();
        for product in ["Micro A", "Guide B"] {
            let group = store.group(product).unwrap();
            devices.insert(
                product.to_string(),
                DeviceRef {
                    ids: group.ids.clone(),
                    conical_category: group.conical_category.clone(),
                },
            );
        }
        (RequestCatalog::new(Arc::new(store)), devices)
    }

    fn expanded(sequence: &[&str], levels: &[&str]) -> Vec<ExpandedChain> {
        let config = ChainConfig {
            sequence: sequence.iter().map(|s| s.to_string()).collect(),
            levels: levels.iter().map(|s| s.to_string()).collect(),
            contains_category: false,
        };
        vec![ExpandedChain {
            paths: vec![PathSpec {
                sequence: config.sequence.clone(),
                levels: config.levels.clone(),
            }],
            config,
        }]
    }

    #[test]
    fn test_all_variant_combinations_evaluated() {
        let (catalog, devices) = setup();
        let chains = expanded(&["Micro A", "Guide B"], &["L3", "L1"]);
        let results = generate_chain_pairs(&chains, &devices, &catalog);

        assert_eq!(results.len(), 1);
        let connection = &results[0].paths[0].connections[0];
        // 2 Micro A variants x 1 Guide B variant.
        assert_eq!(connection.pairs.len(), 2);
        assert_eq!(connection.inner_product, "Micro A");
        assert_eq!(connection.outer_product, "Guide B");
    }

    #[test]
    fn test_connection_type_labels() {
        let (catalog, devices) = setup();
        let chains = expanded(&["Micro A", "Guide B"], &["L3", "L3"]);
        let results = generate_chain_pairs(&chains, &devices, &catalog);
        assert_eq!(
            results[0].paths[0].connections[0].connection_type,
            ConnectionType::IntraLevel
        );

        let chains = expanded(&["Micro A", "Guide B"], &["L3", "L1"]);
        let results = generate_chain_pairs(&chains, &devices, &catalog);
        assert_eq!(
            results[0].paths[0].connections[0].connection_type,
            ConnectionType::InterLevel
        );
    }

    #[test]
    fn test_unknown_product_yields_empty_pairs() {
        let (catalog, devices) = setup();
        let chains = expanded(&["Micro A", "Ghost Product"], &["L3", "L1"]);
        let results = generate_chain_pairs(&chains, &devices, &catalog);
        assert!(results[0].paths[0].connections[0].pairs.is_empty());
    }
}
