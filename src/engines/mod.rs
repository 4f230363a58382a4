//! Engine contracts: the universal envelope shapes for engine I/O.
//!
//! Every engine consumes an `EngineInput` and returns an `EngineOutput`.
//! The orchestrator relies on this structure to decide what to do next, and
//! prior outputs can be fed forward for engine composition.

pub mod chain;
pub mod clinical;
pub mod database;
pub mod vector;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::DeviceRef;
use crate::models::TokenTotals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Complete,
    Error,
    NeedsClarification,
    NoResults,
}

/// Chain-engine query classification, shared across the contract because the
/// orchestrator and output agents both read it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub query_mode: String,
    #[serde(default)]
    pub framing: String,
    #[serde(default)]
    pub structure: String,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// A dimension/spec requirement extracted from the query ("a .014 wire").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenericSpec {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub spec: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub field: String,
}

/// An attribute filter narrowing a category ("Medtronic catheters").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub field: String,
    #[serde(default = "default_operator")]
    pub operator: String,
    pub value: serde_json::Value,
}

fn default_operator() -> String {
    "contains".to_string()
}

/// Category expansion package: a category label resolved to product names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryMapping {
    #[serde(default)]
    pub device_categories: Vec<String>,
    #[serde(default)]
    pub conical_categories: Vec<String>,
    #[serde(default)]
    pub products: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineMetadata {
    #[serde(default)]
    pub filter_category: Option<String>,
}

/// Canonical engine input envelope.
#[derive(Debug, Clone, Default)]
pub struct EngineInput {
    pub normalized_query: String,
    pub devices: BTreeMap<String, DeviceRef>,
    pub categories: Vec<String>,
    pub generic_specs: Vec<GenericSpec>,
    pub constraints: Vec<Constraint>,
    pub classification: Option<Classification>,
    pub prior_results: Vec<EngineOutput>,
    pub category_mappings: BTreeMap<String, CategoryMapping>,
    pub metadata: EngineMetadata,
}

/// Engine result payload, typed per engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineData {
    Chain(chain::ChainData),
    Database(database::DatabaseData),
    Vector(vector::VectorData),
    Clinical(clinical::ClinicalData),
    Error { message: String },
}

/// Standard return contract all engines must use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOutput {
    pub status: EngineStatus,
    pub engine: String,
    pub result_type: String,
    pub data: EngineData,
    #[serde(default)]
    pub classification: Option<Classification>,
    pub confidence: f64,
    #[serde(default)]
    pub usage: TokenTotals,
}

impl EngineOutput {
    pub fn error(engine: &str, result_type: &str, message: String) -> Self {
        Self {
            status: EngineStatus::Error,
            engine: engine.to_string(),
            result_type: result_type.to_string(),
            data: EngineData::Error { message },
            classification: None,
            confidence: 0.0,
            usage: TokenTotals::default(),
        }
    }
}

/// Find a prior engine result by engine name.
pub fn find_prior_result<'a>(
    prior_results: &'a [EngineOutput],
    engine: &str,
) -> Option<&'a EngineOutput> {
    prior_results.iter().find(|r| r.engine == engine)
}

/// Package a database engine's device list as a virtual category so the
/// chain expansion pipeline can treat it like any other category reference.
/// Product names come from the catalog, so id resolution is guaranteed.
pub fn device_list_to_category_package(device_list: &[crate::catalog::Device]) -> CategoryMapping {
    let mut products = Vec::new();
    let mut conical = std::collections::BTreeSet::new();
    let mut seen = std::collections::BTreeSet::new();

    for device in device_list {
        if !device.product_name.is_empty() && seen.insert(device.product_name.clone()) {
            products.push(device.product_name.clone());
        }
        if !device.conical_category.is_empty() {
            conical.insert(device.conical_category.clone());
        }
    }
    products.sort();

    CategoryMapping {
        device_categories: Vec::new(),
        conical_categories: conical.into_iter().collect(),
        products,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{test_support, FitLogic};

    #[test]
    fn test_device_list_to_category_package_dedupes_and_sorts() {
        let devices = vec![
            test_support::device("1", "Zoom 71", "L1", FitLogic::Math),
            test_support::device("2", "Aristotle 24", "L4", FitLogic::Math),
            test_support::device("3", "Zoom 71", "L1", FitLogic::Math),
        ];
        let package = device_list_to_category_package(&devices);
        assert_eq!(package.products, vec!["Aristotle 24", "Zoom 71"]);
        assert_eq!(package.conical_categories, vec!["L1", "L4"]);
    }

    #[test]
    fn test_find_prior_result() {
        let outputs = vec![
            EngineOutput::error("database_engine", "database_query", "x".into()),
            EngineOutput::error("chain_engine", "compatibility_check", "y".into()),
        ];
        assert!(find_prior_result(&outputs, "chain_engine").is_some());
        assert!(find_prior_result(&outputs, "vector_engine").is_none());
    }
}
