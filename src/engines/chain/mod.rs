//! Chain engine: the sub-orchestrator for device compatibility questions.
//!
//! Pipeline: resolve prior results -> (classifier ∥ builder, the only LLM
//! steps) -> category expansion -> pair generation -> evaluation -> rollup
//! analysis -> decision (with N-1 subset retry) -> deterministic text
//! synthesis -> flatten -> quality check.

pub mod analyzer;
pub mod builder;
pub mod classifier;
pub mod decision;
pub mod evaluator;
pub mod pairs;
pub mod quality;
pub mod text_builder;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::RequestCatalog;
use crate::config::Config;
use crate::engines::{
    device_list_to_category_package, find_prior_result, Classification, EngineData, EngineInput,
    EngineOutput, EngineStatus,
};
use crate::llm::LlmProvider;
use crate::models::{LogicType, OverallStatus, TokenTotals};

use analyzer::ChainSummary;
use builder::{ChainBuilder, ChainConfig};
use classifier::QueryClassifier;
use decision::{Decision, DecisionAction, SubsetResult};
use evaluator::ConnectionType;
use quality::QualityCheck;
use text_builder::ChainTextBuilder;

pub const ENGINE_NAME: &str = "chain_engine";

/// One flattened pair record for client-side device chunk streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatPairRecord {
    pub device_path: Vec<String>,
    pub inner_id: String,
    pub inner_product: String,
    pub inner_device: String,
    pub outer_id: String,
    pub outer_product: String,
    pub outer_device: String,
    pub connection_type: ConnectionType,
    pub overall_status: OverallStatus,
    pub logic_type: LogicType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainData {
    pub chain_summary: ChainSummary,
    pub flat_data: Vec<FlatPairRecord>,
    pub text_summary: String,
    pub chains_tested: Vec<ChainConfig>,
    pub decision: Decision,
    pub subset_analysis: Option<Vec<SubsetResult>>,
    #[serde(default)]
    pub quality_check: Option<QualityCheck>,
}

pub struct ChainEngine {
    provider: Arc<dyn LlmProvider>,
    config: Arc<Config>,
}

impl ChainEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, config: Arc<Config>) -> Self {
        Self { provider, config }
    }

    /// Auto-transform a prior database result into category-expansion format.
    /// Product names come from the catalog, so id resolution is guaranteed.
    fn resolve_input(input: &mut EngineInput) {
        let Some(db_result) = find_prior_result(&input.prior_results, super::database::ENGINE_NAME)
        else {
            return;
        };
        let EngineData::Database(data) = &db_result.data else {
            return;
        };
        if data.device_list.is_empty() {
            return;
        }

        let label = input
            .metadata
            .filter_category
            .clone()
            .unwrap_or_else(|| "db_filtered".to_string());
        let package = device_list_to_category_package(&data.device_list);

        info!(
            devices = data.device_list.len(),
            products = package.products.len(),
            category = %label,
            "Resolved prior database result into virtual category"
        );

        input.category_mappings.insert(label.clone(), package);
        if !input.categories.contains(&label) {
            input.categories.push(label);
        }
    }

    pub async fn run(&self, mut input: EngineInput, catalog: &RequestCatalog) -> EngineOutput {
        let mut usage = TokenTotals::default();

        // Step 1: prepare inputs (pure).
        Self::resolve_input(&mut input);

        let unmapped: Vec<String> = input
            .categories
            .iter()
            .filter(|c| !input.category_mappings.contains_key(*c))
            .cloned()
            .collect();
        if !unmapped.is_empty() {
            let standard = builder::map_device_categories(&unmapped, catalog.base());
            for (label, mapping) in standard {
                // Pre-built mappings take precedence.
                input.category_mappings.entry(label).or_insert(mapping);
            }
        }

        // Step 2: classifier + builder (parallel LLM).
        info!("Chain engine: query_classifier + chain_builder (parallel)");
        let classifier_model = self.config.resolve_model(QueryClassifier::NAME);
        let builder_model = self.config.resolve_model(ChainBuilder::NAME);

        let (classifier_result, builder_result) = tokio::join!(
            QueryClassifier::run(
                self.provider.as_ref(),
                &classifier_model,
                &input.normalized_query,
                &input.devices,
                &input.categories,
            ),
            ChainBuilder::run(
                self.provider.as_ref(),
                &builder_model,
                &input.normalized_query,
                &input.devices,
                &input.categories,
                &input.category_mappings,
            ),
        );

        let classification = match classifier_result {
            Ok((classification, call_usage)) => {
                usage.add(call_usage);
                classification
            }
            Err(e) => {
                warn!(error = %e, "Query classifier failed");
                return EngineOutput::error(
                    ENGINE_NAME,
                    "compatibility_check",
                    format!("Query classification failed: {e}"),
                );
            }
        };

        let chain_set = match builder_result {
            Ok((chain_set, call_usage)) => {
                usage.add(call_usage);
                chain_set
            }
            Err(e) => {
                warn!(error = %e, "Chain builder failed");
                return EngineOutput::error(
                    ENGINE_NAME,
                    "compatibility_check",
                    format!("Chain construction failed: {e}"),
                );
            }
        };

        if chain_set.chains_to_check.is_empty() {
            let mut output = EngineOutput::error(
                ENGINE_NAME,
                "compatibility_check",
                "No valid chains could be generated".to_string(),
            );
            output.classification = Some(classification);
            output.usage = usage;
            return output;
        }

        // Step 3: category expansion (pure).
        let expanded = builder::expand_chains(&chain_set.chains_to_check, &input.category_mappings);
        let mut devices = input.devices.clone();
        builder::update_devices_lookup(&mut devices, &expanded, catalog.base());

        // Steps 4-5: pair generation + evaluation (pure math).
        let evaluations = pairs::generate_chain_pairs(&expanded, &devices, catalog);

        // Step 6: rollup analysis.
        let chain_summary = analyzer::analyze(&evaluations);

        // Step 7: decision rules, with N-1 subset retry on failure.
        let decision = decision::decide_next_action(&classification, &chain_summary);
        let subset_analysis = if decision.action == DecisionAction::RunN1Subsets {
            Some(decision::run_n1_subsets(
                &chain_set.chains_to_check,
                &devices,
                catalog,
            ))
        } else {
            None
        };

        // Step 8: deterministic text synthesis.
        let result_type = determine_result_type(&classification);
        let text_builder =
            ChainTextBuilder::new(&chain_summary, &evaluations, subset_analysis.as_deref());
        let text_summary = text_builder.build(&result_type);

        // Step 9: flatten + quality check.
        let flat_data = flatten(&evaluations);
        let mut data = ChainData {
            chain_summary,
            flat_data,
            text_summary,
            chains_tested: chain_set.chains_to_check,
            decision,
            subset_analysis,
            quality_check: None,
        };

        let input_devices: BTreeSet<String> = input.devices.keys().cloned().collect();
        data.quality_check = Some(quality::check_quality(&input_devices, &data, &classification));
        if let Some(check) = &data.quality_check {
            if !check.passed {
                warn!(issues = ?check.issues, "Chain engine quality check flagged issues");
            }
        }

        let confidence = if classification.confidence > 0.0 {
            classification.confidence
        } else {
            0.9
        };

        EngineOutput {
            status: EngineStatus::Complete,
            engine: ENGINE_NAME.to_string(),
            result_type,
            data: EngineData::Chain(data),
            classification: Some(classification),
            confidence,
            usage,
        }
    }
}

/// Map the classification to a result type.
fn determine_result_type(classification: &Classification) -> String {
    if !classification.sub_type.is_empty() {
        return classification.sub_type.to_lowercase();
    }
    let mode = classification.query_mode.as_str();
    let structure = classification.structure.as_str();

    if mode == "stack_validation" || structure == "multi_device" {
        "stack_validation".to_string()
    } else if matches!(mode, "exploratory" | "discovery") {
        "device_discovery".to_string()
    } else {
        "compatibility_check".to_string()
    }
}

fn flatten(evaluations: &[pairs::ChainEvaluation]) -> Vec<FlatPairRecord> {
    let mut flat = Vec::new();
    for chain in evaluations {
        for path in &chain.paths {
            for connection in &path.connections {
                for pair in &connection.pairs {
                    flat.push(FlatPairRecord {
                        device_path: path.device_path.clone(),
                        inner_id: pair.inner.id.clone(),
                        inner_product: pair.inner.product_name.clone(),
                        inner_device: pair.inner.device_name.clone(),
                        outer_id: pair.outer.id.clone(),
                        outer_product: pair.outer.product_name.clone(),
                        outer_device: pair.outer.device_name.clone(),
                        connection_type: pair.connection_type,
                        overall_status: pair.overall_status,
                        logic_type: pair.logic_type,
                    });
                }
            }
        }
    }
    flat
}
