//! Planned path: planner-driven multi-engine execution in parallel waves.
//!
//! Each wave runs every step whose dependencies are complete; if no step is
//! ready while some remain (circular dependencies), the remainder executes
//! serially as a safety net.

use std::collections::{BTreeMap, BTreeSet};

use futures_util::future::join_all;
use tracing::{info, warn};

use crate::agents::extraction::ExtractionResult;
use crate::agents::planner::{Plan, PlanStep};
use crate::broker::{Event, StreamingBroker};
use crate::catalog::RequestCatalog;
use crate::engines::database::{DatabaseEngine, QuerySpec};
use crate::engines::{Constraint, EngineInput, EngineMetadata, EngineOutput};

use super::Orchestrator;

/// Execute one plan step against the right engine.
async fn execute_step(
    orchestrator: &Orchestrator,
    step: &PlanStep,
    extraction: &ExtractionResult,
    normalized_query: &str,
    catalog: &RequestCatalog,
    prior: Vec<EngineOutput>,
    filter_category: Option<String>,
    broker: &StreamingBroker,
) -> EngineOutput {
    match step.engine.as_str() {
        "database" => {
            let _ = broker
                .put(Event::status("database_engine", "Searching Database…"))
                .await;
            info!(step = %step.step_id, action = %step.action, "Plan step: database_engine");

            let mut filters = step.filters.clone();
            // Safety net: carry extraction constraints the planner missed.
            let existing: BTreeSet<&str> = filters.iter().map(|f| f.field.as_str()).collect();
            let missing: Vec<Constraint> = extraction
                .constraints
                .iter()
                .filter(|c| !existing.contains(c.field.as_str()))
                .cloned()
                .collect();
            filters.extend(missing);

            let spec = QuerySpec {
                action: if step.action.is_empty() {
                    "filter_by_spec".to_string()
                } else {
                    step.action.clone()
                },
                category: step.category.clone(),
                filters,
                device_ids: Vec::new(),
            };
            DatabaseEngine::run_filter(&spec, catalog)
        }
        "chain" => {
            let _ = broker
                .put(Event::status("chain_engine", "Processing Connections…"))
                .await;
            info!(step = %step.step_id, "Plan step: chain_engine");

            let mut devices = BTreeMap::new();
            for name in &step.named_devices {
                if let Some(reference) = extraction.devices.get(name) {
                    devices.insert(name.clone(), reference.clone());
                }
            }
            if devices.is_empty() {
                devices = extraction.devices.clone();
            }

            let input = EngineInput {
                normalized_query: normalized_query.to_string(),
                devices,
                categories: if prior.is_empty() {
                    extraction.categories.clone()
                } else {
                    Vec::new()
                },
                prior_results: prior,
                metadata: EngineMetadata { filter_category },
                ..Default::default()
            };
            orchestrator.chain_engine.run(input, catalog).await
        }
        "vector" => {
            let _ = broker
                .put(Event::status("vector_engine", "Searching Documents…"))
                .await;
            info!(step = %step.step_id, "Plan step: vector_engine");

            let Some(vector_engine) = &orchestrator.vector_engine else {
                return EngineOutput::error(
                    crate::engines::vector::ENGINE_NAME,
                    "vector_search",
                    "Vector store is not configured".to_string(),
                );
            };

            let mut devices = BTreeMap::new();
            for name in &step.named_devices {
                if let Some(reference) = extraction.devices.get(name) {
                    devices.insert(name.clone(), reference.clone());
                }
            }
            // Devices injected from a prior database step scope the search.
            for output in &prior {
                if let crate::engines::EngineData::Database(data) = &output.data {
                    for device in &data.device_list {
                        devices
                            .entry(device.product_name.clone())
                            .or_insert_with(|| crate::catalog::DeviceRef {
                                ids: Vec::new(),
                                conical_category: device.conical_category.clone(),
                            })
                            .ids
                            .push(device.id.clone());
                    }
                }
            }

            let input = EngineInput {
                normalized_query: step
                    .query_focus
                    .clone()
                    .unwrap_or_else(|| normalized_query.to_string()),
                devices,
                ..Default::default()
            };
            vector_engine.run(&input).await
        }
        other => EngineOutput::error(
            "orchestrator",
            "plan_step",
            format!("Unknown plan engine: {other}"),
        ),
    }
}

pub struct PlanExecution {
    pub step_results: BTreeMap<String, EngineOutput>,
    pub last_store_as: String,
}

/// Run the plan's steps in dependency waves and collect their outputs.
pub async fn execute_plan(
    orchestrator: &Orchestrator,
    plan: &Plan,
    extraction: &ExtractionResult,
    normalized_query: &str,
    catalog: &RequestCatalog,
    broker: &StreamingBroker,
    usage: &mut crate::models::UsageLog,
) -> PlanExecution {
    let filter_category = plan
        .steps
        .first()
        .and_then(|s| s.category.clone())
        .or(Some("device".to_string()));

    let mut step_results: BTreeMap<String, EngineOutput> = BTreeMap::new();
    let mut completed: BTreeSet<String> = BTreeSet::new();
    let mut remaining: Vec<PlanStep> = plan.steps.clone();

    let prior_for = |step: &PlanStep, results: &BTreeMap<String, EngineOutput>| {
        step.inject_devices_from
            .as_ref()
            .and_then(|source| results.get(source))
            .cloned()
            .into_iter()
            .collect::<Vec<EngineOutput>>()
    };

    while !remaining.is_empty() {
        let ready: Vec<PlanStep> = remaining
            .iter()
            .filter(|s| s.depends_on.iter().all(|d| completed.contains(d)))
            .cloned()
            .collect();

        if ready.is_empty() {
            warn!(
                stuck = remaining.len(),
                "Plan steps stuck (circular deps?), running sequentially"
            );
            for step in &remaining {
                let prior = prior_for(step, &step_results);
                let output = execute_step(
                    orchestrator,
                    step,
                    extraction,
                    normalized_query,
                    catalog,
                    prior,
                    filter_category.clone(),
                    broker,
                )
                .await;
                usage.track(&output.engine, output.usage);
                step_results.insert(step.store_as.clone(), output.clone());
                step_results.insert(step.step_id.clone(), output);
                completed.insert(step.step_id.clone());
            }
            break;
        }

        if ready.len() > 1 {
            info!(parallel = ready.len(), "Running plan steps in parallel");
        }

        let executions = ready.iter().map(|step| {
            let prior = prior_for(step, &step_results);
            execute_step(
                orchestrator,
                step,
                extraction,
                normalized_query,
                catalog,
                prior,
                filter_category.clone(),
                broker,
            )
        });
        let outputs: Vec<EngineOutput> = join_all(executions).await;

        for (step, output) in ready.iter().zip(outputs) {
            usage.track(&output.engine, output.usage);
            step_results.insert(step.store_as.clone(), output.clone());
            step_results.insert(step.step_id.clone(), output);
            completed.insert(step.step_id.clone());
        }
        remaining.retain(|s| !completed.contains(&s.step_id));
    }

    let last_store_as = plan
        .steps
        .last()
        .map(|s| s.store_as.clone())
        .unwrap_or_default();

    PlanExecution {
        step_results,
        last_store_as,
    }
}
