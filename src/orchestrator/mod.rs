//! Top-level request orchestrator.
//!
//! Fixed state machine:
//! rewrite -> classify_intent ∥ extract_equipment -> [validate unresolved]
//! -> [generic pipeline] -> route_by_intent -> engine(s) -> output agent.
//!
//! The handler owns session persistence and completion events; this module
//! owns everything between the normalized query and the final answer text.

mod clinical_context;
mod planned;

pub use clinical_context::{enrich_guideline_query, merge_clinical_followup};

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::agents::extraction::{EquipmentExtraction, ExtractionResult};
use crate::agents::generic::GenericPipeline;
use crate::agents::intent::IntentClassifier;
use crate::agents::planner::QueryPlanner;
use crate::agents::rewriter::InputRewriter;
use crate::broker::{Event, EventKind, StreamingBroker};
use crate::catalog::{DeviceStore, RequestCatalog, Suggestion};
use crate::config::Config;
use crate::engines::chain::ChainEngine;
use crate::engines::clinical::ClinicalSupportEngine;
use crate::engines::database::DatabaseEngine;
use crate::engines::vector::VectorEngine;
use crate::engines::{EngineData, EngineInput, EngineOutput, EngineStatus};
use crate::llm::LlmProvider;
use crate::models::UsageLog;
use crate::output;
use crate::session::SessionState;

const MAX_SUGGESTIONS: usize = 3;
const DEVICE_CHUNK_SIZE: usize = 20;

/// Intents that route through the chain/planned compatibility machinery and
/// therefore need synthetic records for generic specs.
const COMPAT_INTENTS: &[&str] = &[
    "equipment_compatibility",
    "device_discovery",
    "filtered_discovery",
];

/// Intents where ALL named devices must resolve; partial results mislead.
const RELATIONAL_INTENTS: &[&str] = &[
    "equipment_compatibility",
    "device_discovery",
    "device_comparison",
    "filtered_discovery",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolLogEntry {
    pub step: String,
    pub tool: String,
}

/// Everything the handler needs after the pipeline completes.
pub struct OrchestratorOutcome {
    pub final_text: String,
    pub usage: UsageLog,
    pub tool_log: Vec<ToolLogEntry>,
    /// Flat pair records to stream as `chain_category_chunk` events.
    pub chain_data: Option<Vec<Value>>,
}

pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    config: Arc<Config>,
    catalog: Arc<DeviceStore>,
    chain_engine: ChainEngine,
    database_engine: DatabaseEngine,
    vector_engine: Option<Arc<VectorEngine>>,
}

fn engine_for_intent(intent: &str) -> &'static str {
    match intent {
        "equipment_compatibility" | "device_discovery" => "chain",
        "specification_lookup" | "spec_reasoning" | "device_search" | "device_comparison"
        | "manufacturer_lookup" => "database",
        "filtered_discovery" => "planned",
        "documentation" | "knowledge_base" | "device_definition" => "vector",
        "clinical_support" => "clinical",
        "deep_research" => "research",
        _ => "general",
    }
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        config: Arc<Config>,
        catalog: Arc<DeviceStore>,
        vector_engine: Option<Arc<VectorEngine>>,
    ) -> Self {
        Self {
            chain_engine: ChainEngine::new(provider.clone(), config.clone()),
            database_engine: DatabaseEngine::new(provider.clone(), config.clone()),
            provider,
            config,
            catalog,
            vector_engine,
        }
    }

    async fn emit_status(&self, broker: &StreamingBroker, agent: &str, content: &str) {
        let _ = broker.put(Event::status(agent, content)).await;
    }

    fn model_for(&self, agent: &str) -> String {
        self.config.resolve_model(agent)
    }

    /// Run the full pipeline for the latest user turn in the session.
    pub async fn run(
        &self,
        session: &mut SessionState,
        broker: &StreamingBroker,
    ) -> Result<OrchestratorOutcome> {
        let mut usage = UsageLog::default();
        let mut tool_log = Vec::new();

        let user_message = session
            .conversation_history
            .iter()
            .rev()
            .find(|m| m.role == "user" && !m.content.is_empty())
            .map(|m| m.content.clone())
            .unwrap_or_default();

        // ── Step 1: input rewriter ────────────────────────────────
        self.emit_status(broker, InputRewriter::NAME, "Reading…").await;
        let (rewrite, rewrite_usage) = InputRewriter::run(
            self.provider.as_ref(),
            &self.model_for(InputRewriter::NAME),
            &user_message,
            &session.conversation_history,
        )
        .await?;
        usage.track(InputRewriter::NAME, rewrite_usage);
        tool_log.push(ToolLogEntry {
            step: "1".to_string(),
            tool: InputRewriter::NAME.to_string(),
        });
        let mut normalized_query = rewrite.rewritten_user_prompt;
        info!(query = %normalized_query.chars().take(150).collect::<String>(), "Normalized query");

        // ── Step 1b: clinical clarification follow-up detection ───
        let mut clinical_followup = false;
        if let Some(pending) = session.pending_clinical_clarification.clone() {
            match merge_clinical_followup(&pending, &user_message) {
                Some(merged) => {
                    normalized_query = merged;
                    clinical_followup = true;
                    info!("Clinical follow-up merged with pending patient data");
                }
                None => {
                    session.pending_clinical_clarification = None;
                    info!("Pending clinical context cleared (topic change)");
                }
            }
        }

        // ── Step 1d: post-assessment guideline enrichment ─────────
        if !clinical_followup {
            if let Some(last) = &session.last_clinical_assessment {
                if let Some(enriched) = enrich_guideline_query(&user_message, last) {
                    normalized_query = enriched;
                    info!("Guideline query enriched with clinical context");
                }
            }
        }

        // ── Steps 2+3: intent classification ∥ equipment extraction ──
        self.emit_status(broker, IntentClassifier::NAME, "Understanding Intent…")
            .await;
        self.emit_status(broker, EquipmentExtraction::NAME, "Extracting Devices…")
            .await;

        let intent_model = self.model_for(IntentClassifier::NAME);
        let extraction_model = self.model_for(EquipmentExtraction::NAME);
        let (intent_result, extraction_result) = tokio::join!(
            IntentClassifier::run(
                self.provider.as_ref(),
                &intent_model,
                &normalized_query,
            ),
            EquipmentExtraction::run(
                self.provider.as_ref(),
                &extraction_model,
                &normalized_query,
                &self.catalog,
            ),
        );
        let (intent, intent_usage) = intent_result?;
        let (mut extraction, extraction_usage) = extraction_result?;
        usage.track(IntentClassifier::NAME, intent_usage);
        tool_log.push(ToolLogEntry {
            step: "2".to_string(),
            tool: IntentClassifier::NAME.to_string(),
        });
        usage.track(EquipmentExtraction::NAME, extraction_usage);
        tool_log.push(ToolLogEntry {
            step: "3".to_string(),
            tool: EquipmentExtraction::NAME.to_string(),
        });

        let mut primary_intent = intent.primary_intent().to_string();
        if clinical_followup {
            primary_intent = "clinical_support".to_string();
            info!("Force route: clinical (follow-up)");
        }

        // Fast exit: general queries skip extraction handling entirely.
        if primary_intent == "general" {
            return self
                .run_general_path(&user_message, broker, usage, tool_log)
                .await;
        }

        // ── Validation gate: unresolved device clarification ──────
        if !extraction.not_found.is_empty() {
            let suggestions = self.fuzzy_suggestions(&extraction.not_found);

            if RELATIONAL_INTENTS.contains(&primary_intent.as_str()) {
                info!(
                    not_found = ?extraction.not_found,
                    intent = %primary_intent,
                    "STOP: unresolved devices in relational intent"
                );
                return self
                    .run_clarification_path(
                        &user_message,
                        &extraction,
                        suggestions,
                        broker,
                        usage,
                        tool_log,
                    )
                    .await;
            }
            info!(
                not_found = ?extraction.not_found,
                intent = %primary_intent,
                "PARTIAL: proceeding with found devices"
            );
            extraction.not_found_suggestions = suggestions;
        }

        // ── Generic device pipeline (conditional on intent) ───────
        let request_catalog = RequestCatalog::new(self.catalog.clone());
        if !extraction.generic_specs.is_empty()
            && COMPAT_INTENTS.contains(&primary_intent.as_str())
        {
            self.emit_status(broker, GenericPipeline::STRUCTURING_NAME, "Understanding Generic Devices…")
                .await;
            let generic = GenericPipeline::run(
                self.provider.as_ref(),
                &self.model_for(GenericPipeline::STRUCTURING_NAME),
                &self.model_for(GenericPipeline::PREP_NAME),
                &user_message,
                &extraction.generic_specs,
                &session.uid,
                &session.session_id,
                &request_catalog,
            )
            .await?;
            usage.track(GenericPipeline::PREP_NAME, generic.usage);
            tool_log.push(ToolLogEntry {
                step: "3b".to_string(),
                tool: GenericPipeline::PREP_NAME.to_string(),
            });

            extraction.devices.extend(generic.synthetic_devices);
            if !generic.insufficient_devices.is_empty() {
                session.generic_insufficient = generic.insufficient_devices;
            }
        } else if !extraction.generic_specs.is_empty() {
            info!(
                intent = %primary_intent,
                "Skipping generic pipeline: intent does not require synthetic devices"
            );
        }

        // ── Step 4: route by intent ───────────────────────────────
        let takes_planned_path = primary_intent == "filtered_discovery"
            || intent.needs_planning
            || !extraction.constraints.is_empty();

        if takes_planned_path {
            info!(
                intent = %primary_intent,
                planning = intent.needs_planning,
                constraints = !extraction.constraints.is_empty(),
                "Route: planned path"
            );
            return self
                .run_planned_path(
                    &user_message,
                    &normalized_query,
                    &extraction,
                    &request_catalog,
                    broker,
                    usage,
                    tool_log,
                )
                .await;
        }

        match engine_for_intent(&primary_intent) {
            "chain" => {
                self.run_chain_path(
                    &user_message,
                    &normalized_query,
                    &extraction,
                    &request_catalog,
                    broker,
                    usage,
                    tool_log,
                )
                .await
            }
            "database" => {
                self.run_database_path(
                    &user_message,
                    &normalized_query,
                    &extraction,
                    &request_catalog,
                    broker,
                    usage,
                    tool_log,
                )
                .await
            }
            "vector" => {
                self.run_vector_path(
                    &user_message,
                    &normalized_query,
                    &extraction,
                    broker,
                    usage,
                    tool_log,
                )
                .await
            }
            "clinical" => {
                self.run_clinical_path(
                    &user_message,
                    &normalized_query,
                    clinical_followup,
                    session,
                    broker,
                    usage,
                    tool_log,
                )
                .await
            }
            "research" => {
                info!("Route: research path (stubbed)");
                let augmented = format!(
                    "The user asked a complex research question. The deep research feature \
                     is not yet available. Acknowledge the complexity and offer to help with \
                     specific sub-questions instead.\n\nUser question: {user_message}"
                );
                self.run_general_path(&augmented, broker, usage, tool_log).await
            }
            _ => self.run_general_path(&user_message, broker, usage, tool_log).await,
        }
    }

    fn fuzzy_suggestions(&self, not_found: &[String]) -> BTreeMap<String, Vec<Suggestion>> {
        let mut suggestions = BTreeMap::new();
        for name in not_found {
            let matches = self.catalog.suggest_close_matches(name, MAX_SUGGESTIONS);
            if matches.is_empty() {
                info!(name = %name, "No suggestions for unresolved device");
            } else {
                info!(
                    name = %name,
                    candidates = ?matches.iter().map(|m| m.product_name.as_str()).collect::<Vec<_>>(),
                    "Fuzzy suggestions"
                );
            }
            suggestions.insert(name.clone(), matches);
        }
        suggestions
    }

    // ── Chain path ────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn run_chain_path(
        &self,
        user_message: &str,
        normalized_query: &str,
        extraction: &ExtractionResult,
        catalog: &RequestCatalog,
        broker: &StreamingBroker,
        mut usage: UsageLog,
        mut tool_log: Vec<ToolLogEntry>,
    ) -> Result<OrchestratorOutcome> {
        self.emit_status(broker, "chain_engine", "Processing Connections…").await;

        let input = EngineInput {
            normalized_query: normalized_query.to_string(),
            devices: extraction.devices.clone(),
            categories: extraction.categories.clone(),
            generic_specs: extraction.generic_specs.clone(),
            ..Default::default()
        };
        let engine_result = self.chain_engine.run(input, catalog).await;
        usage.track("chain_engine", engine_result.usage);
        tool_log.push(ToolLogEntry {
            step: "engine".to_string(),
            tool: "chain_engine".to_string(),
        });

        self.finish_chain_output(user_message, engine_result, broker, usage, tool_log)
            .await
    }

    /// Shared tail for chain results (direct and planned paths).
    async fn finish_chain_output(
        &self,
        user_message: &str,
        engine_result: EngineOutput,
        broker: &StreamingBroker,
        mut usage: UsageLog,
        mut tool_log: Vec<ToolLogEntry>,
    ) -> Result<OrchestratorOutcome> {
        let classification = engine_result.classification.clone().unwrap_or_default();
        let result_type = engine_result.result_type.clone();

        let EngineData::Chain(data) = engine_result.data else {
            return self
                .degrade_to_error(
                    user_message,
                    "The compatibility analysis could not be completed.",
                    &engine_error_message(&engine_result.status, "chain_engine"),
                    broker,
                    usage,
                    tool_log,
                )
                .await;
        };

        self.emit_status(broker, output::chain::NAME, "Generating Answer…").await;
        let (final_text, output_usage) = output::chain::run(
            self.provider.as_ref(),
            &self.model_for(output::chain::NAME),
            Some(broker),
            user_message,
            &result_type,
            &classification,
            &data,
        )
        .await?;
        usage.track(output::chain::NAME, output_usage);
        tool_log.push(ToolLogEntry {
            step: "output".to_string(),
            tool: output::chain::NAME.to_string(),
        });

        let chain_data: Vec<Value> = data
            .flat_data
            .iter()
            .filter_map(|record| serde_json::to_value(record).ok())
            .collect();

        Ok(OrchestratorOutcome {
            final_text,
            usage,
            tool_log,
            chain_data: (!chain_data.is_empty()).then_some(chain_data),
        })
    }

    // ── Database path ─────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn run_database_path(
        &self,
        user_message: &str,
        normalized_query: &str,
        extraction: &ExtractionResult,
        catalog: &RequestCatalog,
        broker: &StreamingBroker,
        mut usage: UsageLog,
        mut tool_log: Vec<ToolLogEntry>,
    ) -> Result<OrchestratorOutcome> {
        self.emit_status(broker, "database_engine", "Searching Database…").await;

        let input = EngineInput {
            normalized_query: normalized_query.to_string(),
            devices: extraction.devices.clone(),
            categories: extraction.categories.clone(),
            generic_specs: extraction.generic_specs.clone(),
            ..Default::default()
        };
        let engine_result = self.database_engine.run(&input, catalog).await;
        usage.track("database_engine", engine_result.usage);
        tool_log.push(ToolLogEntry {
            step: "engine".to_string(),
            tool: "database_engine".to_string(),
        });

        let EngineData::Database(data) = &engine_result.data else {
            return self
                .degrade_to_error(
                    user_message,
                    "The device lookup could not be completed.",
                    &engine_error_message(&engine_result.status, "database_engine"),
                    broker,
                    usage,
                    tool_log,
                )
                .await;
        };

        self.emit_status(broker, output::database::NAME, "Generating Answer…").await;
        let (final_text, output_usage) = output::database::run(
            self.provider.as_ref(),
            &self.model_for(output::database::NAME),
            Some(broker),
            user_message,
            data,
            &extraction.not_found,
            &extraction.not_found_suggestions,
            &extraction.generic_specs,
        )
        .await?;
        usage.track(output::database::NAME, output_usage);
        tool_log.push(ToolLogEntry {
            step: "output".to_string(),
            tool: output::database::NAME.to_string(),
        });

        Ok(OrchestratorOutcome {
            final_text,
            usage,
            tool_log,
            chain_data: None,
        })
    }

    // ── Vector path ───────────────────────────────────────────────

    async fn run_vector_path(
        &self,
        user_message: &str,
        normalized_query: &str,
        extraction: &ExtractionResult,
        broker: &StreamingBroker,
        mut usage: UsageLog,
        mut tool_log: Vec<ToolLogEntry>,
    ) -> Result<OrchestratorOutcome> {
        let Some(vector_engine) = &self.vector_engine else {
            return self
                .degrade_to_error(
                    user_message,
                    "Document search is not available right now.",
                    "Vector store is not configured",
                    broker,
                    usage,
                    tool_log,
                )
                .await;
        };

        self.emit_status(broker, "vector_engine", "Searching Documents…").await;
        let input = EngineInput {
            normalized_query: normalized_query.to_string(),
            devices: extraction.devices.clone(),
            categories: extraction.categories.clone(),
            ..Default::default()
        };
        let engine_result = vector_engine.run(&input).await;
        usage.track("vector_engine", engine_result.usage);
        tool_log.push(ToolLogEntry {
            step: "engine".to_string(),
            tool: "vector_engine".to_string(),
        });

        let EngineData::Vector(data) = &engine_result.data else {
            return self
                .degrade_to_error(
                    user_message,
                    "Document search failed.",
                    &engine_error_message(&engine_result.status, "vector_engine"),
                    broker,
                    usage,
                    tool_log,
                )
                .await;
        };

        self.emit_status(broker, output::vector::NAME, "Generating Answer…").await;
        let (final_text, output_usage) = output::vector::run(
            self.provider.as_ref(),
            &self.model_for(output::vector::NAME),
            Some(broker),
            user_message,
            data,
        )
        .await?;
        usage.track(output::vector::NAME, output_usage);
        tool_log.push(ToolLogEntry {
            step: "output".to_string(),
            tool: output::vector::NAME.to_string(),
        });

        Ok(OrchestratorOutcome {
            final_text,
            usage,
            tool_log,
            chain_data: None,
        })
    }

    // ── Clinical path ─────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn run_clinical_path(
        &self,
        user_message: &str,
        normalized_query: &str,
        clinical_followup: bool,
        session: &mut SessionState,
        broker: &StreamingBroker,
        mut usage: UsageLog,
        mut tool_log: Vec<ToolLogEntry>,
    ) -> Result<OrchestratorOutcome> {
        self.emit_status(broker, "clinical_support_engine", "Evaluating Eligibility…")
            .await;

        // On a follow-up the normalized query IS the merged patient data.
        let raw_query = if clinical_followup {
            normalized_query
        } else {
            user_message
        };
        let engine_result = ClinicalSupportEngine::run(raw_query);
        tool_log.push(ToolLogEntry {
            step: "engine".to_string(),
            tool: "clinical_support_engine".to_string(),
        });

        let EngineData::Clinical(data) = &engine_result.data else {
            return self
                .degrade_to_error(
                    user_message,
                    "The clinical assessment could not be completed.",
                    "Clinical engine returned an unexpected shape",
                    broker,
                    usage,
                    tool_log,
                )
                .await;
        };

        // Missing critical parameters: deterministic clarification, no LLM.
        if engine_result.status == EngineStatus::NeedsClarification {
            self.emit_status(broker, "clinical_support_engine", "Missing Information…")
                .await;
            let clarification_text = output::clinical::format_clinical_clarification(data);
            let _ = broker
                .put(Event::final_chunk("clinical_support_engine", &clarification_text))
                .await;

            session.pending_clinical_clarification = Some(crate::session::PendingClinical {
                patient: data.patient.clone(),
                completeness: data.completeness.clone(),
                original_query: user_message.to_string(),
            });

            return Ok(OrchestratorOutcome {
                final_text: clarification_text,
                usage,
                tool_log,
                chain_data: None,
            });
        }

        self.emit_status(broker, output::clinical::NAME, "Generating Assessment…")
            .await;
        let (final_text, output_usage) = output::clinical::run(
            self.provider.as_ref(),
            &self.model_for(output::clinical::NAME),
            Some(broker),
            raw_query,
            data,
        )
        .await?;
        usage.track(output::clinical::NAME, output_usage);
        tool_log.push(ToolLogEntry {
            step: "output".to_string(),
            tool: output::clinical::NAME.to_string(),
        });

        // Assessment complete: clear the pending context and remember the
        // result for guideline follow-ups.
        session.pending_clinical_clarification = None;
        session.last_clinical_assessment = Some(crate::session::ClinicalAssessment {
            patient: data.patient.clone(),
            eligibility: data.eligibility.clone(),
        });

        Ok(OrchestratorOutcome {
            final_text,
            usage,
            tool_log,
            chain_data: None,
        })
    }

    // ── Planned path ──────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn run_planned_path(
        &self,
        user_message: &str,
        normalized_query: &str,
        extraction: &ExtractionResult,
        catalog: &RequestCatalog,
        broker: &StreamingBroker,
        mut usage: UsageLog,
        mut tool_log: Vec<ToolLogEntry>,
    ) -> Result<OrchestratorOutcome> {
        self.emit_status(broker, QueryPlanner::NAME, "Planning Approach…").await;
        let (plan, planner_usage) = QueryPlanner::run(
            self.provider.as_ref(),
            &self.model_for(QueryPlanner::NAME),
            normalized_query,
            extraction,
        )
        .await?;
        usage.track(QueryPlanner::NAME, planner_usage);
        tool_log.push(ToolLogEntry {
            step: "3a".to_string(),
            tool: QueryPlanner::NAME.to_string(),
        });

        if plan.steps.is_empty() {
            warn!("Planner returned no steps, falling back to database path");
            return self
                .run_database_path(
                    user_message,
                    normalized_query,
                    extraction,
                    catalog,
                    broker,
                    usage,
                    tool_log,
                )
                .await;
        }

        let execution = planned::execute_plan(
            self,
            &plan,
            extraction,
            normalized_query,
            catalog,
            broker,
            &mut usage,
        )
        .await;
        for step in &plan.steps {
            tool_log.push(ToolLogEntry {
                step: format!("3b_{}", step.step_id),
                tool: format!("{}_engine", step.engine),
            });
        }

        let last_result = execution.step_results.get(&execution.last_store_as).cloned();

        match plan.output_agent.as_str() {
            output::chain::NAME => {
                let Some(result) = last_result else {
                    return self
                        .degrade_to_error(
                            user_message,
                            "The planned analysis produced no result.",
                            "Planned path: final step missing",
                            broker,
                            usage,
                            tool_log,
                        )
                        .await;
                };
                self.finish_chain_output(user_message, result, broker, usage, tool_log)
                    .await
            }
            output::vector::NAME => {
                let Some(EngineData::Vector(data)) = last_result.map(|r| r.data) else {
                    return self
                        .degrade_to_error(
                            user_message,
                            "Document search failed.",
                            "Planned path: vector step missing",
                            broker,
                            usage,
                            tool_log,
                        )
                        .await;
                };
                self.emit_status(broker, output::vector::NAME, "Generating Answer…").await;
                let (final_text, output_usage) = output::vector::run(
                    self.provider.as_ref(),
                    &self.model_for(output::vector::NAME),
                    Some(broker),
                    user_message,
                    &data,
                )
                .await?;
                usage.track(output::vector::NAME, output_usage);
                Ok(OrchestratorOutcome {
                    final_text,
                    usage,
                    tool_log,
                    chain_data: None,
                })
            }
            output::synthesis::NAME => {
                self.emit_status(broker, output::synthesis::NAME, "Synthesizing Answer…")
                    .await;
                let (final_text, output_usage) = output::synthesis::run(
                    self.provider.as_ref(),
                    &self.model_for(output::synthesis::NAME),
                    Some(broker),
                    user_message,
                    &execution.step_results,
                )
                .await?;
                usage.track(output::synthesis::NAME, output_usage);
                tool_log.push(ToolLogEntry {
                    step: "output".to_string(),
                    tool: output::synthesis::NAME.to_string(),
                });

                // Surface chain flat data when a chain step ran.
                let chain_data = execution.step_results.values().find_map(|r| {
                    if let EngineData::Chain(data) = &r.data {
                        let records: Vec<Value> = data
                            .flat_data
                            .iter()
                            .filter_map(|record| serde_json::to_value(record).ok())
                            .collect();
                        (!records.is_empty()).then_some(records)
                    } else {
                        None
                    }
                });

                Ok(OrchestratorOutcome {
                    final_text,
                    usage,
                    tool_log,
                    chain_data,
                })
            }
            // Default: database output agent.
            _ => {
                let data = match last_result.map(|r| r.data) {
                    Some(EngineData::Database(data)) => data,
                    _ => {
                        return self
                            .degrade_to_error(
                                user_message,
                                "The device lookup could not be completed.",
                                "Planned path: database step missing",
                                broker,
                                usage,
                                tool_log,
                            )
                            .await;
                    }
                };
                self.emit_status(broker, output::database::NAME, "Generating Answer…").await;
                let (final_text, output_usage) = output::database::run(
                    self.provider.as_ref(),
                    &self.model_for(output::database::NAME),
                    Some(broker),
                    user_message,
                    &data,
                    &extraction.not_found,
                    &extraction.not_found_suggestions,
                    &extraction.generic_specs,
                )
                .await?;
                usage.track(output::database::NAME, output_usage);
                Ok(OrchestratorOutcome {
                    final_text,
                    usage,
                    tool_log,
                    chain_data: None,
                })
            }
        }
    }

    // ── Clarification path ────────────────────────────────────────

    async fn run_clarification_path(
        &self,
        user_message: &str,
        extraction: &ExtractionResult,
        suggestions: BTreeMap<String, Vec<Suggestion>>,
        broker: &StreamingBroker,
        mut usage: UsageLog,
        mut tool_log: Vec<ToolLogEntry>,
    ) -> Result<OrchestratorOutcome> {
        self.emit_status(broker, output::clarification::NAME, "Clarifying…").await;

        let resolved: Vec<String> = extraction.devices.keys().cloned().collect();
        let (final_text, output_usage) = output::clarification::run(
            self.provider.as_ref(),
            &self.model_for(output::clarification::NAME),
            Some(broker),
            user_message,
            &resolved,
            &extraction.not_found,
            &suggestions,
        )
        .await?;
        usage.track(output::clarification::NAME, output_usage);
        tool_log.push(ToolLogEntry {
            step: "clarification".to_string(),
            tool: output::clarification::NAME.to_string(),
        });

        Ok(OrchestratorOutcome {
            final_text,
            usage,
            tool_log,
            chain_data: None,
        })
    }

    // ── General path ──────────────────────────────────────────────

    async fn run_general_path(
        &self,
        user_message: &str,
        broker: &StreamingBroker,
        mut usage: UsageLog,
        mut tool_log: Vec<ToolLogEntry>,
    ) -> Result<OrchestratorOutcome> {
        self.emit_status(broker, output::general::NAME, "Generating Answer…").await;
        let (final_text, output_usage) = output::general::run(
            self.provider.as_ref(),
            &self.model_for(output::general::NAME),
            Some(broker),
            user_message,
        )
        .await?;
        usage.track(output::general::NAME, output_usage);
        tool_log.push(ToolLogEntry {
            step: "output".to_string(),
            tool: output::general::NAME.to_string(),
        });

        Ok(OrchestratorOutcome {
            final_text,
            usage,
            tool_log,
            chain_data: None,
        })
    }

    /// Engine failure: degrade to a best-effort response, then surface an
    /// `error` event after it.
    async fn degrade_to_error(
        &self,
        user_message: &str,
        apology: &str,
        error_message: &str,
        broker: &StreamingBroker,
        mut usage: UsageLog,
        mut tool_log: Vec<ToolLogEntry>,
    ) -> Result<OrchestratorOutcome> {
        warn!(error = %error_message, "Engine failure; degrading to best-effort response");

        let augmented = format!(
            "An internal analysis step failed, so no verified data is available. \
             Briefly tell the user the request could not be completed and suggest \
             rephrasing or retrying.\n\nUser question: {user_message}"
        );
        let (final_text, output_usage) = output::general::run(
            self.provider.as_ref(),
            &self.model_for(output::general::NAME),
            Some(broker),
            &augmented,
        )
        .await
        .unwrap_or_else(|_| (apology.to_string(), Default::default()));
        usage.track(output::general::NAME, output_usage);
        tool_log.push(ToolLogEntry {
            step: "degraded".to_string(),
            tool: output::general::NAME.to_string(),
        });

        let _ = broker.put(Event::error(error_message, None)).await;

        Ok(OrchestratorOutcome {
            final_text,
            usage,
            tool_log,
            chain_data: None,
        })
    }
}

fn engine_error_message(status: &EngineStatus, engine: &str) -> String {
    format!("{engine} returned status {status:?} without usable data")
}

/// Stream chain flat data as `chain_category_chunk` events (20 per chunk).
pub async fn stream_chain_data(
    broker: &StreamingBroker,
    chain_data: &[Value],
) -> Result<()> {
    output::stream_device_chunks(
        broker,
        EventKind::ChainCategoryChunk,
        output::chain::NAME,
        chain_data,
        DEVICE_CHUNK_SIZE,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_table() {
        assert_eq!(engine_for_intent("equipment_compatibility"), "chain");
        assert_eq!(engine_for_intent("device_discovery"), "chain");
        assert_eq!(engine_for_intent("specification_lookup"), "database");
        assert_eq!(engine_for_intent("device_comparison"), "database");
        assert_eq!(engine_for_intent("filtered_discovery"), "planned");
        assert_eq!(engine_for_intent("documentation"), "vector");
        assert_eq!(engine_for_intent("clinical_support"), "clinical");
        assert_eq!(engine_for_intent("deep_research"), "research");
        assert_eq!(engine_for_intent("general"), "general");
        assert_eq!(engine_for_intent("unknown_intent"), "general");
    }

    #[test]
    fn test_relational_and_compat_intent_sets() {
        for intent in RELATIONAL_INTENTS {
            // Relational intents either evaluate compatibility or compare.
            assert!(COMPAT_INTENTS.contains(intent) || *intent == "device_comparison");
        }
    }
}
