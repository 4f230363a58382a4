//! Database engine: spec lookups, filtered searches, and comparisons over
//! the device catalog.
//!
//! Two paths: the default LLM path (QuerySpecAgent generates the spec) and a
//! direct filter path used by the planner when the exact filter is already
//! known, which bypasses the LLM entirely.

mod executor;
mod spec_agent;

pub use executor::{QueryExecutor, QuerySpec};
pub use spec_agent::QuerySpecAgent;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::Device;
use crate::config::Config;
use crate::engines::{EngineData, EngineInput, EngineOutput, EngineStatus};
use crate::llm::LlmProvider;
use crate::models::TokenTotals;

pub const ENGINE_NAME: &str = "database_engine";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseData {
    pub query_spec: QuerySpec,
    pub device_list: Vec<Device>,
    pub summary: String,
}

pub struct DatabaseEngine {
    provider: Arc<dyn LlmProvider>,
    config: Arc<Config>,
}

impl DatabaseEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, config: Arc<Config>) -> Self {
        Self { provider, config }
    }

    /// Full LLM path: spec agent then executor.
    pub async fn run(
        &self,
        input: &EngineInput,
        catalog: &crate::catalog::RequestCatalog,
    ) -> EngineOutput {
        let model = self.config.resolve_model(QuerySpecAgent::NAME);
        let (spec, usage) =
            match QuerySpecAgent::run(self.provider.as_ref(), &model, input).await {
                Ok(result) => result,
                Err(e) => {
                    return EngineOutput::error(
                        ENGINE_NAME,
                        "database_query",
                        format!("Query spec generation failed: {e}"),
                    );
                }
            };

        let mut output = Self::execute_spec(&spec, catalog);
        output.usage = usage;
        output.classification = input.classification.clone();
        output
    }

    /// Direct filter path: execute a pre-built spec with zero LLM usage.
    pub fn run_filter(
        spec: &QuerySpec,
        catalog: &crate::catalog::RequestCatalog,
    ) -> EngineOutput {
        info!(
            action = %spec.action,
            category = spec.category.as_deref().unwrap_or("any"),
            "Database engine filter path (bypass LLM)"
        );
        Self::execute_spec(spec, catalog)
    }

    fn execute_spec(spec: &QuerySpec, catalog: &crate::catalog::RequestCatalog) -> EngineOutput {
        let result = QueryExecutor::execute(spec, catalog.base());
        info!(
            devices = result.results.len(),
            "Database engine query complete"
        );

        EngineOutput {
            status: EngineStatus::Complete,
            engine: ENGINE_NAME.to_string(),
            result_type: "database_query".to_string(),
            data: EngineData::Database(DatabaseData {
                query_spec: spec.clone(),
                device_list: result.results,
                summary: result.summary,
            }),
            classification: None,
            confidence: 0.9,
            usage: TokenTotals::default(),
        }
    }
}
