//! Process configuration loaded from environment variables.
//!
//! Model resolution order for an agent:
//! `AGENT_<NAME>_MODEL` > fast-tier model (if the agent is in the fast set)
//! > global `LLM_MODEL` > provider default.

use std::collections::HashSet;
use std::env;

use lazy_static::lazy_static;

lazy_static! {
    /// Agents that default to the cheaper/faster model tier.
    static ref FAST_AGENTS: HashSet<&'static str> = [
        "equipment_extraction",
        "query_classifier",
        "generic_device_structuring",
        "generic_prep",
        "query_spec_agent",
        "query_planner",
        "clarification_output_agent",
    ]
    .into_iter()
    .collect();
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub catalog_path: String,
    pub session_db_path: String,
    pub llm_provider: String,
    pub llm_model: Option<String>,
    pub llm_fast_model: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub vector_store_id: Option<String>,
    pub guideline_store_id: Option<String>,
    pub external_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let catalog_path =
            env::var("CATALOG_PATH").unwrap_or_else(|_| "./device_catalog.json".to_string());

        let session_db_path =
            env::var("SESSION_DB_PATH").unwrap_or_else(|_| "./medstack_sessions.db".to_string());

        let llm_provider = env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());

        let external_timeout_secs = env::var("EXTERNAL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(30);

        Ok(Self {
            port,
            catalog_path,
            session_db_path,
            llm_provider,
            llm_model: env::var("LLM_MODEL").ok(),
            llm_fast_model: env::var("LLM_FAST_MODEL").ok(),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
            vector_store_id: env::var("VECTOR_STORE_ID").ok(),
            guideline_store_id: env::var("GUIDELINE_STORE_ID").ok(),
            external_timeout_secs,
        })
    }

    /// Default model for a provider when nothing else is configured.
    pub fn provider_default_model(provider: &str) -> &'static str {
        match provider {
            "anthropic" => "claude-sonnet-4-5-20250929",
            _ => "gpt-4.1",
        }
    }

    fn provider_default_fast_model(provider: &str) -> &'static str {
        match provider {
            "anthropic" => "claude-haiku-4-5-20251001",
            _ => "gpt-4.1-mini",
        }
    }

    /// Resolve the model an agent should use.
    pub fn resolve_model(&self, agent_name: &str) -> String {
        let env_key = format!("AGENT_{}_MODEL", agent_name.to_uppercase());
        if let Ok(model) = env::var(&env_key) {
            if !model.trim().is_empty() {
                return model;
            }
        }

        if FAST_AGENTS.contains(agent_name) {
            if let Some(fast) = &self.llm_fast_model {
                return fast.clone();
            }
            return Self::provider_default_fast_model(&self.llm_provider).to_string();
        }

        if let Some(model) = &self.llm_model {
            return model.clone();
        }

        Self::provider_default_model(&self.llm_provider).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_agent_resolution() {
        let config = Config {
            port: 8080,
            catalog_path: String::new(),
            session_db_path: String::new(),
            llm_provider: "openai".to_string(),
            llm_model: Some("gpt-4.1".to_string()),
            llm_fast_model: Some("gpt-4.1-mini".to_string()),
            openai_api_key: None,
            anthropic_api_key: None,
            vector_store_id: None,
            guideline_store_id: None,
            external_timeout_secs: 30,
        };

        assert_eq!(config.resolve_model("query_classifier"), "gpt-4.1-mini");
        assert_eq!(config.resolve_model("chain_output_agent"), "gpt-4.1");
    }

    #[test]
    fn test_agent_env_override_wins() {
        let config = Config {
            port: 8080,
            catalog_path: String::new(),
            session_db_path: String::new(),
            llm_provider: "openai".to_string(),
            llm_model: Some("gpt-4.1".to_string()),
            llm_fast_model: None,
            openai_api_key: None,
            anthropic_api_key: None,
            vector_store_id: None,
            guideline_store_id: None,
            external_timeout_secs: 30,
        };

        env::set_var("AGENT_INPUT_REWRITER_MODEL", "gpt-4.1-nano");
        assert_eq!(config.resolve_model("input_rewriter"), "gpt-4.1-nano");
        env::remove_var("AGENT_INPUT_REWRITER_MODEL");
    }
}
