//! Vector-store search client.
//!
//! Thin wrapper over the hosted vector-store search API used for IFU/510(k)
//! document retrieval and the optional clinical guideline store.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub data: Vec<SearchHit>,
}

/// Metadata filter expression over document attributes.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataFilter {
    #[serde(rename = "type")]
    pub kind: String,
    pub key: String,
    pub value: Value,
}

impl MetadataFilter {
    /// `containsany` over device variant ids.
    pub fn device_variants(ids: &[String]) -> Self {
        Self {
            kind: "containsany".to_string(),
            key: "device_variant_id".to_string(),
            value: json!(ids),
        }
    }
}

pub struct VectorStoreClient {
    http: reqwest::Client,
    api_key: String,
    vector_store_id: String,
}

impl VectorStoreClient {
    pub fn new(http: reqwest::Client, api_key: String, vector_store_id: String) -> Self {
        Self {
            http,
            api_key,
            vector_store_id,
        }
    }

    /// Semantic search; returns the raw scored chunks.
    pub async fn search(
        &self,
        query: &str,
        filters: Option<&MetadataFilter>,
        max_results: usize,
    ) -> Result<SearchResponse> {
        let url = format!(
            "https://api.openai.com/v1/vector_stores/{}/search",
            self.vector_store_id
        );
        let mut payload = json!({
            "query": query,
            "max_num_results": max_results,
        });
        if let Some(filter) = filters {
            payload["filters"] = serde_json::to_value(filter)?;
        }

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
            .json(&payload)
            .send()
            .await
            .context("Vector store request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Vector store returned {status}: {body}");
        }
        response
            .json()
            .await
            .context("Vector store response was not JSON")
    }
}
