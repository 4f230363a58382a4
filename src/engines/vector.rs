//! Vector engine: semantic search over IFU/510(k) document chunks.
//!
//! Device ids from extraction scope the search via metadata filters. When no
//! device filter applies and a guideline store is configured, both stores
//! are searched concurrently and merged by score.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::engines::{EngineData, EngineInput, EngineOutput, EngineStatus};
use crate::models::TokenTotals;
use crate::vector::{MetadataFilter, VectorStoreClient};

pub const ENGINE_NAME: &str = "vector_engine";

// Chunks below this relevance score are dropped as noise.
const MIN_SCORE: f64 = 0.4;
const MAX_CHUNKS: usize = 10;
const DOCS_MAX_RESULTS: usize = 20;
const GUIDELINES_MAX_RESULTS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub file_id: String,
    pub score: f64,
    pub attributes: Value,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorData {
    pub query: String,
    pub chunks: Vec<DocumentChunk>,
    pub chunk_count: usize,
    pub top_score: f64,
}

pub struct VectorEngine {
    docs: Arc<VectorStoreClient>,
    guidelines: Option<Arc<VectorStoreClient>>,
}

impl VectorEngine {
    pub fn new(docs: Arc<VectorStoreClient>, guidelines: Option<Arc<VectorStoreClient>>) -> Self {
        Self { docs, guidelines }
    }

    fn extract_chunks(response: &crate::vector::SearchResponse, source: &str) -> Vec<DocumentChunk> {
        let mut chunks = Vec::new();
        for hit in &response.data {
            if hit.score < MIN_SCORE {
                continue;
            }
            for item in &hit.content {
                if item.kind != "text" {
                    continue;
                }
                chunks.push(DocumentChunk {
                    text: item.text.clone(),
                    file_id: hit.file_id.clone(),
                    score: hit.score,
                    attributes: hit.attributes.clone(),
                    source: source.to_string(),
                });
            }
        }
        chunks
    }

    pub async fn run(&self, input: &EngineInput) -> EngineOutput {
        let query = input.normalized_query.clone();

        let variant_ids: Vec<String> = input
            .devices
            .values()
            .flat_map(|d| d.ids.iter().cloned())
            .collect();

        let metadata_filter = if variant_ids.is_empty() {
            info!("Vector engine: no device ids, searching without metadata filter");
            None
        } else {
            info!(ids = variant_ids.len(), "Vector engine: filtering by device ids");
            Some(MetadataFilter::device_variants(&variant_ids))
        };

        // Search the guideline store only when no device-specific filter is
        // in play.
        let search_guidelines = metadata_filter.is_none() && self.guidelines.is_some();

        let docs_search = self.docs.search(&query, metadata_filter.as_ref(), DOCS_MAX_RESULTS);
        let guideline_search = async {
            match &self.guidelines {
                Some(client) if search_guidelines => {
                    Some(client.search(&query, None, GUIDELINES_MAX_RESULTS).await)
                }
                _ => None,
            }
        };

        let (docs_result, guideline_result) = tokio::join!(docs_search, guideline_search);

        let mut chunks = Vec::new();
        match docs_result {
            Ok(response) => chunks.extend(Self::extract_chunks(&response, "ifu")),
            Err(e) => {
                warn!(error = %e, "IFU store search failed");
                if !search_guidelines {
                    return EngineOutput::error(
                        ENGINE_NAME,
                        "vector_search",
                        format!("Vector store search failed: {e}"),
                    );
                }
            }
        }
        if let Some(result) = guideline_result {
            match result {
                Ok(response) => chunks.extend(Self::extract_chunks(&response, "ais_guidelines")),
                Err(e) => warn!(error = %e, "Guideline store search failed"),
            }
        }

        chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        chunks.truncate(MAX_CHUNKS);

        let top_score = chunks.first().map(|c| c.score).unwrap_or(0.0);
        info!(
            chunks = chunks.len(),
            top_score, "Vector engine search complete"
        );

        let status = if chunks.is_empty() {
            EngineStatus::NoResults
        } else {
            EngineStatus::Complete
        };
        let confidence = if chunks.is_empty() {
            0.1
        } else {
            top_score.min(0.95)
        };

        EngineOutput {
            status,
            engine: ENGINE_NAME.to_string(),
            result_type: "vector_search".to_string(),
            data: EngineData::Vector(VectorData {
                query,
                chunk_count: chunks.len(),
                top_score,
                chunks,
            }),
            classification: input.classification.clone(),
            confidence,
            usage: TokenTotals::default(),
        }
    }
}
