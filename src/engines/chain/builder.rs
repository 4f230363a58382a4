//! Chain construction.
//!
//! An LLM agent proposes candidate device chains (distal to proximal) from
//! the resolved devices and categories; deterministic helpers then expand
//! category positions into concrete product paths and refresh the device
//! lookup so every product in an expanded path resolves to variant ids.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::catalog::{DeviceRef, DeviceStore};
use crate::engines::CategoryMapping;
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

const BUILDER_SYSTEM_PROMPT: &str = r#"You are the CHAIN BUILDER for a medical device compatibility system.

Given a user query, resolved devices (product name -> conical category), and
category mappings, propose the device chains that must be evaluated.

A chain is an ordered sequence from DISTAL (innermost, closest to the
treatment site) to PROXIMAL (outermost, closest to the access point).
Conical categories are L0 (outermost) through L5, plus LW for guidewires
(innermost). Within a chain, each device must sit inside the next: the level
sequence must be non-increasing from distal to proximal.

Rules:
- Use product names and category labels EXACTLY as given in the input.
- A position may name a category label from category_mappings; it will be
  expanded to every product in that category.
- For a two-device question, emit one chain with both devices ordered by level.
- For discovery questions ("what X works with Y"), place the category at the
  position its conical level implies.
- Do not invent devices or categories.

Return STRICT JSON:
{
    "chains_to_check": [
        {"sequence": ["<distal>", ..., "<proximal>"], "levels": ["L4", ..., "L0"], "contains_category": false}
    ],
    "confidence": 0.0-1.0,
    "interpretation": "<one sentence describing the reading of the query>"
}"#;

/// One candidate chain as proposed by the builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub sequence: Vec<String>,
    pub levels: Vec<String>,
    #[serde(default)]
    pub contains_category: bool,
}

/// Builder agent output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainSet {
    #[serde(default)]
    pub chains_to_check: Vec<ChainConfig>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub interpretation: String,
}

/// One concrete product ordering realized from a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSpec {
    pub sequence: Vec<String>,
    pub levels: Vec<String>,
}

/// A chain together with its concrete paths after category expansion.
#[derive(Debug, Clone)]
pub struct ExpandedChain {
    pub config: ChainConfig,
    pub paths: Vec<PathSpec>,
}

pub struct ChainBuilder;

impl ChainBuilder {
    pub const NAME: &'static str = "chain_builder";

    pub async fn run(
        provider: &dyn LlmProvider,
        model: &str,
        normalized_query: &str,
        devices: &BTreeMap<String, DeviceRef>,
        categories: &[String],
        category_mappings: &BTreeMap<String, CategoryMapping>,
    ) -> Result<(ChainSet, TokenTotals)> {
        let device_view: BTreeMap<&String, &String> = devices
            .iter()
            .map(|(name, d)| (name, &d.conical_category))
            .collect();
        let mapping_view: BTreeMap<&String, &Vec<String>> = category_mappings
            .iter()
            .map(|(label, m)| (label, &m.conical_categories))
            .collect();

        let user_prompt = json!({
            "user_query": normalized_query,
            "devices": device_view,
            "categories": categories,
            "category_mappings": mapping_view,
        })
        .to_string();

        let response = provider
            .call_json(BUILDER_SYSTEM_PROMPT, &[ChatMessage::user(user_prompt)], model)
            .await?;

        let chain_set: ChainSet = serde_json::from_value(response.content).unwrap_or_default();
        debug!(
            chains = chain_set.chains_to_check.len(),
            confidence = chain_set.confidence,
            "Chain builder produced chain set"
        );
        Ok((chain_set, response.usage))
    }
}

/// Build category mappings from the catalog for labels the input did not
/// pre-resolve: a label matches a product when it appears among the
/// device's category tags.
pub fn map_device_categories(
    categories: &[String],
    store: &DeviceStore,
) -> BTreeMap<String, CategoryMapping> {
    let mut mappings = BTreeMap::new();

    for label in categories {
        let needle = label.to_lowercase().replace(' ', "_");
        let mut products = std::collections::BTreeSet::new();
        let mut conical = std::collections::BTreeSet::new();

        for device in store.iter() {
            let tag_match = device
                .logic_categories()
                .iter()
                .any(|tag| tag.eq_ignore_ascii_case(&needle))
                || device.category_type.eq_ignore_ascii_case(&needle);
            if tag_match {
                products.insert(device.product_name.clone());
                if !device.conical_category.is_empty() {
                    conical.insert(device.conical_category.clone());
                }
            }
        }

        mappings.insert(
            label.clone(),
            CategoryMapping {
                device_categories: vec![label.clone()],
                conical_categories: conical.into_iter().collect(),
                products: products.into_iter().collect(),
            },
        );
    }
    mappings
}

/// Expand category positions into the Cartesian product of their product
/// names, emitting one concrete path per assignment.
pub fn expand_chains(
    chains: &[ChainConfig],
    category_mappings: &BTreeMap<String, CategoryMapping>,
) -> Vec<ExpandedChain> {
    chains
        .iter()
        .map(|chain| {
            let options: Vec<Vec<String>> = chain
                .sequence
                .iter()
                .map(|position| {
                    match category_mappings.get(position) {
                        Some(mapping) if !mapping.products.is_empty() => mapping.products.clone(),
                        _ => vec![position.clone()],
                    }
                })
                .collect();

            let mut paths = vec![Vec::new()];
            for option_set in &options {
                let mut next = Vec::with_capacity(paths.len() * option_set.len());
                for prefix in &paths {
                    for option in option_set {
                        let mut path = prefix.clone();
                        path.push(option.clone());
                        next.push(path);
                    }
                }
                paths = next;
            }

            ExpandedChain {
                config: chain.clone(),
                paths: paths
                    .into_iter()
                    .map(|sequence| PathSpec {
                        sequence,
                        levels: chain.levels.clone(),
                    })
                    .collect(),
            }
        })
        .collect()
}

/// Make sure every product appearing in an expanded path resolves to variant
/// ids. Products introduced by category expansion get their ids from the
/// catalog's product groups.
pub fn update_devices_lookup(
    devices: &mut BTreeMap<String, DeviceRef>,
    expanded: &[ExpandedChain],
    store: &DeviceStore,
) {
    for chain in expanded {
        for path in &chain.paths {
            for product in &path.sequence {
                if devices.contains_key(product) {
                    continue;
                }
                if let Some(group) = store.group(product) {
                    devices.insert(
                        product.clone(),
                        DeviceRef {
                            ids: group.ids.clone(),
                            conical_category: group.conical_category.clone(),
                        },
                    );
                }
            }
        }
    }
}
