//! Equipment extraction: pulls device names, categories, generic specs, and
//! attribute constraints from the normalized query, then resolves names
//! against the catalog.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{DeviceRef, DeviceStore, Suggestion};
use crate::engines::{Constraint, GenericSpec};
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are the EQUIPMENT EXTRACTION agent for a medical device compatibility system.

Given a user query about medical devices, extract:
1. **specified_devices**: Exact device names mentioned (e.g., "Vecta 46", "Neuron MAX", "Solitaire")
2. **device_categories**: Generic device type mentions (e.g., "microcatheter", "sheath", "stent retriever")
3. **generic_specs**: Any dimension/spec requirements mentioned (e.g., ".014 wire", ".027 catheter", "6F sheath")
4. **constraints**: Attribute filters that narrow down a category (e.g., manufacturer, material)

Rules:
- Extract device names EXACTLY as the user wrote them
- Do not invent devices not mentioned
- Separate specific device names from generic category mentions
- If a dimension is mentioned with a category (e.g., ".027 microcatheter"), capture both the category and the spec
- If a manufacturer is mentioned as a qualifier for a category (e.g., "Medtronic catheters"), extract it as a constraint
- Do NOT treat manufacturer names as device names — "Medtronic" alone is a constraint, not a device

Common manufacturers: Medtronic, Stryker, MicroVention, Penumbra, Cerenovus, Balt, Phenox, Rapid Medical, Wallaby Medical

Return STRICT JSON:
{
    "specified_devices": ["Device Name 1", "Device Name 2"],
    "device_categories": ["microcatheter", "sheath"],
    "generic_specs": [
        {"category": "wire", "spec": ".014", "unit": "inches", "field": "outer_diameter"}
    ],
    "constraints": [
        {"field": "manufacturer", "value": "Medtronic"}
    ]
}"#;

#[derive(Debug, Clone, Default, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    specified_devices: Vec<String>,
    #[serde(default)]
    device_categories: Vec<String>,
    #[serde(default)]
    generic_specs: Vec<GenericSpec>,
    #[serde(default)]
    constraints: Vec<Constraint>,
}

/// Extraction result with device names resolved against the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub devices: BTreeMap<String, DeviceRef>,
    pub categories: Vec<String>,
    pub generic_specs: Vec<GenericSpec>,
    pub constraints: Vec<Constraint>,
    pub not_found: Vec<String>,
    #[serde(default)]
    pub not_found_suggestions: BTreeMap<String, Vec<Suggestion>>,
}

pub struct EquipmentExtraction;

impl EquipmentExtraction {
    pub const NAME: &'static str = "equipment_extraction";

    pub async fn run(
        provider: &dyn LlmProvider,
        model: &str,
        normalized_query: &str,
        store: &DeviceStore,
    ) -> Result<(ExtractionResult, TokenTotals)> {
        let response = provider
            .call_json(
                EXTRACTION_SYSTEM_PROMPT,
                &[ChatMessage::user(normalized_query)],
                model,
            )
            .await?;

        let raw: RawExtraction = serde_json::from_value(response.content).unwrap_or_default();
        info!(
            devices = raw.specified_devices.len(),
            categories = raw.device_categories.len(),
            generics = raw.generic_specs.len(),
            "Equipment extraction complete"
        );

        let (devices, not_found) = store.resolve_names(&raw.specified_devices);
        if !not_found.is_empty() {
            info!(?not_found, "Extraction: unresolved device names");
        }

        Ok((
            ExtractionResult {
                devices,
                categories: raw.device_categories,
                generic_specs: raw.generic_specs,
                constraints: raw.constraints,
                not_found,
                not_found_suggestions: BTreeMap::new(),
            },
            response.usage,
        ))
    }
}
