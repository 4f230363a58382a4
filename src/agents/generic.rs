//! Generic-device pipeline.
//!
//! Three sequential steps for compat-family intents carrying generic specs
//! (e.g., ".014 wire"): structuring merges fragments that refer to one
//! physical device, prep maps them to database field assignments and flags
//! insufficient inputs, and a pure step builds synthetic records injected
//! into the request-scoped catalog.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::catalog::{parse_catalog_record, Device, DeviceRef, RequestCatalog};
use crate::engines::GenericSpec;
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

const STRUCTURING_SYSTEM_PROMPT: &str = r#"You are the GENERIC DEVICE STRUCTURING agent for a medical device system.

The user mentioned generic device requirements (dimensions without product
names). Merge fragments that describe the SAME physical device and emit one
structured entry per distinct device.

Rules:
- ".014 wire" and "the wire" in one query are the same device.
- Keep the user's raw wording in "raw".
- "device_type" is the generic kind: wire, microcatheter, catheter, sheath.

Return STRICT JSON:
{
    "generic_devices": [
        {"raw": ".014 wire", "device_type": "wire", "mentioned_specs": [{"field": "outer_diameter", "value": ".014", "unit": "inches"}]}
    ]
}"#;

const PREP_SYSTEM_PROMPT: &str = r#"You are the GENERIC PREP agent for a medical device system.

Convert structured generic devices into database field assignments so a
synthetic catalog record can be built. Flag devices whose specs are too
thin to evaluate compatibility.

Database fields you may assign (values are strings):
- conical_category: "L0".."L5" or "LW" for guidewires
- logic_category: space-separated category tags ("wire", "microcatheter", ...)
- specification_outer-diameter-distal_in / _mm / _F
- specification_outer-diameter-proximal_in / _mm / _F
- specification_inner-diameter_in / _mm / _F
- specification_length_cm

Rules:
- A wire with an OD is sufficient (has_info=true).
- A bare category with no dimensions is insufficient (has_info=false).
- Fill every unit you can derive exactly; do not convert between units
  unless the conversion is exact and standard.

Return STRICT JSON:
{
    "devices": [
        {"raw": ".014 wire", "device_type": "wire", "has_info": true, "search_criteria": {"conical_category": "LW", "logic_category": "wire", "specification_outer-diameter-distal_in": "0.014"}}
    ]
}"#;

#[derive(Debug, Clone, Default, Deserialize)]
struct StructuringOutput {
    #[serde(default)]
    generic_devices: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepDevice {
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub has_info: bool,
    #[serde(default)]
    pub search_criteria: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PrepOutput {
    #[serde(default)]
    devices: Vec<PrepDevice>,
}

/// Outcome of the full generic pipeline.
#[derive(Debug, Clone, Default)]
pub struct GenericPipelineResult {
    /// product_name -> resolved reference for the chain engine.
    pub synthetic_devices: std::collections::BTreeMap<String, DeviceRef>,
    /// Devices whose specs were too thin to evaluate.
    pub insufficient_devices: Vec<Value>,
    pub usage: TokenTotals,
}

pub struct GenericPipeline;

impl GenericPipeline {
    pub const STRUCTURING_NAME: &'static str = "generic_device_structuring";
    pub const PREP_NAME: &'static str = "generic_prep";

    pub async fn run(
        provider: &dyn LlmProvider,
        structuring_model: &str,
        prep_model: &str,
        original_question: &str,
        generic_specs: &[GenericSpec],
        uid: &str,
        session_id: &str,
        catalog: &RequestCatalog,
    ) -> Result<GenericPipelineResult> {
        let mut result = GenericPipelineResult::default();

        // Step 1: structure raw fragments (LLM).
        let structuring_prompt = json!({
            "original_question": original_question,
            "generic_specs": generic_specs,
        })
        .to_string();
        let response = provider
            .call_json(
                STRUCTURING_SYSTEM_PROMPT,
                &[ChatMessage::user(structuring_prompt)],
                structuring_model,
            )
            .await?;
        result.usage.add(response.usage);

        let structured: StructuringOutput =
            serde_json::from_value(response.content).unwrap_or_default();
        if structured.generic_devices.is_empty() {
            info!("Generic pipeline: no structured devices, skipping prep");
            return Ok(result);
        }

        // Step 2: map to database fields + sufficiency check (LLM).
        let prep_prompt = json!({
            "original_question": original_question,
            "generic_devices": structured.generic_devices,
        })
        .to_string();
        let response = provider
            .call_json(PREP_SYSTEM_PROMPT, &[ChatMessage::user(prep_prompt)], prep_model)
            .await?;
        result.usage.add(response.usage);

        let prep: PrepOutput = serde_json::from_value(response.content).unwrap_or_default();
        let (sufficient, insufficient): (Vec<_>, Vec<_>) =
            prep.devices.into_iter().partition(|d| d.has_info);
        result.insufficient_devices = insufficient
            .into_iter()
            .map(|d| serde_json::to_value(d).unwrap_or(Value::Null))
            .collect();

        if sufficient.is_empty() {
            info!("Generic pipeline: no devices with sufficient info");
            return Ok(result);
        }

        // Step 3: build synthetic records and inject them (pure).
        for (index, prep_device) in sufficient.iter().enumerate() {
            let device = build_synthetic_record(prep_device, uid, session_id, index);
            let reference = DeviceRef {
                ids: vec![device.id.clone()],
                conical_category: device.conical_category.clone(),
            };
            let product_name = device.product_name.clone();
            catalog.insert_synthetic(device);
            result.synthetic_devices.insert(product_name, reference);
        }

        info!(
            synthetic = result.synthetic_devices.len(),
            insufficient = result.insufficient_devices.len(),
            "Generic pipeline complete"
        );
        Ok(result)
    }
}

/// Construct a synthetic catalog record from prep field assignments,
/// defaulting the fields the agent did not set.
fn build_synthetic_record(
    prep: &PrepDevice,
    uid: &str,
    session_id: &str,
    index: usize,
) -> Device {
    let mut record = prep.search_criteria.clone();

    let uid_part: String = uid.chars().take(4).collect();
    let session_part: String = session_id.chars().take(4).collect();
    let id = format!("{uid_part}{session_part}{index}");

    let display_name = if prep.raw.is_empty() {
        "generic device".to_string()
    } else {
        prep.raw.clone()
    };

    record.entry("product_name".to_string()).or_insert(json!(display_name));
    record
        .entry("device_name".to_string())
        .or_insert(json!(display_name));
    record
        .entry("manufacturer".to_string())
        .or_insert(json!("generic"));
    record
        .entry("category_type".to_string())
        .or_insert(json!(prep.device_type));
    record
        .entry("logic_category".to_string())
        .or_insert(json!(prep.device_type));
    // Synthetic records are judged by dimensional math.
    record.entry("fit_logic".to_string()).or_insert(json!("math"));

    let value = Value::Object(record);
    parse_catalog_record(&id, &value).unwrap_or_else(|_| Device {
        id,
        product_name: display_name.clone(),
        device_name: display_name,
        manufacturer: "generic".to_string(),
        aliases: Vec::new(),
        category_type: prep.device_type.clone(),
        conical_category: String::new(),
        logic_category: prep.device_type.clone(),
        fit_logic: crate::catalog::FitLogic::Math,
        specs: Default::default(),
        compat: Default::default(),
    })
}
