//! End-to-end pipeline tests with a scripted LLM provider.
//!
//! The provider answers each agent from canned JSON keyed off markers in the
//! system prompt, and streams a fixed answer for output agents, so the full
//! orchestrator pipeline runs deterministically with no network.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use medstack_backend::broker::{EventKind, StreamingBroker};
use medstack_backend::catalog::{CompatTriUnit, Device, DeviceSpecs, DeviceStore, FitLogic, TriUnit};
use medstack_backend::config::Config;
use medstack_backend::llm::{
    ChatMessage, Completion, JsonResponse, LlmProvider, StreamChunk, TextStream, ToolSpec,
};
use medstack_backend::models::TokenTotals;
use medstack_backend::orchestrator::Orchestrator;
use medstack_backend::session::SessionState;

const JSON_CALL_USAGE: TokenTotals = TokenTotals {
    input_tokens: 100,
    output_tokens: 10,
};
const STREAM_USAGE: TokenTotals = TokenTotals {
    input_tokens: 50,
    output_tokens: 20,
};

/// Scripted provider: agent responses keyed by system-prompt markers.
struct ScriptedProvider {
    responses: Mutex<BTreeMap<&'static str, Value>>,
    stream_text: String,
    /// (marker, user prompt) per call_json; (marker, user prompt) per stream.
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedProvider {
    fn new(stream_text: &str) -> Self {
        Self {
            responses: Mutex::new(BTreeMap::new()),
            stream_text: stream_text.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with(self, marker: &'static str, response: Value) -> Self {
        self.responses.lock().insert(marker, response);
        self
    }

    fn marker_for(system: &str) -> &'static str {
        if system.contains("INPUT REWRITER") {
            "rewriter"
        } else if system.contains("INTENT CLASSIFIER") {
            "intent"
        } else if system.contains("EQUIPMENT EXTRACTION") {
            "extraction"
        } else if system.contains("CHAIN BUILDER") {
            "builder"
        } else if system.contains("device query classifier") {
            "classifier"
        } else if system.contains("query planner") {
            "planner"
        } else if system.contains("GENERIC DEVICE STRUCTURING") {
            "generic_structuring"
        } else if system.contains("GENERIC PREP") {
            "generic_prep"
        } else if system.contains("QUERY SPEC") {
            "query_spec"
        } else {
            "output"
        }
    }

    fn recorded_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    fn prompt_for(&self, marker: &str) -> Option<String> {
        self.calls
            .lock()
            .iter()
            .find(|(m, _)| m == marker)
            .map(|(_, prompt)| prompt.clone())
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn call(
        &self,
        _system: &str,
        _messages: &[ChatMessage],
        _tools: Option<&[ToolSpec]>,
        _model: &str,
        _max_tokens: u32,
    ) -> Result<Completion> {
        Ok(Completion::Text {
            content: self.stream_text.clone(),
            usage: STREAM_USAGE,
        })
    }

    async fn call_json(
        &self,
        system: &str,
        messages: &[ChatMessage],
        _model: &str,
    ) -> Result<JsonResponse> {
        let marker = Self::marker_for(system);
        let user_prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.calls.lock().push((marker.to_string(), user_prompt));

        let content = self
            .responses
            .lock()
            .get(marker)
            .cloned()
            .unwrap_or_else(|| panic!("no scripted response for agent marker '{marker}'"));
        Ok(JsonResponse {
            content,
            usage: JSON_CALL_USAGE,
        })
    }

    async fn call_stream(
        &self,
        system: &str,
        messages: &[ChatMessage],
        _model: &str,
        _max_tokens: u32,
    ) -> Result<TextStream> {
        let marker = format!("stream:{}", Self::marker_for(system));
        let user_prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.calls.lock().push((marker, user_prompt));

        let words: Vec<String> = self
            .stream_text
            .split_inclusive(' ')
            .map(|w| w.to_string())
            .collect();
        let mut chunks: Vec<Result<StreamChunk>> =
            words.into_iter().map(|w| Ok(StreamChunk::Delta(w))).collect();
        chunks.push(Ok(StreamChunk::Usage(STREAM_USAGE)));
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

// ── Catalog fixtures ──────────────────────────────────────────────

fn device(
    id: &str,
    product: &str,
    conical: &str,
    fit_logic: FitLogic,
    od_in: f64,
    id_in: f64,
    length_cm: f64,
) -> Device {
    Device {
        id: id.to_string(),
        product_name: product.to_string(),
        device_name: product.to_string(),
        manufacturer: "TestMed".to_string(),
        aliases: Vec::new(),
        category_type: "catheter".to_string(),
        conical_category: conical.to_string(),
        logic_category: "catheter".to_string(),
        fit_logic,
        specs: DeviceSpecs {
            inner_diameter: TriUnit {
                inches: (id_in > 0.0).then_some(id_in),
                ..Default::default()
            },
            outer_diameter_distal: TriUnit {
                inches: Some(od_in),
                ..Default::default()
            },
            outer_diameter_proximal: TriUnit {
                inches: Some(od_in),
                ..Default::default()
            },
            length_cm: Some(length_cm),
        },
        compat: Default::default(),
    }
}

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        port: 0,
        catalog_path: String::new(),
        session_db_path: String::new(),
        llm_provider: "openai".to_string(),
        llm_model: Some("test-model".to_string()),
        llm_fast_model: Some("test-model-mini".to_string()),
        openai_api_key: None,
        anthropic_api_key: None,
        vector_store_id: None,
        guideline_store_id: None,
        external_timeout_secs: 30,
    })
}

fn two_device_catalog() -> Arc<DeviceStore> {
    let mut outer = device("nm1", "Neuron MAX", "L0", FitLogic::Compat, 0.108, 0.088, 80.0);
    outer.logic_category = "sheath".to_string();
    Arc::new(DeviceStore::from_devices(vec![
        device("v1", "Vecta 46", "L2", FitLogic::Math, 0.058, 0.046, 132.0),
        outer,
    ]))
}

fn session_with(uid: &str, message: &str) -> SessionState {
    let mut session = SessionState::new(uid, "s1");
    session.push_message("user", message);
    session
}

async fn drain(
    stream: &mut medstack_backend::broker::EventStream,
) -> Vec<medstack_backend::broker::Event> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

fn rewrite_passthrough(query: &str) -> Value {
    json!({"rewritten_user_prompt": query, "source_filter": []})
}

// ── Scenarios ─────────────────────────────────────────────────────

/// Two-device compatibility check end to end: compat NA falls back to
/// geometry, the answer streams as contiguous final chunks, and chain data
/// is surfaced for the device panel.
#[tokio::test]
async fn test_two_device_compat_pass() {
    let query = "Can I use Vecta 46 with Neuron MAX?";
    let provider = Arc::new(
        ScriptedProvider::new("The Vecta 46 fits within the Neuron MAX. ")
            .with("rewriter", rewrite_passthrough(query))
            .with(
                "intent",
                json!({
                    "intents": [{"type": "equipment_compatibility", "confidence": 0.97}],
                    "is_multi_intent": false,
                    "needs_planning": false,
                }),
            )
            .with(
                "extraction",
                json!({
                    "specified_devices": ["Vecta 46", "Neuron MAX"],
                    "device_categories": [],
                    "generic_specs": [],
                    "constraints": [],
                }),
            )
            .with(
                "classifier",
                json!({
                    "query_mode": "specific",
                    "framing": "positive",
                    "structure": "two_device",
                    "sub_type": "COMPATIBILITY_CHECK",
                    "confidence": 0.95,
                }),
            )
            .with(
                "builder",
                json!({
                    "chains_to_check": [
                        {"sequence": ["Vecta 46", "Neuron MAX"], "levels": ["L2", "L0"], "contains_category": false}
                    ],
                    "confidence": 0.95,
                    "interpretation": "Two-device compatibility check",
                }),
            ),
    );

    let orchestrator = Orchestrator::new(
        provider.clone(),
        test_config(),
        two_device_catalog(),
        None,
    );
    let (broker, mut stream) = StreamingBroker::channel();
    let mut session = session_with("u1", query);

    let outcome = orchestrator.run(&mut session, &broker).await.unwrap();
    broker.close().await;
    let events = drain(&mut stream).await;

    // The streamed deltas reassemble into the final text.
    let streamed: String = events
        .iter()
        .filter(|e| e.kind == EventKind::FinalChunk)
        .map(|e| e.data["content"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(streamed, outcome.final_text);
    assert_eq!(outcome.final_text, "The Vecta 46 fits within the Neuron MAX. ");

    // Status events preceded the answer.
    assert!(events.iter().any(|e| e.kind == EventKind::Status));

    // Geometry fallback verdict surfaced in the flat chain data.
    let chain_data = outcome.chain_data.expect("chain data");
    assert_eq!(chain_data.len(), 1);
    assert_eq!(chain_data[0]["overall_status"], "pass");
    assert_eq!(chain_data[0]["logic_type"], "geometry_fallback");

    // Token accounting: rewrite + intent + extraction + classifier +
    // builder (json calls) plus one streamed output call.
    assert_eq!(outcome.usage.total_input_tokens, 5 * 100 + 50);
    assert_eq!(outcome.usage.total_output_tokens, 5 * 10 + 20);

    // The output agent saw the deterministic analysis text, not raw data.
    let output_prompt = provider.prompt_for("stream:output").unwrap();
    assert!(output_prompt.contains("Compatibility Analysis"));
    assert!(output_prompt.contains("COMPATIBLE: Vecta 46 -> Neuron MAX"));
}

/// Unresolved device in a relational intent: no engine runs; the
/// clarification stream carries the misspelled name and the suggestion.
#[tokio::test]
async fn test_relational_clarification_stops_routing() {
    let query = "Can I use Vectaa 46 with Neuron MAX?";
    let provider = Arc::new(
        ScriptedProvider::new("I couldn't find **Vectaa 46** — did you mean **Vecta 46**? ")
            .with("rewriter", rewrite_passthrough(query))
            .with(
                "intent",
                json!({
                    "intents": [{"type": "equipment_compatibility", "confidence": 0.9}],
                    "is_multi_intent": false,
                    "needs_planning": false,
                }),
            )
            .with(
                "extraction",
                json!({
                    "specified_devices": ["Vectaa 46", "Neuron MAX"],
                    "device_categories": [],
                    "generic_specs": [],
                    "constraints": [],
                }),
            ),
    );

    let orchestrator = Orchestrator::new(
        provider.clone(),
        test_config(),
        two_device_catalog(),
        None,
    );
    let (broker, mut stream) = StreamingBroker::channel();
    let mut session = session_with("u1", query);

    let outcome = orchestrator.run(&mut session, &broker).await.unwrap();
    broker.close().await;
    let _ = drain(&mut stream).await;

    // The chain engine never ran: no classifier/builder calls recorded.
    let markers: Vec<String> = provider
        .recorded_calls()
        .iter()
        .map(|(m, _)| m.clone())
        .collect();
    assert!(!markers.contains(&"classifier".to_string()));
    assert!(!markers.contains(&"builder".to_string()));

    // The clarification prompt carried the unresolved name, the resolved
    // device, and a high-scoring suggestion.
    let prompt = provider.prompt_for("stream:output").unwrap();
    assert!(prompt.contains("Devices NOT found: Vectaa 46"));
    assert!(prompt.contains("Devices found in database: Neuron MAX"));
    assert!(prompt.contains("possible matches: Vecta 46"));

    assert!(outcome.final_text.contains("Vecta 46"));
    assert!(outcome.chain_data.is_none());
}

/// Three-device stack where the distal pair fails: decision runs N-1
/// subsets and the passing subset (excluding A) reaches the output agent.
#[tokio::test]
async fn test_stack_failure_runs_n1_subsets() {
    // A's OD is too large for B's ID; B -> C passes.
    let catalog = Arc::new(DeviceStore::from_devices(vec![
        device("a1", "Apex 70", "L3", FitLogic::Math, 0.070, 0.021, 160.0),
        device("b1", "Bridge 46", "L2", FitLogic::Math, 0.058, 0.046, 132.0),
        device("c1", "Canal 88", "L0", FitLogic::Math, 0.110, 0.088, 90.0),
    ]));

    let query = "Will Apex 70, Bridge 46 and Canal 88 work as one stack?";
    let provider = Arc::new(
        ScriptedProvider::new("All three devices cannot be used together. ")
            .with("rewriter", rewrite_passthrough(query))
            .with(
                "intent",
                json!({
                    "intents": [{"type": "equipment_compatibility", "confidence": 0.9}],
                    "is_multi_intent": false,
                    "needs_planning": false,
                }),
            )
            .with(
                "extraction",
                json!({
                    "specified_devices": ["Apex 70", "Bridge 46", "Canal 88"],
                    "device_categories": [],
                    "generic_specs": [],
                    "constraints": [],
                }),
            )
            .with(
                "classifier",
                json!({
                    "query_mode": "stack_validation",
                    "framing": "neutral",
                    "structure": "multi_device",
                    "sub_type": "STACK_VALIDATION",
                    "confidence": 0.92,
                }),
            )
            .with(
                "builder",
                json!({
                    "chains_to_check": [
                        {"sequence": ["Apex 70", "Bridge 46", "Canal 88"], "levels": ["L3", "L2", "L0"], "contains_category": false}
                    ],
                    "confidence": 0.92,
                    "interpretation": "Three-device stack validation",
                }),
            ),
    );

    let orchestrator = Orchestrator::new(provider.clone(), test_config(), catalog, None);
    let (broker, mut stream) = StreamingBroker::channel();
    let mut session = session_with("u1", query);

    let outcome = orchestrator.run(&mut session, &broker).await.unwrap();
    broker.close().await;
    let _ = drain(&mut stream).await;

    // The output agent received the N-1 analysis with the passing subset.
    let prompt = provider.prompt_for("stream:output").unwrap();
    assert!(prompt.contains("N-1 Subset Configurations"), "{prompt}");
    assert!(prompt.contains("Excluding Apex 70: Valid"), "{prompt}");
    assert!(prompt.contains("INVALID CONFIGURATION"), "{prompt}");

    // Failing pairs are present in the flat data.
    let chain_data = outcome.chain_data.expect("chain data");
    assert!(chain_data
        .iter()
        .any(|record| record["overall_status"] == "fail"));
}

/// Planned filter-then-compat: the database step runs without an LLM, its
/// results feed the chain step as a virtual category, and token usage sums
/// across every call.
#[tokio::test]
async fn test_planned_filter_then_compat() {
    let mut filtered_a = device("m1", "Mendel 21", "L3", FitLogic::Math, 0.026, 0.021, 156.0);
    filtered_a.manufacturer = "Medtronic".to_string();
    filtered_a.category_type = "microcatheter".to_string();
    let mut filtered_b = device("m2", "Marathon", "L3", FitLogic::Math, 0.028, 0.013, 165.0);
    filtered_b.manufacturer = "Medtronic".to_string();
    filtered_b.category_type = "microcatheter".to_string();
    let mut other = device("s1", "Summit 21", "L3", FitLogic::Math, 0.026, 0.021, 150.0);
    other.manufacturer = "Stryker".to_string();
    other.category_type = "microcatheter".to_string();
    let atlas = device("at1", "Atlas Stent", "L4", FitLogic::Math, 0.017, 0.0, 200.0);

    let catalog = Arc::new(DeviceStore::from_devices(vec![
        filtered_a, filtered_b, other, atlas,
    ]));

    let query = "What Medtronic microcatheters work with the Atlas Stent?";
    let provider = Arc::new(
        ScriptedProvider::new("Both Medtronic microcatheters accept the Atlas Stent. ")
            .with("rewriter", rewrite_passthrough(query))
            .with(
                "intent",
                json!({
                    "intents": [{"type": "filtered_discovery", "confidence": 0.9}],
                    "is_multi_intent": false,
                    "needs_planning": true,
                }),
            )
            .with(
                "extraction",
                json!({
                    "specified_devices": ["Atlas Stent"],
                    "device_categories": ["microcatheter"],
                    "generic_specs": [],
                    "constraints": [{"field": "manufacturer", "value": "Medtronic"}],
                }),
            )
            .with(
                "planner",
                json!({
                    "strategy": "filter_then_compat",
                    "steps": [
                        {"step_id": "s1", "engine": "database", "action": "filter_by_spec",
                         "category": "microcatheter",
                         "filters": [{"field": "manufacturer", "operator": "contains", "value": "Medtronic"}],
                         "store_as": "filtered_devices"},
                        {"step_id": "s2", "engine": "chain", "action": "compat_check",
                         "inject_devices_from": "s1", "named_devices": ["Atlas Stent"],
                         "store_as": "compat_results"}
                    ],
                    "output_agent": "chain_output_agent",
                }),
            )
            .with(
                "classifier",
                json!({
                    "query_mode": "discovery",
                    "framing": "neutral",
                    "structure": "named_plus_category",
                    "sub_type": "DEVICE_DISCOVERY",
                    "confidence": 0.9,
                }),
            )
            .with(
                "builder",
                json!({
                    "chains_to_check": [
                        {"sequence": ["Atlas Stent", "microcatheter"], "levels": ["L4", "L3"], "contains_category": true}
                    ],
                    "confidence": 0.9,
                    "interpretation": "Stent through filtered microcatheters",
                }),
            ),
    );

    let orchestrator = Orchestrator::new(provider.clone(), test_config(), catalog, None);
    let (broker, mut stream) = StreamingBroker::channel();
    let mut session = session_with("u1", query);

    let outcome = orchestrator.run(&mut session, &broker).await.unwrap();
    broker.close().await;
    let _ = drain(&mut stream).await;

    // The chain step expanded the database results: pairs only against the
    // two Medtronic devices, never the Stryker one.
    let chain_data = outcome.chain_data.expect("chain data");
    let outers: Vec<&str> = chain_data
        .iter()
        .filter_map(|r| r["outer_product"].as_str())
        .collect();
    assert!(outers.contains(&"Mendel 21"));
    assert!(outers.contains(&"Marathon"));
    assert!(!outers.contains(&"Summit 21"));

    // The virtual category came from the database step, so the builder saw
    // the planner's filter category label.
    let builder_prompt = provider.prompt_for("builder").unwrap();
    assert!(builder_prompt.contains("microcatheter"));

    // Usage: rewrite, intent, extraction, planner, classifier, builder
    // (json) + one streamed output.
    assert_eq!(outcome.usage.total_input_tokens, 6 * 100 + 50);
    assert_eq!(outcome.usage.total_output_tokens, 6 * 10 + 20);
}

/// Clinical clarification round trip: turn one parses an incomplete
/// presentation and stores pending context; the follow-up answer is merged
/// with it and assessed without re-asking.
#[tokio::test]
async fn test_clinical_clarification_followup() {
    let provider = Arc::new(
        ScriptedProvider::new("Assessment: the patient meets standard EVT criteria. ")
            .with(
                "rewriter",
                rewrite_passthrough("72yo with left M1 occlusion, eligible for thrombectomy?"),
            )
            .with(
                "intent",
                json!({
                    "intents": [{"type": "clinical_support", "confidence": 0.95}],
                    "is_multi_intent": false,
                    "needs_planning": false,
                }),
            )
            .with(
                "extraction",
                json!({
                    "specified_devices": [],
                    "device_categories": [],
                    "generic_specs": [],
                    "constraints": [],
                }),
            ),
    );

    let orchestrator = Orchestrator::new(
        provider.clone(),
        test_config(),
        two_device_catalog(),
        None,
    );

    // Turn 1: incomplete presentation.
    let (broker, mut stream) = StreamingBroker::channel();
    let mut session = session_with("u1", "72yo with left M1 occlusion, eligible for thrombectomy?");
    let outcome = orchestrator.run(&mut session, &broker).await.unwrap();
    broker.close().await;
    let events = drain(&mut stream).await;

    // Deterministic clarification streamed without an output-agent LLM call.
    assert!(outcome.final_text.contains("NIHSS"));
    assert!(outcome.final_text.contains("Patient data received:"));
    assert!(events.iter().any(|e| e.kind == EventKind::FinalChunk));
    assert!(session.pending_clinical_clarification.is_some());
    assert!(!provider
        .recorded_calls()
        .iter()
        .any(|(m, _)| m == "stream:output"));

    // Turn 2: the clarification answer merges with the pending patient data.
    session.push_message("user", "NIHSS 18, ASPECTS 8, LKW 3 hours");
    let (broker, mut stream) = StreamingBroker::channel();
    let outcome = orchestrator.run(&mut session, &broker).await.unwrap();
    broker.close().await;
    let _ = drain(&mut stream).await;

    assert!(outcome.final_text.contains("EVT"));
    assert!(session.pending_clinical_clarification.is_none());
    let assessment = session.last_clinical_assessment.expect("assessment stored");
    assert_eq!(assessment.patient.nihss, Some(18));
    assert_eq!(assessment.patient.aspects, Some(8));
    assert_eq!(assessment.patient.last_known_well_hours, Some(3.0));
}

/// Length-overrides-compat: a declared-compatible pair still fails overall
/// when the inner device cannot reach past the outer one.
#[tokio::test]
async fn test_length_overrides_declared_compat() {
    let mut inner = device("t1", "Traverse", "L4", FitLogic::Compat, 0.025, 0.0, 100.0);
    inner.compat.catheter_req_id = CompatTriUnit {
        inches: Some("0.021-0.071".to_string()),
        mm: None,
        french: None,
    };
    let mut outer = device("o1", "Outland 70", "L2", FitLogic::Compat, 0.090, 0.070, 130.0);
    outer.logic_category = "catheter".to_string();
    let catalog = Arc::new(DeviceStore::from_devices(vec![inner, outer]));

    let query = "Does the Traverse work through the Outland 70?";
    let provider = Arc::new(
        ScriptedProvider::new("The Traverse is too short for the Outland 70. ")
            .with("rewriter", rewrite_passthrough(query))
            .with(
                "intent",
                json!({
                    "intents": [{"type": "equipment_compatibility", "confidence": 0.9}],
                    "is_multi_intent": false,
                    "needs_planning": false,
                }),
            )
            .with(
                "extraction",
                json!({
                    "specified_devices": ["Traverse", "Outland 70"],
                    "device_categories": [],
                    "generic_specs": [],
                    "constraints": [],
                }),
            )
            .with(
                "classifier",
                json!({
                    "query_mode": "specific",
                    "framing": "positive",
                    "structure": "two_device",
                    "sub_type": "COMPATIBILITY_CHECK",
                    "confidence": 0.9,
                }),
            )
            .with(
                "builder",
                json!({
                    "chains_to_check": [
                        {"sequence": ["Traverse", "Outland 70"], "levels": ["L4", "L2"], "contains_category": false}
                    ],
                    "confidence": 0.9,
                    "interpretation": "Two-device check",
                }),
            ),
    );

    let orchestrator = Orchestrator::new(provider.clone(), test_config(), catalog, None);
    let (broker, mut stream) = StreamingBroker::channel();
    let mut session = session_with("u1", query);

    let outcome = orchestrator.run(&mut session, &broker).await.unwrap();
    broker.close().await;
    let _ = drain(&mut stream).await;

    let chain_data = outcome.chain_data.expect("chain data");
    assert_eq!(chain_data[0]["overall_status"], "fail");
    assert_eq!(chain_data[0]["logic_type"], "compat+length_fail");
}
