//! Output agents: format engine results into the user-facing response and
//! stream it token by token through the broker.

pub mod chain;
pub mod clarification;
pub mod clinical;
pub mod database;
pub mod general;
pub mod synthesis;
pub mod vector;

use anyhow::Result;
use futures_util::StreamExt;

use crate::broker::{Event, StreamingBroker};
use crate::llm::{ChatMessage, LlmProvider, StreamChunk, DEFAULT_MAX_TOKENS};
use crate::models::TokenTotals;

/// Stream an LLM response as `final_chunk` events, returning the full text
/// and usage. Without a broker this degrades to a plain completion.
pub async fn stream_response(
    provider: &dyn LlmProvider,
    broker: Option<&StreamingBroker>,
    agent_name: &str,
    system: &str,
    messages: &[ChatMessage],
    model: &str,
) -> Result<(String, TokenTotals)> {
    let Some(broker) = broker else {
        let completion = provider
            .call(system, messages, None, model, DEFAULT_MAX_TOKENS)
            .await?;
        return Ok((completion.text().to_string(), completion.usage()));
    };

    let mut stream = provider
        .call_stream(system, messages, model, DEFAULT_MAX_TOKENS)
        .await?;

    let mut final_text = String::new();
    let mut usage = TokenTotals::default();

    while let Some(chunk) = stream.next().await {
        match chunk? {
            StreamChunk::Delta(delta) => {
                final_text.push_str(&delta);
                // A closed broker means the client went away; stop promptly.
                broker.put(Event::final_chunk(agent_name, &delta)).await?;
            }
            StreamChunk::Usage(totals) => usage = totals,
        }
    }

    Ok((final_text, usage))
}

/// Stream a device list to the client in fixed-size chunks.
pub async fn stream_device_chunks(
    broker: &StreamingBroker,
    kind: crate::broker::EventKind,
    agent_name: &str,
    devices: &[serde_json::Value],
    chunk_size: usize,
) -> Result<()> {
    let total = devices.len();
    for (index, chunk) in devices.chunks(chunk_size).enumerate() {
        let is_final = (index + 1) * chunk_size >= total;
        broker
            .put(Event::device_chunk(
                kind,
                agent_name,
                chunk,
                index + 1,
                total,
                is_final,
            ))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::EventKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_device_chunking_at_twenty() {
        let (broker, mut stream) = StreamingBroker::channel();
        let devices: Vec<serde_json::Value> =
            (0..45).map(|i| json!({"id": i.to_string()})).collect();

        stream_device_chunks(&broker, EventKind::QueryResultDeviceChunk, "db", &devices, 20)
            .await
            .unwrap();
        broker.close().await;

        let mut chunks = Vec::new();
        while let Some(event) = stream.next().await {
            chunks.push(event);
        }
        assert_eq!(chunks.len(), 3);

        let info = &chunks[0].data["chunk_info"];
        assert_eq!(info["chunk_number"], 1);
        assert_eq!(info["chunk_size"], 20);
        assert_eq!(info["total_devices"], 45);
        assert_eq!(info["is_final_chunk"], false);

        let last = &chunks[2].data["chunk_info"];
        assert_eq!(last["chunk_size"], 5);
        assert_eq!(last["is_final_chunk"], true);
    }
}
