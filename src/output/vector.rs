//! Vector output agent: narrates document-search results with source
//! attribution.

use anyhow::Result;

use crate::broker::StreamingBroker;
use crate::engines::vector::VectorData;
use crate::llm::{ChatMessage, LlmProvider};
use crate::models::TokenTotals;

pub const NAME: &str = "vector_output_agent";

const VECTOR_SYSTEM_PROMPT: &str = r#"You are a medical device documentation assistant.

You are given document chunks retrieved from IFU/510(k) filings and clinical
guideline sources. Answer the user's question using ONLY these chunks.

Rules:
1. Ground every claim in the provided chunks; do not add outside knowledge.
2. If the chunks do not answer the question, say so plainly.
3. Quote exact wording for warnings, contraindications, and indications.
4. Note which source type the information came from (IFU vs guidelines)
   when both are present.
5. Be concise; use short paragraphs, not long lists."#;

pub async fn run(
    provider: &dyn LlmProvider,
    model: &str,
    broker: Option<&StreamingBroker>,
    user_query: &str,
    data: &VectorData,
) -> Result<(String, TokenTotals)> {
    let mut chunks_text = String::new();
    for (i, chunk) in data.chunks.iter().enumerate() {
        chunks_text.push_str(&format!(
            "[{} | source={} | score={:.2}]\n{}\n\n",
            i + 1,
            chunk.source,
            chunk.score,
            chunk.text
        ));
    }
    if chunks_text.is_empty() {
        chunks_text = "(no document chunks were retrieved)".to_string();
    }

    let user_prompt = format!(
        "User Question: {user_query}\n\nRetrieved document chunks:\n\n{chunks_text}"
    );

    super::stream_response(
        provider,
        broker,
        NAME,
        VECTOR_SYSTEM_PROMPT,
        &[ChatMessage::user(user_prompt)],
        model,
    )
    .await
}
