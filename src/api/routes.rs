//! API routes.
//!
//! `POST /chat/stream` accepts `{uid, message, session_id?}` and responds
//! with a Server-Sent Events stream; the orchestrator runs as a background
//! task producing into the broker while the handler drains it. `GET
//! /checker` is the health probe.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event as SseEvent, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use futures_util::stream::Stream;
use serde_json::json;
use tracing::{error, info};

use crate::broker::{Event, StreamingBroker};
use crate::catalog::DeviceStore;
use crate::models::ChatRequest;
use crate::orchestrator::{stream_chain_data, Orchestrator};
use crate::session::SessionManager;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<SessionManager>,
    pub catalog: Arc<DeviceStore>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat/stream", post(chat_stream))
        .route("/checker", get(checker))
        .with_state(state)
}

/// Health check endpoint.
async fn checker() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": VERSION }))
}

/// Main chat endpoint with SSE streaming.
async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let uid = request.uid.clone();
    info!(
        uid = %uid,
        message = %request.message.chars().take(100).collect::<String>(),
        "Incoming message"
    );

    // Load or create the session and append the user turn.
    let session_id = match &request.session_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => state.sessions.create_session(&uid),
    };
    let mut session = state
        .sessions
        .get_session(&uid, &session_id)
        .await
        .unwrap_or_else(|_| crate::session::SessionState::new(&uid, &session_id));
    session.push_message("user", &request.message);

    // Save in the background; don't block orchestrator startup.
    {
        let sessions = state.sessions.clone();
        let uid = uid.clone();
        let session_id = session_id.clone();
        let snapshot = session.clone();
        tokio::spawn(async move {
            if let Err(e) = sessions.save_session(&uid, &session_id, &snapshot).await {
                error!(error = %e, "Background session save failed");
            }
        });
    }

    let (broker, events) = StreamingBroker::channel();

    // Run the orchestrator in the background; it produces into the broker.
    tokio::spawn(run_turn(state, broker, session, uid.clone(), session_id.clone()));

    let stream = async_stream(events, uid, session_id);
    Sse::new(stream)
}

/// Drain broker events into SSE messages, injecting uid/session_id.
fn async_stream(
    events: crate::broker::EventStream,
    uid: String,
    session_id: String,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    futures_util::stream::unfold(
        (events, uid, session_id),
        |(mut events, uid, session_id)| async move {
            let event = events.next().await?;
            let mut payload = serde_json::to_value(&event).unwrap_or(json!({}));
            payload["data"]["uid"] = json!(uid);
            payload["data"]["session_id"] = json!(session_id);
            let sse = SseEvent::default().data(payload.to_string());
            Some((Ok(sse), (events, uid, session_id)))
        },
    )
}

/// Run one full turn: orchestrate, persist, emit completion, close.
async fn run_turn(
    state: AppState,
    broker: StreamingBroker,
    mut session: crate::session::SessionState,
    uid: String,
    session_id: String,
) {
    let result = state.orchestrator.run(&mut session, &broker).await;

    match result {
        Ok(outcome) => {
            session.push_message("assistant", &outcome.final_text);

            // Stream chain device data after the answer, 20 per chunk.
            if let Some(chain_data) = &outcome.chain_data {
                if let Err(e) = stream_chain_data(&broker, chain_data).await {
                    error!(error = %e, "Chain data streaming stopped");
                }
            }

            // Token snapshot onto the session before persisting.
            session.tokens = Some(crate::session::SessionTokens {
                orchestrator: outcome.usage.clone(),
                last_updated: Utc::now().to_rfc3339(),
            });

            let turn_index = session.assistant_turn_count();
            let turn_id = format!("turn_{turn_index}");
            session.last_turn_id = Some(turn_id.clone());

            if let Err(e) = state.sessions.save_session(&uid, &session_id, &session).await {
                error!(error = %e, "Session save failed");
            }
            let turn_record = json!({
                "final_text": outcome.final_text,
                "tool_log": outcome.tool_log,
                "token_usage": outcome.usage,
                "created_at": Utc::now().to_rfc3339(),
            });
            if let Err(e) = state
                .sessions
                .save_turn(&uid, &session_id, &turn_id, &turn_record)
                .await
            {
                error!(error = %e, "Turn record save failed");
            }

            // Fire-and-forget user token ledger increment.
            let totals = outcome.usage.totals();
            if totals.input_tokens > 0 || totals.output_tokens > 0 {
                let sessions = state.sessions.clone();
                let ledger_uid = uid.clone();
                tokio::spawn(async move {
                    if let Err(e) = sessions
                        .increment_user_tokens(
                            &ledger_uid,
                            totals.input_tokens,
                            totals.output_tokens,
                        )
                        .await
                    {
                        error!(error = %e, "User token ledger update failed");
                    }
                });
            }

            let _ = broker
                .put(Event::turn_complete(
                    turn_index,
                    totals.input_tokens,
                    totals.output_tokens,
                ))
                .await;
            broker.close().await;
        }
        Err(e) => {
            error!(error = %e, "Orchestrator failed");
            let trace = format!("{e:?}");
            let _ = broker.put(Event::error(&e.to_string(), Some(&trace))).await;
            broker.close().await;
        }
    }
}
