//! Per-user conversation sessions.
//!
//! Cached in memory, persisted as JSON documents, serialized per
//! `(uid, session_id)` by an async lock held across every read-modify-write.

mod store;

pub use store::SessionDb;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::engines::clinical::{CompletenessResult, EligibilityResult, PatientPresentation};
use crate::models::{TurnMessage, UsageLog};

/// Clinical context carried across a clarification turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingClinical {
    pub patient: PatientPresentation,
    pub completeness: CompletenessResult,
    pub original_query: String,
}

/// Snapshot of the most recent completed clinical assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalAssessment {
    pub patient: PatientPresentation,
    pub eligibility: Vec<EligibilityResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokens {
    pub orchestrator: UsageLog,
    pub last_updated: String,
}

/// Mutable per-session state. Owned by the user; one logical writer at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub uid: String,
    pub session_id: String,
    pub created_at: String,
    #[serde(default)]
    pub conversation_history: Vec<TurnMessage>,
    #[serde(default)]
    pub pending_clinical_clarification: Option<PendingClinical>,
    #[serde(default)]
    pub last_clinical_assessment: Option<ClinicalAssessment>,
    #[serde(default)]
    pub generic_insufficient: Vec<Value>,
    #[serde(default)]
    pub tokens: Option<SessionTokens>,
    #[serde(default)]
    pub last_turn_id: Option<String>,
}

impl SessionState {
    pub fn new(uid: &str, session_id: &str) -> Self {
        Self {
            uid: uid.to_string(),
            session_id: session_id.to_string(),
            created_at: Utc::now().to_rfc3339(),
            conversation_history: Vec::new(),
            pending_clinical_clarification: None,
            last_clinical_assessment: None,
            generic_insufficient: Vec::new(),
            tokens: None,
            last_turn_id: None,
        }
    }

    pub fn push_message(&mut self, role: &str, content: &str) {
        self.conversation_history.push(TurnMessage {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        });
    }

    pub fn assistant_turn_count(&self) -> usize {
        self.conversation_history
            .iter()
            .filter(|m| m.role == "assistant")
            .count()
    }
}

type SessionKey = (String, String);

/// Session cache + persistence with per-session mutual exclusion.
pub struct SessionManager {
    db: Arc<SessionDb>,
    cache: Mutex<HashMap<SessionKey, SessionState>>,
    locks: Mutex<HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(db: Arc<SessionDb>) -> Self {
        Self {
            db,
            cache: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn session_lock(&self, uid: &str, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let key = (uid.to_string(), session_id.to_string());
        self.locks
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn create_session(&self, uid: &str) -> String {
        let session_id = Uuid::new_v4().to_string();
        let state = SessionState::new(uid, &session_id);
        self.cache
            .lock()
            .insert((uid.to_string(), session_id.clone()), state);
        session_id
    }

    /// Return cached or persisted state, creating a new session if absent.
    pub async fn get_session(&self, uid: &str, session_id: &str) -> Result<SessionState> {
        let lock = self.session_lock(uid, session_id);
        let _guard = lock.lock().await;

        let key = (uid.to_string(), session_id.to_string());
        if let Some(state) = self.cache.lock().get(&key) {
            return Ok(state.clone());
        }

        if let Some(doc) = self.db.load_session(uid, session_id).await? {
            match serde_json::from_value::<SessionState>(doc) {
                Ok(state) => {
                    self.cache.lock().insert(key, state.clone());
                    return Ok(state);
                }
                Err(e) => {
                    warn!(uid, session_id, error = %e, "Stored session unreadable, starting fresh");
                }
            }
        }

        let state = SessionState::new(uid, session_id);
        self.cache.lock().insert(key, state.clone());
        Ok(state)
    }

    /// Persist atomically and refresh the cache.
    pub async fn save_session(&self, uid: &str, session_id: &str, state: &SessionState) -> Result<()> {
        let lock = self.session_lock(uid, session_id);
        let _guard = lock.lock().await;

        self.cache.lock().insert(
            (uid.to_string(), session_id.to_string()),
            state.clone(),
        );
        let doc = sanitize_keys(&serde_json::to_value(state)?);
        self.db.save_session(uid, session_id, &doc).await
    }

    /// Append one turn record into the session's history subcollection.
    pub async fn save_turn(
        &self,
        uid: &str,
        session_id: &str,
        turn_id: &str,
        record: &Value,
    ) -> Result<()> {
        let record = sanitize_keys(record);
        self.db.save_turn(uid, session_id, turn_id, &record).await
    }

    pub async fn increment_user_tokens(
        &self,
        uid: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<()> {
        self.db
            .increment_user_tokens(uid, input_tokens, output_tokens)
            .await
    }

    pub fn end_session(&self, uid: &str, session_id: &str) {
        let key = (uid.to_string(), session_id.to_string());
        self.cache.lock().remove(&key);
        self.locks.lock().remove(&key);
    }
}

/// Normalize document keys for backend path-segment safety: empty keys
/// become `_empty` and dots become underscores. Idempotent.
pub fn sanitize_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                let key = if key.is_empty() {
                    "_empty".to_string()
                } else {
                    key.replace('.', "_")
                };
                out.insert(key, sanitize_keys(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let db = Arc::new(SessionDb::new(path.to_str().unwrap()).unwrap());
        (dir, SessionManager::new(db))
    }

    #[test]
    fn test_sanitize_keys() {
        let dirty = json!({
            "": {"a.b.c": 1},
            "normal": [{"x.y": 2}],
        });
        let clean = sanitize_keys(&dirty);
        assert_eq!(clean["_empty"]["a_b_c"], 1);
        assert_eq!(clean["normal"][0]["x_y"], 2);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let dirty = json!({"": {"a.b": {"c.d": [1, 2]}}, "k": "v"});
        let once = sanitize_keys(&dirty);
        let twice = sanitize_keys(&once);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_get_creates_missing_session() {
        let (_dir, manager) = manager();
        let state = manager.get_session("u1", "fresh").await.unwrap();
        assert_eq!(state.uid, "u1");
        assert_eq!(state.session_id, "fresh");
        assert!(state.conversation_history.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_reload_from_db() {
        let (_dir, manager) = manager();
        let mut state = manager.get_session("u1", "s1").await.unwrap();
        state.push_message("user", "can I use A with B?");
        manager.save_session("u1", "s1", &state).await.unwrap();

        // Drop the cache entry to force a database read.
        manager.end_session("u1", "s1");
        let reloaded = manager.get_session("u1", "s1").await.unwrap();
        assert_eq!(reloaded.conversation_history.len(), 1);
        assert_eq!(reloaded.conversation_history[0].role, "user");
    }

    #[tokio::test]
    async fn test_concurrent_saves_serialize() {
        let (_dir, manager) = manager();
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for i in 0..8 {
            let m = manager.clone();
            handles.push(tokio::spawn(async move {
                let mut state = m.get_session("u1", "s1").await.unwrap();
                state.push_message("user", &format!("msg {i}"));
                m.save_session("u1", "s1", &state).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Serialized writers mean the final state is one of the saved ones,
        // not a torn mixture; the store must still be readable.
        manager.end_session("u1", "s1");
        let state = manager.get_session("u1", "s1").await.unwrap();
        assert!(!state.conversation_history.is_empty());
    }
}
