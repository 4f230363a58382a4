//! SQLite-backed session document store.
//!
//! Documents mirror the `users/{uid}/chats/{session_id}` path contract:
//! sessions and turn records are JSON blobs keyed by their path segments,
//! and the user token ledger supports atomic increments.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS sessions (
    uid TEXT NOT NULL,
    session_id TEXT NOT NULL,
    state_json TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (uid, session_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS turns (
    uid TEXT NOT NULL,
    session_id TEXT NOT NULL,
    turn_id TEXT NOT NULL,
    record_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (uid, session_id, turn_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS users (
    uid TEXT PRIMARY KEY,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    last_updated TEXT
) WITHOUT ROWID;
"#;

pub struct SessionDb {
    conn: Mutex<Connection>,
}

impl SessionDb {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open session database at {db_path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize session schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub async fn load_session(&self, uid: &str, session_id: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT state_json FROM sessions WHERE uid = ?1 AND session_id = ?2",
                params![uid, session_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load session")?;

        match raw {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Stored session is not valid JSON")?,
            )),
            None => Ok(None),
        }
    }

    pub async fn save_session(&self, uid: &str, session_id: &str, state: &Value) -> Result<()> {
        let json = serde_json::to_string(state)?;
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (uid, session_id, state_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (uid, session_id)
             DO UPDATE SET state_json = excluded.state_json, updated_at = excluded.updated_at",
            params![uid, session_id, json, now],
        )
        .context("Failed to save session")?;
        Ok(())
    }

    pub async fn save_turn(
        &self,
        uid: &str,
        session_id: &str,
        turn_id: &str,
        record: &Value,
    ) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO turns (uid, session_id, turn_id, record_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (uid, session_id, turn_id)
             DO UPDATE SET record_json = excluded.record_json",
            params![uid, session_id, turn_id, json, now],
        )
        .context("Failed to save turn record")?;
        Ok(())
    }

    pub async fn load_turn(
        &self,
        uid: &str,
        session_id: &str,
        turn_id: &str,
    ) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT record_json FROM turns
                 WHERE uid = ?1 AND session_id = ?2 AND turn_id = ?3",
                params![uid, session_id, turn_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load turn record")?;
        Ok(match raw {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    /// Atomic increment of the user-level token counters.
    pub async fn increment_user_tokens(
        &self,
        uid: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (uid, input_tokens, output_tokens, last_updated)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (uid) DO UPDATE SET
                input_tokens = input_tokens + excluded.input_tokens,
                output_tokens = output_tokens + excluded.output_tokens,
                last_updated = excluded.last_updated",
            params![uid, input_tokens as i64, output_tokens as i64, now],
        )
        .context("Failed to increment user token counters")?;
        Ok(())
    }

    pub async fn user_tokens(&self, uid: &str) -> Result<Option<(u64, u64)>> {
        let conn = self.conn.lock();
        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT input_tokens, output_tokens FROM users WHERE uid = ?1",
                params![uid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to read user token counters")?;
        Ok(row.map(|(i, o)| (i as u64, o as u64)))
    }
}
