use chrono::{DateTime, NaiveDateTime, Utc};
use rekindle_common::{AgentId, ChatTurn, Error, Result, Role, SessionId, SessionState};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::migrations::SESSION_SCHEMA_V1;

/// Persistent storage for agents, conversation sessions, and message history.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: AgentId,
    pub name: String,
    pub personality_prompt: String,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAgent {
    pub name: String,
    pub personality_prompt: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: SessionId,
    pub agent_id: AgentId,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub summary: Option<String>,
    pub state: SessionState,
    /// Optimistic concurrency token for `state`; bumped on every write.
    pub state_version: i64,
}

impl SessionStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening session store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(SESSION_SCHEMA_V1.sql)
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;

        Ok(())
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("session database lock poisoned".into()))
    }

    // --- Agents ---

    pub fn create_agent(&self, agent: NewAgent) -> Result<AgentRecord> {
        let id = AgentId::new();
        let now = Utc::now();

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO agents (id, name, personality_prompt, model, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                id.as_str(),
                agent.name,
                agent.personality_prompt,
                agent.model,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Database(format!("failed to insert agent: {e}")))?;

        Ok(AgentRecord {
            id,
            name: agent.name,
            personality_prompt: agent.personality_prompt,
            model: agent.model,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_agent(&self, id: &AgentId) -> Result<AgentRecord> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, name, personality_prompt, model, created_at, updated_at
             FROM agents WHERE id = ?",
            params![id.as_str()],
            row_to_agent,
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to query agent: {e}")))?
        .ok_or_else(|| Error::NotFound(format!("agent {id}")))
    }

    pub fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, personality_prompt, model, created_at, updated_at
                 FROM agents
                 ORDER BY datetime(created_at)",
            )
            .map_err(|e| Error::Database(format!("failed to prepare agent listing: {e}")))?;

        let rows = stmt
            .query_map([], row_to_agent)
            .map_err(|e| Error::Database(format!("failed to list agents: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read agent row: {e}")))
    }

    pub fn set_agent_personality(&self, id: &AgentId, personality_prompt: &str) -> Result<()> {
        let conn = self.connection()?;
        let updated = conn
            .execute(
                "UPDATE agents SET personality_prompt = ?, updated_at = ? WHERE id = ?",
                params![personality_prompt, Utc::now().to_rfc3339(), id.as_str()],
            )
            .map_err(|e| Error::Database(format!("failed to update agent personality: {e}")))?;

        if updated == 0 {
            return Err(Error::NotFound(format!("agent {id}")));
        }
        Ok(())
    }

    // --- Sessions ---

    pub fn create_session(&self, agent_id: &AgentId) -> Result<SessionRecord> {
        let id = SessionId::new();
        let now = Utc::now();
        let state = SessionState::default();

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO sessions (id, agent_id, started_at, state)
             VALUES (?, ?, ?, ?)",
            params![
                id.as_str(),
                agent_id.as_str(),
                now.to_rfc3339(),
                state.to_json()?,
            ],
        )
        .map_err(|e| Error::Database(format!("failed to insert session: {e}")))?;

        Ok(SessionRecord {
            id,
            agent_id: agent_id.clone(),
            started_at: now,
            last_activity_at: None,
            message_count: 0,
            summary: None,
            state,
            state_version: 0,
        })
    }

    pub fn get_session(&self, id: &SessionId) -> Result<SessionRecord> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, agent_id, started_at, last_activity_at, message_count,
                    summary, state, state_version
             FROM sessions WHERE id = ?",
            params![id.as_str()],
            row_to_session,
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to query session: {e}")))?
        .ok_or_else(|| Error::NotFound(format!("session {id}")))
    }

    /// Sessions with at least one recorded activity, the sweep population.
    pub fn list_active_sessions(&self) -> Result<Vec<SessionRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, agent_id, started_at, last_activity_at, message_count,
                        summary, state, state_version
                 FROM sessions
                 WHERE last_activity_at IS NOT NULL
                 ORDER BY datetime(last_activity_at) DESC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare session query: {e}")))?;

        let rows = stmt
            .query_map([], row_to_session)
            .map_err(|e| Error::Database(format!("failed to list sessions: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to collect session rows: {e}")))
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, agent_id, started_at, last_activity_at, message_count,
                        summary, state, state_version
                 FROM sessions
                 ORDER BY datetime(started_at) DESC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare session query: {e}")))?;

        let rows = stmt
            .query_map([], row_to_session)
            .map_err(|e| Error::Database(format!("failed to list sessions: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to collect session rows: {e}")))
    }

    pub fn set_summary(&self, id: &SessionId, summary: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE sessions SET summary = ? WHERE id = ?",
            params![summary, id.as_str()],
        )
        .map_err(|e| Error::Database(format!("failed to update summary: {e}")))?;
        Ok(())
    }

    // --- Session agent pool ---

    pub fn add_session_agent(&self, session_id: &SessionId, agent_id: &AgentId) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR IGNORE INTO session_agents (session_id, agent_id) VALUES (?, ?)",
            params![session_id.as_str(), agent_id.as_str()],
        )
        .map_err(|e| Error::Database(format!("failed to add session agent: {e}")))?;
        Ok(())
    }

    /// Agents pooled on a session, in insertion order. Empty when the session
    /// runs with its primary agent only.
    pub fn session_agents(&self, session_id: &SessionId) -> Result<Vec<AgentRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT a.id, a.name, a.personality_prompt, a.model, a.created_at, a.updated_at
                 FROM session_agents sa
                 JOIN agents a ON a.id = sa.agent_id
                 WHERE sa.session_id = ?
                 ORDER BY a.rowid",
            )
            .map_err(|e| Error::Database(format!("failed to prepare agent pool query: {e}")))?;

        let rows = stmt
            .query_map(params![session_id.as_str()], row_to_agent)
            .map_err(|e| Error::Database(format!("failed to query agent pool: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to collect agent rows: {e}")))
    }

    // --- Messages ---

    /// Insert a turn and advance the session's message count and activity
    /// timestamp. `last_activity_at` never moves backwards.
    pub fn append_turn(&self, turn: &ChatTurn) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO messages (id, session_id, role, content, timestamp)
             VALUES (?, ?, ?, ?, ?)",
            params![
                turn.id,
                turn.session_id.as_str(),
                turn.role.as_str(),
                turn.content,
                turn.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Database(format!("failed to insert message: {e}")))?;

        let updated = conn
            .execute(
                "UPDATE sessions
                 SET message_count = message_count + 1,
                     last_activity_at = CASE
                         WHEN last_activity_at IS NULL
                              OR datetime(last_activity_at) < datetime(?1)
                         THEN ?1 ELSE last_activity_at END
                 WHERE id = ?2",
                params![turn.timestamp.to_rfc3339(), turn.session_id.as_str()],
            )
            .map_err(|e| Error::Database(format!("failed to touch session: {e}")))?;

        if updated == 0 {
            return Err(Error::NotFound(format!("session {}", turn.session_id)));
        }
        Ok(())
    }

    /// The last `n` turns of a session, most-recent-last.
    pub fn recent_turns(&self, session_id: &SessionId, n: usize) -> Result<Vec<ChatTurn>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, role, content, timestamp
                 FROM messages
                 WHERE session_id = ?
                 ORDER BY datetime(timestamp) DESC, rowid DESC
                 LIMIT ?",
            )
            .map_err(|e| Error::Database(format!("failed to prepare message query: {e}")))?;

        let rows = stmt
            .query_map(params![session_id.as_str(), n as i64], row_to_turn)
            .map_err(|e| Error::Database(format!("failed to query messages: {e}")))?;

        let mut turns = rows
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to collect message rows: {e}")))?;
        turns.reverse();
        Ok(turns)
    }

    // --- Session state ---

    /// Compare-and-swap write of the session state blob. Returns `false`
    /// when another writer got there first; the caller should reload and
    /// decide whether to retry or drop its update.
    pub fn store_state(
        &self,
        session_id: &SessionId,
        state: &SessionState,
        expected_version: i64,
    ) -> Result<bool> {
        let json = state.to_json()?;
        let conn = self.connection()?;
        let updated = conn
            .execute(
                "UPDATE sessions
                 SET state = ?, state_version = state_version + 1
                 WHERE id = ? AND state_version = ?",
                params![json, session_id.as_str(), expected_version],
            )
            .map_err(|e| Error::Database(format!("failed to store session state: {e}")))?;

        Ok(updated == 1)
    }
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRecord> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;

    Ok(AgentRecord {
        id: AgentId::from_str(id),
        name: row.get(1)?,
        personality_prompt: row.get(2)?,
        model: row.get(3)?,
        created_at: parse_timestamp_sql(&created_at, 4)?,
        updated_at: parse_timestamp_sql(&updated_at, 5)?,
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    let id: String = row.get(0)?;
    let agent_id: String = row.get(1)?;
    let started_at: String = row.get(2)?;
    let last_activity_at: Option<String> = row.get(3)?;
    let message_count: i64 = row.get(4)?;
    let state_json: String = row.get(6)?;

    let last_activity_at = last_activity_at
        .as_deref()
        .map(|raw| parse_timestamp_sql(raw, 3))
        .transpose()?;

    Ok(SessionRecord {
        id: SessionId::from_str(id),
        agent_id: AgentId::from_str(agent_id),
        started_at: parse_timestamp_sql(&started_at, 2)?,
        last_activity_at,
        message_count: message_count.max(0) as u64,
        summary: row.get(5)?,
        state: SessionState::from_json(&state_json),
        state_version: row.get(7)?,
    })
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatTurn> {
    let session_id: String = row.get(1)?;
    let role_str: String = row.get(2)?;
    let timestamp: String = row.get(4)?;

    let role = Role::parse(&role_str).ok_or_else(|| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(format!(
            "unknown message role: {role_str}"
        ))))
    })?;

    Ok(ChatTurn {
        id: row.get(0)?,
        session_id: SessionId::from_str(session_id),
        role,
        content: row.get(3)?,
        timestamp: parse_timestamp_sql(&timestamp, 4)?,
    })
}

fn parse_timestamp_sql(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_timestamp(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::other(e.to_string())),
        )
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }

    Err(Error::Database(format!("invalid timestamp format: {raw}")))
}
