/// Schema migrations, applied in order when a store opens.
///
/// Each migration has a version number and a SQL batch.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const SESSION_SCHEMA_V1: Migration = Migration {
    version: 1,
    name: "initial_schema",
    sql: "CREATE TABLE IF NOT EXISTS agents (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              personality_prompt TEXT NOT NULL DEFAULT '',
              model TEXT,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
          );

          CREATE TABLE IF NOT EXISTS sessions (
              id TEXT PRIMARY KEY,
              agent_id TEXT NOT NULL REFERENCES agents(id),
              started_at TEXT NOT NULL,
              last_activity_at TEXT,
              message_count INTEGER NOT NULL DEFAULT 0,
              summary TEXT,
              state TEXT NOT NULL DEFAULT '{}',
              state_version INTEGER NOT NULL DEFAULT 0
          );

          CREATE TABLE IF NOT EXISTS session_agents (
              session_id TEXT NOT NULL REFERENCES sessions(id),
              agent_id TEXT NOT NULL REFERENCES agents(id),
              PRIMARY KEY (session_id, agent_id)
          );

          CREATE TABLE IF NOT EXISTS messages (
              id TEXT PRIMARY KEY,
              session_id TEXT NOT NULL REFERENCES sessions(id),
              role TEXT NOT NULL,
              content TEXT NOT NULL,
              timestamp TEXT NOT NULL
          );

          CREATE INDEX IF NOT EXISTS idx_messages_session
              ON messages(session_id, timestamp);",
};
