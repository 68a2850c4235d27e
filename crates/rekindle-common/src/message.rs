use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::SessionId;

/// A single turn in a conversation. Immutable once created; ordering by
/// timestamp defines conversation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: String,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

impl ChatTurn {
    pub fn user(session_id: SessionId, content: impl Into<String>) -> Self {
        Self::new(session_id, Role::User, content, Utc::now())
    }

    pub fn assistant(session_id: SessionId, content: impl Into<String>) -> Self {
        Self::new(session_id, Role::Assistant, content, Utc::now())
    }

    pub fn new(
        session_id: SessionId,
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id,
            role,
            content: content.into(),
            timestamp,
        }
    }
}
