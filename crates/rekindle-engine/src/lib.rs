pub mod inactivity;
pub mod personality;
pub mod selection;
pub mod suggestion;
pub mod summary;

use chrono::{DateTime, Utc};
use rekindle_common::{ChatTurn, SessionId, SessionState};
use rekindle_db::SessionRecord;

pub use inactivity::{InactivityAction, InactivityDecision, decide_inactivity};
pub use personality::{PersonalityCheck, SkipReason, decide_personality_update};
pub use selection::{AgentSelector, PrimaryOnly, RandomSelector, SelectionContext};
pub use suggestion::{
    apply_suggestion, dismiss_suggestion, record_inactivity_check, record_personality_check,
};
pub use summary::{generate_summary, summary_due};

/// Read-only view of one session handed to the decision functions. Built by
/// the caller from the store, so the engine itself never touches persistence.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub message_count: u64,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    /// Most-recent-last window of the conversation.
    pub recent_turns: Vec<ChatTurn>,
    pub state: SessionState,
}

impl SessionSnapshot {
    pub fn from_record(record: &SessionRecord, recent_turns: Vec<ChatTurn>) -> Self {
        Self {
            id: record.id.clone(),
            message_count: record.message_count,
            last_activity_at: record.last_activity_at,
            summary: record.summary.clone(),
            recent_turns,
            state: record.state.clone(),
        }
    }
}
