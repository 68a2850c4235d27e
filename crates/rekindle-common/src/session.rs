use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Current version of the persisted session-state layout. Bump when a field
/// changes meaning so old scheduler versions can't silently drift the shape.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Transient per-session state persisted as a JSON column: last-check
/// timestamps and the pending personality suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,

    #[serde(default)]
    pub last_inactivity_check: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_personality_check: Option<DateTime<Utc>>,

    /// Result of the most recent personality evaluation, including negative
    /// ones. Replaced wholesale on every check; never merged.
    #[serde(default)]
    pub personality_update_suggestion: Option<PersonalitySuggestion>,

    /// Audit record of the last applied personality update.
    #[serde(default)]
    pub last_personality_update: Option<AppliedUpdate>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            last_inactivity_check: None,
            last_personality_check: None,
            personality_update_suggestion: None,
            last_personality_update: None,
        }
    }
}

impl SessionState {
    /// Parse persisted state, degrading to a fresh default when the stored
    /// JSON does not match the expected shape.
    pub fn from_json(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(state) => state,
            Err(e) => {
                warn!("unreadable session state, resetting: {e}");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The suggestion awaiting user approval, if any. Negative evaluations
    /// are stored but not considered pending.
    pub fn pending_suggestion(&self) -> Option<&PersonalitySuggestion> {
        self.personality_update_suggestion
            .as_ref()
            .filter(|s| s.should_update)
    }
}

/// A proposed personality-prompt change awaiting user approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalitySuggestion {
    pub should_update: bool,
    pub reason: String,
    pub suggested_personality: Option<String>,
    pub confidence: f64,
}

impl PersonalitySuggestion {
    /// A negative decision carrying only an explanation.
    pub fn no_op(reason: impl Into<String>) -> Self {
        Self {
            should_update: false,
            reason: reason.into(),
            suggested_personality: None,
            confidence: 0.0,
        }
    }

    pub fn clamp_confidence(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedUpdate {
    pub timestamp: DateTime<Utc>,
    pub personality: String,
    pub reason: String,
    pub confidence: f64,
}

fn current_schema_version() -> u32 {
    STATE_SCHEMA_VERSION
}
