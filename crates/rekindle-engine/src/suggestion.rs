//! State transitions for the personality-suggestion lifecycle. Each helper
//! mutates a [`SessionState`] in place; persisting the result (with conflict
//! detection) is up to the caller.

use chrono::{DateTime, Utc};
use rekindle_common::{AppliedUpdate, PersonalitySuggestion, SessionState};
use tracing::debug;

/// Move a check timestamp forward, never backward. Sweeps and inline checks
/// can race, so a slot only advances when `now` is actually later.
fn advance(slot: &mut Option<DateTime<Utc>>, now: DateTime<Utc>) {
    match slot {
        Some(existing) if *existing >= now => {}
        _ => *slot = Some(now),
    }
}

/// Record the outcome of a personality evaluation. The stored suggestion is
/// replaced wholesale, including negative verdicts, so the state always
/// reflects the single most recent analysis.
pub fn record_personality_check(
    state: &mut SessionState,
    suggestion: PersonalitySuggestion,
    now: DateTime<Utc>,
) {
    state.personality_update_suggestion = Some(suggestion);
    advance(&mut state.last_personality_check, now);
}

/// Record that an inactivity evaluation ran, whatever it decided.
pub fn record_inactivity_check(state: &mut SessionState, now: DateTime<Utc>) {
    advance(&mut state.last_inactivity_check, now);
}

/// Accept the pending suggestion. Returns the audit record to apply to the
/// agent, or `None` when there is nothing actionable: no stored suggestion,
/// a negative verdict, or a positive one with no replacement text.
pub fn apply_suggestion(state: &mut SessionState, now: DateTime<Utc>) -> Option<AppliedUpdate> {
    let pending = state.pending_suggestion()?;
    let personality = pending.suggested_personality.clone()?;
    if personality.trim().is_empty() {
        return None;
    }

    let applied = AppliedUpdate {
        timestamp: now,
        personality,
        reason: pending.reason.clone(),
        confidence: pending.confidence,
    };

    debug!(confidence = applied.confidence, "personality suggestion applied");
    state.personality_update_suggestion = None;
    state.last_personality_update = Some(applied.clone());
    Some(applied)
}

/// Discard the pending suggestion without applying it. Returns whether there
/// was anything to dismiss. Timestamps are left alone so the next scheduled
/// check still happens on its normal cadence.
pub fn dismiss_suggestion(state: &mut SessionState) -> bool {
    if state.pending_suggestion().is_none() {
        return false;
    }
    state.personality_update_suggestion = None;
    true
}
