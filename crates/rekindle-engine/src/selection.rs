//! Picks which agents in a session answer a given user message.

use rand::Rng;
use rekindle_db::AgentRecord;

/// Per-message context the selector may consult.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionContext {
    pub message_count: u64,
}

pub trait AgentSelector: Send + Sync {
    /// Choose the responders for one incoming message, in reply order.
    fn select<'a>(&self, pool: &'a [AgentRecord], ctx: &SelectionContext)
    -> Vec<&'a AgentRecord>;
}

/// Every agent beyond the first responds with an independent probability,
/// so multi-agent sessions feel like a group chat rather than a chorus.
/// At least one agent always answers.
pub struct RandomSelector {
    respond_probability: f64,
}

impl RandomSelector {
    pub fn new(respond_probability: f64) -> Self {
        Self {
            respond_probability: respond_probability.clamp(0.0, 1.0),
        }
    }
}

impl AgentSelector for RandomSelector {
    fn select<'a>(
        &self,
        pool: &'a [AgentRecord],
        _ctx: &SelectionContext,
    ) -> Vec<&'a AgentRecord> {
        if pool.is_empty() {
            return Vec::new();
        }

        let mut rng = rand::rng();
        let mut chosen: Vec<&AgentRecord> = pool
            .iter()
            .filter(|_| rng.random_bool(self.respond_probability))
            .collect();

        if chosen.is_empty() {
            chosen.push(&pool[rng.random_range(0..pool.len())]);
        }
        chosen
    }
}

/// Only the session's first agent ever responds.
pub struct PrimaryOnly;

impl AgentSelector for PrimaryOnly {
    fn select<'a>(
        &self,
        pool: &'a [AgentRecord],
        _ctx: &SelectionContext,
    ) -> Vec<&'a AgentRecord> {
        pool.first().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rekindle_common::AgentId;

    fn pool(n: usize) -> Vec<AgentRecord> {
        (0..n)
            .map(|i| AgentRecord {
                id: AgentId::new(),
                name: format!("agent-{i}"),
                personality_prompt: "Helpful.".to_string(),
                model: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn zero_probability_still_picks_exactly_one() {
        let agents = pool(5);
        let selector = RandomSelector::new(0.0);
        for _ in 0..20 {
            let chosen = selector.select(&agents, &SelectionContext::default());
            assert_eq!(chosen.len(), 1);
        }
    }

    #[test]
    fn full_probability_picks_everyone_in_order() {
        let agents = pool(4);
        let selector = RandomSelector::new(1.0);
        let chosen = selector.select(&agents, &SelectionContext::default());
        assert_eq!(chosen.len(), 4);
        assert_eq!(chosen[0].name, "agent-0");
        assert_eq!(chosen[3].name, "agent-3");
    }

    #[test]
    fn empty_pool_selects_nobody() {
        let selector = RandomSelector::new(1.0);
        assert!(selector.select(&[], &SelectionContext::default()).is_empty());
    }

    #[test]
    fn out_of_range_probability_is_clamped() {
        let agents = pool(3);
        let chosen = RandomSelector::new(7.5).select(&agents, &SelectionContext::default());
        assert_eq!(chosen.len(), 3);
    }

    #[test]
    fn primary_only_picks_the_first_agent() {
        let agents = pool(3);
        let chosen = PrimaryOnly.select(&agents, &SelectionContext::default());
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].name, "agent-0");

        assert!(PrimaryOnly.select(&[], &SelectionContext::default()).is_empty());
    }
}
