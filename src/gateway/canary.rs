//! Canary split for the chat WebSocket route
//!
//! Each new connection draws once against the rollout percentage and sticks
//! with its target for the connection's lifetime. The split is mutable at
//! runtime; every decision reads one consistent snapshot, so a concurrent
//! update can never mix the percentage of one configuration with the URLs of
//! another.

use parking_lot::RwLock;
use rand::Rng;
use tracing::info;

use crate::config::CanaryConfig;

/// Which side of the split a connection landed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cohort {
    /// The new conversation service
    Conversation,
    /// The legacy orchestrator
    Orchestrator,
}

/// A per-connection canary decision
#[derive(Debug, Clone)]
pub struct CanaryChoice {
    /// Assigned cohort
    pub cohort: Cohort,
    /// Target base URL for this connection
    pub target: String,
}

#[derive(Debug, Clone)]
struct CanaryState {
    rollout_percent: u8,
    conversation_url: String,
    orchestrator_url: String,
}

/// Runtime-adjustable traffic split.
#[derive(Debug)]
pub struct CanarySplit {
    state: RwLock<CanaryState>,
}

impl CanarySplit {
    /// Build from configuration.
    #[must_use]
    pub fn from_config(config: &CanaryConfig) -> Self {
        Self {
            state: RwLock::new(CanaryState {
                rollout_percent: config.rollout_percent,
                conversation_url: config.conversation_url.clone(),
                orchestrator_url: config.orchestrator_url.clone(),
            }),
        }
    }

    /// Draw a cohort for a new connection. Called once per connection.
    #[must_use]
    pub fn decide(&self) -> CanaryChoice {
        let draw = rand::thread_rng().gen_range(0..100u8);
        self.decide_with_draw(draw)
    }

    /// Cohort for a given draw in `0..100`. Split out for determinism in
    /// tests.
    #[must_use]
    pub fn decide_with_draw(&self, draw: u8) -> CanaryChoice {
        let state = self.state.read().clone();
        if draw < state.rollout_percent {
            CanaryChoice {
                cohort: Cohort::Conversation,
                target: state.conversation_url,
            }
        } else {
            CanaryChoice {
                cohort: Cohort::Orchestrator,
                target: state.orchestrator_url,
            }
        }
    }

    /// Adjust the rollout percentage at runtime.
    pub fn set_rollout(&self, percent: u8) {
        let percent = percent.min(100);
        self.state.write().rollout_percent = percent;
        info!(rollout_percent = percent, "Canary rollout updated");
    }

    /// Current rollout percentage.
    #[must_use]
    pub fn rollout_percent(&self) -> u8 {
        self.state.read().rollout_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(percent: u8) -> CanarySplit {
        CanarySplit::from_config(&CanaryConfig {
            rollout_percent: percent,
            conversation_url: "ws://conversation:8010".to_string(),
            orchestrator_url: "http://orchestrator:8006".to_string(),
        })
    }

    #[test]
    fn zero_percent_always_legacy() {
        let split = split(0);
        for draw in 0..100 {
            assert_eq!(split.decide_with_draw(draw).cohort, Cohort::Orchestrator);
        }
    }

    #[test]
    fn hundred_percent_always_conversation() {
        let split = split(100);
        for draw in 0..100 {
            assert_eq!(split.decide_with_draw(draw).cohort, Cohort::Conversation);
        }
    }

    #[test]
    fn boundary_draw_equal_to_percent_is_legacy() {
        let split = split(25);
        assert_eq!(split.decide_with_draw(24).cohort, Cohort::Conversation);
        assert_eq!(split.decide_with_draw(25).cohort, Cohort::Orchestrator);
    }

    #[test]
    fn runtime_update_takes_effect() {
        let split = split(0);
        assert_eq!(split.decide_with_draw(10).cohort, Cohort::Orchestrator);
        split.set_rollout(50);
        assert_eq!(split.decide_with_draw(10).cohort, Cohort::Conversation);
        assert_eq!(split.rollout_percent(), 50);
    }

    #[test]
    fn choice_carries_the_matching_target() {
        let split = split(100);
        assert_eq!(split.decide_with_draw(0).target, "ws://conversation:8010");
        split.set_rollout(0);
        assert_eq!(split.decide_with_draw(0).target, "http://orchestrator:8006");
    }
}
