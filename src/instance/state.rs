//! Lifecycle state machine of one instance.
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!               |                       ^
//!               +-----------------------+   (process died before it was ready)
//! ```
//!
//! `Starting -> Stopped` is only taken when the process-owner thread could
//! not be created at all.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;

use crate::constants::LIFECYCLE_HISTORY_LEN;

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl LifecycleState {
    /// Whether moving from `self` to `next` is a legal edge.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Running | Self::Stopping | Self::Stopped)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub at: DateTime<Utc>,
}

/// Current state plus a bounded transition history.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: LifecycleState,
    history: VecDeque<Transition>,
}

impl Lifecycle {
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Move to `next`. Same-state moves are ignored; illegal edges are
    /// applied anyway and reported, so the state always mirrors reality.
    pub fn transition(&mut self, instance: &str, next: LifecycleState) {
        let from = self.state;
        if from == next {
            return;
        }
        if from.can_transition_to(next) {
            tracing::debug!(instance = %instance, from = %from, to = %next, "Lifecycle transition");
        } else {
            tracing::warn!(instance = %instance, from = %from, to = %next, "Unexpected lifecycle transition");
        }

        self.state = next;
        if self.history.len() == LIFECYCLE_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(Transition {
            from,
            to: next,
            at: Utc::now(),
        });
    }

    pub fn history(&self) -> Vec<Transition> {
        self.history.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_cycle() {
        use LifecycleState::*;
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
    }

    #[test]
    fn test_skips_are_illegal() {
        use LifecycleState::*;
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Stopped));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
    }

    #[test]
    fn test_history_records_and_ignores_repeats() {
        let mut lifecycle = Lifecycle::default();
        lifecycle.transition("t", LifecycleState::Starting);
        lifecycle.transition("t", LifecycleState::Starting);
        lifecycle.transition("t", LifecycleState::Running);

        let history = lifecycle.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].from, LifecycleState::Starting);
        assert_eq!(lifecycle.state(), LifecycleState::Running);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut lifecycle = Lifecycle::default();
        for _ in 0..LIFECYCLE_HISTORY_LEN {
            lifecycle.transition("t", LifecycleState::Starting);
            lifecycle.transition("t", LifecycleState::Stopped);
        }
        assert_eq!(lifecycle.history().len(), LIFECYCLE_HISTORY_LEN);
    }
}
