//! [`LifecycleTracker`] – competition state and score.
//!
//! Remembers the last competition state label and the last score, and
//! reports a change only when the new value differs from the previous one.
//! Entering the terminal `"done"` state is reported as the end of the
//! competition once per tracker.

use tracing::warn;

/// Competition state label that marks the end of the run.
pub const DONE_STATE: &str = "done";

/// A change of competition state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    /// `None` for the first state ever observed.
    pub from: Option<String>,
    pub to: String,
    /// Set on the first entry into [`DONE_STATE`] only.
    pub competition_ended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreChangedEvent {
    pub previous: f64,
    pub current: f64,
}

#[derive(Debug, Default)]
pub struct LifecycleTracker {
    state: Option<String>,
    score: f64,
    ended: bool,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    /// `true` once the competition has been reported as ended.
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn on_state_update(&mut self, new_state: &str) -> Option<TransitionEvent> {
        if self.state.as_deref() == Some(new_state) {
            return None;
        }
        let competition_ended = new_state == DONE_STATE && !self.ended;
        if competition_ended {
            self.ended = true;
        }
        let from = self.state.replace(new_state.to_string());
        Some(TransitionEvent {
            from,
            to: new_state.to_string(),
            competition_ended,
        })
    }

    /// Record a score sample.  Non-finite scores are discarded.
    #[allow(clippy::float_cmp)]
    pub fn on_score_update(&mut self, new_score: f64) -> Option<ScoreChangedEvent> {
        if !new_score.is_finite() {
            warn!(score = new_score, "discarding non-finite score");
            return None;
        }
        if new_score == self.score {
            return None;
        }
        let previous = std::mem::replace(&mut self.score, new_score);
        Some(ScoreChangedEvent {
            previous,
            current: new_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_state_emits_once() {
        let mut t = LifecycleTracker::new();
        let first = t.on_state_update("go").unwrap();
        assert_eq!(first.from, None);
        assert_eq!(first.to, "go");
        assert!(!first.competition_ended);
        assert!(t.on_state_update("go").is_none());
        assert_eq!(t.state(), Some("go"));
    }

    #[test]
    fn done_is_reported_once() {
        let mut t = LifecycleTracker::new();
        t.on_state_update("go");

        let ended = t.on_state_update(DONE_STATE).unwrap();
        assert!(ended.competition_ended);
        assert_eq!(ended.from.as_deref(), Some("go"));
        assert!(t.on_state_update(DONE_STATE).is_none());

        // Leaving and re-entering "done" is a transition but not a second end.
        assert!(t.on_state_update("init").is_some());
        let again = t.on_state_update(DONE_STATE).unwrap();
        assert!(!again.competition_ended);
        assert!(t.has_ended());
    }

    #[test]
    fn score_starts_at_zero() {
        let mut t = LifecycleTracker::new();
        assert!(t.on_score_update(0.0).is_none());

        let change = t.on_score_update(3.0).unwrap();
        assert_eq!(change, ScoreChangedEvent { previous: 0.0, current: 3.0 });
        assert!(t.on_score_update(3.0).is_none());
    }

    #[test]
    fn non_finite_scores_are_discarded() {
        let mut t = LifecycleTracker::new();
        t.on_score_update(2.0);
        assert!(t.on_score_update(f64::NAN).is_none());
        assert!(t.on_score_update(f64::INFINITY).is_none());
        assert_eq!(t.score(), 2.0);
    }
}
