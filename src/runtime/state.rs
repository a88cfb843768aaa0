use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Lifecycle of a supervised script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    Idle,
    Loading,
    Preprocessing,
    Executing,
    Completed,
    Failed,
    Watching,
}

impl SupervisorState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Idle, Loading)
                | (Idle, Preprocessing)
                | (Idle, Executing)
                | (Idle, Watching)
                | (Loading, Preprocessing)
                | (Loading, Failed)
                | (Preprocessing, Executing)
                | (Preprocessing, Failed)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Watching, Loading)
                | (Completed, Watching)
                | (Failed, Watching)
                | (Completed, Loading)
                | (Completed, Preprocessing)
                | (Failed, Loading)
                | (Failed, Preprocessing)
                | (Completed, Idle)
                | (Failed, Idle)
                | (Watching, Idle)
        )
    }
}

/// Records state changes of one supervisor
#[derive(Debug)]
pub struct StateTracker {
    history: Mutex<Vec<SupervisorState>>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            history: Mutex::new(vec![SupervisorState::Idle]),
        }
    }
}

impl StateTracker {
    pub fn current(&self) -> SupervisorState {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .copied()
            .unwrap_or(SupervisorState::Idle)
    }

    pub fn transition(&self, next: SupervisorState) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let current = history.last().copied().unwrap_or(SupervisorState::Idle);
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            debug!("Unexpected state change {:?} -> {:?}", current, next);
        }
        debug!("Supervisor state: {:?} -> {:?}", current, next);
        history.push(next);
    }

    pub fn history(&self) -> Vec<SupervisorState> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Summary of one completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub script: String,
    pub state: SupervisorState,
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.state == SupervisorState::Completed && self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_run_path_is_legal() {
        use SupervisorState::*;
        let path = [Idle, Loading, Preprocessing, Executing, Completed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
        assert!(!Idle.can_transition_to(Completed));
    }

    #[test]
    fn test_tracker_records_history() {
        let tracker = StateTracker::default();
        tracker.transition(SupervisorState::Loading);
        tracker.transition(SupervisorState::Loading);
        tracker.transition(SupervisorState::Failed);
        assert_eq!(tracker.current(), SupervisorState::Failed);
        assert_eq!(
            tracker.history(),
            vec![
                SupervisorState::Idle,
                SupervisorState::Loading,
                SupervisorState::Failed
            ]
        );
    }
}
