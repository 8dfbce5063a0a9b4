use std::fmt;

use serde_json::json;
use tryon_contracts::events::{payload, AttemptEvents, EventPayload};

/// Lifecycle of one generation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptState {
    Idle,
    Validating,
    InvalidInput,
    Requesting,
    Succeeded,
    Failed,
}

impl AttemptState {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptState::Idle => "idle",
            AttemptState::Validating => "validating",
            AttemptState::InvalidInput => "invalid_input",
            AttemptState::Requesting => "requesting",
            AttemptState::Succeeded => "succeeded",
            AttemptState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::InvalidInput | AttemptState::Succeeded | AttemptState::Failed
        )
    }

    pub fn can_advance_to(self, next: AttemptState) -> bool {
        matches!(
            (self, next),
            (AttemptState::Idle, AttemptState::Validating)
                | (AttemptState::Validating, AttemptState::InvalidInput)
                | (AttemptState::Validating, AttemptState::Requesting)
                | (AttemptState::Requesting, AttemptState::Succeeded)
                | (AttemptState::Requesting, AttemptState::Failed)
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: AttemptState,
    pub to: AttemptState,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt cannot move from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}

/// Forward-only state tracker that logs each transition.
#[derive(Debug)]
pub struct AttemptTracker {
    state: AttemptState,
    history: Vec<AttemptState>,
    events: Option<AttemptEvents>,
}

impl AttemptTracker {
    pub fn new(events: Option<AttemptEvents>) -> Self {
        Self {
            state: AttemptState::Idle,
            history: vec![AttemptState::Idle],
            events,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn history(&self) -> &[AttemptState] {
        &self.history
    }

    pub fn advance(&mut self, next: AttemptState) -> Result<(), TransitionError> {
        if !self.state.can_advance_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        let from = self.state;
        self.state = next;
        self.history.push(next);
        self.emit(
            "attempt_state",
            payload(json!({
                "from": from.as_str(),
                "to": next.as_str(),
            })),
        );
        Ok(())
    }

    /// Event log writes are best effort; a failed write never fails the attempt.
    pub fn emit(&self, event_type: &str, event: EventPayload) {
        if let Some(events) = &self.events {
            if let Err(err) = events.emit(event_type, event) {
                eprintln!("tryon: event log write failed: {err:#}");
            }
        }
    }
}
