use crate::error::InvocationError;
use std::fmt;
use tracing::debug;

/// Stages of one invocation. `Failed` is reachable from every non-terminal
/// stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Idle,
    Collecting,
    Empty,
    Formatting,
    Writing,
    Publishing,
    Acknowledging,
    Done,
    Failed,
}

impl InvocationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationState::Idle => "idle",
            InvocationState::Collecting => "collecting",
            InvocationState::Empty => "empty",
            InvocationState::Formatting => "formatting",
            InvocationState::Writing => "writing",
            InvocationState::Publishing => "publishing",
            InvocationState::Acknowledging => "acknowledging",
            InvocationState::Done => "done",
            InvocationState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvocationState::Done | InvocationState::Failed)
    }

    pub fn can_transition_to(&self, next: InvocationState) -> bool {
        use InvocationState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Idle, Collecting)
            | (Collecting, Empty)
            | (Collecting, Formatting)
            | (Empty, Done)
            | (Formatting, Writing)
            | (Writing, Publishing)
            | (Publishing, Acknowledging)
            | (Acknowledging, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus every state visited so far.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: InvocationState,
    trail: Vec<InvocationState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: InvocationState::Idle,
            trail: vec![InvocationState::Idle],
        }
    }

    pub fn current(&self) -> InvocationState {
        self.current
    }

    pub fn trail(&self) -> &[InvocationState] {
        &self.trail
    }

    pub fn advance(&mut self, next: InvocationState) -> Result<(), InvocationError> {
        if !self.current.can_transition_to(next) {
            return Err(InvocationError::InvalidTransition {
                from: self.current.as_str(),
                to: next.as_str(),
            });
        }
        debug!(from = %self.current, to = %next, "invocation state changed");
        self.current = next;
        self.trail.push(next);
        Ok(())
    }

    /// Moves to `Failed` and returns the stage that failed. Calling it on a
    /// terminal machine leaves the machine untouched.
    pub fn fail(&mut self) -> InvocationState {
        let failed_in = self.current;
        if !failed_in.is_terminal() {
            self.current = InvocationState::Failed;
            self.trail.push(InvocationState::Failed);
        }
        failed_in
    }
}
