//! Task lifecycle transition rules

use super::types::TaskStatus;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    #[error("Cannot transition from terminal state {state}")]
    FromTerminalState { state: TaskStatus },
}

pub struct TaskTransition;

impl TaskTransition {
    /// `pending → ready → running → (retrying → running)* → terminal`;
    /// `blocked` and `cancelled` are reachable before any attempt.
    pub fn validate(from: TaskStatus, to: TaskStatus) -> Result<(), TransitionError> {
        use TaskStatus::*;

        if from.is_terminal() {
            return Err(TransitionError::FromTerminalState { state: from });
        }

        let is_valid = matches!(
            (from, to),
            (Pending, Ready)
                | (Pending, Blocked)
                | (Pending, Cancelled)
                | (Ready, Running)
                | (Ready, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Running, Retrying)
                | (Running, Cancelled)
                | (Retrying, Running)
                | (Retrying, Cancelled)
        );

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition { from, to })
        }
    }
}
