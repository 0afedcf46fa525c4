//! Step and pipeline state machines

use crate::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one step within one traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
    Pending,

    /// Output taken from the result store
    Resolved,
    Running,
    Succeeded,
    Failed,

    /// The analyser dropped the element
    Skipped,
}

impl StepState {
    pub fn can_transition_to(self, next: StepState) -> bool {
        use StepState::*;
        matches!(
            (self, next),
            (Pending, Resolved)
                | (Pending, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Skipped)
        )
    }

    /// Whether the step produced an output element
    pub fn is_done(self) -> bool {
        matches!(self, StepState::Resolved | StepState::Succeeded)
    }

    pub fn advance(&mut self, next: StepState) -> Result<(), OrchestratorError> {
        if !self.can_transition_to(next) {
            return Err(OrchestratorError::IllegalTransition {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Lifecycle of a pipeline, also used per traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Composing,
    Ready,
    Executing,
    Completed,
    Aborted,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Composing, Ready) | (Ready, Executing) | (Executing, Completed) | (Executing, Aborted)
        )
    }

    pub fn advance(&mut self, next: PipelineState) -> Result<(), OrchestratorError> {
        if !self.can_transition_to(next) {
            return Err(OrchestratorError::IllegalTransition {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
