//! Pipeline lifecycle states and the legal transition table.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of one pipeline.
///
/// ```text
///   waiting ──▶ executing ──▶ complete ──▶ undone
///                   │
///                   ├──▶ cancelled ──▶ exception
///                   └──▶ exception
/// ```
///
/// `cancelled -> exception` exists for the failure cascade: a failing stage
/// first forces `cancelled` to stop its siblings, then the pipeline settles
/// in `exception`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Waiting,
    Executing,
    Complete,
    Cancelled,
    Exception,
    Undone,
}

impl PipelineState {
    /// Whether `self -> next` is a legal step. Same-state moves are allowed
    /// and treated as no-ops by callers.
    pub fn can_transition(self, next: PipelineState) -> bool {
        use PipelineState::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Waiting, Executing)
                | (Executing, Complete)
                | (Executing, Cancelled)
                | (Executing, Exception)
                | (Cancelled, Exception)
                | (Complete, Undone)
        )
    }

    /// No further execution happens in this state. `Complete` may still
    /// move to `Undone`.
    pub fn is_finished(self) -> bool {
        use PipelineState::*;
        matches!(self, Complete | Cancelled | Exception | Undone)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("illegal pipeline state transition: {from:?} -> {to:?}")]
    IllegalTransition {
        from: PipelineState,
        to: PipelineState,
    },
    #[error("pipeline was already started")]
    AlreadyStarted,
    #[error("pipeline must be complete to undo (currently {0:?})")]
    NotComplete(PipelineState),
    #[error("pipeline is not undoable")]
    NotUndoable,
}

/// What a failed stage left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Error category, e.g. `exec` or `io`.
    pub kind: String,
    pub message: String,
    /// Index of the failing stage.
    pub stage: usize,
    /// Human-oriented context lines, innermost first.
    pub trace: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    #[test]
    fn happy_path_transitions() {
        assert!(Waiting.can_transition(Executing));
        assert!(Executing.can_transition(Complete));
        assert!(Complete.can_transition(Undone));
    }

    #[test]
    fn failure_cascade() {
        assert!(Executing.can_transition(Cancelled));
        assert!(Cancelled.can_transition(Exception));
        assert!(Executing.can_transition(Exception));
    }

    #[test]
    fn same_state_is_legal() {
        for s in [Waiting, Executing, Complete, Cancelled, Exception, Undone] {
            assert!(s.can_transition(s));
        }
    }

    #[test]
    fn invalid_jumps_rejected() {
        assert!(!Waiting.can_transition(Complete));
        assert!(!Complete.can_transition(Executing));
        assert!(!Cancelled.can_transition(Complete));
        assert!(!Undone.can_transition(Executing));
        assert!(!Exception.can_transition(Complete));
        assert!(!Cancelled.can_transition(Undone));
    }

    #[test]
    fn finished_states() {
        assert!(!Waiting.is_finished());
        assert!(!Executing.is_finished());
        assert!(Complete.is_finished());
        assert!(Cancelled.is_finished());
        assert!(Exception.is_finished());
        assert!(Undone.is_finished());
    }
}
