//! Events a pipeline publishes while it runs.
//!
//! Consumers subscribe to the session's broadcast channel; every event is
//! keyed by pipeline id, and stage-scoped events carry the stage index.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state::{ExceptionInfo, PipelineState};

/// Identifies one pipeline within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub u64);

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The pipeline moved between lifecycle states.
    StateChanged {
        pipeline: PipelineId,
        from: PipelineState,
        to: PipelineState,
    },
    /// Coalesced status/metadata from one stage.
    Metadata {
        pipeline: PipelineId,
        stage: usize,
        body: serde_json::Value,
    },
    /// A stage failed and the pipeline is stopping.
    Exception {
        pipeline: PipelineId,
        info: ExceptionInfo,
    },
    /// A stage pushed its end-of-stream marker.
    StageComplete { pipeline: PipelineId, stage: usize },
    /// Every stage finished and the final queue is closed.
    Complete { pipeline: PipelineId },
}

impl PipelineEvent {
    pub fn pipeline(&self) -> PipelineId {
        match self {
            PipelineEvent::StateChanged { pipeline, .. }
            | PipelineEvent::Metadata { pipeline, .. }
            | PipelineEvent::Exception { pipeline, .. }
            | PipelineEvent::StageComplete { pipeline, .. }
            | PipelineEvent::Complete { pipeline } => *pipeline,
        }
    }
}
