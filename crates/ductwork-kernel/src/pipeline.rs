//! Pipeline runtime: stage scheduling, the state machine, cancel, undo.
//!
//! ```text
//!   waiting ──▶ executing ──▶ complete ──▶ undone
//!                   │
//!                   ├──▶ cancelled ──▶ exception
//!                   └──▶ exception
//! ```
//!
//! Execution negotiates transport formats between adjacent stages, then
//! starts every stage in order: `threaded` stages go to the worker pool,
//! inline stages run to completion on the driving task before later stages
//! start (so a cwd change cannot race a reader). A failing stage first
//! forces `cancelled` — stopping its siblings through contexts and queue
//! sentinels — and then settles the pipeline in `exception` with structured
//! info. Synchronous execution re-raises the failure to the caller instead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::{broadcast, Notify};

use ductwork_types::{
    ExceptionInfo, Locality, PipelineEvent, PipelineId, PipelineState, StateError, Typespec,
};

use crate::command::Command;
use crate::context::UndoFn;
use crate::error::{EngineError, ExecError};
use crate::pool::WorkerPool;
use crate::transport::TransportQueue;

/// Everything the builder hands over to construct a [`Pipeline`].
pub(crate) struct PipelineParts {
    pub id: PipelineId,
    pub source: String,
    pub components: Vec<Arc<Command>>,
    pub input_type: Option<Typespec>,
    pub input_optional: bool,
    pub output_type: Option<Typespec>,
    pub locality: Option<Locality>,
    pub idempotent: bool,
    pub undoable: bool,
    pub singlevalue: bool,
    pub undo_stack: Arc<Mutex<Vec<UndoFn>>>,
    pub events: broadcast::Sender<PipelineEvent>,
}

/// An ordered sequence of stages connected by typed queues.
pub struct Pipeline {
    id: PipelineId,
    source: String,
    components: Vec<Arc<Command>>,
    input_type: Option<Typespec>,
    input_optional: bool,
    output_type: Option<Typespec>,
    locality: Option<Locality>,
    idempotent: bool,
    undoable: bool,
    singlevalue: bool,
    state: Mutex<PipelineState>,
    undo_stack: Arc<Mutex<Vec<UndoFn>>>,
    exception: Mutex<Option<ExceptionInfo>>,
    completion_time: Mutex<Option<SystemTime>>,
    events: broadcast::Sender<PipelineEvent>,
    remaining: AtomicUsize,
    settled: Notify,
}

impl Pipeline {
    pub(crate) fn from_parts(parts: PipelineParts) -> Self {
        let remaining = parts.components.len();
        Self {
            id: parts.id,
            source: parts.source,
            components: parts.components,
            input_type: parts.input_type,
            input_optional: parts.input_optional,
            output_type: parts.output_type,
            locality: parts.locality,
            idempotent: parts.idempotent,
            undoable: parts.undoable,
            singlevalue: parts.singlevalue,
            state: Mutex::new(PipelineState::Waiting),
            undo_stack: parts.undo_stack,
            exception: Mutex::new(None),
            completion_time: Mutex::new(None),
            events: parts.events,
            remaining: AtomicUsize::new(remaining),
            settled: Notify::new(),
        }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// The text (or reconstructed text) this pipeline was built from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn components(&self) -> &[Arc<Command>] {
        &self.components
    }

    pub fn input_type(&self) -> Option<&Typespec> {
        self.input_type.as_ref()
    }

    pub fn input_optional(&self) -> bool {
        self.input_optional
    }

    pub fn output_type(&self) -> Option<&Typespec> {
        self.output_type.as_ref()
    }

    pub fn locality(&self) -> Option<Locality> {
        self.locality
    }

    pub fn idempotent(&self) -> bool {
        self.idempotent
    }

    pub fn undoable(&self) -> bool {
        self.undoable
    }

    pub fn singlevalue(&self) -> bool {
        self.singlevalue
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Structured info left behind by a failed stage.
    pub fn exception(&self) -> Option<ExceptionInfo> {
        self.exception
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn completion_time(&self) -> Option<SystemTime> {
        *self.completion_time.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The final stage's queue — what an external consumer drains.
    pub fn output_queue(&self) -> Arc<TransportQueue> {
        self.components
            .last()
            .expect("a pipeline has at least one stage")
            .output_queue()
    }

    /// Start every stage, scheduling threaded ones on `pool` and running
    /// inline ones to completion in order. Returns as soon as all stages
    /// are started; progress is observable through events and queues.
    ///
    /// `consumer_formats` are the external consumer's accepted optimized
    /// transport formats, negotiated against the final stage's offer.
    #[tracing::instrument(skip(self, pool, consumer_formats), fields(pipeline = %self.id))]
    pub async fn execute(
        self: &Arc<Self>,
        pool: &WorkerPool,
        consumer_formats: &[String],
    ) -> Result<(), StateError> {
        self.begin()?;
        self.negotiate(consumer_formats);

        for (stage, command) in self.components.iter().enumerate() {
            let input = self.input_for(stage);
            if command.descriptor().threaded {
                let pipeline = self.clone();
                let command = command.clone();
                pool.submit(async move {
                    let result = command.run(input).await;
                    pipeline.stage_finished(stage, result);
                });
            } else {
                let result = command.run(input).await;
                self.stage_finished(stage, result);
                if self.state() != PipelineState::Executing {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Run every stage sequentially on the caller's task, re-raising the
    /// first stage failure instead of capturing it.
    #[tracing::instrument(skip(self), fields(pipeline = %self.id))]
    pub async fn execute_sync(self: &Arc<Self>) -> Result<(), EngineError> {
        self.begin()?;
        self.negotiate(&[]);

        for (stage, command) in self.components.iter().enumerate() {
            let input = self.input_for(stage);
            match command.run(input).await {
                Ok(()) => self.stage_finished(stage, Ok(())),
                Err(err) => {
                    let info = self.fail(stage, err);
                    return Err(ExecError::Stage(info).into());
                }
            }
        }
        Ok(())
    }

    /// Cancel a running pipeline. A no-op in any state but `Executing`;
    /// calling it twice has the same observable effect as once.
    pub fn cancel(&self) {
        if !self.transition(PipelineState::Cancelled) {
            return;
        }
        tracing::debug!(pipeline = %self.id, "cancelling stages");
        self.cancel_stages();
    }

    /// Run the pushed undo closures in registration order, then settle in
    /// `Undone`. Legal only after `Complete`.
    pub async fn undo(&self) -> Result<(), StateError> {
        if !self.undoable {
            return Err(StateError::NotUndoable);
        }
        let state = self.state();
        if state != PipelineState::Complete {
            return Err(StateError::NotComplete(state));
        }

        let steps: Vec<UndoFn> = {
            let mut stack = self.undo_stack.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *stack)
        };
        for step in steps {
            if let Err(err) = step().await {
                tracing::warn!(pipeline = %self.id, %err, "undo step failed");
            }
        }
        self.transition(PipelineState::Undone);
        Ok(())
    }

    /// Wait until the pipeline reaches a finished state. Exception info (if
    /// any) is guaranteed visible once this returns; the final queue's
    /// sentinel alone does not give that guarantee.
    pub async fn wait(&self) {
        loop {
            let notified = self.settled.notified();
            if self.state().is_finished() {
                return;
            }
            notified.await;
        }
    }

    fn begin(&self) -> Result<(), StateError> {
        if self.transition(PipelineState::Executing) {
            Ok(())
        } else {
            Err(StateError::AlreadyStarted)
        }
    }

    fn input_for(&self, stage: usize) -> Option<Arc<TransportQueue>> {
        stage
            .checked_sub(1)
            .map(|prev| self.components[prev].output_queue())
    }

    /// Negotiate the optimized transport format for every queue: adjacent
    /// stage pairs first, then the final stage against the consumer.
    fn negotiate(&self, consumer_formats: &[String]) {
        for pair in self.components.windows(2) {
            let offered = output_formats(&pair[0]);
            let accepted = input_formats(&pair[1]);
            pair[0].output_queue().negotiate(&offered, &accepted);
        }
        if let Some(last) = self.components.last() {
            last.output_queue()
                .negotiate(&output_formats(last), consumer_formats);
        }
    }

    /// Record one stage's outcome and settle the pipeline when it was the
    /// last one out (or the first to fail).
    fn stage_finished(&self, stage: usize, result: Result<(), ExecError>) {
        match result {
            Ok(()) => {
                let _ = self.events.send(PipelineEvent::StageComplete {
                    pipeline: self.id,
                    stage,
                });
                let was_last = self.remaining.fetch_sub(1, Ordering::SeqCst) == 1;
                if was_last && self.transition(PipelineState::Complete) {
                    let mut when = self.completion_time.lock().unwrap_or_else(|e| e.into_inner());
                    *when = Some(SystemTime::now());
                    drop(when);
                    let _ = self.events.send(PipelineEvent::Complete { pipeline: self.id });
                }
            }
            Err(err) => {
                self.fail(stage, err);
            }
        }
    }

    /// The exception cascade: record structured info, force `cancelled` to
    /// stop sibling stages, then settle in `exception`.
    fn fail(&self, stage: usize, err: ExecError) -> ExceptionInfo {
        let info = ExceptionInfo {
            kind: err.kind().to_string(),
            message: err.to_string(),
            stage,
            trace: error_trace(&err),
        };
        {
            let mut slot = self.exception.lock().unwrap_or_else(|e| e.into_inner());
            // The first failure wins; later ones are follow-on noise.
            slot.get_or_insert_with(|| info.clone());
        }
        tracing::warn!(pipeline = %self.id, stage, %err, "stage failed");

        if self.transition(PipelineState::Cancelled) {
            self.cancel_stages();
        }
        self.transition(PipelineState::Exception);
        let _ = self.events.send(PipelineEvent::Exception {
            pipeline: self.id,
            info: info.clone(),
        });
        info
    }

    fn cancel_stages(&self) {
        for command in &self.components {
            if command.context().cancel() {
                if let Some(hook) = &command.descriptor().cancel {
                    hook(command.context());
                }
            }
            command.output_queue().cancel();
        }
    }

    /// Apply a legal state transition and publish it. Returns false for
    /// same-state and other rejected moves (callers treat those as no-ops).
    fn transition(&self, to: PipelineState) -> bool {
        let from = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let from = *state;
            if from == to || !from.can_transition(to) {
                return false;
            }
            *state = to;
            from
        };
        let _ = self.events.send(PipelineEvent::StateChanged {
            pipeline: self.id,
            from,
            to,
        });
        if to.is_finished() {
            self.settled.notify_waiters();
        }
        true
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("stages", &self.components.len())
            .field("state", &self.state())
            .field("output_type", &self.output_type)
            .finish()
    }
}

fn output_formats(command: &Command) -> Vec<String> {
    command
        .descriptor()
        .output
        .as_ref()
        .map(|schema| schema.opt_formats.clone())
        .unwrap_or_default()
}

fn input_formats(command: &Command) -> Vec<String> {
    command
        .descriptor()
        .input
        .as_ref()
        .map(|schema| schema.opt_formats.clone())
        .unwrap_or_default()
}

/// Human-oriented context lines for an exception, innermost first.
fn error_trace(err: &ExecError) -> Vec<String> {
    let mut trace = vec![err.to_string()];
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        trace.push(inner.to_string());
        source = inner.source();
    }
    trace
}
