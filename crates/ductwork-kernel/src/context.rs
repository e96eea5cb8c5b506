//! Per-stage execution context.
//!
//! A `CommandContext` is a snapshot taken when the builder constructs the
//! stage: working directory, canonical options, a private attribs map for
//! builtin state (e.g. a spawned process id), the cooperative cancellation
//! flag, a debounced metadata sink, and the injected accessor for the
//! session's current selection. Builtins receive it inside an
//! [`Invocation`](crate::descriptor::Invocation) and must observe
//! [`cancelled`](CommandContext::cancelled) at their own suspension points —
//! the engine never forcibly interrupts a running builtin.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::broadcast;

use ductwork_types::{Object, PipelineEvent, PipelineId};

use crate::error::ExecError;

/// Provider for the session's "current selected output" snapshot.
pub type SelectionFn = Arc<dyn Fn() -> Option<Object> + Send + Sync>;

/// One rollback step, run in registration order by `Pipeline::undo`.
pub type UndoFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), ExecError>> + Send>;

/// Coalesces per-stage status bodies and emits them as
/// [`PipelineEvent::Metadata`] at a bounded delay.
///
/// Data events flow through queues as soon as available; metadata is
/// deliberately laggy so a chatty builtin cannot flood consumers.
pub struct MetadataSink {
    events: broadcast::Sender<PipelineEvent>,
    pipeline: PipelineId,
    stage: usize,
    delay: Duration,
    pending: Mutex<Option<serde_json::Value>>,
    scheduled: AtomicBool,
}

impl MetadataSink {
    pub fn new(
        events: broadcast::Sender<PipelineEvent>,
        pipeline: PipelineId,
        stage: usize,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            events,
            pipeline,
            stage,
            delay,
            pending: Mutex::new(None),
            scheduled: AtomicBool::new(false),
        })
    }

    /// Queue a status body. Object bodies posted within one delay window are
    /// merged key-wise (latest wins per key); non-object bodies replace the
    /// pending one.
    pub fn post(self: &Arc<Self>, body: serde_json::Value) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            *pending = Some(match (pending.take(), body) {
                (Some(serde_json::Value::Object(mut held)), serde_json::Value::Object(new)) => {
                    held.extend(new);
                    serde_json::Value::Object(held)
                }
                (_, new) => new,
            });
        }
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            // No runtime to debounce on; deliver immediately.
            self.flush();
            return;
        }
        let sink = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(sink.delay).await;
            sink.flush();
        });
    }

    fn flush(&self) {
        self.scheduled.store(false, Ordering::SeqCst);
        let body = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.take()
        };
        if let Some(body) = body {
            let _ = self.events.send(PipelineEvent::Metadata {
                pipeline: self.pipeline,
                stage: self.stage,
                body,
            });
        }
    }
}

/// Snapshot and scratch state for one pipeline stage.
pub struct CommandContext {
    cwd: PathBuf,
    options: Vec<String>,
    attribs: Mutex<HashMap<String, serde_json::Value>>,
    cancelled: AtomicBool,
    metadata: Arc<MetadataSink>,
    selection: Option<SelectionFn>,
    undo: Arc<Mutex<Vec<UndoFn>>>,
}

impl CommandContext {
    pub(crate) fn new(
        cwd: PathBuf,
        options: Vec<String>,
        metadata: Arc<MetadataSink>,
        selection: Option<SelectionFn>,
        undo: Arc<Mutex<Vec<UndoFn>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cwd,
            options,
            attribs: Mutex::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
            metadata,
            selection,
            undo,
        })
    }

    /// Standalone context for builtin unit tests: zero-delay metadata into a
    /// throwaway channel, no selection provider, fresh undo stack.
    pub fn detached(cwd: impl Into<PathBuf>) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Self::new(
            cwd.into(),
            Vec::new(),
            MetadataSink::new(events, PipelineId(0), 0, Duration::ZERO),
            None,
            Arc::new(Mutex::new(Vec::new())),
        )
    }

    /// Working directory snapshot taken at build time.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Canonical options bound to this stage.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Trip the cancellation flag. Returns true only for the call that
    /// actually tripped it.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    /// Store builtin-private state, e.g. a spawned process id.
    pub fn set_attrib(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut attribs = self.attribs.lock().unwrap_or_else(|e| e.into_inner());
        attribs.insert(key.into(), value);
    }

    pub fn attrib(&self, key: &str) -> Option<serde_json::Value> {
        let attribs = self.attribs.lock().unwrap_or_else(|e| e.into_inner());
        attribs.get(key).cloned()
    }

    /// Post a coalesced status body for this stage.
    pub fn post_metadata(&self, body: serde_json::Value) {
        self.metadata.post(body);
    }

    /// The session's current selected output, when a provider was injected.
    pub fn current_selection(&self) -> Option<Object> {
        self.selection.as_ref().and_then(|f| f())
    }

    /// Register a rollback step on the owning pipeline's undo stack.
    pub fn push_undo(&self, step: UndoFn) {
        let mut undo = self.undo.lock().unwrap_or_else(|e| e.into_inner());
        undo.push(step);
    }

    /// Resolve a possibly-relative path against this stage's cwd.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("cwd", &self.cwd)
            .field("options", &self.options)
            .field("cancelled", &self.cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cancel_trips_once() {
        let ctx = CommandContext::detached("/tmp");
        assert!(!ctx.cancelled());
        assert!(ctx.cancel());
        assert!(!ctx.cancel());
        assert!(ctx.cancelled());
    }

    #[test]
    fn attribs_round_trip() {
        let ctx = CommandContext::detached("/tmp");
        assert_eq!(ctx.attrib("pid"), None);
        ctx.set_attrib("pid", json!(1234));
        assert_eq!(ctx.attrib("pid"), Some(json!(1234)));
    }

    #[test]
    fn resolve_relative_against_cwd() {
        let ctx = CommandContext::detached("/work");
        assert_eq!(ctx.resolve("notes.txt"), PathBuf::from("/work/notes.txt"));
        assert_eq!(ctx.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[tokio::test]
    async fn metadata_coalesces_within_window() {
        let (events, mut rx) = broadcast::channel(16);
        let sink = MetadataSink::new(events, PipelineId(3), 1, Duration::from_millis(20));

        sink.post(json!({"read": 1}));
        sink.post(json!({"read": 2, "total": 10}));
        tokio::time::sleep(Duration::from_millis(60)).await;

        let event = rx.try_recv().unwrap();
        match event {
            PipelineEvent::Metadata { pipeline, stage, body } => {
                assert_eq!(pipeline, PipelineId(3));
                assert_eq!(stage, 1);
                assert_eq!(body, json!({"read": 2, "total": 10}));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "burst must coalesce to one event");
    }

    #[tokio::test]
    async fn undo_steps_accumulate_in_order() {
        let ctx = CommandContext::detached("/tmp");
        for i in 0..3 {
            ctx.push_undo(Box::new(move || {
                Box::pin(async move {
                    let _ = i;
                    Ok(())
                })
            }));
        }
        let undo = ctx.undo.lock().unwrap();
        assert_eq!(undo.len(), 3);
    }
}
