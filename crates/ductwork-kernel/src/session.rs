//! Session: the explicitly constructed owner of engine services.
//!
//! Everything a pipeline needs is injected from here — the layered
//! registry, the worker pool, the event channel, the working directory,
//! the trash directory backing undoable removals, an optional verb
//! resolver, and an optional "current selection" the `current` builtin
//! reads. There are no process-wide globals; tests build fresh sessions.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;

use ductwork_types::{Object, PipelineEvent, TypeHierarchy};

use crate::builder::{PipelineBuilder, DEFAULT_DEBOUNCE};
use crate::builtins;
use crate::pool::WorkerPool;
use crate::registry::BuiltinRegistry;
use crate::resolver::VerbResolver;

/// Knobs for constructing a [`Session`].
pub struct SessionConfig {
    /// Worker pool cap for threaded stages.
    pub max_workers: usize,
    /// Coalescing window for metadata and queue subscriber callbacks.
    pub debounce: Duration,
    /// Initial working directory.
    pub cwd: PathBuf,
    /// Where `rm` moves entries; defaults to a per-process directory under
    /// the system temp dir.
    pub trash_dir: Option<PathBuf>,
    /// Buffer size of the pipeline event channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            debounce: DEFAULT_DEBOUNCE,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            trash_dir: None,
            event_capacity: 64,
        }
    }
}

/// Owner of the registry, pool, event channel, and session-wide state.
pub struct Session {
    registry: Arc<BuiltinRegistry>,
    hierarchy: Arc<TypeHierarchy>,
    pool: WorkerPool,
    events: broadcast::Sender<PipelineEvent>,
    cwd: RwLock<PathBuf>,
    prev_cwd: RwLock<Option<PathBuf>>,
    selection: RwLock<Option<Object>>,
    resolver: RwLock<Option<Arc<dyn VerbResolver>>>,
    trash: PathBuf,
    next_trash_slot: AtomicU64,
    debounce: Duration,
    next_pipeline: Arc<AtomicU64>,
}

impl Session {
    /// Build a session and register the stock builtin set.
    pub fn new(config: SessionConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity);
        let trash = config.trash_dir.unwrap_or_else(|| {
            std::env::temp_dir().join(format!("ductwork-trash-{}", std::process::id()))
        });
        let session = Arc::new(Self {
            registry: Arc::new(BuiltinRegistry::new()),
            hierarchy: Arc::new(TypeHierarchy::stock()),
            pool: WorkerPool::new(config.max_workers),
            events,
            cwd: RwLock::new(config.cwd),
            prev_cwd: RwLock::new(None),
            selection: RwLock::new(None),
            resolver: RwLock::new(None),
            trash,
            next_trash_slot: AtomicU64::new(0),
            debounce: config.debounce,
            next_pipeline: Arc::new(AtomicU64::new(1)),
        });
        builtins::register_stock(&session);
        session
    }

    /// A builder wired to this session's registry, events, cwd snapshot,
    /// selection provider, resolver, and pipeline-id counter.
    pub fn builder(self: &Arc<Self>) -> PipelineBuilder {
        let weak = Arc::downgrade(self);
        let mut builder = PipelineBuilder::new(self.registry.clone(), self.hierarchy.clone())
            .with_events(self.events.clone())
            .with_cwd(self.cwd())
            .with_debounce(self.debounce)
            .with_id_counter(self.next_pipeline.clone())
            .with_selection(Arc::new(move || {
                weak.upgrade().and_then(|session| session.selection())
            }));
        let resolver = {
            let slot = self.resolver.read().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        if let Some(resolver) = resolver {
            builder = builder.with_resolver(resolver);
        }
        builder
    }

    /// Listen for pipeline lifecycle, metadata, and exception events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<BuiltinRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn trash_dir(&self) -> &Path {
        &self.trash
    }

    /// Next unique slot index inside the trash directory.
    pub(crate) fn next_trash_slot(&self) -> u64 {
        self.next_trash_slot.fetch_add(1, Ordering::SeqCst)
    }

    pub fn cwd(&self) -> PathBuf {
        let cwd = self.cwd.read().unwrap_or_else(|e| e.into_inner());
        cwd.clone()
    }

    /// Change the working directory, remembering the previous one. Returns
    /// the directory that was replaced.
    pub fn set_cwd(&self, path: impl Into<PathBuf>) -> PathBuf {
        let path = path.into();
        let prev = {
            let mut cwd = self.cwd.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *cwd, path)
        };
        let mut slot = self.prev_cwd.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(prev.clone());
        prev
    }

    /// The directory in effect before the last [`set_cwd`](Self::set_cwd).
    pub fn prev_cwd(&self) -> Option<PathBuf> {
        let slot = self.prev_cwd.read().unwrap_or_else(|e| e.into_inner());
        slot.clone()
    }

    /// Current selected output, read by the `current` builtin and by
    /// dynamic output typing.
    pub fn selection(&self) -> Option<Object> {
        let slot = self.selection.read().unwrap_or_else(|e| e.into_inner());
        slot.clone()
    }

    pub fn set_selection(&self, object: Option<Object>) {
        let mut slot = self.selection.write().unwrap_or_else(|e| e.into_inner());
        *slot = object;
    }

    /// Install the resolver consulted on registry misses (before the `sys`
    /// fallback).
    pub fn set_resolver(&self, resolver: Arc<dyn VerbResolver>) {
        let mut slot = self.resolver.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(resolver);
    }

    /// Parse, execute concurrently, and drain the final queue. Fails if any
    /// stage raised.
    #[tracing::instrument(skip(self))]
    pub async fn run(self: &Arc<Self>, text: &str) -> anyhow::Result<Vec<Object>> {
        let pipeline = Arc::new(self.builder().parse(text).await?);
        pipeline.execute(&self.pool, &[]).await?;
        let items = pipeline.output_queue().drain().await;
        pipeline.wait().await;
        if let Some(info) = pipeline.exception() {
            anyhow::bail!("stage {} ({}): {}", info.stage, info.kind, info.message);
        }
        Ok(items)
    }

    /// Parse and execute every stage sequentially on the caller's task.
    #[tracing::instrument(skip(self))]
    pub async fn run_sync(self: &Arc<Self>, text: &str) -> anyhow::Result<Vec<Object>> {
        let pipeline = Arc::new(self.builder().parse(text).await?);
        pipeline.execute_sync().await?;
        Ok(pipeline.output_queue().drain().await)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cwd", &self.cwd())
            .field("builtins", &self.registry.len())
            .field("max_workers", &self.pool.max_workers())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> Arc<Session> {
        Session::new(SessionConfig {
            debounce: Duration::ZERO,
            ..SessionConfig::default()
        })
    }

    #[tokio::test]
    async fn stock_builtins_registered() {
        let session = test_session();
        for name in ["sys", "echo", "cat", "cd", "rm", "current", "filter"] {
            assert!(session.registry().lookup(name).is_ok(), "missing {name}");
        }
    }

    #[tokio::test]
    async fn run_echo_returns_items() {
        let session = test_session();
        let items = session.run("echo a b c").await.unwrap();
        assert_eq!(items, vec![
            Object::Text("a".into()),
            Object::Text("b".into()),
            Object::Text("c".into()),
        ]);
    }

    #[tokio::test]
    async fn run_surfaces_stage_failures() {
        let session = test_session();
        // `cat` on a missing file raises inside the stage.
        let err = session.run("cat /no/such/file-ductwork").await.unwrap_err();
        assert!(err.to_string().contains("stage 0"));
    }

    #[tokio::test]
    async fn set_cwd_remembers_previous() {
        let session = test_session();
        let before = session.cwd();
        session.set_cwd("/tmp");
        assert_eq!(session.cwd(), PathBuf::from("/tmp"));
        assert_eq!(session.prev_cwd(), Some(before));
    }

    #[tokio::test]
    async fn selection_round_trip() {
        let session = test_session();
        assert_eq!(session.selection(), None);
        session.set_selection(Some(Object::from("picked")));
        assert_eq!(session.selection(), Some(Object::Text("picked".into())));
    }
}
