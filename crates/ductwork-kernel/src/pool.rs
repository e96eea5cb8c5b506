//! Bounded, lazily-grown worker pool for stage execution.
//!
//! Jobs are boxed futures queued FIFO. An idle worker picks the next job;
//! when none is idle and the pool is below its cap a new worker task is
//! spawned; at the cap, jobs wait in the queue. Workers are daemon-style:
//! they loop forever and survive panicking jobs (the panic is captured and
//! logged, never unwound into the worker). There is no ordering guarantee
//! across jobs and no priority.
//!
//! `cancel` is a documented no-op: an in-flight or queued job cannot be
//! revoked through the pool. Pipeline cancellation goes through stage
//! contexts and queue sentinels instead.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Notify;

/// Opaque handle returned by [`WorkerPool::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct PoolInner {
    queue: Mutex<VecDeque<(JobId, BoxFuture<'static, ()>)>>,
    notify: Notify,
    max_workers: usize,
    spawned: AtomicUsize,
    idle: AtomicUsize,
    next_id: AtomicU64,
}

/// Bounded pool of worker tasks executing queued futures.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// A pool that will grow to at most `max_workers` concurrent workers.
    pub fn new(max_workers: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                max_workers: max_workers.max(1),
                spawned: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Queue a job. Returns an opaque id; the job runs on some worker in
    /// FIFO submission order.
    pub fn submit<F>(&self, job: F) -> JobId
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let inner = &self.inner;
        let id = JobId(inner.next_id.fetch_add(1, Ordering::SeqCst));
        {
            let mut queue = inner.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.push_back((id, job.boxed()));
        }

        // Grow only when nobody is idle and the cap allows it. A racing
        // worker that just went idle will be woken by notify_one below.
        if inner.idle.load(Ordering::SeqCst) == 0 {
            let grew = inner
                .spawned
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < inner.max_workers).then_some(n + 1)
                })
                .is_ok();
            if grew {
                let inner = self.inner.clone();
                tokio::spawn(async move { worker_loop(inner).await });
            }
        }
        inner.notify.notify_one();
        id
    }

    /// Cancellation of submitted jobs is unsupported; this is a no-op kept
    /// so callers holding a [`JobId`] have somewhere to express intent.
    pub fn cancel(&self, id: JobId) {
        tracing::debug!(job = %id, "worker pool cancel is a no-op");
    }

    /// Number of jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        let queue = self.inner.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.len()
    }

    /// Number of worker tasks spawned so far (never exceeds the cap).
    pub fn workers(&self) -> usize {
        self.inner.spawned.load(Ordering::SeqCst)
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }
}

async fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        let notified = inner.notify.notified();
        let job = {
            let mut queue = inner.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.pop_front()
        };
        match job {
            Some((id, fut)) => {
                if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                    let msg = panic_message(&panic);
                    tracing::error!(job = %id, %msg, "pool job panicked");
                }
            }
            None => {
                inner.idle.fetch_add(1, Ordering::SeqCst);
                notified.await;
                inner.idle.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.inner.max_workers)
            .field("workers", &self.workers())
            .field("queued", &self.queued())
            .finish()
    }
}
