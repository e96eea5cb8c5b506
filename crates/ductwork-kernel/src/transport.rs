//! Thread-safe object queue connecting adjacent pipeline stages.
//!
//! ```text
//!   producer Command ──▶ [VecDeque<Object> + eof flag] ──▶ consumer
//!                        ├── consumer blocks on pop() when empty
//!                        ├── close() writes the terminal sentinel once
//!                        ├── cancel() == close() (unblocks a blocked pop)
//!                        └── one optional debounced subscriber
//! ```
//!
//! Each queue has exactly one producer (the owning command's execution) and
//! one consumer (the next stage, or the caller draining the final stage), so
//! one `std::sync::Mutex` per queue suffices; critical sections are VecDeque
//! operations only. A `tokio::sync::Notify` wakes blocked consumers; the
//! `notified()` future is created before re-checking state so wakeups are
//! never lost.
//!
//! End-of-stream is an explicit flag written exactly once, not an in-band
//! exception: `pop()` returns `None` after the sentinel and the sentinel is
//! never yielded as data.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;

use ductwork_types::Object;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("queue already has a subscriber")]
    AlreadySubscribed,
}

type SubscriberFn = Arc<dyn Fn() + Send + Sync>;

struct Subscriber {
    callback: SubscriberFn,
    /// A debounce timer is in flight; further pushes fold into it.
    armed: bool,
    /// Bumped on every (un)subscribe so a pending timer from a previous
    /// subscription never fires into the new one.
    epoch: u64,
}

struct QueueState {
    items: VecDeque<Object>,
    /// Terminal sentinel written; no further pushes are accepted.
    closed: bool,
    subscriber: Option<Subscriber>,
    epoch: u64,
}

/// FIFO transport between one producer and one consumer.
pub struct TransportQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    negotiated: Mutex<Option<String>>,
    debounce: Duration,
    weak: Weak<TransportQueue>,
}

impl TransportQueue {
    /// Create a queue whose subscriber callback is debounced by `debounce`.
    pub fn new(debounce: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
                subscriber: None,
                epoch: 0,
            }),
            notify: Notify::new(),
            negotiated: Mutex::new(None),
            debounce,
            weak: weak.clone(),
        })
    }

    /// Enqueue one item. Pushes after the sentinel are dropped (producer
    /// bug; logged, not fatal).
    pub fn push(&self, item: Object) {
        let immediate = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.closed {
                tracing::warn!("push after terminal sentinel dropped");
                return;
            }
            state.items.push_back(item);
            self.arm_subscriber(&mut state)
        };
        self.notify.notify_waiters();
        if let Some(callback) = immediate {
            callback();
        }
    }

    /// Write the terminal sentinel. Returns true only for the call that
    /// actually closed the queue; later calls are no-ops.
    pub fn close(&self) -> bool {
        let (closed_now, immediate) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.closed {
                (false, None)
            } else {
                state.closed = true;
                (true, self.arm_subscriber(&mut state))
            }
        };
        if closed_now {
            self.notify.notify_waiters();
        }
        if let Some(callback) = immediate {
            callback();
        }
        closed_now
    }

    /// Cancellation enqueues the terminal sentinel to unblock any blocked
    /// consumer; it is the same operation as [`close`](Self::close).
    pub fn cancel(&self) -> bool {
        self.close()
    }

    /// Non-blocking pop: `None` when the queue is empty or finished.
    pub fn try_pop(&self) -> Option<Object> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.items.pop_front()
    }

    /// Pop the next item, waiting for the producer when empty. `None` means
    /// the terminal sentinel was reached; the sentinel itself is never
    /// yielded.
    pub async fn pop(&self) -> Option<Object> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Consume every remaining item up to the sentinel.
    pub async fn drain(&self) -> Vec<Object> {
        let mut out = Vec::new();
        while let Some(item) = self.pop().await {
            out.push(item);
        }
        out
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed
    }

    /// Pick the first producer format the consumer also accepts and record
    /// it on the queue. No common format leaves the slot unset, meaning
    /// plain per-item transport.
    pub fn negotiate(&self, producer: &[String], consumer: &[String]) -> Option<String> {
        let chosen = producer.iter().find(|f| consumer.contains(f)).cloned();
        let mut slot = self.negotiated.lock().unwrap_or_else(|e| e.into_inner());
        slot.clone_from(&chosen);
        chosen
    }

    pub fn negotiated_format(&self) -> Option<String> {
        let slot = self.negotiated.lock().unwrap_or_else(|e| e.into_inner());
        slot.clone()
    }

    /// Register the single subscriber. The callback fires at most once per
    /// debounce window after new items (or the sentinel) arrive.
    pub fn subscribe(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.subscriber.is_some() {
            return Err(TransportError::AlreadySubscribed);
        }
        state.epoch += 1;
        let epoch = state.epoch;
        state.subscriber = Some(Subscriber {
            callback: Arc::new(callback),
            armed: false,
            epoch,
        });
        Ok(())
    }

    /// Remove the subscriber and cancel any pending notification.
    pub fn unsubscribe(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.epoch += 1;
        state.subscriber = None;
    }

    /// Start the debounce timer unless one is already running. Called with
    /// the state lock held; when no runtime is available to debounce on, the
    /// callback is returned for the caller to run after releasing the lock.
    fn arm_subscriber(&self, state: &mut QueueState) -> Option<SubscriberFn> {
        let sub = state.subscriber.as_mut()?;
        if sub.armed {
            return None;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Some(sub.callback.clone());
        }
        sub.armed = true;
        let epoch = sub.epoch;
        let queue = self.weak.upgrade()?;
        let delay = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let callback = {
                let mut state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
                match state.subscriber.as_mut() {
                    Some(sub) if sub.epoch == epoch => {
                        sub.armed = false;
                        Some(sub.callback.clone())
                    }
                    // Unsubscribed (or resubscribed) while the timer ran.
                    _ => None,
                }
            };
            if let Some(callback) = callback {
                callback();
            }
        });
        None
    }
}

impl std::fmt::Debug for TransportQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportQueue")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .field("negotiated", &self.negotiated_format())
            .finish()
    }
}
