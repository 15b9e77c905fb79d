//! In-memory queue collaborators: a plain FIFO and a delay-capable FIFO.
//!
//! These are the bundled defaults the cores are exercised against; any
//! queue satisfying the contracts in the parent module works as well.
//! Neither is work-fair, so `done` is a no-op.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};

use crate::error::{Error, PutError, Result};
use crate::queue::{DelayingTaskQueue, TaskQueue};

/// Unbounded (or optionally bounded) FIFO queue. `get` drains remaining
/// values after `shutdown` before reporting [`Error::QueueClosed`].
///
/// Cloning yields another handle to the same queue.
pub struct InMemoryQueue<I> {
    shared: Arc<PlainShared<I>>,
}

struct PlainShared<I> {
    items: Mutex<VecDeque<I>>,
    notify: Notify,
    closed: AtomicBool,
    capacity: Option<usize>,
}

impl<I: Send + 'static> InMemoryQueue<I> {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Bounded variant; `put` fails with [`Error::QueueFull`] once `capacity`
    /// values are waiting.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(Some(capacity))
    }

    fn build(capacity: Option<usize>) -> Self {
        Self {
            shared: Arc::new(PlainShared {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                capacity,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.shared.items.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<I: Send + 'static> Default for InMemoryQueue<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> Clone for InMemoryQueue<I> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<I: Send + 'static> TaskQueue<I> for InMemoryQueue<I> {
    async fn put(&self, value: I) -> std::result::Result<(), PutError<I>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(PutError::new(value, Error::QueueClosed));
        }
        {
            let mut items = self.shared.items.lock().expect("queue lock poisoned");
            if let Some(capacity) = self.shared.capacity
                && items.len() >= capacity
            {
                return Err(PutError::new(value, Error::QueueFull));
            }
            items.push_back(value);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn get(&self) -> Result<I> {
        loop {
            // Register for wakeups before checking state, so a put racing
            // with this check cannot be missed.
            let notified = self.shared.notify.notified();
            if let Some(value) = self
                .shared
                .items
                .lock()
                .expect("queue lock poisoned")
                .pop_front()
            {
                return Ok(value);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(Error::QueueClosed);
            }
            notified.await;
        }
    }

    fn done(&self, _value: &I) {}

    fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// Delay-capable FIFO: immediate values go straight to the ready list,
/// delayed values sit in a deadline-ordered heap until due. Values still
/// delayed at shutdown are dropped with the queue.
pub struct InMemoryDelayingQueue<I> {
    shared: Arc<DelayShared<I>>,
}

struct DelayShared<I> {
    state: Mutex<DelayState<I>>,
    notify: Notify,
    closed: AtomicBool,
}

struct DelayState<I> {
    ready: VecDeque<I>,
    delayed: BinaryHeap<DelayedItem<I>>,
    seq: u64,
}

struct DelayedItem<I> {
    due: Instant,
    seq: u64,
    value: I,
}

// Heap order is by deadline only, earliest due on top; the sequence number
// keeps same-deadline items FIFO.
impl<I> PartialEq for DelayedItem<I> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<I> Eq for DelayedItem<I> {}

impl<I> Ord for DelayedItem<I> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<I> PartialOrd for DelayedItem<I> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<I: Send + 'static> InMemoryDelayingQueue<I> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(DelayShared {
                state: Mutex::new(DelayState {
                    ready: VecDeque::new(),
                    delayed: BinaryHeap::new(),
                    seq: 0,
                }),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl<I: Send + 'static> Default for InMemoryDelayingQueue<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> Clone for InMemoryDelayingQueue<I> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<I: Send + 'static> TaskQueue<I> for InMemoryDelayingQueue<I> {
    async fn put(&self, value: I) -> std::result::Result<(), PutError<I>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(PutError::new(value, Error::QueueClosed));
        }
        self.shared
            .state
            .lock()
            .expect("queue lock poisoned")
            .ready
            .push_back(value);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn get(&self) -> Result<I> {
        loop {
            let notified = self.shared.notify.notified();
            let next_due = {
                let mut state = self.shared.state.lock().expect("queue lock poisoned");
                let now = Instant::now();
                while state
                    .delayed
                    .peek()
                    .is_some_and(|item| item.due <= now)
                {
                    let item = state.delayed.pop().expect("peeked above");
                    state.ready.push_back(item.value);
                }
                if let Some(value) = state.ready.pop_front() {
                    return Ok(value);
                }
                if self.shared.closed.load(Ordering::Acquire) {
                    return Err(Error::QueueClosed);
                }
                state.delayed.peek().map(|item| item.due)
            };

            match next_due {
                Some(due) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = sleep_until(due) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    fn done(&self, _value: &I) {}

    fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl<I: Send + 'static> DelayingTaskQueue<I> for InMemoryDelayingQueue<I> {
    async fn put_with_delay(
        &self,
        value: I,
        delay: Duration,
    ) -> std::result::Result<(), PutError<I>> {
        if delay.is_zero() {
            return self.put(value).await;
        }
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(PutError::new(value, Error::QueueClosed));
        }
        {
            let mut state = self.shared.state.lock().expect("queue lock poisoned");
            let seq = state.seq;
            state.seq += 1;
            state.delayed.push(DelayedItem {
                due: Instant::now() + delay,
                seq,
                value,
            });
        }
        // Wake waiters so they recompute their sleep deadline.
        self.shared.notify.notify_waiters();
        Ok(())
    }
}
