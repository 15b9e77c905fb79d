//! Queue contracts consumed by the streaming pipeline, plus the adapter
//! that lets a plain queue stand in where a delay-capable one is expected.
//!
//! The pipeline relies only on these contracts; storage, delay timing, and
//! closure semantics are the queue's concern.

use std::time::Duration;

use crate::error::{PutError, Result};

/// Bundled in-memory queues.
pub mod memory;

/// Minimal capability set the pipeline consumes from a task queue.
///
/// `put` must be safe to call concurrently with `get`. `get` waits for an
/// available value, returns [`crate::Error::QueueClosed`] once the queue is
/// closed and drained, and must wake blocked callers on `shutdown`; any
/// other `get` error is treated as transient. `done` acknowledges
/// processing completion for queues with work-fair semantics and may be a
/// no-op otherwise.
#[trait_variant::make(TaskQueue: Send)]
pub trait LocalTaskQueue<I: Send + 'static> {
    async fn put(&self, value: I) -> std::result::Result<(), PutError<I>>;
    async fn get(&self) -> Result<I>;
    fn done(&self, value: &I);
    fn shutdown(&self);
    fn is_closed(&self) -> bool;
}

/// A [`TaskQueue`] that can additionally hold a value back for a delay
/// before it becomes gettable.
#[trait_variant::make(DelayingTaskQueue: Send)]
pub trait LocalDelayingTaskQueue<I: Send + 'static>: TaskQueue<I> {
    async fn put_with_delay(&self, value: I, delay: Duration)
    -> std::result::Result<(), PutError<I>>;
}

/// Shape adapter promoting a plain queue to the delay-capable contract by
/// discarding the delay argument. No runtime queuing of delayed items.
pub struct NonDelayingQueue<Q> {
    inner: Q,
}

impl<Q> NonDelayingQueue<Q> {
    pub fn new(inner: Q) -> Self {
        Self { inner }
    }
}

impl<I: Send + 'static, Q: TaskQueue<I> + Sync> TaskQueue<I> for NonDelayingQueue<Q> {
    async fn put(&self, value: I) -> std::result::Result<(), PutError<I>> {
        self.inner.put(value).await
    }

    async fn get(&self) -> Result<I> {
        self.inner.get().await
    }

    fn done(&self, value: &I) {
        self.inner.done(value);
    }

    fn shutdown(&self) {
        self.inner.shutdown();
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl<I: Send + 'static, Q: TaskQueue<I> + Sync> DelayingTaskQueue<I> for NonDelayingQueue<Q> {
    async fn put_with_delay(
        &self,
        value: I,
        _delay: Duration,
    ) -> std::result::Result<(), PutError<I>> {
        self.inner.put(value).await
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryQueue;
    use super::*;
    use tokio::time::Instant;

    // The adapter must deliver "delayed" items immediately.
    #[tokio::test(start_paused = true)]
    async fn test_non_delaying_adapter_discards_delay() {
        let queue = NonDelayingQueue::new(InMemoryQueue::new());
        let submitted_at = Instant::now();

        DelayingTaskQueue::put_with_delay(&queue, 1u64, Duration::from_secs(3600))
            .await
            .expect("put");
        let value = TaskQueue::get(&queue).await.expect("get");

        assert_eq!(value, 1);
        assert_eq!(submitted_at.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_non_delaying_adapter_forwards_shutdown() {
        let queue = NonDelayingQueue::new(InMemoryQueue::<u64>::new());
        assert!(!TaskQueue::is_closed(&queue));
        TaskQueue::shutdown(&queue);
        assert!(TaskQueue::is_closed(&queue));
    }
}
