//! Parallel batch mapper: one handler applied to every element of a finite
//! input, results returned in input order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::envelope::{BatchEnvelope, EnvelopePool};
use crate::handler::run_handler;

/// Applies the configured handler to every element of an input sequence in
/// parallel, up to the configured worker count, and (optionally) collects
/// per-element results index-aligned with the input.
///
/// A mapper may be reinvoked with fresh inputs; calls serialize. After
/// [`Mapper::stop`], `map` returns an empty vector immediately. Dropping
/// the mapper cancels any in-flight `map` without waiting for it.
pub struct Mapper<T> {
    config: Config<T>,
    cancel: CancellationToken,
    run_lock: tokio::sync::Mutex<()>,
    stop_once: OnceCell<()>,
    pool: Arc<EnvelopePool<BatchEnvelope<T>>>,
}

impl<T: Clone + Send + 'static> Mapper<T> {
    pub fn new(config: Config<T>) -> Self {
        Self {
            config: config.validated(),
            cancel: CancellationToken::new(),
            run_lock: tokio::sync::Mutex::new(()),
            stop_once: OnceCell::new(),
            pool: Arc::new(EnvelopePool::new()),
        }
    }

    /// Processes every element of `input` in parallel.
    ///
    /// With result collection enabled the returned vector has the input's
    /// length and position `i` holds the handler's result for element `i`,
    /// or `None` when the handler failed for that element. Handler errors
    /// go to the after-callback and never abort sibling elements. Without
    /// collection (and for empty input, or after `stop`) the returned
    /// vector is empty.
    pub async fn map(&self, input: Vec<T>) -> Vec<Option<T>> {
        if input.is_empty() || self.cancel.is_cancelled() {
            return Vec::new();
        }
        let _running = self.run_lock.lock().await;
        if self.cancel.is_cancelled() {
            return Vec::new();
        }

        let total = input.len();
        let slots: Arc<Vec<Mutex<Option<BatchEnvelope<T>>>>> = Arc::new(
            input
                .into_iter()
                .enumerate()
                .map(|(index, msg)| {
                    let mut envelope = self.pool.get();
                    envelope.fill(msg, index);
                    Mutex::new(Some(envelope))
                })
                .collect(),
        );
        let results: Option<Arc<Mutex<Vec<Option<T>>>>> = self
            .config
            .collect_results
            .then(|| Arc::new(Mutex::new(vec![None; total])));
        let next = Arc::new(AtomicUsize::new(0));

        let mut workers = JoinSet::new();
        for _ in 0..self.config.worker_count {
            let slots = Arc::clone(&slots);
            let results = results.clone();
            let next = Arc::clone(&next);
            let pool = Arc::clone(&self.pool);
            let cancel = self.cancel.clone();
            let handler = Arc::clone(&self.config.handler);
            let callback = Arc::clone(&self.config.callback);

            workers.spawn(async move {
                loop {
                    let claimed = next.fetch_add(1, Ordering::AcqRel);
                    if claimed >= total {
                        return;
                    }
                    if cancel.is_cancelled() {
                        return;
                    }

                    // Swap the slot to empty before running anything; the
                    // cleanup sweep treats an occupied slot as
                    // not-yet-dispatched.
                    let Some(mut envelope) = slots[claimed]
                        .lock()
                        .expect("slot lock poisoned")
                        .take()
                    else {
                        continue;
                    };
                    let Some((msg, index)) = envelope.take() else {
                        pool.put(envelope);
                        continue;
                    };

                    callback.on_before(&msg);
                    let outcome = run_handler(&handler, msg.clone()).await;
                    callback.on_after(&msg, &outcome);

                    if let Some(results) = &results {
                        results.lock().expect("results lock poisoned")[index] = outcome.ok();
                    }
                    pool.put(envelope);
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!(%err, "batch worker terminated abnormally");
            }
        }

        // Cancellation leaves undispatched envelopes behind; sweep them
        // back to the pool.
        for slot in slots.iter() {
            if let Some(envelope) = slot.lock().expect("slot lock poisoned").take() {
                self.pool.put(envelope);
            }
        }

        match results {
            Some(results) => std::mem::take(&mut *results.lock().expect("results lock poisoned")),
            None => Vec::new(),
        }
    }

    /// Signals cancellation to any in-flight `map` and waits for its
    /// workers to finish. One-shot; later and concurrent calls observe the
    /// same shutdown.
    pub async fn stop(&self) {
        self.stop_once
            .get_or_init(|| async {
                debug!("stopping batch mapper");
                self.cancel.cancel();
                let _running = self.run_lock.lock().await;
            })
            .await;
    }
}

impl<T> Drop for Mapper<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::handler::{Callback, handler_fn};
    use std::time::Duration;
    use tokio::time::{Instant, sleep};

    fn sleepy_handler() -> crate::handler::Handler<u64> {
        handler_fn(|msg: u64| async move {
            sleep(Duration::from_millis(100 * msg)).await;
            Ok(msg)
        })
    }

    struct CountingCallback {
        before: Arc<AtomicUsize>,
        after: Arc<AtomicUsize>,
        errors: Arc<Mutex<Vec<Error>>>,
    }

    impl Callback<u64> for CountingCallback {
        fn on_before(&self, _msg: &u64) {
            self.before.fetch_add(1, Ordering::AcqRel);
        }

        fn on_after(&self, _msg: &u64, result: &Result<u64>) {
            self.after.fetch_add(1, Ordering::AcqRel);
            if let Err(err) = result {
                self.errors
                    .lock()
                    .expect("errors lock poisoned")
                    .push(err.clone());
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_map_basic_ordered_results() {
        let mapper = Mapper::new(
            Config::new()
                .with_worker_count(2)
                .with_handler(sleepy_handler())
                .with_result_collection(),
        );

        let started_at = Instant::now();
        let results = mapper.map(vec![3, 5, 2]).await;
        let elapsed = started_at.elapsed();

        assert_eq!(results, vec![Some(3), Some(5), Some(2)]);
        // Two workers over 300/500/200 ms of work: bounded below by the
        // critical path and above by the serial sum.
        assert!(elapsed >= Duration::from_millis(500), "took {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(1200), "took {elapsed:?}");
        mapper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_map_with_more_workers_than_input() {
        let mapper = Mapper::new(
            Config::new()
                .with_worker_count(200)
                .with_handler(sleepy_handler())
                .with_result_collection(),
        );
        let results = mapper.map(vec![1, 2]).await;
        assert_eq!(results, vec![Some(1), Some(2)]);
        mapper.stop().await;
    }

    #[tokio::test]
    async fn test_map_after_stop_returns_empty() {
        let mapper = Mapper::new(Config::new().with_result_collection());
        assert_eq!(mapper.map(vec![1, 2]).await, vec![Some(1), Some(2)]);

        mapper.stop().await;
        assert!(mapper.map(vec![3, 4]).await.is_empty());
        // Second stop is a no-op.
        mapper.stop().await;
    }

    #[tokio::test]
    async fn test_map_without_collection_returns_empty() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mapper = Mapper::new(Config::new().with_worker_count(4).with_handler(handler_fn(
            move |msg: u64| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::AcqRel);
                    Ok(msg)
                }
            },
        )));

        assert!(mapper.map(vec![1, 2, 3, 4, 5]).await.is_empty());
        // Elements are still processed even though nothing is returned.
        assert_eq!(seen.load(Ordering::Acquire), 5);
    }

    #[tokio::test]
    async fn test_map_empty_input() {
        let mapper = Mapper::new(Config::<u64>::new().with_result_collection());
        assert!(mapper.map(Vec::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_map_large_input_keeps_order() {
        let mapper = Mapper::new(
            Config::new()
                .with_worker_count(8)
                .with_handler(handler_fn(|msg: u64| async move { Ok(msg * 10) }))
                .with_result_collection(),
        );
        let input: Vec<u64> = (0..500).collect();
        let results = mapper.map(input).await;
        assert_eq!(results.len(), 500);
        for (index, result) in results.iter().enumerate() {
            assert_eq!(*result, Some(index as u64 * 10));
        }
    }

    #[tokio::test]
    async fn test_handler_error_reported_to_after_only() {
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let mapper = Mapper::new(
            Config::new()
                .with_worker_count(2)
                .with_handler(handler_fn(|msg: u64| async move {
                    if msg == 2 {
                        Err(Error::Handler("bad element".to_string()))
                    } else {
                        Ok(msg)
                    }
                }))
                .with_callback(CountingCallback {
                    before: Arc::clone(&before),
                    after: Arc::clone(&after),
                    errors: Arc::clone(&errors),
                })
                .with_result_collection(),
        );

        let results = mapper.map(vec![1, 2, 3]).await;

        // The failed element's slot is empty; siblings are untouched.
        assert_eq!(results, vec![Some(1), None, Some(3)]);
        assert_eq!(before.load(Ordering::Acquire), 3);
        assert_eq!(after.load(Ordering::Acquire), 3);
        assert_eq!(
            *errors.lock().expect("errors lock poisoned"),
            vec![Error::Handler("bad element".to_string())]
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stall_siblings() {
        let mapper = Mapper::new(
            Config::new()
                .with_worker_count(2)
                .with_handler(handler_fn(|msg: u64| async move {
                    if msg == 7 {
                        panic!("poisoned element");
                    }
                    Ok(msg)
                }))
                .with_result_collection(),
        );

        let results = mapper.map(vec![1, 7, 3]).await;
        assert_eq!(results, vec![Some(1), None, Some(3)]);
    }

    #[tokio::test]
    async fn test_map_is_reusable() {
        let mapper = Mapper::new(Config::new().with_result_collection());
        assert_eq!(mapper.map(vec![1]).await, vec![Some(1)]);
        assert_eq!(mapper.map(vec![2, 3]).await, vec![Some(2), Some(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_in_flight_map() {
        let mapper = Arc::new(Mapper::new(
            Config::new()
                .with_worker_count(1)
                .with_handler(handler_fn(|msg: u64| async move {
                    sleep(Duration::from_millis(200)).await;
                    Ok(msg)
                }))
                .with_result_collection(),
        ));

        let runner = Arc::clone(&mapper);
        let in_flight = tokio::spawn(async move { runner.map((0..100).collect()).await });

        sleep(Duration::from_millis(450)).await;
        mapper.stop().await;

        let results = in_flight.await.expect("map task");
        // The single worker got through only a prefix before cancellation.
        assert_eq!(results.len(), 100);
        let processed = results.iter().filter(|slot| slot.is_some()).count();
        assert!(processed < 100, "processed {processed}");

        assert!(mapper.map(vec![1]).await.is_empty());
    }
}
