//! Streaming pipeline: a dynamically sized worker cohort draining a
//! delay-capable queue.
//!
//! One worker starts with the pipeline. Submissions spawn additional
//! workers on demand, gated by a token bucket and capped at the configured
//! worker count; workers retire themselves after sitting idle past the
//! timeout, never dropping below a cohort of one.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::Config;
use crate::envelope::{Envelope, EnvelopePool};
use crate::error::{Error, Result};
use crate::handler::{Handler, run_handler};
use crate::limiter::SpawnGate;
use crate::queue::DelayingTaskQueue;

/// Idle time after which a worker above the floor retires.
const WORKER_IDLE_TIMEOUT_MS: u64 = 10_000;

/// Cadence of the shared timer cell refresh.
const TIMER_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Cadence of each worker's idle scan.
const WORKER_SCAN_INTERVAL: Duration = Duration::from_secs(3);

/// Worker spawn budget: tokens per second and burst.
const WORKER_SPAWN_RATE: u64 = 4;
const WORKER_SPAWN_BURST: u64 = 8;

/// The cohort never decays below this.
const MIN_WORKER_COUNT: i64 = 1;

/// Streaming execution core over an external delay-capable queue.
///
/// Constructed with [`Pipeline::new`] inside a Tokio runtime; it starts
/// one executor worker and the timer refresher immediately. [`Pipeline::stop`]
/// cancels the cohort, waits for in-flight work, and shuts the queue down.
/// Dropping the pipeline cancels the cohort but leaves the queue open.
pub struct Pipeline<T, Q> {
    inner: Arc<Inner<T, Q>>,
}

struct Inner<T, Q> {
    queue: Q,
    config: Config<T>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    started_at: Instant,
    /// Milliseconds since construction, refreshed ~1/s. Workers read this
    /// instead of the clock in their hot path.
    timer_ms: AtomicU64,
    running: AtomicI64,
    pool: EnvelopePool<Envelope<T>>,
    gate: SpawnGate,
    stop_once: OnceCell<()>,
}

impl<T, Q> Pipeline<T, Q>
where
    T: Clone + Send + 'static,
    Q: DelayingTaskQueue<Envelope<T>> + Send + Sync + 'static,
{
    pub fn new(queue: Q, config: Config<T>) -> Self {
        let inner = Arc::new(Inner {
            queue,
            config: config.validated(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started_at: Instant::now(),
            timer_ms: AtomicU64::new(0),
            running: AtomicI64::new(1),
            pool: EnvelopePool::new(),
            gate: SpawnGate::new(WORKER_SPAWN_RATE, WORKER_SPAWN_BURST),
            stop_once: OnceCell::new(),
        });

        let worker = Arc::clone(&inner);
        inner.tracker.spawn(worker.executor());
        let refresher = Arc::clone(&inner);
        inner.tracker.spawn(refresher.refresh_timer());

        Self { inner }
    }

    /// Submits a task for the default handler.
    pub async fn submit(&self, msg: T) -> Result<()> {
        self.submit_envelope(None, msg, None).await
    }

    /// Submits a task processed by `handler` instead of the default.
    pub async fn submit_with(&self, handler: Handler<T>, msg: T) -> Result<()> {
        self.submit_envelope(Some(handler), msg, None).await
    }

    /// Submits a task that becomes eligible no earlier than `delay` from now.
    pub async fn submit_after(&self, msg: T, delay: Duration) -> Result<()> {
        self.submit_envelope(None, msg, Some(delay)).await
    }

    /// Delayed submission with a per-task handler override.
    pub async fn submit_after_with(
        &self,
        handler: Handler<T>,
        msg: T,
        delay: Duration,
    ) -> Result<()> {
        self.submit_envelope(Some(handler), msg, Some(delay)).await
    }

    async fn submit_envelope(
        &self,
        handler: Option<Handler<T>>,
        msg: T,
        delay: Option<Duration>,
    ) -> Result<()> {
        if self.inner.queue.is_closed() {
            return Err(Error::QueueClosed);
        }

        let mut envelope = self.inner.pool.get();
        envelope.fill(msg, handler);

        let outcome = match delay {
            Some(delay) if !delay.is_zero() => {
                self.inner.queue.put_with_delay(envelope, delay).await
            }
            _ => self.inner.queue.put(envelope).await,
        };

        match outcome {
            Ok(()) => {
                self.inner.try_spawn_worker();
                Ok(())
            }
            Err(rejected) => {
                let (envelope, error) = rejected.into_parts();
                self.inner.pool.put(envelope);
                Err(error)
            }
        }
    }

    /// Observed cohort size. Zero once shutdown has completed.
    pub fn running_workers(&self) -> i64 {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Cancels the cohort, waits for every worker and the timer refresher
    /// (in-flight handlers complete; there is no timeout at this layer),
    /// then shuts the external queue down. One-shot; later and concurrent
    /// calls observe the same shutdown.
    pub async fn stop(&self) {
        self.inner
            .stop_once
            .get_or_init(|| async {
                info!("stopping pipeline");
                self.inner.cancel.cancel();
                self.inner.tracker.close();
                self.inner.tracker.wait().await;
                self.inner.queue.shutdown();
            })
            .await;
    }
}

impl<T, Q> Drop for Pipeline<T, Q> {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl<T, Q> Inner<T, Q>
where
    T: Clone + Send + 'static,
    Q: DelayingTaskQueue<Envelope<T>> + Send + Sync + 'static,
{
    fn now_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Spawns one additional worker if the cohort is below target, the
    /// spawn gate has a token, and the provisional increment still fits.
    /// The double-check guards against submitters racing each other.
    fn try_spawn_worker(self: &Arc<Self>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let target = self.config.worker_count as i64;
        if self.running.load(Ordering::Acquire) >= target {
            return false;
        }
        if !self.gate.allow() {
            return false;
        }

        let grown = self.running.fetch_add(1, Ordering::AcqRel) + 1;
        if grown > target {
            self.running.fetch_sub(1, Ordering::AcqRel);
            return false;
        }

        let worker = Arc::clone(self);
        self.tracker.spawn(worker.executor());
        debug!(running = grown, "spawned additional worker");
        true
    }

    /// Conditional decrement that refuses to pass the worker floor; the
    /// caller exits only when this succeeds.
    fn try_retire(&self) -> bool {
        self.running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |running| {
                (running > MIN_WORKER_COUNT).then(|| running - 1)
            })
            .is_ok()
    }

    /// Executor worker: waits on the queue, runs the callback/handler
    /// triple per envelope, and retires after sitting idle past the
    /// timeout while the cohort is above the floor.
    async fn executor(self: Arc<Self>) {
        let mut last_active = self.timer_ms.load(Ordering::Acquire);
        let mut scan = interval(WORKER_SCAN_INTERVAL);

        loop {
            if self.queue.is_closed() {
                break;
            }
            tokio::select! {
                // Cancellation wins over pending work: a stopped worker
                // exits at its next checkpoint instead of draining the
                // queue.
                biased;
                _ = self.cancel.cancelled() => break,
                _ = scan.tick() => {
                    let timer = self.timer_ms.load(Ordering::Acquire);
                    if timer.saturating_sub(last_active) >= WORKER_IDLE_TIMEOUT_MS
                        && self.try_retire()
                    {
                        debug!(
                            running = self.running.load(Ordering::Acquire),
                            "idle worker retired"
                        );
                        return;
                    }
                }
                fetched = self.queue.get() => match fetched {
                    Ok(envelope) => {
                        self.queue.done(&envelope);
                        self.run_envelope(envelope).await;
                        last_active = self.timer_ms.load(Ordering::Acquire);
                    }
                    Err(Error::QueueClosed) => break,
                    Err(err) => debug!(%err, "transient queue error, retrying"),
                },
            }
        }
        self.running.fetch_sub(1, Ordering::AcqRel);
    }

    async fn run_envelope(&self, mut envelope: Envelope<T>) {
        let Some(msg) = envelope.take_msg() else {
            self.pool.put(envelope);
            return;
        };
        let handler = envelope
            .take_handler()
            .unwrap_or_else(|| Arc::clone(&self.config.handler));

        self.config.callback.on_before(&msg);
        let outcome = run_handler(&handler, msg.clone()).await;
        self.config.callback.on_after(&msg, &outcome);

        self.pool.put(envelope);
    }

    /// Timer refresher: writes elapsed milliseconds into the shared cell
    /// every second so workers never touch the clock themselves.
    async fn refresh_timer(self: Arc<Self>) {
        let mut tick = interval(TIMER_REFRESH_INTERVAL);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = tick.tick() => {
                    self.timer_ms.store(self.now_ms(), Ordering::Release);
                }
            }
        }
    }
}
