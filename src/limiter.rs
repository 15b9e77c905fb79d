//! Token bucket gating worker spawns.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::Instant;

/// Non-blocking token bucket. Tokens refill `rate` per elapsed second,
/// capped at `burst`; `allow` takes one token or reports exhaustion.
///
/// Epochs are measured against a monotonic [`Instant`] taken at
/// construction, so refill follows virtual time under paused-clock tests.
pub(crate) struct SpawnGate {
    rate: u64,
    burst: u64,
    tokens: AtomicU64,
    last_epoch: AtomicU64,
    started_at: Instant,
}

impl SpawnGate {
    pub(crate) fn new(rate: u64, burst: u64) -> Self {
        Self {
            rate,
            burst,
            tokens: AtomicU64::new(burst),
            last_epoch: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Takes one token if available. At most one caller per epoch performs
    /// the refill; losers of the compare-exchange just draw from whatever
    /// is there.
    pub(crate) fn allow(&self) -> bool {
        let now = self.started_at.elapsed().as_secs();
        let prev = self.last_epoch.load(Ordering::Acquire);
        if now > prev
            && self
                .last_epoch
                .compare_exchange(prev, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            let refill = (now - prev).saturating_mul(self.rate);
            let _ = self
                .tokens
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |tokens| {
                    Some((tokens + refill).min(self.burst))
                });
        }

        self.tokens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |tokens| {
                tokens.checked_sub(1)
            })
            .is_ok()
    }
}
