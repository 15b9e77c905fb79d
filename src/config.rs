//! Shared configuration for the batch mapper and the streaming pipeline.

use std::fmt;
use std::sync::Arc;

use crate::handler::{Callback, Handler, NoopCallback, identity_handler};

/// Default number of concurrent workers.
pub(crate) const DEFAULT_WORKER_COUNT: usize = 2;

/// Upper bound on the configured worker count; anything outside
/// `1..=MAX_WORKER_COUNT` falls back to the default at core construction.
pub(crate) const MAX_WORKER_COUNT: usize = 524_280;

/// Options recognized by both execution cores. Built fluently; invalid
/// values are silently replaced with defaults when a core is constructed.
///
/// `collect_results` has no effect on the streaming pipeline.
pub struct Config<T> {
    pub(crate) worker_count: usize,
    pub(crate) callback: Arc<dyn Callback<T>>,
    pub(crate) handler: Handler<T>,
    pub(crate) collect_results: bool,
}

impl<T: Send + 'static> Config<T> {
    pub fn new() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            callback: Arc::new(NoopCallback),
            handler: identity_handler(),
            collect_results: false,
        }
    }

    /// Sets the target number of concurrent workers.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets the callback pair invoked around each task.
    pub fn with_callback(mut self, callback: impl Callback<T> + 'static) -> Self {
        self.callback = Arc::new(callback);
        self
    }

    /// Sets the default task handler.
    pub fn with_handler(mut self, handler: Handler<T>) -> Self {
        self.handler = handler;
        self
    }

    /// Makes the batch mapper materialize per-element results.
    pub fn with_result_collection(mut self) -> Self {
        self.collect_results = true;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Applies defaults to out-of-range options.
    pub(crate) fn validated(mut self) -> Self {
        if self.worker_count == 0 || self.worker_count > MAX_WORKER_COUNT {
            self.worker_count = DEFAULT_WORKER_COUNT;
        }
        self
    }
}

impl<T: Send + 'static> Default for Config<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Config<T> {
    fn clone(&self) -> Self {
        Self {
            worker_count: self.worker_count,
            callback: Arc::clone(&self.callback),
            handler: Arc::clone(&self.handler),
            collect_results: self.collect_results,
        }
    }
}

impl<T> fmt::Debug for Config<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("worker_count", &self.worker_count)
            .field("collect_results", &self.collect_results)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::<u64>::new();
        assert_eq!(config.worker_count(), DEFAULT_WORKER_COUNT);
        assert!(!config.collect_results);
    }

    #[test]
    fn test_validated_clamps_out_of_range() {
        let config = Config::<u64>::new().with_worker_count(0).validated();
        assert_eq!(config.worker_count(), DEFAULT_WORKER_COUNT);

        let config = Config::<u64>::new()
            .with_worker_count(MAX_WORKER_COUNT + 1)
            .validated();
        assert_eq!(config.worker_count(), DEFAULT_WORKER_COUNT);
    }

    #[test]
    fn test_validated_keeps_in_range() {
        let config = Config::<u64>::new().with_worker_count(200).validated();
        assert_eq!(config.worker_count(), 200);

        let config = Config::<u64>::new()
            .with_worker_count(MAX_WORKER_COUNT)
            .validated();
        assert_eq!(config.worker_count(), MAX_WORKER_COUNT);
    }
}
