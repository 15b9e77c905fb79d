//! Handler and callback surface shared by both execution cores.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::{Error, Result};

/// Future returned by a task handler.
pub type HandlerFuture<T> = BoxFuture<'static, Result<T>>;

/// Task function applied to a payload. One handler, one payload type per
/// core instance; the streaming pipeline additionally accepts a per-task
/// override carried on the envelope.
pub type Handler<T> = Arc<dyn Fn(T) -> HandlerFuture<T> + Send + Sync>;

/// Adapts an async closure into a [`Handler`].
///
/// ```
/// use flowline::handler_fn;
///
/// let double = handler_fn(|msg: u32| async move { Ok(msg * 2) });
/// # let _ = double;
/// ```
pub fn handler_fn<T, F, Fut>(f: F) -> Handler<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move |msg| Box::pin(f(msg)))
}

/// Builds the identity handler used when none is configured.
pub(crate) fn identity_handler<T: Send + 'static>() -> Handler<T> {
    Arc::new(|msg| Box::pin(async move { Ok(msg) }))
}

/// Runs a handler with panic containment at the worker boundary. A
/// panicking handler reports as [`Error::Handler`] instead of taking the
/// worker down with it.
pub(crate) async fn run_handler<T>(handler: &Handler<T>, msg: T) -> Result<T> {
    match AssertUnwindSafe(handler(msg)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            Err(Error::Handler(reason))
        }
    }
}

/// Hooks invoked around every task: `on_before` with the payload, then the
/// handler, then `on_after` with the payload and the handler's outcome.
pub trait Callback<T>: Send + Sync {
    fn on_before(&self, msg: &T);
    fn on_after(&self, msg: &T, result: &Result<T>);
}

/// Default callback pair; both hooks do nothing.
pub struct NoopCallback;

impl<T> Callback<T> for NoopCallback {
    fn on_before(&self, _msg: &T) {}
    fn on_after(&self, _msg: &T, _result: &Result<T>) {}
}
