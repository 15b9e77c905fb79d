//! In-process task execution core with two complementary modes over a
//! caller-supplied handler:
//!
//! - [`Mapper`] applies one handler to every element of a finite input in
//!   parallel and returns per-element results in input order.
//! - [`Pipeline`] accepts individually submitted tasks (optionally
//!   delayed), dispatches them to a dynamically sized worker cohort
//!   draining an external queue, and processes each with a per-task or
//!   default handler. The cohort grows on demand under a spawn rate limit
//!   and decays after idle timeout, never below one worker.
//!
//! Both cores share a [`Config`] and invoke the configured
//! [`Callback`] around each task: `on_before(msg)`, then the handler, then
//! `on_after(msg, result)`.
//!
//! # Batch mapping
//!
//! ```
//! use flowline::{Config, Mapper, handler_fn};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mapper = Mapper::new(
//!         Config::new()
//!             .with_worker_count(4)
//!             .with_handler(handler_fn(|msg: u64| async move { Ok(msg * 2) }))
//!             .with_result_collection(),
//!     );
//!
//!     let doubled = mapper.map(vec![1, 2, 3]).await;
//!     assert_eq!(doubled, vec![Some(2), Some(4), Some(6)]);
//!     mapper.stop().await;
//! }
//! ```
//!
//! # Streaming
//!
//! ```no_run
//! use std::time::Duration;
//! use flowline::queue::memory::InMemoryDelayingQueue;
//! use flowline::{Config, Pipeline, handler_fn};
//!
//! #[tokio::main]
//! async fn main() -> flowline::Result<()> {
//!     let pipeline = Pipeline::new(
//!         InMemoryDelayingQueue::new(),
//!         Config::new()
//!             .with_worker_count(8)
//!             .with_handler(handler_fn(|msg: String| async move {
//!                 println!("{msg}");
//!                 Ok(msg)
//!             })),
//!     );
//!
//!     pipeline.submit("now".to_string()).await?;
//!     pipeline
//!         .submit_after("later".to_string(), Duration::from_secs(1))
//!         .await?;
//!
//!     tokio::time::sleep(Duration::from_secs(2)).await;
//!     pipeline.stop().await;
//!     Ok(())
//! }
//! ```

mod batch;
mod config;
mod envelope;
mod error;
mod handler;
mod limiter;
mod pipeline;

/// Queue contracts the pipeline consumes, the non-delaying adapter, and
/// the bundled in-memory queues.
pub mod queue;

pub use batch::Mapper;
pub use config::Config;
pub use envelope::Envelope;
pub use error::{Error, PutError, Result};
pub use handler::{Callback, Handler, HandlerFuture, NoopCallback, handler_fn};
pub use pipeline::Pipeline;
pub use queue::{DelayingTaskQueue, NonDelayingQueue, TaskQueue};
