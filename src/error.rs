use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Submission to a stopped pipeline or a shut-down queue. Callers are
    /// expected to match on this variant.
    #[error("queue is closed")]
    QueueClosed,

    /// A bounded queue rejected the value because it is full.
    #[error("queue is full")]
    QueueFull,

    /// A transient queue-side failure while waiting for a value. Workers
    /// retry on this; it never terminates the cohort.
    #[error("queue interrupted - {0}")]
    Interrupted(String),

    /// A task handler returned an error or panicked. Delivered to the
    /// after-callback only, never surfaced through `map`/`submit`.
    #[error("handler failed - {0}")]
    Handler(String),
}

/// Rejected enqueue. Hands the value back to the caller so it can be
/// recycled, the way `tokio::sync::mpsc::error::SendError` does.
#[derive(Debug)]
pub struct PutError<I> {
    pub value: I,
    pub error: Error,
}

impl<I> PutError<I> {
    pub fn new(value: I, error: Error) -> Self {
        Self { value, error }
    }

    pub fn into_parts(self) -> (I, Error) {
        (self.value, self.error)
    }
}

impl<I> std::fmt::Display for PutError<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "put rejected - {}", self.error)
    }
}

impl<I: std::fmt::Debug> std::error::Error for PutError<I> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_error_roundtrip() {
        let err = PutError::new(42, Error::QueueFull);
        assert_eq!(err.to_string(), "put rejected - queue is full");
        let (value, error) = err.into_parts();
        assert_eq!(value, 42);
        assert_eq!(error, Error::QueueFull);
    }
}
