use thiserror::Error;

/// Terminal causes delivered through a request's completion handle.
///
/// `Clone` so a single backend failure can fan out to every request in the
/// affected batch carrying the same cause.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InferError {
    #[error("queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("model is shut down")]
    Shutdown,

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("request canceled before batching")]
    Canceled,

    #[error("backend execution failed: {0}")]
    Backend(String),
}
