//! Error types for the forum event core.

use thiserror::Error;

/// Result type alias using the forum core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type shared by the bus, the stores and the workflows.
///
/// For message handlers the variant matters only for logging: any `Err`
/// returned from a handler means "redeliver later". Handlers that decide a
/// message can never succeed log it and return `Ok(())` instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Queue backend failed to enqueue, claim or acknowledge
    #[error("Queue error: {0}")]
    Queue(String),

    /// Chat model generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// RAG/vector store call failed
    #[error("RAG error: {0}")]
    Rag(String),

    /// Webhook delivery failed
    #[error("Webhook error: {0}")]
    Webhook(String),

    /// Object storage call failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Outcome deliberately postponed to a later delivery of the same message.
    #[error("Deferred: {0}")]
    Deferred(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a redelivery could plausibly produce a different outcome.
    ///
    /// Used by the dispatcher to pick a log level; redelivery itself happens
    /// for every handler error regardless.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::NotFound(_)
                | Error::Serialization(_)
                | Error::Config(_)
                | Error::InvalidInput(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
