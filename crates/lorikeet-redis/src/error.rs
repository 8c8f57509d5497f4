//! Error types for lorikeet-redis

use std::time::Duration;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for bus operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Responder error: {0}")]
    Responder(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// How a scatter-gather query can come back without an answer.
///
/// "Nobody heard the question" and "everybody declined it" are different
/// outcomes to callers (the config service shows a different message for
/// each), so they are separate variants rather than one opaque failure.
#[derive(Debug, Error)]
pub enum AskError {
    /// Nobody was subscribed to the query channel at publish time.
    #[error("no responder heard the query")]
    Unreachable,

    /// Every responder that heard the query declined it.
    #[error("all {0} responders declined the query")]
    Declined(u64),

    /// No terminal answer arrived before the deadline.
    #[error("no answer within {0:?}")]
    TimedOut(Duration),

    /// A query with the same prefix and key is already in flight on this client.
    #[error("a query with this key is already in flight")]
    Pending,

    #[error(transparent)]
    Transport(#[from] Error),
}
