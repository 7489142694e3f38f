use std::time::Duration;

use tether_store::StoreError;
use thiserror::Error;

/// Errors that can occur when using the Redis store.
#[derive(Error, Debug)]
pub enum Error {
    /// The connection URL could not be parsed or the initial connection failed.
    #[error("failed to connect to redis: {0}")]
    Connect(#[source] redis::RedisError),

    /// A command was rejected or the connection broke while it was in flight.
    #[error("redis {command} failed: {source}")]
    Command {
        /// The command that failed.
        command: &'static str,
        /// The underlying client error.
        #[source]
        source: redis::RedisError,
    },

    /// A command did not complete within the configured operation timeout.
    #[error("redis {command} timed out after {timeout:?}")]
    Timeout {
        /// The command that timed out.
        command: &'static str,
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

impl Error {
    /// Check if this error is potentially recoverable with retry.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Connect(e) | Self::Command { source: e, .. } => e.is_io_error(),
        }
    }
}

impl StoreError for Error {}
