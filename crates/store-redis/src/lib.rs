//! Implementation of the coordination store on top of Redis.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::{Cmd, FromRedisValue};
use tether_store::{CoordinationStore, ScanPage};
use tracing::{debug, info};

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the `RedisStore`.
#[derive(Clone, Debug)]
pub struct RedisStoreConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`.
    pub url: String,

    /// Timeout for each individual command. Defaults to 10 seconds if not set.
    pub operation_timeout: Option<Duration>,
}

/// Coordination store backed by a single Redis deployment.
///
/// Uses one multiplexed connection shared by all clones. Commands are never
/// retried here; a failure or timeout is returned to the caller as-is.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    operation_timeout: Duration,
    url: String,
}

impl Debug for RedisStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("RedisStore")
            .field("url", &self.url)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Opens a multiplexed connection to the configured server.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connect` if the URL is invalid or the server refuses the
    /// connection, and `Error::Timeout` if connecting takes longer than the
    /// operation timeout.
    pub async fn connect(
        RedisStoreConfig {
            url,
            operation_timeout,
        }: RedisStoreConfig,
    ) -> Result<Self, Error> {
        let operation_timeout = operation_timeout.unwrap_or(DEFAULT_OPERATION_TIMEOUT);
        let client = redis::Client::open(url.as_str()).map_err(Error::Connect)?;

        let connection =
            tokio::time::timeout(operation_timeout, client.get_multiplexed_async_connection())
                .await
                .map_err(|_| Error::Timeout {
                    command: "CONNECT",
                    timeout: operation_timeout,
                })?
                .map_err(Error::Connect)?;

        info!(%url, "connected to redis");

        Ok(Self {
            connection,
            operation_timeout,
            url,
        })
    }

    async fn run<T>(&self, command: &'static str, cmd: Cmd) -> Result<T, Error>
    where
        T: FromRedisValue + Send,
    {
        let mut connection = self.connection.clone();

        match tokio::time::timeout(self.operation_timeout, cmd.query_async::<T>(&mut connection))
            .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => {
                debug!(command, error = %source, "redis command failed");
                Err(Error::Command { command, source })
            }
            Err(_) => {
                debug!(command, timeout = ?self.operation_timeout, "redis command timed out");
                Err(Error::Timeout {
                    command,
                    timeout: self.operation_timeout,
                })
            }
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    type Error = Error;

    async fn set_if_absent<K: Into<String> + Send>(
        &self,
        key: K,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool, Self::Error> {
        // PX rejects zero; a sub-millisecond lease rounds up to one.
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let key: String = key.into();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key)
            .arg(value.as_ref())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms);

        let reply: Option<String> = self.run("SET", cmd).await?;
        Ok(reply.is_some())
    }

    async fn put<K: Into<String> + Send>(&self, key: K, value: Bytes) -> Result<(), Self::Error> {
        let key: String = key.into();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref());

        let _: String = self.run("SET", cmd).await?;
        Ok(())
    }

    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error> {
        let key: String = key.into();
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);

        let reply: Option<Vec<u8>> = self.run("GET", cmd).await?;
        Ok(reply.map(Bytes::from))
    }

    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<bool, Self::Error> {
        let key: String = key.into();
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);

        let removed: i64 = self.run("DEL", cmd).await?;
        Ok(removed > 0)
    }

    async fn scan<P: Into<String> + Send>(
        &self,
        cursor: u64,
        pattern: P,
        count: usize,
    ) -> Result<ScanPage, Self::Error> {
        let pattern: String = pattern.into();
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1));

        let (cursor, keys): (u64, Vec<String>) = self.run("SCAN", cmd).await?;
        Ok(ScanPage { cursor, keys })
    }

    async fn ping(&self) -> Result<(), Self::Error> {
        let _: String = self.run("PING", redis::cmd("PING")).await?;
        Ok(())
    }
}
