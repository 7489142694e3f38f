//! Abstract interface for the shared key-value store backing stream
//! coordination.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

/// Marker trait for `CoordinationStore` errors
pub trait StoreError: Debug + Error + Send + Sync + 'static {}

/// One batch of keys returned by a cursor-based scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to pass to the next `scan` call. `0` means iteration is complete.
    pub cursor: u64,

    /// Keys matched in this batch. May be empty even when `cursor` is non-zero.
    pub keys: Vec<String>,
}

impl ScanPage {
    /// Whether this page ends the iteration.
    #[must_use]
    pub const fn is_last(&self) -> bool {
        self.cursor == 0
    }
}

/// A trait representing the capabilities the coordination subsystem needs from
/// a shared key-value store.
///
/// Any store that can provide an atomic "set if absent with expiry", plain
/// reads, writes and deletes, a cursor-based scan and a liveness probe is
/// substitutable.
#[async_trait]
pub trait CoordinationStore: Clone + Send + Sync + 'static {
    /// The error type for store operations.
    type Error: StoreError;

    /// Atomically writes `value` under `key` only if no live value exists,
    /// expiring it after `ttl`.
    ///
    /// Returns `true` if the value was written, `false` if the key was taken.
    async fn set_if_absent<K: Into<String> + Send>(
        &self,
        key: K,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool, Self::Error>;

    /// Unconditionally writes `value` under `key` without expiry.
    async fn put<K: Into<String> + Send>(&self, key: K, value: Bytes) -> Result<(), Self::Error>;

    /// Retrieves the live value stored under `key`.
    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error>;

    /// Deletes `key`. Returns `true` if a live value was removed.
    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<bool, Self::Error>;

    /// Examines roughly `count` keys starting at `cursor`, returning those that
    /// match the glob `pattern`.
    ///
    /// Start with cursor `0` and continue until the returned page has cursor
    /// `0`. Keys present for the whole iteration are returned at least once.
    async fn scan<P: Into<String> + Send>(
        &self,
        cursor: u64,
        pattern: P,
        count: usize,
    ) -> Result<ScanPage, Self::Error>;

    /// Round-trips a trivial request to confirm the store is reachable.
    async fn ping(&self) -> Result<(), Self::Error>;
}
