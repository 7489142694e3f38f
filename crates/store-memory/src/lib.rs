//! In-memory (single node) implementation of the coordination store for local
//! development and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod glob;

pub use error::Error;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tether_store::{CoordinationStore, ScanPage};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::glob::glob_match;

#[derive(Debug)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
    seq: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Entries plus an insertion-ordered index used as the scan cursor space.
///
/// A key keeps its sequence number until it is deleted or expires, so keys that
/// live through a whole scan are visited exactly once.
#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl Inner {
    fn evict_if_expired(&mut self, key: &str, now: Instant) -> bool {
        let expired = self.entries.get(key).is_some_and(|e| e.is_expired(now));
        if expired {
            trace!(key, "evicting expired key");
            self.remove(key);
        }
        expired
    }

    fn live(&mut self, key: &str, now: Instant) -> Option<&Entry> {
        self.evict_if_expired(key, now);
        self.entries.get(key)
    }

    fn insert(&mut self, key: String, value: Bytes, expires_at: Option<Instant>) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.expires_at = expires_at;
            return;
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        self.order.insert(seq, key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                seq,
            },
        );
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }
}

/// In-memory coordination store.
///
/// Clones share the same underlying map. Expiry follows the tokio clock, so
/// tests can drive leases with `tokio::time::pause` and `advance`.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a new `MemoryStore`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulates an outage: while unavailable every operation fails with
    /// `Error::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live keys currently held.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        inner.entries.values().filter(|e| !e.is_expired(now)).count()
    }

    /// Whether the store holds no live keys.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<(), Error> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Unavailable)
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    type Error = Error;

    async fn set_if_absent<K: Into<String> + Send>(
        &self,
        key: K,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool, Self::Error> {
        self.check_available()?;

        let key = key.into();
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        if inner.live(&key, now).is_some() {
            return Ok(false);
        }

        inner.insert(key, value, Some(now + ttl));
        Ok(true)
    }

    async fn put<K: Into<String> + Send>(&self, key: K, value: Bytes) -> Result<(), Self::Error> {
        self.check_available()?;

        let key = key.into();
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        inner.evict_if_expired(&key, now);
        inner.insert(key, value, None);
        Ok(())
    }

    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error> {
        self.check_available()?;

        let key = key.into();
        let mut inner = self.inner.lock().await;
        Ok(inner.live(&key, Instant::now()).map(|e| e.value.clone()))
    }

    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<bool, Self::Error> {
        self.check_available()?;

        let key = key.into();
        let mut inner = self.inner.lock().await;

        if inner.evict_if_expired(&key, Instant::now()) {
            return Ok(false);
        }
        Ok(inner.remove(&key).is_some())
    }

    async fn scan<P: Into<String> + Send>(
        &self,
        cursor: u64,
        pattern: P,
        count: usize,
    ) -> Result<ScanPage, Self::Error> {
        self.check_available()?;

        let pattern = pattern.into();
        let count = count.max(1);
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let examined: Vec<(u64, String)> = inner
            .order
            .range(cursor.saturating_add(1)..)
            .take(count)
            .map(|(seq, key)| (*seq, key.clone()))
            .collect();

        let mut keys = Vec::new();
        for (_, key) in &examined {
            if inner.evict_if_expired(key, now) {
                continue;
            }
            if glob_match(&pattern, key) {
                keys.push(key.clone());
            }
        }

        let next_cursor = match examined.last() {
            Some((last, _)) if inner.order.range(last + 1..).next().is_some() => *last,
            _ => 0,
        };

        Ok(ScanPage {
            cursor: next_cursor,
            keys,
        })
    }

    async fn ping(&self) -> Result<(), Self::Error> {
        self.check_available()
    }
}
