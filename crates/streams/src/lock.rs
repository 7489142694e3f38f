//! Lease-based exclusive locks per stream.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tether_store::CoordinationStore;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, duration_ms};
use crate::error::{Error, Result};
use crate::keys::KeySpace;
use crate::validate::{validate_lock_id, validate_stream_id};

/// Ownership of a stream, valid until `expires_at`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamLock {
    /// The locked stream.
    pub stream_id: String,

    /// Token naming the owner.
    pub lock_id: String,

    /// When the lease lapses, in milliseconds since the Unix epoch.
    pub expires_at: u64,
}

/// What is persisted under the lock key.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockRecord {
    owner: String,
    expires_at: u64,
}

/// Result of a store liveness probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthStatus {
    /// Whether the probe round trip succeeded.
    pub healthy: bool,

    /// How long the probe took, successful or not.
    pub latency: Duration,
}

impl HealthStatus {
    /// Probe latency in whole milliseconds.
    #[must_use]
    pub fn latency_ms(&self) -> u64 {
        duration_ms(self.latency)
    }
}

/// Grants at most one owner per stream for a bounded lease.
///
/// Exclusivity comes from the store's atomic set-if-absent; nothing is held
/// in-process. A crashed owner blocks its stream for at most one lease.
#[derive(Clone, Debug)]
pub struct LockManager<S: CoordinationStore> {
    store: S,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
    default_lease: Duration,
}

impl<S: CoordinationStore> LockManager<S> {
    /// Creates a lock manager writing under `keys`.
    pub fn new(store: S, keys: KeySpace, clock: Arc<dyn Clock>, default_lease: Duration) -> Self {
        Self {
            store,
            keys,
            clock,
            default_lease,
        }
    }

    /// The lease applied when `acquire` is called without one.
    #[must_use]
    pub const fn default_lease(&self) -> Duration {
        self.default_lease
    }

    /// Attempts to take the lock on `stream_id` for `lock_id`, without waiting.
    ///
    /// Returns `Ok(None)` if another owner holds a live lease. That is an
    /// expected outcome: retrying and backing off is up to the caller.
    ///
    /// # Errors
    ///
    /// Validation errors for malformed IDs or a zero lease, `Error::Store` if
    /// the store cannot be reached.
    #[instrument(level = "debug", skip(self), fields(prefix = %self.keys.prefix()))]
    pub async fn acquire(
        &self,
        stream_id: &str,
        lock_id: &str,
        lease: Option<Duration>,
    ) -> Result<Option<StreamLock>, S::Error> {
        let stream_id = validate_stream_id(stream_id)?;
        let lock_id = validate_lock_id(lock_id)?;

        let lease = lease.unwrap_or(self.default_lease);
        if lease < Duration::from_millis(1) {
            return Err(Error::InvalidLease);
        }

        let expires_at = self.clock.now_ms().saturating_add(duration_ms(lease));
        let record = LockRecord {
            owner: lock_id.to_string(),
            expires_at,
        };
        let value = Bytes::from(serde_json::to_vec(&record)?);

        let acquired = self
            .store
            .set_if_absent(self.keys.lock_key(stream_id), value, lease)
            .await
            .map_err(Error::Store)?;

        if acquired {
            info!(stream_id, lock_id, expires_at, "lock acquired");
            Ok(Some(StreamLock {
                stream_id: stream_id.to_string(),
                lock_id: lock_id.to_string(),
                expires_at,
            }))
        } else {
            debug!(stream_id, lock_id, "lock held by another owner");
            Ok(None)
        }
    }

    /// Releases the lock on `stream_id` if `lock_id` still owns it.
    ///
    /// Returns `false` when there is nothing to release or a different owner
    /// holds the lock; in that case nothing is deleted. The read and delete are
    /// separate round trips: if the lease lapses in between, the delete is a
    /// no-op on an already free lock.
    ///
    /// # Errors
    ///
    /// Validation errors for malformed IDs, `Error::Store` if the store cannot
    /// be reached.
    #[instrument(level = "debug", skip(self), fields(prefix = %self.keys.prefix()))]
    pub async fn release(&self, stream_id: &str, lock_id: &str) -> Result<bool, S::Error> {
        let stream_id = validate_stream_id(stream_id)?;
        let lock_id = validate_lock_id(lock_id)?;

        let key = self.keys.lock_key(stream_id);
        let Some(record) = self.read_record(&key).await? else {
            debug!(stream_id, lock_id, "no lock to release");
            return Ok(false);
        };

        if record.owner != lock_id {
            debug!(stream_id, lock_id, holder = %record.owner, "lock owned by someone else, not releasing");
            return Ok(false);
        }

        self.store.del(key).await.map_err(Error::Store)?;
        info!(stream_id, lock_id, "lock released");
        Ok(true)
    }

    /// Returns the current holder of the lock on `stream_id`, if any.
    ///
    /// # Errors
    ///
    /// Validation errors for a malformed ID, `Error::Store` if the store cannot
    /// be reached.
    pub async fn inspect(&self, stream_id: &str) -> Result<Option<StreamLock>, S::Error> {
        let stream_id = validate_stream_id(stream_id)?;

        Ok(self
            .read_record(&self.keys.lock_key(stream_id))
            .await?
            .map(|record| StreamLock {
                stream_id: stream_id.to_string(),
                lock_id: record.owner,
                expires_at: record.expires_at,
            }))
    }

    /// Round-trips a ping to the store. Never fails; an unreachable store is
    /// reported as unhealthy.
    pub async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let result = self.store.ping().await;
        let latency = started.elapsed();

        match result {
            Ok(()) => HealthStatus {
                healthy: true,
                latency,
            },
            Err(e) => {
                warn!(error = %e, ?latency, "store health check failed");
                HealthStatus {
                    healthy: false,
                    latency,
                }
            }
        }
    }

    async fn read_record(&self, key: &str) -> Result<Option<LockRecord>, S::Error> {
        let Some(bytes) = self.store.get(key).await.map_err(Error::Store)? else {
            return Ok(None);
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(key, error = %e, "unreadable lock record");
                Ok(None)
            }
        }
    }
}
