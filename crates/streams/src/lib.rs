//! Lease-based ownership and lifecycle tracking for long-lived message streams.
//!
//! A writer takes the stream's lock with [`LockManager::acquire`], records
//! progress with [`StateStore::update`] as chunks arrive, and gives the lock
//! back with [`LockManager::release`]. Writers that vanish are caught by the
//! [`AbandonmentSweeper`], usually driven on an interval by [`spawn_sweeper`].
//!
//! All coordination state lives in a shared [`CoordinationStore`]; nothing is
//! held in-process between calls, so any number of instances can share one
//! store.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod clock;
mod config;
mod error;
mod keys;
mod lock;
mod scheduler;
mod state;
mod sweeper;
pub mod validate;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CoordinatorConfig, DEFAULT_LEASE, DEFAULT_PREFIX, DEFAULT_SCAN_BATCH_SIZE, SweepConfig,
};
pub use error::{Error, Result, ValidationError};
pub use keys::KeySpace;
pub use lock::{HealthStatus, LockManager, StreamLock};
pub use scheduler::{SweepHandle, spawn_sweeper};
pub use state::{StateStore, StateUpdate, StreamState, StreamStatus};
pub use sweeper::{AbandonmentSweeper, CleanupOptions};

use std::sync::Arc;

use tether_store::CoordinationStore;
use tokio::sync::mpsc;

/// Bundles the lock manager, state store and sweeper over one store handle.
#[derive(Clone, Debug)]
pub struct StreamCoordinator<S: CoordinationStore> {
    locks: LockManager<S>,
    states: StateStore<S>,
    sweeper: AbandonmentSweeper<S>,
}

impl<S: CoordinationStore> StreamCoordinator<S> {
    /// Creates a coordinator reading time from the system clock.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidIdentifier` if the configured prefix is
    /// not a valid key prefix.
    pub fn new(store: S, config: CoordinatorConfig) -> std::result::Result<Self, ValidationError> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Creates a coordinator reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidIdentifier` if the configured prefix is
    /// not a valid key prefix.
    pub fn with_clock(
        store: S,
        CoordinatorConfig {
            prefix,
            default_lease,
            scan_batch_size,
        }: CoordinatorConfig,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ValidationError> {
        let keys = KeySpace::new(prefix)?;

        Ok(Self {
            locks: LockManager::new(
                store.clone(),
                keys.clone(),
                Arc::clone(&clock),
                default_lease.unwrap_or(DEFAULT_LEASE),
            ),
            states: StateStore::new(store.clone(), keys.clone(), Arc::clone(&clock)),
            sweeper: AbandonmentSweeper::new(
                store,
                keys,
                clock,
                scan_batch_size.unwrap_or(DEFAULT_SCAN_BATCH_SIZE),
            ),
        })
    }

    /// The lock manager.
    #[must_use]
    pub const fn locks(&self) -> &LockManager<S> {
        &self.locks
    }

    /// The state store.
    #[must_use]
    pub const fn states(&self) -> &StateStore<S> {
        &self.states
    }

    /// The abandonment sweeper.
    #[must_use]
    pub const fn sweeper(&self) -> &AbandonmentSweeper<S> {
        &self.sweeper
    }

    /// Starts the recurring sweep described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidPattern` if `config.pattern` is set and
    /// malformed, so a bad pattern fails at startup instead of on every tick.
    pub fn spawn_sweeper(
        &self,
        config: SweepConfig,
        reports: Option<mpsc::Sender<Vec<String>>>,
    ) -> std::result::Result<SweepHandle, ValidationError> {
        if let Some(pattern) = &config.pattern {
            validate::validate_pattern(pattern)?;
        }

        Ok(spawn_sweeper(self.sweeper.clone(), config, reports))
    }
}
