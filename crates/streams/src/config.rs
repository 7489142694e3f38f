use std::time::Duration;

use crate::sweeper::CleanupOptions;

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "streams";

/// Default lease granted by `acquire` when the caller does not pass one.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Default number of keys examined per scan batch.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 100;

/// Configuration for a `StreamCoordinator`.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Deployment namespace every key is built under.
    pub prefix: String,

    /// Lease used when `acquire` is called without one. Defaults to 30 seconds if not set.
    pub default_lease: Option<Duration>,

    /// Keys examined per scan round trip during a sweep. Defaults to 100 if not set.
    pub scan_batch_size: Option<usize>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            default_lease: None,
            scan_batch_size: None,
        }
    }
}

/// Configuration for the recurring abandonment sweep.
#[derive(Clone, Debug)]
pub struct SweepConfig {
    /// Time between sweeps.
    pub interval: Duration,

    /// Streams idle for longer than this are candidates for abandonment.
    pub max_inactive: Duration,

    /// Only streams that delivered fewer messages than this are abandoned.
    pub min_message_count: u64,

    /// Optional stream ID pattern narrowing each sweep.
    pub pattern: Option<String>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_inactive: Duration::from_secs(300),
            min_message_count: 1,
            pattern: None,
        }
    }
}

impl SweepConfig {
    /// The options passed to each `cleanup` run.
    #[must_use]
    pub fn cleanup_options(&self) -> CleanupOptions {
        CleanupOptions {
            max_inactive: self.max_inactive,
            min_message_count: self.min_message_count,
            pattern: self.pattern.clone(),
        }
    }
}
