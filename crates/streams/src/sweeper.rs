//! Reclaims streams whose owner stopped writing without finishing.

use std::sync::Arc;
use std::time::Duration;

use tether_store::CoordinationStore;
use tracing::{debug, info, instrument};

use crate::clock::{Clock, duration_ms};
use crate::error::{Error, Result};
use crate::keys::KeySpace;
use crate::state::{StateStore, StateUpdate, StreamState, StreamStatus};
use crate::validate::{validate_pattern, validate_stream_id};

/// Thresholds for one sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanupOptions {
    /// A stream must have been idle for strictly longer than this.
    pub max_inactive: Duration,

    /// A stream must have delivered strictly fewer messages than this.
    pub min_message_count: u64,

    /// Optional stream ID glob (`*` wildcard) narrowing the sweep.
    pub pattern: Option<String>,
}

impl CleanupOptions {
    /// Whether `state` should be marked abandoned as of `now_ms`.
    ///
    /// Only `streaming` streams qualify; every other status is left alone.
    #[must_use]
    pub fn is_abandoned(&self, state: &StreamState, now_ms: u64) -> bool {
        state.status == StreamStatus::Streaming
            && state.inactive_for_ms(now_ms) > duration_ms(self.max_inactive)
            && state.message_count < self.min_message_count
    }
}

/// Walks stream state in bounded batches and abandons stale streams.
#[derive(Clone, Debug)]
pub struct AbandonmentSweeper<S: CoordinationStore> {
    store: S,
    states: StateStore<S>,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl<S: CoordinationStore> AbandonmentSweeper<S> {
    /// Creates a sweeper reading `batch_size` keys per scan round trip.
    pub fn new(store: S, keys: KeySpace, clock: Arc<dyn Clock>, batch_size: usize) -> Self {
        Self {
            states: StateStore::new(store.clone(), keys.clone(), Arc::clone(&clock)),
            store,
            keys,
            clock,
            batch_size: batch_size.max(1),
        }
    }

    /// Runs one sweep and returns the IDs of streams it moved to `abandoned`.
    ///
    /// Records that cannot be read are skipped. A stream that stops qualifying
    /// between the first read and the write (new messages, fresh activity, or
    /// abandoned by another sweep) is left as it is and not reported. Locks on
    /// abandoned streams are not touched; they lapse with their lease.
    ///
    /// # Errors
    ///
    /// `Error::Validation` for a malformed pattern, `Error::Store` if the store
    /// fails part way through.
    #[instrument(level = "debug", skip(self), fields(prefix = %self.keys.prefix()))]
    pub async fn cleanup(&self, options: &CleanupOptions) -> Result<Vec<String>, S::Error> {
        let pattern = options.pattern.as_deref().map(validate_pattern).transpose()?;
        let match_pattern = self.keys.stream_pattern(pattern);

        let mut abandoned = Vec::new();
        let mut examined = 0usize;
        let mut cursor = 0;

        loop {
            let page = self
                .store
                .scan(cursor, match_pattern.as_str(), self.batch_size)
                .await
                .map_err(Error::Store)?;

            for key in &page.keys {
                examined += 1;
                if let Some(stream_id) = self.sweep_key(key, options).await? {
                    abandoned.push(stream_id);
                }
            }

            if page.is_last() {
                break;
            }
            cursor = page.cursor;
        }

        if abandoned.is_empty() {
            debug!(examined, "sweep found nothing to abandon");
        } else {
            info!(examined, abandoned = abandoned.len(), "sweep abandoned streams");
        }

        Ok(abandoned)
    }

    async fn sweep_key(
        &self,
        key: &str,
        options: &CleanupOptions,
    ) -> Result<Option<String>, S::Error> {
        let Some(stream_id) = self
            .keys
            .stream_id_from_key(key)
            .filter(|id| validate_stream_id(id).is_ok())
        else {
            debug!(key, "skipping key outside the stream id alphabet");
            return Ok(None);
        };

        let Some(state) = self.states.get(stream_id).await? else {
            return Ok(None);
        };

        if !options.is_abandoned(&state, self.clock.now_ms()) {
            return Ok(None);
        }

        // The predicate must hold for the record the abandonment is merged onto.
        let Some(written) = self
            .states
            .update_if(
                stream_id,
                StateUpdate::new().status(StreamStatus::Abandoned),
                |fresh, now_ms| options.is_abandoned(fresh, now_ms),
            )
            .await?
        else {
            debug!(stream_id, "stream changed during sweep, leaving it");
            return Ok(None);
        };

        info!(
            stream_id,
            message_count = written.message_count,
            last_active = state.last_active,
            "stream abandoned"
        );
        Ok(Some(stream_id.to_string()))
    }
}
