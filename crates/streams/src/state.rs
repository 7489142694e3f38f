//! Per-stream lifecycle state, last writer wins.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tether_store::CoordinationStore;
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::keys::KeySpace;
use crate::validate::{is_allowed_metadata_key, is_allowed_metadata_value, validate_stream_id};

/// Lifecycle status of a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// Created but not yet receiving chunks.
    #[default]
    Idle,

    /// An owner is writing chunks.
    Streaming,

    /// Finished cleanly. Terminal.
    Complete,

    /// Reclaimed after its owner went quiet. Terminal.
    Abandoned,
}

impl StreamStatus {
    /// The status name as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Complete => "complete",
            Self::Abandoned => "abandoned",
        }
    }

    /// Whether no further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Abandoned)
    }

    /// Whether a write may move a stream from `self` to `next`.
    ///
    /// Rewriting the current status is always allowed, except that nothing
    /// leaves a terminal state.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Idle | Self::Streaming)
                | (
                    Self::Streaming,
                    Self::Streaming | Self::Complete | Self::Abandoned
                )
                | (Self::Complete, Self::Complete)
                | (Self::Abandoned, Self::Abandoned)
        )
    }
}

impl Display for StreamStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Stored lifecycle record of one stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamState {
    /// The stream ID.
    pub id: String,

    /// Current status.
    pub status: StreamStatus,

    /// Time of the last write, in milliseconds since the Unix epoch. Never
    /// decreases.
    pub last_active: u64,

    /// Messages delivered so far.
    pub message_count: u64,

    /// Flat string metadata that passed the allow-list.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl StreamState {
    fn new(id: &str, now_ms: u64) -> Self {
        Self {
            id: id.to_string(),
            status: StreamStatus::default(),
            last_active: now_ms,
            message_count: 0,
            metadata: BTreeMap::new(),
        }
    }

    /// Milliseconds since the last write, as of `now_ms`.
    #[must_use]
    pub const fn inactive_for_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_active)
    }
}

/// Fields to merge onto a stream's state. Unset fields are left as they are.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateUpdate {
    /// New status, subject to the allowed transitions.
    pub status: Option<StreamStatus>,

    /// Replaces the message count.
    pub message_count: Option<u64>,

    /// Added to the message count after any replacement.
    pub add_messages: u64,

    /// Entries merged into the stored metadata. Entries failing the
    /// allow-list are dropped.
    pub metadata: BTreeMap<String, String>,
}

impl StateUpdate {
    /// An empty update, which only refreshes `last_active`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status.
    #[must_use]
    pub fn status(mut self, status: StreamStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Replaces the message count.
    #[must_use]
    pub fn message_count(mut self, count: u64) -> Self {
        self.message_count = Some(count);
        self
    }

    /// Adds `n` to the message count.
    #[must_use]
    pub fn add_messages(mut self, n: u64) -> Self {
        self.add_messages = self.add_messages.saturating_add(n);
        self
    }

    /// Adds one metadata entry.
    #[must_use]
    pub fn metadata<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Applies `update` to `current` (or to fresh `idle` state) at `now_ms`.
///
/// Returns the rejected transition as `Err((from, to))`.
fn merge(
    stream_id: &str,
    current: Option<StreamState>,
    update: StateUpdate,
    now_ms: u64,
) -> std::result::Result<StreamState, (StreamStatus, StreamStatus)> {
    let mut state = current.unwrap_or_else(|| StreamState::new(stream_id, now_ms));

    if let Some(next) = update.status {
        if !state.status.can_transition_to(next) {
            return Err((state.status, next));
        }
        state.status = next;
    }

    if let Some(count) = update.message_count {
        state.message_count = count;
    }
    state.message_count = state.message_count.saturating_add(update.add_messages);

    for (key, value) in update.metadata {
        if !is_allowed_metadata_key(&key) {
            warn!(stream_id, key = %key.escape_debug(), "dropping metadata entry with disallowed key");
            continue;
        }
        if !is_allowed_metadata_value(&value) {
            warn!(stream_id, key = %key, "dropping metadata entry with oversized value");
            continue;
        }
        state.metadata.insert(key, value);
    }

    state.last_active = state.last_active.max(now_ms);
    Ok(state)
}

/// Reads and writes stream lifecycle records.
///
/// Nothing is cached between calls; every read goes to the store.
#[derive(Clone, Debug)]
pub struct StateStore<S: CoordinationStore> {
    store: S,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
}

impl<S: CoordinationStore> StateStore<S> {
    /// Creates a state store writing under `keys`.
    pub fn new(store: S, keys: KeySpace, clock: Arc<dyn Clock>) -> Self {
        Self { store, keys, clock }
    }

    /// Reads the state of `stream_id`.
    ///
    /// A record that fails to parse is reported as absent.
    ///
    /// # Errors
    ///
    /// Validation errors for a malformed ID, `Error::Store` if the store cannot
    /// be reached.
    #[instrument(level = "debug", skip(self), fields(prefix = %self.keys.prefix()))]
    pub async fn get(&self, stream_id: &str) -> Result<Option<StreamState>, S::Error> {
        let stream_id = validate_stream_id(stream_id)?;
        let key = self.keys.stream_key(stream_id);

        let Some(bytes) = self.store.get(key.as_str()).await.map_err(Error::Store)? else {
            return Ok(None);
        };

        match serde_json::from_slice::<StreamState>(&bytes) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(key = %key, error = %e, "treating unreadable stream state as absent");
                Ok(None)
            }
        }
    }

    /// Merges `update` onto the state of `stream_id` and writes it back.
    ///
    /// The first write creates the record as `idle` with no messages. Every
    /// write refreshes `last_active`, which never moves backwards. Metadata
    /// entries failing the allow-list are dropped without failing the write.
    ///
    /// Returns the state as written.
    ///
    /// # Errors
    ///
    /// Validation errors for a malformed ID, `Error::InvalidTransition` for a
    /// disallowed status change, `Error::Store` if the store cannot be reached.
    #[instrument(level = "debug", skip(self, update), fields(prefix = %self.keys.prefix()))]
    pub async fn update(
        &self,
        stream_id: &str,
        update: StateUpdate,
    ) -> Result<StreamState, S::Error> {
        let stream_id = validate_stream_id(stream_id)?;
        let current = self.get(stream_id).await?;

        self.write(stream_id, current, update, self.clock.now_ms())
            .await
    }

    /// Like `update`, but only for an existing record that `guard` accepts.
    ///
    /// `guard` sees the record read for this write and the time the write is
    /// stamped with. Returns `Ok(None)` without writing when the record is
    /// absent, unreadable or rejected.
    #[instrument(level = "debug", skip(self, update, guard), fields(prefix = %self.keys.prefix()))]
    pub(crate) async fn update_if<F>(
        &self,
        stream_id: &str,
        update: StateUpdate,
        guard: F,
    ) -> Result<Option<StreamState>, S::Error>
    where
        F: FnOnce(&StreamState, u64) -> bool,
    {
        let stream_id = validate_stream_id(stream_id)?;
        let Some(current) = self.get(stream_id).await? else {
            return Ok(None);
        };

        let now_ms = self.clock.now_ms();
        if !guard(&current, now_ms) {
            return Ok(None);
        }

        self.write(stream_id, Some(current), update, now_ms)
            .await
            .map(Some)
    }

    async fn write(
        &self,
        stream_id: &str,
        current: Option<StreamState>,
        update: StateUpdate,
        now_ms: u64,
    ) -> Result<StreamState, S::Error> {
        let previous_status = current.as_ref().map(|state| state.status);

        let state = merge(stream_id, current, update, now_ms).map_err(|(from, to)| {
            Error::InvalidTransition {
                stream_id: stream_id.to_string(),
                from,
                to,
            }
        })?;

        let value = Bytes::from(serde_json::to_vec(&state)?);
        self.store
            .put(self.keys.stream_key(stream_id), value)
            .await
            .map_err(Error::Store)?;

        if previous_status != Some(state.status) {
            debug!(stream_id, status = %state.status, "stream status changed");
        }

        Ok(state)
    }
}
