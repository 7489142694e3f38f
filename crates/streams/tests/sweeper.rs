use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use bytes::Bytes;
use tether_store::{CoordinationStore, ScanPage};
use tether_store_memory::MemoryStore;
use tether_streams::{
    CleanupOptions, CoordinatorConfig, Error, ManualClock, StateUpdate, StreamCoordinator,
    StreamStatus, ValidationError,
};

const START_MS: u64 = 1_700_000_000_000;

fn setup_with_batch(
    batch_size: usize,
) -> (StreamCoordinator<MemoryStore>, MemoryStore, ManualClock) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store = MemoryStore::new();
    let clock = ManualClock::new(START_MS);
    let coordinator = StreamCoordinator::with_clock(
        store.clone(),
        CoordinatorConfig {
            scan_batch_size: Some(batch_size),
            ..CoordinatorConfig::default()
        },
        Arc::new(clock.clone()),
    )
    .expect("config is valid");
    (coordinator, store, clock)
}

fn setup() -> (StreamCoordinator<MemoryStore>, MemoryStore, ManualClock) {
    setup_with_batch(100)
}

fn options(pattern: Option<&str>) -> CleanupOptions {
    CleanupOptions {
        max_inactive: Duration::from_millis(5_000),
        min_message_count: 10,
        pattern: pattern.map(str::to_string),
    }
}

async fn start_stream(coordinator: &StreamCoordinator<MemoryStore>, id: &str, messages: u64) {
    coordinator
        .states()
        .update(
            id,
            StateUpdate::new()
                .status(StreamStatus::Streaming)
                .add_messages(messages),
        )
        .await
        .expect("update failed");
}

async fn status_of<S: CoordinationStore>(coordinator: &StreamCoordinator<S>, id: &str) -> StreamStatus {
    coordinator
        .states()
        .get(id)
        .await
        .unwrap()
        .expect("state should exist")
        .status
}

#[tokio::test]
async fn test_only_stale_low_output_streams_are_abandoned() {
    let (coordinator, _, clock) = setup();

    start_stream(&coordinator, "few-messages", 3).await;
    start_stream(&coordinator, "many-messages", 15).await;
    start_stream(&coordinator, "finished", 3).await;
    coordinator
        .states()
        .update("finished", StateUpdate::new().status(StreamStatus::Complete))
        .await
        .unwrap();
    coordinator
        .states()
        .update("never-started", StateUpdate::new())
        .await
        .unwrap();

    clock.advance(Duration::from_millis(6_000));

    let abandoned = coordinator.sweeper().cleanup(&options(None)).await.unwrap();

    assert_eq!(abandoned, vec!["few-messages".to_string()]);
    assert_eq!(
        status_of(&coordinator, "few-messages").await,
        StreamStatus::Abandoned
    );
    assert_eq!(
        status_of(&coordinator, "many-messages").await,
        StreamStatus::Streaming
    );
    assert_eq!(
        status_of(&coordinator, "finished").await,
        StreamStatus::Complete
    );
    assert_eq!(
        status_of(&coordinator, "never-started").await,
        StreamStatus::Idle
    );
}

#[tokio::test]
async fn test_inactivity_threshold_is_strict() {
    let (coordinator, _, clock) = setup();
    start_stream(&coordinator, "stream-1", 0).await;

    clock.advance(Duration::from_millis(5_000));
    assert!(
        coordinator
            .sweeper()
            .cleanup(&options(None))
            .await
            .unwrap()
            .is_empty()
    );

    clock.advance(Duration::from_millis(1));
    assert_eq!(
        coordinator.sweeper().cleanup(&options(None)).await.unwrap(),
        vec!["stream-1".to_string()]
    );
}

#[tokio::test]
async fn test_abandonment_refreshes_last_active() {
    let (coordinator, _, clock) = setup();
    start_stream(&coordinator, "stream-1", 1).await;
    clock.advance(Duration::from_millis(10_000));

    coordinator.sweeper().cleanup(&options(None)).await.unwrap();

    let state = coordinator.states().get("stream-1").await.unwrap().unwrap();
    assert_eq!(state.status, StreamStatus::Abandoned);
    assert_eq!(state.last_active, START_MS + 10_000);
    assert_eq!(state.message_count, 1);
}

#[tokio::test]
async fn test_second_sweep_finds_nothing() {
    let (coordinator, _, clock) = setup();
    start_stream(&coordinator, "stream-1", 0).await;
    clock.advance(Duration::from_secs(60));

    assert_eq!(
        coordinator
            .sweeper()
            .cleanup(&options(None))
            .await
            .unwrap()
            .len(),
        1
    );
    clock.advance(Duration::from_secs(60));
    assert!(
        coordinator
            .sweeper()
            .cleanup(&options(None))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_unreadable_records_are_skipped() {
    let (coordinator, store, clock) = setup();

    start_stream(&coordinator, "aaa", 0).await;
    store
        .put("streams:stream:bbb", Bytes::from_static(b"garbage"))
        .await
        .unwrap();
    store
        .put(
            "streams:stream:bad id with spaces",
            Bytes::from_static(b"{}"),
        )
        .await
        .unwrap();
    start_stream(&coordinator, "ccc", 0).await;
    clock.advance(Duration::from_secs(60));

    let mut abandoned = coordinator.sweeper().cleanup(&options(None)).await.unwrap();
    abandoned.sort();

    assert_eq!(abandoned, vec!["aaa".to_string(), "ccc".to_string()]);
    assert_eq!(
        store.get("streams:stream:bbb").await.unwrap(),
        Some(Bytes::from_static(b"garbage"))
    );
}

#[tokio::test]
async fn test_pattern_narrows_the_sweep() {
    let (coordinator, _, clock) = setup();

    start_stream(&coordinator, "job-1", 0).await;
    start_stream(&coordinator, "job-2", 0).await;
    start_stream(&coordinator, "task-1", 0).await;
    clock.advance(Duration::from_secs(60));

    let mut abandoned = coordinator
        .sweeper()
        .cleanup(&options(Some("job-*")))
        .await
        .unwrap();
    abandoned.sort();

    assert_eq!(abandoned, vec!["job-1".to_string(), "job-2".to_string()]);
    assert_eq!(
        status_of(&coordinator, "task-1").await,
        StreamStatus::Streaming
    );
}

#[tokio::test]
async fn test_empty_pattern_matches_everything() {
    let (coordinator, _, clock) = setup();

    start_stream(&coordinator, "job-1", 0).await;
    start_stream(&coordinator, "task-1", 0).await;
    clock.advance(Duration::from_secs(60));

    assert_eq!(
        coordinator
            .sweeper()
            .cleanup(&options(Some("")))
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_invalid_pattern_is_rejected() {
    let (coordinator, _, _) = setup();

    assert_matches!(
        coordinator
            .sweeper()
            .cleanup(&options(Some("job?[0-9]")))
            .await,
        Err(Error::Validation(ValidationError::InvalidPattern { .. }))
    );
    assert_matches!(
        coordinator
            .sweeper()
            .cleanup(&options(Some(&"*".repeat(257))))
            .await,
        Err(Error::Validation(ValidationError::InvalidPattern { .. }))
    );
}

#[tokio::test]
async fn test_sweep_covers_every_batch() {
    let (coordinator, _, clock) = setup_with_batch(3);

    for i in 0..20 {
        start_stream(&coordinator, &format!("stream-{i}"), 0).await;
    }
    clock.advance(Duration::from_secs(60));

    let mut abandoned = coordinator.sweeper().cleanup(&options(None)).await.unwrap();
    abandoned.sort();
    abandoned.dedup();

    assert_eq!(abandoned.len(), 20);
}

#[tokio::test]
async fn test_other_prefixes_and_locks_are_left_alone() {
    let (coordinator, store, clock) = setup();
    let neighbour = StreamCoordinator::with_clock(
        store.clone(),
        CoordinatorConfig {
            prefix: "other".to_string(),
            ..CoordinatorConfig::default()
        },
        Arc::new(clock.clone()),
    )
    .unwrap();

    start_stream(&coordinator, "stream-1", 0).await;
    start_stream(&neighbour, "stream-1", 0).await;
    coordinator
        .locks()
        .acquire("stream-1", "writer", Some(Duration::from_secs(600)))
        .await
        .unwrap()
        .unwrap();
    clock.advance(Duration::from_secs(60));

    let abandoned = coordinator.sweeper().cleanup(&options(None)).await.unwrap();

    assert_eq!(abandoned, vec!["stream-1".to_string()]);
    assert_eq!(
        status_of(&neighbour, "stream-1").await,
        StreamStatus::Streaming
    );
    // The lock lapses with its lease; the sweep does not revoke it.
    assert!(
        coordinator
            .locks()
            .inspect("stream-1")
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_unreachable_store_fails_the_sweep() {
    let (coordinator, store, _) = setup();
    store.set_available(false);

    assert_matches!(
        coordinator.sweeper().cleanup(&options(None)).await,
        Err(Error::Store(_))
    );
}

#[test]
fn test_predicate() {
    let opts = options(None);
    let state = |status, last_active, message_count| tether_streams::StreamState {
        id: "s".to_string(),
        status,
        last_active,
        message_count,
        metadata: std::collections::BTreeMap::new(),
    };
    let now = START_MS + 6_000;

    assert!(opts.is_abandoned(&state(StreamStatus::Streaming, START_MS, 3), now));
    assert!(!opts.is_abandoned(&state(StreamStatus::Streaming, START_MS, 15), now));
    assert!(!opts.is_abandoned(&state(StreamStatus::Streaming, START_MS, 10), now));
    assert!(!opts.is_abandoned(&state(StreamStatus::Complete, START_MS, 3), now));
    assert!(!opts.is_abandoned(&state(StreamStatus::Idle, START_MS, 3), now));
    assert!(!opts.is_abandoned(&state(StreamStatus::Streaming, now, 3), now));
}

/// Memory store that overwrites one key just before its `n`th read, standing
/// in for a writer racing the sweep.
#[derive(Clone, Debug)]
struct InterleavingStore {
    inner: MemoryStore,
    gets: Arc<AtomicUsize>,
    pending: Arc<Mutex<Option<(String, usize, Bytes)>>>,
}

impl InterleavingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            gets: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(Mutex::new(None)),
        }
    }

    fn overwrite_before_read(&self, key: &str, nth: usize, value: &serde_json::Value) {
        self.gets.store(0, Ordering::SeqCst);
        *self.pending.lock().unwrap() = Some((
            key.to_string(),
            nth,
            Bytes::from(serde_json::to_vec(value).unwrap()),
        ));
    }
}

#[async_trait]
impl CoordinationStore for InterleavingStore {
    type Error = tether_store_memory::Error;

    async fn set_if_absent<K: Into<String> + Send>(
        &self,
        key: K,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool, Self::Error> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn put<K: Into<String> + Send>(&self, key: K, value: Bytes) -> Result<(), Self::Error> {
        self.inner.put(key, value).await
    }

    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error> {
        let key: String = key.into();
        let due = {
            let mut pending = self.pending.lock().unwrap();
            let hit = pending.as_ref().is_some_and(|(target, nth, _)| {
                *target == key && self.gets.fetch_add(1, Ordering::SeqCst) + 1 == *nth
            });
            if hit { pending.take() } else { None }
        };

        if let Some((target, _, value)) = due {
            self.inner.put(target, value).await?;
        }
        self.inner.get(key).await
    }

    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<bool, Self::Error> {
        self.inner.del(key).await
    }

    async fn scan<P: Into<String> + Send>(
        &self,
        cursor: u64,
        pattern: P,
        count: usize,
    ) -> Result<ScanPage, Self::Error> {
        self.inner.scan(cursor, pattern, count).await
    }

    async fn ping(&self) -> Result<(), Self::Error> {
        self.inner.ping().await
    }
}

async fn interleaved_setup() -> (
    StreamCoordinator<InterleavingStore>,
    InterleavingStore,
    ManualClock,
) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store = InterleavingStore::new();
    let clock = ManualClock::new(START_MS);
    let coordinator = StreamCoordinator::with_clock(
        store.clone(),
        CoordinatorConfig::default(),
        Arc::new(clock.clone()),
    )
    .expect("default config is valid");

    coordinator
        .states()
        .update(
            "s1",
            StateUpdate::new()
                .status(StreamStatus::Streaming)
                .add_messages(3),
        )
        .await
        .unwrap();
    clock.advance(Duration::from_millis(6_000));

    (coordinator, store, clock)
}

#[tokio::test]
async fn test_activity_after_first_read_keeps_stream_alive() {
    let (coordinator, store, _) = interleaved_setup().await;

    // The writer delivers a burst after the sweep's first read of the record.
    store.overwrite_before_read(
        "streams:stream:s1",
        2,
        &serde_json::json!({
            "id": "s1",
            "status": "streaming",
            "lastActive": START_MS + 6_000,
            "messageCount": 50,
        }),
    );

    let abandoned = coordinator.sweeper().cleanup(&options(None)).await.unwrap();

    assert!(abandoned.is_empty());
    let state = coordinator.states().get("s1").await.unwrap().unwrap();
    assert_eq!(state.status, StreamStatus::Streaming);
    assert_eq!(state.message_count, 50);
}

#[tokio::test]
async fn test_stream_abandoned_by_another_sweep_is_not_reported() {
    let (coordinator, store, _) = interleaved_setup().await;

    store.overwrite_before_read(
        "streams:stream:s1",
        2,
        &serde_json::json!({
            "id": "s1",
            "status": "abandoned",
            "lastActive": START_MS + 6_000,
            "messageCount": 3,
        }),
    );

    let abandoned = coordinator.sweeper().cleanup(&options(None)).await.unwrap();

    assert!(abandoned.is_empty());
    assert_eq!(status_of(&coordinator, "s1").await, StreamStatus::Abandoned);
}

#[tokio::test]
async fn test_completion_after_first_read_is_kept() {
    let (coordinator, store, _) = interleaved_setup().await;

    store.overwrite_before_read(
        "streams:stream:s1",
        2,
        &serde_json::json!({
            "id": "s1",
            "status": "complete",
            "lastActive": START_MS + 6_000,
            "messageCount": 3,
        }),
    );

    assert!(
        coordinator
            .sweeper()
            .cleanup(&options(None))
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(status_of(&coordinator, "s1").await, StreamStatus::Complete);
}

#[tokio::test]
async fn test_stale_stream_without_interleaved_write_is_abandoned() {
    let (coordinator, _, _) = interleaved_setup().await;

    assert_eq!(
        coordinator.sweeper().cleanup(&options(None)).await.unwrap(),
        vec!["s1".to_string()]
    );
    assert_eq!(status_of(&coordinator, "s1").await, StreamStatus::Abandoned);
}
