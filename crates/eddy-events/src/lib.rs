#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]
#![allow(unexpected_cfgs)]

//! Observer surface of the torrent engine core.
//!
//! The bus is a single bounded event log guarded by a read-write lock.
//! Publishers append under the write lock and wake sleepers through a
//! [`tokio::sync::Notify`]; every subscriber owns a cursor into the log and
//! clones entries out under the read lock, so late subscribers replay
//! whatever the log still retains and publishers never wait on consumers.
//! When the log wraps past a slow subscriber, its cursor skips forward to
//! the oldest retained event. The log closes once the last bus handle is
//! dropped; streams drain what remains and then end.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use eddy_torrent_core::{InfoHash, SessionStats, TorrentErrorKind, TorrentState, TorrentStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

/// Identifier assigned to each published event.
pub type EventId = u64;

/// Default number of events the log retains.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed events emitted by the torrent engine core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A torrent materialised in the registry.
    TorrentAdded {
        /// Identity of the torrent.
        info_hash: InfoHash,
        /// Display name at admission time.
        name: String,
    },
    /// A torrent was removed from the registry.
    TorrentRemoved {
        /// Identity of the torrent.
        info_hash: InfoHash,
    },
    /// A torrent transitioned between lifecycle states.
    TorrentStateChanged {
        /// Identity of the torrent.
        info_hash: InfoHash,
        /// State before the transition.
        old: TorrentState,
        /// State after the transition.
        new: TorrentState,
    },
    /// Periodic status refresh, emitted at the stats cadence.
    TorrentProgress {
        /// Identity of the torrent.
        info_hash: InfoHash,
        /// Full cached status snapshot.
        status: Box<TorrentStatus>,
    },
    /// A torrent finished downloading its payload.
    TorrentFinished {
        /// Identity of the torrent.
        info_hash: InfoHash,
    },
    /// A torrent failed on a fatal alert.
    TorrentError {
        /// Identity of the torrent.
        info_hash: InfoHash,
        /// Classified error kind.
        kind: TorrentErrorKind,
        /// Engine-supplied failure description.
        message: String,
    },
    /// A tracker rejected an announce.
    TrackerError {
        /// Identity of the torrent.
        info_hash: InfoHash,
        /// Tracker URL.
        tracker: String,
        /// Tracker-supplied failure description.
        message: String,
    },
    /// A tracker reported a non-fatal warning.
    TrackerWarning {
        /// Identity of the torrent.
        info_hash: InfoHash,
        /// Tracker URL.
        tracker: String,
        /// Tracker-supplied warning text.
        message: String,
    },
    /// Session-wide statistics were aggregated.
    SessionStatsUpdated {
        /// Aggregated snapshot.
        stats: SessionStats,
    },
}

impl Event {
    /// Machine-friendly discriminator for log lines and stream consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TorrentAdded { .. } => "torrent_added",
            Self::TorrentRemoved { .. } => "torrent_removed",
            Self::TorrentStateChanged { .. } => "torrent_state_changed",
            Self::TorrentProgress { .. } => "torrent_progress",
            Self::TorrentFinished { .. } => "torrent_finished",
            Self::TorrentError { .. } => "torrent_error",
            Self::TrackerError { .. } => "tracker_error",
            Self::TrackerWarning { .. } => "tracker_warning",
            Self::SessionStatsUpdated { .. } => "session_stats_updated",
        }
    }

    /// Torrent the event concerns, when it concerns one.
    #[must_use]
    pub const fn info_hash(&self) -> Option<InfoHash> {
        match self {
            Self::TorrentAdded { info_hash, .. }
            | Self::TorrentRemoved { info_hash }
            | Self::TorrentStateChanged { info_hash, .. }
            | Self::TorrentProgress { info_hash, .. }
            | Self::TorrentFinished { info_hash }
            | Self::TorrentError { info_hash, .. }
            | Self::TrackerError { info_hash, .. }
            | Self::TrackerWarning { info_hash, .. } => Some(*info_hash),
            Self::SessionStatsUpdated { .. } => None,
        }
    }
}

/// Metadata wrapper tracking the event id and emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// When the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

/// Bounded event log. Ids are dense and ascending, so the offset of an id
/// within `entries` is `id - front.id`.
struct Ring {
    entries: VecDeque<EventEnvelope>,
    next_id: EventId,
    capacity: usize,
    closed: bool,
}

struct BusShared {
    ring: RwLock<Ring>,
    wakeup: Notify,
    publishers: AtomicUsize,
}

fn read_ring(lock: &RwLock<Ring>) -> RwLockReadGuard<'_, Ring> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_ring(lock: &RwLock<Ring>) -> RwLockWriteGuard<'_, Ring> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared event bus: cloneable publisher handle over the event log.
pub struct EventBus {
    shared: Arc<BusShared>,
}

impl EventBus {
    /// Construct a bus whose log retains `capacity` events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "replay capacity must be non-zero");
        Self {
            shared: Arc::new(BusShared {
                ring: RwLock::new(Ring {
                    entries: VecDeque::with_capacity(capacity),
                    next_id: 1,
                    capacity,
                    closed: false,
                }),
                wakeup: Notify::new(),
                publishers: AtomicUsize::new(1),
            }),
        }
    }

    /// Construct a bus with the default log capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Append an event to the log and wake waiting subscribers.
    ///
    /// Never blocks on consumers: when the log is full the oldest entry is
    /// evicted to make room.
    pub fn publish(&self, event: Event) -> EventId {
        let id = {
            let mut ring = write_ring(&self.shared.ring);
            let id = ring.next_id;
            ring.next_id += 1;
            if ring.entries.len() == ring.capacity {
                ring.entries.pop_front();
            }
            ring.entries.push_back(EventEnvelope {
                id,
                timestamp: Utc::now(),
                event,
            });
            id
        };
        self.shared.wakeup.notify_waiters();
        id
    }

    /// Open a stream over the log.
    ///
    /// With `since_id` the stream starts right after that id, replaying
    /// whatever the log still retains; without it the stream is live-only
    /// and begins at the next event to be published.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let cursor = match since_id {
            Some(since) => since.saturating_add(1),
            None => read_ring(&self.shared.ring).next_id,
        };
        EventStream {
            shared: Arc::clone(&self.shared),
            cursor,
        }
    }

    /// Identifier of the most recently published event, if any.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        read_ring(&self.shared.ring)
            .entries
            .back()
            .map(|envelope| envelope.id)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        self.shared.publishers.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if self.shared.publishers.fetch_sub(1, Ordering::AcqRel) == 1 {
            write_ring(&self.shared.ring).closed = true;
            self.shared.wakeup.notify_waiters();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

enum RingRead {
    Ready(EventEnvelope),
    Empty,
    Closed,
}

/// Subscriber cursor over the shared event log.
pub struct EventStream {
    shared: Arc<BusShared>,
    cursor: EventId,
}

impl EventStream {
    /// Receive the next event.
    ///
    /// Replays retained history first, then waits for live publishes. A
    /// subscriber that fell behind the log skips forward to the oldest
    /// retained event. Returns `None` once every bus handle is gone and the
    /// remaining backlog has been drained.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.read_next() {
                RingRead::Ready(envelope) => return Some(envelope),
                RingRead::Closed => return None,
                RingRead::Empty => {}
            }

            // Register for the wakeup before the second look, so a publish
            // between the check and the await cannot be missed.
            let shared = Arc::clone(&self.shared);
            let notified = shared.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.read_next() {
                RingRead::Ready(envelope) => return Some(envelope),
                RingRead::Closed => return None,
                RingRead::Empty => notified.await,
            }
        }
    }

    fn read_next(&mut self) -> RingRead {
        let ring = read_ring(&self.shared.ring);
        if let Some(front_id) = ring.entries.front().map(|envelope| envelope.id) {
            if self.cursor < front_id {
                debug!(
                    from = self.cursor,
                    to = front_id,
                    "subscriber lagged behind the event log; skipping forward"
                );
                self.cursor = front_id;
            }
            let offset = usize::try_from(self.cursor - front_id).unwrap_or(usize::MAX);
            if let Some(envelope) = ring.entries.get(offset) {
                self.cursor = envelope.id + 1;
                return RingRead::Ready(envelope.clone());
            }
        }
        if ring.closed {
            RingRead::Closed
        } else {
            RingRead::Empty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::time::Duration;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    fn hash(index: u8) -> InfoHash {
        let mut bytes = [0_u8; 20];
        bytes[19] = index;
        InfoHash::from_bytes(bytes)
    }

    fn sample_event(index: u8) -> Event {
        Event::TorrentStateChanged {
            info_hash: hash(index),
            old: TorrentState::Queued,
            new: TorrentState::Downloading,
        }
    }

    #[test]
    fn kinds_cover_all_variants() {
        let info_hash =
            InfoHash::from_str("0123456789abcdef0123456789abcdef01234567").expect("valid");
        let status = TorrentStatus::new(info_hash, "demo", "/tmp".into());
        let events = [
            (
                Event::TorrentAdded {
                    info_hash,
                    name: "demo".into(),
                },
                "torrent_added",
            ),
            (Event::TorrentRemoved { info_hash }, "torrent_removed"),
            (
                Event::TorrentStateChanged {
                    info_hash,
                    old: TorrentState::Queued,
                    new: TorrentState::Downloading,
                },
                "torrent_state_changed",
            ),
            (
                Event::TorrentProgress {
                    info_hash,
                    status: Box::new(status),
                },
                "torrent_progress",
            ),
            (Event::TorrentFinished { info_hash }, "torrent_finished"),
            (
                Event::TorrentError {
                    info_hash,
                    kind: TorrentErrorKind::TrackerError,
                    message: "announce refused".into(),
                },
                "torrent_error",
            ),
            (
                Event::TrackerError {
                    info_hash,
                    tracker: "udp://tracker.invalid:6969".into(),
                    message: "announce refused".into(),
                },
                "tracker_error",
            ),
            (
                Event::TrackerWarning {
                    info_hash,
                    tracker: "udp://tracker.invalid:6969".into(),
                    message: "slow down".into(),
                },
                "tracker_warning",
            ),
            (
                Event::SessionStatsUpdated {
                    stats: SessionStats::default(),
                },
                "session_stats_updated",
            ),
        ];

        for (event, expected) in events {
            assert_eq!(event.kind(), expected);
            if expected == "session_stats_updated" {
                assert!(event.info_hash().is_none());
            } else {
                assert_eq!(event.info_hash(), Some(info_hash));
            }
        }
    }

    #[tokio::test]
    async fn ids_are_sequential_and_replay_from_a_cursor() {
        let bus = EventBus::with_capacity(16);
        let ids: Vec<EventId> = (0..5).map(|index| bus.publish(sample_event(index))).collect();
        assert_eq!(ids, [1, 2, 3, 4, 5]);

        let mut stream = bus.subscribe(Some(2));
        for expected in 3..=5 {
            let envelope = timeout(RECV_TIMEOUT, stream.next())
                .await
                .expect("stream stalled")
                .expect("stream closed");
            assert_eq!(envelope.id, expected);
        }
    }

    #[tokio::test]
    async fn live_only_subscription_sees_nothing_older() {
        let bus = EventBus::with_capacity(8);
        let _ = bus.publish(sample_event(1));

        let mut stream = bus.subscribe(None);
        let _ = bus.publish(sample_event(2));

        let envelope = timeout(RECV_TIMEOUT, stream.next())
            .await
            .expect("stream stalled")
            .expect("stream closed");
        assert_eq!(envelope.id, 2);
        assert_eq!(envelope.event.info_hash(), Some(hash(2)));
    }

    #[tokio::test]
    async fn log_evicts_oldest_on_overflow() {
        let bus = EventBus::with_capacity(2);
        for index in 0..4 {
            let _ = bus.publish(sample_event(index));
        }
        // Only ids 3 and 4 survive; a replay-from-zero cursor lands on 3.
        let mut stream = bus.subscribe(Some(0));
        assert_eq!(stream.next().await.map(|envelope| envelope.id), Some(3));
        assert_eq!(stream.next().await.map(|envelope| envelope.id), Some(4));
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_forward() {
        let bus = EventBus::with_capacity(2);
        let mut stream = bus.subscribe(None);
        // The subscriber sleeps through four publishes into a two-slot log.
        for index in 0..4 {
            let _ = bus.publish(sample_event(index));
        }
        let envelope = timeout(RECV_TIMEOUT, stream.next())
            .await
            .expect("stream stalled")
            .expect("stream closed");
        assert_eq!(envelope.id, 3, "cursor should jump to the oldest retained");
    }

    #[tokio::test]
    async fn stream_drains_backlog_then_ends_after_close() {
        let mut stream = {
            let bus = EventBus::with_capacity(4);
            let stream = bus.subscribe(Some(0));
            let _ = bus.publish(sample_event(1));
            drop(bus);
            stream
        };
        assert_eq!(stream.next().await.map(|envelope| envelope.id), Some(1));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn surviving_clone_keeps_the_log_open() {
        let bus = EventBus::with_capacity(4);
        let publisher = bus.clone();
        let mut stream = bus.subscribe(None);
        drop(bus);

        let _ = publisher.publish(sample_event(7));
        let envelope = timeout(RECV_TIMEOUT, stream.next())
            .await
            .expect("stream stalled")
            .expect("stream closed early");
        assert_eq!(envelope.event.info_hash(), Some(hash(7)));
    }

    #[tokio::test]
    async fn concurrent_publishers_never_stall_and_ids_stay_unique() {
        let bus = EventBus::with_capacity(512);
        let mut stream = bus.subscribe(Some(0));

        let mut writers = Vec::new();
        for _ in 0..2 {
            let publisher = bus.clone();
            writers.push(tokio::task::spawn_blocking(move || {
                for index in 0..100 {
                    let _ = publisher.publish(sample_event(index));
                }
            }));
        }
        for writer in writers {
            writer.await.expect("publisher panicked");
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let envelope = timeout(RECV_TIMEOUT, stream.next())
                .await
                .expect("stream stalled")
                .expect("stream closed");
            assert!(seen.insert(envelope.id), "duplicate id {}", envelope.id);
        }
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn last_event_id_reflects_recent_publish() {
        let bus = EventBus::with_capacity(2);
        assert!(bus.last_event_id().is_none());
        let published = bus.publish(sample_event(0));
        assert_eq!(bus.last_event_id(), Some(published));
    }

    #[test]
    fn events_serialise_with_type_tags() -> anyhow::Result<()> {
        let json = serde_json::to_value(sample_event(9))?;
        assert_eq!(json["type"], "torrent_state_changed");
        assert_eq!(json["old"], "queued");
        assert_eq!(json["new"], "downloading");
        Ok(())
    }
}
