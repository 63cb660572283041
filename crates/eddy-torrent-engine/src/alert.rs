//! Alert contract between the peer-protocol session and the event pump.
//!
//! The enum is intentionally sealed to the kinds the core acts on; whatever
//! else a backend produces is funnelled into [`Alert::Unknown`] and dropped
//! by the pump.

use std::fmt;

use eddy_torrent_core::{InfoHash, TorrentErrorKind, TorrentState};
use serde::{Deserialize, Serialize};

use crate::session::TorrentHandle;

/// Alert categories the session is asked to enable.
pub mod category {
    /// Torrent and session error reports.
    pub const ERROR: u32 = 1 << 0;
    /// Peer connect/disconnect traffic.
    pub const PEER: u32 = 1 << 1;
    /// UPnP / NAT-PMP mapping results.
    pub const PORT_MAPPING: u32 = 1 << 2;
    /// Storage and disk I/O reports.
    pub const STORAGE: u32 = 1 << 3;
    /// Tracker announce results.
    pub const TRACKER: u32 = 1 << 4;
    /// Listen/connect lifecycle.
    pub const CONNECT: u32 = 1 << 5;
    /// Torrent status transitions.
    pub const STATUS: u32 = 1 << 6;
    /// Session statistics counters.
    pub const STATS: u32 = 1 << 7;

    /// Everything the event pump consumes.
    pub const CORE: u32 =
        ERROR | PEER | PORT_MAPPING | STORAGE | TRACKER | CONNECT | STATUS | STATS;
}

/// Session-wide counters delivered with a stats alert.
///
/// The three counters the aggregator subscribes to: received and sent payload
/// bytes plus the DHT routing table size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsCounters {
    /// Total payload bytes received this session.
    pub total_payload_download: u64,
    /// Total payload bytes sent this session.
    pub total_payload_upload: u64,
    /// Nodes currently in the DHT routing table.
    pub dht_nodes: u32,
}

/// Asynchronous notification drained from the session by the event pump.
#[derive(Clone)]
pub enum Alert {
    /// The engine accepted a torrent and produced a live handle.
    Added {
        /// Handle for the newly started swarm.
        handle: TorrentHandle,
    },
    /// A swarm finished tearing down after a remove.
    Removed {
        /// Identity of the removed torrent.
        info_hash: InfoHash,
    },
    /// A torrent moved between lifecycle states.
    StateChanged {
        /// Identity of the torrent.
        info_hash: InfoHash,
        /// State before the transition.
        old: TorrentState,
        /// State after the transition.
        new: TorrentState,
    },
    /// A torrent finished downloading its payload.
    Finished {
        /// Identity of the torrent.
        info_hash: InfoHash,
    },
    /// A torrent hit a fatal error.
    Faulted {
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
    /// Fresh session counters in response to a stats request.
    SessionStats {
        /// Counter snapshot.
        counters: StatsCounters,
    },
    /// Anything the core does not act on.
    Unknown,
}

impl Alert {
    /// Machine-friendly discriminator for log lines.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Removed { .. } => "removed",
            Self::StateChanged { .. } => "state_changed",
            Self::Finished { .. } => "finished",
            Self::Faulted { .. } => "faulted",
            Self::TrackerError { .. } => "tracker_error",
            Self::TrackerWarning { .. } => "tracker_warning",
            Self::SessionStats { .. } => "session_stats",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Debug for Alert {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added { handle } => formatter
                .debug_struct("Added")
                .field("info_hash", &handle.info_hash())
                .finish(),
            Self::Removed { info_hash } => formatter
                .debug_struct("Removed")
                .field("info_hash", info_hash)
                .finish(),
            Self::StateChanged {
                info_hash,
                old,
                new,
            } => formatter
                .debug_struct("StateChanged")
                .field("info_hash", info_hash)
                .field("old", old)
                .field("new", new)
                .finish(),
            Self::Finished { info_hash } => formatter
                .debug_struct("Finished")
                .field("info_hash", info_hash)
                .finish(),
            Self::Faulted {
                info_hash,
                kind,
                message,
            } => formatter
                .debug_struct("Faulted")
                .field("info_hash", info_hash)
                .field("kind", kind)
                .field("message", message)
                .finish(),
            Self::TrackerError {
                info_hash,
                tracker,
                message,
            } => formatter
                .debug_struct("TrackerError")
                .field("info_hash", info_hash)
                .field("tracker", tracker)
                .field("message", message)
                .finish(),
            Self::TrackerWarning {
                info_hash,
                tracker,
                message,
            } => formatter
                .debug_struct("TrackerWarning")
                .field("info_hash", info_hash)
                .field("tracker", tracker)
                .field("message", message)
                .finish(),
            Self::SessionStats { counters } => formatter
                .debug_struct("SessionStats")
                .field("counters", counters)
                .finish(),
            Self::Unknown => formatter.write_str("Unknown"),
        }
    }
}
