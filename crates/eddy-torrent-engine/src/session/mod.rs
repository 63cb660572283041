//! Session abstraction over the underlying peer-protocol engine.
//!
//! The core is written against [`ProtocolSession`] and [`ProtocolHandle`]
//! rather than a concrete engine. [`create_session`] is the seam where a
//! native backend slots in; this workspace ships the in-memory
//! [`StubSession`] behind it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eddy_torrent_core::{InfoHash, MagnetLink, Metainfo, Result, TorrentState};
use serde::{Deserialize, Serialize};

use crate::alert::{Alert, category};

mod stub;

pub use stub::StubSession;

/// Engine-facing projection of the caller-supplied settings.
///
/// Rates are bytes per second with `-1` meaning unlimited; conversion from
/// the kB/s boundary units happens in [`crate::convert`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsPack {
    /// User agent advertised to peers and trackers.
    pub user_agent: String,
    /// Download rate cap in B/s, `-1` = unlimited.
    pub download_rate_limit: i64,
    /// Upload rate cap in B/s, `-1` = unlimited.
    pub upload_rate_limit: i64,
    /// Session-wide connection limit.
    pub connections_limit: i32,
    /// Session-wide seed slot limit.
    pub active_seeds: i32,
    /// Enable the distributed hash table.
    pub enable_dht: bool,
    /// Enable peer exchange.
    pub enable_pex: bool,
    /// Enable local service discovery.
    pub enable_lsd: bool,
    /// Enable UPnP port mapping.
    pub enable_upnp: bool,
    /// Enable NAT-PMP port mapping.
    pub enable_natpmp: bool,
    /// Alert categories the session must emit.
    pub alert_mask: u32,
}

impl Default for SettingsPack {
    fn default() -> Self {
        Self {
            user_agent: String::new(),
            download_rate_limit: -1,
            upload_rate_limit: -1,
            connections_limit: 200,
            active_seeds: 50,
            enable_dht: true,
            enable_pex: true,
            enable_lsd: true,
            enable_upnp: true,
            enable_natpmp: true,
            alert_mask: category::CORE,
        }
    }
}

/// Source a torrent is admitted from.
#[derive(Debug, Clone)]
pub enum AddSource {
    /// A validated magnet link; metadata arrives from the swarm.
    Magnet(MagnetLink),
    /// Parsed metainfo; metadata is known up front.
    Metainfo(Metainfo),
}

/// Parameters handed to the engine when admitting a torrent.
#[derive(Debug, Clone)]
pub struct AddParams {
    /// Identity of the torrent being admitted.
    pub info_hash: InfoHash,
    /// Where the torrent comes from.
    pub source: AddSource,
    /// Validated absolute save directory.
    pub save_path: PathBuf,
    /// Trackers appended on top of whatever the source carries.
    pub trackers: Vec<String>,
    /// Download pieces in order.
    pub sequential: bool,
    /// Let the engine queue-manage the torrent.
    pub auto_managed: bool,
    /// Start in seed mode (payload already on disk).
    pub seed_mode: bool,
    /// Start paused.
    pub paused: bool,
}

/// Per-file slice of a raw handle status.
#[derive(Debug, Clone, PartialEq)]
pub struct HandleFile {
    /// Path relative to the save directory.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Completion in `[0.0, 1.0]`.
    pub progress: f64,
    /// Download priority in `0..=7`.
    pub priority: u8,
}

/// Raw status snapshot reported by a handle.
#[derive(Debug, Clone, PartialEq)]
pub struct HandleStatus {
    /// Identity of the torrent.
    pub info_hash: InfoHash,
    /// Engine-side display name, empty until known.
    pub name: String,
    /// Current lifecycle state.
    pub state: TorrentState,
    /// Total bytes wanted for completion.
    pub total_wanted: u64,
    /// Bytes downloaded so far.
    pub downloaded: u64,
    /// Bytes uploaded so far.
    pub uploaded: u64,
    /// Completion in `[0.0, 1.0]`.
    pub progress: f64,
    /// Download payload rate in B/s.
    pub download_rate: u64,
    /// Upload payload rate in B/s.
    pub upload_rate: u64,
    /// Connected seeders.
    pub seeders: u32,
    /// Total connected peers.
    pub peers: u32,
    /// Whether the torrent is paused.
    pub paused: bool,
    /// Whether the payload finished downloading.
    pub finished: bool,
    /// Whether the torrent is seeding.
    pub seeding: bool,
    /// Save directory of the payload.
    pub save_path: PathBuf,
    /// Whether metadata (and therefore the file list) is known.
    pub has_metadata: bool,
    /// Per-file status, empty until metadata is known.
    pub files: Vec<HandleFile>,
    /// Engine-side error text, when any.
    pub error: Option<String>,
}

/// Opaque, non-owning reference to a swarm inside the session.
///
/// Handles are cheap to clone and remain valid while the registry retains the
/// corresponding entry. The methods below are the thread-safe subset the core
/// invokes.
pub trait ProtocolHandle: Send + Sync {
    /// Identity of the referenced torrent.
    fn info_hash(&self) -> InfoHash;

    /// Snapshot the current status.
    ///
    /// # Errors
    ///
    /// Returns [`eddy_torrent_core::TorrentError::TorrentNotFound`] when the
    /// swarm no longer exists in the session.
    fn status(&self) -> Result<HandleStatus>;

    /// Suspend the swarm.
    ///
    /// # Errors
    ///
    /// Fails when the swarm no longer exists in the session.
    fn pause(&self) -> Result<()>;

    /// Resume a suspended swarm.
    ///
    /// # Errors
    ///
    /// Fails when the swarm no longer exists in the session.
    fn resume(&self) -> Result<()>;

    /// Re-verify on-disk pieces against their hashes.
    ///
    /// # Errors
    ///
    /// Fails when the swarm no longer exists in the session.
    fn force_recheck(&self) -> Result<()>;

    /// Move the payload to a new directory.
    ///
    /// # Errors
    ///
    /// Fails when the swarm no longer exists or the engine rejects the move.
    fn move_storage(&self, new_path: &Path) -> Result<()>;

    /// Apply per-file download priorities (already clamped to `0..=7`).
    ///
    /// # Errors
    ///
    /// Fails when the swarm no longer exists in the session.
    fn prioritize_files(&self, priorities: &[u8]) -> Result<()>;

    /// Bencoded metainfo of the torrent, once the engine knows it.
    ///
    /// Backends without access to the reconstructed metainfo may return
    /// `None`; magnet-born records then simply never embed a blob.
    fn metainfo(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Shared handle type cached by the registry.
pub type TorrentHandle = Arc<dyn ProtocolHandle>;

/// Contract of the underlying peer-protocol session.
///
/// All engine state is reached through these methods; [`pop_alerts`] is the
/// only way the event pump observes it.
///
/// [`pop_alerts`]: ProtocolSession::pop_alerts
pub trait ProtocolSession: Send + Sync {
    /// Hot-apply session settings (rates, limits, toggles).
    ///
    /// # Errors
    ///
    /// Returns [`eddy_torrent_core::TorrentError::SessionError`] when the
    /// engine rejects the pack.
    fn apply_settings(&self, pack: &SettingsPack) -> Result<()>;

    /// Enqueue a torrent; completion is signalled by an `Added` alert.
    ///
    /// # Errors
    ///
    /// Fails when the engine rejects the parameters outright.
    fn async_add(&self, params: AddParams) -> Result<()>;

    /// Drop a swarm; a `Removed` alert follows once teardown completes.
    ///
    /// # Errors
    ///
    /// Fails when the handle no longer references a live swarm.
    fn remove(&self, handle: &TorrentHandle, delete_files: bool) -> Result<()>;

    /// Ask the engine to emit a `SessionStats` alert.
    fn post_stats_request(&self);

    /// Drain all pending alerts in emission order.
    fn pop_alerts(&self) -> Vec<Alert>;

    /// Pause every live swarm (shutdown path).
    fn pause_all(&self);

    /// Serialise the opaque session state (tracker cache, DHT table, settings).
    ///
    /// # Errors
    ///
    /// Returns [`eddy_torrent_core::TorrentError::SessionError`] when the
    /// state cannot be captured.
    fn save_state(&self) -> Result<Vec<u8>>;

    /// Restore previously captured session state.
    ///
    /// # Errors
    ///
    /// Returns [`eddy_torrent_core::TorrentError::ParseError`] when the blob
    /// cannot be decoded.
    fn load_state(&self, blob: &[u8]) -> Result<()>;
}

/// Construct the session backend.
///
/// # Errors
///
/// Returns [`eddy_torrent_core::TorrentError::SessionError`] when the backend
/// cannot be constructed; construction failure is fatal to the core.
pub(crate) fn create_session() -> Result<Arc<dyn ProtocolSession>> {
    Ok(Arc::new(StubSession::new()))
}
