//! Session and per-torrent configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TorrentError};

/// Configuration applied to the session and, where applicable, to individual
/// torrents at admission time.
///
/// Rates are expressed in kB/s at this boundary; `0` (or a negative value)
/// means unlimited. Conversion to engine units happens in the session layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorrentSettings {
    /// Default download directory for new torrents.
    pub download_path: PathBuf,
    /// Maximum download rate in kB/s, `0` = unlimited.
    pub max_download_rate: i32,
    /// Maximum upload rate in kB/s, `0` = unlimited.
    pub max_upload_rate: i32,
    /// Session-wide connection limit.
    pub max_connections: i32,
    /// Session-wide seed slot limit.
    pub max_seeds: i32,
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
    /// Download pieces in order instead of rarest-first.
    pub sequential_download: bool,
    /// Let the engine queue-manage the torrent.
    pub auto_managed: bool,
    /// Keep seeding once the download completes.
    pub seed_when_complete: bool,
    /// Stop seeding once this share ratio is reached.
    pub share_ratio_limit: f64,
    /// Stop seeding after this many hours, `0` = unlimited.
    pub seed_time_limit: i32,
    /// Trackers appended to every admitted torrent.
    pub trackers: Vec<String>,
    /// User agent advertised to peers and trackers.
    pub user_agent: String,
}

impl Default for TorrentSettings {
    fn default() -> Self {
        Self {
            download_path: PathBuf::new(),
            max_download_rate: 0,
            max_upload_rate: 0,
            max_connections: 200,
            max_seeds: 50,
            enable_dht: true,
            enable_pex: true,
            enable_lsd: true,
            enable_upnp: true,
            enable_natpmp: true,
            sequential_download: false,
            auto_managed: true,
            seed_when_complete: true,
            share_ratio_limit: 2.0,
            seed_time_limit: 0,
            trackers: Vec::new(),
            user_agent: concat!("Eddy/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl TorrentSettings {
    /// Check the invariants enforced at component boundaries.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::SessionError`] describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<()> {
        if self.download_path.as_os_str().is_empty() {
            return Err(Self::invalid("download_path must not be empty"));
        }
        if self.max_connections <= 0 {
            return Err(Self::invalid("max_connections must be positive"));
        }
        if self.max_seeds < 0 {
            return Err(Self::invalid("max_seeds must not be negative"));
        }
        if self.share_ratio_limit < 0.0 {
            return Err(Self::invalid("share_ratio_limit must not be negative"));
        }
        if self.seed_time_limit < 0 {
            return Err(Self::invalid("seed_time_limit must not be negative"));
        }
        if self.user_agent.trim().is_empty() {
            return Err(Self::invalid("user_agent must not be empty"));
        }
        Ok(())
    }

    fn invalid(detail: &str) -> TorrentError {
        TorrentError::SessionError {
            detail: detail.to_owned(),
        }
    }
}
