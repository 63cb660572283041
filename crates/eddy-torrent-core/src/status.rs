//! Cached status views and session-wide statistics.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::InfoHash;

/// Lifecycle state of a torrent.
///
/// Transitions are driven exclusively by alerts; `Error` is terminal until
/// the torrent is removed and re-added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Waiting for a queue slot.
    Queued,
    /// Verifying payload data on disk.
    CheckingFiles,
    /// Fetching metadata for a magnet-born torrent.
    DownloadingMetadata,
    /// Actively downloading payload data.
    Downloading,
    /// Download complete, not yet seeding.
    Finished,
    /// Serving payload data to peers.
    Seeding,
    /// Pre-allocating payload files.
    Allocating,
    /// Validating resume data before starting.
    CheckingResumeData,
    /// Suspended by the caller.
    Paused,
    /// Failed on a fatal alert.
    Error,
}

impl TorrentState {
    /// Snake-case string form, also used for persisted status columns.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::CheckingFiles => "checking_files",
            Self::DownloadingMetadata => "downloading_metadata",
            Self::Downloading => "downloading",
            Self::Finished => "finished",
            Self::Seeding => "seeding",
            Self::Allocating => "allocating",
            Self::CheckingResumeData => "checking_resume_data",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }

    /// Whether the state admits no further alert-driven transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl std::fmt::Display for TorrentState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Per-file slice of a torrent status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatus {
    /// Path relative to the save directory.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Completion in `[0.0, 1.0]`.
    pub progress: f64,
    /// Download priority in `0..=7`.
    pub priority: u8,
}

/// Cached view the registry maintains per live torrent.
///
/// Refreshed on alert delivery and at the stats cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentStatus {
    /// Identity of the torrent.
    pub info_hash: InfoHash,
    /// Display name.
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
    /// Current download payload rate in B/s.
    pub download_rate: u64,
    /// Current upload payload rate in B/s.
    pub upload_rate: u64,
    /// Connected seeders.
    pub seeders: u32,
    /// Connected leechers.
    pub leechers: u32,
    /// Total connected peers.
    pub peers: u32,
    /// Share ratio, `0.0` until bytes have been exchanged.
    pub ratio: f64,
    /// Whether the torrent is paused.
    pub paused: bool,
    /// Whether the payload finished downloading.
    pub finished: bool,
    /// Whether the torrent is seeding.
    pub seeding: bool,
    /// Save directory of the payload.
    pub save_path: PathBuf,
    /// Accumulated error text, when any alert reported one.
    pub error: Option<String>,
    /// Per-file status, empty until metadata is known.
    pub files: Vec<FileStatus>,
    /// When the torrent was admitted.
    pub added_at: DateTime<Utc>,
    /// When the payload completed, if it has.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TorrentStatus {
    /// Fresh status for a newly admitted torrent.
    #[must_use]
    pub fn new(info_hash: InfoHash, name: impl Into<String>, save_path: PathBuf) -> Self {
        Self {
            info_hash,
            name: name.into(),
            state: TorrentState::Queued,
            total_wanted: 0,
            downloaded: 0,
            uploaded: 0,
            progress: 0.0,
            download_rate: 0,
            upload_rate: 0,
            seeders: 0,
            leechers: 0,
            peers: 0,
            ratio: 0.0,
            paused: false,
            finished: false,
            seeding: false,
            save_path,
            error: None,
            files: Vec::new(),
            added_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Session-wide statistics derived from the registry and alert counters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// Number of live registry entries.
    pub total_torrents: u32,
    /// Entries that are not paused.
    pub active_torrents: u32,
    /// Active entries currently seeding.
    pub seeding_torrents: u32,
    /// Active entries downloading payload or metadata.
    pub downloading_torrents: u32,
    /// Entries currently paused.
    pub paused_torrents: u32,
    /// Total payload bytes received this session.
    pub total_downloaded: u64,
    /// Total payload bytes sent this session.
    pub total_uploaded: u64,
    /// Summed download payload rate in B/s.
    pub download_rate: u64,
    /// Summed upload payload rate in B/s.
    pub upload_rate: u64,
    /// Summed connected peers.
    pub total_peers: u32,
    /// `total_uploaded / total_downloaded` when the denominator is positive.
    pub global_ratio: f64,
    /// DHT routing table size from the last stats alert.
    pub dht_nodes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_strings_are_snake_case() {
        assert_eq!(TorrentState::CheckingResumeData.to_string(), "checking_resume_data");
        assert_eq!(TorrentState::DownloadingMetadata.as_str(), "downloading_metadata");
    }

    #[test]
    fn only_error_is_terminal() {
        for state in [
            TorrentState::Queued,
            TorrentState::CheckingFiles,
            TorrentState::Downloading,
            TorrentState::Finished,
            TorrentState::Seeding,
            TorrentState::Paused,
        ] {
            assert!(!state.is_terminal());
        }
        assert!(TorrentState::Error.is_terminal());
    }

    #[test]
    fn serde_round_trips_state() -> anyhow::Result<()> {
        let json = serde_json::to_string(&TorrentState::DownloadingMetadata)?;
        assert_eq!(json, "\"downloading_metadata\"");
        let back: TorrentState = serde_json::from_str(&json)?;
        assert_eq!(back, TorrentState::DownloadingMetadata);
        Ok(())
    }

    #[test]
    fn fresh_status_starts_queued() {
        let hash = InfoHash::of_info_dict(b"d4:name4:demoe");
        let status = TorrentStatus::new(hash, "demo", PathBuf::from("/tmp"));
        assert_eq!(status.state, TorrentState::Queued);
        assert!(!status.paused);
        assert!(status.files.is_empty());
        assert!(status.completed_at.is_none());
    }
}
