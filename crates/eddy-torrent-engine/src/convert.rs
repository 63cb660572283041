//! Boundary conversions: caller settings to engine packs, raw handle status
//! to the cached registry view, records from statuses.

use chrono::Utc;
use eddy_torrent_core::{
    FileStatus, TorrentRecord, TorrentSettings, TorrentStatus, encode_metainfo_blob,
};

use crate::alert::category;
use crate::session::{HandleStatus, SettingsPack};

/// Bytes per kB at the rate-limit boundary.
const KB: i64 = 1024;

/// Project caller settings into the engine-facing pack.
///
/// Rates cross from kB/s to B/s here; zero or negative caps mean unlimited.
pub(crate) fn settings_pack(settings: &TorrentSettings) -> SettingsPack {
    SettingsPack {
        user_agent: settings.user_agent.clone(),
        download_rate_limit: rate_limit_bps(settings.max_download_rate),
        upload_rate_limit: rate_limit_bps(settings.max_upload_rate),
        connections_limit: settings.max_connections,
        active_seeds: settings.max_seeds,
        enable_dht: settings.enable_dht,
        enable_pex: settings.enable_pex,
        enable_lsd: settings.enable_lsd,
        enable_upnp: settings.enable_upnp,
        enable_natpmp: settings.enable_natpmp,
        alert_mask: category::CORE,
    }
}

const fn rate_limit_bps(kbps: i32) -> i64 {
    if kbps > 0 { kbps as i64 * KB } else { -1 }
}

/// Fold a raw handle snapshot into the cached status.
///
/// Admission metadata (`added_at`, `completed_at`) and accumulated error text
/// are preserved; everything the engine reports fresher wins.
pub(crate) fn refresh_status(cached: &mut TorrentStatus, raw: HandleStatus) {
    if !raw.name.is_empty() {
        cached.name = raw.name;
    }
    cached.state = raw.state;
    cached.total_wanted = raw.total_wanted;
    cached.downloaded = raw.downloaded;
    cached.uploaded = raw.uploaded;
    cached.progress = raw.progress;
    cached.download_rate = raw.download_rate;
    cached.upload_rate = raw.upload_rate;
    cached.seeders = raw.seeders;
    cached.leechers = raw.peers.saturating_sub(raw.seeders);
    cached.peers = raw.peers;
    cached.ratio = if raw.downloaded > 0 && raw.uploaded > 0 {
        raw.uploaded as f64 / raw.downloaded as f64
    } else {
        0.0
    };
    cached.paused = raw.paused;
    cached.finished = raw.finished;
    cached.seeding = raw.seeding;
    cached.save_path = raw.save_path;
    if let Some(error) = raw.error {
        cached.error = Some(error);
    }
    if raw.has_metadata && !raw.files.is_empty() {
        cached.files = raw
            .files
            .into_iter()
            .map(|file| FileStatus {
                path: file.path,
                size: file.size,
                progress: file.progress,
                priority: file.priority,
            })
            .collect();
    }
}

/// Build the initial persisted record for a freshly materialised torrent.
pub(crate) fn initial_record(
    status: &TorrentStatus,
    magnet_uri: Option<String>,
    metainfo_blob: Option<&[u8]>,
) -> TorrentRecord {
    TorrentRecord {
        info_hash: status.info_hash,
        name: status.name.clone(),
        total_size: status.total_wanted,
        date_added: status.added_at,
        last_active: Utc::now(),
        save_path: status.save_path.display().to_string(),
        progress: status.progress,
        status: status.state.as_str().to_owned(),
        seeders: status.seeders,
        leechers: status.leechers,
        downloaded: status.downloaded,
        uploaded: status.uploaded,
        ratio: status.ratio,
        magnet_uri,
        metainfo: metainfo_blob.map(encode_metainfo_blob),
        files: status.files.iter().map(|file| file.path.clone()).collect(),
    }
}
