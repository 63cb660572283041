//! Alert pump and stats aggregator.
//!
//! Two periodic tasks drive the engine: the pump drains session alerts every
//! 100 ms, classifies them and applies registry/persistence/event effects;
//! the aggregator runs at 1 s, refreshes cached statuses from their handles
//! and publishes session-wide statistics. Persistence failures are logged
//! and never abort a batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eddy_events::Event;
use eddy_torrent_core::{
    InfoHash, Metainfo, RecordPatch, SessionStats, TorrentError, TorrentErrorKind, TorrentState,
    TorrentStatus, encode_metainfo_blob,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alert::Alert;
use crate::convert;
use crate::engine::EngineShared;
use crate::session::TorrentHandle;

pub(crate) const ALERT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub(crate) const STATS_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) fn spawn(
    shared: Arc<EngineShared>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(alert_loop(Arc::clone(&shared), shutdown.clone())),
        tokio::spawn(stats_loop(shared, shutdown)),
    ]
}

async fn alert_loop(shared: Arc<EngineShared>, mut shutdown: watch::Receiver<bool>) {
    let mut poll = tokio::time::interval(ALERT_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = poll.tick() => drain_alerts(&shared).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn stats_loop(shared: Arc<EngineShared>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(STATS_INTERVAL);
    loop {
        tokio::select! {
            _ = tick.tick() => aggregate_stats(&shared).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Drain every pending alert from the session in one batch.
pub(crate) async fn drain_alerts(shared: &EngineShared) {
    for alert in shared.session.pop_alerts() {
        handle_alert(shared, alert).await;
    }
}

/// Classify a single alert and apply its effects.
pub(crate) async fn handle_alert(shared: &EngineShared, alert: Alert) {
    match alert {
        Alert::Added { handle } => on_added(shared, handle).await,
        Alert::Removed { info_hash } => on_removed(shared, info_hash).await,
        Alert::StateChanged {
            info_hash,
            old,
            new,
        } => on_state_changed(shared, info_hash, old, new).await,
        Alert::Finished { info_hash } => on_finished(shared, info_hash).await,
        Alert::Faulted {
            info_hash,
            kind,
            message,
        } => on_faulted(shared, info_hash, kind, message).await,
        Alert::TrackerError {
            info_hash,
            tracker,
            message,
        } => on_tracker_error(shared, info_hash, tracker, message),
        Alert::TrackerWarning {
            info_hash,
            tracker,
            message,
        } => {
            debug!(%info_hash, tracker = %tracker, message = %message, "tracker warning");
            let _ = shared.events.publish(Event::TrackerWarning {
                info_hash,
                tracker,
                message,
            });
        }
        Alert::SessionStats { counters } => shared.set_counters(counters),
        Alert::Unknown => {}
    }
}

/// Persistence failures are warnings; the in-memory registry stays
/// authoritative for the session.
async fn patch_record(shared: &EngineShared, info_hash: InfoHash, patch: RecordPatch) {
    if let Err(err) = shared.gateway.update_record(&info_hash, patch).await {
        warn!(%info_hash, error = %err, "failed to update torrent record");
    }
}

async fn on_added(shared: &EngineShared, handle: TorrentHandle) {
    let info_hash = handle.info_hash();
    let raw = match handle.status() {
        Ok(raw) => raw,
        Err(err) => {
            warn!(%info_hash, error = %err, "added alert carried a dead handle");
            return;
        }
    };
    let pending = shared.registry.take_pending(&info_hash);

    let mut status = TorrentStatus::new(info_hash, String::new(), raw.save_path.clone());
    convert::refresh_status(&mut status, raw);
    if status.name.is_empty() {
        status.name = pending
            .as_ref()
            .and_then(|pending| pending.name_hint.clone())
            .unwrap_or_else(|| format!("Torrent {}", info_hash.short8()));
    }

    shared.registry.insert(info_hash, handle, status.clone());

    let magnet_uri = pending
        .as_ref()
        .and_then(|pending| pending.magnet_uri.clone());
    let metainfo_blob = pending
        .as_ref()
        .and_then(|pending| pending.metainfo_blob.as_deref());
    let record = convert::initial_record(&status, magnet_uri, metainfo_blob);
    match shared.gateway.add_record(&record).await {
        Ok(()) => {}
        Err(TorrentError::DuplicateTorrent) => {
            // Restored torrent: the record predates this session.
            let patch = RecordPatch {
                status: Some(status.state.as_str().to_owned()),
                last_active: Some(Utc::now()),
                ..RecordPatch::default()
            };
            if let Err(err) = shared.gateway.update_record(&info_hash, patch).await {
                warn!(%info_hash, error = %err, "failed to refresh restored record");
            }
        }
        Err(err) => warn!(%info_hash, error = %err, "failed to persist torrent record"),
    }

    info!(%info_hash, name = %status.name, "torrent added");
    let _ = shared.events.publish(Event::TorrentAdded {
        info_hash,
        name: status.name,
    });
}

async fn on_removed(shared: &EngineShared, info_hash: InfoHash) {
    shared.registry.remove_entry(&info_hash);
    if let Err(err) = shared.gateway.remove_record(&info_hash).await {
        warn!(%info_hash, error = %err, "failed to remove torrent record");
    }
    info!(%info_hash, "torrent removed");
    let _ = shared.events.publish(Event::TorrentRemoved { info_hash });
}

async fn on_state_changed(
    shared: &EngineShared,
    info_hash: InfoHash,
    old: TorrentState,
    new: TorrentState,
) {
    let updated = shared.registry.update_status(&info_hash, |status| {
        status.state = new;
        status.paused = new == TorrentState::Paused;
    });
    if updated.is_none() {
        debug!(%info_hash, "state change for unmaterialised torrent ignored");
        return;
    }

    if old == TorrentState::DownloadingMetadata {
        materialise_metainfo(shared, &info_hash).await;
    }

    patch_record(
        shared,
        info_hash,
        RecordPatch {
            status: Some(new.as_str().to_owned()),
            last_active: Some(Utc::now()),
            ..RecordPatch::default()
        },
    )
    .await;

    debug!(%info_hash, %old, %new, "torrent state changed");
    let _ = shared
        .events
        .publish(Event::TorrentStateChanged {
            info_hash,
            old,
            new,
        });
}

/// Magnet-born torrents gain their metainfo once the engine has fetched it;
/// embed it so restarts no longer depend on the swarm.
async fn materialise_metainfo(shared: &EngineShared, info_hash: &InfoHash) {
    let Ok(handle) = shared.registry.handle_of(info_hash) else {
        return;
    };
    let Some(blob) = handle.metainfo() else {
        return;
    };
    let metainfo = match Metainfo::parse(&blob) {
        Ok(metainfo) => metainfo,
        Err(err) => {
            warn!(%info_hash, error = %err, "engine-provided metainfo failed to parse");
            return;
        }
    };

    shared.registry.update_status(info_hash, |status| {
        status.name.clone_from(&metainfo.name);
        status.total_wanted = metainfo.total_size;
    });
    let files: Vec<String> = metainfo
        .files
        .iter()
        .map(|file| file.path.clone())
        .collect();
    patch_record(
        shared,
        *info_hash,
        RecordPatch {
            name: Some(metainfo.name),
            total_size: Some(metainfo.total_size),
            files: Some(files),
            metainfo: Some(encode_metainfo_blob(&blob)),
            ..RecordPatch::default()
        },
    )
    .await;
    debug!(%info_hash, "metainfo materialised for magnet-born torrent");
}

async fn on_finished(shared: &EngineShared, info_hash: InfoHash) {
    let completed_at = Utc::now();
    let updated = shared.registry.update_status(&info_hash, |status| {
        status.finished = true;
        status.progress = 1.0;
        status.completed_at = Some(completed_at);
    });
    if updated.is_none() {
        return;
    }

    patch_record(
        shared,
        info_hash,
        RecordPatch {
            progress: Some(1.0),
            last_active: Some(completed_at),
            ..RecordPatch::default()
        },
    )
    .await;

    info!(%info_hash, "torrent finished");
    let _ = shared.events.publish(Event::TorrentFinished { info_hash });
}

async fn on_faulted(
    shared: &EngineShared,
    info_hash: InfoHash,
    kind: TorrentErrorKind,
    message: String,
) {
    shared.registry.update_status(&info_hash, |status| {
        status.state = TorrentState::Error;
        status.error = Some(message.clone());
    });
    patch_record(
        shared,
        info_hash,
        RecordPatch {
            status: Some(TorrentState::Error.as_str().to_owned()),
            last_active: Some(Utc::now()),
            ..RecordPatch::default()
        },
    )
    .await;

    error!(%info_hash, kind = %kind, message = %message, "torrent failed");
    let _ = shared.events.publish(Event::TorrentError {
        info_hash,
        kind,
        message,
    });
}

fn on_tracker_error(shared: &EngineShared, info_hash: InfoHash, tracker: String, message: String) {
    shared.registry.update_status(&info_hash, |status| {
        status.error = Some(match status.error.take() {
            Some(existing) => format!("{existing}; {message}"),
            None => message.clone(),
        });
    });
    warn!(%info_hash, tracker = %tracker, message = %message, "tracker error");
    let _ = shared.events.publish(Event::TrackerError {
        info_hash,
        tracker,
        message,
    });
}

/// Aggregate one stats tick: refresh cached statuses, bucket by state, merge
/// the last-known session counters, publish progress and stats events.
pub(crate) async fn aggregate_stats(shared: &EngineShared) {
    shared.session.post_stats_request();

    let mut refreshed = Vec::new();
    for (info_hash, handle) in shared.registry.entries_snapshot() {
        match handle.status() {
            Ok(raw) => {
                if let Some(updated) = shared
                    .registry
                    .update_status(&info_hash, |cached| convert::refresh_status(cached, raw))
                {
                    refreshed.push(updated);
                }
            }
            Err(err) => warn!(%info_hash, error = %err, "failed to refresh torrent status"),
        }
    }

    let counters = shared.counters();
    let mut stats = SessionStats {
        total_downloaded: counters.total_payload_download,
        total_uploaded: counters.total_payload_upload,
        dht_nodes: counters.dht_nodes,
        ..SessionStats::default()
    };
    for status in &refreshed {
        stats.total_torrents += 1;
        if status.paused {
            stats.paused_torrents += 1;
        } else {
            stats.active_torrents += 1;
            match status.state {
                TorrentState::Downloading | TorrentState::DownloadingMetadata => {
                    stats.downloading_torrents += 1;
                }
                TorrentState::Seeding => stats.seeding_torrents += 1,
                _ => {}
            }
        }
        stats.download_rate += status.download_rate;
        stats.upload_rate += status.upload_rate;
        stats.total_peers += status.peers;
    }
    if stats.total_downloaded > 0 {
        stats.global_ratio = stats.total_uploaded as f64 / stats.total_downloaded as f64;
    }
    shared.set_stats(stats.clone());

    for status in refreshed {
        let info_hash = status.info_hash;
        let _ = shared.events.publish(Event::TorrentProgress {
            info_hash,
            status: Box::new(status),
        });
    }
    let _ = shared.events.publish(Event::SessionStatsUpdated { stats });
}
