//! In-memory session backend.
//!
//! Stands behind [`create_session`](super::create_session) when no native
//! engine is linked and doubles as the simulation surface for the test
//! suites: alert sequences mirror what a real engine emits for add, pause,
//! resume, recheck and remove, and the hooks at the bottom drive the
//! behaviours only a live swarm would otherwise produce (metadata arrival,
//! completion, faults, tracker chatter).

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use eddy_torrent_core::{
    InfoHash, Metainfo, Result, TorrentError, TorrentErrorKind, TorrentState,
};
use serde::{Deserialize, Serialize};

use super::{
    AddParams, AddSource, HandleFile, HandleStatus, ProtocolHandle, ProtocolSession, SettingsPack,
    TorrentHandle,
};
use crate::alert::{Alert, StatsCounters};

const DEFAULT_FILE_PRIORITY: u8 = 4;

/// In-memory stand-in for a peer-protocol session.
#[derive(Clone, Default)]
pub struct StubSession {
    inner: Arc<Mutex<StubInner>>,
}

#[derive(Default)]
struct StubInner {
    torrents: HashMap<InfoHash, StubTorrent>,
    alerts: VecDeque<Alert>,
    counters: StatsCounters,
    pack: SettingsPack,
}

struct StubTorrent {
    name: String,
    state: TorrentState,
    resume_state: TorrentState,
    total_size: u64,
    downloaded: u64,
    uploaded: u64,
    progress: f64,
    download_rate: u64,
    upload_rate: u64,
    seeders: u32,
    peers: u32,
    paused: bool,
    finished: bool,
    seeding: bool,
    save_path: PathBuf,
    has_metadata: bool,
    files: Vec<HandleFile>,
    metainfo_blob: Option<Vec<u8>>,
    error: Option<String>,
}

impl StubTorrent {
    fn from_params(params: &AddParams) -> Self {
        let (name, total_size, has_metadata, files) = match &params.source {
            AddSource::Magnet(magnet) => (
                magnet.display_name().unwrap_or_default().to_owned(),
                0,
                false,
                Vec::new(),
            ),
            AddSource::Metainfo(metainfo) => (
                metainfo.name.clone(),
                metainfo.total_size,
                true,
                metainfo
                    .files
                    .iter()
                    .map(|file| HandleFile {
                        path: file.path.clone(),
                        size: file.size,
                        progress: if params.seed_mode { 1.0 } else { 0.0 },
                        priority: DEFAULT_FILE_PRIORITY,
                    })
                    .collect(),
            ),
        };

        Self {
            name,
            state: TorrentState::Queued,
            resume_state: TorrentState::Queued,
            total_size,
            downloaded: 0,
            uploaded: 0,
            progress: 0.0,
            download_rate: 0,
            upload_rate: 0,
            seeders: 0,
            peers: 0,
            paused: false,
            finished: false,
            seeding: false,
            save_path: params.save_path.clone(),
            has_metadata,
            files,
            metainfo_blob: None,
            error: None,
        }
    }
}

fn lock(inner: &Mutex<StubInner>) -> MutexGuard<'_, StubInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl StubSession {
    /// Construct an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_torrent<T>(
        &self,
        info_hash: InfoHash,
        mutate: impl FnOnce(&mut StubTorrent) -> T,
    ) -> Result<T> {
        let mut inner = lock(&self.inner);
        let torrent = inner
            .torrents
            .get_mut(&info_hash)
            .ok_or(TorrentError::TorrentNotFound)?;
        Ok(mutate(torrent))
    }

    fn push_alerts(&self, alerts: impl IntoIterator<Item = Alert>) {
        lock(&self.inner).alerts.extend(alerts);
    }

    /// Simulate metadata arrival for a magnet-born torrent.
    ///
    /// # Errors
    ///
    /// Fails when the torrent is unknown or the blob does not parse.
    pub fn provide_metadata(&self, info_hash: InfoHash, blob: &[u8]) -> Result<()> {
        let metainfo = Metainfo::parse(blob)?;
        let transition = self.with_torrent(info_hash, |torrent| {
            torrent.name.clone_from(&metainfo.name);
            torrent.total_size = metainfo.total_size;
            torrent.has_metadata = true;
            torrent.metainfo_blob = Some(blob.to_vec());
            torrent.files = metainfo
                .files
                .iter()
                .map(|file| HandleFile {
                    path: file.path.clone(),
                    size: file.size,
                    progress: 0.0,
                    priority: DEFAULT_FILE_PRIORITY,
                })
                .collect();
            if torrent.state == TorrentState::DownloadingMetadata && !torrent.paused {
                let old = torrent.state;
                torrent.state = TorrentState::Downloading;
                Some((old, TorrentState::Downloading))
            } else {
                None
            }
        })?;
        if let Some((old, new)) = transition {
            self.push_alerts([Alert::StateChanged {
                info_hash,
                old,
                new,
            }]);
        }
        Ok(())
    }

    /// Simulate payload completion.
    ///
    /// # Errors
    ///
    /// Fails when the torrent is unknown.
    pub fn complete(&self, info_hash: InfoHash) -> Result<()> {
        let transition = self.with_torrent(info_hash, |torrent| {
            torrent.progress = 1.0;
            torrent.downloaded = torrent.total_size;
            torrent.finished = true;
            for file in &mut torrent.files {
                file.progress = 1.0;
            }
            if torrent.paused {
                None
            } else {
                let old = torrent.state;
                torrent.state = TorrentState::Seeding;
                torrent.seeding = true;
                Some((old, TorrentState::Seeding))
            }
        })?;
        let mut alerts = vec![Alert::Finished { info_hash }];
        if let Some((old, new)) = transition {
            alerts.push(Alert::StateChanged {
                info_hash,
                old,
                new,
            });
        }
        self.push_alerts(alerts);
        Ok(())
    }

    /// Simulate a fatal torrent error.
    ///
    /// # Errors
    ///
    /// Fails when the torrent is unknown.
    pub fn fault(
        &self,
        info_hash: InfoHash,
        kind: TorrentErrorKind,
        message: impl Into<String>,
    ) -> Result<()> {
        let message = message.into();
        self.with_torrent(info_hash, |torrent| {
            torrent.state = TorrentState::Error;
            torrent.error = Some(message.clone());
        })?;
        self.push_alerts([Alert::Faulted {
            info_hash,
            kind,
            message,
        }]);
        Ok(())
    }

    /// Simulate a tracker announce failure.
    ///
    /// # Errors
    ///
    /// Fails when the torrent is unknown.
    pub fn tracker_error(
        &self,
        info_hash: InfoHash,
        tracker: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<()> {
        self.with_torrent(info_hash, |_| ())?;
        self.push_alerts([Alert::TrackerError {
            info_hash,
            tracker: tracker.into(),
            message: message.into(),
        }]);
        Ok(())
    }

    /// Simulate a tracker warning.
    ///
    /// # Errors
    ///
    /// Fails when the torrent is unknown.
    pub fn tracker_warning(
        &self,
        info_hash: InfoHash,
        tracker: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<()> {
        self.with_torrent(info_hash, |_| ())?;
        self.push_alerts([Alert::TrackerWarning {
            info_hash,
            tracker: tracker.into(),
            message: message.into(),
        }]);
        Ok(())
    }

    /// Set the counters answered to the next stats request.
    pub fn set_counters(&self, counters: StatsCounters) {
        lock(&self.inner).counters = counters;
    }

    /// Set transfer figures reported by the torrent's status.
    ///
    /// # Errors
    ///
    /// Fails when the torrent is unknown.
    pub fn set_transfer(
        &self,
        info_hash: InfoHash,
        downloaded: u64,
        uploaded: u64,
        download_rate: u64,
        upload_rate: u64,
        seeders: u32,
        peers: u32,
    ) -> Result<()> {
        self.with_torrent(info_hash, |torrent| {
            torrent.downloaded = downloaded;
            torrent.uploaded = uploaded;
            torrent.download_rate = download_rate;
            torrent.upload_rate = upload_rate;
            torrent.seeders = seeders;
            torrent.peers = peers;
            if torrent.total_size > 0 {
                torrent.progress =
                    (downloaded as f64 / torrent.total_size as f64).clamp(0.0, 1.0);
            }
        })
    }
}

impl ProtocolSession for StubSession {
    fn apply_settings(&self, pack: &SettingsPack) -> Result<()> {
        lock(&self.inner).pack = pack.clone();
        Ok(())
    }

    fn async_add(&self, params: AddParams) -> Result<()> {
        let mut inner = lock(&self.inner);
        if inner.torrents.contains_key(&params.info_hash) {
            return Err(TorrentError::DuplicateTorrent);
        }

        let info_hash = params.info_hash;
        let mut torrent = StubTorrent::from_params(&params);
        let mut transitions = Vec::new();
        if params.paused {
            torrent.paused = true;
            torrent.resume_state = torrent.state;
            torrent.state = TorrentState::Paused;
        } else if params.seed_mode {
            torrent.state = TorrentState::Seeding;
            torrent.seeding = true;
            torrent.finished = true;
            torrent.progress = 1.0;
            transitions.push((TorrentState::Queued, TorrentState::Seeding));
        } else {
            match &params.source {
                AddSource::Magnet(_) => {
                    torrent.state = TorrentState::DownloadingMetadata;
                    transitions.push((TorrentState::Queued, TorrentState::DownloadingMetadata));
                }
                AddSource::Metainfo(_) => {
                    torrent.state = TorrentState::Downloading;
                    transitions.push((TorrentState::Queued, TorrentState::CheckingFiles));
                    transitions.push((TorrentState::CheckingFiles, TorrentState::Downloading));
                }
            }
        }

        inner.torrents.insert(info_hash, torrent);
        let handle: TorrentHandle = Arc::new(StubHandle {
            info_hash,
            inner: Arc::clone(&self.inner),
        });
        inner.alerts.push_back(Alert::Added { handle });
        for (old, new) in transitions {
            inner.alerts.push_back(Alert::StateChanged {
                info_hash,
                old,
                new,
            });
        }
        Ok(())
    }

    fn remove(&self, handle: &TorrentHandle, _delete_files: bool) -> Result<()> {
        let info_hash = handle.info_hash();
        let mut inner = lock(&self.inner);
        if inner.torrents.remove(&info_hash).is_none() {
            return Err(TorrentError::TorrentNotFound);
        }
        inner.alerts.push_back(Alert::Removed { info_hash });
        Ok(())
    }

    fn post_stats_request(&self) {
        let mut inner = lock(&self.inner);
        let counters = inner.counters;
        inner.alerts.push_back(Alert::SessionStats { counters });
    }

    fn pop_alerts(&self) -> Vec<Alert> {
        lock(&self.inner).alerts.drain(..).collect()
    }

    fn pause_all(&self) {
        let mut inner = lock(&self.inner);
        let mut alerts = Vec::new();
        for (info_hash, torrent) in &mut inner.torrents {
            if torrent.paused {
                continue;
            }
            let old = torrent.state;
            torrent.paused = true;
            torrent.resume_state = old;
            torrent.state = TorrentState::Paused;
            alerts.push(Alert::StateChanged {
                info_hash: *info_hash,
                old,
                new: TorrentState::Paused,
            });
        }
        inner.alerts.extend(alerts);
    }

    fn save_state(&self) -> Result<Vec<u8>> {
        let inner = lock(&self.inner);
        let state = StubState {
            pack: inner.pack.clone(),
            counters: inner.counters,
        };
        serde_json::to_vec(&state).map_err(|err| TorrentError::SessionError {
            detail: format!("failed to capture session state: {err}"),
        })
    }

    fn load_state(&self, blob: &[u8]) -> Result<()> {
        let state: StubState =
            serde_json::from_slice(blob).map_err(|err| TorrentError::ParseError {
                detail: format!("failed to decode session state: {err}"),
            })?;
        let mut inner = lock(&self.inner);
        inner.pack = state.pack;
        inner.counters = state.counters;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StubState {
    pack: SettingsPack,
    counters: StatsCounters,
}

struct StubHandle {
    info_hash: InfoHash,
    inner: Arc<Mutex<StubInner>>,
}

impl StubHandle {
    fn mutate<T>(&self, mutate: impl FnOnce(&mut StubTorrent) -> T) -> Result<T> {
        let mut inner = lock(&self.inner);
        let torrent = inner
            .torrents
            .get_mut(&self.info_hash)
            .ok_or(TorrentError::TorrentNotFound)?;
        Ok(mutate(torrent))
    }
}

impl ProtocolHandle for StubHandle {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn status(&self) -> Result<HandleStatus> {
        let inner = lock(&self.inner);
        let torrent = inner
            .torrents
            .get(&self.info_hash)
            .ok_or(TorrentError::TorrentNotFound)?;
        Ok(HandleStatus {
            info_hash: self.info_hash,
            name: torrent.name.clone(),
            state: torrent.state,
            total_wanted: torrent.total_size,
            downloaded: torrent.downloaded,
            uploaded: torrent.uploaded,
            progress: torrent.progress,
            download_rate: torrent.download_rate,
            upload_rate: torrent.upload_rate,
            seeders: torrent.seeders,
            peers: torrent.peers,
            paused: torrent.paused,
            finished: torrent.finished,
            seeding: torrent.seeding,
            save_path: torrent.save_path.clone(),
            has_metadata: torrent.has_metadata,
            files: torrent.files.clone(),
            error: torrent.error.clone(),
        })
    }

    fn pause(&self) -> Result<()> {
        let transition = self.mutate(|torrent| {
            if torrent.paused {
                return None;
            }
            let old = torrent.state;
            torrent.paused = true;
            torrent.resume_state = old;
            torrent.state = TorrentState::Paused;
            Some(old)
        })?;
        if let Some(old) = transition {
            lock(&self.inner).alerts.push_back(Alert::StateChanged {
                info_hash: self.info_hash,
                old,
                new: TorrentState::Paused,
            });
        }
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        let transition = self.mutate(|torrent| {
            if !torrent.paused {
                return None;
            }
            torrent.paused = false;
            let new = if torrent.resume_state == TorrentState::Paused {
                TorrentState::Queued
            } else {
                torrent.resume_state
            };
            torrent.state = new;
            Some(new)
        })?;
        if let Some(new) = transition {
            lock(&self.inner).alerts.push_back(Alert::StateChanged {
                info_hash: self.info_hash,
                old: TorrentState::Paused,
                new,
            });
        }
        Ok(())
    }

    fn force_recheck(&self) -> Result<()> {
        let old = self.mutate(|torrent| {
            let old = torrent.state;
            torrent.state = TorrentState::CheckingFiles;
            old
        })?;
        lock(&self.inner).alerts.push_back(Alert::StateChanged {
            info_hash: self.info_hash,
            old,
            new: TorrentState::CheckingFiles,
        });
        Ok(())
    }

    fn move_storage(&self, new_path: &Path) -> Result<()> {
        self.mutate(|torrent| {
            torrent.save_path = new_path.to_path_buf();
        })
    }

    fn prioritize_files(&self, priorities: &[u8]) -> Result<()> {
        self.mutate(|torrent| {
            for (file, priority) in torrent.files.iter_mut().zip(priorities) {
                file.priority = *priority;
            }
        })
    }

    fn metainfo(&self) -> Option<Vec<u8>> {
        let inner = lock(&self.inner);
        inner
            .torrents
            .get(&self.info_hash)
            .and_then(|torrent| torrent.metainfo_blob.clone())
    }
}
