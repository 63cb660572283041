//! Public façade over the session, registry, pump and persistence gateway.
//!
//! Call discipline: operations that can touch the filesystem or hash payload
//! data (`add_*`, `seed_file`, `create_torrent`, `restore`, `shutdown`) are
//! async and complete on the runtime; trivially synchronous operations
//! (`pause`, `resume`, `remove`, the query surface) complete on the caller.
//! Add operations resolve at engine acceptance, not at swarm completion.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use eddy_events::EventBus;
use eddy_torrent_core::{
    InfoHash, MagnetLink, Metainfo, PersistenceGateway, Result, SessionStats, TorrentBuilder,
    TorrentError, TorrentRecord, TorrentSettings, TorrentStatus, decode_metainfo_blob,
    sanitize_save_path,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::alert::StatsCounters;
use crate::convert;
use crate::diskspace;
use crate::pump;
use crate::registry::{PendingAdd, TorrentRegistry};
use crate::session::{self, AddParams, AddSource, ProtocolSession};

/// Upper bound on a `.torrent` payload accepted from disk.
const MAX_METAINFO_LEN: usize = 10 * 1024 * 1024;
/// Bound on the final alert drain during shutdown.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared between the façade and the background tasks.
pub(crate) struct EngineShared {
    pub(crate) session: Arc<dyn ProtocolSession>,
    pub(crate) registry: TorrentRegistry,
    pub(crate) gateway: Arc<dyn PersistenceGateway>,
    pub(crate) events: EventBus,
    pub(crate) settings: RwLock<TorrentSettings>,
    pub(crate) counters: Mutex<StatsCounters>,
    pub(crate) stats: Mutex<SessionStats>,
}

impl EngineShared {
    pub(crate) fn counters(&self) -> StatsCounters {
        match self.counters.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub(crate) fn set_counters(&self, counters: StatsCounters) {
        match self.counters.lock() {
            Ok(mut guard) => *guard = counters,
            Err(poisoned) => *poisoned.into_inner() = counters,
        }
    }

    pub(crate) fn stats(&self) -> SessionStats {
        match self.stats.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set_stats(&self, stats: SessionStats) {
        match self.stats.lock() {
            Ok(mut guard) => *guard = stats,
            Err(poisoned) => *poisoned.into_inner() = stats,
        }
    }

    pub(crate) fn settings(&self) -> TorrentSettings {
        match self.settings.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_settings(&self, settings: TorrentSettings) {
        match self.settings.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }
}

/// Metainfo-sourced admission context shared by add, seed and restore paths.
struct MetainfoAdmission {
    metainfo: Metainfo,
    blob: Vec<u8>,
    magnet_uri: Option<String>,
    save_path: PathBuf,
    seed_mode: bool,
    paused: bool,
    check_space: bool,
}

/// Torrent engine core: swarm lifecycle over an injected session backend,
/// persistence gateway and event bus.
///
/// Construct inside a Tokio runtime; the alert pump and stats aggregator are
/// spawned immediately and run until [`shutdown`](Self::shutdown) (or drop).
pub struct TorrentEngine {
    shared: Arc<EngineShared>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TorrentEngine {
    /// Construct the engine with the default session backend.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::SessionError`] when the settings are invalid
    /// or the session cannot be constructed; this is fatal to the core.
    pub fn new(
        settings: TorrentSettings,
        gateway: Arc<dyn PersistenceGateway>,
        events: EventBus,
    ) -> Result<Self> {
        let session = session::create_session()?;
        Self::with_session(settings, gateway, events, session)
    }

    /// Construct the engine over an injected session backend.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::SessionError`] when the settings are invalid
    /// or the session rejects them.
    pub fn with_session(
        settings: TorrentSettings,
        gateway: Arc<dyn PersistenceGateway>,
        events: EventBus,
        session: Arc<dyn ProtocolSession>,
    ) -> Result<Self> {
        settings.validate()?;
        session.apply_settings(&convert::settings_pack(&settings))?;

        let shared = Arc::new(EngineShared {
            session,
            registry: TorrentRegistry::new(),
            gateway,
            events,
            settings: RwLock::new(settings),
            counters: Mutex::default(),
            stats: Mutex::default(),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = pump::spawn(Arc::clone(&shared), shutdown_rx);

        info!("torrent engine initialized");
        Ok(Self {
            shared,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    /// Admit a torrent from a magnet URI.
    ///
    /// Resolves with the authoritative infohash once the engine has accepted
    /// the parameters; the registry entry materialises on the `Added` alert.
    /// Free space cannot be checked until metadata arrives.
    ///
    /// # Errors
    ///
    /// `InvalidMagnetLink`, `DuplicateTorrent`, `PermissionDenied`,
    /// `SessionError`.
    pub async fn add_magnet(
        &self,
        uri: &str,
        save_path: Option<&Path>,
        overrides: Option<TorrentSettings>,
    ) -> Result<InfoHash> {
        let magnet = MagnetLink::parse(uri)?;
        let info_hash = magnet.info_hash();
        let settings = overrides.unwrap_or_else(|| self.shared.settings());
        let save_path = resolve_save_path(save_path, &settings)?;

        self.shared.registry.register_pending(
            info_hash,
            PendingAdd {
                magnet_uri: Some(magnet.uri().to_owned()),
                name_hint: magnet.display_name().map(str::to_owned),
                metainfo_blob: None,
            },
        )?;

        let mut trackers = magnet.trackers().to_vec();
        trackers.extend(settings.trackers.iter().cloned());
        self.dispatch(AddParams {
            info_hash,
            source: AddSource::Magnet(magnet),
            save_path,
            trackers,
            sequential: settings.sequential_download,
            auto_managed: settings.auto_managed,
            seed_mode: false,
            paused: false,
        })?;

        info!(%info_hash, "magnet add accepted");
        Ok(info_hash)
    }

    /// Admit a torrent from raw metainfo bytes.
    ///
    /// # Errors
    ///
    /// `InvalidTorrentFile`, `DuplicateTorrent`, `InsufficientSpace`,
    /// `PermissionDenied`, `DiskError`.
    pub async fn add_metainfo(
        &self,
        bytes: &[u8],
        save_path: Option<&Path>,
        overrides: Option<TorrentSettings>,
    ) -> Result<InfoHash> {
        let metainfo = Metainfo::parse(bytes).map_err(|err| match err {
            TorrentError::ParseError { .. } => TorrentError::InvalidTorrentFile,
            other => other,
        })?;
        let settings = overrides.unwrap_or_else(|| self.shared.settings());
        let save_path = resolve_save_path(save_path, &settings)?;

        let info_hash = self.admit(
            MetainfoAdmission {
                metainfo,
                blob: bytes.to_vec(),
                magnet_uri: None,
                save_path,
                seed_mode: false,
                paused: false,
                check_space: true,
            },
            &settings,
        )?;
        info!(%info_hash, "metainfo add accepted");
        Ok(info_hash)
    }

    /// Admit a torrent from a `.torrent` file on disk.
    ///
    /// # Errors
    ///
    /// Everything [`add_metainfo`](Self::add_metainfo) returns, plus
    /// `SecurityViolation` for traversal paths or oversized payloads and
    /// `FileSystemError` when the file cannot be read.
    pub async fn add_torrent_file(
        &self,
        path: &Path,
        save_path: Option<&Path>,
        overrides: Option<TorrentSettings>,
    ) -> Result<InfoHash> {
        ensure_plain_path(path)?;
        let data =
            tokio::fs::read(path)
                .await
                .map_err(|err| TorrentError::FileSystemError {
                    detail: format!("{}: {err}", path.display()),
                })?;
        if data.len() > MAX_METAINFO_LEN {
            return Err(TorrentError::SecurityViolation {
                detail: format!("torrent file exceeds {MAX_METAINFO_LEN} bytes"),
            });
        }
        self.add_metainfo(&data, save_path, overrides).await
    }

    /// Produce a metainfo payload for a local file or directory.
    ///
    /// # Errors
    ///
    /// `InvalidTorrentFile` for a missing or empty source, `DiskError` when
    /// hashing fails.
    pub async fn create_torrent(
        &self,
        source: &Path,
        trackers: Vec<String>,
        comment: Option<String>,
        creator: Option<String>,
        private: bool,
    ) -> Result<Vec<u8>> {
        let mut builder = TorrentBuilder::new(source).trackers(trackers).private(private);
        if let Some(comment) = comment {
            builder = builder.comment(comment);
        }
        if let Some(creator) = creator {
            builder = builder.creator(creator);
        }

        let bytes = tokio::task::spawn_blocking(move || builder.build())
            .await
            .map_err(|err| TorrentError::UnknownError {
                detail: format!("torrent build task failed: {err}"),
            })??;
        info!(source = %source.display(), bytes = bytes.len(), "torrent created");
        Ok(bytes)
    }

    /// Create a torrent for an existing file and start seeding it in place.
    ///
    /// # Errors
    ///
    /// `SecurityViolation` for traversal paths, `PermissionDenied` when the
    /// source is missing, plus the creation and admission failures.
    pub async fn seed_file(
        &self,
        path: &Path,
        overrides: Option<TorrentSettings>,
    ) -> Result<InfoHash> {
        ensure_plain_path(path)?;
        let metadata =
            tokio::fs::metadata(path)
                .await
                .map_err(|_| TorrentError::PermissionDenied {
                    path: path.to_path_buf(),
                })?;
        if !metadata.is_file() {
            return Err(TorrentError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }

        let settings = overrides.unwrap_or_else(|| self.shared.settings());
        let bytes = self
            .create_torrent(
                path,
                settings.trackers.clone(),
                None,
                Some(settings.user_agent.clone()),
                false,
            )
            .await?;
        let metainfo = Metainfo::parse(&bytes)?;
        let parent = path
            .parent()
            .ok_or_else(|| TorrentError::PermissionDenied {
                path: path.to_path_buf(),
            })?;
        let save_path = sanitize_save_path(parent)?;

        let info_hash = self.admit(
            MetainfoAdmission {
                metainfo,
                blob: bytes,
                magnet_uri: None,
                save_path,
                seed_mode: true,
                paused: false,
                check_space: false,
            },
            &settings,
        )?;
        info!(%info_hash, path = %path.display(), "file seeding started");
        Ok(info_hash)
    }

    /// Remove a torrent, optionally deleting its payload.
    ///
    /// The registry entry is erased synchronously; record deletion and the
    /// `TorrentRemoved` event follow from the engine's `Removed` alert.
    ///
    /// # Errors
    ///
    /// `TorrentNotFound` for unknown or not yet materialised infohashes.
    pub fn remove(&self, info_hash: &InfoHash, delete_files: bool) -> Result<()> {
        let handle = self.shared.registry.handle_of(info_hash)?;
        self.shared.session.remove(&handle, delete_files)?;
        self.shared.registry.remove_entry(info_hash);
        info!(%info_hash, delete_files, "torrent remove accepted");
        Ok(())
    }

    /// Pause a torrent.
    ///
    /// # Errors
    ///
    /// `TorrentNotFound`.
    pub fn pause(&self, info_hash: &InfoHash) -> Result<()> {
        self.shared.registry.handle_of(info_hash)?.pause()?;
        info!(%info_hash, "torrent paused");
        Ok(())
    }

    /// Resume a paused torrent, restoring its prior state.
    ///
    /// # Errors
    ///
    /// `TorrentNotFound`.
    pub fn resume(&self, info_hash: &InfoHash) -> Result<()> {
        self.shared.registry.handle_of(info_hash)?.resume()?;
        info!(%info_hash, "torrent resumed");
        Ok(())
    }

    /// Re-verify on-disk pieces against their hashes.
    ///
    /// # Errors
    ///
    /// `TorrentNotFound`.
    pub fn recheck(&self, info_hash: &InfoHash) -> Result<()> {
        self.shared.registry.handle_of(info_hash)?.force_recheck()?;
        info!(%info_hash, "torrent recheck requested");
        Ok(())
    }

    /// Move a torrent's payload to a new directory.
    ///
    /// # Errors
    ///
    /// `TorrentNotFound`, `PermissionDenied`.
    pub fn move_torrent(&self, info_hash: &InfoHash, new_path: &Path) -> Result<()> {
        let handle = self.shared.registry.handle_of(info_hash)?;
        let target = sanitize_save_path(new_path)?;
        handle.move_storage(&target)?;
        info!(%info_hash, target = %target.display(), "torrent move requested");
        Ok(())
    }

    /// Apply per-file download priorities; values clamp to `0..=7`.
    ///
    /// # Errors
    ///
    /// `TorrentNotFound`.
    pub fn set_file_priorities(&self, info_hash: &InfoHash, priorities: &[i32]) -> Result<()> {
        let handle = self.shared.registry.handle_of(info_hash)?;
        let clamped: Vec<u8> = priorities
            .iter()
            .map(|priority| u8::try_from((*priority).clamp(0, 7)).unwrap_or(0))
            .collect();
        handle.prioritize_files(&clamped)?;
        info!(%info_hash, files = clamped.len(), "file priorities updated");
        Ok(())
    }

    /// Cached status of a live torrent.
    ///
    /// # Errors
    ///
    /// `TorrentNotFound`.
    pub fn status_of(&self, info_hash: &InfoHash) -> Result<TorrentStatus> {
        self.shared.registry.status_of(info_hash)
    }

    /// Cached statuses of every live torrent.
    #[must_use]
    pub fn list_statuses(&self) -> Vec<TorrentStatus> {
        self.shared.registry.list_statuses()
    }

    /// Infohashes of every live torrent.
    #[must_use]
    pub fn list_info_hashes(&self) -> Vec<InfoHash> {
        self.shared.registry.list_info_hashes()
    }

    /// Whether a live entry exists for the infohash.
    #[must_use]
    pub fn has(&self, info_hash: &InfoHash) -> bool {
        self.shared.registry.has(info_hash)
    }

    /// Latest aggregated session statistics.
    #[must_use]
    pub fn session_stats(&self) -> SessionStats {
        self.shared.stats()
    }

    /// Currently applied settings.
    #[must_use]
    pub fn settings(&self) -> TorrentSettings {
        self.shared.settings()
    }

    /// Hot-apply new session settings.
    ///
    /// # Errors
    ///
    /// `SessionError` when validation fails or the session rejects the pack.
    pub fn apply_settings(&self, settings: TorrentSettings) -> Result<()> {
        settings.validate()?;
        self.shared
            .session
            .apply_settings(&convert::settings_pack(&settings))?;
        self.shared.set_settings(settings);
        info!("session settings updated");
        Ok(())
    }

    /// Restore session state and persisted torrents at startup.
    ///
    /// Session state is applied before any torrent is dispatched. Records
    /// prefer their embedded metainfo blob and fall back to the magnet URI;
    /// records with neither are skipped with a warning. Paused state is
    /// preserved. Returns the number of dispatched restores; entries
    /// materialise through the normal alert path.
    ///
    /// # Errors
    ///
    /// Currently infallible at the batch level; per-record failures are
    /// logged and skipped.
    pub async fn restore(&self) -> Result<usize> {
        match self.shared.gateway.read_session_blob().await {
            Ok(Some(blob)) => {
                if let Err(err) = self.shared.session.load_state(&blob) {
                    warn!(error = %err, "failed to restore session state; continuing");
                } else {
                    info!("session state restored");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to read session state"),
        }

        let records = match self.shared.gateway.list_records().await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "failed to list persisted torrents");
                Vec::new()
            }
        };

        let mut restored = 0_usize;
        for record in records {
            let info_hash = record.info_hash;
            match self.dispatch_restore(record) {
                Ok(()) => restored += 1,
                Err(err) => warn!(%info_hash, error = %err, "skipping unrestorable record"),
            }
        }
        info!(restored, "startup restore dispatched");
        Ok(restored)
    }

    /// Shut the engine down: stop the periodic tasks, pause every swarm,
    /// drain the final alert batch within a 5 s bound, persist the session
    /// state blob and release the session.
    ///
    /// # Errors
    ///
    /// Currently infallible; persistence failures are logged.
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.shutdown.send(true);
        let tasks = {
            let mut guard = match self.tasks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            let _ = task.await;
        }

        self.shared.session.pause_all();
        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        loop {
            if self.shared.session.pop_alerts().is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("shutdown alert drain hit its deadline");
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        match self.shared.session.save_state() {
            Ok(blob) => {
                if let Err(err) = self.shared.gateway.write_session_blob(&blob).await {
                    warn!(error = %err, "failed to persist session state");
                }
            }
            Err(err) => warn!(error = %err, "failed to capture session state"),
        }

        info!("torrent engine shut down");
        Ok(())
    }

    fn dispatch(&self, params: AddParams) -> Result<()> {
        let info_hash = params.info_hash;
        if let Err(err) = self.shared.session.async_add(params) {
            self.shared.registry.abort_pending(&info_hash);
            return Err(err);
        }
        Ok(())
    }

    fn admit(&self, admission: MetainfoAdmission, settings: &TorrentSettings) -> Result<InfoHash> {
        let info_hash = admission.metainfo.info_hash;
        self.shared.registry.register_pending(
            info_hash,
            PendingAdd {
                magnet_uri: admission.magnet_uri,
                name_hint: Some(admission.metainfo.name.clone()),
                metainfo_blob: Some(admission.blob),
            },
        )?;

        if admission.check_space {
            let required = admission.metainfo.total_size;
            let available = match diskspace::free_space(&admission.save_path) {
                Ok(available) => available,
                Err(err) => {
                    self.shared.registry.abort_pending(&info_hash);
                    return Err(err);
                }
            };
            if available < required {
                self.shared.registry.abort_pending(&info_hash);
                return Err(TorrentError::InsufficientSpace {
                    required,
                    available,
                });
            }
        }

        let mut trackers = admission.metainfo.trackers.clone();
        trackers.extend(settings.trackers.iter().cloned());
        self.dispatch(AddParams {
            info_hash,
            source: AddSource::Metainfo(admission.metainfo),
            save_path: admission.save_path,
            trackers,
            sequential: settings.sequential_download,
            auto_managed: settings.auto_managed,
            seed_mode: admission.seed_mode,
            paused: admission.paused,
        })?;
        Ok(info_hash)
    }

    fn dispatch_restore(&self, record: TorrentRecord) -> Result<()> {
        let settings = self.shared.settings();
        let paused = record.is_paused();
        let save_path = sanitize_save_path(Path::new(&record.save_path))?;

        if let Some(encoded) = &record.metainfo {
            let blob = decode_metainfo_blob(encoded)?;
            let metainfo = Metainfo::parse(&blob)?;
            self.admit(
                MetainfoAdmission {
                    metainfo,
                    blob,
                    magnet_uri: record.magnet_uri.clone(),
                    save_path,
                    seed_mode: false,
                    paused,
                    check_space: false,
                },
                &settings,
            )
            .map(drop)
        } else if let Some(uri) = &record.magnet_uri {
            let magnet = MagnetLink::parse(uri)?;
            let info_hash = magnet.info_hash();
            self.shared.registry.register_pending(
                info_hash,
                PendingAdd {
                    magnet_uri: Some(uri.clone()),
                    name_hint: magnet
                        .display_name()
                        .map(str::to_owned)
                        .or_else(|| Some(record.name.clone())),
                    metainfo_blob: None,
                },
            )?;
            let mut trackers = magnet.trackers().to_vec();
            trackers.extend(settings.trackers.iter().cloned());
            self.dispatch(AddParams {
                info_hash,
                source: AddSource::Magnet(magnet),
                save_path,
                trackers,
                sequential: settings.sequential_download,
                auto_managed: settings.auto_managed,
                seed_mode: false,
                paused,
            })
        } else {
            Err(TorrentError::UnknownError {
                detail: "record carries neither metainfo nor magnet URI".to_owned(),
            })
        }
    }
}

impl Drop for TorrentEngine {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

fn resolve_save_path(save_path: Option<&Path>, settings: &TorrentSettings) -> Result<PathBuf> {
    let target = save_path.map_or_else(|| settings.download_path.clone(), Path::to_path_buf);
    sanitize_save_path(&target)
}

fn ensure_plain_path(path: &Path) -> Result<()> {
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(TorrentError::SecurityViolation {
            detail: format!("path traversal rejected: {}", path.display()),
        });
    }
    Ok(())
}
