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

//! File-backed persistence gateway.
//!
//! One JSON document per torrent record plus an opaque `session.state` blob,
//! all under a caller-supplied base directory. Suits the desktop profile where
//! a relational store would be overkill; the gateway trait keeps heavier
//! backends pluggable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eddy_torrent_core::{
    InfoHash, PersistenceGateway, RecordPatch, Result, TorrentError, TorrentRecord,
};
use tracing::warn;

const RECORD_SUFFIX: &str = ".torrent.json";
const SESSION_STATE_FILE: &str = "session.state";

/// Record store rooted at a base directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    base_dir: PathBuf,
}

impl RecordStore {
    /// Construct a store rooted at the provided directory.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Ensure the underlying directory exists.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::FileSystemError`] if the directory cannot be
    /// created.
    pub async fn ensure_initialized(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|err| TorrentError::FileSystemError {
                detail: format!(
                    "failed to create record dir {}: {err}",
                    self.base_dir.display()
                ),
            })
    }

    fn record_path(&self, info_hash: &InfoHash) -> PathBuf {
        self.base_dir.join(format!("{info_hash}{RECORD_SUFFIX}"))
    }

    fn session_state_path(&self) -> PathBuf {
        self.base_dir.join(SESSION_STATE_FILE)
    }

    async fn read_record_file(&self, path: &Path) -> Result<TorrentRecord> {
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| TorrentError::FileSystemError {
                detail: format!("failed to read record {}: {err}", path.display()),
            })?;
        serde_json::from_str(&data).map_err(|err| TorrentError::ParseError {
            detail: format!("failed to decode record {}: {err}", path.display()),
        })
    }

    async fn write_record_file(&self, record: &TorrentRecord) -> Result<()> {
        let json =
            serde_json::to_string_pretty(record).map_err(|err| TorrentError::ParseError {
                detail: format!("failed to encode record {}: {err}", record.info_hash),
            })?;
        let path = self.record_path(&record.info_hash);
        tokio::fs::write(&path, json)
            .await
            .map_err(|err| TorrentError::FileSystemError {
                detail: format!("failed to persist record {}: {err}", path.display()),
            })
    }
}

#[async_trait]
impl PersistenceGateway for RecordStore {
    async fn add_record(&self, record: &TorrentRecord) -> Result<()> {
        self.ensure_initialized().await?;
        let path = self.record_path(&record.info_hash);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(TorrentError::DuplicateTorrent);
        }
        self.write_record_file(record).await
    }

    async fn update_record(&self, info_hash: &InfoHash, patch: RecordPatch) -> Result<()> {
        let path = self.record_path(info_hash);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(TorrentError::TorrentNotFound);
        }
        let mut record = self.read_record_file(&path).await?;
        patch.apply(&mut record);
        self.write_record_file(&record).await
    }

    async fn get_record(&self, info_hash: &InfoHash) -> Result<Option<TorrentRecord>> {
        let path = self.record_path(info_hash);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        self.read_record_file(&path).await.map(Some)
    }

    async fn list_records(&self) -> Result<Vec<TorrentRecord>> {
        if !tokio::fs::try_exists(&self.base_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&self.base_dir).await.map_err(|err| {
            TorrentError::FileSystemError {
                detail: format!(
                    "failed to read record dir {}: {err}",
                    self.base_dir.display()
                ),
            }
        })?;

        let mut records = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "failed to walk record dir entry");
                    break;
                }
            };
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(RECORD_SUFFIX));
            if !is_record {
                continue;
            }
            match self.read_record_file(&path).await {
                Ok(record) => records.push(record),
                Err(err) => {
                    // Leave the unreadable file in place for inspection.
                    warn!(path = %path.display(), error = %err, "skipping unreadable record");
                }
            }
        }
        Ok(records)
    }

    async fn remove_record(&self, info_hash: &InfoHash) -> Result<()> {
        let path = self.record_path(info_hash);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TorrentError::FileSystemError {
                detail: format!("failed to remove record {}: {err}", path.display()),
            }),
        }
    }

    async fn write_session_blob(&self, blob: &[u8]) -> Result<()> {
        self.ensure_initialized().await?;
        let path = self.session_state_path();
        tokio::fs::write(&path, blob)
            .await
            .map_err(|err| TorrentError::FileSystemError {
                detail: format!("failed to persist session state {}: {err}", path.display()),
            })
    }

    async fn read_session_blob(&self) -> Result<Option<Vec<u8>>> {
        let path = self.session_state_path();
        match tokio::fs::read(&path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(TorrentError::FileSystemError {
                detail: format!("failed to read session state {}: {err}", path.display()),
            }),
        }
    }
}
