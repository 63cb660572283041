//! Metainfo creation from a local file or directory tree.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};
use walkdir::WalkDir;

use crate::error::{Result, TorrentError};
use crate::metainfo::{RawFile, RawInfo, RawMetainfo};

const MIN_PIECE_LEN: u64 = 16 * 1024;
const MAX_PIECE_LEN: u64 = 16 * 1024 * 1024;
const TARGET_PIECE_COUNT: u64 = 2_048;
const READ_CHUNK: usize = 64 * 1024;

/// Builder producing a bencoded metainfo payload for a local source tree.
///
/// Piece length is auto-selected from the payload size; piece hashes are
/// SHA-1 over the concatenated file contents in listing order.
#[derive(Debug, Clone)]
pub struct TorrentBuilder {
    source: PathBuf,
    trackers: Vec<String>,
    comment: Option<String>,
    creator: Option<String>,
    private: bool,
}

impl TorrentBuilder {
    /// Start a builder for the given source file or directory.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            trackers: Vec::new(),
            comment: None,
            creator: None,
            private: false,
        }
    }

    /// Append a tracker URL to the announce list.
    #[must_use]
    pub fn tracker(mut self, url: impl Into<String>) -> Self {
        self.trackers.push(url.into());
        self
    }

    /// Replace the announce list wholesale.
    #[must_use]
    pub fn trackers(mut self, urls: impl IntoIterator<Item = String>) -> Self {
        self.trackers = urls.into_iter().collect();
        self
    }

    /// Set the free-form comment field.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Set the `created by` field.
    #[must_use]
    pub fn creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    /// Mark the torrent private (BEP-27).
    #[must_use]
    pub const fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    /// Produce the bencoded metainfo payload.
    ///
    /// # Errors
    ///
    /// [`TorrentError::InvalidTorrentFile`] when the source is missing or
    /// contains no files; [`TorrentError::DiskError`] when payload reads fail.
    pub fn build(&self) -> Result<Vec<u8>> {
        let sources = self.collect_sources()?;
        let total_size: u64 = sources.iter().map(|(_, _, size)| size).sum();
        let piece_length = auto_piece_length(total_size);
        let pieces = hash_pieces(&sources, piece_length)?;

        let name = self
            .source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or(TorrentError::InvalidTorrentFile)?;

        let single_file = sources.len() == 1 && self.source.is_file();
        let info = RawInfo {
            files: if single_file {
                None
            } else {
                Some(
                    sources
                        .iter()
                        .map(|(_, components, size)| RawFile {
                            length: *size,
                            path: components.clone(),
                        })
                        .collect(),
                )
            },
            length: single_file.then_some(total_size),
            name,
            piece_length,
            pieces: ByteBuf::from(pieces),
            private: self.private.then_some(1),
        };

        let metainfo = RawMetainfo {
            announce: self.trackers.first().cloned(),
            announce_list: (!self.trackers.is_empty()).then(|| {
                self.trackers
                    .iter()
                    .map(|tracker| vec![tracker.clone()])
                    .collect()
            }),
            comment: self.comment.clone(),
            created_by: self.creator.clone(),
            creation_date: Some(Utc::now().timestamp()),
            info,
        };

        serde_bencode::to_bytes(&metainfo).map_err(|err| TorrentError::ParseError {
            detail: err.to_string(),
        })
    }

    /// Enumerate `(absolute path, relative components, size)` for the payload.
    fn collect_sources(&self) -> Result<Vec<(PathBuf, Vec<String>, u64)>> {
        let metadata = std::fs::metadata(&self.source)
            .map_err(|_| TorrentError::InvalidTorrentFile)?;

        let mut sources = Vec::new();
        if metadata.is_file() {
            let component = self
                .source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or(TorrentError::InvalidTorrentFile)?;
            sources.push((self.source.clone(), vec![component], metadata.len()));
        } else if metadata.is_dir() {
            for entry in WalkDir::new(&self.source)
                .sort_by_file_name()
                .into_iter()
                .filter_map(std::result::Result::ok)
            {
                if !entry.file_type().is_file() || is_hidden(entry.path()) {
                    continue;
                }
                let size = entry
                    .metadata()
                    .map_err(|err| TorrentError::DiskError {
                        detail: err.to_string(),
                    })?
                    .len();
                let components = relative_components(entry.path(), &self.source)?;
                sources.push((entry.path().to_path_buf(), components, size));
            }
        } else {
            return Err(TorrentError::InvalidTorrentFile);
        }

        if sources.is_empty() {
            return Err(TorrentError::InvalidTorrentFile);
        }
        Ok(sources)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

fn relative_components(path: &Path, root: &Path) -> Result<Vec<String>> {
    let relative = path
        .strip_prefix(root)
        .map_err(|err| TorrentError::DiskError {
            detail: err.to_string(),
        })?;
    Ok(relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect())
}

/// Smallest power-of-two piece length in `[16 KiB, 16 MiB]` keeping the piece
/// count at or under the target.
fn auto_piece_length(total_size: u64) -> u64 {
    let mut length = MIN_PIECE_LEN;
    while length < MAX_PIECE_LEN && total_size / length > TARGET_PIECE_COUNT {
        length <<= 1;
    }
    length
}

fn hash_pieces(sources: &[(PathBuf, Vec<String>, u64)], piece_length: u64) -> Result<Vec<u8>> {
    let mut pieces = Vec::new();
    let mut hasher = Sha1::new();
    let mut filled: u64 = 0;
    let mut buffer = vec![0_u8; READ_CHUNK];

    for (path, _, _) in sources {
        let mut file = File::open(path).map_err(|err| TorrentError::DiskError {
            detail: format!("{}: {err}", path.display()),
        })?;
        loop {
            let read = file.read(&mut buffer).map_err(|err| TorrentError::DiskError {
                detail: format!("{}: {err}", path.display()),
            })?;
            if read == 0 {
                break;
            }
            let mut offset = 0_usize;
            while offset < read {
                let take = usize::try_from(piece_length - filled)
                    .unwrap_or(usize::MAX)
                    .min(read - offset);
                hasher.update(&buffer[offset..offset + take]);
                filled += take as u64;
                offset += take;
                if filled == piece_length {
                    pieces.extend_from_slice(&hasher.finalize_reset());
                    filled = 0;
                }
            }
        }
    }

    if filled > 0 {
        pieces.extend_from_slice(&hasher.finalize_reset());
    }
    Ok(pieces)
}
