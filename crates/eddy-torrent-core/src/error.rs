//! Closed error taxonomy for the torrent engine core.
//!
//! # Design
//!
//! - Display strings are constant and user-presentable; operational context
//!   lives in fields so log pipelines can filter on stable messages.
//! - [`TorrentErrorKind`] is the field-less projection of the same taxonomy,
//!   carried on the event surface where errors must be serialisable.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, TorrentError>;

/// Errors surfaced by the torrent engine core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TorrentError {
    /// The magnet URI failed shape validation.
    #[error("invalid magnet link format")]
    InvalidMagnetLink,
    /// The metainfo payload was empty, misframed, or rejected outright.
    #[error("invalid torrent file")]
    InvalidTorrentFile,
    /// A live entry with the same infohash already exists.
    #[error("torrent already exists")]
    DuplicateTorrent,
    /// No live entry matches the supplied infohash.
    #[error("torrent not found")]
    TorrentNotFound,
    /// A network-level failure reported by the underlying engine.
    #[error("network error")]
    NetworkError {
        /// Engine-supplied failure description.
        detail: String,
    },
    /// A disk read or write failed while hashing or checking payload data.
    #[error("disk error")]
    DiskError {
        /// Underlying I/O failure description.
        detail: String,
    },
    /// Structured data (bencode, JSON, hex) could not be decoded.
    #[error("parse error")]
    ParseError {
        /// Decoder failure description.
        detail: String,
    },
    /// The peer-protocol session could not be constructed or reached.
    #[error("session error")]
    SessionError {
        /// Session failure description.
        detail: String,
    },
    /// A path could not be created, entered, or written.
    #[error("permission denied")]
    PermissionDenied {
        /// Path that was rejected.
        path: PathBuf,
    },
    /// The target volume lacks room for the torrent payload.
    #[error("insufficient disk space")]
    InsufficientSpace {
        /// Bytes the payload requires.
        required: u64,
        /// Bytes available on the target volume.
        available: u64,
    },
    /// A tracker rejected an announce.
    #[error("tracker error")]
    TrackerError {
        /// Tracker URL that reported the failure.
        tracker: String,
        /// Tracker-supplied failure description.
        detail: String,
    },
    /// An operation exceeded its deadline.
    #[error("timeout error")]
    TimeoutError,
    /// The caller dropped or cancelled the operation.
    #[error("operation cancelled")]
    CancellationRequested,
    /// A filesystem operation outside payload I/O failed.
    #[error("file system error")]
    FileSystemError {
        /// Underlying failure description.
        detail: String,
    },
    /// Input was rejected by a security policy (traversal, oversized blob).
    #[error("security violation")]
    SecurityViolation {
        /// Policy failure description.
        detail: String,
    },
    /// An unclassified failure from the underlying engine.
    #[error("unknown error")]
    UnknownError {
        /// Whatever description was available.
        detail: String,
    },
}

impl TorrentError {
    /// Field-less kind used on the event surface.
    #[must_use]
    pub const fn kind(&self) -> TorrentErrorKind {
        match self {
            Self::InvalidMagnetLink => TorrentErrorKind::InvalidMagnetLink,
            Self::InvalidTorrentFile => TorrentErrorKind::InvalidTorrentFile,
            Self::DuplicateTorrent => TorrentErrorKind::DuplicateTorrent,
            Self::TorrentNotFound => TorrentErrorKind::TorrentNotFound,
            Self::NetworkError { .. } => TorrentErrorKind::NetworkError,
            Self::DiskError { .. } => TorrentErrorKind::DiskError,
            Self::ParseError { .. } => TorrentErrorKind::ParseError,
            Self::SessionError { .. } => TorrentErrorKind::SessionError,
            Self::PermissionDenied { .. } => TorrentErrorKind::PermissionDenied,
            Self::InsufficientSpace { .. } => TorrentErrorKind::InsufficientSpace,
            Self::TrackerError { .. } => TorrentErrorKind::TrackerError,
            Self::TimeoutError => TorrentErrorKind::TimeoutError,
            Self::CancellationRequested => TorrentErrorKind::CancellationRequested,
            Self::FileSystemError { .. } => TorrentErrorKind::FileSystemError,
            Self::SecurityViolation { .. } => TorrentErrorKind::SecurityViolation,
            Self::UnknownError { .. } => TorrentErrorKind::UnknownError,
        }
    }
}

/// Serialisable error kind carried by `TorrentError` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentErrorKind {
    /// See [`TorrentError::InvalidMagnetLink`].
    InvalidMagnetLink,
    /// See [`TorrentError::InvalidTorrentFile`].
    InvalidTorrentFile,
    /// See [`TorrentError::DuplicateTorrent`].
    DuplicateTorrent,
    /// See [`TorrentError::TorrentNotFound`].
    TorrentNotFound,
    /// See [`TorrentError::NetworkError`].
    NetworkError,
    /// See [`TorrentError::DiskError`].
    DiskError,
    /// See [`TorrentError::ParseError`].
    ParseError,
    /// See [`TorrentError::SessionError`].
    SessionError,
    /// See [`TorrentError::PermissionDenied`].
    PermissionDenied,
    /// See [`TorrentError::InsufficientSpace`].
    InsufficientSpace,
    /// See [`TorrentError::TrackerError`].
    TrackerError,
    /// See [`TorrentError::TimeoutError`].
    TimeoutError,
    /// See [`TorrentError::CancellationRequested`].
    CancellationRequested,
    /// See [`TorrentError::FileSystemError`].
    FileSystemError,
    /// See [`TorrentError::SecurityViolation`].
    SecurityViolation,
    /// See [`TorrentError::UnknownError`].
    UnknownError,
}

impl TorrentErrorKind {
    /// Stable human-readable string, identical to the owning error's Display.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::InvalidMagnetLink => "invalid magnet link format",
            Self::InvalidTorrentFile => "invalid torrent file",
            Self::DuplicateTorrent => "torrent already exists",
            Self::TorrentNotFound => "torrent not found",
            Self::NetworkError => "network error",
            Self::DiskError => "disk error",
            Self::ParseError => "parse error",
            Self::SessionError => "session error",
            Self::PermissionDenied => "permission denied",
            Self::InsufficientSpace => "insufficient disk space",
            Self::TrackerError => "tracker error",
            Self::TimeoutError => "timeout error",
            Self::CancellationRequested => "operation cancelled",
            Self::FileSystemError => "file system error",
            Self::SecurityViolation => "security violation",
            Self::UnknownError => "unknown error",
        }
    }
}

impl std::fmt::Display for TorrentErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_kind_message() {
        let cases: Vec<TorrentError> = vec![
            TorrentError::InvalidMagnetLink,
            TorrentError::InvalidTorrentFile,
            TorrentError::DuplicateTorrent,
            TorrentError::TorrentNotFound,
            TorrentError::NetworkError {
                detail: "connection reset".into(),
            },
            TorrentError::DiskError {
                detail: "short read".into(),
            },
            TorrentError::ParseError {
                detail: "unexpected token".into(),
            },
            TorrentError::SessionError {
                detail: "listen failure".into(),
            },
            TorrentError::PermissionDenied {
                path: PathBuf::from("/forbidden"),
            },
            TorrentError::InsufficientSpace {
                required: 2048,
                available: 1024,
            },
            TorrentError::TrackerError {
                tracker: "udp://tracker.invalid:6969".into(),
                detail: "announce refused".into(),
            },
            TorrentError::TimeoutError,
            TorrentError::CancellationRequested,
            TorrentError::FileSystemError {
                detail: "read-only mount".into(),
            },
            TorrentError::SecurityViolation {
                detail: "path traversal".into(),
            },
            TorrentError::UnknownError {
                detail: "mystery".into(),
            },
        ];

        for error in cases {
            assert_eq!(error.to_string(), error.kind().message());
        }
    }

    #[test]
    fn kind_serialises_snake_case() -> anyhow::Result<()> {
        let json = serde_json::to_string(&TorrentErrorKind::InsufficientSpace)?;
        assert_eq!(json, "\"insufficient_space\"");
        let back: TorrentErrorKind = serde_json::from_str(&json)?;
        assert_eq!(back, TorrentErrorKind::InsufficientSpace);
        Ok(())
    }
}
