//! BEP-3 metainfo parsing and infohash derivation.
//!
//! The serde structs mirror the bencoded layout with fields declared in the
//! dictionary's canonical key order, so re-encoding the `info` dictionary for
//! hashing produces the same bytes a compliant encoder would emit.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::error::{Result, TorrentError};
use crate::hash::InfoHash;

/// Byte length of one SHA-1 piece hash inside the `pieces` string.
const PIECE_HASH_LEN: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RawMetainfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) announce: Option<String>,
    #[serde(
        rename = "announce-list",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) announce_list: Option<Vec<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) comment: Option<String>,
    #[serde(rename = "created by", default, skip_serializing_if = "Option::is_none")]
    pub(crate) created_by: Option<String>,
    #[serde(
        rename = "creation date",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) creation_date: Option<i64>,
    pub(crate) info: RawInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RawInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) files: Option<Vec<RawFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) length: Option<u64>,
    pub(crate) name: String,
    #[serde(rename = "piece length")]
    pub(crate) piece_length: u64,
    pub(crate) pieces: ByteBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) private: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RawFile {
    pub(crate) length: u64,
    pub(crate) path: Vec<String>,
}

/// One file described by a metainfo dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetainfoFile {
    /// Path relative to the torrent root, `/`-joined.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
}

/// Parsed view of a `.torrent` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metainfo {
    /// Torrent display name from the `info` dictionary.
    pub name: String,
    /// SHA-1 over the bencoded `info` dictionary.
    pub info_hash: InfoHash,
    /// Sum of all file sizes in bytes.
    pub total_size: u64,
    /// Number of files in the payload (1 for single-file torrents).
    pub num_files: usize,
    /// Number of pieces the payload is split into.
    pub num_pieces: usize,
    /// Piece length in bytes.
    pub piece_length: u64,
    /// File listing; a single entry named after the torrent in single-file mode.
    pub files: Vec<MetainfoFile>,
    /// Flattened announce list (or the single `announce` entry).
    pub trackers: Vec<String>,
    /// Free-form comment, when present.
    pub comment: Option<String>,
    /// Creating application, when present.
    pub created_by: Option<String>,
    /// BEP-27 private flag.
    pub private: bool,
}

impl Metainfo {
    /// Parse a bencoded metainfo payload.
    ///
    /// # Errors
    ///
    /// [`TorrentError::InvalidTorrentFile`] for empty input or input that is
    /// not framed as a bencoded dictionary; [`TorrentError::ParseError`] when
    /// the decoder rejects the structure.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        validate_framing(bytes)?;
        let raw: RawMetainfo =
            serde_bencode::from_bytes(bytes).map_err(|err| TorrentError::ParseError {
                detail: err.to_string(),
            })?;
        Self::from_raw(raw)
    }

    pub(crate) fn from_raw(raw: RawMetainfo) -> Result<Self> {
        let info_bytes =
            serde_bencode::to_bytes(&raw.info).map_err(|err| TorrentError::ParseError {
                detail: err.to_string(),
            })?;
        let info_hash = InfoHash::of_info_dict(&info_bytes);

        let files: Vec<MetainfoFile> = match &raw.info.files {
            Some(entries) => entries
                .iter()
                .map(|file| MetainfoFile {
                    path: file.path.join("/"),
                    size: file.length,
                })
                .collect(),
            None => vec![MetainfoFile {
                path: raw.info.name.clone(),
                size: raw.info.length.unwrap_or(0),
            }],
        };
        let total_size = files.iter().map(|file| file.size).sum();

        let trackers = raw.announce_list.as_ref().map_or_else(
            || raw.announce.clone().into_iter().collect(),
            |tiers| tiers.iter().flatten().cloned().collect(),
        );

        Ok(Self {
            name: raw.info.name.clone(),
            info_hash,
            total_size,
            num_files: files.len(),
            num_pieces: raw.info.pieces.len() / PIECE_HASH_LEN,
            piece_length: raw.info.piece_length,
            files,
            trackers,
            comment: raw.comment,
            created_by: raw.created_by,
            private: raw.info.private == Some(1),
        })
    }
}

/// Check the outer bencoded-dictionary framing without decoding.
///
/// # Errors
///
/// Returns [`TorrentError::InvalidTorrentFile`] for empty input or input that
/// does not start with `d` and end with `e`.
pub fn validate_framing(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Err(TorrentError::InvalidTorrentFile);
    }
    if bytes.first() != Some(&b'd') || bytes.last() != Some(&b'e') {
        return Err(TorrentError::InvalidTorrentFile);
    }
    Ok(())
}
