//! Infohash value type: the 160-bit identity of a torrent.

use std::fmt;
use std::str::FromStr;

use hex::FromHex;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

use crate::error::TorrentError;

/// Raw byte length of a v1 infohash.
pub const INFO_HASH_LEN: usize = 20;

/// SHA-1 digest over the bencoded `info` dictionary of a metainfo file.
///
/// The canonical textual form is 40 lowercase hex characters; parsing accepts
/// either case and normalises. Every live registry entry is keyed by a value
/// of this type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; INFO_HASH_LEN]);

impl InfoHash {
    /// Wrap a raw 20-byte digest.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; INFO_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the infohash of a bencoded `info` dictionary.
    #[must_use]
    pub fn of_info_dict(info: &[u8]) -> Self {
        let digest = Sha1::digest(info);
        let mut bytes = [0_u8; INFO_HASH_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; INFO_HASH_LEN] {
        &self.0
    }

    /// First eight hex characters, used for fallback display names.
    #[must_use]
    pub fn short8(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "InfoHash({})", hex::encode(self.0))
    }
}

impl FromStr for InfoHash {
    type Err = TorrentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.len() != INFO_HASH_LEN * 2 {
            return Err(TorrentError::ParseError {
                detail: format!(
                    "info hash must be {} hex characters, got {}",
                    INFO_HASH_LEN * 2,
                    value.len()
                ),
            });
        }
        let bytes = <[u8; INFO_HASH_LEN]>::from_hex(value).map_err(|err| {
            TorrentError::ParseError {
                detail: format!("info hash is not valid hex: {err}"),
            }
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for InfoHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

struct InfoHashVisitor;

impl Visitor<'_> for InfoHashVisitor {
    type Value = InfoHash;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a 40-character hex string")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        value.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(InfoHashVisitor)
    }
}
