//! Persisted torrent records and partial updates.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TorrentError};
use crate::hash::InfoHash;

/// Reconstruction data persisted per torrent.
///
/// For every live registry entry a matching record exists. Magnet-born
/// torrents carry only the URI until metadata is received, at which point the
/// metainfo blob materialises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentRecord {
    /// Identity of the torrent.
    pub info_hash: InfoHash,
    /// Display name at the time of the last update.
    pub name: String,
    /// Total payload size in bytes, `0` until metadata is known.
    pub total_size: u64,
    /// When the torrent was first admitted.
    #[serde(with = "iso8601_millis")]
    pub date_added: DateTime<Utc>,
    /// Last time the record was touched by a status update.
    #[serde(with = "iso8601_millis")]
    pub last_active: DateTime<Utc>,
    /// Save directory of the payload.
    pub save_path: String,
    /// Completion snapshot in `[0.0, 1.0]`.
    pub progress: f64,
    /// Lifecycle state string (see `TorrentState::as_str`).
    pub status: String,
    /// Seeder count snapshot.
    pub seeders: u32,
    /// Leecher count snapshot.
    pub leechers: u32,
    /// Downloaded bytes snapshot.
    pub downloaded: u64,
    /// Uploaded bytes snapshot.
    pub uploaded: u64,
    /// Share ratio snapshot.
    pub ratio: f64,
    /// Magnet URI the torrent was added from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnet_uri: Option<String>,
    /// Base64-encoded metainfo blob, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metainfo: Option<String>,
    /// Relative payload file paths, empty until metadata is known.
    #[serde(default)]
    pub files: Vec<String>,
}

impl TorrentRecord {
    /// Whether the record was persisted in a paused state.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.status == "paused"
    }
}

/// Partial update of a record's mutable fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    /// New completion value.
    pub progress: Option<f64>,
    /// New lifecycle state string.
    pub status: Option<String>,
    /// New display name (magnet torrents learn theirs late).
    pub name: Option<String>,
    /// New total size.
    pub total_size: Option<u64>,
    /// New seeder count.
    pub seeders: Option<u32>,
    /// New leecher count.
    pub leechers: Option<u32>,
    /// New downloaded byte count.
    pub downloaded: Option<u64>,
    /// New uploaded byte count.
    pub uploaded: Option<u64>,
    /// New share ratio.
    pub ratio: Option<f64>,
    /// New last-active timestamp.
    pub last_active: Option<DateTime<Utc>>,
    /// New save directory.
    pub save_path: Option<String>,
    /// New file listing.
    pub files: Option<Vec<String>>,
    /// Newly materialised metainfo blob (base64).
    pub metainfo: Option<String>,
}

impl RecordPatch {
    /// Apply every populated field to the record.
    pub fn apply(self, record: &mut TorrentRecord) {
        if let Some(progress) = self.progress {
            record.progress = progress;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(total_size) = self.total_size {
            record.total_size = total_size;
        }
        if let Some(seeders) = self.seeders {
            record.seeders = seeders;
        }
        if let Some(leechers) = self.leechers {
            record.leechers = leechers;
        }
        if let Some(downloaded) = self.downloaded {
            record.downloaded = downloaded;
        }
        if let Some(uploaded) = self.uploaded {
            record.uploaded = uploaded;
        }
        if let Some(ratio) = self.ratio {
            record.ratio = ratio;
        }
        if let Some(last_active) = self.last_active {
            record.last_active = last_active;
        }
        if let Some(save_path) = self.save_path {
            record.save_path = save_path;
        }
        if let Some(files) = self.files {
            record.files = files;
        }
        if let Some(metainfo) = self.metainfo {
            record.metainfo = Some(metainfo);
        }
    }
}

/// Encode a metainfo blob for embedding in a record.
#[must_use]
pub fn encode_metainfo_blob(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode an embedded metainfo blob.
///
/// # Errors
///
/// Returns [`TorrentError::ParseError`] when the input is not valid base64.
pub fn decode_metainfo_blob(encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|err| TorrentError::ParseError {
            detail: format!("metainfo blob is not valid base64: {err}"),
        })
}

/// ISO-8601 timestamps with millisecond precision, UTC.
mod iso8601_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub(super) fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|value| value.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample_record() -> TorrentRecord {
        TorrentRecord {
            info_hash: InfoHash::from_str("0123456789abcdef0123456789abcdef01234567")
                .expect("valid hash"),
            name: "demo".into(),
            total_size: 1_048_576,
            date_added: Utc::now(),
            last_active: Utc::now(),
            save_path: "/downloads".into(),
            progress: 0.25,
            status: "downloading".into(),
            seeders: 3,
            leechers: 7,
            downloaded: 262_144,
            uploaded: 65_536,
            ratio: 0.25,
            magnet_uri: None,
            metainfo: None,
            files: vec!["demo/payload.bin".into()],
        }
    }

    #[test]
    fn timestamps_serialise_with_millisecond_precision() -> anyhow::Result<()> {
        let record = sample_record();
        let json = serde_json::to_value(&record)?;
        let date_added = json["date_added"].as_str().expect("string timestamp");
        // e.g. 2026-08-01T12:34:56.789Z
        assert!(date_added.ends_with('Z'));
        assert_eq!(date_added.split('.').nth(1).map(str::len), Some(4));
        Ok(())
    }

    #[test]
    fn record_round_trips_through_json() -> anyhow::Result<()> {
        let mut record = sample_record();
        record.metainfo = Some(encode_metainfo_blob(b"d4:name4:demoe"));
        let json = serde_json::to_string(&record)?;
        let back: TorrentRecord = serde_json::from_str(&json)?;
        assert_eq!(back.info_hash, record.info_hash);
        assert_eq!(back.metainfo, record.metainfo);
        assert_eq!(
            back.date_added.timestamp_millis(),
            record.date_added.timestamp_millis()
        );
        Ok(())
    }

    #[test]
    fn patch_applies_only_populated_fields() {
        let mut record = sample_record();
        RecordPatch {
            progress: Some(1.0),
            status: Some("seeding".into()),
            uploaded: Some(2_097_152),
            ratio: Some(2.0),
            ..RecordPatch::default()
        }
        .apply(&mut record);

        assert!((record.progress - 1.0).abs() < f64::EPSILON);
        assert_eq!(record.status, "seeding");
        assert_eq!(record.uploaded, 2_097_152);
        assert_eq!(record.name, "demo");
        assert_eq!(record.downloaded, 262_144);
    }

    #[test]
    fn metainfo_blob_round_trips() -> anyhow::Result<()> {
        let blob = b"d4:info4:datae".to_vec();
        let encoded = encode_metainfo_blob(&blob);
        assert_eq!(decode_metainfo_blob(&encoded)?, blob);
        assert!(decode_metainfo_blob("not//valid**base64").is_err());
        Ok(())
    }

    #[test]
    fn paused_flag_follows_status_string() {
        let mut record = sample_record();
        assert!(!record.is_paused());
        record.status = "paused".into();
        assert!(record.is_paused());
    }
}
