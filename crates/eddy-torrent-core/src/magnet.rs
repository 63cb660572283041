//! Magnet URI validation and field capture.

use url::Url;

use crate::error::{Result, TorrentError};
use crate::hash::InfoHash;

const MAGNET_PREFIX: &str = "magnet:?";
const BTIH_URN_PREFIX: &str = "urn:btih:";

/// Parsed view of a magnet URI.
///
/// Only the parameters the core acts on are lifted out (`xt`, `dn`, `tr`);
/// everything else is preserved untouched in the raw URI, which is also the
/// form persisted for restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    info_hash: InfoHash,
    display_name: Option<String>,
    trackers: Vec<String>,
    uri: String,
}

impl MagnetLink {
    /// Parse and validate a magnet URI.
    ///
    /// The URI must begin with `magnet:?` and carry an `xt=urn:btih:` value of
    /// exactly 40 hex characters (either case). `dn` and repeated `tr`
    /// parameters are captured when present.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::InvalidMagnetLink`] when the shape check fails.
    pub fn parse(uri: &str) -> Result<Self> {
        if !uri.starts_with(MAGNET_PREFIX) {
            return Err(TorrentError::InvalidMagnetLink);
        }
        let url = Url::parse(uri).map_err(|_| TorrentError::InvalidMagnetLink)?;

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    let Some(digest) = value.strip_prefix(BTIH_URN_PREFIX) else {
                        continue;
                    };
                    if digest.len() == 40 && digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                        info_hash = digest
                            .to_ascii_lowercase()
                            .parse::<InfoHash>()
                            .ok()
                            .or(info_hash);
                    }
                }
                "dn" => {
                    if !value.is_empty() {
                        display_name = Some(value.into_owned());
                    }
                }
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }

        let info_hash = info_hash.ok_or(TorrentError::InvalidMagnetLink)?;
        Ok(Self {
            info_hash,
            display_name,
            trackers,
            uri: uri.to_owned(),
        })
    }

    /// Shape-check a magnet URI without keeping the parsed form.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::InvalidMagnetLink`] when validation fails.
    pub fn validate(uri: &str) -> Result<()> {
        Self::parse(uri).map(drop)
    }

    /// Infohash extracted from the `xt` parameter, lowercase-normalised.
    #[must_use]
    pub const fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Display name from the `dn` parameter, form-decoded.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Tracker URLs from repeated `tr` parameters, in order of appearance.
    #[must_use]
    pub fn trackers(&self) -> &[String] {
        &self.trackers
    }

    /// The raw URI as supplied by the caller.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }
}
