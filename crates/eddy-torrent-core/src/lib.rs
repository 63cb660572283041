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

//! Engine-agnostic torrent domain types shared across the workspace:
//! identifier handling, metainfo parsing and creation, settings, status and
//! record DTOs, the closed error taxonomy, and the persistence seam.

/// Metainfo creation from local payloads.
pub mod builder;
/// Closed error taxonomy.
pub mod error;
/// Save-path preparation and name sanitising.
pub mod fsops;
/// Persistence gateway contract.
pub mod gateway;
/// Infohash value type.
pub mod hash;
/// Magnet URI handling.
pub mod magnet;
/// BEP-3 metainfo parsing.
pub mod metainfo;
/// Persisted records and patches.
pub mod record;
/// Session and per-torrent configuration.
pub mod settings;
/// Cached status views and session statistics.
pub mod status;

pub use builder::TorrentBuilder;
pub use error::{Result, TorrentError, TorrentErrorKind};
pub use fsops::{safe_directory_name, sanitize_save_path};
pub use gateway::PersistenceGateway;
pub use hash::InfoHash;
pub use magnet::MagnetLink;
pub use metainfo::{Metainfo, MetainfoFile};
pub use record::{RecordPatch, TorrentRecord, decode_metainfo_blob, encode_metainfo_blob};
pub use settings::TorrentSettings;
pub use status::{FileStatus, SessionStats, TorrentState, TorrentStatus};
