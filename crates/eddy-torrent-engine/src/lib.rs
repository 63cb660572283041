#![deny(
    unsafe_code,
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
#![allow(clippy::unused_async)]
#![allow(unexpected_cfgs)]

//! Torrent engine core: session runtime, registry, and the alert-driven
//! event pump over an exchangeable peer-protocol backend.
//!
//! Layout: `session/` (backend traits + stub), `engine.rs` (public façade),
//! `registry.rs` (infohash-keyed entry map), `pump.rs` (alert pump + stats
//! aggregator), `alert.rs` (sealed alert contract), `convert.rs` (boundary
//! conversions), `diskspace.rs` (admission free-space probe).

/// Sealed alert contract between session and pump.
pub mod alert;
mod convert;
mod diskspace;
/// Public engine façade.
pub mod engine;
mod pump;
mod registry;
/// Session backend traits and the in-memory stub.
pub mod session;

pub use alert::{Alert, StatsCounters};
pub use engine::TorrentEngine;
pub use session::{
    AddParams, AddSource, HandleFile, HandleStatus, ProtocolHandle, ProtocolSession, SettingsPack,
    StubSession, TorrentHandle,
};
