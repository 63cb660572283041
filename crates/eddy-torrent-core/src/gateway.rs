//! Persistence seam between the core and an external record store.

use async_trait::async_trait;

use crate::error::Result;
use crate::hash::InfoHash;
use crate::record::{RecordPatch, TorrentRecord};

/// Record-level CRUD contract the core persists through.
///
/// This is the only path by which the core writes durable state. Failures
/// from an implementation are logged as warnings by the caller and never
/// block in-memory operations; the registry stays authoritative for the
/// running session.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Persist a new record. Idempotent by infohash: a duplicate returns an
    /// error without mutating the stored record.
    async fn add_record(&self, record: &TorrentRecord) -> Result<()>;

    /// Apply a partial update to an existing record.
    async fn update_record(&self, info_hash: &InfoHash, patch: RecordPatch) -> Result<()>;

    /// Fetch a record, `None` when absent.
    async fn get_record(&self, info_hash: &InfoHash) -> Result<Option<TorrentRecord>>;

    /// List every persisted record; used on startup to reconstruct.
    async fn list_records(&self) -> Result<Vec<TorrentRecord>>;

    /// Delete a record. Absence is not an error.
    async fn remove_record(&self, info_hash: &InfoHash) -> Result<()>;

    /// Persist the opaque engine session-state blob.
    async fn write_session_blob(&self, blob: &[u8]) -> Result<()>;

    /// Read the opaque engine session-state blob, `None` when absent.
    async fn read_session_blob(&self) -> Result<Option<Vec<u8>>>;
}
