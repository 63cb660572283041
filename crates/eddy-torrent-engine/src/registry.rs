//! Thread-safe map from infohash to live handle and cached status.
//!
//! Single-writer / many-readers discipline: the alert pump, the stats
//! aggregator and mutating API calls take the write lock; UI-style queries
//! take the read lock for no longer than the lookup itself. Adds accepted by
//! the engine but not yet materialised by an `Added` alert live in the
//! pending map; uniqueness spans both maps.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use eddy_torrent_core::{InfoHash, Result, TorrentError, TorrentStatus};

use crate::session::TorrentHandle;

/// Reconstruction context for an add the engine has accepted but the alert
/// pump has not yet materialised.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingAdd {
    /// Magnet URI the add came from, for persistence.
    pub(crate) magnet_uri: Option<String>,
    /// Display-name hint (magnet `dn`).
    pub(crate) name_hint: Option<String>,
    /// Original metainfo bytes the add was created from.
    pub(crate) metainfo_blob: Option<Vec<u8>>,
}

/// Live registry entry.
pub(crate) struct TorrentEntry {
    /// Handle into the session.
    pub(crate) handle: TorrentHandle,
    /// Cached status view.
    pub(crate) status: TorrentStatus,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<InfoHash, TorrentEntry>,
    pending: HashMap<InfoHash, PendingAdd>,
}

/// Concurrent infohash-keyed torrent map.
#[derive(Default)]
pub(crate) struct TorrentRegistry {
    inner: RwLock<RegistryInner>,
}

impl TorrentRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Reserve an infohash for an in-flight add.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::DuplicateTorrent`] when a live or pending
    /// entry already claims the hash.
    pub(crate) fn register_pending(&self, info_hash: InfoHash, pending: PendingAdd) -> Result<()> {
        let mut inner = self.write();
        if inner.entries.contains_key(&info_hash) || inner.pending.contains_key(&info_hash) {
            return Err(TorrentError::DuplicateTorrent);
        }
        inner.pending.insert(info_hash, pending);
        Ok(())
    }

    /// Drop a reservation after a failed dispatch.
    pub(crate) fn abort_pending(&self, info_hash: &InfoHash) {
        self.write().pending.remove(info_hash);
    }

    /// Claim the reservation when the `Added` alert materialises the entry.
    pub(crate) fn take_pending(&self, info_hash: &InfoHash) -> Option<PendingAdd> {
        self.write().pending.remove(info_hash)
    }

    /// Insert a live entry. Exactly one entry per infohash at all times.
    pub(crate) fn insert(&self, info_hash: InfoHash, handle: TorrentHandle, status: TorrentStatus) {
        self.write()
            .entries
            .insert(info_hash, TorrentEntry { handle, status });
    }

    /// Erase a live entry, returning it when present.
    pub(crate) fn remove_entry(&self, info_hash: &InfoHash) -> Option<TorrentEntry> {
        self.write().entries.remove(info_hash)
    }

    /// Handle of a live entry.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::TorrentNotFound`] for unknown or not yet
    /// materialised infohashes.
    pub(crate) fn handle_of(&self, info_hash: &InfoHash) -> Result<TorrentHandle> {
        self.read()
            .entries
            .get(info_hash)
            .map(|entry| TorrentHandle::clone(&entry.handle))
            .ok_or(TorrentError::TorrentNotFound)
    }

    /// Whether a live entry exists.
    pub(crate) fn has(&self, info_hash: &InfoHash) -> bool {
        self.read().entries.contains_key(info_hash)
    }

    /// Cached status of a live entry.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::TorrentNotFound`] for unknown infohashes.
    pub(crate) fn status_of(&self, info_hash: &InfoHash) -> Result<TorrentStatus> {
        self.read()
            .entries
            .get(info_hash)
            .map(|entry| entry.status.clone())
            .ok_or(TorrentError::TorrentNotFound)
    }

    /// Snapshot every cached status.
    pub(crate) fn list_statuses(&self) -> Vec<TorrentStatus> {
        self.read()
            .entries
            .values()
            .map(|entry| entry.status.clone())
            .collect()
    }

    /// Snapshot every live infohash.
    pub(crate) fn list_info_hashes(&self) -> Vec<InfoHash> {
        self.read().entries.keys().copied().collect()
    }

    /// Snapshot `(infohash, handle)` pairs for the stats refresh.
    pub(crate) fn entries_snapshot(&self) -> Vec<(InfoHash, TorrentHandle)> {
        self.read()
            .entries
            .iter()
            .map(|(info_hash, entry)| (*info_hash, TorrentHandle::clone(&entry.handle)))
            .collect()
    }

    /// Mutate a cached status in place, returning the updated copy.
    pub(crate) fn update_status(
        &self,
        info_hash: &InfoHash,
        mutate: impl FnOnce(&mut TorrentStatus),
    ) -> Option<TorrentStatus> {
        let mut inner = self.write();
        let entry = inner.entries.get_mut(info_hash)?;
        mutate(&mut entry.status);
        Some(entry.status.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{HandleStatus, ProtocolHandle};
    use eddy_torrent_core::TorrentState;
    use std::path::Path;
    use std::sync::Arc;

    struct FixedHandle(InfoHash);

    impl ProtocolHandle for FixedHandle {
        fn info_hash(&self) -> InfoHash {
            self.0
        }

        fn status(&self) -> Result<HandleStatus> {
            Err(TorrentError::TorrentNotFound)
        }

        fn pause(&self) -> Result<()> {
            Ok(())
        }

        fn resume(&self) -> Result<()> {
            Ok(())
        }

        fn force_recheck(&self) -> Result<()> {
            Ok(())
        }

        fn move_storage(&self, _new_path: &Path) -> Result<()> {
            Ok(())
        }

        fn prioritize_files(&self, _priorities: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    fn hash(index: u8) -> InfoHash {
        let mut bytes = [0_u8; 20];
        bytes[0] = index;
        InfoHash::from_bytes(bytes)
    }

    fn entry(registry: &TorrentRegistry, index: u8) -> InfoHash {
        let info_hash = hash(index);
        registry
            .register_pending(info_hash, PendingAdd::default())
            .expect("fresh hash");
        registry.take_pending(&info_hash);
        registry.insert(
            info_hash,
            Arc::new(FixedHandle(info_hash)),
            TorrentStatus::new(info_hash, format!("t{index}"), "/tmp".into()),
        );
        info_hash
    }

    #[test]
    fn pending_blocks_duplicate_registration() {
        let registry = TorrentRegistry::new();
        let info_hash = hash(1);
        registry
            .register_pending(info_hash, PendingAdd::default())
            .expect("first registration");
        assert_eq!(
            registry.register_pending(info_hash, PendingAdd::default()),
            Err(TorrentError::DuplicateTorrent)
        );
        assert!(!registry.has(&info_hash), "pending entries are not live");
    }

    #[test]
    fn live_entry_blocks_new_pending() {
        let registry = TorrentRegistry::new();
        let info_hash = entry(&registry, 1);
        assert_eq!(
            registry.register_pending(info_hash, PendingAdd::default()),
            Err(TorrentError::DuplicateTorrent)
        );
    }

    #[test]
    fn list_sizes_agree() {
        let registry = TorrentRegistry::new();
        for index in 1..=3 {
            let _ = entry(&registry, index);
        }
        assert_eq!(
            registry.list_statuses().len(),
            registry.list_info_hashes().len()
        );
        assert_eq!(registry.list_info_hashes().len(), 3);
    }

    #[test]
    fn update_status_returns_updated_copy() {
        let registry = TorrentRegistry::new();
        let info_hash = entry(&registry, 1);
        let updated = registry
            .update_status(&info_hash, |status| {
                status.state = TorrentState::Downloading;
            })
            .expect("entry exists");
        assert_eq!(updated.state, TorrentState::Downloading);
        assert!(
            registry
                .update_status(&hash(9), |_| unreachable!("must not run"))
                .is_none()
        );
    }

    #[test]
    fn removed_entries_are_gone() {
        let registry = TorrentRegistry::new();
        let info_hash = entry(&registry, 1);
        assert!(registry.remove_entry(&info_hash).is_some());
        assert!(!registry.has(&info_hash));
        assert_eq!(
            registry.status_of(&info_hash),
            Err(TorrentError::TorrentNotFound)
        );
        assert_eq!(
            registry.handle_of(&info_hash).err(),
            Some(TorrentError::TorrentNotFound)
        );
    }
}
