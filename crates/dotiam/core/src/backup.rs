// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Backup and restore
//!
//! A reader-writer gate serializes restores against everything else: reads,
//! checks, repository writes and backups share the read side, a restore
//! takes the write side for its full duration.

use crate::error::{IamError, IamResult};
use dotiam_store::{ImportMode, Store};
use metrics::counter;
use parking_lot::{RwLock, RwLockReadGuard};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

/// Versioned backup/restore over a store
pub struct BackupManager {
    store: Arc<dyn Store>,
    gate: RwLock<()>,
    healthy: AtomicBool,
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager").field("version", &self.store.version()).field("healthy", &self.is_healthy()).finish()
    }
}

impl BackupManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            gate: RwLock::new(()),
            healthy: AtomicBool::new(true),
        }
    }

    /// Shared side of the restore gate
    pub fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        // Recursive so nested shared sections never queue behind a waiting restore
        self.gate.read_recursive()
    }

    /// Current store version
    pub fn version(&self) -> u64 {
        self.store.version()
    }

    /// False after a non-transactional restore failed, until a full restore succeeds
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Export every record written after `since`, returning the version at export start
    pub fn backup(&self, writer: &mut dyn Write, since: u64) -> IamResult<u64> {
        let _gate = self.read_guard();
        let summary = self.store.export_since(since, writer).map_err(|e| IamError::Backup {
            operation: "backup".to_string(),
            message: e.to_string(),
        })?;

        counter!("dotiam_backups_total", 1);
        info!(since, version = summary.version, records = summary.records, "Backup written");
        Ok(summary.version)
    }

    /// Import an export stream, returning the version afterwards
    ///
    /// Replicas preserve the master's record versions. The master restamps
    /// imported records so the next incremental export carries them.
    pub fn restore(&self, reader: &mut dyn Read, mode: ImportMode) -> IamResult<u64> {
        let _gate = self.gate.write();

        match self.store.import(reader, mode) {
            Ok(summary) => {
                // An incremental stream cannot repair a partially applied import
                if summary.since == 0 {
                    self.healthy.store(true, Ordering::Release);
                }
                counter!("dotiam_restores_total", 1);
                info!(since = summary.since, version = summary.version, records = summary.records, healthy = self.is_healthy(), "Restore applied");
                Ok(summary.version)
            }
            Err(e) => {
                counter!("dotiam_restore_failures_total", 1);
                if !self.store.transactional_import() {
                    self.healthy.store(false, Ordering::Release);
                    error!(error = %e, "Restore failed on a non-transactional store, marking unhealthy");
                } else {
                    error!(error = %e, "Restore failed, store left unchanged");
                }
                Err(IamError::Backup {
                    operation: "restore".to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Stores with non-transactional imports, for exercising the unhealthy path
#[cfg(test)]
pub(crate) mod test_support {
    use dotiam_store::{ExportSummary, ImportMode, ImportSummary, MemoryStore, ReadTxn, Store, StoreResult, WriteTxn};
    use std::io::{Read, Write};

    /// Wraps a memory store but claims its imports are not atomic
    #[derive(Debug, Default)]
    pub struct LossyStore(pub MemoryStore);

    impl Store for LossyStore {
        fn version(&self) -> u64 {
            self.0.version()
        }
        fn begin_read(&self) -> Box<dyn ReadTxn + '_> {
            self.0.begin_read()
        }
        fn begin_write(&self) -> Box<dyn WriteTxn + '_> {
            self.0.begin_write()
        }
        fn export_since(&self, since: u64, writer: &mut dyn Write) -> StoreResult<ExportSummary> {
            self.0.export_since(since, writer)
        }
        fn import(&self, reader: &mut dyn Read, mode: ImportMode) -> StoreResult<ImportSummary> {
            self.0.import(reader, mode)
        }
        fn transactional_import(&self) -> bool {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::LossyStore;
    use super::*;
    use dotiam_store::{MemoryStore, StoreError};

    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let mut txn = store.begin_write();
        txn.put("roles", "r1", b"x".to_vec(), vec![]).unwrap();
        txn.commit().unwrap();
        store
    }

    fn put(store: &MemoryStore, key: &str) {
        let mut txn = store.begin_write();
        txn.put("roles", key, key.as_bytes().to_vec(), vec![]).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn test_backup_restore_roundtrip() {
        let source = BackupManager::new(seeded());
        let mut buf = Vec::new();
        assert_eq!(source.backup(&mut buf, 0).unwrap(), 1);

        let target = BackupManager::new(Arc::new(MemoryStore::new()));
        assert_eq!(target.restore(&mut buf.as_slice(), ImportMode::Preserve).unwrap(), 1);
        assert_eq!(target.version(), 1);
        assert!(target.is_healthy());
    }

    #[test]
    fn test_restamped_restore_advances_version() {
        let mut buf = Vec::new();
        BackupManager::new(seeded()).backup(&mut buf, 0).unwrap();

        let store = Arc::new(MemoryStore::new());
        put(&store, "a");
        put(&store, "b");
        let target = BackupManager::new(store);
        assert_eq!(target.restore(&mut buf.as_slice(), ImportMode::Restamp).unwrap(), 3);
    }

    #[test]
    fn test_failed_restore_is_wrapped() {
        let target = BackupManager::new(seeded());
        let err = target.restore(&mut &b"garbage!"[..], ImportMode::Restamp).unwrap_err();
        assert!(matches!(err, IamError::Backup { ref operation, .. } if operation == "restore"));
        assert!(target.is_healthy());
        assert_eq!(target.version(), 1);
    }

    #[test]
    fn test_non_transactional_failure_marks_unhealthy() {
        let manager = BackupManager::new(Arc::new(LossyStore::default()));
        assert!(manager.restore(&mut &b"garbage!"[..], ImportMode::Preserve).is_err());
        assert!(!manager.is_healthy());

        let mut buf = Vec::new();
        BackupManager::new(seeded()).backup(&mut buf, 0).unwrap();
        manager.restore(&mut buf.as_slice(), ImportMode::Preserve).unwrap();
        assert!(manager.is_healthy());
    }

    #[test]
    fn test_incremental_restore_keeps_unhealthy_flag() {
        let source = seeded();
        put(&source, "r2");
        let source = BackupManager::new(source);

        let manager = BackupManager::new(Arc::new(LossyStore::default()));
        assert!(manager.restore(&mut &b"garbage!"[..], ImportMode::Preserve).is_err());

        let mut delta = Vec::new();
        source.backup(&mut delta, 1).unwrap();
        manager.restore(&mut delta.as_slice(), ImportMode::Preserve).unwrap();
        assert!(!manager.is_healthy());

        let mut full = Vec::new();
        source.backup(&mut full, 0).unwrap();
        manager.restore(&mut full.as_slice(), ImportMode::Preserve).unwrap();
        assert!(manager.is_healthy());
    }

    #[test]
    fn test_store_errors_are_not_swallowed() {
        let err: IamError = StoreError::Corrupt { message: "x".into() }.into();
        assert!(matches!(err, IamError::Storage { .. }));
    }
}
