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

//! In-memory store engine
//!
//! State lives behind an `Arc` that readers clone as their snapshot; commits
//! copy-on-write the state under the write lock. Write transactions hold the
//! writer mutex for their whole lifetime, so at most one is open at a time.

use crate::error::{StoreError, StoreResult};
use crate::export::{self, ExportHeader, ExportRecord};
use crate::record::{IndexEntry, Record};
use crate::store::{ExportSummary, ImportMode, ImportSummary, ReadTxn, Store, WriteTxn};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, info};

type Table = BTreeMap<String, Record>;

/// Index storage: (table, index) -> value -> keys
type IndexMap = HashMap<(String, String), BTreeMap<String, BTreeSet<String>>>;

#[derive(Debug, Clone, Default)]
struct StoreState {
    tables: BTreeMap<String, Table>,
    indexes: IndexMap,
    version: u64,
}

impl StoreState {
    fn record(&self, table: &str, key: &str) -> Option<&Record> {
        self.tables.get(table).and_then(|t| t.get(key))
    }

    fn live_value(&self, table: &str, key: &str) -> Option<Vec<u8>> {
        self.record(table, key).filter(|r| r.is_live()).map(|r| r.value.clone())
    }

    fn index_keys(&self, table: &str, index: &str, value: &str) -> BTreeSet<String> {
        self.indexes
            .get(&(table.to_string(), index.to_string()))
            .and_then(|values| values.get(value))
            .cloned()
            .unwrap_or_default()
    }

    /// Replace a record and keep the indexes consistent with it
    fn apply(&mut self, table: &str, key: &str, record: Record) {
        if let Some(previous) = self.record(table, key).cloned() {
            for entry in &previous.indexes {
                let id = (table.to_string(), entry.index.clone());
                if let Some(values) = self.indexes.get_mut(&id) {
                    if let Some(keys) = values.get_mut(&entry.value) {
                        keys.remove(key);
                        if keys.is_empty() {
                            values.remove(&entry.value);
                        }
                    }
                }
            }
        }

        if record.is_live() {
            for entry in &record.indexes {
                self.indexes
                    .entry((table.to_string(), entry.index.clone()))
                    .or_default()
                    .entry(entry.value.clone())
                    .or_default()
                    .insert(key.to_string());
            }
        }

        self.tables.entry(table.to_string()).or_default().insert(key.to_string(), record);
    }
}

/// In-memory versioned store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Arc<StoreState>>,
    writer: Mutex<()>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<StoreState> {
        self.state.read().clone()
    }

    /// Number of live records in a table
    pub fn len(&self, table: &str) -> usize {
        self.snapshot().tables.get(table).map(|t| t.values().filter(|r| r.is_live()).count()).unwrap_or(0)
    }

    /// Number of tombstones in a table
    pub fn tombstones(&self, table: &str) -> usize {
        self.snapshot().tables.get(table).map(|t| t.values().filter(|r| !r.is_live()).count()).unwrap_or(0)
    }
}

fn validate(table: &str, key: &str) -> StoreResult<()> {
    if table.is_empty() || key.is_empty() {
        return Err(StoreError::InvalidKey {
            message: format!("empty table or key ({:?}/{:?})", table, key),
        });
    }
    Ok(())
}

/// Read transaction over an immutable snapshot
struct MemoryReadTxn {
    snapshot: Arc<StoreState>,
}

impl ReadTxn for MemoryReadTxn {
    fn get(&self, table: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.snapshot.live_value(table, key))
    }

    fn scan(&self, table: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .snapshot
            .tables
            .get(table)
            .map(|t| t.iter().filter(|(_, r)| r.is_live()).map(|(k, r)| (k.clone(), r.value.clone())).collect())
            .unwrap_or_default())
    }

    fn find_by_index(&self, table: &str, index: &str, value: &str) -> StoreResult<Vec<String>> {
        Ok(self.snapshot.index_keys(table, index, value).into_iter().collect())
    }
}

/// Staged write operation
#[derive(Debug, Clone)]
enum Staged {
    Put { value: Vec<u8>, indexes: Vec<IndexEntry> },
    Delete,
}

/// Write transaction staging changes over a snapshot
struct MemoryWriteTxn<'a> {
    store: &'a MemoryStore,
    _writer: MutexGuard<'a, ()>,
    base: Arc<StoreState>,
    staged: BTreeMap<(String, String), Staged>,
}

impl MemoryWriteTxn<'_> {
    fn staged(&self, table: &str, key: &str) -> Option<&Staged> {
        self.staged.get(&(table.to_string(), key.to_string()))
    }

    fn staged_for_table<'s>(&'s self, table: &'s str) -> impl Iterator<Item = (&'s String, &'s Staged)> + 's {
        self.staged.iter().filter(move |((t, _), _)| t == table).map(|((_, k), s)| (k, s))
    }
}

impl ReadTxn for MemoryWriteTxn<'_> {
    fn get(&self, table: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.staged(table, key) {
            Some(Staged::Put { value, .. }) => Ok(Some(value.clone())),
            Some(Staged::Delete) => Ok(None),
            None => Ok(self.base.live_value(table, key)),
        }
    }

    fn scan(&self, table: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let mut merged: BTreeMap<String, Vec<u8>> = self
            .base
            .tables
            .get(table)
            .map(|t| t.iter().filter(|(_, r)| r.is_live()).map(|(k, r)| (k.clone(), r.value.clone())).collect())
            .unwrap_or_default();

        for (key, staged) in self.staged_for_table(table) {
            match staged {
                Staged::Put { value, .. } => {
                    merged.insert(key.clone(), value.clone());
                }
                Staged::Delete => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_iter().collect())
    }

    fn find_by_index(&self, table: &str, index: &str, value: &str) -> StoreResult<Vec<String>> {
        let mut keys = self.base.index_keys(table, index, value);

        for (key, staged) in self.staged_for_table(table) {
            keys.remove(key);
            if let Staged::Put { indexes, .. } = staged {
                if indexes.iter().any(|e| e.index == index && e.value == value) {
                    keys.insert(key.clone());
                }
            }
        }

        Ok(keys.into_iter().collect())
    }
}

impl WriteTxn for MemoryWriteTxn<'_> {
    fn put(&mut self, table: &str, key: &str, value: Vec<u8>, indexes: Vec<IndexEntry>) -> StoreResult<()> {
        validate(table, key)?;
        self.staged.insert((table.to_string(), key.to_string()), Staged::Put { value, indexes });
        Ok(())
    }

    fn delete(&mut self, table: &str, key: &str) -> StoreResult<bool> {
        validate(table, key)?;
        let existed = self.get(table, key)?.is_some();
        if existed {
            self.staged.insert((table.to_string(), key.to_string()), Staged::Delete);
        }
        Ok(existed)
    }

    fn commit(self: Box<Self>) -> StoreResult<u64> {
        let txn = *self;
        if txn.staged.is_empty() {
            return Ok(txn.base.version);
        }

        let mut guard = txn.store.state.write();
        let state = Arc::make_mut(&mut *guard);
        let version = state.version + 1;

        for ((table, key), staged) in &txn.staged {
            match staged {
                Staged::Put { value, indexes } => {
                    let mut indexes = indexes.clone();
                    indexes.sort();
                    indexes.dedup();
                    state.apply(table, key, Record::live(value.clone(), version, indexes));
                }
                Staged::Delete => {
                    if state.record(table, key).is_some_and(|r| r.is_live()) {
                        state.apply(table, key, Record::tombstone(version));
                    }
                }
            }
        }

        state.version = version;
        debug!(version, writes = txn.staged.len(), "Committed write transaction");
        Ok(version)
    }
}

impl Store for MemoryStore {
    fn version(&self) -> u64 {
        self.state.read().version
    }

    fn begin_read(&self) -> Box<dyn ReadTxn + '_> {
        Box::new(MemoryReadTxn { snapshot: self.snapshot() })
    }

    fn begin_write(&self) -> Box<dyn WriteTxn + '_> {
        let writer = self.writer.lock();
        // Snapshot after taking the writer lock so no commit can slip in between
        let base = self.snapshot();
        Box::new(MemoryWriteTxn {
            store: self,
            _writer: writer,
            base,
            staged: BTreeMap::new(),
        })
    }

    fn export_since(&self, since: u64, writer: &mut dyn Write) -> StoreResult<ExportSummary> {
        let snapshot = self.snapshot();

        let records: Vec<ExportRecord> = snapshot
            .tables
            .iter()
            .flat_map(|(table, rows)| {
                rows.iter().filter(|(_, r)| r.version > since).map(move |(key, record)| ExportRecord {
                    table: table.clone(),
                    key: key.clone(),
                    record: record.clone(),
                })
            })
            .collect();

        let header = ExportHeader {
            since,
            version: snapshot.version,
            count: records.len() as u64,
        };
        export::write_stream(writer, &header, &records)?;

        debug!(since, version = snapshot.version, records = records.len(), "Exported store");
        Ok(ExportSummary {
            version: snapshot.version,
            records: header.count,
        })
    }

    fn import(&self, reader: &mut dyn Read, mode: ImportMode) -> StoreResult<ImportSummary> {
        // Decode the full stream first; a corrupt stream never reaches the state
        let (header, records) = export::read_stream(reader)?;
        for record in &records {
            validate(&record.table, &record.key)?;
        }

        let _writer = self.writer.lock();
        let mut guard = self.state.write();
        let state = Arc::make_mut(&mut *guard);

        let mut applied = 0u64;
        match mode {
            ImportMode::Preserve => {
                let mut max_version = state.version.max(header.version);
                for ExportRecord { table, key, record } in records {
                    if state.record(&table, &key).is_some_and(|existing| existing.version > record.version) {
                        continue;
                    }
                    max_version = max_version.max(record.version);
                    state.apply(&table, &key, record);
                    applied += 1;
                }
                state.version = max_version;
            }
            ImportMode::Restamp => {
                let version = state.version + 1;
                for ExportRecord { table, key, mut record } in records {
                    record.version = version;
                    state.apply(&table, &key, record);
                    applied += 1;
                }
                if applied > 0 {
                    state.version = version;
                }
            }
        }

        info!(since = header.since, ?mode, version = state.version, records = applied, "Imported export stream");
        Ok(ImportSummary {
            since: header.since,
            version: state.version,
            records: applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(store: &MemoryStore, table: &str, key: &str, value: &str, indexes: Vec<IndexEntry>) -> u64 {
        let mut txn = store.begin_write();
        txn.put(table, key, value.as_bytes().to_vec(), indexes).unwrap();
        txn.commit().unwrap()
    }

    #[test]
    fn test_versions_increase_per_commit() {
        let store = MemoryStore::new();
        assert_eq!(store.version(), 0);

        assert_eq!(put(&store, "roles", "a", "1", vec![]), 1);
        assert_eq!(put(&store, "roles", "b", "2", vec![]), 2);
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn test_empty_commit_keeps_version() {
        let store = MemoryStore::new();
        put(&store, "roles", "a", "1", vec![]);

        let txn = store.begin_write();
        assert_eq!(txn.commit().unwrap(), 1);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_uncommitted_writes_invisible() {
        let store = MemoryStore::new();
        {
            let mut txn = store.begin_write();
            txn.put("roles", "a", b"1".to_vec(), vec![]).unwrap();
            assert_eq!(txn.get("roles", "a").unwrap(), Some(b"1".to_vec()));
        }

        let read = store.begin_read();
        assert_eq!(read.get("roles", "a").unwrap(), None);
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_index_follows_updates() {
        let store = MemoryStore::new();
        put(&store, "roles", "r1", "x", vec![IndexEntry::new("name", "admin")]);
        put(&store, "roles", "r1", "y", vec![IndexEntry::new("name", "viewer")]);

        let read = store.begin_read();
        assert!(read.find_by_index("roles", "name", "admin").unwrap().is_empty());
        assert_eq!(read.find_by_index("roles", "name", "viewer").unwrap(), vec!["r1".to_string()]);
    }

    #[test]
    fn test_staged_index_view() {
        let store = MemoryStore::new();
        put(&store, "users", "u1", "x", vec![IndexEntry::new("alias", "a@x")]);

        let mut txn = store.begin_write();
        txn.delete("users", "u1").unwrap();
        txn.put("users", "u2", b"y".to_vec(), vec![IndexEntry::new("alias", "a@x")]).unwrap();
        assert_eq!(txn.find_by_index("users", "alias", "a@x").unwrap(), vec!["u2".to_string()]);
    }

    #[test]
    fn test_delete_leaves_tombstone() {
        let store = MemoryStore::new();
        put(&store, "roles", "a", "1", vec![]);

        let mut txn = store.begin_write();
        assert!(txn.delete("roles", "a").unwrap());
        assert!(!txn.delete("roles", "missing").unwrap());
        assert_eq!(txn.commit().unwrap(), 2);

        assert_eq!(store.len("roles"), 0);
        assert_eq!(store.tombstones("roles"), 1);
        assert!(store.begin_read().scan("roles").unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_isolation() {
        let store = MemoryStore::new();
        put(&store, "roles", "a", "1", vec![]);

        let read = store.begin_read();
        put(&store, "roles", "a", "2", vec![]);

        assert_eq!(read.get("roles", "a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.begin_read().get("roles", "a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_empty_key_rejected() {
        let store = MemoryStore::new();
        let mut txn = store.begin_write();
        assert!(matches!(txn.put("roles", "", vec![], vec![]), Err(StoreError::InvalidKey { .. })));
    }
}
