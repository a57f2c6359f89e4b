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

//! Export/import behaviour of the in-memory engine

use dotiam_store::{ImportMode, IndexEntry, MemoryStore, Store, StoreError};
use proptest::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter};

fn seed(store: &MemoryStore) {
    let mut txn = store.begin_write();
    txn.put("roles", "r1", b"admin".to_vec(), vec![IndexEntry::new("name", "admin")]).unwrap();
    txn.put("roles", "r2", b"viewer".to_vec(), vec![IndexEntry::new("name", "viewer")]).unwrap();
    txn.commit().unwrap();

    let mut txn = store.begin_write();
    txn.put("users", "u1", b"ada".to_vec(), vec![IndexEntry::new("alias", "ada@example.com"), IndexEntry::new("alias", "ada")]).unwrap();
    txn.commit().unwrap();

    let mut txn = store.begin_write();
    txn.delete("roles", "r2").unwrap();
    txn.commit().unwrap();
}

#[test]
fn test_full_export_roundtrip_through_file() {
    let source = MemoryStore::new();
    seed(&source);
    assert_eq!(source.version(), 3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backup.bin");

    let summary = {
        let mut writer = BufWriter::new(File::create(&path).unwrap());
        source.export_since(0, &mut writer).unwrap()
    };
    assert_eq!(summary.version, 3);
    assert_eq!(summary.records, 3);

    let target = MemoryStore::new();
    let mut reader = BufReader::new(File::open(&path).unwrap());
    let imported = target.import(&mut reader, ImportMode::Preserve).unwrap();
    assert_eq!(imported.version, 3);
    assert_eq!(imported.since, 0);
    assert_eq!(target.version(), 3);

    let read = target.begin_read();
    assert_eq!(read.get("roles", "r1").unwrap(), Some(b"admin".to_vec()));
    assert_eq!(read.get("roles", "r2").unwrap(), None);
    assert_eq!(read.find_by_index("users", "alias", "ada").unwrap(), vec!["u1".to_string()]);
    assert_eq!(read.find_by_index("users", "alias", "ada@example.com").unwrap(), vec!["u1".to_string()]);
    assert!(read.find_by_index("roles", "name", "viewer").unwrap().is_empty());
    assert_eq!(target.tombstones("roles"), 1);
}

#[test]
fn test_incremental_export_carries_deletes() {
    let source = MemoryStore::new();
    seed(&source);

    let target = MemoryStore::new();
    let mut buf = Vec::new();
    source.export_since(0, &mut buf).unwrap();
    target.import(&mut buf.as_slice(), ImportMode::Preserve).unwrap();

    let mut txn = source.begin_write();
    txn.delete("users", "u1").unwrap();
    txn.put("roles", "r3", b"ops".to_vec(), vec![]).unwrap();
    txn.commit().unwrap();

    let mut delta = Vec::new();
    let summary = source.export_since(target.version(), &mut delta).unwrap();
    assert_eq!(summary.records, 2);

    let imported = target.import(&mut delta.as_slice(), ImportMode::Preserve).unwrap();
    assert_eq!(imported.since, 3);
    assert_eq!(target.version(), source.version());

    let read = target.begin_read();
    assert_eq!(read.get("users", "u1").unwrap(), None);
    assert!(read.find_by_index("users", "alias", "ada").unwrap().is_empty());
    assert_eq!(read.get("roles", "r3").unwrap(), Some(b"ops".to_vec()));
}

#[test]
fn test_corrupt_import_changes_nothing() {
    let source = MemoryStore::new();
    seed(&source);
    let mut buf = Vec::new();
    source.export_since(0, &mut buf).unwrap();
    buf.truncate(buf.len() / 2);

    let target = MemoryStore::new();
    let mut txn = target.begin_write();
    txn.put("roles", "keep", b"x".to_vec(), vec![]).unwrap();
    txn.commit().unwrap();

    let err = target.import(&mut buf.as_slice(), ImportMode::Preserve).unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }));
    assert!(target.transactional_import());
    assert_eq!(target.version(), 1);
    assert_eq!(target.begin_read().scan("roles").unwrap().len(), 1);
}

#[test]
fn test_import_keeps_newer_local_records() {
    let source = MemoryStore::new();
    let mut txn = source.begin_write();
    txn.put("roles", "r1", b"old".to_vec(), vec![]).unwrap();
    txn.commit().unwrap();
    let mut buf = Vec::new();
    source.export_since(0, &mut buf).unwrap();

    let target = MemoryStore::new();
    for value in ["a", "b", "new"] {
        let mut txn = target.begin_write();
        txn.put("roles", "r1", value.as_bytes().to_vec(), vec![]).unwrap();
        txn.commit().unwrap();
    }

    target.import(&mut buf.as_slice(), ImportMode::Preserve).unwrap();
    assert_eq!(target.begin_read().get("roles", "r1").unwrap(), Some(b"new".to_vec()));
    assert_eq!(target.version(), 3);
}

#[test]
fn test_restamped_import_reaches_later_exports() {
    let foreign = MemoryStore::new();
    let mut txn = foreign.begin_write();
    txn.put("users", "u9", b"foreign".to_vec(), vec![IndexEntry::new("alias", "foreign")]).unwrap();
    txn.commit().unwrap();
    let mut buf = Vec::new();
    foreign.export_since(0, &mut buf).unwrap();

    // The importing store is already ahead of every record in the stream
    let target = MemoryStore::new();
    seed(&target);
    let before = target.version();

    let imported = target.import(&mut buf.as_slice(), ImportMode::Restamp).unwrap();
    assert_eq!(imported.records, 1);
    assert_eq!(imported.version, before + 1);
    assert_eq!(target.version(), before + 1);

    let mut delta = Vec::new();
    let summary = target.export_since(before, &mut delta).unwrap();
    assert_eq!(summary.records, 1);

    let follower = MemoryStore::new();
    let mut full = Vec::new();
    target.export_since(0, &mut full).unwrap();
    follower.import(&mut full.as_slice(), ImportMode::Preserve).unwrap();
    assert_eq!(follower.version(), target.version());
    assert_eq!(follower.begin_read().find_by_index("users", "alias", "foreign").unwrap(), vec!["u9".to_string()]);
}

#[test]
fn test_restamped_import_overrides_local_records() {
    let source = MemoryStore::new();
    let mut txn = source.begin_write();
    txn.put("roles", "r1", b"restored".to_vec(), vec![]).unwrap();
    txn.commit().unwrap();
    let mut buf = Vec::new();
    source.export_since(0, &mut buf).unwrap();

    let target = MemoryStore::new();
    for value in ["a", "b"] {
        let mut txn = target.begin_write();
        txn.put("roles", "r1", value.as_bytes().to_vec(), vec![]).unwrap();
        txn.commit().unwrap();
    }

    target.import(&mut buf.as_slice(), ImportMode::Restamp).unwrap();
    assert_eq!(target.begin_read().get("roles", "r1").unwrap(), Some(b"restored".to_vec()));
    assert_eq!(target.version(), 3);
}

#[test]
fn test_empty_restamped_import_keeps_version() {
    let source = MemoryStore::new();
    let mut buf = Vec::new();
    source.export_since(0, &mut buf).unwrap();

    let target = MemoryStore::new();
    seed(&target);
    let imported = target.import(&mut buf.as_slice(), ImportMode::Restamp).unwrap();
    assert_eq!(imported.records, 0);
    assert_eq!(target.version(), 3);
}

proptest! {
    #[test]
    fn prop_versions_strictly_increase(keys in prop::collection::vec("[a-z]{1,4}", 1..20)) {
        let store = MemoryStore::new();
        let mut last = store.version();
        for key in &keys {
            let mut txn = store.begin_write();
            txn.put("t", key, key.as_bytes().to_vec(), vec![]).unwrap();
            let version = txn.commit().unwrap();
            prop_assert!(version > last);
            prop_assert_eq!(version, store.version());
            last = version;
        }
    }

    #[test]
    fn prop_export_since_returns_only_newer(count in 1usize..12, since in 0u64..12) {
        let store = MemoryStore::new();
        for i in 0..count {
            let mut txn = store.begin_write();
            txn.put("t", &format!("k{i}"), vec![i as u8], vec![]).unwrap();
            txn.commit().unwrap();
        }

        let mut buf = Vec::new();
        let summary = store.export_since(since, &mut buf).unwrap();
        let expected = (count as u64).saturating_sub(since);
        prop_assert_eq!(summary.records, expected);
    }
}
