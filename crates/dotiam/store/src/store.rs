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

//! Storage contract
//!
//! The IAM engine only talks to storage through these traits. Any engine that
//! provides ordered tables, secondary indexes, atomic write transactions and a
//! monotonically increasing write version can back it.

use crate::error::StoreResult;
use crate::record::IndexEntry;
use std::io::{Read, Write};

/// Read operations available inside a transaction
pub trait ReadTxn {
    /// Get a value by key
    fn get(&self, table: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// All live entries of a table, ordered by key
    fn scan(&self, table: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// Keys whose record carries `index = value`, ordered by key
    fn find_by_index(&self, table: &str, index: &str, value: &str) -> StoreResult<Vec<String>>;

    /// Live entries of a table matching a predicate, ordered by key
    fn scan_filter(&self, table: &str, predicate: &mut dyn FnMut(&str, &[u8]) -> bool) -> StoreResult<Vec<(String, Vec<u8>)>> {
        Ok(self.scan(table)?.into_iter().filter(|(key, value)| predicate(key, value)).collect())
    }

    /// Check if a key exists
    fn contains(&self, table: &str, key: &str) -> StoreResult<bool> {
        Ok(self.get(table, key)?.is_some())
    }
}

/// Write transaction
///
/// Reads observe the transaction's own staged writes. Nothing is visible to
/// other readers until `commit`; dropping the transaction discards it.
pub trait WriteTxn: ReadTxn {
    /// Stage a put, replacing the record and its index entries
    fn put(&mut self, table: &str, key: &str, value: Vec<u8>, indexes: Vec<IndexEntry>) -> StoreResult<()>;

    /// Stage a delete, returning whether the key was live
    fn delete(&mut self, table: &str, key: &str) -> StoreResult<bool>;

    /// Atomically apply the staged writes, returning the store version afterwards
    fn commit(self: Box<Self>) -> StoreResult<u64>;
}

/// Result of an export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    /// Store version when the export started
    pub version: u64,
    /// Number of records written
    pub records: u64,
}

/// Result of an import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    /// Lower bound of the imported stream, 0 for a full export
    pub since: u64,
    /// Store version after the import
    pub version: u64,
    /// Number of records applied
    pub records: u64,
}

/// How an import treats the record versions of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Keep source versions; a record older than the local copy is skipped
    #[default]
    Preserve,
    /// Apply every record under one new local version, like a single commit
    Restamp,
}

/// Versioned key-value store
pub trait Store: Send + Sync {
    /// Highest committed write version, 0 when empty
    fn version(&self) -> u64;

    /// Begin a read transaction over a consistent snapshot
    fn begin_read(&self) -> Box<dyn ReadTxn + '_>;

    /// Begin a write transaction; write transactions are serialized
    fn begin_write(&self) -> Box<dyn WriteTxn + '_>;

    /// Stream every record (tombstones included) written after `since`
    fn export_since(&self, since: u64, writer: &mut dyn Write) -> StoreResult<ExportSummary>;

    /// Apply an export stream
    fn import(&self, reader: &mut dyn Read, mode: ImportMode) -> StoreResult<ImportSummary>;

    /// Whether a failed import is guaranteed to leave the store untouched
    fn transactional_import(&self) -> bool {
        true
    }
}
