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

//! Stored record layout

use serde::{Deserialize, Serialize};

/// Secondary index entry attached to a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Index name within the table
    pub index: String,
    /// Indexed value
    pub value: String,
}

impl IndexEntry {
    pub fn new(index: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            value: value.into(),
        }
    }
}

/// A versioned record
///
/// Deletions are kept as tombstones so that incremental exports can carry
/// them to replicas. Tombstones are invisible to reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Encoded value, empty for tombstones
    pub value: Vec<u8>,
    /// Version of the transaction that wrote this record
    pub version: u64,
    /// Secondary index entries
    pub indexes: Vec<IndexEntry>,
    /// Tombstone marker
    pub deleted: bool,
}

impl Record {
    /// Create a live record
    pub fn live(value: Vec<u8>, version: u64, indexes: Vec<IndexEntry>) -> Self {
        Self {
            value,
            version,
            indexes,
            deleted: false,
        }
    }

    /// Create a tombstone
    pub fn tombstone(version: u64) -> Self {
        Self {
            value: Vec::new(),
            version,
            indexes: Vec::new(),
            deleted: true,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}
