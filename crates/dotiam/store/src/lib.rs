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

//! DotIAM versioned key-value store
//!
//! This crate defines the storage contract consumed by the IAM engine and ships
//! an in-memory reference engine honouring it:
//! - Named tables with ordered string keys
//! - Multi-valued secondary indexes
//! - Serialized, atomic write transactions
//! - A strictly increasing write version per committed transaction
//! - Versioned export/import streams used for backup and replication

pub mod error;
pub mod export;
pub mod memory;
pub mod record;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use export::{EXPORT_MAGIC, ExportHeader, ExportRecord};
pub use memory::MemoryStore;
pub use record::{IndexEntry, Record};
pub use store::{ExportSummary, ImportMode, ImportSummary, ReadTxn, Store, WriteTxn};
