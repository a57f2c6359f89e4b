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

//! Entity repository
//!
//! CRUD and query operations over users, roles, permissions, LMaps and the
//! alias cache. Every mutation runs in a single store write transaction
//! under the shared side of the backup gate, so uniqueness checks, writes
//! and cascades are applied together or not at all.

mod alias;
mod lmaps;
mod permissions;
mod query;
mod roles;
mod users;

use crate::backup::BackupManager;
use crate::error::{IamResult, StoreContext};
use crate::matcher::AccessMatcher;
use crate::resolver::RoleResolver;
use dotiam_store::{IndexEntry, ReadTxn, Store, WriteTxn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Table and index names
pub mod tables {
    pub const USERS: &str = "users";
    pub const ROLES: &str = "roles";
    pub const PERMISSIONS: &str = "permissions";
    pub const LMAPS: &str = "lmaps";
    pub const ALIAS: &str = "alias";

    /// Users by alias, authoritative
    pub const IDX_ALIAS: &str = "alias";
    /// Unique name of roles and permissions
    pub const IDX_NAME: &str = "name";
    /// Referenced role id (nested roles, user roles, LMap roles)
    pub const IDX_ROLE: &str = "role";
    /// Referenced permission id
    pub const IDX_PERMISSION: &str = "permission";
    /// Alias entries by user id
    pub const IDX_USER: &str = "user";
}

/// A stored entity
pub(crate) trait Entity: Serialize + DeserializeOwned {
    const TABLE: &'static str;
    const KIND: &'static str;

    fn key(&self) -> &str;

    fn indexes(&self) -> Vec<IndexEntry>;
}

/// Load and decode one entity
pub(crate) fn load<T: DeserializeOwned, R: ReadTxn + ?Sized>(txn: &R, table: &str, key: &str) -> IamResult<Option<T>> {
    match txn.get(table, key).op("get")? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Load and decode every entity of a table, ordered by key
pub(crate) fn load_all<T: DeserializeOwned, R: ReadTxn + ?Sized>(txn: &R, table: &str) -> IamResult<Vec<T>> {
    txn.scan(table).op("scan")?.into_iter().map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(Into::into)).collect()
}

/// Load the entities behind a set of keys, skipping absent ones
pub(crate) fn load_many<T: DeserializeOwned, R: ReadTxn + ?Sized>(txn: &R, table: &str, keys: &[String]) -> IamResult<Vec<T>> {
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(entity) = load(txn, table, key)? {
            out.push(entity);
        }
    }
    Ok(out)
}

pub(crate) fn save<T: Entity>(txn: &mut dyn WriteTxn, entity: &T) -> IamResult<()> {
    let bytes = serde_json::to_vec(entity)?;
    txn.put(T::TABLE, entity.key(), bytes, entity.indexes()).op("put")
}

/// The IAM entity repository
pub struct Repository {
    store: Arc<dyn Store>,
    backup: Arc<BackupManager>,
    resolver: RoleResolver,
    matcher: Arc<AccessMatcher>,
    alias_repair: AtomicBool,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").field("resolver", &self.resolver).field("alias_repair", &self.alias_repair).finish()
    }
}

impl Repository {
    pub fn new(store: Arc<dyn Store>, backup: Arc<BackupManager>, resolver: RoleResolver, matcher: Arc<AccessMatcher>) -> Self {
        Self {
            store,
            backup,
            resolver,
            matcher,
            alias_repair: AtomicBool::new(false),
        }
    }

    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    pub fn matcher(&self) -> &AccessMatcher {
        &self.matcher
    }

    /// Run `f` in a read transaction under the shared backup gate
    pub fn read<T>(&self, f: impl FnOnce(&dyn ReadTxn) -> IamResult<T>) -> IamResult<T> {
        let _gate = self.backup.read_guard();
        let txn = self.store.begin_read();
        f(&*txn)
    }

    /// Run `f` in a write transaction and commit it
    pub fn write<T>(&self, operation: &str, f: impl FnOnce(&mut dyn WriteTxn) -> IamResult<T>) -> IamResult<T> {
        let _gate = self.backup.read_guard();
        let mut txn = self.store.begin_write();
        let out = f(&mut *txn)?;
        let version = txn.commit().op(operation)?;
        debug!(operation, version, "Repository write committed");
        Ok(out)
    }

    /// Current store version
    pub fn version(&self) -> u64 {
        self.store.version()
    }

    /// Flag the alias cache for a rebuild on the write master
    pub(crate) fn request_alias_repair(&self) {
        self.alias_repair.store(true, Ordering::Release);
    }

    /// Whether a rebuild was requested since the last `take_alias_repair`
    pub fn alias_repair_pending(&self) -> bool {
        self.alias_repair.load(Ordering::Acquire)
    }

    /// Clear and return the rebuild request
    pub fn take_alias_repair(&self) -> bool {
        self.alias_repair.swap(false, Ordering::AcqRel)
    }
}
