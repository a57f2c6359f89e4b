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

//! Alias cache
//!
//! `alias` entries are a denormalized copy of `User.alias`. The user records
//! stay authoritative: a cache entry is only trusted when the user it points
//! at still carries the alias.

use super::{Entity, Repository, load, load_all, save, tables};
use crate::error::{IamResult, StoreContext};
use crate::models::{AliasEntry, User};
use dotiam_store::{IndexEntry, ReadTxn, WriteTxn};
use metrics::counter;
use tracing::{debug, info};

impl Entity for AliasEntry {
    const TABLE: &'static str = tables::ALIAS;
    const KIND: &'static str = "alias";

    fn key(&self) -> &str {
        &self.name
    }

    fn indexes(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::new(tables::IDX_USER, self.user_id.clone())]
    }
}

/// Move the cache entries of `user_id` from `previous` to `current` aliases
pub(super) fn sync_alias_entries(txn: &mut dyn WriteTxn, user_id: &str, previous: &[String], current: &[String]) -> IamResult<()> {
    for alias in previous.iter().filter(|a| !current.contains(*a)) {
        let owned = load::<AliasEntry, _>(&*txn, tables::ALIAS, alias)?.is_some_and(|entry| entry.user_id == user_id);
        if owned {
            txn.delete(tables::ALIAS, alias).op("delete alias entry")?;
        }
    }
    for alias in current {
        save(
            txn,
            &AliasEntry {
                name: alias.clone(),
                user_id: user_id.to_string(),
            },
        )?;
    }
    Ok(())
}

/// Authoritative alias lookup through the user table index
pub(super) fn user_by_alias<R: ReadTxn + ?Sized>(txn: &R, alias: &str) -> IamResult<Option<User>> {
    match txn.find_by_index(tables::USERS, tables::IDX_ALIAS, alias).op("find user by alias")?.first() {
        Some(id) => load(txn, tables::USERS, id),
        None => Ok(None),
    }
}

impl Repository {
    /// Resolve an alias through the cache, falling back to a user scan
    ///
    /// A miss or stale entry that the scan resolves flags the cache for a
    /// rebuild. The lookup itself never writes.
    pub fn lookup_alias<R: ReadTxn + ?Sized>(&self, txn: &R, alias: &str) -> IamResult<Option<User>> {
        if let Some(entry) = load::<AliasEntry, R>(txn, tables::ALIAS, alias)? {
            if let Some(user) = load::<User, R>(txn, tables::USERS, &entry.user_id)? {
                if user.alias.iter().any(|a| a == alias) {
                    counter!("dotiam_alias_cache_hits_total", 1);
                    return Ok(Some(user));
                }
            }
        }

        counter!("dotiam_alias_cache_misses_total", 1);
        let found = load_all::<User, R>(txn, tables::USERS)?.into_iter().find(|user| user.alias.iter().any(|a| a == alias));
        if found.is_some() {
            debug!(alias, "Alias cache miss resolved by scan, requesting rebuild");
            self.request_alias_repair();
        }
        Ok(found)
    }

    /// Resolve an alias in its own read transaction
    pub fn find_user_by_alias(&self, alias: &str) -> IamResult<Option<User>> {
        self.read(|txn| self.lookup_alias(txn, alias))
    }

    /// Drop and rebuild the alias cache from user records
    pub fn rebuild_alias_index(&self, actor: &str) -> IamResult<usize> {
        let entries = self.write("rebuild alias index", |txn| {
            for (name, _) in txn.scan(tables::ALIAS).op("scan alias entries")? {
                txn.delete(tables::ALIAS, &name).op("delete alias entry")?;
            }

            let mut entries = 0;
            for user in load_all::<User, _>(&*txn, tables::USERS)? {
                for alias in &user.alias {
                    save(
                        txn,
                        &AliasEntry {
                            name: alias.clone(),
                            user_id: user.id.clone(),
                        },
                    )?;
                    entries += 1;
                }
            }
            Ok(entries)
        })?;

        self.take_alias_repair();
        info!(entries, actor, "Alias index rebuilt");
        Ok(entries)
    }

    /// All alias cache entries, ordered by alias
    pub fn alias_entries(&self) -> IamResult<Vec<AliasEntry>> {
        self.read(|txn| load_all(txn, tables::ALIAS))
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{AliasEntry, User};
    use crate::repository::tables;
    use crate::repository::test_support::repository;

    #[test]
    fn test_entries_follow_user_aliases() {
        let repo = repository();
        let mut user = User::new("ada");
        user.alias.push("ada@example.com".into());
        let user = repo.create_user("admin", user).unwrap();

        let entries = repo.alias_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.user_id == user.id));

        repo.delete_user("admin", &user.id).unwrap();
        assert!(repo.alias_entries().unwrap().is_empty());
    }

    #[test]
    fn test_stale_entry_falls_back_to_scan_and_requests_repair() {
        let repo = repository();
        let user = repo.create_user("admin", User::new("ada")).unwrap();

        // Corrupt the cache behind the repository's back
        repo.write("corrupt", |txn| {
            txn.delete(tables::ALIAS, "ada").unwrap();
            Ok(())
        })
        .unwrap();
        assert!(!repo.alias_repair_pending());

        let found = repo.find_user_by_alias("ada").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(repo.alias_repair_pending());

        assert_eq!(repo.rebuild_alias_index("system").unwrap(), 1);
        assert!(!repo.alias_repair_pending());
        assert_eq!(
            repo.alias_entries().unwrap(),
            vec![AliasEntry {
                name: "ada".into(),
                user_id: user.id.clone()
            }]
        );
    }

    #[test]
    fn test_unknown_alias_does_not_request_repair() {
        let repo = repository();
        assert!(repo.find_user_by_alias("ghost").unwrap().is_none());
        assert!(!repo.alias_repair_pending());
    }
}
