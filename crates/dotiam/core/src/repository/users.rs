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

//! User operations

use super::alias::{sync_alias_entries, user_by_alias};
use super::roles::ensure_roles_exist;
use super::{Entity, Repository, load, load_many, save, tables};
use crate::error::{IamError, IamResult, StoreContext};
use crate::models::{OpenMap, Permission, Role, Stamps, User, UserPatch};
use crate::resolver::Resolution;
use dotiam_store::{IndexEntry, ReadTxn, WriteTxn};
use metrics::counter;
use std::collections::{BTreeSet, HashSet};
use tracing::info;
use ulid::Ulid;

impl Entity for User {
    const TABLE: &'static str = tables::USERS;
    const KIND: &'static str = "user";

    fn key(&self) -> &str {
        &self.id
    }

    fn indexes(&self) -> Vec<IndexEntry> {
        self.alias
            .iter()
            .map(|alias| IndexEntry::new(tables::IDX_ALIAS, alias.clone()))
            .chain(self.mix_role_ids.iter().map(|id| IndexEntry::new(tables::IDX_ROLE, id.clone())))
            .collect()
    }
}

/// Fail with `Conflict` if another user owns one of `user`'s aliases
fn ensure_aliases_free<R: ReadTxn + ?Sized>(txn: &R, user: &User) -> IamResult<()> {
    for alias in &user.alias {
        let owners = txn.find_by_index(tables::USERS, tables::IDX_ALIAS, alias).op("find alias owner")?;
        if let Some(owner) = owners.iter().find(|owner| **owner != user.id) {
            return Err(IamError::conflict(format!("alias '{}' already belongs to user '{}'", alias, owner)));
        }
    }
    Ok(())
}

/// Validate and write a user, keeping the alias cache in step
pub(super) fn store_user(txn: &mut dyn WriteTxn, user: &User, previous: Option<&User>) -> IamResult<()> {
    ensure_aliases_free(&*txn, user)?;
    ensure_roles_exist(&*txn, &user.mix_role_ids)?;
    save(txn, user)?;
    let previous_aliases = previous.map(|p| p.alias.as_slice()).unwrap_or_default();
    sync_alias_entries(txn, &user.id, previous_aliases, &user.alias)
}

fn require_user<R: ReadTxn + ?Sized>(txn: &R, id: &str) -> IamResult<User> {
    load(txn, tables::USERS, id)?.ok_or_else(|| IamError::not_found(User::KIND, id))
}

impl Repository {
    /// Create a user, assigning a ULID when the id is empty
    pub fn create_user(&self, actor: &str, mut user: User) -> IamResult<User> {
        user.normalize();
        if user.id.is_empty() {
            user.id = Ulid::new().to_string();
        }
        user.stamps = Stamps::created(actor);

        let user = self.write("create user", |txn| {
            if txn.contains(tables::USERS, &user.id).op("create user")? {
                return Err(IamError::conflict(format!("user '{}' already exists", user.id)));
            }
            store_user(txn, &user, None)?;
            Ok(user)
        })?;

        counter!("dotiam_users_created_total", 1);
        info!(id = %user.id, actor, "User created");
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> IamResult<User> {
        self.read(|txn| require_user(txn, id))
    }

    pub fn patch_user(&self, actor: &str, id: &str, patch: UserPatch) -> IamResult<User> {
        let user = self.write("patch user", |txn| {
            let previous = require_user(&*txn, id)?;
            let mut user = previous.clone();
            patch.apply(&mut user);
            user.stamps.touch(actor);
            store_user(txn, &user, Some(&previous))?;
            Ok(user)
        })?;

        info!(id, actor, "User patched");
        Ok(user)
    }

    /// Replace a user; creation time is kept
    pub fn put_user(&self, actor: &str, id: &str, mut user: User) -> IamResult<User> {
        user.id = id.to_string();
        user.normalize();

        let user = self.write("put user", |txn| {
            let previous = require_user(&*txn, id)?;
            user.stamps = previous.stamps.clone();
            user.stamps.touch(actor);
            store_user(txn, &user, Some(&previous))?;
            Ok(user)
        })?;

        info!(id, actor, "User replaced");
        Ok(user)
    }

    pub fn delete_user(&self, actor: &str, id: &str) -> IamResult<User> {
        let user = self.write("delete user", |txn| {
            let user = require_user(&*txn, id)?;
            txn.delete(tables::USERS, id).op("delete user")?;
            sync_alias_entries(txn, id, &user.alias, &[])?;
            Ok(user)
        })?;

        info!(id, actor, "User deleted");
        Ok(user)
    }

    /// Closure of the user's direct and directory roles
    pub fn user_effective_roles(&self, id: &str) -> IamResult<Vec<Role>> {
        self.read(|txn| {
            let user = require_user(txn, id)?;
            let resolution = self.resolver().resolve(txn, &user.seed_roles())?;
            load_many(txn, tables::ROLES, &resolution.roles.into_iter().collect::<Vec<_>>())
        })
    }

    /// Permissions granted through the user's role closure
    pub fn user_permissions(&self, id: &str) -> IamResult<Vec<Permission>> {
        self.read(|txn| {
            let user = require_user(txn, id)?;
            let (permission_ids, _) = self.permission_ids_for(txn, &user)?;
            load_many(txn, tables::PERMISSIONS, &permission_ids.into_iter().collect::<Vec<_>>())
        })
    }

    /// Union of permission ids over the user's role closure
    pub(crate) fn permission_ids_for<R: ReadTxn + ?Sized>(&self, txn: &R, user: &User) -> IamResult<(BTreeSet<String>, Resolution)> {
        let resolution = self.resolver().resolve(txn, &user.seed_roles())?;
        let mut permission_ids = BTreeSet::new();
        for role in load_many::<Role, R>(txn, tables::ROLES, &resolution.roles.iter().cloned().collect::<Vec<_>>())? {
            permission_ids.extend(role.permission_ids);
        }
        Ok((permission_ids, resolution))
    }

    /// Set the directory-assigned roles of the user owning `alias`,
    /// creating a non-local user when none exists
    pub fn set_directory_roles(&self, actor: &str, alias: &str, sync_role_ids: Vec<String>, details: Option<OpenMap>) -> IamResult<User> {
        self.write("set directory roles", |txn| {
            match user_by_alias(&*txn, alias)? {
                Some(previous) => {
                    let mut user = previous.clone();
                    user.sync_role_ids = sync_role_ids;
                    if let Some(details) = details {
                        user.details.extend(details);
                    }
                    user.normalize();
                    if user != previous {
                        user.stamps.touch(actor);
                        store_user(txn, &user, Some(&previous))?;
                    }
                    Ok(user)
                }
                None => {
                    let mut user = User::new(alias);
                    user.id = Ulid::new().to_string();
                    user.local = false;
                    user.sync_role_ids = sync_role_ids;
                    user.details = details.unwrap_or_default();
                    user.stamps = Stamps::created(actor);
                    user.normalize();
                    store_user(txn, &user, None)?;
                    info!(id = %user.id, alias, actor, "Directory user created");
                    Ok(user)
                }
            }
        })
    }

    /// Clear directory roles of non-local users the directory no longer lists
    pub fn clear_directory_roles(&self, actor: &str, listed_aliases: &HashSet<String>) -> IamResult<usize> {
        self.write("clear directory roles", |txn| {
            let mut cleared = 0;
            for previous in super::load_all::<User, _>(&*txn, tables::USERS)? {
                if previous.local || previous.sync_role_ids.is_empty() || previous.alias.iter().any(|a| listed_aliases.contains(a)) {
                    continue;
                }
                let mut user = previous.clone();
                user.sync_role_ids.clear();
                user.normalize();
                user.stamps.touch(actor);
                save(txn, &user)?;
                cleared += 1;
            }
            Ok(cleared)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::IamError;
    use crate::models::{Role, User, UserPatch};
    use crate::repository::test_support::repository;

    #[test]
    fn test_create_assigns_ulid_and_stamps() {
        let repo = repository();
        let user = repo.create_user("admin", User::new("ada@example.com")).unwrap();

        assert_eq!(user.id.len(), 26);
        assert_eq!(user.stamps.updated_by, "admin");
        assert_eq!(repo.get_user(&user.id).unwrap(), user);
    }

    #[test]
    fn test_duplicate_alias_conflicts_until_owner_deleted() {
        let repo = repository();
        let first = repo.create_user("admin", User::new("ada")).unwrap();

        let err = repo.create_user("admin", User::new("ada")).unwrap_err();
        assert!(matches!(err, IamError::Conflict { .. }));

        repo.delete_user("admin", &first.id).unwrap();
        assert!(repo.create_user("admin", User::new("ada")).is_ok());
    }

    #[test]
    fn test_patch_alias_conflict_is_rejected() {
        let repo = repository();
        repo.create_user("admin", User::new("ada")).unwrap();
        let bob = repo.create_user("admin", User::new("bob")).unwrap();

        let err = repo
            .patch_user(
                "admin",
                &bob.id,
                UserPatch {
                    alias: Some(vec!["bob".into(), "ada".into()]),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, IamError::Conflict { .. }));
        assert_eq!(repo.get_user(&bob.id).unwrap().alias, vec!["bob".to_string()]);
    }

    #[test]
    fn test_missing_user_is_not_found() {
        let repo = repository();
        assert!(matches!(repo.get_user("nope"), Err(IamError::NotFound { .. })));
        assert!(matches!(repo.delete_user("admin", "nope"), Err(IamError::NotFound { .. })));
        assert!(matches!(repo.put_user("admin", "nope", User::new("x")), Err(IamError::NotFound { .. })));
    }

    #[test]
    fn test_unknown_role_is_invalid() {
        let repo = repository();
        let err = repo.create_user("admin", User::new("ada").with_roles(vec!["ghost".into()])).unwrap_err();
        assert!(matches!(err, IamError::InvalidRequest { .. }));
    }

    #[test]
    fn test_put_keeps_created_at() {
        let repo = repository();
        let user = repo.create_user("admin", User::new("ada")).unwrap();
        let replaced = repo.put_user("ops", &user.id, User::new("ada@example.com")).unwrap();

        assert_eq!(replaced.stamps.created_at, user.stamps.created_at);
        assert_eq!(replaced.stamps.updated_by, "ops");
        assert_eq!(replaced.alias, vec!["ada@example.com".to_string()]);
    }

    #[test]
    fn test_effective_roles_follow_nesting() {
        let repo = repository();
        let leaf = repo.create_role("admin", Role::new("leaf")).unwrap();
        let mid = repo.create_role("admin", Role::new("mid").with_roles(vec![leaf.id.clone()])).unwrap();
        let user = repo.create_user("admin", User::new("ada").with_roles(vec![mid.id.clone()])).unwrap();

        let names: Vec<String> = repo.user_effective_roles(&user.id).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"leaf".to_string()));
        assert!(names.contains(&"mid".to_string()));
    }
}
