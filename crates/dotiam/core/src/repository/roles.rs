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

//! Role operations

use super::permissions::ensure_permissions_exist;
use super::{Entity, Repository, load, load_many, save, tables};
use crate::error::{IamError, IamResult, StoreContext};
use crate::models::{LMap, Role, RolePatch, Stamps, User};
use dotiam_store::{IndexEntry, ReadTxn, WriteTxn};
use metrics::counter;
use tracing::{debug, info};
use ulid::Ulid;

impl Entity for Role {
    const TABLE: &'static str = tables::ROLES;
    const KIND: &'static str = "role";

    fn key(&self) -> &str {
        &self.id
    }

    fn indexes(&self) -> Vec<IndexEntry> {
        let mut indexes = vec![IndexEntry::new(tables::IDX_NAME, self.name.clone())];
        indexes.extend(self.role_ids.iter().map(|id| IndexEntry::new(tables::IDX_ROLE, id.clone())));
        indexes.extend(self.permission_ids.iter().map(|id| IndexEntry::new(tables::IDX_PERMISSION, id.clone())));
        indexes
    }
}

/// Fail with `InvalidRequest` when a referenced role is absent
pub(super) fn ensure_roles_exist<R: ReadTxn + ?Sized>(txn: &R, ids: &[String]) -> IamResult<()> {
    for id in ids {
        if !txn.contains(tables::ROLES, id).op("check role")? {
            return Err(IamError::invalid(format!("role '{}' does not exist", id)));
        }
    }
    Ok(())
}

/// Role id carrying `name`, if any
pub(super) fn role_id_by_name<R: ReadTxn + ?Sized>(txn: &R, name: &str) -> IamResult<Option<String>> {
    Ok(txn.find_by_index(tables::ROLES, tables::IDX_NAME, name).op("find role by name")?.into_iter().next())
}

fn require_role<R: ReadTxn + ?Sized>(txn: &R, id: &str) -> IamResult<Role> {
    load(txn, tables::ROLES, id)?.ok_or_else(|| IamError::not_found(Role::KIND, id))
}

/// Validate and write a role
pub(super) fn store_role(txn: &mut dyn WriteTxn, role: &Role) -> IamResult<()> {
    if role.name.is_empty() {
        return Err(IamError::invalid("role name must not be empty"));
    }
    if let Some(owner) = role_id_by_name(&*txn, &role.name)? {
        if owner != role.id {
            return Err(IamError::conflict(format!("role name '{}' is taken", role.name)));
        }
    }

    let foreign: Vec<String> = role.role_ids.iter().filter(|id| **id != role.id).cloned().collect();
    ensure_roles_exist(&*txn, &foreign)?;
    ensure_permissions_exist(&*txn, &role.permission_ids)?;
    save(txn, role)
}

impl Repository {
    /// Create a role, assigning a ULID when the id is empty
    pub fn create_role(&self, actor: &str, mut role: Role) -> IamResult<Role> {
        role.normalize();
        if role.id.is_empty() {
            role.id = Ulid::new().to_string();
        }
        role.stamps = Stamps::created(actor);

        let role = self.write("create role", |txn| {
            if txn.contains(tables::ROLES, &role.id).op("create role")? {
                return Err(IamError::conflict(format!("role '{}' already exists", role.id)));
            }
            store_role(txn, &role)?;
            Ok(role)
        })?;

        counter!("dotiam_roles_created_total", 1);
        info!(id = %role.id, name = %role.name, actor, "Role created");
        Ok(role)
    }

    pub fn get_role(&self, id: &str) -> IamResult<Role> {
        self.read(|txn| require_role(txn, id))
    }

    pub fn patch_role(&self, actor: &str, id: &str, patch: RolePatch) -> IamResult<Role> {
        let role = self.write("patch role", |txn| {
            let mut role = require_role(&*txn, id)?;
            patch.apply(&mut role);
            role.stamps.touch(actor);
            store_role(txn, &role)?;
            Ok(role)
        })?;

        info!(id, actor, "Role patched");
        Ok(role)
    }

    /// Replace a role; creation time is kept
    pub fn put_role(&self, actor: &str, id: &str, mut role: Role) -> IamResult<Role> {
        role.id = id.to_string();
        role.normalize();

        let role = self.write("put role", |txn| {
            let previous = require_role(&*txn, id)?;
            role.stamps = previous.stamps;
            role.stamps.touch(actor);
            store_role(txn, &role)?;
            Ok(role)
        })?;

        info!(id, actor, "Role replaced");
        Ok(role)
    }

    /// Delete a role and remove every reference to it
    pub fn delete_role(&self, actor: &str, id: &str) -> IamResult<Role> {
        let role = self.write("delete role", |txn| {
            let role = require_role(&*txn, id)?;
            txn.delete(tables::ROLES, id).op("delete role")?;
            let id = id.to_string();

            let parents = txn.find_by_index(tables::ROLES, tables::IDX_ROLE, &id).op("find parent roles")?;
            for mut parent in load_many::<Role, _>(&*txn, tables::ROLES, &parents)? {
                parent.role_ids.retain(|r| *r != id);
                parent.stamps.touch(actor);
                save(txn, &parent)?;
            }

            let holders = txn.find_by_index(tables::USERS, tables::IDX_ROLE, &id).op("find role holders")?;
            for mut user in load_many::<User, _>(&*txn, tables::USERS, &holders)? {
                user.role_ids.retain(|r| *r != id);
                user.sync_role_ids.retain(|r| *r != id);
                user.normalize();
                user.stamps.touch(actor);
                save(txn, &user)?;
            }

            let lmaps = txn.find_by_index(tables::LMAPS, tables::IDX_ROLE, &id).op("find mapped groups")?;
            for mut lmap in load_many::<LMap, _>(&*txn, tables::LMAPS, &lmaps)? {
                lmap.role_ids.retain(|r| *r != id);
                lmap.stamps.touch(actor);
                save(txn, &lmap)?;
            }

            debug!(id = %id, roles = parents.len(), users = holders.len(), lmaps = lmaps.len(), "Role references removed");
            Ok(role)
        })?;

        info!(id, actor, "Role deleted");
        Ok(role)
    }

    /// Every role whose nested closure contains `id`, excluding `id` itself
    pub fn roles_reaching(&self, id: &str) -> IamResult<Vec<Role>> {
        self.read(|txn| {
            require_role(txn, id)?;
            let resolution = self.resolver().reaching(txn, &[id.to_string()])?;
            let ids: Vec<String> = resolution.roles.into_iter().filter(|r| r != id).collect();
            load_many(txn, tables::ROLES, &ids)
        })
    }

    /// Roles granting a permission directly
    pub fn roles_with_permission(&self, permission_id: &str) -> IamResult<Vec<Role>> {
        self.read(|txn| {
            let ids = txn.find_by_index(tables::ROLES, tables::IDX_PERMISSION, permission_id).op("find roles by permission")?;
            load_many(txn, tables::ROLES, &ids)
        })
    }
}

/// Find the role named `name`, creating it when absent
pub(super) fn ensure_named_role(txn: &mut dyn WriteTxn, actor: &str, name: &str, description: &str) -> IamResult<String> {
    if let Some(id) = role_id_by_name(&*txn, name)? {
        return Ok(id);
    }

    let mut role = Role::new(name);
    role.id = Ulid::new().to_string();
    role.description = description.to_string();
    role.stamps = Stamps::created(actor);
    role.normalize();
    store_role(txn, &role)?;
    info!(id = %role.id, name, actor, "Role created");
    Ok(role.id)
}

#[cfg(test)]
mod tests {
    use crate::error::IamError;
    use crate::models::{LMap, Role, RolePatch, User};
    use crate::repository::test_support::repository;

    #[test]
    fn test_name_is_unique() {
        let repo = repository();
        repo.create_role("admin", Role::new("viewer")).unwrap();
        let err = repo.create_role("admin", Role::new("viewer")).unwrap_err();
        assert!(matches!(err, IamError::Conflict { .. }));
    }

    #[test]
    fn test_rename_onto_existing_name_conflicts() {
        let repo = repository();
        repo.create_role("admin", Role::new("viewer")).unwrap();
        let editor = repo.create_role("admin", Role::new("editor")).unwrap();

        let err = repo
            .patch_role(
                "admin",
                &editor.id,
                RolePatch {
                    name: Some("viewer".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, IamError::Conflict { .. }));

        let renamed = repo
            .patch_role(
                "admin",
                &editor.id,
                RolePatch {
                    name: Some("writer".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "writer");
    }

    #[test]
    fn test_self_nesting_is_allowed() {
        let repo = repository();
        let role = repo.create_role("admin", Role::new("loop").with_id("loop").with_roles(vec!["loop".into()])).unwrap();
        assert_eq!(role.role_ids, vec!["loop".to_string()]);
        assert!(repo.roles_reaching("loop").unwrap().is_empty());
    }

    #[test]
    fn test_delete_cascades_everywhere() {
        let repo = repository();
        let target = repo.create_role("admin", Role::new("target")).unwrap();
        let parent = repo.create_role("admin", Role::new("parent").with_roles(vec![target.id.clone()])).unwrap();
        let user = repo.create_user("admin", User::new("ada").with_roles(vec![target.id.clone(), parent.id.clone()])).unwrap();
        repo.set_directory_roles("sync", "ada", vec![target.id.clone()], None).unwrap();
        repo.create_lmap("admin", LMap::new("devs", vec![target.id.clone()])).unwrap();

        repo.delete_role("admin", &target.id).unwrap();

        assert!(repo.get_role(&parent.id).unwrap().role_ids.is_empty());
        let user = repo.get_user(&user.id).unwrap();
        assert_eq!(user.role_ids, vec![parent.id.clone()]);
        assert!(user.sync_role_ids.is_empty());
        assert_eq!(user.mix_role_ids, vec![parent.id.clone()]);
        assert!(repo.get_lmap("devs").unwrap().role_ids.is_empty());
        assert!(matches!(repo.get_role(&target.id), Err(IamError::NotFound { .. })));
    }

    #[test]
    fn test_roles_reaching_walks_parents() {
        let repo = repository();
        let leaf = repo.create_role("admin", Role::new("leaf")).unwrap();
        let mid = repo.create_role("admin", Role::new("mid").with_roles(vec![leaf.id.clone()])).unwrap();
        let top = repo.create_role("admin", Role::new("top").with_roles(vec![mid.id.clone()])).unwrap();
        repo.create_role("admin", Role::new("other")).unwrap();

        let mut names: Vec<String> = repo.roles_reaching(&leaf.id).unwrap().into_iter().map(|r| r.name).collect();
        names.sort();
        assert_eq!(names, vec!["mid".to_string(), "top".to_string()]);
        assert!(repo.roles_reaching(&top.id).unwrap().is_empty());
    }
}
