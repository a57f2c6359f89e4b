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

//! Permission operations

use super::{Entity, Repository, load, load_many, save, tables};
use crate::error::{IamError, IamResult, StoreContext};
use crate::models::{Permission, PermissionPatch, Role, Stamps};
use dotiam_store::{IndexEntry, ReadTxn, WriteTxn};
use metrics::counter;
use tracing::{debug, info};
use ulid::Ulid;

impl Entity for Permission {
    const TABLE: &'static str = tables::PERMISSIONS;
    const KIND: &'static str = "permission";

    fn key(&self) -> &str {
        &self.id
    }

    fn indexes(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::new(tables::IDX_NAME, self.name.clone())]
    }
}

/// Fail with `InvalidRequest` when a referenced permission is absent
pub(super) fn ensure_permissions_exist<R: ReadTxn + ?Sized>(txn: &R, ids: &[String]) -> IamResult<()> {
    for id in ids {
        if !txn.contains(tables::PERMISSIONS, id).op("check permission")? {
            return Err(IamError::invalid(format!("permission '{}' does not exist", id)));
        }
    }
    Ok(())
}

fn require_permission<R: ReadTxn + ?Sized>(txn: &R, id: &str) -> IamResult<Permission> {
    load(txn, tables::PERMISSIONS, id)?.ok_or_else(|| IamError::not_found(Permission::KIND, id))
}

fn store_permission(txn: &mut dyn WriteTxn, permission: &Permission) -> IamResult<()> {
    if permission.name.is_empty() {
        return Err(IamError::invalid("permission name must not be empty"));
    }
    if let Some(resource) = permission.resources.iter().find(|r| r.path.trim().is_empty()) {
        return Err(IamError::invalid(format!("resource path must not be empty (methods {:?})", resource.methods)));
    }

    let owner = txn.find_by_index(tables::PERMISSIONS, tables::IDX_NAME, &permission.name).op("find permission by name")?;
    if owner.iter().any(|id| *id != permission.id) {
        return Err(IamError::conflict(format!("permission name '{}' is taken", permission.name)));
    }
    save(txn, permission)
}

impl Repository {
    /// Create a permission, assigning a ULID when the id is empty
    pub fn create_permission(&self, actor: &str, mut permission: Permission) -> IamResult<Permission> {
        permission.normalize();
        if permission.id.is_empty() {
            permission.id = Ulid::new().to_string();
        }
        permission.stamps = Stamps::created(actor);

        let permission = self.write("create permission", |txn| {
            if txn.contains(tables::PERMISSIONS, &permission.id).op("create permission")? {
                return Err(IamError::conflict(format!("permission '{}' already exists", permission.id)));
            }
            store_permission(txn, &permission)?;
            Ok(permission)
        })?;

        counter!("dotiam_permissions_created_total", 1);
        info!(id = %permission.id, name = %permission.name, actor, "Permission created");
        Ok(permission)
    }

    pub fn get_permission(&self, id: &str) -> IamResult<Permission> {
        self.read(|txn| require_permission(txn, id))
    }

    pub fn patch_permission(&self, actor: &str, id: &str, patch: PermissionPatch) -> IamResult<Permission> {
        let permission = self.write("patch permission", |txn| {
            let mut permission = require_permission(&*txn, id)?;
            patch.apply(&mut permission);
            permission.stamps.touch(actor);
            store_permission(txn, &permission)?;
            Ok(permission)
        })?;

        info!(id, actor, "Permission patched");
        Ok(permission)
    }

    /// Replace a permission; creation time is kept
    pub fn put_permission(&self, actor: &str, id: &str, mut permission: Permission) -> IamResult<Permission> {
        permission.id = id.to_string();
        permission.normalize();

        let permission = self.write("put permission", |txn| {
            let previous = require_permission(&*txn, id)?;
            permission.stamps = previous.stamps;
            permission.stamps.touch(actor);
            store_permission(txn, &permission)?;
            Ok(permission)
        })?;

        info!(id, actor, "Permission replaced");
        Ok(permission)
    }

    /// Delete a permission and detach it from every role
    pub fn delete_permission(&self, actor: &str, id: &str) -> IamResult<Permission> {
        let permission = self.write("delete permission", |txn| {
            let permission = require_permission(&*txn, id)?;
            txn.delete(tables::PERMISSIONS, id).op("delete permission")?;

            let holders = txn.find_by_index(tables::ROLES, tables::IDX_PERMISSION, id).op("find roles by permission")?;
            for mut role in load_many::<Role, _>(&*txn, tables::ROLES, &holders)? {
                role.permission_ids.retain(|p| p != id);
                role.stamps.touch(actor);
                save(txn, &role)?;
            }

            debug!(id, roles = holders.len(), "Permission references removed");
            Ok(permission)
        })?;

        info!(id, actor, "Permission deleted");
        Ok(permission)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::IamError;
    use crate::models::{Permission, Resource, Role};
    use crate::repository::test_support::repository;

    #[test]
    fn test_name_is_unique() {
        let repo = repository();
        repo.create_permission("admin", Permission::new("read", vec![])).unwrap();
        let err = repo.create_permission("admin", Permission::new("read", vec![])).unwrap_err();
        assert!(matches!(err, IamError::Conflict { .. }));
    }

    #[test]
    fn test_empty_resource_path_is_invalid() {
        let repo = repository();
        let err = repo.create_permission("admin", Permission::new("bad", vec![Resource::new(" ", &["GET"])])).unwrap_err();
        assert!(matches!(err, IamError::InvalidRequest { .. }));
    }

    #[test]
    fn test_delete_detaches_from_roles() {
        let repo = repository();
        let read = repo.create_permission("admin", Permission::new("read", vec![Resource::new("/x/**", &["GET"])])).unwrap();
        let write = repo.create_permission("admin", Permission::new("write", vec![Resource::new("/x/**", &["POST"])])).unwrap();
        let role = repo.create_role("admin", Role::new("editor").with_permissions(vec![read.id.clone(), write.id.clone()])).unwrap();

        assert_eq!(repo.roles_with_permission(&read.id).unwrap().len(), 1);
        repo.delete_permission("admin", &read.id).unwrap();

        assert_eq!(repo.get_role(&role.id).unwrap().permission_ids, vec![write.id.clone()]);
        assert!(repo.roles_with_permission(&read.id).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_permission_reference_is_invalid() {
        let repo = repository();
        let err = repo.create_role("admin", Role::new("editor").with_permissions(vec!["ghost".into()])).unwrap_err();
        assert!(matches!(err, IamError::InvalidRequest { .. }));
    }
}
