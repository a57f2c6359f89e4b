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

//! Listing and reverse queries

use super::{Repository, load_all, load_many, tables};
use crate::error::{IamResult, StoreContext};
use crate::models::{AccessFilter, LMap, LMapQuery, Page, Permission, PermissionQuery, Role, RoleQuery, User, UserQuery};
use dotiam_store::ReadTxn;
use std::collections::BTreeSet;

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn any_of(values: &[String], wanted: &[String]) -> bool {
    wanted.is_empty() || values.iter().any(|v| wanted.contains(v))
}

fn eq_opt<T: PartialEq>(wanted: &Option<T>, value: &T) -> bool {
    wanted.as_ref().is_none_or(|w| w == value)
}

impl Repository {
    /// Ids of permissions with a resource admitting the request
    fn permissions_matching<R: ReadTxn + ?Sized>(&self, txn: &R, access: &AccessFilter) -> IamResult<BTreeSet<String>> {
        Ok(load_all::<Permission, R>(txn, tables::PERMISSIONS)?
            .into_iter()
            .filter(|p| p.resources.iter().any(|r| self.matcher().resource_matches(r, &access.path, access.method.as_deref(), access.host.as_deref())))
            .map(|p| p.id)
            .collect())
    }

    /// Ids of roles whose closure grants a permission admitting the request
    fn roles_matching<R: ReadTxn + ?Sized>(&self, txn: &R, access: &AccessFilter) -> IamResult<BTreeSet<String>> {
        let mut direct = BTreeSet::new();
        for permission_id in self.permissions_matching(txn, access)? {
            direct.extend(txn.find_by_index(tables::ROLES, tables::IDX_PERMISSION, &permission_id).op("find roles by permission")?);
        }
        let direct: Vec<String> = direct.into_iter().collect();
        Ok(self.resolver().reaching(txn, &direct)?.roles)
    }

    pub fn list_users(&self, query: &UserQuery) -> IamResult<Page<User>> {
        self.read(|txn| {
            let reaching = match &query.access {
                Some(access) => Some(self.roles_matching(txn, access)?),
                None => None,
            };

            let users: Vec<User> = match &query.alias {
                Some(alias) => self.lookup_alias(txn, alias)?.into_iter().collect(),
                None => load_all(txn, tables::USERS)?,
            };

            let items = users
                .into_iter()
                .filter(|u| eq_opt(&query.id, &u.id))
                .filter(|u| query.search.as_ref().is_none_or(|s| u.alias.iter().any(|a| contains_ci(a, s))))
                .filter(|u| any_of(&u.mix_role_ids, &query.role_ids))
                .filter(|u| eq_opt(&query.disabled, &u.disabled))
                .filter(|u| eq_opt(&query.service_account, &u.service_account))
                .filter(|u| eq_opt(&query.local, &u.local))
                .filter(|u| reaching.as_ref().is_none_or(|roles| u.mix_role_ids.iter().any(|r| roles.contains(r))))
                .collect();

            Ok(Page::paginate(items, query.pagination))
        })
    }

    pub fn list_roles(&self, query: &RoleQuery) -> IamResult<Page<Role>> {
        self.read(|txn| {
            let reaching = match &query.access {
                Some(access) => Some(self.roles_matching(txn, access)?),
                None => None,
            };

            let roles: Vec<Role> = match &query.name {
                Some(name) => {
                    let ids = txn.find_by_index(tables::ROLES, tables::IDX_NAME, name).op("find role by name")?;
                    load_many(txn, tables::ROLES, &ids)?
                }
                None => load_all(txn, tables::ROLES)?,
            };

            let items = roles
                .into_iter()
                .filter(|r| eq_opt(&query.id, &r.id))
                .filter(|r| query.search.as_ref().is_none_or(|s| contains_ci(&r.name, s) || contains_ci(&r.description, s)))
                .filter(|r| any_of(&r.permission_ids, &query.permission_ids))
                .filter(|r| any_of(&r.role_ids, &query.role_ids))
                .filter(|r| reaching.as_ref().is_none_or(|roles| roles.contains(&r.id)))
                .collect();

            Ok(Page::paginate(items, query.pagination))
        })
    }

    pub fn list_permissions(&self, query: &PermissionQuery) -> IamResult<Page<Permission>> {
        self.read(|txn| {
            let items = load_all::<Permission, _>(txn, tables::PERMISSIONS)?
                .into_iter()
                .filter(|p| eq_opt(&query.id, &p.id))
                .filter(|p| eq_opt(&query.name, &p.name))
                .filter(|p| query.search.as_ref().is_none_or(|s| contains_ci(&p.name, s) || contains_ci(&p.description, s)))
                .filter(|p| {
                    query.access.as_ref().is_none_or(|access| {
                        p.resources.iter().any(|r| self.matcher().resource_matches(r, &access.path, access.method.as_deref(), access.host.as_deref()))
                    })
                })
                .collect();

            Ok(Page::paginate(items, query.pagination))
        })
    }

    pub fn list_lmaps(&self, query: &LMapQuery) -> IamResult<Page<LMap>> {
        self.read(|txn| {
            let items = load_all::<LMap, _>(txn, tables::LMAPS)?
                .into_iter()
                .filter(|l| eq_opt(&query.name, &l.name))
                .filter(|l| query.search.as_ref().is_none_or(|s| contains_ci(&l.name, s)))
                .filter(|l| any_of(&l.role_ids, &query.role_ids))
                .collect();

            Ok(Page::paginate(items, query.pagination))
        })
    }
}
