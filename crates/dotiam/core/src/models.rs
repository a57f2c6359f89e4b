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

//! IAM data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Caller-defined extension data
pub type OpenMap = serde_json::Map<String, serde_json::Value>;

fn default_true() -> bool {
    true
}

/// Deduplicate ids keeping first occurrence order, dropping blanks
pub fn dedup_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty() && seen.insert(id.to_string())).map(str::to_string).collect()
}

/// Audit stamps carried by every entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamps {
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_by: String,
}

impl Default for Stamps {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            updated_by: String::new(),
        }
    }
}

impl Stamps {
    /// Stamps for a newly created entity
    pub fn created(actor: &str) -> Self {
        Self {
            updated_by: actor.to_string(),
            ..Self::default()
        }
    }

    /// Stamp a mutation, keeping the creation time
    pub fn touch(&mut self, actor: &str) {
        self.updated_at = Utc::now();
        self.updated_by = actor.to_string();
    }
}

/// An identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,

    /// Aliases (emails, usernames), unique across users
    #[serde(default)]
    pub alias: Vec<String>,

    /// Admin-assigned roles
    #[serde(default)]
    pub role_ids: Vec<String>,

    /// Directory-assigned roles
    #[serde(default)]
    pub sync_role_ids: Vec<String>,

    /// Union of `role_ids` and `sync_role_ids`
    #[serde(default)]
    pub mix_role_ids: Vec<String>,

    #[serde(default)]
    pub details: OpenMap,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default)]
    pub service_account: bool,

    /// Managed locally rather than by the directory
    #[serde(default = "default_true")]
    pub local: bool,

    #[serde(flatten)]
    pub stamps: Stamps,
}

impl User {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            alias: vec![alias.into()],
            role_ids: Vec::new(),
            sync_role_ids: Vec::new(),
            mix_role_ids: Vec::new(),
            details: OpenMap::new(),
            disabled: false,
            service_account: false,
            local: true,
            stamps: Stamps::default(),
        }
    }

    pub fn with_roles(mut self, role_ids: Vec<String>) -> Self {
        self.role_ids = role_ids;
        self.normalize();
        self
    }

    /// Canonicalize aliases and role lists, recomputing `mix_role_ids`
    pub fn normalize(&mut self) {
        let mut alias: Vec<String> = self.alias.iter().map(|a| a.trim().to_string()).filter(|a| !a.is_empty()).collect();
        alias.sort();
        alias.dedup();
        self.alias = alias;

        self.role_ids = dedup_ids(&self.role_ids);
        self.sync_role_ids = dedup_ids(&self.sync_role_ids);

        let mut mix = self.role_ids.clone();
        mix.extend(self.sync_role_ids.iter().cloned());
        self.mix_role_ids = dedup_ids(&mix);
    }

    /// Seeds for role resolution
    pub fn seed_roles(&self) -> Vec<String> {
        let mut seeds = self.role_ids.clone();
        seeds.extend(self.sync_role_ids.iter().cloned());
        dedup_ids(&seeds)
    }
}

/// Partial user update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPatch {
    pub alias: Option<Vec<String>>,
    pub role_ids: Option<Vec<String>>,
    pub sync_role_ids: Option<Vec<String>>,
    pub details: Option<OpenMap>,
    pub disabled: Option<bool>,
    pub service_account: Option<bool>,
    pub local: Option<bool>,
}

impl UserPatch {
    pub fn apply(self, user: &mut User) {
        if let Some(alias) = self.alias {
            user.alias = alias;
        }
        if let Some(role_ids) = self.role_ids {
            user.role_ids = role_ids;
        }
        if let Some(sync_role_ids) = self.sync_role_ids {
            user.sync_role_ids = sync_role_ids;
        }
        if let Some(details) = self.details {
            user.details = details;
        }
        if let Some(disabled) = self.disabled {
            user.disabled = disabled;
        }
        if let Some(service_account) = self.service_account {
            user.service_account = service_account;
        }
        if let Some(local) = self.local {
            user.local = local;
        }
        user.normalize();
    }
}

/// A protected resource pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Doublestar glob over the request path
    pub path: String,

    /// Allowed methods; empty or `*` allows any
    #[serde(default)]
    pub methods: Vec<String>,

    /// Host globs; empty leaves the host unconstrained
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl Resource {
    pub fn new(path: impl Into<String>, methods: &[&str]) -> Self {
        Self {
            path: path.into(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            hosts: Vec::new(),
        }
    }

    pub fn with_hosts(mut self, hosts: &[&str]) -> Self {
        self.hosts = hosts.iter().map(|h| h.to_string()).collect();
        self
    }
}

/// A named set of permissions and nested roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub permission_ids: Vec<String>,

    /// Nested roles; the role graph may be cyclic
    #[serde(default)]
    pub role_ids: Vec<String>,

    #[serde(default)]
    pub data: OpenMap,

    #[serde(flatten)]
    pub stamps: Stamps,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            permission_ids: Vec::new(),
            role_ids: Vec::new(),
            data: OpenMap::new(),
            stamps: Stamps::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_permissions(mut self, permission_ids: Vec<String>) -> Self {
        self.permission_ids = permission_ids;
        self
    }

    pub fn with_roles(mut self, role_ids: Vec<String>) -> Self {
        self.role_ids = role_ids;
        self
    }

    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.permission_ids = dedup_ids(&self.permission_ids);
        self.role_ids = dedup_ids(&self.role_ids);
    }
}

/// Partial role update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permission_ids: Option<Vec<String>>,
    pub role_ids: Option<Vec<String>>,
    pub data: Option<OpenMap>,
}

impl RolePatch {
    pub fn apply(self, role: &mut Role) {
        if let Some(name) = self.name {
            role.name = name;
        }
        if let Some(description) = self.description {
            role.description = description;
        }
        if let Some(permission_ids) = self.permission_ids {
            role.permission_ids = permission_ids;
        }
        if let Some(role_ids) = self.role_ids {
            role.role_ids = role_ids;
        }
        if let Some(data) = self.data {
            role.data = data;
        }
        role.normalize();
    }
}

/// A named list of resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub resources: Vec<Resource>,

    #[serde(default)]
    pub data: OpenMap,

    #[serde(flatten)]
    pub stamps: Stamps,
}

impl Permission {
    pub fn new(name: impl Into<String>, resources: Vec<Resource>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            resources,
            data: OpenMap::new(),
            stamps: Stamps::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
    }
}

/// Partial permission update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub resources: Option<Vec<Resource>>,
    pub data: Option<OpenMap>,
}

impl PermissionPatch {
    pub fn apply(self, permission: &mut Permission) {
        if let Some(name) = self.name {
            permission.name = name;
        }
        if let Some(description) = self.description {
            permission.description = description;
        }
        if let Some(resources) = self.resources {
            permission.resources = resources;
        }
        if let Some(data) = self.data {
            permission.data = data;
        }
        permission.normalize();
    }
}

/// Maps a directory group to roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LMap {
    /// Directory group name, unique
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub role_ids: Vec<String>,

    #[serde(flatten)]
    pub stamps: Stamps,
}

impl LMap {
    pub fn new(name: impl Into<String>, role_ids: Vec<String>) -> Self {
        Self {
            name: name.into(),
            role_ids,
            stamps: Stamps::default(),
        }
    }

    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.role_ids = dedup_ids(&self.role_ids);
    }
}

/// Partial LMap update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LMapPatch {
    pub role_ids: Option<Vec<String>>,
}

impl LMapPatch {
    pub fn apply(self, lmap: &mut LMap) {
        if let Some(role_ids) = self.role_ids {
            lmap.role_ids = role_ids;
        }
        lmap.normalize();
    }
}

/// Alias cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub name: String,
    pub user_id: String,
}

/// Offset/limit pagination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of matches before pagination
    pub total: usize,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl<T> Page<T> {
    pub fn paginate(items: Vec<T>, pagination: Pagination) -> Self {
        let total = items.len();
        let items: Vec<T> = match pagination.limit {
            Some(limit) => items.into_iter().skip(pagination.offset).take(limit).collect(),
            None => items.into_iter().skip(pagination.offset).collect(),
        };
        Self {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        }
    }
}

/// Request path predicate for reverse queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessFilter {
    pub path: String,
    /// Restricts to resources allowing this method; any when absent
    pub method: Option<String>,
    pub host: Option<String>,
}

/// User query
#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    pub id: Option<String>,
    pub alias: Option<String>,
    /// Case-insensitive substring over aliases
    pub search: Option<String>,
    /// Matches users holding any of these roles
    pub role_ids: Vec<String>,
    pub disabled: Option<bool>,
    pub service_account: Option<bool>,
    pub local: Option<bool>,
    pub access: Option<AccessFilter>,
    pub pagination: Pagination,
}

/// Role query
#[derive(Debug, Clone, Default)]
pub struct RoleQuery {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Case-insensitive substring over name and description
    pub search: Option<String>,
    pub permission_ids: Vec<String>,
    pub role_ids: Vec<String>,
    pub access: Option<AccessFilter>,
    pub pagination: Pagination,
}

/// Permission query
#[derive(Debug, Clone, Default)]
pub struct PermissionQuery {
    pub id: Option<String>,
    pub name: Option<String>,
    pub search: Option<String>,
    pub access: Option<AccessFilter>,
    pub pagination: Pagination,
}

/// LMap query
#[derive(Debug, Clone, Default)]
pub struct LMapQuery {
    pub name: Option<String>,
    pub search: Option<String>,
    pub role_ids: Vec<String>,
    pub pagination: Pagination,
}
