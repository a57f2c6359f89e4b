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

//! Directory-driven role assignment
//!
//! External directory groups map to roles through LMaps. A group seen for
//! the first time gets an LMap and a paired role named after it, so
//! administrators only attach permissions to that role.

use crate::error::IamResult;
use crate::models::{LMap, OpenMap, User};
use crate::repository::Repository;
use crate::sync::cancellable;
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A user as listed by the directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub alias: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub details: OpenMap,
}

/// External identity directory
#[async_trait]
pub trait Directory: Send + Sync {
    /// Groups the user owning `alias` belongs to
    async fn groups(&self, alias: &str) -> IamResult<Vec<String>>;

    /// Every user the directory lists
    async fn users(&self) -> IamResult<Vec<DirectoryUser>>;
}

/// Outcome of a full directory pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySummary {
    pub users: usize,
    pub groups: usize,
    pub cleared: usize,
}

/// Applies directory group membership to the repository
#[derive(Clone)]
pub struct DirectorySync {
    directory: Arc<dyn Directory>,
}

impl std::fmt::Debug for DirectorySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectorySync").finish_non_exhaustive()
    }
}

impl DirectorySync {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// The LMap of a group, created with its paired role on first sight
    pub fn ensure_group(&self, repository: &Repository, actor: &str, group: &str) -> IamResult<LMap> {
        repository.ensure_lmap(actor, group)
    }

    fn apply(&self, repository: &Repository, actor: &str, user: DirectoryUser) -> IamResult<User> {
        let mut role_ids = Vec::new();
        for group in user.groups.iter().filter(|g| !g.trim().is_empty()) {
            role_ids.extend(self.ensure_group(repository, actor, group)?.role_ids);
        }
        let details = (!user.details.is_empty()).then_some(user.details);
        debug!(alias = %user.alias, groups = user.groups.len(), roles = role_ids.len(), "Applying directory groups");
        repository.set_directory_roles(actor, &user.alias, role_ids, details)
    }

    /// Refresh the directory roles of one user
    pub async fn sync_user(&self, repository: &Repository, actor: &str, alias: &str, cancel: &CancellationToken) -> IamResult<User> {
        let groups = cancellable(cancel, "directory groups", self.directory.groups(alias)).await?;
        let user = self.apply(
            repository,
            actor,
            DirectoryUser {
                alias: alias.to_string(),
                groups,
                ..Default::default()
            },
        )?;
        counter!("dotiam_directory_user_syncs_total", 1);
        Ok(user)
    }

    /// Refresh every listed user and clear roles of users no longer listed
    pub async fn sync_all(&self, repository: &Repository, actor: &str, cancel: &CancellationToken) -> IamResult<DirectorySummary> {
        let users = cancellable(cancel, "directory users", self.directory.users()).await?;

        let mut listed = HashSet::new();
        let mut groups = BTreeSet::new();
        for user in users {
            if user.alias.trim().is_empty() {
                continue;
            }
            listed.insert(user.alias.clone());
            groups.extend(user.groups.iter().cloned());
            self.apply(repository, actor, user)?;
        }

        let cleared = repository.clear_directory_roles(actor, &listed)?;
        let summary = DirectorySummary {
            users: listed.len(),
            groups: groups.len(),
            cleared,
        };
        info!(users = summary.users, groups = summary.groups, cleared, actor, "Directory sync complete");
        Ok(summary)
    }
}
