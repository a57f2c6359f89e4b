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

//! Role resolution
//!
//! Breadth-first closure over the role graph. Every id is expanded at most
//! once, so resolution terminates on cyclic graphs.

use crate::error::{IamResult, StoreContext};
use crate::models::Role;
use crate::repository::{load, tables};
use dotiam_store::ReadTxn;
use std::collections::BTreeSet;
use tracing::warn;

/// Result of a closure computation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub roles: BTreeSet<String>,
    /// The visit cap was reached before the frontier emptied
    pub truncated: bool,
}

/// Breadth-first closure of `seeds` under `expand`
///
/// `expand` receives a whole frontier and returns its neighbours. With a
/// `max` cap the result holds at most `max` ids (seeds included when they
/// fit) and is flagged as truncated.
pub fn bfs_closure<I, F>(seeds: I, max: Option<usize>, mut expand: F) -> IamResult<Resolution>
where
    I: IntoIterator<Item = String>,
    F: FnMut(&[String]) -> IamResult<Vec<String>>,
{
    let mut resolution = Resolution::default();
    let mut frontier = Vec::new();
    let full = |resolution: &Resolution| max.is_some_and(|max| resolution.roles.len() >= max);

    for seed in seeds {
        if resolution.roles.contains(&seed) {
            continue;
        }
        if full(&resolution) {
            resolution.truncated = true;
            break;
        }
        resolution.roles.insert(seed.clone());
        frontier.push(seed);
    }

    while !frontier.is_empty() && !resolution.truncated {
        let mut next = Vec::new();
        for id in expand(&frontier)? {
            if resolution.roles.contains(&id) {
                continue;
            }
            if full(&resolution) {
                resolution.truncated = true;
                break;
            }
            resolution.roles.insert(id.clone());
            next.push(id);
        }
        frontier = next;
    }

    Ok(resolution)
}

/// Store-backed role resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleResolver {
    max_roles: Option<usize>,
}

impl RoleResolver {
    pub fn new(max_roles: Option<usize>) -> Self {
        Self { max_roles }
    }

    pub fn max_roles(&self) -> Option<usize> {
        self.max_roles
    }

    /// Roles reachable from `seeds` through nested `role_ids`
    pub fn resolve<R: ReadTxn + ?Sized>(&self, txn: &R, seeds: &[String]) -> IamResult<Resolution> {
        let resolution = bfs_closure(seeds.iter().cloned(), self.max_roles, |frontier| {
            let mut nested = Vec::new();
            for id in frontier {
                if let Some(role) = load::<Role, R>(txn, tables::ROLES, id)? {
                    nested.extend(role.role_ids);
                }
            }
            Ok(nested)
        })?;

        if resolution.truncated {
            warn!(seeds = seeds.len(), max = ?self.max_roles, "Role resolution truncated");
        }
        Ok(resolution)
    }

    /// Roles whose closure contains any of `targets` (targets included)
    pub fn reaching<R: ReadTxn + ?Sized>(&self, txn: &R, targets: &[String]) -> IamResult<Resolution> {
        bfs_closure(targets.iter().cloned(), self.max_roles, |frontier| {
            let mut parents = Vec::new();
            for id in frontier {
                parents.extend(txn.find_by_index(tables::ROLES, tables::IDX_ROLE, id).op("find parent roles")?);
            }
            Ok(parents)
        })
    }
}
