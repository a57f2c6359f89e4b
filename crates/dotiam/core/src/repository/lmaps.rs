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

//! Directory group mappings

use super::roles::{ensure_named_role, ensure_roles_exist};
use super::{Entity, Repository, load, save, tables};
use crate::error::{IamError, IamResult, StoreContext};
use crate::models::{LMap, LMapPatch, Stamps};
use dotiam_store::{IndexEntry, ReadTxn, WriteTxn};
use tracing::info;

impl Entity for LMap {
    const TABLE: &'static str = tables::LMAPS;
    const KIND: &'static str = "lmap";

    fn key(&self) -> &str {
        &self.name
    }

    fn indexes(&self) -> Vec<IndexEntry> {
        self.role_ids.iter().map(|id| IndexEntry::new(tables::IDX_ROLE, id.clone())).collect()
    }
}

fn require_lmap<R: ReadTxn + ?Sized>(txn: &R, name: &str) -> IamResult<LMap> {
    load(txn, tables::LMAPS, name)?.ok_or_else(|| IamError::not_found(LMap::KIND, name))
}

fn store_lmap(txn: &mut dyn WriteTxn, lmap: &LMap) -> IamResult<()> {
    ensure_roles_exist(&*txn, &lmap.role_ids)?;
    save(txn, lmap)
}

impl Repository {
    pub fn create_lmap(&self, actor: &str, mut lmap: LMap) -> IamResult<LMap> {
        lmap.normalize();
        if lmap.name.is_empty() {
            return Err(IamError::invalid("group name must not be empty"));
        }
        lmap.stamps = Stamps::created(actor);

        let lmap = self.write("create lmap", |txn| {
            if txn.contains(tables::LMAPS, &lmap.name).op("create lmap")? {
                return Err(IamError::conflict(format!("group '{}' is already mapped", lmap.name)));
            }
            store_lmap(txn, &lmap)?;
            Ok(lmap)
        })?;

        info!(name = %lmap.name, actor, "LMap created");
        Ok(lmap)
    }

    pub fn get_lmap(&self, name: &str) -> IamResult<LMap> {
        self.read(|txn| require_lmap(txn, name))
    }

    pub fn patch_lmap(&self, actor: &str, name: &str, patch: LMapPatch) -> IamResult<LMap> {
        let lmap = self.write("patch lmap", |txn| {
            let mut lmap = require_lmap(&*txn, name)?;
            patch.apply(&mut lmap);
            lmap.stamps.touch(actor);
            store_lmap(txn, &lmap)?;
            Ok(lmap)
        })?;

        info!(name, actor, "LMap patched");
        Ok(lmap)
    }

    /// Replace a mapping; the group name comes from the key
    pub fn put_lmap(&self, actor: &str, name: &str, mut lmap: LMap) -> IamResult<LMap> {
        lmap.name = name.to_string();
        lmap.normalize();

        let lmap = self.write("put lmap", |txn| {
            let previous = require_lmap(&*txn, name)?;
            lmap.stamps = previous.stamps;
            lmap.stamps.touch(actor);
            store_lmap(txn, &lmap)?;
            Ok(lmap)
        })?;

        info!(name, actor, "LMap replaced");
        Ok(lmap)
    }

    pub fn delete_lmap(&self, actor: &str, name: &str) -> IamResult<LMap> {
        let lmap = self.write("delete lmap", |txn| {
            let lmap = require_lmap(&*txn, name)?;
            txn.delete(tables::LMAPS, name).op("delete lmap")?;
            Ok(lmap)
        })?;

        info!(name, actor, "LMap deleted");
        Ok(lmap)
    }

    /// Mapping for a directory group, created together with a paired role
    /// named after the group the first time the group is seen
    pub fn ensure_lmap(&self, actor: &str, group: &str) -> IamResult<LMap> {
        let group = group.trim();
        if group.is_empty() {
            return Err(IamError::invalid("group name must not be empty"));
        }

        self.write("ensure lmap", |txn| {
            if let Some(lmap) = load::<LMap, _>(&*txn, tables::LMAPS, group)? {
                return Ok(lmap);
            }

            let role_id = ensure_named_role(txn, actor, group, &format!("Directory group {}", group))?;
            let mut lmap = LMap::new(group, vec![role_id]);
            lmap.stamps = Stamps::created(actor);
            store_lmap(txn, &lmap)?;
            info!(group, actor, "Directory group mapped");
            Ok(lmap)
        })
    }
}
