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

//! Replication messages exchanged over pub/sub

use crate::error::IamResult;
use serde::{Deserialize, Serialize};

/// Gossip published on the sync topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncMessage {
    /// Liveness report of one instance and the version it holds
    Id { id: String, version: u64 },
    /// Announcement of a new master version
    Version { version: u64 },
}

impl SyncMessage {
    pub fn id(id: impl Into<String>, version: u64) -> Self {
        SyncMessage::Id { id: id.into(), version }
    }

    pub fn version(&self) -> u64 {
        match self {
            SyncMessage::Id { version, .. } | SyncMessage::Version { version } => *version,
        }
    }

    pub fn encode(&self) -> IamResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> IamResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
