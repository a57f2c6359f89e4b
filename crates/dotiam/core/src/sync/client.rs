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

//! Write-master API seam used by replicas

use crate::error::IamResult;
use async_trait::async_trait;

/// Remote calls a replica makes against the write master
#[async_trait]
pub trait MasterClient: Send + Sync {
    /// Export stream of every record written after `since`
    async fn fetch_backup(&self, since: u64) -> IamResult<Vec<u8>>;

    /// The master's current version
    async fn fetch_version(&self) -> IamResult<u64>;
}
