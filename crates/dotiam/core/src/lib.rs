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

//! DotIAM engine
//!
//! Identity and access management over a versioned key-value store:
//! - Users, roles, permissions and directory group mappings (LMaps)
//! - Role graph resolution and glob-based resource matching
//! - Read-only authorization checks
//! - Versioned backup/restore and master/replica replication over pub/sub

pub mod backup;
pub mod check;
pub mod config;
pub mod directory;
pub mod error;
pub mod matcher;
pub mod models;
pub mod repository;
pub mod resolver;
pub mod service;
pub mod sync;

pub use backup::BackupManager;
pub use check::{CheckRequest, CheckResponse, CheckService, deny_on_error};
pub use config::{IamConfig, SyncTiming};
pub use directory::{Directory, DirectorySummary, DirectorySync, DirectoryUser};
pub use error::{IamError, IamResult};
pub use matcher::AccessMatcher;
pub use models::*;
pub use repository::Repository;
pub use resolver::{Resolution, RoleResolver};
pub use service::{IamService, SYSTEM_ACTOR, Written};
pub use sync::{InMemoryPubSub, MasterClient, PubSub, SyncCoordinator, SyncMessage, TriggerOutcome};
