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

//! Replication between the write master and read replicas
//!
//! The master announces every committed version on a pub/sub topic and
//! waits, bounded, for live replicas to report it. Replicas pull the
//! missing records as an incremental backup from the master and restore
//! them locally.

pub mod client;
pub mod coordinator;
pub mod message;
pub mod pubsub;
pub mod shared;

pub use client::MasterClient;
pub use coordinator::{SyncCoordinator, TriggerOutcome, cancellable};
pub use message::SyncMessage;
pub use pubsub::{InMemoryPubSub, PubSub, Subscription};
pub use shared::{Shared, WaitOutcome};
