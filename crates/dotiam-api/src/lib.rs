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

//! DotIAM HTTP API
//!
//! Serves authorization checks, entity management and the replication
//! endpoints of one IAM instance over hyper. On a read replica, writes are
//! forwarded to the write master and answered once the replica caught up.

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod http;
pub mod redirect;
pub mod router;
pub mod server;

pub use client::HttpMasterClient;
pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use server::ApiServer;
