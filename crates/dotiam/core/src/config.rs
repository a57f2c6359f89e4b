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

//! Engine configuration

use std::env;
use std::time::Duration;

/// Interval between self-heartbeats
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(4);

/// Upper bound on how long a trigger waits for replicas
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Replicas silent for longer than this are treated as dead
pub const STALE_WINDOW: Duration = Duration::from_secs(10);

/// Maximum delay between two evaluations of the wait barrier
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default pub/sub topic
pub const DEFAULT_SYNC_TOPIC: &str = "iam";

/// Replication timing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTiming {
    pub heartbeat_interval: Duration,
    pub wait_timeout: Duration,
    pub stale_window: Duration,
    pub poll_interval: Duration,
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            wait_timeout: WAIT_TIMEOUT,
            stale_window: STALE_WINDOW,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Configuration for the IAM engine
#[derive(Debug, Clone)]
pub struct IamConfig {
    /// Base URL of the write master; `None` makes this instance the master
    pub write_api: Option<String>,

    /// Pub/sub topic used for version gossip
    pub sync_topic: String,

    /// Replication timing
    pub timing: SyncTiming,

    /// Optional cap on the number of roles a single resolution may visit
    pub max_resolved_roles: Option<usize>,
}

impl Default for IamConfig {
    fn default() -> Self {
        Self {
            write_api: None,
            sync_topic: DEFAULT_SYNC_TOPIC.to_string(),
            timing: SyncTiming::default(),
            max_resolved_roles: None,
        }
    }
}

fn duration_ms(name: &str, default: Duration) -> Duration {
    env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_millis).unwrap_or(default)
}

impl IamConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            write_api: env::var("DOTIAM_WRITE_API").ok().map(|v| v.trim().trim_end_matches('/').to_string()).filter(|v| !v.is_empty()),

            sync_topic: env::var("DOTIAM_SYNC_TOPIC").unwrap_or_else(|_| DEFAULT_SYNC_TOPIC.to_string()),

            timing: SyncTiming {
                heartbeat_interval: duration_ms("DOTIAM_HEARTBEAT_INTERVAL_MS", HEARTBEAT_INTERVAL),
                wait_timeout: duration_ms("DOTIAM_WAIT_TIMEOUT_MS", WAIT_TIMEOUT),
                stale_window: duration_ms("DOTIAM_STALE_WINDOW_MS", STALE_WINDOW),
                poll_interval: duration_ms("DOTIAM_POLL_INTERVAL_MS", POLL_INTERVAL),
            },

            max_resolved_roles: env::var("DOTIAM_MAX_RESOLVED_ROLES").ok().and_then(|v| v.parse().ok()).filter(|v| *v > 0),
        }
    }

    /// Whether this instance owns the mutable store
    pub fn is_master(&self) -> bool {
        self.write_api.is_none()
    }
}
