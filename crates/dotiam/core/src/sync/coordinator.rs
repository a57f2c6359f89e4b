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

//! Master/replica replication driver

use super::client::MasterClient;
use super::message::SyncMessage;
use super::pubsub::PubSub;
use super::shared::{Shared, WaitOutcome};
use crate::backup::BackupManager;
use crate::config::SyncTiming;
use crate::error::{IamError, IamResult};
use dotiam_store::ImportMode;
use metrics::{counter, gauge};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Result of publishing a new master version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Every live replica reported the version
    Acknowledged,
    TimedOut,
    Cancelled,
    PublishFailed,
    /// Not the master, nothing to publish
    Skipped,
}

impl TriggerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerOutcome::Acknowledged => "acknowledged",
            TriggerOutcome::TimedOut => "timed_out",
            TriggerOutcome::Cancelled => "cancelled",
            TriggerOutcome::PublishFailed => "publish_failed",
            TriggerOutcome::Skipped => "skipped",
        }
    }
}

/// Race `future` against `cancel`
pub async fn cancellable<T>(cancel: &CancellationToken, operation: &str, future: impl Future<Output = IamResult<T>>) -> IamResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IamError::Cancelled { operation: operation.to_string() }),
        out = future => out,
    }
}

/// Keeps replicas in step with the write master
pub struct SyncCoordinator {
    instance_id: String,
    topic: String,
    timing: SyncTiming,
    pubsub: Arc<dyn PubSub>,
    backup: Arc<BackupManager>,
    master: Option<Arc<dyn MasterClient>>,
    shared: Shared,
    trigger_lock: Mutex<()>,
    pull_lock: Mutex<()>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("instance_id", &self.instance_id)
            .field("topic", &self.topic)
            .field("master", &self.is_master())
            .field("timing", &self.timing)
            .finish()
    }
}

impl SyncCoordinator {
    /// A coordinator without a master client acts as the write master
    pub fn new(topic: impl Into<String>, timing: SyncTiming, pubsub: Arc<dyn PubSub>, backup: Arc<BackupManager>, master: Option<Arc<dyn MasterClient>>) -> Self {
        Self {
            instance_id: Ulid::new().to_string(),
            topic: topic.into(),
            timing,
            pubsub,
            backup,
            master,
            shared: Shared::new(timing.stale_window),
            trigger_lock: Mutex::new(()),
            pull_lock: Mutex::new(()),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_master(&self) -> bool {
        self.master.is_none()
    }

    pub fn timing(&self) -> &SyncTiming {
        &self.timing
    }

    /// Replica liveness as seen by the master
    pub fn shared(&self) -> &Shared {
        &self.shared
    }

    async fn publish(&self, message: &SyncMessage, cancel: &CancellationToken) -> IamResult<()> {
        let payload = message.encode()?;
        cancellable(cancel, "publish", self.pubsub.publish(&self.topic, payload)).await
    }

    /// Announce the current version and wait for live replicas to catch up
    ///
    /// Never fails: the write being replicated is already committed, the
    /// outcome only tells how far replication got.
    pub async fn trigger(&self, cancel: &CancellationToken) -> TriggerOutcome {
        if !self.is_master() {
            return TriggerOutcome::Skipped;
        }

        let _serial = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TriggerOutcome::Cancelled,
            guard = self.trigger_lock.lock() => guard,
        };

        let version = self.backup.version();
        let outcome = match self.publish(&SyncMessage::Version { version }, cancel).await {
            Err(IamError::Cancelled { .. }) => TriggerOutcome::Cancelled,
            Err(e) => {
                warn!(version, error = %e, "Failed to publish version");
                TriggerOutcome::PublishFailed
            }
            Ok(()) => match self.shared.wait(version, self.timing.wait_timeout, self.timing.poll_interval, cancel).await {
                WaitOutcome::Reached => TriggerOutcome::Acknowledged,
                WaitOutcome::TimedOut => TriggerOutcome::TimedOut,
                WaitOutcome::Cancelled => TriggerOutcome::Cancelled,
            },
        };

        counter!("dotiam_sync_triggers_total", 1, "outcome" => outcome.as_str());
        match outcome {
            TriggerOutcome::Acknowledged => debug!(version, "Replicas acknowledged"),
            other => warn!(version, outcome = other.as_str(), lagging = ?self.shared.peers(), "Replication not acknowledged"),
        }
        outcome
    }

    /// Publish this instance's id and version
    pub async fn heartbeat(&self, cancel: &CancellationToken) -> IamResult<()> {
        let version = self.backup.version();
        gauge!("dotiam_store_version", version as f64);
        self.publish(&SyncMessage::id(self.instance_id.clone(), version), cancel).await
    }

    /// Consume sync gossip until cancelled or the topic closes
    pub async fn listen(&self, cancel: &CancellationToken) -> IamResult<()> {
        let mut subscription = cancellable(cancel, "subscribe", self.pubsub.subscribe(&self.topic)).await?;
        info!(topic = %self.topic, instance = %self.instance_id, master = self.is_master(), "Listening for sync messages");

        loop {
            let payload = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                payload = subscription.next() => payload,
            };
            let Some(payload) = payload else {
                warn!(topic = %self.topic, "Sync topic closed");
                return Ok(());
            };

            match SyncMessage::decode(&payload) {
                Ok(message) => self.handle(message, cancel).await,
                Err(e) => warn!(error = %e, "Ignoring malformed sync message"),
            }
        }
    }

    /// React to one gossip message
    pub async fn handle(&self, message: SyncMessage, cancel: &CancellationToken) {
        match message {
            SyncMessage::Id { ref id, .. } if *id == self.instance_id => {}
            SyncMessage::Id { id, version } if self.is_master() => self.shared.report(&id, version),
            SyncMessage::Version { version } if self.is_master() => {
                debug!(version, "Ignoring version announcement on the master");
            }
            message => {
                let local = self.backup.version();
                if message.version() <= local {
                    return;
                }
                debug!(local, remote = message.version(), "Replica behind, pulling");
                if let Err(e) = self.pull(cancel).await {
                    // Retried on the next gossip
                    warn!(local, remote = message.version(), error = %e, "Replica pull failed");
                }
            }
        }
    }

    /// Fetch everything newer than the local version from the master,
    /// restore it, and report the new version
    ///
    /// An unhealthy replica fetches a full export instead.
    pub async fn pull(&self, cancel: &CancellationToken) -> IamResult<u64> {
        let Some(master) = self.master.as_ref() else {
            return Ok(self.backup.version());
        };

        let _serial = cancellable(cancel, "pull", async { Ok(self.pull_lock.lock().await) }).await?;
        let since = if self.backup.is_healthy() { self.backup.version() } else { 0 };
        let bytes = cancellable(cancel, "fetch backup", master.fetch_backup(since)).await?;

        let backup = self.backup.clone();
        let version = tokio::task::spawn_blocking(move || backup.restore(&mut bytes.as_slice(), ImportMode::Preserve)).await.map_err(|e| IamError::Backup {
            operation: "restore".to_string(),
            message: e.to_string(),
        })??;

        counter!("dotiam_sync_pulls_total", 1);
        info!(since, version, "Replica caught up");

        if let Err(e) = self.heartbeat(cancel).await {
            warn!(version, error = %e, "Failed to report version after pull");
        }
        Ok(version)
    }

    /// Pull until the local version reaches `target`; 0 means the master's current version
    pub async fn sync(&self, target: u64, cancel: &CancellationToken) -> IamResult<u64> {
        let Some(master) = self.master.as_ref() else {
            return Ok(self.backup.version());
        };

        let target = match target {
            0 => cancellable(cancel, "fetch version", master.fetch_version()).await?,
            target => target,
        };
        if self.backup.version() >= target {
            return Ok(self.backup.version());
        }

        let version = self.pull(cancel).await?;
        if version < target {
            return Err(IamError::transport("sync", format!("master served version {} below requested {}", version, target)));
        }
        Ok(version)
    }
}
