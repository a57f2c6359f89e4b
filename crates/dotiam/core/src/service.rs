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

//! Engine wiring
//!
//! `IamService` owns every component of one instance and is shared by
//! `Arc`. Writes are accepted only on the write master; each successful
//! write is followed by a replication trigger.

use crate::backup::BackupManager;
use crate::check::{CheckRequest, CheckResponse, CheckService};
use crate::config::IamConfig;
use crate::directory::{Directory, DirectorySummary, DirectorySync};
use crate::error::{IamError, IamResult};
use crate::matcher::AccessMatcher;
use crate::models::User;
use crate::repository::Repository;
use crate::resolver::RoleResolver;
use crate::sync::{MasterClient, PubSub, SyncCoordinator, TriggerOutcome};
use dotiam_store::{ImportMode, Store};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Actor recorded for writes the engine makes on its own
pub const SYSTEM_ACTOR: &str = "system";

/// A committed write and how far it replicated
#[derive(Debug, Clone, PartialEq)]
pub struct Written<T> {
    pub value: T,
    /// Master version after the write
    pub version: u64,
    pub replication: TriggerOutcome,
}

/// One IAM instance
#[derive(Debug)]
pub struct IamService {
    config: IamConfig,
    repository: Arc<Repository>,
    checks: CheckService,
    backup: Arc<BackupManager>,
    coordinator: Arc<SyncCoordinator>,
    directory: Option<DirectorySync>,
}

impl IamService {
    /// Wire an instance; replicas need a client for the write master
    pub fn new(config: IamConfig, store: Arc<dyn Store>, pubsub: Arc<dyn PubSub>, master: Option<Arc<dyn MasterClient>>, directory: Option<Arc<dyn Directory>>) -> IamResult<Self> {
        if config.is_master() != master.is_none() {
            return Err(IamError::invalid("a master client is required exactly when a write API is configured"));
        }

        let backup = Arc::new(BackupManager::new(store.clone()));
        let resolver = RoleResolver::new(config.max_resolved_roles);
        let repository = Arc::new(Repository::new(store, backup.clone(), resolver, Arc::new(AccessMatcher::new())));
        let coordinator = Arc::new(SyncCoordinator::new(config.sync_topic.clone(), config.timing, pubsub, backup.clone(), master));

        info!(
            instance = %coordinator.instance_id(),
            master = config.is_master(),
            write_api = ?config.write_api,
            topic = %config.sync_topic,
            "IAM service initialized"
        );

        Ok(Self {
            checks: CheckService::new(repository.clone()),
            directory: directory.map(DirectorySync::new),
            config,
            repository,
            backup,
            coordinator,
        })
    }

    pub fn config(&self) -> &IamConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn backup(&self) -> &Arc<BackupManager> {
        &self.backup
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn is_master(&self) -> bool {
        self.coordinator.is_master()
    }

    pub fn version(&self) -> u64 {
        self.backup.version()
    }

    pub fn is_healthy(&self) -> bool {
        self.backup.is_healthy()
    }

    fn ensure_master(&self) -> IamResult<()> {
        match &self.config.write_api {
            None => Ok(()),
            Some(write_api) => Err(IamError::ReadOnly {
                message: format!("writes are served by {}", write_api),
            }),
        }
    }

    async fn replicate<T>(&self, value: T, cancel: &CancellationToken) -> Written<T> {
        let version = self.backup.version();
        let replication = self.coordinator.trigger(cancel).await;
        Written { value, version, replication }
    }

    /// Run a repository mutation on the master and replicate it
    pub async fn write<T>(&self, actor: &str, cancel: &CancellationToken, f: impl FnOnce(&Repository, &str) -> IamResult<T>) -> IamResult<Written<T>> {
        self.ensure_master()?;
        let value = f(&self.repository, actor)?;
        Ok(self.replicate(value, cancel).await)
    }

    /// Answer an authorization check
    pub fn check(&self, request: &CheckRequest) -> IamResult<CheckResponse> {
        if !self.is_healthy() {
            return Err(IamError::Unavailable {
                message: "store is inconsistent after a failed restore".to_string(),
            });
        }
        self.checks.check(request)
    }

    /// Export records written after `since`
    pub fn export(&self, since: u64) -> IamResult<(u64, Vec<u8>)> {
        let mut buf = Vec::new();
        let version = self.backup.backup(&mut buf, since)?;
        Ok((version, buf))
    }

    /// Import an export stream on the master and replicate it
    ///
    /// Imported records are restamped with one new version, so replicas pull
    /// them like any other write. Replicas only restore through their pulls.
    pub async fn restore(&self, bytes: Vec<u8>, cancel: &CancellationToken) -> IamResult<Written<u64>> {
        self.ensure_master()?;
        let backup = self.backup.clone();
        let version = tokio::task::spawn_blocking(move || backup.restore(&mut bytes.as_slice(), ImportMode::Restamp)).await.map_err(|e| IamError::Backup {
            operation: "restore".to_string(),
            message: e.to_string(),
        })??;
        Ok(self.replicate(version, cancel).await)
    }

    /// Bring this instance to `target`, 0 meaning the master's current version
    pub async fn sync(&self, target: u64, cancel: &CancellationToken) -> IamResult<u64> {
        self.coordinator.sync(target, cancel).await
    }

    fn directory(&self) -> IamResult<&DirectorySync> {
        self.directory.as_ref().ok_or_else(|| IamError::invalid("no directory is configured"))
    }

    pub async fn sync_directory_user(&self, actor: &str, alias: &str, cancel: &CancellationToken) -> IamResult<Written<User>> {
        self.ensure_master()?;
        let user = self.directory()?.sync_user(&self.repository, actor, alias, cancel).await?;
        Ok(self.replicate(user, cancel).await)
    }

    pub async fn sync_directory(&self, actor: &str, cancel: &CancellationToken) -> IamResult<Written<DirectorySummary>> {
        self.ensure_master()?;
        let summary = self.directory()?.sync_all(&self.repository, actor, cancel).await?;
        Ok(self.replicate(summary, cancel).await)
    }

    /// One heartbeat tick: repair the alias cache on the master if a check
    /// found it stale, then report this instance's version
    pub async fn heartbeat(&self, cancel: &CancellationToken) {
        if self.is_master() && self.repository.take_alias_repair() {
            match self.repository.rebuild_alias_index(SYSTEM_ACTOR) {
                Ok(entries) => {
                    info!(entries, "Alias cache repaired");
                    self.replicate((), cancel).await;
                }
                Err(e) => {
                    self.repository.request_alias_repair();
                    warn!(error = %e, "Alias cache repair failed");
                }
            }
        }
        if let Err(e) = self.coordinator.heartbeat(cancel).await {
            warn!(error = %e, "Heartbeat publish failed");
        }
    }

    /// Spawn the listen and heartbeat loops; both stop when `cancel` fires
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let listener = {
            let service = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let retry = service.config.timing.heartbeat_interval;
                while !cancel.is_cancelled() {
                    match service.coordinator.listen(&cancel).await {
                        Ok(()) if cancel.is_cancelled() => break,
                        Ok(()) => warn!("Sync listener stopped, resubscribing"),
                        Err(e) => error!(error = %e, "Sync listener failed, resubscribing"),
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(retry) => {}
                    }
                }
                info!("Sync listener stopped");
            })
        };

        let heartbeat = {
            let service = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(service.config.timing.heartbeat_interval);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => service.heartbeat(&cancel).await,
                    }
                }
                info!("Heartbeat stopped");
            })
        };

        vec![listener, heartbeat]
    }
}
