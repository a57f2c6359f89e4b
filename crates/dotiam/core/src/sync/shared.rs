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

//! Replica liveness tracking
//!
//! The master records the last version and sighting of every replica from
//! their `id` gossip. A trigger waits on this table until every live replica
//! holds the published version. Replicas silent for longer than the stale
//! window drop out of the table and no longer hold the barrier.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
struct Peer {
    version: u64,
    seen: Instant,
}

/// How a wait on the replica barrier ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every live replica reached the target
    Reached,
    TimedOut,
    Cancelled,
}

/// Last known version of every live replica
#[derive(Debug)]
pub struct Shared {
    peers: Mutex<HashMap<String, Peer>>,
    notify: Notify,
    stale_window: Duration,
}

impl Shared {
    pub fn new(stale_window: Duration) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            stale_window,
        }
    }

    /// Record a replica report and wake every waiter
    pub fn report(&self, id: &str, version: u64) {
        let previous = self.peers.lock().insert(id.to_string(), Peer { version, seen: Instant::now() });
        if previous.is_none() {
            info!(replica = id, version, "Replica joined");
        }
        self.notify.notify_waiters();
    }

    /// Live replicas and their versions, ordered by id
    pub fn peers(&self) -> Vec<(String, u64)> {
        let mut peers: Vec<(String, u64)> = self.evict_stale().into_iter().map(|(id, peer)| (id, peer.version)).collect();
        peers.sort();
        peers
    }

    /// Drop stale entries and return a copy of the remaining ones
    fn evict_stale(&self) -> HashMap<String, Peer> {
        let mut peers = self.peers.lock();
        peers.retain(|id, peer| {
            let live = peer.seen.elapsed() <= self.stale_window;
            if !live {
                debug!(replica = %id, version = peer.version, "Replica went stale");
            }
            live
        });
        peers.clone()
    }

    /// `None` when every live replica holds `target`, otherwise the time
    /// until the earliest lagging replica turns stale
    fn pending(&self, target: u64) -> Option<Duration> {
        self.evict_stale()
            .values()
            .filter(|peer| peer.version < target)
            .map(|peer| self.stale_window.saturating_sub(peer.seen.elapsed()))
            .min()
    }

    /// Wait until every live replica reports at least `target`
    ///
    /// Re-evaluated on every report and at least every `poll`.
    pub async fn wait(&self, target: u64, timeout: Duration, poll: Duration, cancel: &CancellationToken) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a report between the check and the select is not lost
            notified.as_mut().enable();

            let Some(until_stale) = self.pending(target) else {
                return WaitOutcome::Reached;
            };
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }

            let tick = poll.min(deadline - now).min(until_stale.max(Duration::from_millis(1)));
            tokio::select! {
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                _ = &mut notified => {}
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const LONG: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_no_replicas_is_vacuously_reached() {
        let shared = Shared::new(LONG);
        let outcome = shared.wait(5, LONG, Duration::from_secs(1), &CancellationToken::new()).await;
        assert_eq!(outcome, WaitOutcome::Reached);
    }

    #[tokio::test]
    async fn test_report_wakes_waiter() {
        let shared = Arc::new(Shared::new(LONG));
        shared.report("replica-a", 1);

        let reporter = shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            reporter.report("replica-a", 2);
        });

        let started = std::time::Instant::now();
        let outcome = shared.wait(2, LONG, LONG, &CancellationToken::new()).await;
        assert_eq!(outcome, WaitOutcome::Reached);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_stale_replica_stops_holding_the_barrier() {
        let shared = Shared::new(Duration::from_millis(200));
        shared.report("replica-a", 1);

        let started = std::time::Instant::now();
        let outcome = shared.wait(2, LONG, Duration::from_secs(1), &CancellationToken::new()).await;
        assert_eq!(outcome, WaitOutcome::Reached);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(shared.peers().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_and_cancel() {
        let shared = Shared::new(LONG);
        shared.report("replica-a", 1);

        let outcome = shared.wait(2, Duration::from_millis(100), Duration::from_millis(20), &CancellationToken::new()).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(shared.wait(2, LONG, LONG, &cancel).await, WaitOutcome::Cancelled);
    }

    #[test]
    fn test_peers_are_sorted() {
        let shared = Shared::new(LONG);
        shared.report("b", 2);
        shared.report("a", 1);
        assert_eq!(shared.peers(), vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }
}
