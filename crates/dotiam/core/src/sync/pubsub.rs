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

//! Pub/sub transport seam

use crate::error::IamResult;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 256;

/// Topic-based message bus shared by every instance
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> IamResult<()>;

    async fn subscribe(&self, topic: &str) -> IamResult<Box<dyn Subscription>>;
}

/// A live subscription to one topic
#[async_trait]
pub trait Subscription: Send {
    /// Next payload, or `None` once the topic is closed
    async fn next(&mut self) -> Option<Vec<u8>>;
}

/// Process-local bus, one broadcast channel per topic
#[derive(Debug, Default)]
pub struct InMemoryPubSub {
    topics: DashMap<String, broadcast::Sender<Vec<u8>>>,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        self.topics.entry(topic.to_string()).or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0).clone()
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> IamResult<()> {
        // No receivers is not an error: nobody is listening yet
        if let Err(e) = self.sender(topic).send(payload) {
            debug!(topic, "Published without subscribers: {}", e);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> IamResult<Box<dyn Subscription>> {
        Ok(Box::new(BroadcastSubscription {
            topic: topic.to_string(),
            receiver: self.sender(topic).subscribe(),
        }))
    }
}

struct BroadcastSubscription {
    topic: String,
    receiver: broadcast::Receiver<Vec<u8>>,
}

#[async_trait]
impl Subscription for BroadcastSubscription {
    async fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_published_payloads() {
        let bus = InMemoryPubSub::new();
        let mut first = bus.subscribe("iam").await.unwrap();
        let mut second = bus.subscribe("iam").await.unwrap();
        let mut other = bus.subscribe("other").await.unwrap();

        bus.publish("iam", b"hello".to_vec()).await.unwrap();
        bus.publish("other", b"elsewhere".to_vec()).await.unwrap();

        assert_eq!(first.next().await.unwrap(), b"hello");
        assert_eq!(second.next().await.unwrap(), b"hello");
        assert_eq!(other.next().await.unwrap(), b"elsewhere");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let bus = InMemoryPubSub::new();
        assert!(bus.publish("iam", b"lost".to_vec()).await.is_ok());
    }
}
