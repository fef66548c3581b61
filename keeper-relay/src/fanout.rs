//! Distribution of changed secrets to open update streams.
//!
//! Each subscriber owns a bounded ring buffer. Publishing never blocks: a
//! subscriber that falls behind loses the oldest batches and keeps going.

use keeper_core::RemoteSecret;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Secrets changed by one operation, tagged with their owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateBatch {
    pub user_id: String,
    pub secrets: Vec<RemoteSecret>,
}

#[derive(Clone)]
pub struct UpdateHub {
    tx: broadcast::Sender<Arc<UpdateBatch>>,
    filter_by_user: bool,
}

impl UpdateHub {
    /// `capacity` is the number of batches buffered per subscriber.
    pub fn new(capacity: usize, filter_by_user: bool) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, filter_by_user }
    }

    /// Send a batch to every subscriber. Returns how many were reached.
    pub fn publish(&self, user_id: &str, secrets: Vec<RemoteSecret>) -> usize {
        if secrets.is_empty() {
            return 0;
        }

        let count = secrets.len();
        let batch = Arc::new(UpdateBatch {
            user_id: user_id.to_string(),
            secrets,
        });
        match self.tx.send(batch) {
            Ok(receivers) => {
                debug!(user_id, secrets = count, receivers, "Published update batch");
                receivers
            }
            // No open streams.
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self, user_id: &str) -> UpdateSubscription {
        UpdateSubscription {
            rx: self.tx.subscribe(),
            user_id: user_id.to_string(),
            filter_by_user: self.filter_by_user,
        }
    }
}

pub struct UpdateSubscription {
    rx: broadcast::Receiver<Arc<UpdateBatch>>,
    user_id: String,
    filter_by_user: bool,
}

impl UpdateSubscription {
    /// Next batch for this subscriber, or `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<Arc<UpdateBatch>> {
        loop {
            match self.rx.recv().await {
                Ok(batch) => {
                    if !self.filter_by_user || batch.user_id == self.user_id {
                        return Some(batch);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user_id = %self.user_id, skipped, "Update stream lagged, batches dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::models::now;

    fn secret(name: &str) -> RemoteSecret {
        RemoteSecret {
            name: name.to_string(),
            data: vec![1, 2, 3],
            hash: "h".to_string(),
            last_modified: now(),
            deleted: None,
        }
    }

    #[tokio::test]
    async fn every_subscriber_receives_batch() {
        let hub = UpdateHub::new(8, false);
        let mut a = hub.subscribe("u1");
        let mut b = hub.subscribe("u2");

        assert_eq!(hub.publish("u1", vec![secret("x")]), 2);
        assert_eq!(a.next().await.unwrap().secrets[0].name, "x");
        assert_eq!(b.next().await.unwrap().secrets[0].name, "x");
    }

    #[tokio::test]
    async fn filtered_by_owner() {
        let hub = UpdateHub::new(8, true);
        let mut alice = hub.subscribe("alice");

        hub.publish("bob", vec![secret("bobs")]);
        hub.publish("alice", vec![secret("alices")]);

        let batch = alice.next().await.unwrap();
        assert_eq!(batch.user_id, "alice");
        assert_eq!(batch.secrets[0].name, "alices");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let hub = UpdateHub::new(8, true);
        assert_eq!(hub.publish("u", vec![secret("x")]), 0);
        assert_eq!(hub.publish("u", Vec::new()), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_without_blocking() {
        let hub = UpdateHub::new(2, false);
        let mut slow = hub.subscribe("u");

        for i in 0..5 {
            hub.publish("u", vec![secret(&format!("s{i}"))]);
        }

        // Only the newest two survive in the ring.
        assert_eq!(slow.next().await.unwrap().secrets[0].name, "s3");
        assert_eq!(slow.next().await.unwrap().secrets[0].name, "s4");
    }

    #[tokio::test]
    async fn closed_hub_ends_subscription() {
        let hub = UpdateHub::new(2, false);
        let mut sub = hub.subscribe("u");
        drop(hub);
        assert!(sub.next().await.is_none());
    }
}
