//! Merge of a client-submitted batch into the relay's ledger.
//!
//! Every name seen on either side is classified with the shared
//! last-write-wins rules and handled on its own task. All tasks run to
//! completion; the first failure is returned once they have.

use crate::error::RelayError;
use crate::storage::SecretRepository;
use keeper_core::sync::{ConflictResolver, SyncAction};
use keeper_core::RemoteSecret;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Result of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Relay copies that beat (or were missing from) the client's batch.
    pub for_client: Vec<RemoteSecret>,
    /// Relay records written from the client's batch, as re-read after the write.
    pub applied: Vec<RemoteSecret>,
}

impl ReconcileOutcome {
    pub fn is_empty(&self) -> bool {
        self.for_client.is_empty() && self.applied.is_empty()
    }

    /// Everything other clients need to hear about.
    pub fn into_changed(self) -> Vec<RemoteSecret> {
        let mut changed = self.for_client;
        changed.extend(self.applied);
        changed
    }
}

enum KeyResult {
    ForClient(RemoteSecret),
    Applied(RemoteSecret),
}

#[derive(Default)]
struct Pair {
    client: Option<RemoteSecret>,
    server: Option<RemoteSecret>,
}

pub struct Reconciler {
    store: Arc<dyn SecretRepository>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn SecretRepository>) -> Self {
        Self { store }
    }

    pub async fn reconcile(
        &self,
        user_id: &str,
        client_secrets: Vec<RemoteSecret>,
    ) -> Result<ReconcileOutcome, RelayError> {
        let server_secrets = self.store.list_with_statuses(user_id).await?;

        let mut pairs: HashMap<String, Pair> =
            HashMap::with_capacity(server_secrets.len().max(client_secrets.len()));
        for secret in server_secrets {
            let name = secret.name.clone();
            pairs.entry(name).or_default().server = Some(secret);
        }
        for secret in client_secrets {
            let name = secret.name.clone();
            pairs.entry(name).or_default().client = Some(secret);
        }

        let mut tasks = JoinSet::new();
        for (name, pair) in pairs {
            let store = self.store.clone();
            let user_id = user_id.to_string();
            tasks.spawn(async move { reconcile_key(store.as_ref(), &user_id, &name, pair).await });
        }

        let mut outcome = ReconcileOutcome::default();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(RelayError::from).and_then(|r| r);
            match result {
                Ok(Some(KeyResult::ForClient(secret))) => outcome.for_client.push(secret),
                Ok(Some(KeyResult::Applied(secret))) => outcome.applied.push(secret),
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        debug!(
            user_id,
            for_client = outcome.for_client.len(),
            applied = outcome.applied.len(),
            "Reconciled client batch"
        );
        Ok(outcome)
    }
}

async fn reconcile_key(
    store: &dyn SecretRepository,
    user_id: &str,
    name: &str,
    pair: Pair,
) -> Result<Option<KeyResult>, RelayError> {
    match ConflictResolver::classify(pair.client.as_ref(), pair.server.as_ref()) {
        SyncAction::Skip => Ok(None),
        SyncAction::SendToClient => Ok(pair.server.map(KeyResult::ForClient)),
        SyncAction::Store => {
            if let Some(client) = &pair.client {
                store.upsert(user_id, client).await?;
            }
            reread(store, user_id, name).await
        }
        SyncAction::Delete => {
            if let Some(client) = &pair.client {
                store.delete(user_id, name, client.last_modified).await?;
            }
            reread(store, user_id, name).await
        }
        SyncAction::Unknown => {
            error!(
                user_id,
                name,
                client = ?pair.client.as_ref().map(|s| (s.last_modified, s.is_deleted())),
                server = ?pair.server.as_ref().map(|s| (s.last_modified, s.is_deleted())),
                "Unknown sync state"
            );
            Err(RelayError::Internal(format!("unknown sync state for {}", name)))
        }
    }
}

async fn reread(
    store: &dyn SecretRepository,
    user_id: &str,
    name: &str,
) -> Result<Option<KeyResult>, RelayError> {
    store
        .get_with_status(user_id, name)
        .await?
        .map(|secret| Some(KeyResult::Applied(secret)))
        .ok_or_else(|| RelayError::Internal(format!("secret {} vanished after write", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RelayStorage, UserRepository};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    /// Delegates to SQLite but refuses to write one name.
    struct RejectingStore {
        inner: RelayStorage,
        rejected: &'static str,
    }

    #[async_trait]
    impl SecretRepository for RejectingStore {
        async fn upsert(&self, user_id: &str, secret: &RemoteSecret) -> Result<(), RelayError> {
            if secret.name == self.rejected {
                return Err(RelayError::Database("disk full".to_string()));
            }
            self.inner.upsert(user_id, secret).await
        }

        async fn get(&self, user_id: &str, name: &str) -> Result<Option<RemoteSecret>, RelayError> {
            self.inner.get(user_id, name).await
        }

        async fn get_with_status(
            &self,
            user_id: &str,
            name: &str,
        ) -> Result<Option<RemoteSecret>, RelayError> {
            self.inner.get_with_status(user_id, name).await
        }

        async fn delete(
            &self,
            user_id: &str,
            name: &str,
            at: DateTime<Utc>,
        ) -> Result<bool, RelayError> {
            self.inner.delete(user_id, name, at).await
        }

        async fn list(&self, user_id: &str) -> Result<Vec<RemoteSecret>, RelayError> {
            self.inner.list(user_id).await
        }

        async fn list_with_statuses(&self, user_id: &str) -> Result<Vec<RemoteSecret>, RelayError> {
            self.inner.list_with_statuses(user_id).await
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn live(name: &str, t: i64) -> RemoteSecret {
        RemoteSecret {
            name: name.to_string(),
            data: format!("{name}@{t}").into_bytes(),
            hash: format!("{name}-{t}"),
            last_modified: at(t),
            deleted: None,
        }
    }

    fn dead(name: &str, t: i64) -> RemoteSecret {
        RemoteSecret::tombstone(name, at(t))
    }

    async fn setup() -> (Reconciler, RelayStorage, String) {
        let storage = RelayStorage::in_memory().unwrap();
        let user = UserRepository::create(&storage, "alice", "phc").await.unwrap();
        (Reconciler::new(Arc::new(storage.clone())), storage, user.id)
    }

    #[tokio::test]
    async fn second_pass_is_empty() {
        let (engine, storage, user) = setup().await;
        storage.upsert(&user, &live("server-only", 5)).await.unwrap();
        let batch = vec![live("client-only", 10), dead("gone", 3)];

        let first = engine.reconcile(&user, batch.clone()).await.unwrap();
        assert!(!first.is_empty());

        // Client now holds what the relay sent back.
        let mut converged = batch;
        converged.extend(first.for_client.clone());
        let second = engine.reconcile(&user, converged).await.unwrap();
        assert!(second.is_empty(), "unexpected: {second:?}");
    }

    #[tokio::test]
    async fn newer_tombstone_deletes_on_relay() {
        let (engine, storage, user) = setup().await;
        storage.upsert(&user, &live("s", 10)).await.unwrap();

        let outcome = engine.reconcile(&user, vec![dead("s", 20)]).await.unwrap();
        assert!(outcome.for_client.is_empty());
        assert_eq!(outcome.applied.len(), 1);
        assert!(outcome.applied[0].is_deleted());
        assert_eq!(outcome.applied[0].last_modified, at(20));
        assert!(storage.get(&user, "s").await.unwrap().is_none());

        let again = engine.reconcile(&user, vec![dead("s", 20)]).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn stale_client_write_rejected() {
        let (engine, storage, user) = setup().await;
        storage.upsert(&user, &live("s", 20)).await.unwrap();

        let outcome = engine.reconcile(&user, vec![live("s", 10)]).await.unwrap();
        assert_eq!(outcome.for_client, vec![live("s", 20)]);
        assert!(outcome.applied.is_empty());
        assert_eq!(storage.get(&user, "s").await.unwrap(), Some(live("s", 20)));
    }

    #[tokio::test]
    async fn stale_client_copy_of_deleted_secret_gets_tombstone() {
        let (engine, storage, user) = setup().await;
        storage.upsert(&user, &live("s", 10)).await.unwrap();
        storage.delete(&user, "s", at(30)).await.unwrap();

        let outcome = engine.reconcile(&user, vec![live("s", 10)]).await.unwrap();
        assert_eq!(outcome.for_client.len(), 1);
        assert!(outcome.for_client[0].is_deleted());
        assert!(storage.get(&user, "s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_sided_secrets() {
        let (engine, storage, user) = setup().await;
        storage.upsert(&user, &live("server", 10)).await.unwrap();

        let outcome = engine
            .reconcile(&user, vec![live("client", 10)])
            .await
            .unwrap();

        // Client-only: created on the relay, not reported back.
        assert!(outcome.for_client.iter().all(|s| s.name != "client"));
        assert_eq!(
            storage.get(&user, "client").await.unwrap(),
            Some(live("client", 10))
        );
        assert_eq!(outcome.applied, vec![live("client", 10)]);

        // Server-only: reported, relay untouched.
        assert_eq!(outcome.for_client, vec![live("server", 10)]);
        assert_eq!(
            storage.get(&user, "server").await.unwrap(),
            Some(live("server", 10))
        );
    }

    #[tokio::test]
    async fn newer_client_copy_overwrites() {
        let (engine, storage, user) = setup().await;
        storage.upsert(&user, &live("s", 10)).await.unwrap();

        let outcome = engine.reconcile(&user, vec![live("s", 20)]).await.unwrap();
        assert_eq!(outcome.applied, vec![live("s", 20)]);
        assert_eq!(storage.get(&user, "s").await.unwrap(), Some(live("s", 20)));
    }

    #[tokio::test]
    async fn equal_timestamps_are_left_alone() {
        let (engine, storage, user) = setup().await;
        storage.upsert(&user, &live("s", 10)).await.unwrap();

        let mut other = live("s", 10);
        other.data = b"different".to_vec();
        let outcome = engine.reconcile(&user, vec![other]).await.unwrap();
        assert!(outcome.is_empty());
        assert_eq!(storage.get(&user, "s").await.unwrap(), Some(live("s", 10)));
    }

    #[tokio::test]
    async fn many_keys_in_one_batch() {
        let (engine, storage, user) = setup().await;
        let batch: Vec<_> = (0..50).map(|i| live(&format!("k{i}"), i)).collect();

        let outcome = engine.reconcile(&user, batch).await.unwrap();
        assert_eq!(outcome.applied.len(), 50);
        assert_eq!(storage.list(&user).await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn failed_key_fails_batch_but_siblings_finish() {
        let storage = RelayStorage::in_memory().unwrap();
        let user = UserRepository::create(&storage, "alice", "phc").await.unwrap().id;
        let engine = Reconciler::new(Arc::new(RejectingStore {
            inner: storage.clone(),
            rejected: "broken",
        }));

        let batch: Vec<_> = ["a", "broken", "c", "d"]
            .iter()
            .enumerate()
            .map(|(i, name)| live(name, i as i64))
            .collect();
        let err = engine.reconcile(&user, batch).await.unwrap_err();
        assert!(matches!(err, RelayError::Database(_)), "unexpected: {err}");

        for name in ["a", "c", "d"] {
            let stored = storage.get(&user, name).await.unwrap();
            assert!(stored.is_some(), "{name} was not written");
        }
        assert!(storage.get(&user, "broken").await.unwrap().is_none());
    }
}
