//! Push stream of secret updates and the loop that applies them locally.

use crate::client::api::{ApiError, Result as ApiResult};
use crate::client::session::Session;
use crate::crypto::Cryptor;
use crate::models::{LocalSecret, RemoteSecret};
use crate::store::{LocalSecretStore, StoreError};
use crate::sync::{ConflictResolver, Resolution};
use crate::wire::{SecretBatch, CONNECTION_NUMBER_HEADER};
use crate::KeeperError;
use futures_util::future::join_all;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

pub type UpdateStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the update stream, re-authenticating once if the token is stale.
pub async fn open_update_stream(session: &Session) -> ApiResult<UpdateStream> {
    let url = session.api().updates_url();

    session
        .with_auth_retry(|call| {
            let url = url.clone();
            async move {
                let auth = call.auth();
                let mut request = url
                    .into_client_request()
                    .map_err(|e| ApiError::Transport(e.to_string()))?;

                let headers = request.headers_mut();
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", auth.token))
                        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?,
                );
                headers.insert(
                    CONNECTION_NUMBER_HEADER,
                    HeaderValue::from(auth.connection_number),
                );

                match connect_async(request).await {
                    Ok((stream, _)) => Ok(stream),
                    Err(WsError::Http(resp)) => Err(ApiError::from(resp.status())),
                    Err(e) => Err(ApiError::Transport(e.to_string())),
                }
            }
        })
        .await
}

/// What happened to one pushed secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Replaced,
    Deleted,
    /// Local copy is as new or newer.
    Kept,
    /// Tombstone for a secret this client never had.
    Ignored,
}

/// Applies pushed secrets to the local store with last-write-wins.
#[derive(Clone)]
pub struct UpdateApplier {
    store: Arc<dyn LocalSecretStore>,
    cryptor: Arc<Cryptor>,
}

impl UpdateApplier {
    pub fn new(store: Arc<dyn LocalSecretStore>, cryptor: Arc<Cryptor>) -> Self {
        Self { store, cryptor }
    }

    pub async fn apply(&self, remote: &RemoteSecret) -> Result<ApplyOutcome, KeeperError> {
        if remote.is_deleted() {
            return match self.store.delete(&remote.name).await {
                Ok(()) => Ok(ApplyOutcome::Deleted),
                Err(StoreError::NotFound(_)) => Ok(ApplyOutcome::Ignored),
                Err(e) => Err(e.into()),
            };
        }

        let local = match self.store.get(&remote.name).await {
            Ok(local) => Some(local),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        match local {
            None => {
                let secret = LocalSecret::from_remote(remote, &self.cryptor)?;
                match self.store.create(&secret).await {
                    Ok(()) => Ok(ApplyOutcome::Inserted),
                    // Created concurrently by a local write; that copy stands.
                    Err(StoreError::AlreadyExists(_)) => Ok(ApplyOutcome::Kept),
                    Err(e) => Err(e.into()),
                }
            }
            Some(local) => match ConflictResolver::resolve(local.last_modified, remote) {
                Resolution::AcceptRemote => {
                    let mut secret = LocalSecret::from_remote(remote, &self.cryptor)?;
                    secret.metadata = local.metadata;
                    self.store.update(&secret).await?;
                    Ok(ApplyOutcome::Replaced)
                }
                Resolution::KeepLocal => Ok(ApplyOutcome::Kept),
            },
        }
    }

    /// Apply every secret of a batch concurrently. Failures are logged per
    /// secret and do not stop the rest of the batch.
    pub async fn apply_batch(&self, batch: &SecretBatch) -> Vec<ApplyOutcome> {
        let results = join_all(batch.secrets.iter().map(|s| self.apply(s))).await;

        results
            .into_iter()
            .zip(&batch.secrets)
            .filter_map(|(result, secret)| match result {
                Ok(outcome) => {
                    debug!(name = %secret.name, ?outcome, "Applied pushed secret");
                    Some(outcome)
                }
                Err(e) => {
                    warn!(name = %secret.name, error = %e, "Failed to apply pushed secret");
                    None
                }
            })
            .collect()
    }
}

/// Cancellation handle for a running update loop.
pub struct UpdateHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl UpdateHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Update loop task failed");
        }
    }
}

/// Spawn the loop that drains `stream` into `applier`.
///
/// The loop ends when the stream ends, the stream fails, or the returned
/// handle is stopped.
pub fn spawn_update_loop(
    mut stream: UpdateStream,
    applier: UpdateApplier,
    connection_number: u64,
) -> UpdateHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        info!(connection_number, "Update loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!(connection_number, "Update loop cancelled");
                    let _ = stream.close(None).await;
                    break;
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SecretBatch>(&text) {
                            Ok(batch) => {
                                let outcomes = applier.apply_batch(&batch).await;
                                debug!(
                                    connection_number,
                                    received = batch.secrets.len(),
                                    applied = outcomes.len(),
                                    "Processed update batch"
                                );
                            }
                            Err(e) => warn!(connection_number, error = %e, "Malformed update batch"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(connection_number, "Update stream ended");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection_number, error = %e, "Update stream failed");
                        break;
                    }
                }
            }
        }
    });

    UpdateHandle {
        shutdown: Some(shutdown_tx),
        task,
    }
}
