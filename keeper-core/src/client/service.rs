//! High-level client: local store plus relay, kept in step.

use crate::client::api::ApiClient;
use crate::client::session::Session;
use crate::client::updates::{
    open_update_stream, spawn_update_loop, ApplyOutcome, UpdateApplier, UpdateHandle,
};
use crate::config::ClientConfig;
use crate::crypto::Cryptor;
use crate::models::{now, LocalSecret, RemoteSecret};
use crate::secrets::{SecretData, Validate};
use crate::store::{LocalSecretStore, SqliteSecretStore};
use crate::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Client facade.
///
/// Every secret is written locally first and then pushed to the relay.
/// After [`KeeperClient::login`] a background loop applies updates pushed
/// by the relay until [`KeeperClient::close`] is called.
pub struct KeeperClient {
    cryptor: Arc<Cryptor>,
    store: Arc<dyn LocalSecretStore>,
    session: Session,
    updates: Mutex<Option<UpdateHandle>>,
}

impl KeeperClient {
    /// Open the SQLite store named in `config` and connect to the relay.
    pub async fn from_config(config: &ClientConfig) -> Result<Self> {
        let cryptor = Arc::new(Cryptor::with_params(
            config.password.clone(),
            config.login.clone(),
            config.kdf_params,
        ));
        let store = Arc::new(SqliteSecretStore::open(&config.db_path, cryptor.clone())?);
        let api = ApiClient::new(&config.server_addr)?;
        Self::new(cryptor, store, api).await
    }

    /// Connect with an explicit store and relay client.
    ///
    /// The relay only ever receives the derived server password.
    pub async fn new(
        cryptor: Arc<Cryptor>,
        store: Arc<dyn LocalSecretStore>,
        api: ApiClient,
    ) -> Result<Self> {
        let server_password = cryptor.generate_server_password()?;
        let session = Session::connect(api, cryptor.login().to_string(), server_password).await?;

        Ok(Self {
            cryptor,
            store,
            session,
            updates: Mutex::new(None),
        })
    }

    pub fn connection_number(&self) -> u64 {
        self.session.connection_number()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Register this login with the relay. Returns the new user ID.
    pub async fn register(&self) -> Result<String> {
        let user_id = self.session.register().await?;
        info!(login = self.cryptor.login(), "Registered");
        Ok(user_id)
    }

    /// Authenticate, open the update stream and start applying pushed
    /// updates. A previous update loop, if any, is stopped first.
    pub async fn login(&self) -> Result<()> {
        self.session.login().await?;

        let stream = open_update_stream(&self.session).await?;
        let applier = UpdateApplier::new(self.store.clone(), self.cryptor.clone());
        let handle = spawn_update_loop(stream, applier, self.session.connection_number());

        if let Some(previous) = self.updates.lock().await.replace(handle) {
            previous.stop().await;
        }
        info!(login = self.cryptor.login(), "Logged in");
        Ok(())
    }

    /// Validate, persist locally, then push to the relay.
    ///
    /// Fails with an already-exists error if the name is taken locally.
    pub async fn create_secret(
        &self,
        name: &str,
        data: &SecretData,
        metadata: &str,
    ) -> Result<LocalSecret> {
        let secret = LocalSecret::new(&self.cryptor, name, data, metadata)?;
        self.store.create(&secret).await?;
        self.push(&secret).await?;
        Ok(secret)
    }

    /// Fetch the relay's copy of a secret that exists locally and decrypt it.
    pub async fn read_secret(&self, name: &str) -> Result<LocalSecret> {
        let local = self.store.get(name).await?;

        let remote = self
            .session
            .with_auth_retry(|call| async move { call.api.get_secret(call.auth(), name).await })
            .await?;

        let mut secret = LocalSecret::from_remote(&remote, &self.cryptor)?;
        secret.metadata = local.metadata;
        Ok(secret)
    }

    /// Replace the payload of an existing secret with a fresh timestamp.
    pub async fn update_secret(
        &self,
        name: &str,
        data: &SecretData,
        metadata: &str,
    ) -> Result<LocalSecret> {
        data.validate()?;

        let mut secret = self.store.get(name).await?;
        secret.metadata = metadata.to_string();
        secret.set_data(&self.cryptor, data)?;
        secret.last_modified = now();

        self.store.update(&secret).await?;
        self.push(&secret).await?;
        Ok(secret)
    }

    /// Remove locally, then tombstone on the relay.
    pub async fn delete_secret(&self, name: &str) -> Result<()> {
        self.store.delete(name).await?;
        self.session
            .with_auth_retry(|call| async move { call.api.delete_secret(call.auth(), name).await })
            .await?;
        Ok(())
    }

    pub async fn list_local_secrets(&self) -> Result<Vec<LocalSecret>> {
        Ok(self.store.get_all().await?)
    }

    /// Live secrets on the relay, without payloads, newest first.
    pub async fn list_remote_secrets(&self) -> Result<Vec<RemoteSecret>> {
        Ok(self
            .session
            .with_auth_retry(|call| async move { call.api.list_secrets(call.auth()).await })
            .await?)
    }

    /// Send every local secret through relay reconciliation and apply the
    /// relay copies that won to the local store.
    pub async fn sync_secrets(&self) -> Result<Vec<ApplyOutcome>> {
        let remote = self
            .store
            .get_all()
            .await?
            .iter()
            .map(|s| s.to_remote(&self.cryptor))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let batch = &remote;
        let returned = self
            .session
            .with_auth_retry(|call| async move { call.api.sync_secrets(call.auth(), batch).await })
            .await?;

        let applier = UpdateApplier::new(self.store.clone(), self.cryptor.clone());
        let outcomes = applier.apply_batch(&returned).await;
        info!(
            sent = remote.len(),
            received = returned.secrets.len(),
            applied = outcomes.len(),
            "Synced local secrets"
        );
        Ok(outcomes)
    }

    /// Stop the update loop and release the local store.
    pub async fn close(&self) -> Result<()> {
        if let Some(handle) = self.updates.lock().await.take() {
            handle.stop().await;
        }
        if let Err(e) = self.store.close().await {
            warn!(error = %e, "Failed to close local store");
        }
        Ok(())
    }

    async fn push(&self, secret: &LocalSecret) -> Result<()> {
        let remote = &secret.to_remote(&self.cryptor)?;
        self.session
            .with_auth_retry(|call| async move { call.api.set_secret(call.auth(), remote).await })
            .await?;
        Ok(())
    }
}
