//! Authenticated session with transparent re-login.

use crate::client::api::{ApiClient, CallAuth, Result};
use std::future::Future;
use tokio::sync::RwLock;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Holds the bearer token and connection number for one relay connection.
///
/// `password` is the derived server password, never the master password.
pub struct Session {
    api: ApiClient,
    login: String,
    password: Zeroizing<String>,
    connection_number: u64,
    token: RwLock<Option<String>>,
}

impl Session {
    /// Open a session: asks the relay for a connection number.
    pub async fn connect(api: ApiClient, login: String, password: String) -> Result<Self> {
        let connection_number = api.get_connection_number().await?;
        info!(connection_number, "Connected to relay");

        Ok(Self {
            api,
            login,
            password: Zeroizing::new(password),
            connection_number,
            token: RwLock::new(None),
        })
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn connection_number(&self) -> u64 {
        self.connection_number
    }

    pub async fn register(&self) -> Result<String> {
        self.api
            .register(self.connection_number, &self.login, &self.password)
            .await
    }

    /// Drop any cached token and log in again.
    pub async fn login(&self) -> Result<()> {
        let mut token = self.token.write().await;
        *token = None;

        let resp = self
            .api
            .login(self.connection_number, &self.login, &self.password)
            .await?;
        debug!(user_id = %resp.user_id, "Logged in");
        *token = Some(resp.token);
        Ok(())
    }

    pub async fn clear_token(&self) {
        *self.token.write().await = None;
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Return the current token, logging in first if there is none.
    async fn ensure_auth(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut slot = self.token.write().await;
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }
        let resp = self
            .api
            .login(self.connection_number, &self.login, &self.password)
            .await?;
        *slot = Some(resp.token.clone());
        Ok(resp.token)
    }

    /// Run `call` with a valid token.
    ///
    /// If the call fails as unauthenticated the token is discarded, a fresh
    /// login is performed and the call is retried exactly once. A second
    /// authentication failure is returned to the caller.
    pub async fn with_auth_retry<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn(AuthedCall) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = self.ensure_auth().await?;
        match call(self.authed(token)).await {
            Err(err) if err.is_unauthenticated() => {
                debug!(
                    connection_number = self.connection_number,
                    "Token rejected, logging in again"
                );
                self.clear_token().await;
                let token = self.ensure_auth().await?;
                call(self.authed(token)).await
            }
            other => other,
        }
    }

    fn authed(&self, token: String) -> AuthedCall {
        AuthedCall {
            api: self.api.clone(),
            token,
            connection_number: self.connection_number,
        }
    }
}

/// Handle given to each attempt inside [`Session::with_auth_retry`].
#[derive(Clone)]
pub struct AuthedCall {
    pub api: ApiClient,
    token: String,
    connection_number: u64,
}

impl AuthedCall {
    pub fn auth(&self) -> CallAuth<'_> {
        CallAuth {
            token: &self.token,
            connection_number: self.connection_number,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("login", &self.login)
            .field("connection_number", &self.connection_number)
            .finish_non_exhaustive()
    }
}
