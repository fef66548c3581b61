//! Relay operations behind the HTTP surface.

use crate::config::{PasswordHashParams, RelayConfig};
use crate::error::RelayError;
use crate::fanout::{UpdateHub, UpdateSubscription};
use crate::reconcile::Reconciler;
use crate::storage::{SecretRepository, UserRepository};
use crate::token::{TokenError, TokenManager};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use keeper_core::models::now;
use keeper_core::RemoteSecret;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hands out connection numbers, starting at 1.
#[derive(Debug, Default)]
pub struct ConnectionCounter(AtomicU64);

impl ConnectionCounter {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub struct RelayService {
    users: Arc<dyn UserRepository>,
    secrets: Arc<dyn SecretRepository>,
    reconciler: Reconciler,
    tokens: TokenManager,
    hub: UpdateHub,
    connections: ConnectionCounter,
    hash_params: PasswordHashParams,
    max_secret_size: usize,
}

impl RelayService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        secrets: Arc<dyn SecretRepository>,
        tokens: TokenManager,
        config: &RelayConfig,
    ) -> Self {
        Self {
            users,
            reconciler: Reconciler::new(secrets.clone()),
            secrets,
            tokens,
            hub: UpdateHub::new(config.update_buffer, config.filter_updates_by_user),
            connections: ConnectionCounter::default(),
            hash_params: config.password_hash,
            max_secret_size: config.max_secret_size,
        }
    }

    pub fn next_connection_number(&self) -> u64 {
        self.connections.next()
    }

    pub async fn register(&self, login: &str, password: &str) -> Result<String, RelayError> {
        check_credentials(login, password)?;

        if self.users.get_by_login(login).await?.is_some() {
            return Err(RelayError::Conflict("user already exists".to_string()));
        }

        let hash = hash_password(password.to_string(), self.hash_params).await?;
        let user = self.users.create(login, &hash).await?;
        info!(user_id = %user.id, "Registered user");
        Ok(user.id)
    }

    /// Returns `(token, user_id)`.
    pub async fn login(&self, login: &str, password: &str) -> Result<(String, String), RelayError> {
        check_credentials(login, password)?;

        let user = self
            .users
            .get_by_login(login)
            .await?
            .ok_or_else(|| RelayError::NotFound("user not found".to_string()))?;

        if !verify_password(password.to_string(), user.password_hash.clone()).await? {
            warn!(user_id = %user.id, "Login rejected");
            return Err(RelayError::Auth("invalid credentials".to_string()));
        }

        let token = self
            .tokens
            .generate(&user.id)
            .map_err(|e| RelayError::Internal(e.to_string()))?;
        info!(user_id = %user.id, "User logged in");
        Ok((token, user.id))
    }

    /// Resolves a bearer token to the user ID it was issued for.
    pub fn authenticate(&self, token: &str) -> Result<String, RelayError> {
        self.tokens.validate(token).map_err(|e| match e {
            TokenError::Signing => RelayError::Internal(e.to_string()),
            _ => RelayError::Auth(e.to_string()),
        })
    }

    pub async fn set_secret(&self, user_id: &str, secret: RemoteSecret) -> Result<(), RelayError> {
        if secret.name.trim().is_empty() {
            return Err(RelayError::BadRequest("secret name is required".to_string()));
        }
        if secret.is_deleted() {
            return Err(RelayError::BadRequest(
                "tombstones are only accepted through sync".to_string(),
            ));
        }
        self.check_size(&secret)?;

        self.secrets.upsert(user_id, &secret).await?;
        debug!(user_id, name = %secret.name, "Stored secret");
        self.hub.publish(user_id, vec![secret]);
        Ok(())
    }

    pub async fn get_secret(&self, user_id: &str, name: &str) -> Result<RemoteSecret, RelayError> {
        self.secrets
            .get(user_id, name)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("secret {} not found", name)))
    }

    pub async fn delete_secret(&self, user_id: &str, name: &str) -> Result<(), RelayError> {
        if !self.secrets.delete(user_id, name, now()).await? {
            return Err(RelayError::NotFound(format!("secret {} not found", name)));
        }

        if let Some(tombstone) = self.secrets.get_with_status(user_id, name).await? {
            self.hub.publish(user_id, vec![tombstone]);
        }
        debug!(user_id, name, "Deleted secret");
        Ok(())
    }

    pub async fn list_secrets(&self, user_id: &str) -> Result<Vec<RemoteSecret>, RelayError> {
        self.secrets.list(user_id).await
    }

    /// Reconciles the client's view and returns the secrets the client is missing.
    pub async fn sync_from_client(
        &self,
        user_id: &str,
        secrets: Vec<RemoteSecret>,
    ) -> Result<Vec<RemoteSecret>, RelayError> {
        for secret in &secrets {
            self.check_size(secret)?;
        }

        let outcome = self.reconciler.reconcile(user_id, secrets).await?;
        let for_client = outcome.for_client.clone();
        if !outcome.is_empty() {
            self.hub.publish(user_id, outcome.into_changed());
        }
        Ok(for_client)
    }

    pub fn subscribe(&self, user_id: &str) -> UpdateSubscription {
        self.hub.subscribe(user_id)
    }

    fn check_size(&self, secret: &RemoteSecret) -> Result<(), RelayError> {
        if secret.data.len() > self.max_secret_size {
            return Err(RelayError::PayloadTooLarge(format!(
                "secret {} exceeds {} bytes",
                secret.name, self.max_secret_size
            )));
        }
        Ok(())
    }
}

fn check_credentials(login: &str, password: &str) -> Result<(), RelayError> {
    if login.trim().is_empty() || password.is_empty() {
        return Err(RelayError::BadRequest(
            "login and password are required".to_string(),
        ));
    }
    Ok(())
}

fn hasher(params: PasswordHashParams) -> Result<Argon2<'static>, RelayError> {
    let params = Params::new(params.mem_cost, params.time_cost, params.parallelism, None)
        .map_err(|e| RelayError::Internal(format!("invalid password hash params: {}", e)))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

async fn hash_password(password: String, params: PasswordHashParams) -> Result<String, RelayError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        hasher(params)?
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| RelayError::Internal(format!("password hashing failed: {}", e)))
    })
    .await?
}

async fn verify_password(password: String, stored: String) -> Result<bool, RelayError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored)
            .map_err(|e| RelayError::Internal(format!("stored password hash unreadable: {}", e)))?;
        // Cost parameters come from the PHC string itself.
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await?
}
