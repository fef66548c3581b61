//! HTTP client for the keeper relay.

use crate::models::RemoteSecret;
use crate::wire::{
    ConnectionResponse, Credentials, ErrorBody, LoginResponse, RegisterResponse, SecretBatch,
    CONNECTION_NUMBER_HEADER,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors returned by relay calls
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("relay error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, ApiError::Unauthenticated(_))
    }

    /// Map a non-success HTTP status and its `{"error": ..}` body.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => ApiError::Unauthenticated(message),
            404 => ApiError::NotFound(message),
            409 => ApiError::AlreadyExists(message),
            400 => ApiError::InvalidRequest(message),
            413 => ApiError::PayloadTooLarge(message),
            _ => ApiError::Server { status, message },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Per-call authentication: bearer token plus connection number.
#[derive(Debug, Clone, Copy)]
pub struct CallAuth<'a> {
    pub token: &'a str,
    pub connection_number: u64,
}

/// Thin typed wrapper over the relay's JSON API.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// `server_addr` may be `host:port` or a full `http(s)://` URL.
    pub fn new(server_addr: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let trimmed = server_addr.trim_end_matches('/');
        let base_url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// WebSocket URL of the update stream.
    pub fn updates_url(&self) -> String {
        let ws_base = match self.base_url.strip_prefix("https://") {
            Some(rest) => format!("wss://{}", rest),
            None => format!(
                "ws://{}",
                self.base_url.trim_start_matches("http://")
            ),
        };
        format!("{}/api/v1/updates", ws_base)
    }

    pub async fn get_connection_number(&self) -> Result<u64> {
        let req = self.client.post(self.url("/api/v1/connection"));
        let resp: ConnectionResponse = Self::send_json(req).await?;
        Ok(resp.connection_number)
    }

    pub async fn register(
        &self,
        connection_number: u64,
        login: &str,
        password: &str,
    ) -> Result<String> {
        let req = self
            .client
            .post(self.url("/api/v1/auth/register"))
            .header(CONNECTION_NUMBER_HEADER, connection_number)
            .json(&Credentials {
                login: login.to_string(),
                password: password.to_string(),
            });
        let resp: RegisterResponse = Self::send_json(req).await?;
        Ok(resp.user_id)
    }

    pub async fn login(
        &self,
        connection_number: u64,
        login: &str,
        password: &str,
    ) -> Result<LoginResponse> {
        let req = self
            .client
            .post(self.url("/api/v1/auth/login"))
            .header(CONNECTION_NUMBER_HEADER, connection_number)
            .json(&Credentials {
                login: login.to_string(),
                password: password.to_string(),
            });
        Self::send_json(req).await
    }

    pub async fn set_secret(&self, auth: CallAuth<'_>, secret: &RemoteSecret) -> Result<()> {
        let req = self
            .authed(self.client.put(self.url("/api/v1/secrets")), auth)
            .json(secret);
        Self::send(req).await.map(drop)
    }

    pub async fn get_secret(&self, auth: CallAuth<'_>, name: &str) -> Result<RemoteSecret> {
        let req = self.authed(self.client.get(self.secret_url(name)), auth);
        Self::send_json(req).await
    }

    pub async fn delete_secret(&self, auth: CallAuth<'_>, name: &str) -> Result<()> {
        let req = self.authed(self.client.delete(self.secret_url(name)), auth);
        Self::send(req).await.map(drop)
    }

    /// Live secrets without payloads, newest first.
    pub async fn list_secrets(&self, auth: CallAuth<'_>) -> Result<Vec<RemoteSecret>> {
        let req = self.authed(self.client.get(self.url("/api/v1/secrets")), auth);
        let batch: SecretBatch = Self::send_json(req).await?;
        Ok(batch.secrets)
    }

    /// Submit local secrets for reconciliation. Returns the relay copies
    /// that won: secrets this client lacks or holds stale versions of.
    pub async fn sync_secrets(
        &self,
        auth: CallAuth<'_>,
        secrets: &[RemoteSecret],
    ) -> Result<SecretBatch> {
        let req = self
            .authed(self.client.post(self.url("/api/v1/sync")), auth)
            .json(&SecretBatch {
                secrets: secrets.to_vec(),
            });
        Self::send_json(req).await
    }

    // --- Internal helpers ---

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn secret_url(&self, name: &str) -> String {
        self.url(&format!("/api/v1/secrets/{}", urlencoding::encode(name)))
    }

    fn authed(&self, req: RequestBuilder, auth: CallAuth<'_>) -> RequestBuilder {
        req.bearer_auth(auth.token)
            .header(CONNECTION_NUMBER_HEADER, auth.connection_number)
    }

    async fn send(req: RequestBuilder) -> Result<Response> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = match resp.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown")
                .to_string(),
        };
        Err(ApiError::from_status(status.as_u16(), message))
    }

    async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T> {
        let resp = Self::send(req).await?;
        resp.json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl From<StatusCode> for ApiError {
    fn from(status: StatusCode) -> Self {
        ApiError::from_status(
            status.as_u16(),
            status.canonical_reason().unwrap_or("unknown").to_string(),
        )
    }
}
