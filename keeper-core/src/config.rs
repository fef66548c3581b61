//! Client configuration loaded from the environment.

use crate::crypto::KdfParams;
use crate::KeeperError;
use std::path::PathBuf;

pub const ENV_DB_URL: &str = "KEEPER_DB_URL";
pub const ENV_LOGIN: &str = "KEEPER_LOGIN";
pub const ENV_PASSWORD: &str = "KEEPER_PASSWORD";
pub const ENV_SERVER_ADDR: &str = "KEEPER_SERVER_ADDR";

/// Everything a client needs to open its store and reach the relay.
#[derive(Clone)]
pub struct ClientConfig {
    /// Path of the local SQLite database.
    pub db_path: PathBuf,
    pub login: String,
    /// Master password. Only ever used locally for key derivation.
    pub password: String,
    /// Relay address, `host:port` or a full URL.
    pub server_addr: String,
    pub kdf_params: KdfParams,
}

impl ClientConfig {
    /// Load from `KEEPER_DB_URL`, `KEEPER_LOGIN`, `KEEPER_PASSWORD` and
    /// `KEEPER_SERVER_ADDR`. All four are required.
    pub fn from_env() -> Result<Self, KeeperError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, KeeperError> {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    KeeperError::Config(format!("{} environment variable is required", key))
                })
        };

        Ok(Self {
            db_path: PathBuf::from(require(ENV_DB_URL)?),
            login: require(ENV_LOGIN)?,
            password: require(ENV_PASSWORD)?,
            server_addr: require(ENV_SERVER_ADDR)?,
            kdf_params: KdfParams::default(),
        })
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("db_path", &self.db_path)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("server_addr", &self.server_addr)
            .field("kdf_params", &self.kdf_params)
            .finish()
    }
}
