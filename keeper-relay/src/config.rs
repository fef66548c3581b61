//! Relay server configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DB_URL: &str = "KEEPER_DB_URL";
pub const ENV_LISTEN_ADDR: &str = "KEEPER_LISTEN_ADDR";
pub const ENV_JWT_SECRET: &str = "KEEPER_JWT_SECRET";
pub const ENV_JWT_TTL_SECS: &str = "KEEPER_JWT_TTL_SECS";

/// Argon2id cost for stored login password hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHashParams {
    pub mem_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for PasswordHashParams {
    fn default() -> Self {
        Self {
            mem_cost: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub storage_path: PathBuf,
    /// HMAC key for bearer tokens. Empty means a random key per process.
    pub jwt_secret: String,
    pub jwt_ttl_secs: u64,
    /// Largest accepted encrypted payload, in bytes.
    pub max_secret_size: usize,
    /// Largest accepted request body, in bytes.
    pub max_payload_size: usize,
    /// Batches buffered per update stream before the slowest one drops.
    pub update_buffer: usize,
    /// Only deliver a user's own changes on their update streams.
    pub filter_updates_by_user: bool,
    pub password_hash: PasswordHashParams,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8743".to_string(),
            storage_path: PathBuf::from("keeper-relay.db"),
            jwt_secret: String::new(),
            jwt_ttl_secs: 3600,
            max_secret_size: 5 * 1024 * 1024,
            max_payload_size: 32 * 1024 * 1024,
            update_buffer: 64,
            filter_updates_by_user: true,
            password_hash: PasswordHashParams::default(),
        }
    }
}

impl RelayConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml_dep::from_str(&content)?;
        Ok(config)
    }

    /// Override fields from `KEEPER_*` environment variables.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_lookup(|key| std::env::var(key).ok())
    }

    fn apply_lookup(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(path) = lookup(ENV_DB_URL) {
            self.storage_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup(ENV_LISTEN_ADDR) {
            self.listen_addr = addr;
        }
        if let Some(secret) = lookup(ENV_JWT_SECRET) {
            self.jwt_secret = secret;
        }
        if let Some(ttl) = lookup(ENV_JWT_TTL_SECS) {
            self.jwt_ttl_secs = ttl
                .parse()
                .map_err(|e| anyhow::anyhow!("{} must be a number of seconds: {}", ENV_JWT_TTL_SECS, e))?;
        }
        Ok(())
    }
}
