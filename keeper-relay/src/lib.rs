//! Keeper relay
//!
//! Self-hostable relay for zero-knowledge secret sync. It stores only
//! ciphertexts and their hashes, reconciles client batches with
//! last-write-wins, and pushes every change to the owner's open streams.

pub mod auth;
pub mod config;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod reconcile;
pub mod server;
pub mod service;
pub mod storage;
pub mod token;

pub use config::RelayConfig;
pub use error::RelayError;
pub use server::{build_router, AppState};
pub use service::RelayService;
pub use storage::RelayStorage;
pub use token::TokenManager;

use std::sync::Arc;

/// Wire storage, tokens and the service into router state.
pub fn app_state(storage: RelayStorage, config: &RelayConfig) -> AppState {
    let storage = Arc::new(storage);
    let tokens = TokenManager::new(config.jwt_secret.as_bytes().to_vec(), config.jwt_ttl_secs);
    AppState::new(RelayService::new(storage.clone(), storage, tokens, config))
}
