//! Request and response bodies shared by the relay and its clients.

use crate::models::RemoteSecret;
use serde::{Deserialize, Serialize};

/// Header carrying the per-connection correlation number.
pub const CONNECTION_NUMBER_HEADER: &str = "connectionnumber";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionResponse {
    pub connection_number: u64,
}

/// Body of both register and login calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
}

/// A list of secrets: sync requests, list responses and pushed batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretBatch {
    pub secrets: Vec<RemoteSecret>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
