//! Secret CRUD and sync handlers.

use crate::auth::AuthUser;
use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::http::{Extensions, StatusCode};
use axum::Json;
use keeper_core::wire::SecretBatch;
use keeper_core::RemoteSecret;

pub(crate) fn user_id(extensions: &Extensions) -> Result<&str, RelayError> {
    extensions
        .get::<AuthUser>()
        .map(|user| user.user_id.as_str())
        .ok_or_else(|| RelayError::Auth("No authenticated user".to_string()))
}

pub async fn set_secret(
    State(state): State<AppState>,
    extensions: Extensions,
    Json(secret): Json<RemoteSecret>,
) -> Result<StatusCode, RelayError> {
    state
        .service
        .set_secret(user_id(&extensions)?, secret)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_secret(
    State(state): State<AppState>,
    extensions: Extensions,
    Path(name): Path<String>,
) -> Result<Json<RemoteSecret>, RelayError> {
    let secret = state
        .service
        .get_secret(user_id(&extensions)?, &name)
        .await?;
    Ok(Json(secret))
}

pub async fn delete_secret(
    State(state): State<AppState>,
    extensions: Extensions,
    Path(name): Path<String>,
) -> Result<StatusCode, RelayError> {
    state
        .service
        .delete_secret(user_id(&extensions)?, &name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_secrets(
    State(state): State<AppState>,
    extensions: Extensions,
) -> Result<Json<SecretBatch>, RelayError> {
    let secrets = state.service.list_secrets(user_id(&extensions)?).await?;
    Ok(Json(SecretBatch { secrets }))
}

/// Returns the relay copies the client was missing or held stale versions of.
pub async fn sync_secrets(
    State(state): State<AppState>,
    extensions: Extensions,
    Json(batch): Json<SecretBatch>,
) -> Result<Json<SecretBatch>, RelayError> {
    let secrets = state
        .service
        .sync_from_client(user_id(&extensions)?, batch.secrets)
        .await?;
    Ok(Json(SecretBatch { secrets }))
}
