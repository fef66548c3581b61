//! Connection, registration and login handlers.

use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use keeper_core::wire::{ConnectionResponse, Credentials, LoginResponse, RegisterResponse};

pub async fn connection(State(state): State<AppState>) -> Json<ConnectionResponse> {
    Json(ConnectionResponse {
        connection_number: state.service.next_connection_number(),
    })
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> Result<(StatusCode, Json<RegisterResponse>), RelayError> {
    let user_id = state.service.register(&req.login, &req.password).await?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> Result<Json<LoginResponse>, RelayError> {
    let (token, user_id) = state.service.login(&req.login, &req.password).await?;
    Ok(Json(LoginResponse { token, user_id }))
}
