//! Bearer-token and connection-number middleware.

use crate::error::RelayError;
use crate::server::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use keeper_core::wire::CONNECTION_NUMBER_HEADER;
use std::time::Instant;
use tracing::{info, warn};

/// Identity resolved from the bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

/// Correlation number presented by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionNumber(pub u64);

/// Auth middleware: resolves `authorization: Bearer <token>` to a user.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, RelayError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| RelayError::Auth("missing authorization token".to_string()))?;
    let user_id = state.service.authenticate(token)?;

    request.extensions_mut().insert(AuthUser { user_id });
    Ok(next.run(request).await)
}

/// Requires a `connectionnumber` header and logs the request outcome.
pub async fn connection_middleware(
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, RelayError> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let connection_number = match connection_number(request.headers()) {
        Some(n) => n,
        None => {
            warn!(%method, %path, "Request without connection number");
            return Err(RelayError::BadRequest(
                "missing connection number".to_string(),
            ));
        }
    };
    request
        .extensions_mut()
        .insert(ConnectionNumber(connection_number));

    let started = Instant::now();
    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if status.is_client_error() || status.is_server_error() {
        warn!(%method, %path, connection_number, status = status.as_u16(), elapsed_ms, "Request failed");
    } else {
        info!(%method, %path, connection_number, status = status.as_u16(), elapsed_ms, "Request handled");
    }
    Ok(response)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = match value.strip_prefix("Bearer") {
        // Bare scheme with nothing after it.
        Some("") => return None,
        Some(rest) if rest.starts_with(char::is_whitespace) => rest,
        // A bare token that happens to start with "Bearer".
        _ => value,
    }
    .trim();
    (!token.is_empty()).then_some(token)
}

fn connection_number(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONNECTION_NUMBER_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
