//! Server-push stream of changed secrets over WebSocket.

use crate::auth::ConnectionNumber;
use crate::error::RelayError;
use crate::fanout::UpdateSubscription;
use crate::handlers::secrets::user_id;
use crate::server::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::Extensions;
use axum::response::Response;
use keeper_core::wire::SecretBatch;
use tracing::{debug, info, warn};

pub async fn updates(
    State(state): State<AppState>,
    extensions: Extensions,
    ws: WebSocketUpgrade,
) -> Result<Response, RelayError> {
    let user_id = user_id(&extensions)?.to_string();
    let connection_number = extensions
        .get::<ConnectionNumber>()
        .map(|n| n.0)
        .unwrap_or_default();

    // Subscribe before the upgrade so nothing published in between is missed.
    let subscription = state.service.subscribe(&user_id);
    Ok(ws.on_upgrade(move |socket| stream_updates(socket, subscription, user_id, connection_number)))
}

async fn stream_updates(
    mut socket: WebSocket,
    mut subscription: UpdateSubscription,
    user_id: String,
    connection_number: u64,
) {
    info!(%user_id, connection_number, "Update stream opened");

    loop {
        tokio::select! {
            batch = subscription.next() => {
                let Some(batch) = batch else {
                    break;
                };
                let body = SecretBatch {
                    secrets: batch.secrets.clone(),
                };
                let text = match serde_json::to_string(&body) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(connection_number, error = %e, "Failed to encode update batch");
                        continue;
                    }
                };
                if let Err(e) = socket.send(Message::Text(text.into())).await {
                    warn!(connection_number, error = %e, "Failed to send update batch");
                    break;
                }
                debug!(connection_number, secrets = body.secrets.len(), "Sent update batch");
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(connection_number, error = %e, "Update stream read failed");
                    break;
                }
            }
        }
    }

    info!(%user_id, connection_number, "Update stream closed");
}
