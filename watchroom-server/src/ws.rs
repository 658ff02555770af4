use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::time::timeout;

use watchroom_collab::{random_string, ConnectionHandle, ErrorCode, InboundFrame, ServerEvent};

use crate::context::ServerContext;
use crate::Router;

/// No frame, ping or otherwise, arriving within this window means the
/// peer is gone; the read loop tears the connection down rather than
/// waiting on a socket nothing is feeding anymore.
const IDLE_TIMEOUT: Duration = Duration::from_secs(960);

/// Accepts the upgrade and spawns the read/write halves of a connection.
/// Every connection gets a fresh, process-wide-unique id that lives for
/// as long as the socket does; it's forgotten entirely once the socket
/// closes, along with whatever room it was bound to.
#[utoipa::path(
    get,
    path = "/ws",
    tag = "realtime",
    responses(
        (status = 101, description = "Switching protocols to the room command/event WebSocket")
    )
)]
pub(crate) async fn handle_upgrade(
    ws: WebSocketUpgrade,
    State(context): State<ServerContext>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, context))
}

async fn handle_connection(socket: WebSocket, context: ServerContext) {
    let client_id = random_string(24);
    let (handle, mut outbound) = ConnectionHandle::new();

    context
        .collab
        .registry
        .register_connection(client_id.clone(), handle);

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if sink.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    loop {
        let next = match timeout(IDLE_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                debug!("socket error for {client_id}: {e}");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                debug!("closing idle connection {client_id}");
                break;
            }
        };

        let text = match next {
            Message::Text(text) => text,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
        };

        match serde_json::from_str::<InboundFrame>(&text) {
            Ok(frame) => context.collab.dispatcher.dispatch(&client_id, frame).await,
            Err(e) => {
                debug!("dropping malformed frame from {client_id}: {e}");
                context.collab.bus.send_targeted(
                    &client_id,
                    &ServerEvent::ErrorWithCode {
                        code: ErrorCode::InvalidMessage,
                        message: "invalid message".into(),
                    },
                );
            }
        }
    }

    writer.abort();
    context.collab.registry.drop_connection(&client_id);

    if let Err(e) = context.collab.dispatcher.disconnect(&client_id).await {
        warn!("cleanup after disconnect of {client_id} failed: {e}");
    }
}

pub fn router() -> Router {
    Router::new().route("/ws", get(handle_upgrade))
}
