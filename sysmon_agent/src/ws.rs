//! WebSocket upgrade and per-connection handler. Each viewer gets the configuration once,
//! then every snapshot the sampler broadcasts.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tracing::info;

use crate::state::AppState;
use crate::subscribers::SubscriberGuard;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (id, mut queue) = state.subscribers.join(state.configuration.clone());
    let _guard = SubscriberGuard::new(state.subscribers.clone(), id);
    info!(subscriber = id, viewers = state.subscribers.len(), "viewer connected");

    let (mut sink, mut stream) = socket.split();

    let writer = async {
        while let Some(msg) = queue.recv().await {
            if sink.send(Message::Text(msg.to_string())).await.is_err() {
                break;
            }
        }
    };
    // Viewers only listen; drain their side to notice close.
    let reader = async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }
    info!(subscriber = id, "viewer disconnected");
}
