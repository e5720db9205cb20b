//! `/events` WebSocket upgrade: pushes bus events as JSON frames.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;

use crate::events::EventBus;
use crate::router::AppState;

pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.event_bus.clone()))
}

async fn handle_socket(mut socket: WebSocket, bus: EventBus) {
    let subscription = bus.subscribe();
    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => continue,
                }
            }
        }
    }
}
