use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::EventFilter;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SubscribeQuery {
    pub driver_id: Option<Uuid>,
    pub delivery_id: Option<Uuid>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SubscribeQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let filter = EventFilter {
        driver_id: query.driver_id,
        delivery_id: query.delivery_id,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, filter: EventFilter) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.events.subscribe());

    info!(
        driver_filter = ?filter.driver_id,
        delivery_filter = ?filter.delivery_id,
        "websocket subscriber connected"
    );

    let send_task = tokio::spawn(async move {
        while let Some(next) = events.next().await {
            let event = match next {
                Ok(event) => event,
                // Fell behind the bounded buffer: the oldest events are gone,
                // keep streaming from here.
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket subscriber lagged, events dropped");
                    continue;
                }
            };

            if !filter.matches(&event) {
                continue;
            }

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket subscriber disconnected");
}
