use std::sync::Arc;

use alphaark_feed::{Subscriber, SubscriberError};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::state::AppState;

/// WebSocket upgrade handler for the live price stream.
pub async fn price_stream(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Write half of a client socket, owned by the broadcast manager.
struct WsSubscriber {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl Subscriber for WsSubscriber {
    async fn send(&mut self, payload: &str) -> Result<(), SubscriberError> {
        self.sink
            .send(Message::Text(payload.to_owned().into()))
            .await
            .map_err(|e| SubscriberError::Write(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sink, mut receiver) = socket.split();

    let id = match state.feed.register(Box::new(WsSubscriber { sink })).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "Could not register price stream client");
            return;
        }
    };

    // Client messages are ignored; the read loop only detects disconnects.
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.feed.unregister(id).await;
}
