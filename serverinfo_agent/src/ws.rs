//! WebSocket upgrade and per-connection handler. Each connection gets a
//! bounded outbound queue drained by its own writer task.

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
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broadcast::{ChannelSink, ClientId};
use crate::state::MonitoringState;
use crate::types::InboundMessage;

/// Messages a slow client may have queued before new ones are dropped.
pub const OUTBOUND_QUEUE: usize = 64;

pub fn router(state: Arc<MonitoringState>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<MonitoringState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<MonitoringState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(OUTBOUND_QUEUE);
    let id = state.broadcaster.register(Arc::new(ChannelSink::new(tx.clone())));
    info!("client {id} connected ({} open)", state.broadcaster.client_count());

    // Ensure we unregister on disconnect (drop).
    struct ClientGuard(Arc<MonitoringState>, ClientId);
    impl Drop for ClientGuard {
        fn drop(&mut self) {
            self.0.broadcaster.unregister(self.1);
        }
    }
    let _guard = ClientGuard(state.clone(), id);

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.to_string())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                handle_inbound(&state, &tx, &text).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    info!("client {id} disconnected");
}

/// Handle one text frame from a client. Only `{"purpose":"init"}` gets a
/// reply (the full current state). It queues behind pending updates and
/// waits for room instead of being dropped. Returns whether it was queued.
pub async fn handle_inbound(
    state: &MonitoringState,
    tx: &mpsc::Sender<Arc<str>>,
    raw: &str,
) -> bool {
    let Some(reply) = reply_for(state, raw) else {
        return false;
    };
    match tx.send(reply).await {
        Ok(()) => true,
        Err(_) => {
            debug!("initial data not delivered: connection closed");
            false
        }
    }
}

/// Reply owed for one inbound frame, if any. Anything but `init` is logged
/// and ignored.
pub fn reply_for(state: &MonitoringState, raw: &str) -> Option<Arc<str>> {
    let msg: InboundMessage = match serde_json::from_str(raw) {
        Ok(m) => m,
        Err(e) => {
            warn!("ignoring malformed client message: {e}");
            return None;
        }
    };

    match msg.purpose.as_str() {
        "init" => match serde_json::to_string(&state.initial_data()) {
            Ok(json) => Some(Arc::from(json)),
            Err(e) => {
                warn!("failed to encode initial data: {e}");
                None
            }
        },
        other => {
            warn!("ignoring client message with purpose '{other}'");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MetricDefinition, MetricParams};
    use crate::history::MetricStore;

    fn state() -> Arc<MonitoringState> {
        let config = Config {
            monitored: vec![MetricDefinition::new("uptime", MetricParams::Uptime)],
            ..Config::default()
        };
        Arc::new(MonitoringState::new(config, MetricStore::in_memory()))
    }

    #[tokio::test]
    async fn init_reply_waits_behind_a_full_queue() {
        let state = state();
        let (tx, mut rx) = mpsc::channel::<Arc<str>>(2);
        tx.try_send(Arc::from("update-1")).unwrap();
        tx.try_send(Arc::from("update-2")).unwrap();

        let pending = {
            let (state, tx) = (state.clone(), tx.clone());
            tokio::spawn(async move { handle_inbound(&state, &tx, r#"{"purpose":"init"}"#).await })
        };

        assert_eq!(rx.recv().await.as_deref(), Some("update-1"));
        assert_eq!(rx.recv().await.as_deref(), Some("update-2"));
        let init = rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&init).unwrap();
        assert_eq!(v["purpose"], "initialData");
        assert!(pending.await.unwrap());
    }

    #[tokio::test]
    async fn init_reply_to_closed_connection_is_not_queued() {
        let state = state();
        let (tx, rx) = mpsc::channel::<Arc<str>>(1);
        drop(rx);
        assert!(!handle_inbound(&state, &tx, r#"{"purpose":"init"}"#).await);
    }

    #[test]
    fn only_init_warrants_a_reply() {
        let state = state();
        assert!(reply_for(&state, r#"{"purpose":"init"}"#).is_some());
        assert!(reply_for(&state, r#"{"purpose":"ping"}"#).is_none());
        assert!(reply_for(&state, "{").is_none());
    }
}
