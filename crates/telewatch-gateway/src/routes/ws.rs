//! Live push channel.
//!
//! One WebSocket per observer session. The socket carries every envelope
//! published after the upgrade — never a replay; clients backfill via
//! `/api/history` and deduplicate the seam with the per-channel
//! `sequence`. A subscriber that falls behind the bus capacity is
//! disconnected so it can re-sync, without ever stalling the publisher or
//! other observers. The browser client reconnects after a fixed 3 s
//! backoff and re-fetches snapshot and history.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::broadcast;

use telewatch_events::Envelope;

use crate::context::AppContext;

/// GET /ws
pub(super) async fn live_stream(
    State(context): State<AppContext>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let receiver = context.bus.subscribe();
    upgrade.on_upgrade(move |socket| stream_envelopes(socket, receiver))
}

async fn stream_envelopes(mut socket: WebSocket, mut receiver: broadcast::Receiver<Envelope>) {
    loop {
        tokio::select! {
            published = receiver.recv() => match published {
                Ok(envelope) => {
                    let text = match serde_json::to_string(&envelope) {
                        Ok(text) => text,
                        Err(error) => {
                            tracing::error!("envelope not serializable: {error}");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("observer lagged by {missed} messages, disconnecting");
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                // Transport drop is cleanup, not an error.
                None | Some(Ok(Message::Close(_))) => break,
                Some(Err(error)) => {
                    tracing::debug!("observer socket error: {error}");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("observer session ended");
}
