use std::sync::Arc;
use std::time::Duration;
use axum::{
    extract::{Path, State, ws::{Message, WebSocket, WebSocketUpgrade}},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::AppState;
use crate::models::ErrorResponse;
use crate::websocket::dispatch::dispatch_message;
use crate::websocket::session::{Liveness, Session};
use crate::ws::rooms::Outbound;

/// WebSocket handler
pub async fn websocket_handler(
    Path(doc_id): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    if doc_id.trim().is_empty() {
        warn!("Rejected WebSocket connection without a document id");
        return ErrorResponse::new(StatusCode::BAD_REQUEST, "Missing document id")
            .into_parts()
            .into_response();
    }
    info!("New WebSocket connection attempt for doc {}", doc_id);
    ws.on_upgrade(move |socket| handle_socket(socket, doc_id, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, doc_id: String, state: Arc<AppState>) {
    let (mut session, outbound) = Session::new(&doc_id, state.settings.session_queue_capacity);
    let session_id = session.id;
    let liveness = session.liveness.clone();

    // Split the socket into sender and receiver
    let (sender, receiver) = socket.split();

    let size = state.join(&doc_id, session_id, session.queue.clone()).await;
    info!("✅ WebSocket session {} established on doc {} ({} local)", session_id, doc_id, size);

    let heartbeat = state.settings.heartbeat_interval;
    let timeout = state.settings.liveness_timeout;
    let mut send_task = tokio::spawn(write_loop(sender, outbound, liveness, heartbeat, timeout));

    let read_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        read_loop(receiver, &read_state, &mut session).await;
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    let remaining = state.leave(&doc_id, session_id).await;
    info!("❌ WebSocket session {} closed on doc {} ({} local remaining)", session_id, doc_id, remaining);
}

/// Drain the session's outbound queue into the socket and run the heartbeat.
///
/// Every `heartbeat` tick either sends a Ping frame or, once the peer has
/// been silent for longer than `timeout`, sends Close and returns.
pub(crate) async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Outbound>,
    liveness: Arc<Liveness>,
    heartbeat: Duration,
    timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if liveness.is_expired(timeout) {
                    warn!("💔 Heartbeat timeout after {:?} of silence, closing", liveness.silent_for());
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    debug!("Ping write failed: {}", e);
                    return;
                }
            }
            next = outbound.recv() => {
                let Some(payload) = next else {
                    return;
                };
                if let Err(e) = sink.send(Message::Text(payload.to_string())).await {
                    debug!("Socket write failed: {}", e);
                    return;
                }
            }
        }
    }
}

/// Read frames until the peer closes or the transport fails.
pub(crate) async fn read_loop<R, E>(mut frames: R, state: &AppState, session: &mut Session)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Read error on doc {}: {}", session.doc_id, e);
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                dispatch_message(state, session, &text).await;
            }
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => {
                    dispatch_message(state, session, &text).await;
                }
                Err(_) => warn!("⚠️ Dropping non UTF-8 binary frame on doc {}", session.doc_id),
            },
            Message::Ping(_) | Message::Pong(_) => session.liveness.touch(),
            Message::Close(_) => {
                debug!("Client closed session {} on doc {}", session.id, session.doc_id);
                break;
            }
        }
    }
}
