//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::util::rate_limit::PlayerRateLimiter;

use super::connections::Frame;
use super::session::{ProtocolError, Session};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, ws_stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(state.config.outbound_queue);

    // Registered before the first inbound frame is read
    let mut session = Session::open(&state, outbound_tx);
    let conn_id = session.id();
    info!(conn_id = %conn_id, "New WebSocket connection");

    let writer_handle = tokio::spawn(run_writer(conn_id, ws_sink, outbound_rx));

    let rate_limiter = PlayerRateLimiter::new(state.config.input_rate_limit);
    run_reader(&mut session, ws_stream, &rate_limiter).await;
    debug!(conn_id = %conn_id, phase = ?session.phase(), "Reader finished");

    // Leave the registries before the writer goes away
    session.close();
    writer_handle.abort();

    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Outbound queue -> WebSocket
async fn run_writer<S>(conn_id: Uuid, mut ws_sink: S, mut outbound_rx: mpsc::Receiver<Frame>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(frame) = outbound_rx.recv().await {
        if let Err(e) = ws_sink.send(Message::Text(frame)).await {
            debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
            break;
        }
    }
    // Dropping the receiver marks this connection closed for the broadcaster
    let _ = ws_sink.close().await;
}

/// WebSocket -> session
async fn run_reader<St, E>(
    session: &mut Session,
    mut ws_stream: St,
    rate_limiter: &PlayerRateLimiter,
) where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let conn_id = session.id();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(conn_id = %conn_id, "Rate limited input message");
                    continue;
                }

                if let Err(e) = session.handle_text(&text) {
                    warn!(conn_id = %conn_id, error = %e, "Dropped client message");
                    if matches!(e, ProtocolError::Closed) {
                        break;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(conn_id = %conn_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(conn_id = %conn_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}
