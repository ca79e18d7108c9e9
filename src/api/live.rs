//! Live WebSocket endpoint
//!
//! Binary messages carry encoded frames, text messages base64 frames. Each
//! connection owns its own [`LiveSession`].

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::AppState;
use crate::capture::LiveFrameInput;
use crate::shared::LiveReply;
use crate::stream::LiveSession;

/// Frame payload moved onto a blocking worker
enum LivePayload {
    Encoded(Vec<u8>),
    Base64(String),
}

impl LivePayload {
    fn as_input(&self) -> LiveFrameInput<'_> {
        match self {
            LivePayload::Encoded(bytes) => LiveFrameInput::Encoded(bytes),
            LivePayload::Base64(text) => LiveFrameInput::Base64(text),
        }
    }
}

/// `GET /live/`
pub async fn live_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_live(socket, state))
}

async fn handle_live(mut socket: WebSocket, state: AppState) {
    let (interval, idle) = {
        let shared = state.shared.read();
        (
            shared.config.pipeline.live_sample_interval,
            Duration::from_secs(shared.config.server.live_idle_timeout_secs),
        )
    };

    let mut session = match LiveSession::new(interval) {
        Ok(session) => session,
        Err(e) => {
            warn!("Refusing live stream: {}", e);
            let _ = send_reply(&mut socket, &LiveReply::Error { detail: e.to_string() }).await;
            return;
        }
    };
    state.shared.write().stats.live_stream_opened();

    loop {
        let message = tokio::select! {
            _ = state.shutdown.cancelled() => {
                debug!("Live {}: server shutting down", session.id());
                break;
            }
            received = tokio::time::timeout(idle, socket.recv()) => match received {
                Err(_) => {
                    info!("Live {}: idle for {:?}, closing", session.id(), idle);
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    debug!("Live {}: socket error: {}", session.id(), e);
                    break;
                }
                Ok(Some(Ok(message))) => message,
            }
        };

        let payload = match message {
            Message::Binary(bytes) => LivePayload::Encoded(bytes),
            Message::Text(text) => LivePayload::Base64(text),
            Message::Ping(data) => {
                if socket.send(Message::Pong(data)).await.is_err() {
                    break;
                }
                continue;
            }
            Message::Pong(_) => continue,
            Message::Close(_) => break,
        };

        let pipeline = state.pipeline.clone();
        let worker = tokio::task::spawn_blocking(move || {
            let reply = session.handle_frame(&pipeline, payload.as_input());
            (session, reply)
        });
        let reply = match worker.await {
            Ok((returned, reply)) => {
                session = returned;
                reply
            }
            Err(e) => {
                warn!("Live frame worker failed: {}", e);
                state.shared.write().stats.set_error(format!("live worker failed: {}", e));
                state.shared.write().stats.live_stream_closed();
                return;
            }
        };

        let Some(reply) = reply else {
            continue;
        };
        match &reply {
            LiveReply::Results { results, .. } => state.shared.write().stats.record_frame(results.len()),
            LiveReply::Error { detail } => state.shared.write().stats.set_error(detail.clone()),
        }
        if send_reply(&mut socket, &reply).await.is_err() {
            break;
        }
    }

    state.shared.write().stats.live_stream_closed();
    let _ = socket.send(Message::Close(None)).await;
}

async fn send_reply(socket: &mut WebSocket, reply: &LiveReply) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(reply) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize live reply: {}", e);
            return Ok(());
        }
    };
    socket.send(Message::Text(text)).await
}
