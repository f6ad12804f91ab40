use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use voxgate_transcription::asr::RealtimeEvent;
use voxgate_transcription::ids::new_task_id;
use voxgate_transcription::session::{SessionResult, StreamSession};

use crate::auth::validate_token;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// Upgrades `GET /ws/v1/asr` into a realtime recognition session.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !validate_token(
        state.settings.apptoken.as_deref(),
        &headers,
        params.token.as_deref(),
    ) {
        return Response::builder()
            .status(401)
            .body("Unauthorized".into())
            .unwrap();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let task_id = new_task_id();
    info!(%task_id, "ASR stream connected");

    let (mut sender, mut receiver) = socket.split();
    let mut session = StreamSession::new(task_id.clone(), state.config.clone(), state.itn.clone());
    let mut events: Option<mpsc::Receiver<RealtimeEvent>> = None;

    loop {
        let result: SessionResult = tokio::select! {
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        session.on_text(&state.registry, &text).await
                    }
                    Some(Ok(Message::Binary(data))) => session.on_binary(&data).await,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => continue,
                    // Client gone: abandon in-flight work, emit nothing
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(task_id = %session.task_id(), error = %e, "WebSocket error");
                        break;
                    }
                }
            }
            event = next_event(&mut events), if events.is_some() => {
                match event {
                    Some(event) => session.on_engine_event(event),
                    None => {
                        events = None;
                        session.on_engine_closed()
                    }
                }
            }
        };

        if result.events.is_some() {
            events = result.events;
        }
        let mut send_failed = false;
        for frame in &result.frames {
            match serde_json::to_string(frame) {
                Ok(text) => {
                    if sender.send(Message::text(text)).await.is_err() {
                        send_failed = true;
                        break;
                    }
                }
                Err(e) => {
                    warn!(task_id = %session.task_id(), error = %e, "frame serialization failed");
                }
            }
        }
        if send_failed {
            break;
        }
        if result.close {
            let _ = sender.send(Message::Close(None)).await;
            break;
        }
    }

    // Dropping the session aborts any outstanding engine work cooperatively
    info!(task_id = %session.task_id(), state = ?session.state(), "ASR stream closed");
}

async fn next_event(events: &mut Option<mpsc::Receiver<RealtimeEvent>>) -> Option<RealtimeEvent> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
