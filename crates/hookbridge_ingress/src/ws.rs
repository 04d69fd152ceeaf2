//! Duplex WebSocket channel (§4.1/§6): connect-time auth, a typed
//! request/response loop over `DuplexMessage`, and idle/shutdown close
//! handling, in the `WebSocketUpgrade` → `on_upgrade` shape of
//! `golemcloud-golem/cloud-debugging-service::websocket`.

use crate::state::AppState;
use crate::wire::{DuplexMessage, MAX_PAYLOAD_BYTES};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use hookbridge_protocol::RequestId;
use serde::Deserialize;
use std::borrow::Cow;
use std::time::Duration;
use tokio::time::timeout;

/// Connections idle longer than this are closed (§4.1 keep-alive timeout).
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
pub struct UpgradeQuery {
    token: Option<String>,
}

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>, Query(query): Query<UpgradeQuery>) -> impl IntoResponse {
    let header_value = query.token.as_deref().map(|t| format!("Bearer {t}"));
    let principal = state.security.authenticate(header_value.as_deref());

    match principal {
        Ok(principal) => {
            if !state.try_admit_connection() {
                return ws.on_upgrade(|socket| reject(socket, close_code::POLICY, "limit_exceeded"));
            }
            ws.on_upgrade(move |socket| handle_socket(socket, state, principal.name))
        }
        Err(e) => ws.on_upgrade(move |socket| reject(socket, close_code::POLICY, format!("authentication_failed: {e}"))),
    }
}

async fn reject(mut socket: WebSocket, code: u16, reason: impl Into<String>) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame { code, reason: Cow::from(reason.into()) })))
        .await;
}

async fn handle_socket(mut socket: WebSocket, state: AppState, principal: String) {
    let confirm = DuplexMessage::ConnectionConfirmed { id: RequestId::new(), principal: principal.clone() };
    if send(&mut socket, &confirm).await.is_err() {
        state.release_connection();
        return;
    }

    loop {
        let next = timeout(KEEPALIVE_TIMEOUT, socket.recv()).await;
        let msg = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame { code: 1000, reason: Cow::from("idle") })))
                    .await;
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                if text.len() > MAX_PAYLOAD_BYTES {
                    let _ = send(&mut socket, &DuplexMessage::error(None, "payload_too_large", "frame exceeds 1 MiB")).await;
                    continue;
                }
                handle_text(&mut socket, &state, &text).await;
            }
            Message::Binary(bytes) => {
                if bytes.len() > MAX_PAYLOAD_BYTES {
                    let _ = send(&mut socket, &DuplexMessage::error(None, "payload_too_large", "frame exceeds 1 MiB")).await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    let _ = socket
        .send(Message::Close(Some(CloseFrame { code: close_code::NORMAL, reason: Cow::from("service_stopping") })))
        .await;
    state.release_connection();
}

async fn handle_text(socket: &mut WebSocket, state: &AppState, text: &str) {
    let parsed: Result<DuplexMessage, _> = serde_json::from_str(text);
    let message = match parsed {
        Ok(m) => m,
        Err(e) => {
            let _ = send(socket, &DuplexMessage::error(None, "parse_error", e.to_string())).await;
            return;
        }
    };

    let response = match message {
        DuplexMessage::HookRequest { id, data } => {
            let worker = state.registry.find_by_capability(data.kind.as_str()).await;
            let reply = match worker {
                Some(worker) => state.dispatcher.dispatch(&worker, &data).await,
                None => hookbridge_protocol::HookResponse {
                    id: data.id,
                    success: false,
                    result: None,
                    error: Some(hookbridge_protocol::ErrorPayload {
                        kind: "NoWorkerAvailable".into(),
                        message: "no worker registered for this hook kind".into(),
                        correlation_id: data.correlation_id,
                    }),
                    performance: Default::default(),
                },
            };
            DuplexMessage::HookResponse { id, data: reply }
        }
        DuplexMessage::PerformanceQuery { id } => DuplexMessage::PerformanceResponse { id, data: state.metrics.overall() },
        DuplexMessage::HealthCheck { id } => DuplexMessage::HealthResponse { id, healthy: true },
        DuplexMessage::HookResponse { id, .. }
        | DuplexMessage::PerformanceResponse { id, .. }
        | DuplexMessage::HealthResponse { id, .. }
        | DuplexMessage::ConnectionConfirmed { id, .. } => {
            DuplexMessage::error(Some(id), "unexpected_message", "clients may not send response-typed messages")
        }
        DuplexMessage::Error { id, .. } => DuplexMessage::error(id, "unexpected_message", "clients may not send error-typed messages"),
    };

    let _ = send(socket, &response).await;
}

async fn send(socket: &mut WebSocket, message: &DuplexMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).expect("DuplexMessage always serializes");
    socket.send(Message::Text(text)).await
}
