//! WebSocket handler
//!
//! Authenticates the handshake, then runs one connection until it closes.

use crate::connection::{Connection, Outbound};
use crate::handlers::{LeaveHandler, MessageDispatcher};
use crate::protocol::{CloseCode, GatewayMessage, HelloPayload, OpCode};
use crate::server::GatewayState;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use relay_common::{AppError, ErrorResponse};
use relay_core::{Credentials, Identity, MessageId};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;

/// How long a queued close frame may take to reach the socket
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Handshake query string
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    /// Last message id the client has seen
    pub offset: Option<i64>,
    /// Bearer token, for clients that cannot set headers
    pub token: Option<String>,
}

impl HandshakeQuery {
    fn credentials(&self, headers: &HeaderMap) -> Credentials {
        let header_token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        Credentials::from_token(self.token.as_deref().or(header_token))
    }

    fn offset(&self) -> MessageId {
        MessageId::new(self.offset.unwrap_or(0).max(0))
    }
}

/// WebSocket gateway handler
///
/// Credentials are checked before the upgrade; a rejected client gets a 401
/// and never reaches the Active state.
pub async fn gateway_handler(
    State(state): State<GatewayState>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let credentials = query.credentials(&headers);

    match state.identity_provider().authenticate(&credentials) {
        Ok(identity) => {
            let offset = query.offset();
            ws.on_upgrade(move |socket| handle_socket(state, socket, identity, offset))
        }
        Err(e) => {
            tracing::info!(error = %e, "Handshake rejected");
            let error = AppError::from(e);
            let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::UNAUTHORIZED);
            (status, Json(ErrorResponse::from(&error))).into_response()
        }
    }
}

/// Handle an upgraded WebSocket connection
async fn handle_socket(state: GatewayState, socket: WebSocket, identity: Identity, offset: MessageId) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let config = state.config().clone();

    // Create message channel for outgoing frames
    let (tx, mut rx) = mpsc::channel::<Outbound>(config.message_buffer_size.max(1));

    let hello = GatewayMessage::hello(
        HelloPayload::new(&session_id, &identity.display_name)
            .with_interval(config.heartbeat_interval_ms),
    );

    // Register connection
    let connection = state
        .connection_manager()
        .add_connection(session_id.clone(), identity, tx, offset);

    tracing::info!(
        worker_id = state.worker_id(),
        session_id = %session_id,
        display_name = %connection.identity().display_name,
        guest = connection.identity().is_guest(),
        offset = %offset,
        "WebSocket connection established"
    );

    // Split the WebSocket
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Send Hello message immediately
    if let Ok(json) = hello.to_json() {
        if ws_sink.send(Message::Text(json.into())).await.is_err() {
            tracing::warn!(session_id = %session_id, "Failed to send Hello message");
            cleanup_connection(&state, &connection).await;
            return;
        }
    }
    connection.activate().await;

    // Clone state for tasks
    let state_recv = state.clone();
    let connection_recv = connection.clone();

    // Spawn task to receive messages from WebSocket
    let mut recv_task = tokio::spawn(async move {
        let session_id = connection_recv.session_id().to_string();
        while let Some(msg) = ws_stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Err(close_code) =
                        handle_text_message(&state_recv, &connection_recv, &text).await
                    {
                        tracing::debug!(
                            session_id = %session_id,
                            close_code = %close_code,
                            client_fault = close_code.is_client_fault(),
                            "Closing connection due to error"
                        );
                        return Some(close_code);
                    }
                }
                Ok(Message::Binary(_)) => {
                    tracing::debug!(session_id = %session_id, "Binary messages not supported");
                    return Some(CloseCode::DecodeError);
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Pong is handled automatically by axum
                    tracing::trace!(session_id = %session_id, "Ping/Pong received");
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(session_id = %session_id, "Client closed connection");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "WebSocket error");
                    return None;
                }
            }
        }
        None
    });

    let connection_send = connection.clone();

    // Spawn task to write queued frames to the WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Message(mut msg) => {
                    // Sequence numbers follow the order frames hit the wire
                    if msg.op == OpCode::Dispatch {
                        msg.s = Some(connection_send.next_sequence());
                    }
                    let json = match msg.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to encode frame");
                            continue;
                        }
                    };
                    if ws_sink.send(Message::Text(json.into())).await.is_err() {
                        tracing::warn!(
                            session_id = %connection_send.session_id(),
                            "Failed to send message to WebSocket"
                        );
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = ws_sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }

        let _ = ws_sink.close().await;
    });

    let connection_hb = connection.clone();
    let heartbeat_timeout = Duration::from_millis(config.heartbeat_timeout_ms);
    let check_every = Duration::from_millis((config.heartbeat_interval_ms / 2).max(1));

    // Spawn heartbeat monitoring task
    let mut heartbeat_task = tokio::spawn(async move {
        let mut check_interval = interval(check_every);

        loop {
            check_interval.tick().await;

            let time_since = connection_hb.time_since_heartbeat().await;
            if time_since > heartbeat_timeout {
                tracing::warn!(
                    session_id = %connection_hb.session_id(),
                    time_since_ms = time_since.as_millis(),
                    "Connection timed out (no heartbeat)"
                );
                return CloseCode::SessionTimeout;
            }
        }
    });

    // Wait for any task to complete
    let mut send_done = false;
    let close = tokio::select! {
        result = &mut recv_task => result.ok().flatten().map(Outbound::close),
        _ = &mut send_task => {
            tracing::debug!(session_id = %session_id, "Send task ended");
            send_done = true;
            None
        }
        result = &mut heartbeat_task => result.ok().map(Outbound::close),
        frame = connection.close_requested() => {
            tracing::debug!(session_id = %session_id, "Close requested while queue full");
            Some(frame)
        }
    };

    recv_task.abort();
    heartbeat_task.abort();

    if !send_done {
        match close {
            Some(frame) => {
                // A client that stopped reading never frees queue space
                let queued = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, connection.queue_close(frame)).await;
                let flushed = matches!(queued, Ok(Ok(())))
                    && tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task)
                        .await
                        .is_ok();
                if !flushed {
                    send_task.abort();
                }
            }
            None => send_task.abort(),
        }
    }

    // Clean up
    cleanup_connection(&state, &connection).await;
}

/// Handle a text message from the client
async fn handle_text_message(
    state: &GatewayState,
    connection: &Arc<Connection>,
    text: &str,
) -> Result<(), CloseCode> {
    // Parse the message
    let message = match GatewayMessage::from_json(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(
                session_id = %connection.session_id(),
                error = %e,
                "Failed to parse message"
            );
            return Err(CloseCode::DecodeError);
        }
    };

    tracing::trace!(
        session_id = %connection.session_id(),
        op = %message.op,
        "Received message"
    );

    // Dispatch to handler
    match MessageDispatcher::dispatch(state, connection, message).await {
        Ok(Some(close_code)) => Err(close_code),
        Ok(None) => Ok(()),
        Err(e) => {
            tracing::warn!(
                session_id = %connection.session_id(),
                error = %e,
                "Handler error"
            );
            Err(e.to_close_code().unwrap_or(CloseCode::UnknownError))
        }
    }
}

/// Clean up a connection on disconnect
async fn cleanup_connection(state: &GatewayState, connection: &Arc<Connection>) {
    let session_id = connection.session_id();

    if !connection.close().await {
        return;
    }

    let channels = LeaveHandler::leave_all(state, session_id).await;
    state.connection_manager().remove_connection(session_id);

    tracing::info!(
        session_id = %session_id,
        channels = channels.len(),
        age_ms = connection.age().as_millis(),
        "Connection closed"
    );
}
