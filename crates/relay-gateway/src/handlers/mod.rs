//! Op code handlers
//!
//! Handles incoming WebSocket messages based on their operation code.

mod error;
mod heartbeat;
mod join;
mod leave;
mod send;

pub use error::{HandlerError, HandlerResult};
pub use heartbeat::HeartbeatHandler;
pub use join::{JoinHandler, MAX_DISPLAY_NAME_LENGTH};
pub use leave::LeaveHandler;
pub use send::SendHandler;

use crate::connection::Connection;
use crate::protocol::{AckPayload, CloseCode, GatewayMessage, OpCode};
use crate::server::GatewayState;

/// Dispatch incoming client messages to appropriate handlers
pub struct MessageDispatcher;

impl MessageDispatcher {
    /// Handle an incoming client message
    ///
    /// Returns a close code when the connection must be closed. Request
    /// failures that only concern one request are answered with an error ack.
    pub async fn dispatch(
        state: &GatewayState,
        connection: &Connection,
        message: GatewayMessage,
    ) -> HandlerResult<Option<CloseCode>> {
        if !connection.is_active().await {
            tracing::warn!(
                session_id = %connection.session_id(),
                op = %message.op,
                "Operation on inactive connection"
            );
            return Ok(Some(CloseCode::NotAuthenticated));
        }

        // Validate that this is a client-sendable op code
        if !message.op.is_client_op() {
            tracing::warn!(
                session_id = %connection.session_id(),
                op = %message.op,
                "Received server-only op code from client"
            );
            return Ok(Some(CloseCode::UnknownOpcode));
        }

        let nonce = message.n.clone();
        let outcome = match message.op {
            OpCode::Heartbeat => {
                let offset = message.as_heartbeat_offset().flatten();
                HeartbeatHandler::handle(connection, offset).await
            }
            OpCode::JoinChannel => match message.as_join_channel() {
                Some(Ok(payload)) => JoinHandler::handle(state, connection, payload).await,
                Some(Err(e)) => Err(e.into()),
                None => Ok(None),
            },
            OpCode::SendMessage => match message.as_send_message() {
                Some(Ok(payload)) => SendHandler::handle(state, connection, payload).await,
                Some(Err(e)) => Err(e.into()),
                None => Ok(None),
            },
            OpCode::LeaveChannel => match message.as_leave_channel() {
                Some(Ok(payload)) => LeaveHandler::handle(state, connection, payload).await,
                Some(Err(e)) => Err(e.into()),
                None => Ok(None),
            },
            // These ops should never reach here due to is_client_op check
            _ => {
                tracing::error!(op = %message.op, "Unhandled client op code");
                return Ok(Some(CloseCode::UnknownOpcode));
            }
        };

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => match e.to_ack() {
                Some(ack) => {
                    tracing::debug!(
                        session_id = %connection.session_id(),
                        op = %message.op,
                        error = %e,
                        "Request rejected"
                    );
                    Some(ack)
                }
                None => return Err(e),
            },
        };

        if let Some(ack) = reply {
            Self::send_ack(connection, nonce, ack).await?;
        }
        Ok(None)
    }

    async fn send_ack(
        connection: &Connection,
        nonce: Option<serde_json::Value>,
        ack: AckPayload,
    ) -> HandlerResult<()> {
        connection
            .send(GatewayMessage::ack(nonce, ack))
            .await
            .map_err(|_| HandlerError::ConnectionClosed)
    }
}
