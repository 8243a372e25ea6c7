//! Heartbeat handler (op 1)

use super::{HandlerError, HandlerResult};
use crate::connection::Connection;
use crate::protocol::{AckPayload, GatewayMessage};
use relay_core::MessageId;

/// Handles heartbeat messages
pub struct HeartbeatHandler;

impl HeartbeatHandler {
    /// Handle a heartbeat from the client
    ///
    /// `last_seen` is the highest message id the client has received, if any.
    /// It becomes the offset for channels joined later on this connection.
    pub async fn handle(
        connection: &Connection,
        last_seen: Option<i64>,
    ) -> HandlerResult<Option<AckPayload>> {
        connection.record_heartbeat().await;

        if let Some(id) = last_seen.filter(|id| *id > 0) {
            connection.advance_last_acked(MessageId::new(id));
        }

        tracing::trace!(
            session_id = %connection.session_id(),
            client_offset = ?last_seen,
            server_seq = connection.current_sequence(),
            "Heartbeat received"
        );

        connection
            .send(GatewayMessage::heartbeat_ack())
            .await
            .map_err(|_| HandlerError::ConnectionClosed)?;

        Ok(None)
    }
}
