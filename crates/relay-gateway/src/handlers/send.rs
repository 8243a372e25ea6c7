//! Send Message handler (op 3)

use super::HandlerResult;
use crate::connection::Connection;
use crate::protocol::{AckPayload, SendMessagePayload};
use crate::server::GatewayState;
use relay_core::{ChannelEvent, ChatMessageEvent, NewMessage, StoreError};

/// Handles Send Message messages
pub struct SendHandler;

impl SendHandler {
    /// Persist a message, then fan it out
    ///
    /// Returns `Ok(None)` when the store is unavailable: no ack is sent, so the
    /// client retries with the same idempotency token.
    pub async fn handle(
        state: &GatewayState,
        connection: &Connection,
        payload: SendMessagePayload,
    ) -> HandlerResult<Option<AckPayload>> {
        let channel_id = payload.channel_id.parse()?;
        let sender = state
            .registry()
            .member_name(&channel_id, connection.session_id())
            .unwrap_or_else(|| connection.identity().display_name.clone());

        let new_message = NewMessage::new(
            channel_id.clone(),
            sender,
            payload.content,
            payload.idempotency_token,
        );

        match state.store().append(new_message).await {
            Ok(message) => {
                tracing::debug!(
                    session_id = %connection.session_id(),
                    channel_id = %channel_id,
                    message_id = %message.id,
                    "Message stored"
                );
                state
                    .publish(&ChannelEvent::ChatMessage(ChatMessageEvent::from(&message)))
                    .await;
                Ok(Some(AckPayload::ok()))
            }
            Err(StoreError::Duplicate { existing_id }) => {
                tracing::debug!(
                    session_id = %connection.session_id(),
                    channel_id = %channel_id,
                    existing_id = %existing_id,
                    "Duplicate send acknowledged"
                );
                Ok(Some(AckPayload::ok()))
            }
            Err(StoreError::Unavailable(reason)) => {
                tracing::warn!(
                    session_id = %connection.session_id(),
                    channel_id = %channel_id,
                    reason = %reason,
                    "Message store unavailable; withholding ack"
                );
                Ok(None)
            }
            Err(StoreError::Invalid(e)) => Err(e.into()),
        }
    }
}
