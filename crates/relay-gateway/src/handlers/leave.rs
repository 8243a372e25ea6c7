//! Leave Channel handler (op 4) and disconnect cleanup

use super::{HandlerError, HandlerResult};
use crate::connection::Connection;
use crate::protocol::{AckPayload, LeaveChannelPayload};
use crate::server::GatewayState;
use relay_core::{ChannelEvent, ChannelId, Topic, UserLeftEvent};

/// Handles Leave Channel messages
pub struct LeaveHandler;

impl LeaveHandler {
    /// Leave one channel
    pub async fn handle(
        state: &GatewayState,
        connection: &Connection,
        payload: LeaveChannelPayload,
    ) -> HandlerResult<Option<AckPayload>> {
        let channel_id = payload.channel_id.parse()?;

        let display_name = {
            let lock = state.topic_lock(&channel_id);
            let _guard = lock.lock().await;

            let name = state
                .registry()
                .leave_channel(&channel_id, connection.session_id())
                .ok_or_else(|| HandlerError::NotMember(channel_id.clone()))?;
            Self::release_topic(state, &channel_id).await;
            name
        };

        Self::announce(state, channel_id.clone(), display_name).await;

        tracing::info!(
            session_id = %connection.session_id(),
            channel_id = %channel_id,
            "Left channel"
        );

        Ok(Some(AckPayload::confirmed(format!("Left channel {channel_id}"))))
    }

    /// Remove a closing connection from every channel
    ///
    /// Publishes one USER_LEFT per channel and drops topic subscriptions that
    /// no longer have a local member. Returns the channels left.
    pub async fn leave_all(state: &GatewayState, session_id: &str) -> Vec<ChannelId> {
        let removed = state.registry().leave(session_id);
        let mut channels = Vec::with_capacity(removed.len());

        for (channel_id, display_name) in removed {
            {
                let lock = state.topic_lock(&channel_id);
                let _guard = lock.lock().await;
                Self::release_topic(state, &channel_id).await;
            }
            Self::announce(state, channel_id.clone(), display_name).await;
            channels.push(channel_id);
        }

        channels
    }

    /// Unsubscribe when the last local member is gone; caller holds the topic lock
    async fn release_topic(state: &GatewayState, channel_id: &ChannelId) {
        if state.registry().has_local_members(channel_id) {
            return;
        }

        let topic = Topic::channel(channel_id);
        match state.bus().unsubscribe(&topic).await {
            Ok(()) => tracing::debug!(topic = %topic, "Unsubscribed from channel topic"),
            Err(e) => tracing::warn!(topic = %topic, error = %e, "Unsubscribe failed"),
        }
    }

    async fn announce(state: &GatewayState, channel_id: ChannelId, display_name: String) {
        state
            .publish(&ChannelEvent::UserLeft(UserLeftEvent {
                channel_id,
                display_name,
            }))
            .await;
    }
}
