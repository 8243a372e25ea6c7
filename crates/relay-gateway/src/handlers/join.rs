//! Join Channel handler (op 2)

use super::HandlerResult;
use crate::connection::Connection;
use crate::protocol::{AckPayload, JoinChannelPayload};
use crate::recovery::RecoveryProtocol;
use crate::server::GatewayState;
use relay_core::{ChannelEvent, DomainError, Topic, UserJoinedEvent};

/// Longest display name accepted on join
pub const MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// Handles Join Channel messages
pub struct JoinHandler;

impl JoinHandler {
    /// Join a channel and replay what the connection missed
    ///
    /// The join itself always succeeds once the payload is valid: bus and
    /// store failures are logged and the client still gets its ack.
    pub async fn handle(
        state: &GatewayState,
        connection: &Connection,
        payload: JoinChannelPayload,
    ) -> HandlerResult<Option<AckPayload>> {
        let channel_id = payload.channel_id.parse()?;
        let display_name = match payload.display_name.as_deref().map(str::trim) {
            Some(name) if name.chars().count() > MAX_DISPLAY_NAME_LENGTH => {
                return Err(DomainError::ValidationError(format!(
                    "display name must be at most {MAX_DISPLAY_NAME_LENGTH} characters"
                ))
                .into());
            }
            Some(name) if !name.is_empty() => name.to_string(),
            _ => connection.identity().display_name.clone(),
        };

        // Buffer live messages before the dispatcher can route any to us
        connection.begin_replay(&channel_id);

        let members = {
            let lock = state.topic_lock(&channel_id);
            let _guard = lock.lock().await;

            let members =
                state
                    .registry()
                    .join(&channel_id, connection.session_id(), &display_name);

            let topic = Topic::channel(&channel_id);
            match state.bus().subscribe(&topic).await {
                Ok(true) => tracing::debug!(topic = %topic, "Subscribed to channel topic"),
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    session_id = %connection.session_id(),
                    topic = %topic,
                    error = %e,
                    "Subscribe failed; cross-worker events for this channel will be missed"
                ),
            }
            members
        };

        state
            .publish(&ChannelEvent::UserJoined(UserJoinedEvent {
                channel_id: channel_id.clone(),
                display_name: display_name.clone(),
                members,
            }))
            .await;

        let report = RecoveryProtocol::new(state.store(), state.config().history_page_size)
            .replay(connection, &channel_id)
            .await;

        // A message committed after the history read is still in flight
        if connection.has_gap(&channel_id) {
            if let Some(connection) = state.connection_manager().get_connection(connection.session_id()) {
                state
                    .event_dispatcher()
                    .gap_filler()
                    .spawn(connection, channel_id.clone());
            }
        }

        tracing::info!(
            session_id = %connection.session_id(),
            channel_id = %channel_id,
            display_name = %display_name,
            replayed = report.replayed,
            complete = report.is_complete(),
            "Joined channel"
        );

        Ok(Some(AckPayload::confirmed(format!("Joined channel {channel_id}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChannelRef;
    use crate::test_support::{drain, TestWorker};
    use relay_core::{ChannelId, MessageStore, NewMessage};

    fn join(channel: &str, name: Option<&str>) -> JoinChannelPayload {
        JoinChannelPayload {
            channel_id: ChannelRef::from(channel),
            display_name: name.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_join_acks_and_announces() {
        let worker = TestWorker::new();
        let (conn, mut rx) = worker.connect("alice").await;

        let ack = JoinHandler::handle(&worker.state, &conn, join("general", None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ack.confirmation.as_deref(), Some("Joined channel general"));

        let general = ChannelId::parse("general").unwrap();
        assert_eq!(worker.state.registry().members(&general), vec!["alice"]);
        assert_eq!(worker.bus.subscribed_topics(), vec![Topic::channel(&general)]);

        // USER_JOINED comes back through the dispatcher
        let frames = drain(&mut rx).await;
        assert!(frames.iter().any(|m| m.t.as_deref() == Some("USER_JOINED")));
    }

    #[tokio::test]
    async fn test_join_replays_history() {
        let worker = TestWorker::new();
        let general = ChannelId::parse("general").unwrap();
        worker
            .store
            .append(NewMessage::new(general.clone(), "bob", "hello", "tok-1"))
            .await
            .unwrap();

        let (conn, mut rx) = worker.connect("alice").await;
        JoinHandler::handle(&worker.state, &conn, join("general", Some(" Al ")))
            .await
            .unwrap();

        assert_eq!(worker.state.registry().members(&general), vec!["Al"]);
        let history: Vec<_> = drain(&mut rx)
            .await
            .into_iter()
            .filter(|m| m.t.as_deref() == Some("CHAT_MESSAGE"))
            .collect();
        assert_eq!(history.len(), 1);
        let d = history[0].d.as_ref().unwrap();
        assert_eq!(d["content"], "hello");
        assert_eq!(d["historical"], true);
    }

    #[tokio::test]
    async fn test_join_succeeds_when_store_is_down() {
        let worker = TestWorker::new();
        worker.store.set_available(false);
        let (conn, _rx) = worker.connect("alice").await;

        let ack = JoinHandler::handle(&worker.state, &conn, join("general", None))
            .await
            .unwrap()
            .unwrap();
        assert!(!ack.is_error());
    }

    #[tokio::test]
    async fn test_join_rejects_bad_channel() {
        let worker = TestWorker::new();
        let (conn, _rx) = worker.connect("alice").await;

        let err = JoinHandler::handle(&worker.state, &conn, join("   ", None))
            .await
            .unwrap_err();
        assert!(err.to_ack().unwrap().error.unwrap().starts_with("invalid: "));
        assert_eq!(worker.state.registry().channel_count(), 0);
    }

    #[tokio::test]
    async fn test_join_rejects_long_display_name() {
        let worker = TestWorker::new();
        let (conn, _rx) = worker.connect("alice").await;
        let long = "x".repeat(MAX_DISPLAY_NAME_LENGTH + 1);

        assert!(JoinHandler::handle(&worker.state, &conn, join("general", Some(&long)))
            .await
            .is_err());
    }
}
