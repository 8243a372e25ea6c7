//! Event dispatcher
//!
//! Receives channel events from the fan-out bus and delivers them to the local
//! connections that are members of the event's channel.
//!
//! Delivery never waits on a connection's outbound queue: a member whose queue
//! is full is disconnected as a slow consumer instead of stalling the others.

use crate::connection::{ConnectionManager, Delivery};
use crate::events::{UserJoinedPayload, UserLeftPayload};
use crate::recovery::GapFiller;
use crate::registry::ChannelRegistry;
use parking_lot::Mutex;
use relay_core::{BusMessage, ChannelEvent, FanoutBus};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

/// Event dispatcher that routes bus events to WebSocket connections
pub struct EventDispatcher {
    bus: Arc<dyn FanoutBus>,
    registry: Arc<ChannelRegistry>,
    /// Connection manager for sending messages
    connection_manager: Arc<ConnectionManager>,
    gap_filler: GapFiller,
    /// Whether the dispatcher is running
    running: AtomicBool,
    shutdown: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Bus messages handled so far
    handled: AtomicU64,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    pub fn new(
        bus: Arc<dyn FanoutBus>,
        registry: Arc<ChannelRegistry>,
        connection_manager: Arc<ConnectionManager>,
        gap_filler: GapFiller,
    ) -> Self {
        Self {
            bus,
            registry,
            connection_manager,
            gap_filler,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            task: Mutex::new(None),
            handled: AtomicU64::new(0),
        }
    }

    /// Start the event dispatcher
    ///
    /// The bus receiver is taken before this returns, so events published
    /// afterwards are never missed.
    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Event dispatcher is already running");
            return;
        }

        let receiver = self.bus.receiver();
        let dispatcher = self.clone();
        let handle = tokio::spawn(async move {
            dispatcher.run(receiver).await;
        });
        *self.task.lock() = Some(handle);

        tracing::info!("Event dispatcher started");
    }

    /// Stop the event dispatcher and wait for its loop to end
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Event dispatcher task failed");
            }
        }
        tracing::info!("Event dispatcher stopped");
    }

    /// Run the event dispatcher loop
    async fn run(&self, mut receiver: broadcast::Receiver<BusMessage>) {
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                () = self.shutdown.notified() => break,
                received = receiver.recv() => match received {
                    Ok(msg) => {
                        self.handle_message(msg);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Missed chat messages surface as gaps and are read from the store
                        tracing::warn!(lagged = n, "Event dispatcher lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!("Event dispatcher channel closed");
                        break;
                    }
                },
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Event dispatcher loop ended");
    }

    /// Deliver one bus message to the local members of its channel
    ///
    /// Returns how many members had frames queued.
    pub fn handle_message(&self, msg: BusMessage) -> usize {
        self.handled.fetch_add(1, Ordering::Relaxed);
        let channel_id = msg.event.channel_id();

        if msg.topic.channel_id().as_ref() != Some(channel_id) {
            tracing::debug!(
                topic = %msg.topic,
                channel_id = %channel_id,
                "Event does not match its topic, ignoring"
            );
            return 0;
        }

        let sessions = self.registry.connections(channel_id);
        let connections = self.connection_manager.get_connections(&sessions);
        let mut sent = 0;
        let mut dropped = 0;

        match &msg.event {
            ChannelEvent::ChatMessage(event) => {
                for conn in connections {
                    match conn.deliver_live(event) {
                        Delivery::Sent(_) => sent += 1,
                        Delivery::Held { fill: true } => {
                            tracing::debug!(
                                session_id = %conn.session_id(),
                                channel_id = %channel_id,
                                id = %event.id,
                                previous_id = %event.previous_id,
                                "Message arrived before its predecessor"
                            );
                            self.gap_filler.spawn(conn, channel_id.clone());
                        }
                        Delivery::Dropped => dropped += 1,
                        Delivery::Held { fill: false } | Delivery::Buffered | Delivery::Duplicate => {}
                    }
                }
            }
            ChannelEvent::UserJoined(event) => {
                let frame = UserJoinedPayload::from(event).into_dispatch();
                for conn in connections {
                    if conn.try_send(frame.clone()) {
                        sent += 1;
                    } else {
                        dropped += 1;
                    }
                }
            }
            ChannelEvent::UserLeft(event) => {
                let frame = UserLeftPayload::from(event).into_dispatch();
                for conn in connections {
                    if conn.try_send(frame.clone()) {
                        sent += 1;
                    } else {
                        dropped += 1;
                    }
                }
            }
        }

        tracing::trace!(
            channel_id = %channel_id,
            event_type = msg.event.event_type(),
            sent = sent,
            dropped = dropped,
            "Event dispatched to channel"
        );

        sent
    }

    /// Gap filler used for this worker's connections
    pub fn gap_filler(&self) -> &GapFiller {
        &self.gap_filler
    }

    /// Check if the dispatcher is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of bus messages handled
    pub fn handled_count(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("running", &self.is_running())
            .field("handled", &self.handled_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use relay_bus::LocalFanoutBus;
    use relay_core::{
        ChannelId, ChatMessageEvent, Identity, MessageId, MessageStore, NewMessage, Topic,
        UserLeftEvent,
    };
    use relay_db::MemoryMessageStore;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        bus: Arc<LocalFanoutBus>,
        store: Arc<MemoryMessageStore>,
        registry: Arc<ChannelRegistry>,
        manager: Arc<ConnectionManager>,
        dispatcher: Arc<EventDispatcher>,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(LocalFanoutBus::standalone());
        let store = MemoryMessageStore::new_shared();
        let registry = Arc::new(ChannelRegistry::new());
        let manager = ConnectionManager::new_shared();
        let dispatcher = Arc::new(EventDispatcher::new(
            bus.clone(),
            registry.clone(),
            manager.clone(),
            GapFiller::new(store.clone(), 500).with_delay(Duration::from_millis(10)),
        ));
        Fixture {
            bus,
            store,
            registry,
            manager,
            dispatcher,
        }
    }

    fn general() -> ChannelId {
        ChannelId::parse("general").unwrap()
    }

    fn chat(id: i64) -> ChannelEvent {
        ChannelEvent::ChatMessage(ChatMessageEvent {
            id: MessageId::new(id),
            previous_id: MessageId::new(id - 1),
            channel_id: general(),
            sender: "bob".to_string(),
            content: "hi".to_string(),
        })
    }

    fn on_topic(event: ChannelEvent) -> BusMessage {
        BusMessage {
            topic: Topic::channel(event.channel_id()),
            event,
        }
    }

    fn member_with_capacity(f: &Fixture, sid: &str, capacity: usize) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(capacity);
        f.manager
            .add_connection(sid.to_string(), Identity::guest(), tx, MessageId::ZERO);
        f.registry.join(&general(), sid, sid);
        rx
    }

    fn member(f: &Fixture, sid: &str) -> mpsc::Receiver<Outbound> {
        member_with_capacity(f, sid, 16)
    }

    fn chat_ids(rx: &mut mpsc::Receiver<Outbound>) -> Vec<i64> {
        let mut ids = Vec::new();
        while let Ok(Outbound::Message(m)) = rx.try_recv() {
            if let Some(id) = m.d.as_ref().and_then(|d| d["id"].as_i64()) {
                ids.push(id);
            }
        }
        ids
    }

    #[tokio::test]
    async fn test_routes_only_to_channel_members() {
        let f = fixture();
        let mut rx_member = member(&f, "a");
        let (tx, mut rx_other) = mpsc::channel(16);
        f.manager
            .add_connection("b".to_string(), Identity::guest(), tx, MessageId::ZERO);

        let sent = f.dispatcher.handle_message(on_topic(chat(1)));

        assert_eq!(sent, 1);
        assert!(matches!(rx_member.try_recv(), Ok(Outbound::Message(_))));
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_chat_delivered_once() {
        let f = fixture();
        let mut rx = member(&f, "a");
        let msg = on_topic(chat(1));

        assert_eq!(f.dispatcher.handle_message(msg.clone()), 1);
        assert_eq!(f.dispatcher.handle_message(msg), 0);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_overtaken_message_delivered_in_order() {
        let f = fixture();
        let mut rx = member(&f, "a");

        assert_eq!(f.dispatcher.handle_message(on_topic(chat(2))), 0);
        assert_eq!(f.dispatcher.handle_message(on_topic(chat(1))), 1);

        assert_eq!(chat_ids(&mut rx), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_missing_message_read_from_store() {
        let f = fixture();
        let mut rx = member(&f, "a");
        for i in 1..=2 {
            f.store
                .append(NewMessage::new(general(), "bob", format!("m{i}"), format!("tok-{i}")))
                .await
                .unwrap();
        }

        // Only the second message ever arrives on the bus
        f.dispatcher.handle_message(on_topic(chat(2)));

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Outbound::Message(first) = frame else {
            panic!("unexpected close");
        };
        let d = first.d.unwrap();
        assert_eq!(d["id"], 1);
        assert_eq!(d["historical"], true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(chat_ids(&mut rx), vec![2]);
    }

    #[tokio::test]
    async fn test_slow_member_does_not_hold_up_others() {
        let f = fixture();
        let _stalled = member_with_capacity(&f, "slow", 1);
        let mut rx = member(&f, "fast");

        for id in 1..=5 {
            f.dispatcher.handle_message(on_topic(chat(id)));
        }
        f.dispatcher.handle_message(on_topic(ChannelEvent::UserLeft(UserLeftEvent {
            channel_id: general(),
            display_name: "carol".to_string(),
        })));

        let mut fast = Vec::new();
        while let Ok(Outbound::Message(m)) = rx.try_recv() {
            fast.push(m);
        }
        assert_eq!(fast.len(), 6);
        assert_eq!(fast[5].t.as_deref(), Some("USER_LEFT"));

        let slow = f.manager.get_connection("slow").unwrap();
        assert!(slow.is_overflowed());
        assert!(matches!(
            slow.close_requested().await,
            Outbound::Close { code: 4008, .. }
        ));
    }

    #[tokio::test]
    async fn test_membership_events_are_dispatched() {
        let f = fixture();
        let mut rx = member(&f, "a");

        f.dispatcher.handle_message(on_topic(ChannelEvent::UserLeft(UserLeftEvent {
            channel_id: general(),
            display_name: "bob".to_string(),
        })));

        match rx.try_recv().unwrap() {
            Outbound::Message(m) => assert_eq!(m.t.as_deref(), Some("USER_LEFT")),
            Outbound::Close { .. } => panic!("unexpected close"),
        }
    }

    #[tokio::test]
    async fn test_mismatched_topic_ignored() {
        let f = fixture();
        let _rx = member(&f, "a");
        let other = ChannelId::parse("random").unwrap();

        let sent = f.dispatcher.handle_message(BusMessage {
            topic: Topic::channel(&other),
            event: chat(1),
        });
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let f = fixture();
        let mut rx = member(&f, "a");
        let topic = Topic::channel(&general());
        f.bus.subscribe(&topic).await.unwrap();

        f.dispatcher.clone().start();
        assert!(f.dispatcher.is_running());

        f.bus.publish(&topic, &chat(1)).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Outbound::Message(_)));

        f.dispatcher.stop().await;
        assert!(!f.dispatcher.is_running());
        assert_eq!(f.dispatcher.handled_count(), 1);
    }
}
