//! Individual WebSocket connection
//!
//! Represents a single WebSocket connection and its state.

use crate::events::ChatMessagePayload;
use crate::protocol::{CloseCode, GatewayMessage};
use parking_lot::Mutex;
use relay_core::{ChannelId, ChatMessageEvent, Identity, Message, MessageId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::{SendError, TrySendError};
use tokio::sync::{mpsc, Notify, RwLock};

use super::cursor::{ChannelCursor, Offer};

/// Connection state
///
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Upgraded, Hello not yet sent
    Connecting,
    /// Accepting operations
    Active,
    /// Torn down
    Closed,
}

/// Frame queued for the socket writer
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(GatewayMessage),
    Close { code: u16, reason: String },
}

impl Outbound {
    /// Close frame for a gateway close code
    #[must_use]
    pub fn close(code: CloseCode) -> Self {
        let (code, reason) = GatewayMessage::close_frame(code);
        Self::Close { code, reason }
    }
}

/// Result of offering a live chat message to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frames queued, counting held messages this one released
    Sent(usize),
    /// Waiting behind a running replay
    Buffered,
    /// Waiting for an earlier message; `fill` asks for a history read
    Held { fill: bool },
    Duplicate,
    /// Queue full or gone
    Dropped,
}

impl Delivery {
    #[must_use]
    pub fn sent(self) -> usize {
        match self {
            Self::Sent(n) => n,
            _ => 0,
        }
    }
}

/// A single WebSocket connection
pub struct Connection {
    /// Unique session ID
    session_id: String,

    /// Who is behind this connection
    identity: Identity,

    /// Current connection state
    state: RwLock<ConnectionState>,

    /// Channel to send frames to the WebSocket writer
    sender: mpsc::Sender<Outbound>,

    /// Last dispatch sequence number written
    sequence: AtomicU64,

    /// Last message id the client reported (handshake offset or heartbeat)
    last_acked: AtomicI64,

    /// Last heartbeat received
    last_heartbeat: RwLock<Instant>,

    /// Delivery cursors per joined channel
    cursors: Mutex<HashMap<ChannelId, ChannelCursor>>,

    /// Set once a frame could not be queued; nothing more is sent after that
    overflowed: AtomicBool,

    /// Close frame the socket loop must send because the queue was full
    close_request: Mutex<Option<Outbound>>,
    close_notify: Notify,

    /// Connection creation time
    created_at: Instant,
}

impl Connection {
    /// Create a new connection
    pub fn new(
        session_id: String,
        identity: Identity,
        sender: mpsc::Sender<Outbound>,
        last_acked: MessageId,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            identity,
            state: RwLock::new(ConnectionState::Connecting),
            sender,
            sequence: AtomicU64::new(0),
            last_acked: AtomicI64::new(last_acked.into_inner()),
            last_heartbeat: RwLock::new(Instant::now()),
            cursors: Mutex::new(HashMap::new()),
            overflowed: AtomicBool::new(false),
            close_request: Mutex::new(None),
            close_notify: Notify::new(),
            created_at: Instant::now(),
        })
    }

    /// Get the session ID
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Get the current state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Check if the connection accepts operations
    pub async fn is_active(&self) -> bool {
        self.state().await == ConnectionState::Active
    }

    /// Move from Connecting to Active; false in any other state
    pub async fn activate(&self) -> bool {
        let mut state = self.state.write().await;
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Active;
            true
        } else {
            false
        }
    }

    /// Move to Closed; false if it already was
    pub async fn close(&self) -> bool {
        let mut state = self.state.write().await;
        let was_open = *state != ConnectionState::Closed;
        *state = ConnectionState::Closed;
        was_open
    }

    /// Get the next sequence number
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Get the current sequence number
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Last message id reported by the client
    pub fn last_acked(&self) -> MessageId {
        MessageId::new(self.last_acked.load(Ordering::SeqCst))
    }

    /// Advance the reported offset; never moves backwards
    ///
    /// Message ids are global, so this one offset seeds the cursor of every
    /// channel joined later. A heartbeat carrying an id from one channel can
    /// therefore move a not yet joined channel's replay start past messages
    /// the client never saw there. Channels already joined keep their own
    /// cursor and are unaffected.
    pub fn advance_last_acked(&self, id: MessageId) {
        self.last_acked.fetch_max(id.into_inner(), Ordering::SeqCst);
    }

    /// Record a heartbeat received
    pub async fn record_heartbeat(&self) {
        *self.last_heartbeat.write().await = Instant::now();
    }

    /// Get time since last heartbeat
    pub async fn time_since_heartbeat(&self) -> std::time::Duration {
        self.last_heartbeat.read().await.elapsed()
    }

    /// Get connection age
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    // === Delivery ===
    //
    // Cursor locks are never held across an await. Live delivery only ever
    // uses `try_send`, so a client that stops reading cannot stall the caller.

    /// Arm a replay for `channel_id` and return the offset to read from
    ///
    /// Live messages for the channel are buffered until
    /// [`finish_replay`](Self::finish_replay).
    pub fn begin_replay(&self, channel_id: &ChannelId) -> MessageId {
        self.cursors
            .lock()
            .entry(channel_id.clone())
            .or_insert_with(|| ChannelCursor::starting_at(self.last_acked()))
            .begin_replay()
    }

    /// Send one page of history, skipping anything already delivered
    pub async fn replay_page(&self, channel_id: &ChannelId, page: &[Message]) -> usize {
        let frames: Vec<_> = {
            let mut cursors = self.cursors.lock();
            let cursor = cursors.entry(channel_id.clone()).or_default();
            page.iter()
                .filter(|message| cursor.mark_delivered(message.id))
                .map(|message| ChatMessagePayload::historical(message).into_dispatch())
                .collect()
        };

        let sent = frames.len();
        for frame in frames {
            self.send_frame(frame).await;
        }
        sent
    }

    /// End a replay and flush live messages buffered meanwhile
    pub async fn finish_replay(&self, channel_id: &ChannelId) -> usize {
        let mut flushed = 0;
        loop {
            let batch = {
                let mut cursors = self.cursors.lock();
                cursors
                    .get_mut(channel_id)
                    .map(ChannelCursor::finish_replay)
                    .unwrap_or_default()
            };
            if batch.is_empty() {
                return flushed;
            }

            flushed += batch.len();
            for event in &batch {
                self.send_frame(ChatMessagePayload::live(event).into_dispatch())
                    .await;
            }
        }
    }

    /// Offer a live chat message without waiting on the outbound queue
    pub fn deliver_live(&self, event: &ChatMessageEvent) -> Delivery {
        let mut cursors = self.cursors.lock();
        let cursor = cursors
            .entry(event.channel_id.clone())
            .or_insert_with(|| ChannelCursor::starting_at(self.last_acked()));

        match cursor.offer_live(event) {
            Offer::Deliver(events) => self.try_send_live(&events),
            Offer::Buffered => Delivery::Buffered,
            Offer::Held { fill } => Delivery::Held { fill },
            Offer::Duplicate => Delivery::Duplicate,
        }
    }

    /// True while some live message in `channel_id` waits for a predecessor
    pub fn has_gap(&self, channel_id: &ChannelId) -> bool {
        self.cursors
            .lock()
            .get(channel_id)
            .is_some_and(ChannelCursor::has_gap)
    }

    pub fn is_replaying(&self, channel_id: &ChannelId) -> bool {
        self.cursors
            .lock()
            .get(channel_id)
            .is_some_and(ChannelCursor::is_replaying)
    }

    /// A gap fill ended; true if the gap is still open
    pub fn fill_finished(&self, channel_id: &ChannelId) -> bool {
        self.cursors
            .lock()
            .get_mut(channel_id)
            .is_some_and(ChannelCursor::fill_finished)
    }

    /// Give up on a gap and send whatever was held behind it
    pub fn release_held(&self, channel_id: &ChannelId) -> usize {
        let mut cursors = self.cursors.lock();
        let Some(cursor) = cursors.get_mut(channel_id) else {
            return 0;
        };
        let events = cursor.release_held();
        self.try_send_live(&events).sent()
    }

    /// Highest message id delivered in a channel, if any cursor exists
    pub fn channel_offset(&self, channel_id: &ChannelId) -> Option<MessageId> {
        self.cursors
            .lock()
            .get(channel_id)
            .map(ChannelCursor::last_delivered)
    }

    fn try_send_live(&self, events: &[ChatMessageEvent]) -> Delivery {
        for event in events {
            if !self.try_send(ChatMessagePayload::live(event).into_dispatch()) {
                return Delivery::Dropped;
            }
        }
        Delivery::Sent(events.len())
    }

    // === Outbound ===

    /// Send a message to this connection, waiting for queue space
    pub async fn send(&self, message: GatewayMessage) -> Result<(), SendError<Outbound>> {
        self.sender.send(Outbound::Message(message)).await
    }

    /// Queue a message without waiting
    ///
    /// A full queue marks the connection overflowed: this and every later
    /// frame are dropped and the socket loop is asked to close with
    /// [`CloseCode::SlowConsumer`]. The client resumes from its last seen id.
    pub fn try_send(&self, message: GatewayMessage) -> bool {
        if self.is_overflowed() {
            return false;
        }
        match self.sender.try_send(Outbound::Message(message)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.mark_overflowed();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::SeqCst)
    }

    fn mark_overflowed(&self) {
        if self.overflowed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(
            session_id = %self.session_id,
            capacity = self.sender.max_capacity(),
            "Outbound queue full, disconnecting slow consumer"
        );
        self.request_close(Outbound::close(CloseCode::SlowConsumer));
    }

    /// Queue a close frame; the writer stops after sending it
    pub async fn close_with(&self, code: CloseCode) -> Result<(), SendError<Outbound>> {
        self.queue_close(Outbound::close(code)).await
    }

    /// Queue a prepared close frame, waiting for queue space
    pub async fn queue_close(&self, frame: Outbound) -> Result<(), SendError<Outbound>> {
        self.sender.send(frame).await
    }

    /// Ask for a close without waiting
    ///
    /// The frame is queued if there is room; otherwise the socket loop picks
    /// it up from [`close_requested`](Self::close_requested). False if the
    /// connection is gone or a close is already pending.
    pub fn request_close(&self, frame: Outbound) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                let mut slot = self.close_request.lock();
                if slot.is_some() {
                    return false;
                }
                *slot = Some(frame);
                self.close_notify.notify_one();
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Wait for a close requested while the queue was full
    pub async fn close_requested(&self) -> Outbound {
        loop {
            let frame = self.close_request.lock().take();
            if let Some(frame) = frame {
                return frame;
            }
            self.close_notify.notified().await;
        }
    }

    /// Check if the sender channel is closed
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn send_frame(&self, message: GatewayMessage) {
        if self.is_overflowed() {
            return;
        }
        if self.send(message).await.is_err() {
            tracing::trace!(session_id = %self.session_id, "Dropped frame for closed connection");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.session_id)
            .field("display_name", &self.identity.display_name)
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .field("created_at", &self.created_at)
            .finish()
    }
}
