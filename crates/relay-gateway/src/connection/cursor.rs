//! Per-channel delivery cursor
//!
//! Delivery within a channel is contiguous: a live message goes out only once
//! the message before it in the channel (`previous_id`) has gone out. Messages
//! that arrive ahead of their predecessor are held until it shows up, either
//! live or from a history read. During a replay live messages are buffered and
//! merged in after the history, so replay and fan-out can overlap without the
//! client seeing a message twice or out of order.

use std::collections::BTreeMap;

use relay_core::{ChatMessageEvent, MessageId};

/// Held messages kept per channel before the cursor gives up on the gap
pub const HELD_LIMIT: usize = 1024;

/// What to do with a live message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    /// Send these now, in order; held messages it unblocked come after it
    Deliver(Vec<ChatMessageEvent>),
    /// A replay is running; released by [`ChannelCursor::finish_replay`]
    Buffered,
    /// Waiting for an earlier message. `fill` is set once per gap, for the
    /// caller to arrange a history read.
    Held { fill: bool },
    Duplicate,
}

#[derive(Debug, Default)]
pub struct ChannelCursor {
    last_delivered: MessageId,
    replaying: bool,
    pending: Vec<ChatMessageEvent>,
    held: BTreeMap<MessageId, ChatMessageEvent>,
    fill_scheduled: bool,
}

impl ChannelCursor {
    /// A cursor for a client that reports having seen everything up to `offset`
    #[must_use]
    pub fn starting_at(offset: MessageId) -> Self {
        Self {
            last_delivered: offset,
            ..Self::default()
        }
    }

    /// Highest id delivered (or acknowledged at handshake)
    #[must_use]
    pub fn last_delivered(&self) -> MessageId {
        self.last_delivered
    }

    #[must_use]
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    /// Number of live messages held back by a running replay
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of live messages waiting for a predecessor
    #[must_use]
    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    #[must_use]
    pub fn has_gap(&self) -> bool {
        !self.held.is_empty()
    }

    #[must_use]
    pub fn is_delivered(&self, id: MessageId) -> bool {
        id <= self.last_delivered
    }

    /// Start buffering live messages; returns the offset to replay from
    pub fn begin_replay(&mut self) -> MessageId {
        self.replaying = true;
        self.last_delivered
    }

    /// Record a history message as delivered; false if it already was
    ///
    /// History arrives in ascending id order, so this only moves forward.
    pub fn mark_delivered(&mut self, id: MessageId) -> bool {
        if self.is_delivered(id) {
            return false;
        }
        self.last_delivered = id;
        true
    }

    /// Offer a live message
    pub fn offer_live(&mut self, event: &ChatMessageEvent) -> Offer {
        if self.is_delivered(event.id) || self.held.contains_key(&event.id) {
            return Offer::Duplicate;
        }

        if self.replaying {
            self.pending.push(event.clone());
            return Offer::Buffered;
        }

        if event.previous_id <= self.last_delivered {
            self.last_delivered = event.id;
            let mut ready = vec![event.clone()];
            ready.extend(self.release_ready());
            return Offer::Deliver(ready);
        }

        self.held.insert(event.id, event.clone());
        if self.held.len() > HELD_LIMIT {
            tracing::warn!(
                channel_id = %event.channel_id,
                last_delivered = %self.last_delivered,
                held = self.held.len(),
                "Gap never filled, releasing held messages"
            );
            return Offer::Deliver(self.release_held());
        }

        let fill = !self.fill_scheduled;
        self.fill_scheduled = true;
        Offer::Held { fill }
    }

    /// Next batch of buffered live messages to send after a replay
    ///
    /// Call until it returns an empty batch; that call ends the replay. Live
    /// messages still missing a predecessor stay held.
    pub fn finish_replay(&mut self) -> Vec<ChatMessageEvent> {
        for event in std::mem::take(&mut self.pending) {
            if !self.is_delivered(event.id) {
                self.held.insert(event.id, event);
            }
        }

        let ready = self.release_ready();
        if ready.is_empty() {
            self.replaying = false;
        }
        ready
    }

    /// A gap fill ended; true if a gap is still open
    pub fn fill_finished(&mut self) -> bool {
        self.fill_scheduled = false;
        self.has_gap()
    }

    /// Give up on the gap and release every held message in id order
    pub fn release_held(&mut self) -> Vec<ChatMessageEvent> {
        self.fill_scheduled = false;
        let held = std::mem::take(&mut self.held);
        held.into_values()
            .filter(|event| self.mark_delivered(event.id))
            .collect()
    }

    /// Pop held messages whose predecessor has been delivered
    fn release_ready(&mut self) -> Vec<ChatMessageEvent> {
        let mut ready = Vec::new();
        while let Some(entry) = self.held.first_entry() {
            let event = entry.get();
            if event.id <= self.last_delivered {
                entry.remove();
            } else if event.previous_id <= self.last_delivered {
                let event = entry.remove();
                self.last_delivered = event.id;
                ready.push(event);
            } else {
                break;
            }
        }
        ready
    }
}
