//! Recovery protocol
//!
//! Replays a channel's history to a connection that joins it, starting after
//! the last message id the connection is known to have. Live messages arriving
//! meanwhile are held by the connection's delivery cursor and flushed after the
//! history, so the client sees every message once and replay in ascending order.
//!
//! The same replay closes gaps in live delivery: when a message arrives before
//! its predecessor, [`GapFiller`] waits briefly for the predecessor and then
//! reads it from the store.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{ChannelId, MessageStore, StoreError};
use tokio::task::JoinHandle;

use crate::connection::Connection;

/// Wait before each gap fill attempt
pub const GAP_FILL_DELAY: Duration = Duration::from_millis(200);

/// Attempts before held messages are released with the gap left open
pub const GAP_FILL_ATTEMPTS: u32 = 5;

/// Outcome of one replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Historical messages sent
    pub replayed: usize,
    /// Live messages released after the history
    pub flushed: usize,
    /// Store reads issued
    pub pages: usize,
    /// Set when a store read failed part way
    pub error: Option<StoreError>,
}

impl RecoveryReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Replays history from a message store
pub struct RecoveryProtocol<'a> {
    store: &'a dyn MessageStore,
    page_size: usize,
}

impl<'a> RecoveryProtocol<'a> {
    /// `page_size` must match the store's own read cap; a shorter page ends the replay
    #[must_use]
    pub fn new(store: &'a dyn MessageStore, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Replay `channel_id` to `connection`
    ///
    /// A failed read is reported, not propagated: whatever was read is kept,
    /// buffered live messages are still flushed, and the connection stays usable.
    pub async fn replay(&self, connection: &Connection, channel_id: &ChannelId) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let mut offset = connection.begin_replay(channel_id);

        loop {
            let page = match self.store.read_since(channel_id, offset).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(
                        session_id = %connection.session_id(),
                        channel_id = %channel_id,
                        offset = %offset,
                        error = %e,
                        "History read failed"
                    );
                    report.error = Some(e);
                    break;
                }
            };
            report.pages += 1;

            let Some(last) = page.last() else {
                break;
            };
            offset = last.id;
            report.replayed += connection.replay_page(channel_id, &page).await;

            if page.len() < self.page_size {
                break;
            }
        }

        report.flushed = connection.finish_replay(channel_id).await;

        tracing::debug!(
            session_id = %connection.session_id(),
            channel_id = %channel_id,
            replayed = report.replayed,
            flushed = report.flushed,
            pages = report.pages,
            "Replay finished"
        );

        report
    }
}

/// Reads missing messages from the store when live delivery has a gap
#[derive(Clone)]
pub struct GapFiller {
    store: Arc<dyn MessageStore>,
    page_size: usize,
    delay: Duration,
    attempts: u32,
}

impl GapFiller {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size,
            delay: GAP_FILL_DELAY,
            attempts: GAP_FILL_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Close the gap in `channel_id` in the background
    pub fn spawn(&self, connection: Arc<Connection>, channel_id: ChannelId) -> JoinHandle<()> {
        let filler = self.clone();
        tokio::spawn(async move { filler.fill(&connection, &channel_id).await })
    }

    /// Wait for the missing message, replaying from the store between waits
    pub async fn fill(&self, connection: &Connection, channel_id: &ChannelId) {
        for _ in 0..self.attempts {
            tokio::time::sleep(self.delay).await;
            if connection.is_closed() {
                return;
            }

            if connection.has_gap(channel_id) && !connection.is_replaying(channel_id) {
                let report = RecoveryProtocol::new(self.store.as_ref(), self.page_size)
                    .replay(connection, channel_id)
                    .await;
                tracing::debug!(
                    session_id = %connection.session_id(),
                    channel_id = %channel_id,
                    replayed = report.replayed,
                    complete = report.is_complete(),
                    "Gap fill read history"
                );
            }

            if !connection.has_gap(channel_id) && !connection.fill_finished(channel_id) {
                return;
            }
        }

        let released = connection.release_held(channel_id);
        tracing::warn!(
            session_id = %connection.session_id(),
            channel_id = %channel_id,
            released,
            "Gap not filled, released held messages"
        );
    }
}

impl std::fmt::Debug for GapFiller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GapFiller")
            .field("page_size", &self.page_size)
            .field("delay", &self.delay)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}
