//! In-memory implementation of MessageStore

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use relay_core::{ChannelId, Message, MessageId, MessageStore, NewMessage, StoreError, StoreResult};

use super::DEFAULT_PAGE_SIZE;

#[derive(Default)]
struct Log {
    /// Ascending by id
    messages: Vec<Message>,
    by_token: HashMap<String, MessageId>,
    /// Newest id per channel
    heads: HashMap<ChannelId, MessageId>,
    last_id: i64,
}

/// Process-local message store
///
/// One mutex serializes appends, so id assignment, channel chaining and the
/// token check are a single step. Shared between workers in tests to stand in for the database.
pub struct MemoryMessageStore {
    log: Mutex<Log>,
    available: AtomicBool,
    page_size: usize,
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Log::default()),
            available: AtomicBool::new(true),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Create a new store wrapped in Arc for sharing
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Cap the number of messages a single `read_since` returns
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Simulate an outage: while unavailable every operation fails with `Unavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Total number of stored messages
    pub fn len(&self) -> usize {
        self.log.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, message: NewMessage) -> StoreResult<Message> {
        self.check_available()?;
        message.check()?;

        let mut log = self.log.lock();
        if let Some(&existing_id) = log.by_token.get(&message.idempotency_token) {
            debug!(%existing_id, "Duplicate append ignored");
            return Err(StoreError::Duplicate { existing_id });
        }

        log.last_id += 1;
        let id = MessageId::new(log.last_id);
        log.by_token.insert(message.idempotency_token.clone(), id);
        let previous_id = log
            .heads
            .insert(message.channel_id.clone(), id)
            .unwrap_or(MessageId::ZERO);

        let stored = Message::from_new(id, message, Utc::now()).following(previous_id);
        log.messages.push(stored.clone());
        Ok(stored)
    }

    async fn read_since(&self, channel_id: &ChannelId, after: MessageId) -> StoreResult<Vec<Message>> {
        self.check_available()?;

        let log = self.log.lock();
        let start = log.messages.partition_point(|m| m.id <= after);
        Ok(log.messages[start..]
            .iter()
            .filter(|m| &m.channel_id == channel_id)
            .take(self.page_size)
            .cloned()
            .collect())
    }

    async fn last_id(&self, channel_id: &ChannelId) -> StoreResult<MessageId> {
        self.check_available()?;

        let log = self.log.lock();
        Ok(log.heads.get(channel_id).copied().unwrap_or(MessageId::ZERO))
    }
}

impl std::fmt::Debug for MemoryMessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMessageStore")
            .field("len", &self.len())
            .field("available", &self.available.load(Ordering::SeqCst))
            .field("page_size", &self.page_size)
            .finish()
    }
}
