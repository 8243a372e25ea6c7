//! In-process fan-out bus.
//!
//! A [`LocalBroker`] plays the role of the shared broker for every worker
//! attached to it. Each [`LocalFanoutBus`] handle is one worker's view: its own
//! subscription set and its own broadcast channel.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use relay_core::{BusError, BusMessage, BusResult, ChannelEvent, FanoutBus, Topic};

use super::DEFAULT_BROADCAST_BUFFER;

struct Endpoint {
    topics: RwLock<HashSet<Topic>>,
    tx: broadcast::Sender<BusMessage>,
    closed: AtomicBool,
}

impl Endpoint {
    fn is_subscribed(&self, topic: &Topic) -> bool {
        !self.closed.load(Ordering::Acquire) && self.topics.read().contains(topic)
    }
}

/// Shared in-process broker
#[derive(Default)]
pub struct LocalBroker {
    endpoints: RwLock<Vec<Weak<Endpoint>>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new broker wrapped in Arc for sharing
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Attach a worker with the default broadcast buffer
    pub fn attach(self: &Arc<Self>) -> LocalFanoutBus {
        self.attach_with_buffer(DEFAULT_BROADCAST_BUFFER)
    }

    /// Attach a worker and return its bus handle
    pub fn attach_with_buffer(self: &Arc<Self>, buffer: usize) -> LocalFanoutBus {
        let (tx, _) = broadcast::channel(buffer.max(1));
        let endpoint = Arc::new(Endpoint {
            topics: RwLock::new(HashSet::new()),
            tx,
            closed: AtomicBool::new(false),
        });

        let mut endpoints = self.endpoints.write();
        endpoints.retain(|e| e.strong_count() > 0);
        endpoints.push(Arc::downgrade(&endpoint));

        LocalFanoutBus {
            broker: Arc::clone(self),
            endpoint,
        }
    }

    /// Number of attached workers still alive
    pub fn worker_count(&self) -> usize {
        self.endpoints
            .read()
            .iter()
            .filter(|e| e.upgrade().is_some_and(|e| !e.closed.load(Ordering::Acquire)))
            .count()
    }

    /// Deliver to every subscribed worker; returns how many received it
    fn deliver(&self, message: &BusMessage) -> usize {
        let endpoints = self.endpoints.read();
        let mut receivers = 0;
        for endpoint in endpoints.iter().filter_map(Weak::upgrade) {
            if endpoint.is_subscribed(&message.topic) {
                // A worker without a live receiver simply misses the event
                if endpoint.tx.send(message.clone()).is_ok() {
                    receivers += 1;
                }
            }
        }
        receivers
    }
}

impl std::fmt::Debug for LocalBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBroker")
            .field("workers", &self.worker_count())
            .finish()
    }
}

/// One worker's handle on a [`LocalBroker`]
pub struct LocalFanoutBus {
    broker: Arc<LocalBroker>,
    endpoint: Arc<Endpoint>,
}

impl LocalFanoutBus {
    /// Standalone bus for a single worker
    pub fn standalone() -> Self {
        LocalBroker::new_shared().attach()
    }

    /// Topics this worker is subscribed to
    pub fn subscribed_topics(&self) -> Vec<Topic> {
        self.endpoint.topics.read().iter().cloned().collect()
    }

    fn ensure_open(&self) -> BusResult<()> {
        if self.endpoint.closed.load(Ordering::Acquire) {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FanoutBus for LocalFanoutBus {
    async fn publish(&self, topic: &Topic, event: &ChannelEvent) -> BusResult<()> {
        self.ensure_open()?;

        let message = BusMessage {
            topic: topic.clone(),
            event: event.clone(),
        };
        let receivers = self.broker.deliver(&message);

        tracing::trace!(
            topic = %topic,
            event_type = event.event_type(),
            receivers,
            "Published event"
        );
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> BusResult<bool> {
        self.ensure_open()?;
        Ok(self.endpoint.topics.write().insert(topic.clone()))
    }

    async fn unsubscribe(&self, topic: &Topic) -> BusResult<()> {
        self.ensure_open()?;
        self.endpoint.topics.write().remove(topic);
        Ok(())
    }

    fn receiver(&self) -> broadcast::Receiver<BusMessage> {
        self.endpoint.tx.subscribe()
    }

    async fn shutdown(&self) -> BusResult<()> {
        self.endpoint.closed.store(true, Ordering::Release);
        self.endpoint.topics.write().clear();
        Ok(())
    }
}

impl std::fmt::Debug for LocalFanoutBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFanoutBus")
            .field("topics", &self.endpoint.topics.read().len())
            .field("closed", &self.endpoint.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
