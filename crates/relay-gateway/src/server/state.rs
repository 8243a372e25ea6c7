//! Gateway state
//!
//! Everything one worker shares between its connections.

use crate::broadcast::EventDispatcher;
use crate::connection::ConnectionManager;
use crate::recovery::GapFiller;
use crate::registry::ChannelRegistry;
use dashmap::DashMap;
use relay_common::GatewayConfig;
use relay_core::{ChannelEvent, ChannelId, FanoutBus, IdentityProvider, MessageStore, Topic};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Gateway application state
///
/// Holds all shared dependencies for one worker. Cloning is cheap.
#[derive(Clone)]
pub struct GatewayState {
    /// Connection manager for WebSocket connections
    connection_manager: Arc<ConnectionManager>,
    /// Local channel membership
    registry: Arc<ChannelRegistry>,
    /// Durable message log
    store: Arc<dyn MessageStore>,
    /// Cross-worker fan-out
    bus: Arc<dyn FanoutBus>,
    /// Handshake authentication
    identity_provider: Arc<dyn IdentityProvider>,
    /// Routes bus events to local connections
    event_dispatcher: Arc<EventDispatcher>,
    /// Serializes subscribe/unsubscribe decisions per channel
    topic_locks: Arc<DashMap<ChannelId, Arc<Mutex<()>>>>,
    config: Arc<GatewayConfig>,
    worker_id: u16,
}

impl GatewayState {
    /// Create a new gateway state
    ///
    /// The event dispatcher is created but not started.
    pub fn new(
        store: Arc<dyn MessageStore>,
        bus: Arc<dyn FanoutBus>,
        identity_provider: Arc<dyn IdentityProvider>,
        config: GatewayConfig,
    ) -> Self {
        let connection_manager = ConnectionManager::new_shared();
        let registry = Arc::new(ChannelRegistry::new());
        let event_dispatcher = Arc::new(EventDispatcher::new(
            bus.clone(),
            registry.clone(),
            connection_manager.clone(),
            GapFiller::new(store.clone(), config.history_page_size),
        ));

        Self {
            connection_manager,
            registry,
            store,
            bus,
            identity_provider,
            event_dispatcher,
            topic_locks: Arc::new(DashMap::new()),
            config: Arc::new(config),
            worker_id: 0,
        }
    }

    /// Tag this state with a worker id for logs
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: u16) -> Self {
        self.worker_id = worker_id;
        self
    }

    /// Get the connection manager
    pub fn connection_manager(&self) -> &ConnectionManager {
        &self.connection_manager
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn MessageStore {
        self.store.as_ref()
    }

    pub fn bus(&self) -> &dyn FanoutBus {
        self.bus.as_ref()
    }

    pub fn identity_provider(&self) -> &dyn IdentityProvider {
        self.identity_provider.as_ref()
    }

    /// Get the event dispatcher
    pub fn event_dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.event_dispatcher
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    /// Lock guarding the membership/subscription pair of one channel
    pub fn topic_lock(&self, channel_id: &ChannelId) -> Arc<Mutex<()>> {
        self.topic_locks
            .entry(channel_id.clone())
            .or_default()
            .clone()
    }

    /// Publish to the event's channel topic
    ///
    /// Failures are logged; they never undo what the caller already committed.
    pub async fn publish(&self, event: &ChannelEvent) -> bool {
        let topic = Topic::channel(event.channel_id());
        match self.bus.publish(&topic, event).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    worker_id = self.worker_id,
                    topic = %topic,
                    event_type = event.event_type(),
                    error = %e,
                    "Failed to publish event"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("worker_id", &self.worker_id)
            .field("connection_manager", &self.connection_manager)
            .field("channels", &self.registry.channel_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
