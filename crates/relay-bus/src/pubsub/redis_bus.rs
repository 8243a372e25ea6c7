//! Redis Pub/Sub fan-out bus.
//!
//! Events are published through the pooled connections and received on one
//! dedicated pub/sub connection per worker, driven by a background listener
//! task. Subscription changes go to the listener over a control channel and
//! are acknowledged once Redis has confirmed them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::Client;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};

use relay_core::{BusError, BusMessage, BusResult, ChannelEvent, FanoutBus, Topic};

use super::DEFAULT_BROADCAST_BUFFER;
use crate::pool::{redact_url, RedisPool, RedisPoolConfig, RedisResult};

/// Redis bus configuration
#[derive(Debug, Clone)]
pub struct RedisBusConfig {
    pub pool: RedisPoolConfig,
    /// Channel buffer size for broadcast
    pub broadcast_buffer: usize,
    /// Reconnection delay in milliseconds
    pub reconnect_delay_ms: u64,
    /// How long a subscribe call waits for Redis to confirm
    pub subscribe_timeout_ms: u64,
}

impl RedisBusConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            pool: RedisPoolConfig::new(url),
            ..Self::default()
        }
    }

    /// Set broadcast buffer size
    #[must_use]
    pub fn broadcast_buffer(mut self, size: usize) -> Self {
        self.broadcast_buffer = size;
        self
    }

    /// Set reconnection delay
    #[must_use]
    pub fn reconnect_delay_ms(mut self, delay: u64) -> Self {
        self.reconnect_delay_ms = delay;
        self
    }
}

impl Default for RedisBusConfig {
    fn default() -> Self {
        Self {
            pool: RedisPoolConfig::default(),
            broadcast_buffer: DEFAULT_BROADCAST_BUFFER,
            reconnect_delay_ms: 1000,
            subscribe_timeout_ms: 5000,
        }
    }
}

impl From<&relay_common::RedisConfig> for RedisBusConfig {
    fn from(config: &relay_common::RedisConfig) -> Self {
        Self {
            pool: RedisPoolConfig::from(config),
            ..Self::default()
        }
    }
}

/// Commands for subscription management
#[derive(Debug)]
enum ListenerCommand {
    Subscribe(String, oneshot::Sender<BusResult<bool>>),
    Unsubscribe(String, oneshot::Sender<BusResult<()>>),
    Shutdown,
}

/// Redis-backed `FanoutBus`
pub struct RedisFanoutBus {
    pool: RedisPool,
    config: RedisBusConfig,
    /// Topics held by the listener, restored after a reconnect
    subscribed: Arc<RwLock<HashSet<String>>>,
    broadcast_tx: broadcast::Sender<BusMessage>,
    control_tx: mpsc::Sender<ListenerCommand>,
}

impl RedisFanoutBus {
    /// Create the bus and start the background listener
    ///
    /// Returns once the pool is built; the listener connects (and reconnects)
    /// in the background.
    pub fn connect(config: RedisBusConfig) -> RedisResult<Self> {
        let pool = RedisPool::new(&config.pool)?;
        let client = Client::open(config.pool.url.as_str())?;

        let (broadcast_tx, _) = broadcast::channel(config.broadcast_buffer.max(1));
        let (control_tx, control_rx) = mpsc::channel(64);
        let subscribed = Arc::new(RwLock::new(HashSet::new()));

        tokio::spawn(listener_loop(
            client,
            config.clone(),
            subscribed.clone(),
            broadcast_tx.clone(),
            control_rx,
        ));

        Ok(Self {
            pool,
            config,
            subscribed,
            broadcast_tx,
            control_tx,
        })
    }

    /// Topics the listener holds
    pub async fn subscribed_topics(&self) -> Vec<Topic> {
        self.subscribed
            .read()
            .await
            .iter()
            .map(|name| Topic::from_name(name.clone()))
            .collect()
    }

    /// Ping Redis through the publishing pool
    pub async fn ping(&self) -> RedisResult<()> {
        self.pool.ping().await
    }

    async fn send_command(&self, command: ListenerCommand) -> BusResult<()> {
        self.control_tx
            .send(command)
            .await
            .map_err(|_| BusError::Closed)
    }

    async fn await_ack<T>(&self, rx: oneshot::Receiver<BusResult<T>>) -> BusResult<T> {
        let timeout = Duration::from_millis(self.config.subscribe_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => Err(BusError::Subscribe(
                "timed out waiting for Redis to confirm".to_string(),
            )),
        }
    }
}

#[async_trait]
impl FanoutBus for RedisFanoutBus {
    async fn publish(&self, topic: &Topic, event: &ChannelEvent) -> BusResult<()> {
        let payload = serde_json::to_string(event)?;
        let receivers = self
            .pool
            .publish(topic.name(), &payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;

        tracing::debug!(
            topic = %topic,
            event_type = event.event_type(),
            receivers,
            "Published event"
        );
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> BusResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.send_command(ListenerCommand::Subscribe(topic.name().to_string(), tx))
            .await?;
        self.await_ack(rx).await
    }

    async fn unsubscribe(&self, topic: &Topic) -> BusResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send_command(ListenerCommand::Unsubscribe(topic.name().to_string(), tx))
            .await?;
        self.await_ack(rx).await
    }

    fn receiver(&self) -> broadcast::Receiver<BusMessage> {
        self.broadcast_tx.subscribe()
    }

    async fn shutdown(&self) -> BusResult<()> {
        self.send_command(ListenerCommand::Shutdown).await
    }
}

impl std::fmt::Debug for RedisFanoutBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisFanoutBus")
            .field("url", &redact_url(&self.config.pool.url))
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Background listener loop
async fn listener_loop(
    client: Client,
    config: RedisBusConfig,
    subscribed: Arc<RwLock<HashSet<String>>>,
    broadcast_tx: broadcast::Sender<BusMessage>,
    mut control_rx: mpsc::Receiver<ListenerCommand>,
) {
    loop {
        match run_listener(&client, &subscribed, &broadcast_tx, &mut control_rx).await {
            Ok(()) => {
                tracing::info!("Bus listener shutting down");
                subscribed.write().await.clear();
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Bus listener error, reconnecting...");
                let delay = Duration::from_millis(config.reconnect_delay_ms);
                if !wait_for_reconnect(delay, &subscribed, &mut control_rx).await {
                    tracing::info!("Bus listener shutting down while disconnected");
                    break;
                }
            }
        }
    }
}

/// Sleep out the reconnect delay while still answering commands
///
/// Subscriptions requested meanwhile are recorded so the next connection
/// restores them, but reported as failed since nothing is delivered yet.
/// Returns `false` on shutdown.
async fn wait_for_reconnect(
    delay: Duration,
    subscribed: &Arc<RwLock<HashSet<String>>>,
    control_rx: &mut mpsc::Receiver<ListenerCommand>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return true,
            cmd = control_rx.recv() => match cmd {
                Some(ListenerCommand::Subscribe(topic, ack)) => {
                    subscribed.write().await.insert(topic);
                    let _ = ack.send(Err(BusError::Subscribe(
                        "Redis unavailable, subscription deferred until reconnect".to_string(),
                    )));
                }
                Some(ListenerCommand::Unsubscribe(topic, ack)) => {
                    subscribed.write().await.remove(&topic);
                    let _ = ack.send(Ok(()));
                }
                Some(ListenerCommand::Shutdown) | None => return false,
            },
        }
    }
}

/// Run the listener until error or shutdown
///
/// Returns `Ok` on shutdown; any error means the connection is gone and the
/// caller reconnects.
async fn run_listener(
    client: &Client,
    subscribed: &Arc<RwLock<HashSet<String>>>,
    broadcast_tx: &broadcast::Sender<BusMessage>,
    control_rx: &mut mpsc::Receiver<ListenerCommand>,
) -> redis::RedisResult<()> {
    let mut pubsub = client.get_async_pubsub().await?;

    // Restore subscriptions held before a reconnect
    {
        let topics = subscribed.read().await;
        for topic in topics.iter() {
            pubsub.subscribe(topic).await?;
        }
        if !topics.is_empty() {
            tracing::info!(topics = topics.len(), "Restored bus subscriptions");
        }
    }

    tracing::info!("Bus listener connected to Redis");

    let mut stream = pubsub.on_message();

    loop {
        tokio::select! {
            msg = stream.next() => {
                let Some(msg) = msg else {
                    return Err(redis::RedisError::from((
                        redis::ErrorKind::IoError,
                        "pub/sub stream ended",
                    )));
                };

                let topic = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(topic = %topic, error = %e, "Unreadable bus payload");
                        continue;
                    }
                };

                match serde_json::from_str::<ChannelEvent>(&payload) {
                    Ok(event) => {
                        // No receivers just means no dispatcher is running yet
                        let _ = broadcast_tx.send(BusMessage {
                            topic: Topic::from_name(topic),
                            event,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(topic = %topic, error = %e, "Dropping malformed bus event");
                    }
                }
            }

            cmd = control_rx.recv() => {
                match cmd {
                    Some(ListenerCommand::Subscribe(topic, ack)) => {
                        // The message stream borrows the connection; release it for the command
                        drop(stream);
                        let result = pubsub.subscribe(&topic).await;
                        stream = pubsub.on_message();

                        match result {
                            Ok(()) => {
                                let newly = subscribed.write().await.insert(topic.clone());
                                tracing::debug!(topic = %topic, newly, "Subscribed to topic");
                                let _ = ack.send(Ok(newly));
                            }
                            Err(e) => {
                                let _ = ack.send(Err(BusError::Subscribe(e.to_string())));
                                return Err(e);
                            }
                        }
                    }
                    Some(ListenerCommand::Unsubscribe(topic, ack)) => {
                        drop(stream);
                        let result = pubsub.unsubscribe(&topic).await;
                        stream = pubsub.on_message();

                        // Forget the topic either way so a reconnect does not restore it
                        subscribed.write().await.remove(&topic);
                        match result {
                            Ok(()) => {
                                tracing::debug!(topic = %topic, "Unsubscribed from topic");
                                let _ = ack.send(Ok(()));
                            }
                            Err(e) => {
                                let _ = ack.send(Err(BusError::Subscribe(e.to_string())));
                                return Err(e);
                            }
                        }
                    }
                    Some(ListenerCommand::Shutdown) | None => {
                        return Ok(());
                    }
                }
            }
        }
    }
}
