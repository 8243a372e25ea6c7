//! Fan-out bus port

use async_trait::async_trait;
use std::fmt;
use tokio::sync::broadcast;

use crate::error::BusError;
use crate::events::ChannelEvent;
use crate::value_objects::ChannelId;

/// Topic prefix for channel events
pub const CHANNEL_TOPIC_PREFIX: &str = "channel:";

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// A named publish/subscribe topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Topic carrying a channel's events
    #[must_use]
    pub fn channel(channel_id: &ChannelId) -> Self {
        Self(format!("{CHANNEL_TOPIC_PREFIX}{channel_id}"))
    }

    /// Wrap a raw topic name as received from a broker
    #[must_use]
    pub fn from_name(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Broker-level topic name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Channel id for `channel:` topics
    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.0
            .strip_prefix(CHANNEL_TOPIC_PREFIX)
            .and_then(|raw| ChannelId::parse(raw).ok())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event received from the bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: Topic,
    pub event: ChannelEvent,
}

/// Cross-process publish/subscribe layer
///
/// Every worker holds one bus handle. A publish is delivered to every worker
/// (publisher included) subscribed to the topic; order between two publishes on
/// the same topic from the same worker is preserved.
#[async_trait]
pub trait FanoutBus: Send + Sync {
    /// Publish an event to a topic
    async fn publish(&self, topic: &Topic, event: &ChannelEvent) -> BusResult<()>;

    /// Subscribe this worker to a topic.
    ///
    /// Idempotent; returns `true` when the subscription is new. Resolves once the
    /// subscription is active.
    async fn subscribe(&self, topic: &Topic) -> BusResult<bool>;

    /// Drop this worker's subscription to a topic
    async fn unsubscribe(&self, topic: &Topic) -> BusResult<()>;

    /// Stream of events for every topic this worker is subscribed to
    fn receiver(&self) -> broadcast::Receiver<BusMessage>;

    /// Stop receiving and release broker resources
    async fn shutdown(&self) -> BusResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_topic_name() {
        let topic = Topic::channel(&ChannelId::parse("general").unwrap());
        assert_eq!(topic.name(), "channel:general");
        assert_eq!(topic.to_string(), "channel:general");
    }

    #[test]
    fn test_topic_parse() {
        let topic = Topic::from_name("channel:random");
        assert_eq!(topic.channel_id().unwrap().as_str(), "random");

        assert!(Topic::from_name("user:1").channel_id().is_none());
        assert!(Topic::from_name("channel:").channel_id().is_none());
    }
}
