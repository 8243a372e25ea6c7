//! Fixtures shared by unit tests

use std::sync::Arc;
use std::time::Duration;

use relay_bus::LocalFanoutBus;
use relay_common::{GatewayConfig, GuestIdentityProvider};
use relay_core::{Identity, MessageId, MessageStore};
use relay_db::MemoryMessageStore;
use tokio::sync::mpsc;

use crate::connection::{Connection, Outbound};
use crate::handlers::JoinHandler;
use crate::protocol::{ChannelRef, GatewayMessage, JoinChannelPayload};
use crate::server::GatewayState;

/// A single worker on in-memory backends with its dispatcher running
pub(crate) struct TestWorker {
    pub state: GatewayState,
    pub store: Arc<MemoryMessageStore>,
    pub bus: Arc<LocalFanoutBus>,
}

impl TestWorker {
    pub fn new() -> Self {
        Self::with_store_layer(|store| store as Arc<dyn MessageStore>)
    }

    /// A worker that reaches its memory store through `layer`
    pub fn with_store_layer(layer: impl FnOnce(Arc<MemoryMessageStore>) -> Arc<dyn MessageStore>) -> Self {
        let store = MemoryMessageStore::new_shared();
        let bus = Arc::new(LocalFanoutBus::standalone());
        let state = GatewayState::new(
            layer(store.clone()),
            bus.clone(),
            Arc::new(GuestIdentityProvider),
            GatewayConfig::default(),
        );
        state.event_dispatcher().clone().start();

        Self { state, store, bus }
    }

    /// An active connection for user `name`
    pub async fn connect(&self, name: &str) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(256);
        let conn = self.state.connection_manager().add_connection(
            format!("session-{name}-{}", uuid::Uuid::new_v4().simple()),
            Identity::user(name, name),
            tx,
            MessageId::ZERO,
        );
        conn.activate().await;
        (conn, rx)
    }

    /// Connect `name` and join `channel` under the identity's name
    pub async fn join(&self, name: &str, channel: &str) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (conn, rx) = self.connect(name).await;
        self.join_existing(&conn, channel).await;
        (conn, rx)
    }

    /// Connect `name` and join `channel` as `display_name`
    pub async fn join_as(
        &self,
        name: &str,
        channel: &str,
        display_name: &str,
    ) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (conn, rx) = self.connect(name).await;
        JoinHandler::handle(
            &self.state,
            &conn,
            JoinChannelPayload {
                channel_id: ChannelRef::from(channel),
                display_name: Some(display_name.to_string()),
            },
        )
        .await
        .unwrap();
        (conn, rx)
    }

    pub async fn join_existing(&self, conn: &Connection, channel: &str) {
        JoinHandler::handle(
            &self.state,
            conn,
            JoinChannelPayload {
                channel_id: ChannelRef::from(channel),
                display_name: None,
            },
        )
        .await
        .unwrap();
    }
}

/// Collect queued messages until the connection goes quiet
pub(crate) async fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<GatewayMessage> {
    let mut frames = Vec::new();
    while let Ok(Some(Outbound::Message(msg))) =
        tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
    {
        frames.push(msg);
    }
    frames
}
