//! Gateway server setup
//!
//! Builds the worker state from configuration, serves the WebSocket route and
//! runs the worker until it is asked to stop.

mod handler;
mod state;

pub use handler::{gateway_handler, HandshakeQuery};
pub use state::GatewayState;

use axum::{routing::get, Router};
use relay_bus::{LocalFanoutBus, RedisBusConfig, RedisFanoutBus};
use relay_common::{identity_provider, AppConfig, AppError, AppResult};
use relay_core::{FanoutBus, MessageStore};
use relay_db::{create_pool, PgMessageStore, PoolConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// How long shutdown waits for connections to finish their cleanup
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Create the gateway router
pub fn create_router() -> Router<GatewayState> {
    Router::new().route("/gateway", get(gateway_handler))
}

/// Build the complete application
pub fn create_app(state: GatewayState) -> Router {
    create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Initialize the store, bus and identity provider and create `GatewayState`
pub async fn build_state(config: &AppConfig) -> AppResult<GatewayState> {
    tracing::info!("Connecting to PostgreSQL...");
    let pool = create_pool(&PoolConfig::from(&config.database))
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    let store = PgMessageStore::new(pool).with_page_size(config.gateway.history_page_size);
    store.ensure_schema().await?;
    tracing::info!("PostgreSQL connection established");
    let store: Arc<dyn MessageStore> = Arc::new(store);

    let bus: Arc<dyn FanoutBus> = match &config.redis {
        Some(redis) => {
            tracing::info!("Connecting to Redis...");
            let bus = RedisFanoutBus::connect(RedisBusConfig::from(redis))
                .map_err(|e| AppError::Bus(e.to_string()))?;
            // The listener keeps retrying, so an unreachable Redis is not fatal
            match bus.ping().await {
                Ok(()) => tracing::info!("Redis fan-out bus ready"),
                Err(e) => tracing::warn!(error = %e, "Redis not reachable yet, fan-out degraded"),
            }
            Arc::new(bus)
        }
        None => {
            tracing::info!("REDIS_URL not set, fan-out stays within this worker");
            Arc::new(LocalFanoutBus::standalone())
        }
    };

    let state = GatewayState::new(
        store,
        bus,
        identity_provider(&config.auth),
        config.gateway.clone(),
    )
    .with_worker_id(config.worker_id);

    Ok(state)
}

/// A running worker
///
/// Dropping a `Worker` without calling [`Worker::shutdown`] leaves its tasks
/// running until the runtime stops.
pub struct Worker {
    state: GatewayState,
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: JoinHandle<std::io::Result<()>>,
}

impl Worker {
    /// Address the worker accepts connections on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// Stop accepting connections, close the open ones and release the bus
    pub async fn shutdown(mut self) -> AppResult<()> {
        let worker_id = self.state.worker_id();
        tracing::info!(worker_id, "Worker shutting down");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let closing = self
            .state
            .connection_manager()
            .close_all("Worker shutting down");

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while self.state.connection_manager().connection_count() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                worker_id,
                remaining = self.state.connection_manager().connection_count(),
                "Connections still open after drain timeout"
            );
        }

        match tokio::time::timeout(DRAIN_TIMEOUT, &mut self.server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!(worker_id, error = %e, "Server error"),
            Ok(Err(e)) => tracing::warn!(worker_id, error = %e, "Server task failed"),
            Err(_) => {
                tracing::warn!(worker_id, "Server did not stop in time");
                self.server.abort();
            }
        }

        self.state.event_dispatcher().stop().await;
        self.state.bus().shutdown().await?;
        self.state.registry().clear();

        tracing::info!(worker_id, closed = closing, "Worker stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Bind `addr`, start event dispatch and serve the gateway
pub async fn spawn_worker(state: GatewayState, addr: SocketAddr) -> AppResult<Worker> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Config(format!("Failed to bind to {addr}: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| AppError::Config(format!("Failed to read bound address: {e}")))?;

    state.event_dispatcher().clone().start();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = create_app(state.clone());
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tracing::info!(
        worker_id = state.worker_id(),
        "Gateway listening on ws://{}/gateway",
        local_addr
    );

    Ok(Worker {
        state,
        local_addr,
        shutdown_tx: Some(shutdown_tx),
        server,
    })
}

/// Run one worker on `port` until Ctrl-C
pub async fn start_worker(config: AppConfig, port: u16) -> AppResult<()> {
    let span = tracing::info_span!("worker", worker_id = config.worker_id, port);

    async move {
        let addr: SocketAddr = format!("{}:{}", config.server.host, port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid listen address: {e}")))?;

        let state = build_state(&config).await?;
        let worker = spawn_worker(state, addr).await?;

        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }

        worker.shutdown().await
    }
    .instrument(span)
    .await
}
