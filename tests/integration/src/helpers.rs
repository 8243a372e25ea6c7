//! Test helpers for integration tests
//!
//! Spawns workers in-process on ephemeral ports and drives them with real
//! WebSocket clients.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use relay_bus::LocalBroker;
use relay_common::{identity_provider, AuthConfig, Claims, GatewayConfig};
use relay_db::MemoryMessageStore;
use relay_gateway::{spawn_worker, GatewayState, Worker};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// Secret the test workers verify tokens with
pub const TEST_SECRET: &str = "integration-test-secret";

/// How long a client waits for an expected frame
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Issue a token the test workers accept
pub fn token_for(user_id: &str, display_name: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        name: Some(display_name.to_string()),
        iat: now,
        exp: now + 3600,
    };

    // Only fails for unsupported key types, never for an HS256 secret
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Workers sharing one in-memory store and one in-process broker
pub struct TestCluster {
    pub store: Arc<MemoryMessageStore>,
    pub broker: Arc<LocalBroker>,
    workers: Vec<Worker>,
}

impl TestCluster {
    /// Start `count` workers with default gateway settings
    pub async fn start(count: usize) -> Result<Self> {
        Self::start_with_config(count, GatewayConfig::default()).await
    }

    /// Start `count` workers with custom gateway settings
    pub async fn start_with_config(count: usize, config: GatewayConfig) -> Result<Self> {
        let store = MemoryMessageStore::new_shared();
        let broker = LocalBroker::new_shared();
        let auth = AuthConfig {
            jwt_secret: Some(TEST_SECRET.to_string()),
            allow_guests: true,
        };

        let mut workers = Vec::with_capacity(count);
        for worker_id in 0..count {
            let state = GatewayState::new(
                store.clone(),
                Arc::new(broker.attach()),
                identity_provider(&auth),
                config.clone(),
            )
            .with_worker_id(worker_id as u16);

            let worker = spawn_worker(state, SocketAddr::from(([127, 0, 0, 1], 0))).await?;
            workers.push(worker);
        }

        Ok(Self {
            store,
            broker,
            workers,
        })
    }

    /// Address of worker `index`
    pub fn addr(&self, index: usize) -> SocketAddr {
        self.workers[index].local_addr()
    }

    pub fn worker(&self, index: usize) -> &Worker {
        &self.workers[index]
    }

    /// Connect an authenticated user to worker `index`
    pub async fn connect(&self, index: usize, name: &str) -> Result<TestClient> {
        TestClient::connect(self.addr(index), Some(&token_for(name, name)), None).await
    }

    /// Connect an authenticated user to worker `index`, resuming after `offset`
    pub async fn connect_at(&self, index: usize, name: &str, offset: i64) -> Result<TestClient> {
        TestClient::connect(self.addr(index), Some(&token_for(name, name)), Some(offset)).await
    }

    /// Shut every worker down
    pub async fn shutdown(self) -> Result<()> {
        for worker in self.workers {
            worker.shutdown().await?;
        }
        Ok(())
    }
}

/// WebSocket client speaking the gateway protocol
///
/// Frames read while waiting for an ack are kept and handed out by later
/// reads, so nothing the server sends is lost to a request.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    backlog: VecDeque<Value>,
    pub session_id: String,
    pub display_name: String,
    pub heartbeat_interval: u64,
    next_nonce: u64,
}

impl TestClient {
    /// Open a connection and wait for the Hello frame
    pub async fn connect(addr: SocketAddr, token: Option<&str>, offset: Option<i64>) -> Result<Self> {
        let mut params = Vec::new();
        if let Some(token) = token {
            params.push(format!("token={token}"));
        }
        if let Some(offset) = offset {
            params.push(format!("offset={offset}"));
        }
        let url = if params.is_empty() {
            format!("ws://{addr}/gateway")
        } else {
            format!("ws://{addr}/gateway?{}", params.join("&"))
        };

        let (ws, _) = connect_async(url).await?;
        let mut client = Self {
            ws,
            backlog: VecDeque::new(),
            session_id: String::new(),
            display_name: String::new(),
            heartbeat_interval: 0,
            next_nonce: 1,
        };

        let hello = client.recv().await?;
        if hello["op"] != 10 {
            bail!("expected Hello, got {hello}");
        }
        let d = &hello["d"];
        client.session_id = d["session_id"].as_str().unwrap_or_default().to_string();
        client.display_name = d["display_name"].as_str().unwrap_or_default().to_string();
        client.heartbeat_interval = d["heartbeat_interval"].as_u64().unwrap_or_default();

        Ok(client)
    }

    /// Send a raw text frame
    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.ws.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Send an operation and return the nonce it carries
    pub async fn send_op(&mut self, op: u8, d: Value) -> Result<u64> {
        let nonce = self.next_nonce;
        self.next_nonce += 1;
        let frame = json!({ "op": op, "n": nonce, "d": d });
        self.send_raw(&frame.to_string()).await?;
        Ok(nonce)
    }

    /// Next JSON frame from the server
    pub async fn recv(&mut self) -> Result<Value> {
        self.recv_within(RECV_TIMEOUT)
            .await?
            .ok_or_else(|| anyhow!("no frame within {RECV_TIMEOUT:?}"))
    }

    /// Next JSON frame, or `None` if nothing arrives within `wait`
    pub async fn recv_within(&mut self, wait: Duration) -> Result<Option<Value>> {
        if let Some(frame) = self.backlog.pop_front() {
            return Ok(Some(frame));
        }
        self.read_frame(wait).await
    }

    async fn read_frame(&mut self, wait: Duration) -> Result<Option<Value>> {
        loop {
            let Ok(next) = tokio::time::timeout(wait, self.ws.next()).await else {
                return Ok(None);
            };
            match next {
                Some(Ok(Message::Text(text))) => return Ok(Some(serde_json::from_str(&text)?)),
                Some(Ok(Message::Close(frame))) => bail!("connection closed: {frame:?}"),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => bail!("connection ended"),
            }
        }
    }

    /// Collect every frame that arrives within `wait`
    pub async fn collect_for(&mut self, wait: Duration) -> Result<Vec<Value>> {
        let mut frames: Vec<Value> = self.backlog.drain(..).collect();
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() {
                return Ok(frames);
            }
            match self.read_frame(left).await? {
                Some(frame) => frames.push(frame),
                None => return Ok(frames),
            }
        }
    }

    /// Send an operation and read until its ack, returning the ack payload
    ///
    /// Frames that arrive first stay queued for later reads.
    pub async fn request(&mut self, op: u8, d: Value) -> Result<Value> {
        let nonce = self.send_op(op, d).await?;
        loop {
            let frame = self
                .read_frame(RECV_TIMEOUT)
                .await?
                .ok_or_else(|| anyhow!("no ack for nonce {nonce}"))?;
            if frame["op"] == 6 && frame["n"] == nonce {
                return Ok(frame["d"].clone());
            }
            self.backlog.push_back(frame);
        }
    }

    /// Join a channel, returning the frames that arrived before the ack
    pub async fn join(&mut self, channel: &str) -> Result<Vec<Value>> {
        let start = self.backlog.len();
        let ack = self.request(2, json!({ "channel_id": channel })).await?;
        if ack.get("error").is_some() {
            bail!("join rejected: {ack}");
        }
        Ok(self.backlog.drain(start..).collect())
    }

    /// Send a chat message and return the ack payload
    pub async fn send_message(&mut self, channel: &str, content: &str, token: &str) -> Result<Value> {
        self.request(
            3,
            json!({ "channel_id": channel, "content": content, "idempotency_token": token }),
        )
        .await
    }

    pub async fn leave(&mut self, channel: &str) -> Result<Value> {
        self.request(4, json!({ "channel_id": channel })).await
    }

    /// Read until a dispatch of `event_type` arrives
    pub async fn recv_dispatch(&mut self, event_type: &str) -> Result<Value> {
        loop {
            let frame = self.recv().await?;
            if frame["op"] == 0 && frame["t"] == event_type {
                return Ok(frame["d"].clone());
            }
        }
    }

    /// Wait for the server to close the connection and return the close code
    pub async fn recv_close(&mut self) -> Result<u16> {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .context("no close frame")?;
            match next {
                Some(Ok(Message::Close(Some(frame)))) => return Ok(u16::from(frame.code)),
                Some(Ok(Message::Close(None))) | None => bail!("closed without a code"),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

/// `CHAT_MESSAGE` payloads among `frames`
pub fn chat_messages(frames: &[Value]) -> Vec<Value> {
    frames
        .iter()
        .filter(|f| f["op"] == 0 && f["t"] == "CHAT_MESSAGE")
        .map(|f| f["d"].clone())
        .collect()
}

/// Message ids of `CHAT_MESSAGE` payloads
pub fn message_ids(messages: &[Value]) -> Vec<i64> {
    messages.iter().filter_map(|m| m["id"].as_i64()).collect()
}

/// Initialize test logging once; honours `RUST_LOG`
pub fn init_test_tracing() {
    let _ = relay_common::try_init_tracing_with_config(&relay_common::TracingConfig::testing());
}
