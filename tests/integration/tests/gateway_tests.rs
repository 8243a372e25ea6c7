//! Gateway Integration Tests
//!
//! Workers run in-process on ephemeral ports, sharing an in-memory message
//! store and an in-process broker, so no external services are needed.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::time::Duration;

use anyhow::Result;
use integration_tests::{
    chat_messages, init_test_tracing, message_ids, token_for, TestClient, TestCluster,
};
use relay_common::GatewayConfig;
use relay_core::{ChannelId, MessageId, MessageStore};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite;

const QUIET: Duration = Duration::from_millis(300);

fn general() -> ChannelId {
    ChannelId::parse("general").unwrap()
}

async fn stored_ids(cluster: &TestCluster, channel: &ChannelId) -> Vec<MessageId> {
    cluster
        .store
        .read_since(channel, MessageId::ZERO)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect()
}

/// Read until a `USER_JOINED` for `name` arrives
async fn recv_joined(client: &mut TestClient, name: &str) -> Result<Value> {
    loop {
        let d = client.recv_dispatch("USER_JOINED").await?;
        if d["display_name"] == name {
            return Ok(d);
        }
    }
}

// ============================================================================
// Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_hello_carries_identity() -> Result<()> {
    init_test_tracing();
    let cluster = TestCluster::start(1).await?;

    let alice = TestClient::connect(cluster.addr(0), Some(&token_for("u-1", "alice")), None).await?;
    assert_eq!(alice.display_name, "alice");
    assert!(!alice.session_id.is_empty());
    assert_eq!(alice.heartbeat_interval, 45_000);

    let guest = TestClient::connect(cluster.addr(0), None, None).await?;
    assert!(guest.display_name.starts_with("guest-"));
    assert_ne!(guest.session_id, alice.session_id);

    cluster.shutdown().await
}

#[tokio::test]
async fn test_bad_token_rejected_before_upgrade() -> Result<()> {
    let cluster = TestCluster::start(1).await?;

    let err = TestClient::connect(cluster.addr(0), Some("not-a-jwt"), None)
        .await
        .err()
        .expect("handshake should fail");

    match err.downcast_ref::<tungstenite::Error>() {
        Some(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP 401, got {other:?}"),
    }
    assert_eq!(cluster.worker(0).state().connection_manager().connection_count(), 0);

    cluster.shutdown().await
}

#[tokio::test]
async fn test_heartbeat_is_answered() -> Result<()> {
    let cluster = TestCluster::start(1).await?;
    let mut alice = cluster.connect(0, "alice").await?;

    alice.send_op(1, Value::Null).await?;
    let frame = alice.recv().await?;
    assert_eq!(frame["op"], 11);

    alice.send_op(1, json!(5)).await?;
    assert_eq!(alice.recv().await?["op"], 11);

    cluster.shutdown().await
}

#[tokio::test]
async fn test_missed_heartbeats_time_out() -> Result<()> {
    let config = GatewayConfig {
        heartbeat_interval_ms: 100,
        heartbeat_timeout_ms: 300,
        ..GatewayConfig::default()
    };
    let cluster = TestCluster::start_with_config(1, config).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    assert_eq!(alice.heartbeat_interval, 100);

    assert_eq!(alice.recv_close().await?, 4009);

    cluster.shutdown().await
}

// ============================================================================
// Send / Idempotency Tests
// ============================================================================

#[tokio::test]
async fn test_resend_same_token_stores_once() -> Result<()> {
    let cluster = TestCluster::start(1).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    alice.join("general").await?;

    let ack = alice.send_message("general", "hello", "tok-1").await?;
    assert_eq!(ack, json!({}));
    assert_eq!(cluster.store.len(), 1);

    let ack = alice.send_message("general", "hello", "tok-1").await?;
    assert_eq!(ack, json!({}));
    assert_eq!(cluster.store.len(), 1);

    let history = cluster.store.read_since(&general(), MessageId::ZERO).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, MessageId::new(1));
    assert_eq!(history[0].content, "hello");

    cluster.shutdown().await
}

#[tokio::test]
async fn test_duplicate_is_not_rebroadcast() -> Result<()> {
    let cluster = TestCluster::start(2).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    let mut bob = cluster.connect(1, "bob").await?;
    alice.join("general").await?;
    bob.join("general").await?;

    alice.send_message("general", "hello", "tok-1").await?;
    alice.send_message("general", "hello", "tok-1").await?;

    let received = chat_messages(&bob.collect_for(QUIET).await?);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["content"], "hello");
    assert_eq!(received[0]["sender"], "alice");
    assert_eq!(received[0]["historical"], false);

    cluster.shutdown().await
}

#[tokio::test]
async fn test_unavailable_store_withholds_ack() -> Result<()> {
    let cluster = TestCluster::start(1).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    alice.join("general").await?;

    cluster.store.set_available(false);
    alice
        .send_op(
            3,
            json!({ "channel_id": "general", "content": "hello", "idempotency_token": "tok-1" }),
        )
        .await?;
    let frames = alice.collect_for(QUIET).await?;
    assert!(frames.iter().all(|f| f["op"] != 6), "no ack expected: {frames:?}");
    assert!(cluster.store.is_empty());

    // The client retries with the same token once the store is back
    cluster.store.set_available(true);
    let ack = alice.send_message("general", "hello", "tok-1").await?;
    assert_eq!(ack, json!({}));
    assert_eq!(cluster.store.len(), 1);

    cluster.shutdown().await
}

#[tokio::test]
async fn test_invalid_send_is_acked_with_error() -> Result<()> {
    let cluster = TestCluster::start(1).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    alice.join("general").await?;

    let ack = alice.send_message("general", "", "tok-1").await?;
    assert!(ack["error"].as_str().unwrap_or_default().starts_with("invalid: "));
    assert!(cluster.store.is_empty());

    // The connection stays usable
    let ack = alice.send_message("general", "fine", "tok-2").await?;
    assert_eq!(ack, json!({}));

    cluster.shutdown().await
}

// ============================================================================
// Fan-out Tests
// ============================================================================

#[tokio::test]
async fn test_fanout_reaches_members_on_every_worker() -> Result<()> {
    let cluster = TestCluster::start(2).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    let mut bob = cluster.connect(1, "bob").await?;
    let mut carol = cluster.connect(1, "carol").await?;
    alice.join("general").await?;
    bob.join("general").await?;
    carol.join("general").await?;

    bob.send_message("general", "hi all", "tok-b1").await?;

    for client in [&mut alice, &mut bob, &mut carol] {
        let d = client.recv_dispatch("CHAT_MESSAGE").await?;
        assert_eq!(d["content"], "hi all");
        assert_eq!(d["channel_id"], "general");
        assert_eq!(d["sender"], "bob");
    }

    cluster.shutdown().await
}

#[tokio::test]
async fn test_channels_are_isolated() -> Result<()> {
    let cluster = TestCluster::start(2).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    let mut bob = cluster.connect(1, "bob").await?;
    alice.join("general").await?;
    bob.join("random").await?;

    bob.send_message("random", "off topic", "tok-r1").await?;
    assert_eq!(bob.recv_dispatch("CHAT_MESSAGE").await?["channel_id"], "random");

    let frames = alice.collect_for(QUIET).await?;
    assert!(chat_messages(&frames).is_empty(), "leaked: {frames:?}");

    cluster.shutdown().await
}

#[tokio::test]
async fn test_messages_arrive_in_store_order() -> Result<()> {
    let cluster = TestCluster::start(2).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    let mut bob = cluster.connect(1, "bob").await?;
    alice.join("general").await?;
    bob.join("general").await?;

    for i in 0..20 {
        alice.send_message("general", &format!("m{i}"), &format!("tok-{i}")).await?;
    }

    let mut received = Vec::new();
    for _ in 0..20 {
        received.push(bob.recv_dispatch("CHAT_MESSAGE").await?);
    }

    let ids = message_ids(&received);
    let stored: Vec<i64> = stored_ids(&cluster, &general())
        .await
        .into_iter()
        .map(MessageId::into_inner)
        .collect();
    assert_eq!(ids, stored);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    let contents: Vec<&str> = received.iter().filter_map(|m| m["content"].as_str()).collect();
    assert_eq!(contents, (0..20).map(|i| format!("m{i}")).collect::<Vec<_>>());

    cluster.shutdown().await
}

#[tokio::test]
async fn test_dispatch_sequence_increases() -> Result<()> {
    let cluster = TestCluster::start(1).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    alice.join("general").await?;
    alice.send_message("general", "one", "tok-1").await?;
    alice.send_message("general", "two", "tok-2").await?;

    let frames = alice.collect_for(QUIET).await?;
    let seqs: Vec<u64> = frames
        .iter()
        .filter(|f| f["op"] == 0)
        .filter_map(|f| f["s"].as_u64())
        .collect();
    assert!(!seqs.is_empty());
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    cluster.shutdown().await
}

// ============================================================================
// Recovery Tests
// ============================================================================

#[tokio::test]
async fn test_replay_after_offset_on_another_worker() -> Result<()> {
    let cluster = TestCluster::start(2).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    alice.join("general").await?;
    for i in 0..5 {
        alice.send_message("general", &format!("m{i}"), &format!("tok-{i}")).await?;
    }
    let ids = stored_ids(&cluster, &general()).await;

    let mut carol = cluster.connect_at(1, "carol", ids[1].into_inner()).await?;
    let replayed = chat_messages(&carol.join("general").await?);

    assert_eq!(
        message_ids(&replayed),
        ids[2..].iter().map(|id| id.into_inner()).collect::<Vec<_>>()
    );
    assert!(replayed.iter().all(|m| m["historical"] == true));

    cluster.shutdown().await
}

#[tokio::test]
async fn test_replay_then_live_without_duplicates() -> Result<()> {
    let cluster = TestCluster::start(2).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    alice.join("general").await?;
    for i in 0..3 {
        alice.send_message("general", &format!("m{i}"), &format!("tok-{i}")).await?;
    }

    let mut carol = cluster.connect(1, "carol").await?;
    let replayed = chat_messages(&carol.join("general").await?);
    assert_eq!(message_ids(&replayed), vec![1, 2, 3]);

    alice.send_message("general", "live", "tok-live").await?;
    let live = carol.recv_dispatch("CHAT_MESSAGE").await?;
    assert_eq!(live["id"], 4);
    assert_eq!(live["historical"], false);

    let rest = chat_messages(&carol.collect_for(QUIET).await?);
    assert!(rest.is_empty(), "duplicates: {rest:?}");

    cluster.shutdown().await
}

#[tokio::test]
async fn test_rejoin_resumes_from_channel_cursor() -> Result<()> {
    let cluster = TestCluster::start(1).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    let mut bob = cluster.connect(0, "bob").await?;
    alice.join("general").await?;
    bob.join("general").await?;

    alice.send_message("general", "first", "tok-1").await?;
    bob.recv_dispatch("CHAT_MESSAGE").await?;
    bob.leave("general").await?;

    alice.send_message("general", "missed", "tok-2").await?;

    let replayed = chat_messages(&bob.join("general").await?);
    assert_eq!(message_ids(&replayed), vec![2]);

    cluster.shutdown().await
}

// ============================================================================
// Membership Tests
// ============================================================================

#[tokio::test]
async fn test_membership_events() -> Result<()> {
    let cluster = TestCluster::start(2).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    alice.join("general").await?;

    let mut bob = cluster.connect(1, "bob").await?;
    bob.join("general").await?;
    let joined = recv_joined(&mut alice, "bob").await?;
    assert_eq!(joined["channel_id"], "general");
    assert_eq!(joined["members"], json!(["bob"]));

    let ack = bob.leave("general").await?;
    assert_eq!(ack["confirmation"], "Left channel general");
    let left = alice.recv_dispatch("USER_LEFT").await?;
    assert_eq!(left["display_name"], "bob");

    // Disconnecting leaves every channel
    let mut carol = cluster.connect(0, "carol").await?;
    carol.join("general").await?;
    recv_joined(&mut alice, "carol").await?;
    carol.close().await?;
    let left = alice.recv_dispatch("USER_LEFT").await?;
    assert_eq!(left["display_name"], "carol");

    cluster.shutdown().await
}

/// Dispatches of `event_type` about `name` among `frames`
fn count_events(frames: &[Value], event_type: &str, name: &str) -> usize {
    frames
        .iter()
        .filter(|f| f["op"] == 0 && f["t"] == event_type && f["d"]["display_name"] == name)
        .count()
}

#[tokio::test]
async fn test_membership_announced_once_and_lists_stay_current() -> Result<()> {
    let cluster = TestCluster::start(2).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    alice.join("general").await?;

    let mut bob = cluster.connect(1, "bob").await?;
    bob.join("general").await?;
    let frames = alice.collect_for(QUIET).await?;
    assert_eq!(count_events(&frames, "USER_JOINED", "bob"), 1);

    // Leaving and then disconnecting is a single departure
    bob.leave("general").await?;
    bob.close().await?;
    let frames = alice.collect_for(QUIET).await?;
    assert_eq!(count_events(&frames, "USER_LEFT", "bob"), 1);
    assert_eq!(count_events(&frames, "USER_JOINED", "bob"), 0);

    // Later joiners on either worker no longer list bob
    let mut carol = cluster.connect(1, "carol").await?;
    carol.join("general").await?;
    assert_eq!(recv_joined(&mut carol, "carol").await?["members"], json!(["carol"]));

    let mut dave = cluster.connect(0, "dave").await?;
    dave.join("general").await?;
    assert_eq!(
        recv_joined(&mut dave, "dave").await?["members"],
        json!(["alice", "dave"])
    );

    let frames = alice.collect_for(QUIET).await?;
    assert_eq!(count_events(&frames, "USER_LEFT", "bob"), 0);
    assert_eq!(count_events(&frames, "USER_JOINED", "carol"), 1);
    assert_eq!(count_events(&frames, "USER_JOINED", "dave"), 1);

    cluster.shutdown().await
}

#[tokio::test]
async fn test_join_ack_and_display_name() -> Result<()> {
    let cluster = TestCluster::start(1).await?;
    let mut alice = cluster.connect(0, "alice").await?;

    let ack = alice
        .request(2, json!({ "channel_id": "general", "display_name": "Al" }))
        .await?;
    assert_eq!(ack["confirmation"], "Joined channel general");

    let joined = recv_joined(&mut alice, "Al").await?;
    assert_eq!(joined["members"], json!(["Al"]));

    alice.send_message("general", "hey", "tok-1").await?;
    assert_eq!(alice.recv_dispatch("CHAT_MESSAGE").await?["sender"], "Al");

    cluster.shutdown().await
}

#[tokio::test]
async fn test_leave_without_membership_is_an_error() -> Result<()> {
    let cluster = TestCluster::start(1).await?;
    let mut alice = cluster.connect(0, "alice").await?;

    let ack = alice.leave("general").await?;
    assert_eq!(ack["error"], "Not a member of channel general");

    cluster.shutdown().await
}

// ============================================================================
// Protocol Error Tests
// ============================================================================

#[tokio::test]
async fn test_malformed_frame_closes_with_decode_error() -> Result<()> {
    let cluster = TestCluster::start(1).await?;
    let mut alice = cluster.connect(0, "alice").await?;

    alice.send_raw("this is not json").await?;
    assert_eq!(alice.recv_close().await?, 4002);

    cluster.shutdown().await
}

#[tokio::test]
async fn test_server_opcode_from_client_is_rejected() -> Result<()> {
    let cluster = TestCluster::start(1).await?;
    let mut alice = cluster.connect(0, "alice").await?;

    alice.send_op(10, json!({})).await?;
    assert_eq!(alice.recv_close().await?, 4001);

    cluster.shutdown().await
}

#[tokio::test]
async fn test_worker_shutdown_closes_connections() -> Result<()> {
    let cluster = TestCluster::start(1).await?;
    let mut alice = cluster.connect(0, "alice").await?;
    alice.join("general").await?;

    cluster.shutdown().await?;

    assert_eq!(alice.recv_close().await?, 1001);
    Ok(())
}

// ============================================================================
// Configured Backend Tests
// ============================================================================

#[tokio::test]
async fn test_worker_from_environment() -> Result<()> {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("Skipping test: DATABASE_URL not set");
        return Ok(());
    }

    let config = relay_common::AppConfig::from_env()?;
    let state = relay_gateway::build_state(&config).await?;
    let worker = relay_gateway::spawn_worker(state, "127.0.0.1:0".parse()?).await?;

    let channel = format!("env-{}", uuid::Uuid::new_v4().simple());
    let mut alice = TestClient::connect(worker.local_addr(), None, None).await?;
    alice.join(&channel).await?;
    let ack = alice
        .send_message(&channel, "hello", &uuid::Uuid::new_v4().to_string())
        .await?;
    assert_eq!(ack, json!({}));
    assert_eq!(alice.recv_dispatch("CHAT_MESSAGE").await?["content"], "hello");

    worker.shutdown().await?;
    Ok(())
}
