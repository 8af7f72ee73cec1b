//! Read-state and recall integration tests.
//!
//! - S4: a read cursor update reaches the reader's other devices as
//!   READ_ACK and the private-chat peer as READ_RECEIPT_NOTIFY.
//! - Repeated READ_ACK with the same cursor fans out at most once.
//! - S5: a recall acks the origin and broadcasts RECALL_NOTIFY to every
//!   participant session, the recaller's other devices included.
//! - Recalling someone else's message is rejected with a readable reason.

use gateway::api::ApiClient;
use gateway::broker::MemoryBroker;
use gateway::config::GatewayConfig;
use gateway::{build_router, fanout, AppState};
use im_protocol::*;
use im_test_utils::{mint_token, MockApi, MockWsClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "test-secret";

// ---------------------------------------------------------------------------
// Harness helpers (duplicated across test files to keep each suite
// self-contained and independently runnable).
// ---------------------------------------------------------------------------

fn test_config(api_base_url: &str) -> GatewayConfig {
    GatewayConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        api_base_url: api_base_url.to_owned(),
        api_timeout: Duration::from_secs(2),
        redis_url: None,
        heartbeat_interval: Duration::from_secs(30),
        jwt_secret: SECRET.to_owned(),
        service_name: "im-gateway-test".to_owned(),
    }
}

async fn start_gateway(api: &MockApi) -> (SocketAddr, AppState) {
    let config = test_config(&api.base_url());
    let client = ApiClient::new(&config).expect("api client");
    let state = AppState::new(config, client, Arc::new(MemoryBroker::new()));
    fanout::spawn(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let router = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("gateway error");
    });
    (addr, state)
}

async fn login(addr: SocketAddr, user_id: i64, device_id: &str) -> MockWsClient {
    let mut client = MockWsClient::connect(&format!("ws://{addr}/ws"))
        .await
        .expect("connect");
    let token = mint_token(SECRET, user_id, Some(device_id));
    let resp = client
        .login(&token, device_id, DeviceType::Web)
        .await
        .expect("login");
    assert!(resp.success, "login should succeed");
    client
}

fn chat(msg_id: &str, conversation_id: i64, content: &str) -> ClientPacket {
    ClientPacket::ChatMessage(ChatMessage {
        msg_id: msg_id.to_owned(),
        conversation_id,
        msg_type: "text".to_owned(),
        content: content.to_owned(),
        metadata: None,
        quote_msg_id: None,
        at_user_ids: None,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// S4: user 2 reads conversation 100 from web-C.  ios-D (same user) gets the
/// cursor mirror; user 1 gets the read receipt; the origin device gets
/// nothing back.
#[tokio::test]
async fn read_ack_mirrors_to_other_devices_and_notifies_private_peer() {
    let api = MockApi::start().await;
    api.set_participants(100, vec![1, 2]).await;
    let (addr, _state) = start_gateway(&api).await;

    let mut a = login(addr, 1, "web-A").await;
    let mut c = login(addr, 2, "web-C").await;
    let mut d = login(addr, 2, "ios-D").await;

    c.send(
        "r1",
        &ClientPacket::ReadAck(ReadAck {
            conversation_id: 100,
            last_read_msg_id: "srv-50".to_owned(),
        }),
    )
    .await
    .unwrap();

    let (_, packet) = d.recv_timeout(Duration::from_secs(2)).await.unwrap();
    match packet {
        ServerPacket::ReadAck(mirror) => {
            assert_eq!(mirror.conversation_id, 100);
            assert_eq!(mirror.last_read_msg_id, "srv-50");
        }
        other => panic!("expected READ_ACK mirror, got {other:?}"),
    }

    let (_, packet) = a.recv_timeout(Duration::from_secs(2)).await.unwrap();
    match packet {
        ServerPacket::ReadReceiptNotify(receipt) => {
            assert_eq!(receipt.conversation_id, 100);
            assert_eq!(receipt.reader_id, 2);
            assert_eq!(receipt.last_read_msg_id, "srv-50");
        }
        other => panic!("expected ReadReceiptNotify, got {other:?}"),
    }

    assert!(
        c.recv_timeout(Duration::from_millis(300)).await.is_err(),
        "origin device gets no mirror of its own cursor"
    );
}

#[tokio::test]
async fn repeated_read_ack_with_same_cursor_fans_out_at_most_once() {
    let api = MockApi::start().await;
    api.set_participants(100, vec![1, 2]).await;
    let (addr, _state) = start_gateway(&api).await;

    let mut c = login(addr, 2, "web-C").await;
    let mut d = login(addr, 2, "ios-D").await;

    let read = ClientPacket::ReadAck(ReadAck {
        conversation_id: 100,
        last_read_msg_id: "srv-50".to_owned(),
    });
    c.send("r1", &read).await.unwrap();
    let (_, packet) = d.recv_timeout(Duration::from_secs(2)).await.unwrap();
    assert!(matches!(packet, ServerPacket::ReadAck(_)));

    // The cursor did not advance; no second mirror.
    c.send("r2", &read).await.unwrap();
    assert!(d.recv_timeout(Duration::from_millis(300)).await.is_err());

    // A stale (lower) cursor is ignored too.
    c.send(
        "r3",
        &ClientPacket::ReadAck(ReadAck {
            conversation_id: 100,
            last_read_msg_id: "srv-10".to_owned(),
        }),
    )
    .await
    .unwrap();
    assert!(d.recv_timeout(Duration::from_millis(300)).await.is_err());
}

/// S5: recall of srv-1 acks the origin and reaches every participant
/// session, including the recaller's other devices.
#[tokio::test]
async fn recall_broadcasts_to_every_participant_session() {
    let api = MockApi::start().await;
    api.set_participants(100, vec![1, 2]).await;
    let (addr, _state) = start_gateway(&api).await;

    let mut a = login(addr, 1, "web-A").await;
    let mut b = login(addr, 1, "web-B").await;
    let mut c = login(addr, 2, "web-C").await;

    a.send("s1", &chat("c-1", 100, "oops")).await.unwrap();
    a.recv().await.unwrap();
    // Drain the live fan-out before recalling.
    b.recv_timeout(Duration::from_secs(2)).await.unwrap();
    c.recv_timeout(Duration::from_secs(2)).await.unwrap();

    a.send(
        "rc1",
        &ClientPacket::RecallMessage(RecallMessage {
            msg_id: "srv-1".to_owned(),
            conversation_id: 100,
        }),
    )
    .await
    .unwrap();

    let (seq, packet) = a.recv().await.unwrap();
    assert_eq!(seq, "rc1");
    match packet {
        ServerPacket::RecallAck(ack) => {
            assert!(ack.success);
            assert_eq!(ack.msg_id.as_deref(), Some("srv-1"));
        }
        other => panic!("expected RecallAck, got {other:?}"),
    }

    for client in [&mut a, &mut b, &mut c] {
        let (_, packet) = client.recv_timeout(Duration::from_secs(2)).await.unwrap();
        match packet {
            ServerPacket::RecallNotify(notify) => {
                assert_eq!(notify.conversation_id, 100);
                assert_eq!(notify.msg_id, "srv-1");
                assert_eq!(notify.recalled_by, 1);
            }
            other => panic!("expected RecallNotify, got {other:?}"),
        }
    }
    assert!(api.is_recalled("srv-1").await);
}

#[tokio::test]
async fn recalling_someone_elses_message_is_rejected() {
    let api = MockApi::start().await;
    api.set_participants(100, vec![1, 2]).await;
    let (addr, _state) = start_gateway(&api).await;

    let mut a = login(addr, 1, "web-A").await;
    let mut c = login(addr, 2, "web-C").await;

    a.send("s1", &chat("c-1", 100, "mine")).await.unwrap();
    a.recv().await.unwrap();
    c.recv_timeout(Duration::from_secs(2)).await.unwrap();

    c.send(
        "rc1",
        &ClientPacket::RecallMessage(RecallMessage {
            msg_id: "srv-1".to_owned(),
            conversation_id: 100,
        }),
    )
    .await
    .unwrap();

    let (seq, packet) = c.recv().await.unwrap();
    assert_eq!(seq, "rc1");
    match packet {
        ServerPacket::RecallAck(ack) => {
            assert!(!ack.success);
            assert!(ack.error.is_some(), "rejection carries a reason");
        }
        other => panic!("expected RecallAck, got {other:?}"),
    }
    assert!(!api.is_recalled("srv-1").await);

    // No broadcast happened.
    assert!(a.recv_timeout(Duration::from_millis(300)).await.is_err());
}
