//! Heartbeat and idle-watchdog integration tests (S6).
//!
//! Uses a short heartbeat interval so the 3x idle window elapses within
//! test time.

use gateway::api::ApiClient;
use gateway::broker::{Broker, MemoryBroker};
use gateway::config::GatewayConfig;
use gateway::{build_router, fanout, AppState};
use im_protocol::*;
use im_test_utils::{mint_token, MockApi, MockWsClient};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "test-secret";

// ---------------------------------------------------------------------------
// Harness helpers (duplicated across test files to keep each suite
// self-contained and independently runnable).
// ---------------------------------------------------------------------------

async fn start_gateway(api: &MockApi, heartbeat: Duration) -> (SocketAddr, AppState) {
    let config = GatewayConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        api_base_url: api.base_url(),
        api_timeout: Duration::from_secs(2),
        redis_url: None,
        heartbeat_interval: heartbeat,
        jwt_secret: SECRET.to_owned(),
        service_name: "im-gateway-test".to_owned(),
    };
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

async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeats_reset_the_idle_window_and_return_server_time() {
    let api = MockApi::start().await;
    let (addr, state) = start_gateway(&api, Duration::from_millis(200)).await;

    let mut client = login(addr, 1, "web-A").await;

    // Stay alive well past one idle window (3 x 200 ms) on heartbeats alone.
    for i in 0..4 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        client
            .send(&format!("hb-{i}"), &ClientPacket::Heartbeat)
            .await
            .unwrap();
        let (seq, packet) = client.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(seq, format!("hb-{i}"));
        match packet {
            ServerPacket::HeartbeatResponse(hb) => assert!(hb.server_time > 0),
            other => panic!("expected HeartbeatResponse, got {other:?}"),
        }
    }
    assert!(state.registry.get(1, "web-A").await.is_some());
}

/// S6: no inbound frames for 3 x interval closes the socket and removes the
/// session from the registry and the presence set.
#[tokio::test]
async fn silent_session_is_closed_and_deregistered() {
    let api = MockApi::start().await;
    let (addr, state) = start_gateway(&api, Duration::from_millis(100)).await;

    let mut client = login(addr, 1, "web-A").await;
    assert!(state.registry.get(1, "web-A").await.is_some());
    assert!(state.broker.is_online(1).await.unwrap());

    assert!(
        client.closed_within(Duration::from_secs(3)).await,
        "idle socket should be closed by the watchdog"
    );
    assert!(
        wait_until(|| async {
            state.registry.get(1, "web-A").await.is_none()
                && !state.broker.is_online(1).await.unwrap()
        })
        .await,
        "session and presence bit should be gone after the timeout"
    );
}

#[tokio::test]
async fn unauthenticated_socket_is_closed_after_the_grace_window() {
    let api = MockApi::start().await;
    let (addr, state) = start_gateway(&api, Duration::from_millis(100)).await;

    let mut client = MockWsClient::connect(&format!("ws://{addr}/ws"))
        .await
        .expect("connect");
    assert!(client.closed_within(Duration::from_secs(3)).await);
    assert_eq!(state.registry.session_count().await, 0);
}
