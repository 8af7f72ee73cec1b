//! Session lifecycle integration tests: duplicate-key eviction (S3) and the
//! login/logout registry round-trip.

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

/// S3: a second login for `(1, web-A)` displaces the first socket, which is
/// told why and then closed; lookups resolve to the new session throughout.
#[tokio::test]
async fn newer_login_evicts_prior_session_with_kicked_offline() {
    let api = MockApi::start().await;
    let (addr, state) = start_gateway(&api).await;

    let mut first = login(addr, 1, "web-A").await;
    let first_socket = state
        .registry
        .get(1, "web-A")
        .await
        .expect("first session registered")
        .socket_id;

    let _second = login(addr, 1, "web-A").await;

    let (_, packet) = first.recv_timeout(Duration::from_secs(2)).await.unwrap();
    match packet {
        ServerPacket::KickedOffline(kicked) => {
            assert!(!kicked.reason.is_empty(), "kick carries a reason");
        }
        other => panic!("expected KickedOffline, got {other:?}"),
    }
    assert!(
        first.closed_within(Duration::from_secs(2)).await,
        "displaced socket should close after the kick frame"
    );

    // The registry presents the replacement, and only the replacement.
    let current = state.registry.get(1, "web-A").await.expect("session");
    assert_ne!(current.socket_id, first_socket);
    assert_eq!(state.registry.session_count().await, 1);

    // Same user before and after: the presence bit never flickered off.
    assert!(state.broker.is_online(1).await.unwrap());
}

#[tokio::test]
async fn login_then_logout_returns_registry_to_pre_login_state() {
    let api = MockApi::start().await;
    let (addr, state) = start_gateway(&api).await;

    assert_eq!(state.registry.session_count().await, 0);
    assert!(!state.broker.is_online(1).await.unwrap());

    let mut client = login(addr, 1, "web-A").await;
    assert_eq!(state.registry.session_count().await, 1);
    assert!(state.broker.is_online(1).await.unwrap());

    client.send("bye", &ClientPacket::Logout).await.unwrap();
    let (seq, packet) = client.recv().await.unwrap();
    assert_eq!(seq, "bye");
    assert!(matches!(
        packet,
        ServerPacket::LogoutResponse(LogoutResponse { success: true })
    ));

    assert!(
        wait_until(|| async {
            state.registry.session_count().await == 0
                && !state.broker.is_online(1).await.unwrap()
        })
        .await,
        "registry and presence should return to the pre-login state"
    );
    assert!(state.registry.get(1, "web-A").await.is_none());
}

#[tokio::test]
async fn second_login_on_live_session_is_rejected_without_dropping_it() {
    let api = MockApi::start().await;
    let (addr, state) = start_gateway(&api).await;

    let mut client = login(addr, 1, "web-A").await;
    let token = mint_token(SECRET, 1, Some("web-A"));
    client
        .send(
            "again",
            &ClientPacket::Login(Login {
                token,
                device_id: "web-A".to_owned(),
                device_type: DeviceType::Web,
            }),
        )
        .await
        .unwrap();

    let (seq, packet) = client.recv().await.unwrap();
    assert_eq!(seq, "again");
    match packet {
        ServerPacket::LoginResponse(resp) => assert!(!resp.success),
        other => panic!("expected LoginResponse, got {other:?}"),
    }
    assert_eq!(state.registry.session_count().await, 1);

    client.send("hb", &ClientPacket::Heartbeat).await.unwrap();
    let (_, packet) = client.recv().await.unwrap();
    assert!(matches!(packet, ServerPacket::HeartbeatResponse(_)));
}
