// im-test-utils: Shared test utilities for the gateway suite.
//
// Provides a WebSocket test client speaking the gateway frame protocol, an
// in-process mock of the persistence HTTP API, and an access-token mint.

pub mod mock_api;
pub mod ws_client;

pub use mock_api::MockApi;
pub use ws_client::MockWsClient;

use jsonwebtoken::{EncodingKey, Header};
use serde::Serialize;

#[derive(Serialize)]
struct MintClaims<'a> {
    sub: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "deviceId")]
    device_id: Option<&'a str>,
    exp: usize,
}

/// Mint an HS256 access token the way the persistence service would.
/// `device_id` binds the token to one device; `None` leaves it unbound.
pub fn mint_token(secret: &str, user_id: i64, device_id: Option<&str>) -> String {
    let claims = MintClaims {
        sub: user_id.to_string(),
        device_id,
        exp: 4_102_444_800, // 2100-01-01
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token mint")
}

/// An expired token for negative-path tests.
pub fn mint_expired_token(secret: &str, user_id: i64, device_id: Option<&str>) -> String {
    let claims = MintClaims {
        sub: user_id.to_string(),
        device_id,
        exp: 1_000_000, // 1970-01-12
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token mint")
}
