use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// The identity a valid access token resolves to.
#[derive(Debug)]
pub struct AuthIdentity {
    pub user_id: i64,
    pub device_id: String,
}

/// All variants surface the same generic text so login failures carry no
/// user-existence oracle; the distinction is for logs only.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication failed")]
    InvalidToken,
    #[error("authentication failed")]
    DeviceMismatch,
}

#[derive(Debug, Deserialize)]
struct Claims {
    /// User id as issued by the persistence service.
    sub: String,
    /// Optional device binding; when present it must match the login frame.
    #[serde(default, rename = "deviceId")]
    device_id: Option<String>,
    #[allow(dead_code)]
    exp: usize,
}

/// Validate the signed access token (signature + expiry) and bind it to the
/// device id presented in the login frame.
pub fn validate_token(
    secret: &str,
    token: &str,
    presented_device_id: &str,
) -> Result<AuthIdentity, AuthError> {
    let decoded = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AuthError::InvalidToken)?;

    let user_id: i64 = decoded
        .claims
        .sub
        .parse()
        .map_err(|_| AuthError::InvalidToken)?;

    if let Some(claim_device) = &decoded.claims.device_id {
        if claim_device != presented_device_id {
            return Err(AuthError::DeviceMismatch);
        }
    }

    Ok(AuthIdentity {
        user_id,
        device_id: presented_device_id.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};
    use serde::Serialize;

    const SECRET: &str = "test-secret";

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        #[serde(skip_serializing_if = "Option::is_none", rename = "deviceId")]
        device_id: Option<&'a str>,
        exp: usize,
    }

    fn mint(sub: &str, device_id: Option<&str>, exp: usize) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            &TestClaims {
                sub,
                device_id,
                exp,
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> usize {
        4_102_444_800 // 2100-01-01
    }

    #[test]
    fn valid_token_resolves_identity() {
        let token = mint("1", Some("web-A"), far_future());
        let identity = validate_token(SECRET, &token, "web-A").expect("token should validate");
        assert_eq!(identity.user_id, 1);
        assert_eq!(identity.device_id, "web-A");
    }

    #[test]
    fn token_without_device_claim_binds_to_presented_device() {
        let token = mint("7", None, far_future());
        let identity = validate_token(SECRET, &token, "ios-X").expect("token should validate");
        assert_eq!(identity.user_id, 7);
        assert_eq!(identity.device_id, "ios-X");
    }

    #[test]
    fn device_claim_mismatch_is_rejected() {
        let token = mint("1", Some("web-A"), far_future());
        let err = validate_token(SECRET, &token, "web-B").unwrap_err();
        assert!(matches!(err, AuthError::DeviceMismatch));
    }

    #[test]
    fn expired_and_garbage_tokens_fail_with_identical_text() {
        let expired = mint("1", Some("web-A"), 1_000_000);
        let e1 = validate_token(SECRET, &expired, "web-A").unwrap_err();
        let e2 = validate_token(SECRET, "not-a-token", "web-A").unwrap_err();
        assert_eq!(e1.to_string(), e2.to_string());
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let token = mint("1", Some("web-A"), far_future());
        assert!(validate_token("other-secret", &token, "web-A").is_err());
    }

    #[test]
    fn non_numeric_subject_is_rejected() {
        let token = mint("alice", None, far_future());
        assert!(matches!(
            validate_token(SECRET, &token, "web-A"),
            Err(AuthError::InvalidToken)
        ));
    }
}
