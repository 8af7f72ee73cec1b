//! Typed client for the persistence service.
//!
//! Every call carries the internal-service headers (`X-Internal-Service`,
//! `X-User-Id`, `X-Device-Id`).  Reads are retried once on transport errors;
//! writes are never retried — re-driving a write is the handler's decision.

use crate::config::GatewayConfig;
use im_protocol::ChatMessage;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("persistence service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{message}")]
    Rejected { status: u16, message: String },
}

/// Result of `PersistMessage`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistResult {
    pub server_msg_id: String,
    pub server_timestamp: i64,
}

/// Result of `UpdateReadCursor`.  `changed` is false when the cursor did not
/// advance (later cursors win); `notify_user_id` names a private-chat peer
/// owed a read receipt.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadCursorResult {
    pub changed: bool,
    #[serde(default)]
    pub notify_user_id: Option<i64>,
}

/// One pending offline-queue row, ordered by `createdAt` ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineRow {
    pub queue_id: String,
    pub message_payload: Value,
}

/// Insert request for one offline row.  The persistence service applies an
/// existence predicate on `(targetUserId, messageId)` so repeated inserts
/// are no-ops.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineEnqueue {
    pub target_user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_device_id: Option<String>,
    pub message_id: String,
    pub conversation_id: i64,
    pub message_payload: Value,
}

/// Error envelope used by all non-2xx persistence responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[allow(dead_code)]
    code: String,
    message: String,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    service_header: HeaderValue,
}

impl ApiClient {
    pub fn new(cfg: &GatewayConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.api_timeout)
            .build()?;
        let service_header = HeaderValue::from_str(&cfg.service_name)
            .unwrap_or_else(|_| HeaderValue::from_static("im-gateway"));
        Ok(Self {
            http,
            base_url: cfg.api_base_url.trim_end_matches('/').to_owned(),
            service_header,
        })
    }

    fn headers(&self, user_id: i64, device_id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-Internal-Service", self.service_header.clone());
        if let Ok(v) = HeaderValue::from_str(&user_id.to_string()) {
            headers.insert("X-User-Id", v);
        }
        if let Ok(v) = HeaderValue::from_str(device_id) {
            headers.insert("X-Device-Id", v);
        }
        headers
    }

    /// Persist one chat message; the canonical id and timestamp come back.
    pub async fn persist_message(
        &self,
        user_id: i64,
        device_id: &str,
        msg: &ChatMessage,
    ) -> Result<PersistResult, ApiError> {
        let url = format!("{}/internal/messages", self.base_url);
        let body = serde_json::json!({
            "clientMsgId": msg.msg_id,
            "conversationId": msg.conversation_id,
            "msgType": msg.msg_type,
            "content": msg.content,
            "metadata": msg.metadata,
            "quoteMsgId": msg.quote_msg_id,
            "atUserIds": msg.at_user_ids,
        });
        let resp = self
            .http
            .post(url)
            .headers(self.headers(user_id, device_id))
            .json(&body)
            .send()
            .await?;
        decode(resp).await
    }

    /// Recall a message.  Ownership and the time window are enforced by the
    /// service; rejection reasons come back in `ApiError::Rejected`.
    pub async fn recall_message(
        &self,
        user_id: i64,
        device_id: &str,
        msg_id: &str,
    ) -> Result<(), ApiError> {
        let url = format!("{}/internal/messages/{}/recall", self.base_url, msg_id);
        let resp = self
            .http
            .post(url)
            .headers(self.headers(user_id, device_id))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        decode_empty(resp).await
    }

    /// Advance the read cursor.  Idempotent; later cursors win.
    pub async fn update_read_cursor(
        &self,
        user_id: i64,
        device_id: &str,
        conversation_id: i64,
        last_read_msg_id: &str,
    ) -> Result<ReadCursorResult, ApiError> {
        let url = format!(
            "{}/internal/conversations/{}/read-cursor",
            self.base_url, conversation_id
        );
        let resp = self
            .http
            .put(url)
            .headers(self.headers(user_id, device_id))
            .json(&serde_json::json!({ "lastReadMsgId": last_read_msg_id }))
            .send()
            .await?;
        decode(resp).await
    }

    /// Resolve conversation participants.  Read; retried once.
    pub async fn participants(
        &self,
        user_id: i64,
        device_id: &str,
        conversation_id: i64,
    ) -> Result<Vec<i64>, ApiError> {
        let url = format!(
            "{}/internal/conversations/{}/participants",
            self.base_url, conversation_id
        );
        self.get_with_retry(&url, &[], user_id, device_id).await
    }

    /// Conversation backlog for reconnect catch-up.  Read; retried once.
    pub async fn messages_for_sync(
        &self,
        user_id: i64,
        device_id: &str,
        conversation_id: i64,
        after_msg_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Value>, ApiError> {
        let url = format!(
            "{}/internal/conversations/{}/messages",
            self.base_url, conversation_id
        );
        let limit = limit.to_string();
        let mut query: Vec<(&str, &str)> = vec![("limit", limit.as_str())];
        if let Some(after) = after_msg_id {
            query.push(("afterMsgId", after));
        }
        self.get_with_retry(&url, &query, user_id, device_id).await
    }

    /// Pending offline rows for `(userId, deviceId)`.  Read; retried once.
    pub async fn pending_offline(
        &self,
        user_id: i64,
        device_id: &str,
        limit: u32,
    ) -> Result<Vec<OfflineRow>, ApiError> {
        let url = format!("{}/internal/offline-messages", self.base_url);
        let limit = limit.to_string();
        self.get_with_retry(&url, &[("limit", limit.as_str())], user_id, device_id)
            .await
    }

    /// Mark offline rows delivered.  Write; not retried.
    pub async fn ack_offline(
        &self,
        user_id: i64,
        device_id: &str,
        message_ids: &[String],
    ) -> Result<(), ApiError> {
        let url = format!("{}/internal/offline-messages/ack", self.base_url);
        let resp = self
            .http
            .post(url)
            .headers(self.headers(user_id, device_id))
            .json(&serde_json::json!({ "messageIds": message_ids }))
            .send()
            .await?;
        decode_empty(resp).await
    }

    /// Enqueue offline rows for recipients with no live session anywhere.
    /// Write; not retried — the insert itself is existence-predicated.
    pub async fn enqueue_offline(
        &self,
        user_id: i64,
        device_id: &str,
        rows: &[OfflineEnqueue],
    ) -> Result<(), ApiError> {
        let url = format!("{}/internal/offline-messages", self.base_url);
        let resp = self
            .http
            .post(url)
            .headers(self.headers(user_id, device_id))
            .json(&serde_json::json!({ "rows": rows }))
            .send()
            .await?;
        decode_empty(resp).await
    }

    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        user_id: i64,
        device_id: &str,
    ) -> Result<T, ApiError> {
        match self.get_once(url, query, user_id, device_id).await {
            Err(ApiError::Transport(_)) => self.get_once(url, query, user_id, device_id).await,
            other => other,
        }
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        user_id: i64,
        device_id: &str,
    ) -> Result<T, ApiError> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .headers(self.headers(user_id, device_id))
            .send()
            .await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp.json().await?)
    } else {
        Err(rejected(status, resp).await)
    }
}

async fn decode_empty(resp: reqwest::Response) -> Result<(), ApiError> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(rejected(status, resp).await)
    }
}

async fn rejected(status: reqwest::StatusCode, resp: reqwest::Response) -> ApiError {
    let message = match resp.json::<ApiErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => format!("persistence service returned {status}"),
    };
    ApiError::Rejected {
        status: status.as_u16(),
        message,
    }
}
