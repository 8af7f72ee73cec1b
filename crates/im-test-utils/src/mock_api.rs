//! In-process mock of the persistence HTTP API.
//!
//! Implements the endpoints the gateway's API client calls, in memory:
//! monotonic `srv-N` message ids, a configurable participants map, the
//! existence-predicated offline queue, monotonic read cursors (with a
//! private-chat notify target when a conversation has exactly two members),
//! and owner-checked recall.  Tests drive the gateway through a real
//! listener and assert on this mock's state.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredMessage {
    conversation_id: i64,
    sender_id: i64,
    server_msg_id: String,
    payload: Value,
}

#[derive(Debug, Clone)]
pub struct OfflineRowSnapshot {
    pub queue_id: String,
    pub target_user_id: i64,
    pub target_device_id: Option<String>,
    pub message_id: String,
    pub conversation_id: i64,
    pub delivered: bool,
}

#[derive(Debug, Clone)]
struct OfflineRowRec {
    queue_id: String,
    target_user_id: i64,
    target_device_id: Option<String>,
    message_id: String,
    conversation_id: i64,
    payload: Value,
    delivered: bool,
}

#[derive(Default)]
struct Inner {
    next_msg_seq: u64,
    next_queue_seq: u64,
    fail_persist: bool,
    participants: HashMap<i64, Vec<i64>>,
    messages: Vec<StoredMessage>,
    recalled: HashSet<String>,
    read_cursors: HashMap<(i64, i64), i64>,
    offline: Vec<OfflineRowRec>,
}

#[derive(Clone, Default)]
struct MockApiState(Arc<Mutex<Inner>>);

/// Handle to a running mock persistence service.
pub struct MockApi {
    addr: SocketAddr,
    state: MockApiState,
}

impl MockApi {
    pub async fn start() -> Self {
        let state = MockApiState::default();
        let router = build_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock API");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("mock API error");
        });
        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn set_participants(&self, conversation_id: i64, users: Vec<i64>) {
        self.state
            .0
            .lock()
            .await
            .participants
            .insert(conversation_id, users);
    }

    /// Make `PersistMessage` fail with a 503 until reset.
    pub async fn set_persist_failure(&self, fail: bool) {
        self.state.0.lock().await.fail_persist = fail;
    }

    pub async fn stored_message_count(&self) -> usize {
        self.state.0.lock().await.messages.len()
    }

    pub async fn is_recalled(&self, msg_id: &str) -> bool {
        self.state.0.lock().await.recalled.contains(msg_id)
    }

    pub async fn offline_rows(&self) -> Vec<OfflineRowSnapshot> {
        self.state
            .0
            .lock()
            .await
            .offline
            .iter()
            .map(|row| OfflineRowSnapshot {
                queue_id: row.queue_id.clone(),
                target_user_id: row.target_user_id,
                target_device_id: row.target_device_id.clone(),
                message_id: row.message_id.clone(),
                conversation_id: row.conversation_id,
                delivered: row.delivered,
            })
            .collect()
    }
}

fn build_router(state: MockApiState) -> Router {
    Router::new()
        .route("/internal/messages", post(persist_message))
        .route("/internal/messages/:msg_id/recall", post(recall_message))
        .route(
            "/internal/conversations/:conversation_id/read-cursor",
            put(update_read_cursor),
        )
        .route(
            "/internal/conversations/:conversation_id/participants",
            get(participants),
        )
        .route(
            "/internal/conversations/:conversation_id/messages",
            get(messages_for_sync),
        )
        .route(
            "/internal/offline-messages",
            get(pending_offline).post(enqueue_offline),
        )
        .route("/internal/offline-messages/ack", post(ack_offline))
        .with_state(state)
}

fn caller(headers: &HeaderMap) -> (i64, String) {
    let user_id = headers
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let device_id = headers
        .get("X-Device-Id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned();
    (user_id, device_id)
}

/// Numeric tail of an `srv-N` id, for ordering comparisons.
fn msg_id_num(msg_id: &str) -> i64 {
    msg_id
        .rsplit('-')
        .next()
        .and_then(|tail| tail.parse().ok())
        .unwrap_or(0)
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "code": code, "message": message })),
    )
        .into_response()
}

async fn persist_message(
    State(state): State<MockApiState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let (sender_id, _) = caller(&headers);
    let mut inner = state.0.lock().await;
    if inner.fail_persist {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "PERSIST_UNAVAILABLE",
            "message store is unavailable",
        );
    }
    inner.next_msg_seq += 1;
    let server_msg_id = format!("srv-{}", inner.next_msg_seq);
    let server_timestamp = chrono::Utc::now().timestamp_millis();
    let conversation_id = body
        .get("conversationId")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let mut payload = body;
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("msgId".to_owned(), json!(server_msg_id));
        obj.insert("senderId".to_owned(), json!(sender_id));
        obj.insert("timestamp".to_owned(), json!(server_timestamp));
    }
    inner.messages.push(StoredMessage {
        conversation_id,
        sender_id,
        server_msg_id: server_msg_id.clone(),
        payload,
    });
    Json(json!({
        "serverMsgId": server_msg_id,
        "serverTimestamp": server_timestamp,
    }))
    .into_response()
}

async fn recall_message(
    State(state): State<MockApiState>,
    Path(msg_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let (user_id, _) = caller(&headers);
    let mut inner = state.0.lock().await;
    let owned = inner
        .messages
        .iter()
        .any(|m| m.server_msg_id == msg_id && m.sender_id == user_id);
    if !owned {
        return error_response(
            StatusCode::FORBIDDEN,
            "RECALL_DENIED",
            "cannot recall this message",
        );
    }
    inner.recalled.insert(msg_id);
    Json(json!({})).into_response()
}

async fn update_read_cursor(
    State(state): State<MockApiState>,
    Path(conversation_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let (user_id, _) = caller(&headers);
    let last_read = body
        .get("lastReadMsgId")
        .and_then(Value::as_str)
        .unwrap_or("");
    let new_cursor = msg_id_num(last_read);
    let mut inner = state.0.lock().await;
    let entry = inner
        .read_cursors
        .entry((user_id, conversation_id))
        .or_insert(-1);
    let changed = new_cursor > *entry;
    if changed {
        *entry = new_cursor;
    }
    // Private chat: the other member gets a read receipt.
    let notify_user_id = inner.participants.get(&conversation_id).and_then(|users| {
        if users.len() == 2 {
            users.iter().find(|u| **u != user_id).copied()
        } else {
            None
        }
    });
    Json(json!({
        "changed": changed,
        "notifyUserId": notify_user_id,
    }))
    .into_response()
}

async fn participants(
    State(state): State<MockApiState>,
    Path(conversation_id): Path<i64>,
) -> Json<Vec<i64>> {
    let inner = state.0.lock().await;
    Json(
        inner
            .participants
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default(),
    )
}

async fn messages_for_sync(
    State(state): State<MockApiState>,
    Path(conversation_id): Path<i64>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    let after = query.get("afterMsgId").map(|s| msg_id_num(s)).unwrap_or(-1);
    let limit: usize = query
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(50);
    let inner = state.0.lock().await;
    Json(
        inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && msg_id_num(&m.server_msg_id) > after)
            .take(limit)
            .map(|m| m.payload.clone())
            .collect(),
    )
}

async fn pending_offline(
    State(state): State<MockApiState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    let (user_id, device_id) = caller(&headers);
    let limit: usize = query
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(100);
    let inner = state.0.lock().await;
    Json(
        inner
            .offline
            .iter()
            .filter(|row| {
                row.target_user_id == user_id
                    && !row.delivered
                    && row
                        .target_device_id
                        .as_ref()
                        .map_or(true, |d| *d == device_id)
            })
            .take(limit)
            .map(|row| {
                json!({
                    "queueId": row.queue_id,
                    "messagePayload": row.payload,
                })
            })
            .collect(),
    )
}

async fn enqueue_offline(
    State(state): State<MockApiState>,
    Json(body): Json<Value>,
) -> Response {
    let rows = body
        .get("rows")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut inner = state.0.lock().await;
    for row in rows {
        let target_user_id = row
            .get("targetUserId")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let message_id = row
            .get("messageId")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned();
        // Existence predicate: one row per (targetUserId, messageId).
        let exists = inner
            .offline
            .iter()
            .any(|r| r.target_user_id == target_user_id && r.message_id == message_id);
        if exists {
            continue;
        }
        inner.next_queue_seq += 1;
        let queue_id = format!("q-{}", inner.next_queue_seq);
        inner.offline.push(OfflineRowRec {
            queue_id,
            target_user_id,
            target_device_id: row
                .get("targetDeviceId")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            message_id,
            conversation_id: row
                .get("conversationId")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            payload: row.get("messagePayload").cloned().unwrap_or(Value::Null),
            delivered: false,
        });
    }
    Json(json!({})).into_response()
}

async fn ack_offline(
    State(state): State<MockApiState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let (user_id, device_id) = caller(&headers);
    let message_ids: HashSet<String> = body
        .get("messageIds")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();
    let mut inner = state.0.lock().await;
    for row in &mut inner.offline {
        if row.target_user_id == user_id
            && message_ids.contains(&row.message_id)
            && row
                .target_device_id
                .as_ref()
                .map_or(true, |d| *d == device_id)
        {
            row.delivered = true;
        }
    }
    Json(json!({})).into_response()
}
