// im-protocol: IM gateway wire protocol types and frame codec.
//
// Every frame on the gateway socket is UTF-8 JSON text with a fixed envelope:
//
// ```json
// { "type": 10, "seq": "s1", "data": { ... } }
// ```
//
// `type` selects the packet from a closed set of integer codes, `seq` is a
// client-chosen correlation id echoed on responses, and `data` is the
// packet-specific body.  Fields beyond the envelope are ignored.  Packets are
// independent; there is no streaming continuation across frames.
//
// The same crate also defines the cluster-event payloads exchanged between
// gateway nodes over the pub/sub broker, and the channel names they travel on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hard cap on a single frame, applied before JSON parsing.
/// A frame of exactly this many bytes is accepted; one byte more is rejected.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Packet type codes (frozen)
// ---------------------------------------------------------------------------

/// The closed set of packet type codes.
///
/// 1-99 client->server, 100-199 server->client responses and pushes,
/// 200+ server-initiated control, 500 error.
pub mod packet_types {
    pub const LOGIN: i32 = 1;
    pub const LOGOUT: i32 = 2;
    pub const HEARTBEAT: i32 = 3;
    pub const CHAT_MESSAGE: i32 = 10;
    pub const TYPING: i32 = 11;
    pub const READ_ACK: i32 = 12;
    pub const RECALL_MESSAGE: i32 = 13;
    pub const SYNC_REQUEST: i32 = 20;
    pub const OFFLINE_SYNC_REQUEST: i32 = 21;
    pub const OFFLINE_SYNC_ACK: i32 = 22;

    pub const LOGIN_RESPONSE: i32 = 101;
    pub const LOGOUT_RESPONSE: i32 = 102;
    pub const HEARTBEAT_RESPONSE: i32 = 103;
    pub const CHAT_MESSAGE_ACK: i32 = 110;
    pub const RECEIVE_MESSAGE: i32 = 111;
    pub const TYPING_NOTIFY: i32 = 112;
    pub const RECALL_ACK: i32 = 113;
    pub const RECALL_NOTIFY: i32 = 114;
    pub const READ_RECEIPT_NOTIFY: i32 = 115;
    pub const SYNC_RESPONSE: i32 = 120;
    pub const OFFLINE_SYNC_RESPONSE: i32 = 121;
    pub const OFFLINE_SYNC_COMPLETE: i32 = 122;
    pub const KICKED_OFFLINE: i32 = 200;
    pub const SERVER_ERROR: i32 = 500;
}

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// Kind of device a session belongs to.  One user may hold several devices
/// concurrently; `(userId, deviceId)` is the session key, this is metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Web,
    Ios,
    Android,
    Pc,
    Tablet,
}

// ---------------------------------------------------------------------------
// Client -> Server packet bodies
// ---------------------------------------------------------------------------

/// LOGIN (1).  First packet on a fresh socket; everything else is dropped
/// until it succeeds.  `device_id` must match the token's deviceId claim when
/// the token carries one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Login {
    pub token: String,
    pub device_id: String,
    pub device_type: DeviceType,
}

/// CHAT_MESSAGE (10).  `msg_id` is the client-chosen id, echoed back in the
/// ack next to the canonical server id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub msg_id: String,
    pub conversation_id: i64,
    pub msg_type: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_msg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_user_ids: Option<Vec<i64>>,
}

/// TYPING (11).  Best-effort; recipients time the indicator out locally
/// (3 s), the gateway never persists or queues it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub conversation_id: i64,
}

/// READ_ACK (12).  Client -> server: advance the read cursor.  The same body
/// is pushed server -> client to the reader's other devices so they can zero
/// their unread counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadAck {
    pub conversation_id: i64,
    pub last_read_msg_id: String,
}

/// RECALL_MESSAGE (13).  Ownership and the recall time window are enforced
/// by the persistence service, not the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallMessage {
    pub msg_id: String,
    pub conversation_id: i64,
}

/// SYNC_REQUEST (20).  Reconnect catch-up for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub conversation_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_msg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// OFFLINE_SYNC_REQUEST (21).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSyncRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// OFFLINE_SYNC_ACK (22).  `message_ids` are the server msg ids the client
/// has durably processed; the matching queue rows are marked delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSyncAck {
    pub message_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Server -> Client packet bodies
// ---------------------------------------------------------------------------

/// LOGIN_RESPONSE (101).  Failure text is intentionally generic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// LOGOUT_RESPONSE (102).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub success: bool,
}

/// HEARTBEAT_RESPONSE (103).  `server_time` is epoch millis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub server_time: i64,
}

/// CHAT_MESSAGE_ACK (110).  On success carries the canonical server msg id
/// and timestamp; on failure `msg_id`/`server_timestamp` are absent and
/// `error` holds the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageAck {
    pub client_msg_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<i64>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// RECEIVE_MESSAGE (111).  The fan-out frame.  `message` is the persisted
/// message object verbatim; it carries the same server msg id on the live
/// path and the offline-replay path so clients can deduplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveMessage {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub msg_id: String,
    pub message: Value,
}

/// TYPING_NOTIFY (112).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotify {
    pub conversation_id: i64,
    pub user_id: i64,
}

/// RECALL_ACK (113).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// RECALL_NOTIFY (114).  Pushed to every participant session, including the
/// recaller's other devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallNotify {
    pub conversation_id: i64,
    pub msg_id: String,
    pub recalled_by: i64,
}

/// READ_RECEIPT_NOTIFY (115).  Private-chat read receipt for the message
/// sender, surfaced by the persistence service on cursor updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptNotify {
    pub conversation_id: i64,
    pub reader_id: i64,
    pub last_read_msg_id: String,
}

/// SYNC_RESPONSE (120).  `sync_cursor` is server epoch millis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub success: bool,
    pub messages: Vec<Value>,
    pub sync_cursor: i64,
}

/// OFFLINE_SYNC_RESPONSE (121).  One batch of queued message payloads in
/// `createdAt` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSyncResponse {
    pub success: bool,
    pub messages: Vec<Value>,
    pub count: u32,
}

/// OFFLINE_SYNC_COMPLETE (122).  Sent when the queue is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSyncComplete {
    pub success: bool,
    pub count: u32,
}

/// KICKED_OFFLINE (200).  Sent to a session displaced by a newer login with
/// the same `(userId, deviceId)`; the socket closes right after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KickedOffline {
    pub reason: String,
}

/// SERVER_ERROR (500).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Packet unions
// ---------------------------------------------------------------------------

/// All client->server packets, keyed by the integer type code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    Login(Login),
    Logout,
    Heartbeat,
    ChatMessage(ChatMessage),
    Typing(Typing),
    ReadAck(ReadAck),
    RecallMessage(RecallMessage),
    SyncRequest(SyncRequest),
    OfflineSyncRequest(OfflineSyncRequest),
    OfflineSyncAck(OfflineSyncAck),
}

impl ClientPacket {
    pub fn type_code(&self) -> i32 {
        use packet_types::*;
        match self {
            ClientPacket::Login(_) => LOGIN,
            ClientPacket::Logout => LOGOUT,
            ClientPacket::Heartbeat => HEARTBEAT,
            ClientPacket::ChatMessage(_) => CHAT_MESSAGE,
            ClientPacket::Typing(_) => TYPING,
            ClientPacket::ReadAck(_) => READ_ACK,
            ClientPacket::RecallMessage(_) => RECALL_MESSAGE,
            ClientPacket::SyncRequest(_) => SYNC_REQUEST,
            ClientPacket::OfflineSyncRequest(_) => OFFLINE_SYNC_REQUEST,
            ClientPacket::OfflineSyncAck(_) => OFFLINE_SYNC_ACK,
        }
    }
}

/// All server->client packets, keyed by the integer type code.
///
/// `ReadAck` appears here too: the reader's cursor update is mirrored to
/// their other devices under the same type code (12).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    LoginResponse(LoginResponse),
    LogoutResponse(LogoutResponse),
    HeartbeatResponse(HeartbeatResponse),
    ChatMessageAck(ChatMessageAck),
    ReceiveMessage(ReceiveMessage),
    TypingNotify(TypingNotify),
    RecallAck(RecallAck),
    RecallNotify(RecallNotify),
    ReadAck(ReadAck),
    ReadReceiptNotify(ReadReceiptNotify),
    SyncResponse(SyncResponse),
    OfflineSyncResponse(OfflineSyncResponse),
    OfflineSyncComplete(OfflineSyncComplete),
    KickedOffline(KickedOffline),
    ServerError(ServerError),
}

impl ServerPacket {
    pub fn type_code(&self) -> i32 {
        use packet_types::*;
        match self {
            ServerPacket::LoginResponse(_) => LOGIN_RESPONSE,
            ServerPacket::LogoutResponse(_) => LOGOUT_RESPONSE,
            ServerPacket::HeartbeatResponse(_) => HEARTBEAT_RESPONSE,
            ServerPacket::ChatMessageAck(_) => CHAT_MESSAGE_ACK,
            ServerPacket::ReceiveMessage(_) => RECEIVE_MESSAGE,
            ServerPacket::TypingNotify(_) => TYPING_NOTIFY,
            ServerPacket::RecallAck(_) => RECALL_ACK,
            ServerPacket::RecallNotify(_) => RECALL_NOTIFY,
            ServerPacket::ReadAck(_) => packet_types::READ_ACK,
            ServerPacket::ReadReceiptNotify(_) => READ_RECEIPT_NOTIFY,
            ServerPacket::SyncResponse(_) => SYNC_RESPONSE,
            ServerPacket::OfflineSyncResponse(_) => OFFLINE_SYNC_RESPONSE,
            ServerPacket::OfflineSyncComplete(_) => OFFLINE_SYNC_COMPLETE,
            ServerPacket::KickedOffline(_) => KICKED_OFFLINE,
            ServerPacket::ServerError(_) => SERVER_ERROR,
        }
    }
}

// ---------------------------------------------------------------------------
// Frame codec
// ---------------------------------------------------------------------------

/// A decoded inbound frame: the echoed `seq` plus the typed packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: String,
    pub packet: ClientPacket,
}

#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "type")]
    type_code: i32,
    #[serde(default)]
    seq: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Serialize)]
struct OutboundEnvelope<'a> {
    #[serde(rename = "type")]
    type_code: i32,
    seq: &'a str,
    data: Value,
}

/// Frame decode failures.  `seq()` yields the echo seq when the envelope got
/// far enough to recover one, so the dispatcher can answer on the right
/// correlation id.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    Oversize { len: usize },
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("unknown packet type {code}")]
    UnknownType { code: i32, seq: String },
    #[error("invalid body for packet type {code}: {source}")]
    Body {
        code: i32,
        seq: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FrameError {
    /// The request seq to echo on a SERVER_ERROR reply, when recoverable.
    pub fn seq(&self) -> Option<&str> {
        match self {
            FrameError::UnknownType { seq, .. } | FrameError::Body { seq, .. } => Some(seq),
            FrameError::Oversize { .. } | FrameError::Json(_) => None,
        }
    }
}

fn body<T: serde::de::DeserializeOwned>(
    code: i32,
    seq: &str,
    data: Value,
) -> Result<T, FrameError> {
    serde_json::from_value(data).map_err(|source| FrameError::Body {
        code,
        seq: seq.to_owned(),
        source,
    })
}

/// Decode one inbound text frame into a [`Frame`].
///
/// Enforces the size cap before parsing.  Envelope fields beyond
/// `{type, seq, data}` are ignored.
pub fn decode_frame(text: &str) -> Result<Frame, FrameError> {
    if text.len() > MAX_FRAME_BYTES {
        return Err(FrameError::Oversize { len: text.len() });
    }
    let env: InboundEnvelope = serde_json::from_str(text).map_err(FrameError::Json)?;
    let InboundEnvelope {
        type_code,
        seq,
        data,
    } = env;
    use packet_types::*;
    let packet = match type_code {
        LOGIN => ClientPacket::Login(body(type_code, &seq, data)?),
        LOGOUT => ClientPacket::Logout,
        HEARTBEAT => ClientPacket::Heartbeat,
        CHAT_MESSAGE => ClientPacket::ChatMessage(body(type_code, &seq, data)?),
        TYPING => ClientPacket::Typing(body(type_code, &seq, data)?),
        READ_ACK => ClientPacket::ReadAck(body(type_code, &seq, data)?),
        RECALL_MESSAGE => ClientPacket::RecallMessage(body(type_code, &seq, data)?),
        SYNC_REQUEST => ClientPacket::SyncRequest(body(type_code, &seq, data)?),
        OFFLINE_SYNC_REQUEST => ClientPacket::OfflineSyncRequest(body(type_code, &seq, data)?),
        OFFLINE_SYNC_ACK => ClientPacket::OfflineSyncAck(body(type_code, &seq, data)?),
        code => return Err(FrameError::UnknownType { code, seq }),
    };
    Ok(Frame { seq, packet })
}

/// Encode one outbound server packet.  `seq` echoes the request on
/// responses; unsolicited pushes pass `""`.
pub fn encode_frame(seq: &str, packet: &ServerPacket) -> Result<String, serde_json::Error> {
    let data = match packet {
        ServerPacket::LoginResponse(b) => serde_json::to_value(b)?,
        ServerPacket::LogoutResponse(b) => serde_json::to_value(b)?,
        ServerPacket::HeartbeatResponse(b) => serde_json::to_value(b)?,
        ServerPacket::ChatMessageAck(b) => serde_json::to_value(b)?,
        ServerPacket::ReceiveMessage(b) => serde_json::to_value(b)?,
        ServerPacket::TypingNotify(b) => serde_json::to_value(b)?,
        ServerPacket::RecallAck(b) => serde_json::to_value(b)?,
        ServerPacket::RecallNotify(b) => serde_json::to_value(b)?,
        ServerPacket::ReadAck(b) => serde_json::to_value(b)?,
        ServerPacket::ReadReceiptNotify(b) => serde_json::to_value(b)?,
        ServerPacket::SyncResponse(b) => serde_json::to_value(b)?,
        ServerPacket::OfflineSyncResponse(b) => serde_json::to_value(b)?,
        ServerPacket::OfflineSyncComplete(b) => serde_json::to_value(b)?,
        ServerPacket::KickedOffline(b) => serde_json::to_value(b)?,
        ServerPacket::ServerError(b) => serde_json::to_value(b)?,
    };
    serde_json::to_string(&OutboundEnvelope {
        type_code: packet.type_code(),
        seq,
        data,
    })
}

/// Encode one client packet.  Used by client-side harnesses.
pub fn encode_client_frame(seq: &str, packet: &ClientPacket) -> Result<String, serde_json::Error> {
    let data = match packet {
        ClientPacket::Login(b) => serde_json::to_value(b)?,
        ClientPacket::Logout | ClientPacket::Heartbeat => Value::Object(Default::default()),
        ClientPacket::ChatMessage(b) => serde_json::to_value(b)?,
        ClientPacket::Typing(b) => serde_json::to_value(b)?,
        ClientPacket::ReadAck(b) => serde_json::to_value(b)?,
        ClientPacket::RecallMessage(b) => serde_json::to_value(b)?,
        ClientPacket::SyncRequest(b) => serde_json::to_value(b)?,
        ClientPacket::OfflineSyncRequest(b) => serde_json::to_value(b)?,
        ClientPacket::OfflineSyncAck(b) => serde_json::to_value(b)?,
    };
    serde_json::to_string(&OutboundEnvelope {
        type_code: packet.type_code(),
        seq,
        data,
    })
}

/// Decode one server->client frame.  Used by client-side harnesses.
pub fn decode_server_frame(text: &str) -> Result<(String, ServerPacket), FrameError> {
    if text.len() > MAX_FRAME_BYTES {
        return Err(FrameError::Oversize { len: text.len() });
    }
    let env: InboundEnvelope = serde_json::from_str(text).map_err(FrameError::Json)?;
    let InboundEnvelope {
        type_code,
        seq,
        data,
    } = env;
    use packet_types::*;
    let packet = match type_code {
        LOGIN_RESPONSE => ServerPacket::LoginResponse(body(type_code, &seq, data)?),
        LOGOUT_RESPONSE => ServerPacket::LogoutResponse(body(type_code, &seq, data)?),
        HEARTBEAT_RESPONSE => ServerPacket::HeartbeatResponse(body(type_code, &seq, data)?),
        CHAT_MESSAGE_ACK => ServerPacket::ChatMessageAck(body(type_code, &seq, data)?),
        RECEIVE_MESSAGE => ServerPacket::ReceiveMessage(body(type_code, &seq, data)?),
        TYPING_NOTIFY => ServerPacket::TypingNotify(body(type_code, &seq, data)?),
        RECALL_ACK => ServerPacket::RecallAck(body(type_code, &seq, data)?),
        RECALL_NOTIFY => ServerPacket::RecallNotify(body(type_code, &seq, data)?),
        READ_ACK => ServerPacket::ReadAck(body(type_code, &seq, data)?),
        READ_RECEIPT_NOTIFY => ServerPacket::ReadReceiptNotify(body(type_code, &seq, data)?),
        SYNC_RESPONSE => ServerPacket::SyncResponse(body(type_code, &seq, data)?),
        OFFLINE_SYNC_RESPONSE => ServerPacket::OfflineSyncResponse(body(type_code, &seq, data)?),
        OFFLINE_SYNC_COMPLETE => ServerPacket::OfflineSyncComplete(body(type_code, &seq, data)?),
        KICKED_OFFLINE => ServerPacket::KickedOffline(body(type_code, &seq, data)?),
        SERVER_ERROR => ServerPacket::ServerError(body(type_code, &seq, data)?),
        code => return Err(FrameError::UnknownType { code, seq }),
    };
    Ok((seq, packet))
}

// ---------------------------------------------------------------------------
// Cluster events (gateway <-> gateway over the broker)
// ---------------------------------------------------------------------------

/// Pub/sub channel names.  Every node subscribes to all four; the node that
/// accepted the triggering client packet publishes.
pub mod channels {
    pub const MESSAGES: &str = "im:messages";
    pub const TYPING: &str = "im:typing";
    pub const READ_STATUS: &str = "im:read_status";
    pub const RECALL: &str = "im:recall";

    pub const ALL: [&str; 4] = [MESSAGES, TYPING, READ_STATUS, RECALL];
}

/// Published on `im:messages` once per persisted chat message.
///
/// `sender_device_id` identifies the origin device, which already holds the
/// ack and is excluded from fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub sender_device_id: String,
    pub server_msg_id: String,
    pub message: Value,
}

/// Published on `im:typing`.  Never persisted, never queued offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub conversation_id: i64,
    pub user_id: i64,
}

/// Published on `im:read_status`.
///
/// `notify_user_id` is set when the persistence service identified a
/// private-chat peer owed a read receipt; it rides the event so nodes that
/// did not handle the packet can deliver the receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadEvent {
    pub user_id: i64,
    pub origin_device_id: String,
    pub conversation_id: i64,
    pub last_read_msg_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_user_id: Option<i64>,
}

/// Published on `im:recall`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallEvent {
    pub conversation_id: i64,
    pub msg_id: String,
    pub recalled_by: i64,
}
