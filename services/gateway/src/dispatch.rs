//! Packet dispatcher: one handler per inbound packet type.
//!
//! The connection task calls [`dispatch`] for every decoded frame once the
//! socket is authenticated (LOGIN itself is handled by the connection task,
//! since it changes connection state).  Handlers reply on the request `seq`
//! through the session's write queue and return whether the connection
//! stays up.

use crate::offline;
use crate::session::{Outbound, SessionHandle};
use crate::state::AppState;
use chrono::Utc;
use im_protocol::{
    channels, ChatEvent, ChatMessage, ChatMessageAck, Frame, HeartbeatResponse, LoginResponse,
    LogoutResponse, ReadAck, ReadEvent, RecallAck, RecallEvent, RecallMessage, ServerPacket,
    SyncRequest, SyncResponse, TypingEvent, ClientPacket,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

const SYNC_DEFAULT_LIMIT: u32 = 50;

/// Outcome of handling one packet.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Disconnect,
}

pub async fn dispatch(state: &AppState, session: &Arc<SessionHandle>, frame: Frame) -> Flow {
    let seq = frame.seq;
    match frame.packet {
        ClientPacket::Login(_) => {
            // Second LOGIN on a live session: reject, keep the session.
            session.push(
                &seq,
                &ServerPacket::LoginResponse(LoginResponse {
                    success: false,
                    user_id: None,
                    error: Some("already authenticated".to_owned()),
                }),
            );
            Flow::Continue
        }
        ClientPacket::Logout => {
            session.push(
                &seq,
                &ServerPacket::LogoutResponse(LogoutResponse { success: true }),
            );
            session.push_outbound(Outbound::Close);
            info!(user_id = session.user_id, device_id = %session.device_id, "logout");
            Flow::Disconnect
        }
        ClientPacket::Heartbeat => {
            session.push(
                &seq,
                &ServerPacket::HeartbeatResponse(HeartbeatResponse {
                    server_time: Utc::now().timestamp_millis(),
                }),
            );
            Flow::Continue
        }
        ClientPacket::ChatMessage(msg) => {
            handle_chat(state, session, &seq, msg).await;
            Flow::Continue
        }
        ClientPacket::Typing(typing) => {
            publish_event(
                state,
                channels::TYPING,
                &TypingEvent {
                    conversation_id: typing.conversation_id,
                    user_id: session.user_id,
                },
            )
            .await;
            Flow::Continue
        }
        ClientPacket::ReadAck(read) => {
            handle_read_ack(state, session, read).await;
            Flow::Continue
        }
        ClientPacket::RecallMessage(recall) => {
            handle_recall(state, session, &seq, recall).await;
            Flow::Continue
        }
        ClientPacket::SyncRequest(req) => {
            handle_sync(state, session, &seq, req).await;
            Flow::Continue
        }
        ClientPacket::OfflineSyncRequest(req) => {
            offline::handle_sync_request(state, session, &seq, req).await;
            Flow::Continue
        }
        ClientPacket::OfflineSyncAck(ack) => {
            offline::handle_sync_ack(state, session, ack).await;
            Flow::Continue
        }
    }
}

/// Persist, ack the origin, then publish.  The ack is enqueued before the
/// publish so the origin device learns the canonical server msg id before
/// any of its sibling devices sees the fan-out.
async fn handle_chat(state: &AppState, session: &Arc<SessionHandle>, seq: &str, msg: ChatMessage) {
    let persisted = match state
        .api
        .persist_message(session.user_id, &session.device_id, &msg)
        .await
    {
        Ok(persisted) => persisted,
        Err(e) => {
            warn!(
                user_id = session.user_id,
                client_msg_id = %msg.msg_id,
                error = %e,
                "persist failed"
            );
            session.push(
                seq,
                &ServerPacket::ChatMessageAck(ChatMessageAck {
                    client_msg_id: msg.msg_id,
                    msg_id: None,
                    server_timestamp: None,
                    success: false,
                    error: Some(e.to_string()),
                }),
            );
            return;
        }
    };

    session.push(
        seq,
        &ServerPacket::ChatMessageAck(ChatMessageAck {
            client_msg_id: msg.msg_id.clone(),
            msg_id: Some(persisted.server_msg_id.clone()),
            server_timestamp: Some(persisted.server_timestamp),
            success: true,
            error: None,
        }),
    );

    let event = ChatEvent {
        conversation_id: msg.conversation_id,
        sender_id: session.user_id,
        sender_device_id: session.device_id.clone(),
        server_msg_id: persisted.server_msg_id.clone(),
        message: canonical_message(session.user_id, &msg, &persisted),
    };
    // Publish failure is not surfaced to the origin: the message is durable
    // and recipients heal through reconnect-time sync.
    publish_event(state, channels::MESSAGES, &event).await;

    offline::enqueue_for_absent_recipients(state, session, &event).await;
}

async fn handle_read_ack(state: &AppState, session: &Arc<SessionHandle>, read: ReadAck) {
    match state
        .api
        .update_read_cursor(
            session.user_id,
            &session.device_id,
            read.conversation_id,
            &read.last_read_msg_id,
        )
        .await
    {
        Ok(result) => {
            if result.changed {
                publish_event(
                    state,
                    channels::READ_STATUS,
                    &ReadEvent {
                        user_id: session.user_id,
                        origin_device_id: session.device_id.clone(),
                        conversation_id: read.conversation_id,
                        last_read_msg_id: read.last_read_msg_id,
                        notify_user_id: result.notify_user_id,
                    },
                )
                .await;
            }
        }
        Err(e) => {
            warn!(
                user_id = session.user_id,
                conversation_id = read.conversation_id,
                error = %e,
                "read cursor update failed"
            );
        }
    }
}

async fn handle_recall(
    state: &AppState,
    session: &Arc<SessionHandle>,
    seq: &str,
    recall: RecallMessage,
) {
    match state
        .api
        .recall_message(session.user_id, &session.device_id, &recall.msg_id)
        .await
    {
        Ok(()) => {
            session.push(
                seq,
                &ServerPacket::RecallAck(RecallAck {
                    success: true,
                    msg_id: Some(recall.msg_id.clone()),
                    error: None,
                }),
            );
            publish_event(
                state,
                channels::RECALL,
                &RecallEvent {
                    conversation_id: recall.conversation_id,
                    msg_id: recall.msg_id,
                    recalled_by: session.user_id,
                },
            )
            .await;
        }
        Err(e) => {
            session.push(
                seq,
                &ServerPacket::RecallAck(RecallAck {
                    success: false,
                    msg_id: Some(recall.msg_id),
                    error: Some(e.to_string()),
                }),
            );
        }
    }
}

async fn handle_sync(state: &AppState, session: &Arc<SessionHandle>, seq: &str, req: SyncRequest) {
    let limit = req.limit.unwrap_or(SYNC_DEFAULT_LIMIT);
    match state
        .api
        .messages_for_sync(
            session.user_id,
            &session.device_id,
            req.conversation_id,
            req.after_msg_id.as_deref(),
            limit,
        )
        .await
    {
        Ok(messages) => {
            session.push(
                seq,
                &ServerPacket::SyncResponse(SyncResponse {
                    success: true,
                    messages,
                    sync_cursor: Utc::now().timestamp_millis(),
                }),
            );
        }
        Err(e) => {
            warn!(
                user_id = session.user_id,
                conversation_id = req.conversation_id,
                error = %e,
                "sync fetch failed"
            );
            session.push(
                seq,
                &ServerPacket::SyncResponse(SyncResponse {
                    success: false,
                    messages: Vec::new(),
                    sync_cursor: Utc::now().timestamp_millis(),
                }),
            );
        }
    }
}

/// Serialize and publish one cluster event; failures are logged, never
/// surfaced to the client.
pub async fn publish_event<T: Serialize>(state: &AppState, channel: &str, event: &T) {
    match serde_json::to_string(event) {
        Ok(payload) => {
            if let Err(e) = state.broker.publish(channel, payload).await {
                warn!(channel = %channel, error = %e, "broker publish failed");
            }
        }
        Err(e) => warn!(channel = %channel, error = %e, "event serialize failed"),
    }
}

/// The message object fanned out and replayed for one persisted chat
/// message.  Both paths carry the same `msgId` so clients deduplicate.
fn canonical_message(
    sender_id: i64,
    msg: &ChatMessage,
    persisted: &crate::api::PersistResult,
) -> Value {
    json!({
        "msgId": persisted.server_msg_id,
        "clientMsgId": msg.msg_id,
        "conversationId": msg.conversation_id,
        "senderId": sender_id,
        "msgType": msg.msg_type,
        "content": msg.content,
        "metadata": msg.metadata,
        "quoteMsgId": msg.quote_msg_id,
        "atUserIds": msg.at_user_ids,
        "timestamp": persisted.server_timestamp,
    })
}
