//! Offline queue: publish-time enqueue and reconnect replay.
//!
//! Enqueueing happens once per message, on the node that handled the
//! originating packet — subscriber nodes never enqueue, so multi-node
//! subscription cannot duplicate rows.  The insert itself is
//! existence-predicated on `(targetUserId, messageId)` as a second guard.
//!
//! Replay delivers the same message payloads (same `msgId`) the live
//! fan-out carries, so a client that raced both paths deduplicates by
//! server msg id.

use crate::api::OfflineEnqueue;
use crate::session::SessionHandle;
use crate::state::AppState;
use im_protocol::{
    ChatEvent, OfflineSyncAck, OfflineSyncComplete, OfflineSyncRequest, OfflineSyncResponse,
    ServerPacket,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

const OFFLINE_DEFAULT_LIMIT: u32 = 100;

/// Queue the message for every participant with no live session anywhere.
///
/// Rows are user-level (`targetDeviceId` null): the first device of that
/// user to reconnect drains them.  A presence read failure skips the user —
/// the message is durable and reachable through conversation sync.
pub async fn enqueue_for_absent_recipients(
    state: &AppState,
    session: &Arc<SessionHandle>,
    event: &ChatEvent,
) {
    let participants = match state
        .api
        .participants(session.user_id, &session.device_id, event.conversation_id)
        .await
    {
        Ok(participants) => participants,
        Err(e) => {
            warn!(
                conversation_id = event.conversation_id,
                error = %e,
                "participant lookup failed, skipping offline enqueue"
            );
            return;
        }
    };

    let mut rows = Vec::new();
    for user_id in participants {
        if user_id == event.sender_id {
            continue;
        }
        match state.broker.is_online(user_id).await {
            Ok(true) => {}
            Ok(false) => rows.push(OfflineEnqueue {
                target_user_id: user_id,
                target_device_id: None,
                message_id: event.server_msg_id.clone(),
                conversation_id: event.conversation_id,
                message_payload: event.message.clone(),
            }),
            Err(e) => {
                warn!(user_id, error = %e, "presence read failed, skipping offline enqueue");
            }
        }
    }

    if rows.is_empty() {
        return;
    }
    debug!(
        msg_id = %event.server_msg_id,
        recipients = rows.len(),
        "queueing for offline recipients"
    );
    if let Err(e) = state
        .api
        .enqueue_offline(session.user_id, &session.device_id, &rows)
        .await
    {
        warn!(msg_id = %event.server_msg_id, error = %e, "offline enqueue failed");
    }
}

/// OFFLINE_SYNC_REQUEST: hand the client its pending batch, oldest first.
pub async fn handle_sync_request(
    state: &AppState,
    session: &Arc<SessionHandle>,
    seq: &str,
    req: OfflineSyncRequest,
) {
    let limit = req.limit.unwrap_or(OFFLINE_DEFAULT_LIMIT);
    match state
        .api
        .pending_offline(session.user_id, &session.device_id, limit)
        .await
    {
        Ok(rows) if rows.is_empty() => {
            session.push(
                seq,
                &ServerPacket::OfflineSyncComplete(OfflineSyncComplete {
                    success: true,
                    count: 0,
                }),
            );
        }
        Ok(rows) => {
            info!(
                user_id = session.user_id,
                device_id = %session.device_id,
                count = rows.len(),
                "replaying offline queue"
            );
            let count = rows.len() as u32;
            let messages = rows.into_iter().map(|row| row.message_payload).collect();
            session.push(
                seq,
                &ServerPacket::OfflineSyncResponse(OfflineSyncResponse {
                    success: true,
                    messages,
                    count,
                }),
            );
        }
        Err(e) => {
            warn!(
                user_id = session.user_id,
                device_id = %session.device_id,
                error = %e,
                "offline fetch failed"
            );
            session.push(
                seq,
                &ServerPacket::OfflineSyncResponse(OfflineSyncResponse {
                    success: false,
                    messages: Vec::new(),
                    count: 0,
                }),
            );
        }
    }
}

/// OFFLINE_SYNC_ACK: mark the echoed message ids delivered.  Already-acked
/// rows are a no-op at the service; an empty list is a warning, not an
/// error.
pub async fn handle_sync_ack(state: &AppState, session: &Arc<SessionHandle>, ack: OfflineSyncAck) {
    if ack.message_ids.is_empty() {
        warn!(
            user_id = session.user_id,
            device_id = %session.device_id,
            "offline sync ack with no message ids"
        );
        return;
    }
    if let Err(e) = state
        .api
        .ack_offline(session.user_id, &session.device_id, &ack.message_ids)
        .await
    {
        warn!(
            user_id = session.user_id,
            device_id = %session.device_id,
            error = %e,
            "offline ack failed"
        );
    }
}
