//! Fan-out engine: one subscriber task per node.
//!
//! Broker events are consumed strictly in arrival order and expanded into
//! per-session frames through the registry.  Because this loop is the only
//! writer feeding fan-out frames and every session write queue is FIFO, a
//! single device sees one conversation's messages in channel order.
//!
//! Failure posture: a participant lookup that fails degrades to no fan-out
//! (clients recover via pull); a session whose queue is full is dropped by
//! the push itself.

use crate::broker::BrokerEvent;
use crate::state::AppState;
use im_protocol::{
    channels, ChatEvent, ReadAck, ReadEvent, ReadReceiptNotify, ReceiveMessage, RecallEvent,
    RecallNotify, ServerPacket, TypingEvent, TypingNotify,
};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Start the per-node subscriber loop.
pub fn spawn(state: AppState) -> JoinHandle<()> {
    let mut events = state.broker.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => handle_event(&state, event).await,
                Err(RecvError::Lagged(skipped)) => {
                    // At-most-once per node: affected clients heal via sync.
                    warn!(skipped, "broker event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("fan-out loop stopped");
    })
}

async fn handle_event(state: &AppState, event: BrokerEvent) {
    match event.channel.as_str() {
        channels::MESSAGES => {
            if let Some(ev) = parse::<ChatEvent>(&event) {
                on_chat(state, ev).await;
            }
        }
        channels::TYPING => {
            if let Some(ev) = parse::<TypingEvent>(&event) {
                on_typing(state, ev).await;
            }
        }
        channels::READ_STATUS => {
            if let Some(ev) = parse::<ReadEvent>(&event) {
                on_read(state, ev).await;
            }
        }
        channels::RECALL => {
            if let Some(ev) = parse::<RecallEvent>(&event) {
                on_recall(state, ev).await;
            }
        }
        other => warn!(channel = %other, "event on unexpected channel"),
    }
}

fn parse<T: DeserializeOwned>(event: &BrokerEvent) -> Option<T> {
    match serde_json::from_str(&event.payload) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(channel = %event.channel, error = %e, "undecodable cluster event");
            None
        }
    }
}

/// RECEIVE_MESSAGE to every participant session except the origin device,
/// which already holds the ack.
async fn on_chat(state: &AppState, ev: ChatEvent) {
    let participants = match state
        .api
        .participants(ev.sender_id, &ev.sender_device_id, ev.conversation_id)
        .await
    {
        Ok(participants) => participants,
        Err(e) => {
            warn!(
                conversation_id = ev.conversation_id,
                error = %e,
                "participant lookup failed, no fan-out"
            );
            return;
        }
    };

    for user_id in participants {
        for session in state.registry.sessions_for_user(user_id).await {
            if session.user_id == ev.sender_id && session.device_id == ev.sender_device_id {
                continue;
            }
            session.push(
                "",
                &ServerPacket::ReceiveMessage(ReceiveMessage {
                    conversation_id: ev.conversation_id,
                    sender_id: ev.sender_id,
                    msg_id: ev.server_msg_id.clone(),
                    message: ev.message.clone(),
                }),
            );
        }
    }
}

/// TYPING_NOTIFY to every participant except the typing user.
async fn on_typing(state: &AppState, ev: TypingEvent) {
    let participants = match state
        .api
        .participants(ev.user_id, "", ev.conversation_id)
        .await
    {
        Ok(participants) => participants,
        Err(e) => {
            debug!(conversation_id = ev.conversation_id, error = %e, "typing fan-out skipped");
            return;
        }
    };

    for user_id in participants {
        if user_id == ev.user_id {
            continue;
        }
        for session in state.registry.sessions_for_user(user_id).await {
            session.push(
                "",
                &ServerPacket::TypingNotify(TypingNotify {
                    conversation_id: ev.conversation_id,
                    user_id: ev.user_id,
                }),
            );
        }
    }
}

/// READ_ACK to the reader's other devices; READ_RECEIPT_NOTIFY to every
/// session of the notify target, when the event names one.
async fn on_read(state: &AppState, ev: ReadEvent) {
    for session in state.registry.sessions_for_user(ev.user_id).await {
        if session.device_id == ev.origin_device_id {
            continue;
        }
        session.push(
            "",
            &ServerPacket::ReadAck(ReadAck {
                conversation_id: ev.conversation_id,
                last_read_msg_id: ev.last_read_msg_id.clone(),
            }),
        );
    }

    if let Some(target) = ev.notify_user_id {
        for session in state.registry.sessions_for_user(target).await {
            session.push(
                "",
                &ServerPacket::ReadReceiptNotify(ReadReceiptNotify {
                    conversation_id: ev.conversation_id,
                    reader_id: ev.user_id,
                    last_read_msg_id: ev.last_read_msg_id.clone(),
                }),
            );
        }
    }
}

/// RECALL_NOTIFY to every session of every participant, the recaller's
/// other devices included.
async fn on_recall(state: &AppState, ev: RecallEvent) {
    let participants = match state
        .api
        .participants(ev.recalled_by, "", ev.conversation_id)
        .await
    {
        Ok(participants) => participants,
        Err(e) => {
            warn!(
                conversation_id = ev.conversation_id,
                error = %e,
                "participant lookup failed, recall fan-out skipped"
            );
            return;
        }
    };

    for user_id in participants {
        for session in state.registry.sessions_for_user(user_id).await {
            session.push(
                "",
                &ServerPacket::RecallNotify(RecallNotify {
                    conversation_id: ev.conversation_id,
                    msg_id: ev.msg_id.clone(),
                    recalled_by: ev.recalled_by,
                }),
            );
        }
    }
}
