//! The gateway socket: one long-lived WebSocket per client device.
//!
//! Each connection runs two tasks: this reader loop (single reader, packets
//! handled strictly in arrival order) and a writer task draining the
//! session's outbound queue (single writer, frames in submission order).
//! The reader loop owns the connection lifecycle:
//!
//! `Unauthenticated` -> (LOGIN ok) -> `Authenticated` -> (LOGOUT | idle
//! timeout | duplicate-key eviction | socket error) -> closed, with the
//! disconnect hook running exactly once via the registry removal.

use crate::auth;
use crate::dispatch::{self, Flow};
use crate::session::{Outbound, SessionHandle, OUTBOUND_QUEUE_CAPACITY};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use im_protocol::{
    decode_frame, encode_frame, ClientPacket, Frame, FrameError, LoginResponse, ServerError,
    ServerPacket,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

const VIOLATION_WINDOW: Duration = Duration::from_secs(10);
const VIOLATION_LIMIT: usize = 3;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let socket_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE_CAPACITY);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // Writer task: sole owner of the sink.  Closes the socket on Close,
    // force-close, write failure, or when the last sender is dropped.
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        let _ = sink.close().await;
                        break;
                    }
                }
                item = out_rx.recv() => match item {
                    Some(Outbound::Frame(json)) => {
                        if sink.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Pong(payload)) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        }
    });

    // The idle window doubles as the unauthenticated grace period.
    let idle_timeout = state.config.idle_timeout();
    let mut reader_shutdown = shutdown_tx.subscribe();
    let mut current: Option<Arc<SessionHandle>> = None;
    let mut violations: VecDeque<Instant> = VecDeque::new();

    // The force-close watch is raced against the read so an unresponsive
    // client (full write queue) is unlinked immediately, not when its read
    // side eventually errors or idles out.
    loop {
        tokio::select! {
            biased;
            _ = reader_shutdown.changed() => {
                if *reader_shutdown.borrow() {
                    debug!(socket_id = %socket_id, "connection force-closed");
                    break;
                }
            }
            msg = tokio::time::timeout(idle_timeout, stream.next()) => match msg {
                Err(_) => {
                    match &current {
                        Some(s) => {
                            warn!(user_id = s.user_id, device_id = %s.device_id, "heartbeat timeout")
                        }
                        None => debug!("unauthenticated socket timed out"),
                    }
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    debug!(error = %e, "socket read error");
                    break;
                }
                Ok(Some(Ok(Message::Text(text)))) => match decode_frame(&text) {
                    Ok(frame) => {
                        match handle_frame(&state, socket_id, &out_tx, &shutdown_tx, &mut current, frame)
                            .await
                        {
                            Flow::Continue => {}
                            Flow::Disconnect => break,
                        }
                    }
                    Err(err) => {
                        send_protocol_error(&out_tx, &err);
                        if record_violation(&mut violations, Instant::now()) {
                            warn!(socket_id = %socket_id, "repeated protocol violations, closing socket");
                            let _ = out_tx.try_send(Outbound::Close);
                            break;
                        }
                    }
                },
                Ok(Some(Ok(Message::Ping(payload)))) => {
                    let _ = out_tx.try_send(Outbound::Pong(payload));
                }
                Ok(Some(Ok(Message::Close(_)))) => break,
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    // Disconnect hook: fires once, whoever removed the entry first owns it.
    // A session displaced by a newer login was already unlinked (and its
    // presence released) by the eviction path, so this finds nothing.
    if let Some(session) = state.registry.remove_by_socket(socket_id).await {
        if let Err(e) = state.broker.mark_offline(session.user_id).await {
            warn!(user_id = session.user_id, error = %e, "presence mark-offline failed");
        }
        info!(user_id = session.user_id, device_id = %session.device_id, "session disconnected");
    }
    let _ = shutdown_tx.send(true);
    let _ = writer.await;
}

/// Route one decoded frame.  Unauthenticated sockets may only LOGIN;
/// everything else is dropped silently — no reply, no registry mutation.
async fn handle_frame(
    state: &AppState,
    socket_id: Uuid,
    out_tx: &mpsc::Sender<Outbound>,
    shutdown_tx: &Arc<watch::Sender<bool>>,
    current: &mut Option<Arc<SessionHandle>>,
    frame: Frame,
) -> Flow {
    if let Some(session) = current {
        return dispatch::dispatch(state, session, frame).await;
    }

    let (seq, login) = match frame.packet {
        ClientPacket::Login(login) => (frame.seq, login),
        _ => return Flow::Continue,
    };

    match auth::validate_token(&state.config.jwt_secret, &login.token, &login.device_id) {
        Ok(identity) => {
            let session = Arc::new(SessionHandle::new(
                socket_id,
                identity.user_id,
                identity.device_id,
                login.device_type,
                out_tx.clone(),
                Arc::clone(shutdown_tx),
            ));
            let displaced = state.registry.add(Arc::clone(&session)).await;
            if let Err(e) = state.broker.mark_online(session.user_id).await {
                warn!(user_id = session.user_id, error = %e, "presence mark-online failed");
            }
            if let Some(old) = displaced {
                info!(
                    user_id = old.user_id,
                    device_id = %old.device_id,
                    "displaced by newer login"
                );
                old.kick("signed in from another connection");
                if let Err(e) = state.broker.mark_offline(old.user_id).await {
                    warn!(user_id = old.user_id, error = %e, "presence mark-offline failed");
                }
            }
            info!(
                user_id = session.user_id,
                device_id = %session.device_id,
                device_type = ?session.device_type,
                "session authenticated"
            );
            session.push(
                &seq,
                &ServerPacket::LoginResponse(LoginResponse {
                    success: true,
                    user_id: Some(session.user_id),
                    error: None,
                }),
            );
            *current = Some(session);
            Flow::Continue
        }
        Err(e) => {
            debug!(reason = ?e, "login rejected");
            let reply = ServerPacket::LoginResponse(LoginResponse {
                success: false,
                user_id: None,
                error: Some(e.to_string()),
            });
            if let Ok(json) = encode_frame(&seq, &reply) {
                let _ = out_tx.try_send(Outbound::Frame(json));
            }
            let _ = out_tx.try_send(Outbound::Close);
            Flow::Disconnect
        }
    }
}

fn send_protocol_error(out_tx: &mpsc::Sender<Outbound>, err: &FrameError) {
    let seq = err.seq().unwrap_or("");
    let reply = ServerPacket::ServerError(ServerError {
        error: err.to_string(),
    });
    if let Ok(json) = encode_frame(seq, &reply) {
        let _ = out_tx.try_send(Outbound::Frame(json));
    }
}

/// Record one violation and report whether the rolling window is exhausted.
fn record_violation(violations: &mut VecDeque<Instant>, now: Instant) -> bool {
    violations.push_back(now);
    while let Some(front) = violations.front() {
        if now.duration_since(*front) > VIOLATION_WINDOW {
            violations.pop_front();
        } else {
            break;
        }
    }
    violations.len() >= VIOLATION_LIMIT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_window_trips_on_third_strike() {
        let mut violations = VecDeque::new();
        let t0 = Instant::now();
        assert!(!record_violation(&mut violations, t0));
        assert!(!record_violation(&mut violations, t0 + Duration::from_secs(1)));
        assert!(record_violation(&mut violations, t0 + Duration::from_secs(2)));
    }

    #[test]
    fn violations_outside_the_window_are_forgotten() {
        let mut violations = VecDeque::new();
        let t0 = Instant::now();
        assert!(!record_violation(&mut violations, t0));
        assert!(!record_violation(&mut violations, t0 + Duration::from_secs(1)));
        // The first two strikes age out before the third lands.
        assert!(!record_violation(
            &mut violations,
            t0 + Duration::from_secs(12)
        ));
        assert_eq!(violations.len(), 1);
    }
}
