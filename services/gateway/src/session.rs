//! Per-connection session handle and outbound write queue.
//!
//! Each socket has exactly one writer task draining a bounded mpsc queue, so
//! outbound frames for one connection are written in submission order.  Any
//! task may enqueue without blocking; a full queue means the client stopped
//! draining and the session is force-closed instead of buffering unbounded.

use chrono::{DateTime, Utc};
use im_protocol::{encode_frame, DeviceType, KickedOffline, ServerPacket};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::warn;
use uuid::Uuid;

/// High-water mark for the per-session write queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// One item on the write queue.
#[derive(Debug)]
pub enum Outbound {
    /// An encoded frame to write as a text message.
    Frame(String),
    /// Transport pong, echoing the ping payload.
    Pong(Vec<u8>),
    /// Flush what precedes this and close the socket.
    Close,
}

/// An authenticated session: the registry's view of one live socket.
#[derive(Debug)]
pub struct SessionHandle {
    pub socket_id: Uuid,
    pub user_id: i64,
    pub device_id: String,
    pub device_type: DeviceType,
    pub connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Outbound>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    pub fn new(
        socket_id: Uuid,
        user_id: i64,
        device_id: String,
        device_type: DeviceType,
        outbound: mpsc::Sender<Outbound>,
        shutdown: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            socket_id,
            user_id,
            device_id,
            device_type,
            connected_at: Utc::now(),
            outbound,
            shutdown,
        }
    }

    /// Enqueue one server packet for this session.
    ///
    /// Returns false when the frame could not be enqueued.  A full queue is
    /// treated as an unresponsive client: the session is force-closed and the
    /// durable event remains recoverable through sync/replay.
    pub fn push(&self, seq: &str, packet: &ServerPacket) -> bool {
        let json = match encode_frame(seq, packet) {
            Ok(json) => json,
            Err(e) => {
                warn!(user_id = self.user_id, device_id = %self.device_id, error = %e, "frame encode failed");
                return false;
            }
        };
        self.push_outbound(Outbound::Frame(json))
    }

    pub fn push_outbound(&self, item: Outbound) -> bool {
        match self.outbound.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    user_id = self.user_id,
                    device_id = %self.device_id,
                    "outbound queue full, dropping session"
                );
                self.force_close();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Displacement: tell the client why, flush, close.
    pub fn kick(&self, reason: &str) {
        let kicked = ServerPacket::KickedOffline(KickedOffline {
            reason: reason.to_owned(),
        });
        if self.push("", &kicked) {
            let _ = self.outbound.try_send(Outbound::Close);
        }
    }

    /// Immediate close, bypassing the write queue.  Both connection tasks
    /// watch this signal, so the session is unlinked right away rather than
    /// when the peer's read side happens to error or idle out.
    pub fn force_close(&self) {
        let _ = self.shutdown.send(true);
    }
}
