//! The device registry: the process-wide map from `device_id` to the
//! currently live, authenticated session. At most one session per
//! `device_id`; a newer authentication displaces an older one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use super::auth::Role;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// A live session's outward-facing handle. The registry and the relay
/// engine only ever touch this — never the socket directly — so that all
/// outbound frames for a session funnel through its single writer task.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: u64,
    pub device_id: String,
    pub role: Role,
    pub created_at: chrono::DateTime<chrono::Utc>,
    outbound: mpsc::Sender<OutboundMessage>,
}

/// Messages the writer task understands: either a text frame to forward to
/// the client, or an instruction to close the socket with a specific code.
pub enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

impl SessionHandle {
    pub fn new(
        session_id: u64,
        device_id: String,
        role: Role,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        Self {
            session_id,
            device_id,
            role,
            created_at: chrono::Utc::now(),
            outbound,
        }
    }

    /// Queue a text frame for delivery. Fire-and-forget: a full or closed
    /// channel is silently dropped, matching the relay's best-effort policy.
    pub fn send_text(&self, text: String) {
        let _ = self.outbound.try_send(OutboundMessage::Text(text));
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.outbound.try_send(OutboundMessage::Close {
            code,
            reason: reason.into(),
        });
    }
}

#[derive(Default)]
pub struct Registry {
    by_device_id: DashMap<String, SessionHandle>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `session`, displacing and returning any existing session
    /// for the same `device_id`. The displaced session is closed with
    /// `4409 superseded` as part of this call, before the new entry is
    /// visible to other readers — so a concurrent lookup never observes
    /// both sessions live at once.
    pub fn register(&self, session: SessionHandle) -> Option<SessionHandle> {
        let displaced = self.by_device_id.insert(session.device_id.clone(), session);
        if let Some(old) = &displaced {
            old.close(
                crate::gateway::protocol::close_code::SUPERSEDED,
                "superseded",
            );
        }
        displaced
    }

    pub fn lookup(&self, device_id: &str) -> Option<SessionHandle> {
        self.by_device_id.get(device_id).map(|e| e.value().clone())
    }

    /// Remove `session_id` from its slot — a no-op if the slot has since
    /// been taken over by a newer session (the common race on disconnect
    /// racing with displacement).
    pub fn unregister(&self, device_id: &str, session_id: u64) {
        self.by_device_id.remove_if(device_id, |_, v| v.session_id == session_id);
    }

    /// All currently authenticated sessions other than `exclude`.
    pub fn broadcast_targets(&self, exclude: u64) -> Vec<SessionHandle> {
        self.by_device_id
            .iter()
            .filter(|e| e.value().session_id != exclude)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_device_id.len()
    }

    /// The currently connected desktop session, if any. Used by the
    /// pairing sub-protocol to find where to forward a `pairing_request`.
    pub fn find_desktop(&self) -> Option<SessionHandle> {
        self.by_device_id
            .iter()
            .find(|e| e.value().role == Role::Desktop)
            .map(|e| e.value().clone())
    }
}
