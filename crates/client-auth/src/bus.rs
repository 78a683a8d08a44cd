//! In-process session event channel.

use client_storage::AuthSession;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 64;

/// Every message that travels on the [`SessionBus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A new session was stored; the shell should adopt it and confirm.
    SessionEstablished {
        handshake_id: Uuid,
        session: AuthSession,
    },
    /// The shell adopted the session of the given handshake.
    SessionConfirmed { handshake_id: Uuid, uid: String },
    /// The session was removed.
    SessionCleared,
    LoginStarted,
    LoginSucceeded { uid: String },
    LoginFailed { message: String },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SessionEstablished { .. } => "session_established",
            SessionEvent::SessionConfirmed { .. } => "session_confirmed",
            SessionEvent::SessionCleared => "session_cleared",
            SessionEvent::LoginStarted => "login_started",
            SessionEvent::LoginSucceeded { .. } => "login_succeeded",
            SessionEvent::LoginFailed { .. } => "login_failed",
        }
    }
}

/// Broadcast channel shared by the entry points and the shell.
#[derive(Clone)]
pub struct SessionBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        let name = event.name();
        let delivered = self.sender.send(event).unwrap_or(0);
        trace!(event = name, delivered, "Session event published");
        delivered
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
