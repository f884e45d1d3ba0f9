use crate::ident::{HostEntityRef, IdentityId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalReason {
    /// A caller asked for it (`remove`, `remove_number`, `remove_all`).
    Requested,
    /// The host saw the identity leave the world.
    WorldQuit,
    /// No promotion within the timeout window.
    JoinTimedOut,
    /// The session never got going.
    SessionFailed(String),
    AutoQuit,
    Shutdown,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::Requested => "requested",
            RemovalReason::WorldQuit => "world_quit",
            RemovalReason::JoinTimedOut => "join_timed_out",
            RemovalReason::SessionFailed(_) => "session_failed",
            RemovalReason::AutoQuit => "auto_quit",
            RemovalReason::Shutdown => "shutdown",
        }
    }
}

/// Notifications for collaborators outside the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Created {
        id: IdentityId,
        name: String,
    },
    /// Emitted after onboarding ran.
    Promoted {
        id: IdentityId,
        name: String,
        host_ref: HostEntityRef,
    },
    JoinTimedOut {
        id: IdentityId,
        name: String,
    },
    Removed {
        id: IdentityId,
        name: String,
        reason: RemovalReason,
        was_active: bool,
    },
}
