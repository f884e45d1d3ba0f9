//! The boundary with the host process.
//!
//! `HostRuntime` is what the engine calls into (onboarding effects, shutdown
//! state). `HostAuthAdapter` is what the host calls into: its login path asks
//! `decide` whether a connection is one of ours, its world events report
//! joins and quits, and its listeners ask where identities spawn, whether a
//! player command targets one, and which identities a joining player should
//! not see.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::{PresenceFlags, SpawnLocation};
use crate::correlation::CorrelationStore;
use crate::engine::EngineHandle;
use crate::events::RemovalReason;
use crate::ident::{CorrelationKey, HostEntityRef, IdentityId};

/// Effects the engine asks of the host. Everything except `is_stopping` has a
/// no-op default so hosts only implement what they support.
pub trait HostRuntime: Send + Sync + 'static {
    /// True once the host itself is shutting down.
    fn is_stopping(&self) -> bool;

    fn apply_presence(&self, _entity: HostEntityRef, _flags: &PresenceFlags) {}

    fn grant_permissions(&self, _entity: HostEntityRef, _group: Option<&str>, _perms: &[String]) {}

    fn run_console_command(&self, _cmd: &str) {}

    fn run_command_as(&self, _entity: HostEntityRef, _cmd: &str) {}

    fn start_chatter(&self, _id: IdentityId, _entity: HostEntityRef) {}
}

/// Outcome handed back to the host's login path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Admit as this synthetic identity.
    Synthetic(IdentityId),
    /// Not ours (or something went wrong); the host decides as usual.
    HostDefault,
}

pub struct HostAuthAdapter {
    store: Arc<CorrelationStore>,
    engine: EngineHandle,
}

impl HostAuthAdapter {
    pub fn new(engine: EngineHandle) -> Self {
        Self {
            store: engine.store(),
            engine,
        }
    }

    /// Called from the host's login path, on whatever thread that runs on.
    ///
    /// Never blocks and never panics outward.
    pub fn decide(&self, presented: Option<u128>) -> AuthDecision {
        let Some(raw) = presented else {
            return AuthDecision::HostDefault;
        };
        let key = CorrelationKey(raw);
        let decision = guarded(|| self.resolve(key));
        if let AuthDecision::Synthetic(id) = decision {
            self.engine.notify_authenticated(id, key);
        }
        decision
    }

    /// Consume a pending key. At most one caller ever gets `Some` per key.
    pub fn resolve(&self, key: CorrelationKey) -> Option<IdentityId> {
        self.store.resolve(key)
    }

    /// The host saw an admitted connection become a live entity.
    ///
    /// Returns `true` if this promoted the identity. Only an identity whose
    /// current key went through `decide` can be promoted.
    pub async fn on_world_join_observed(&self, id: IdentityId, host_ref: HostEntityRef) -> bool {
        match self.engine.promote(id, host_ref).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(identity = %id, entity = %host_ref, "world join not promotable; ignoring");
                false
            }
            Err(e) => {
                warn!(identity = %id, err = %e, "promotion failed");
                false
            }
        }
    }

    /// The host saw an identity leave the world.
    pub async fn on_world_quit_observed(&self, id: IdentityId) {
        if let Err(e) = self.engine.remove_with(id, RemovalReason::WorldQuit).await {
            debug!(identity = %id, err = %e, "world quit removal skipped");
        }
    }

    /// Whether `id` belongs to a live synthetic identity.
    pub async fn is_identity(&self, id: IdentityId) -> bool {
        self.engine.is_identity(id).await.unwrap_or(false)
    }

    /// Where the host should spawn `id`, if it is an identity and a spawn
    /// point is configured.
    pub async fn spawn_location_for(&self, id: IdentityId) -> Option<SpawnLocation> {
        let loc = self.engine.config().onboarding.spawn_location.clone()?;
        self.is_identity(id).await.then_some(loc)
    }

    /// Check a real player's command before the host runs it. Returns the
    /// refusal message when it names a live identity. `exempt` is the host's
    /// bypass permission for the sender.
    pub async fn blocks_command(&self, cmd: &str, exempt: bool) -> Option<String> {
        let cfg = &self.engine.config().block_interaction;
        if !cfg.enabled || exempt {
            return None;
        }
        let names = self.engine.raw_names().await.ok()?;
        command_targets(cmd, &names).then(|| cfg.message.clone())
    }

    /// A player joined. When identities are hidden, returns the entities the
    /// host should hide from that player; empty for identities themselves.
    pub async fn on_real_player_join(&self, id: IdentityId) -> Vec<HostEntityRef> {
        if !self.engine.config().onboarding.presence.hide || self.is_identity(id).await {
            return Vec::new();
        }
        self.engine.active_refs().await.unwrap_or_default()
    }
}

/// True if any argument of `cmd` (the words after the command label) is one
/// of `names`, ignoring case.
fn command_targets(cmd: &str, names: &[String]) -> bool {
    cmd.split_whitespace()
        .skip(1)
        .any(|arg| names.iter().any(|n| n.eq_ignore_ascii_case(arg)))
}

/// Run a resolve step, turning a panic into the host's default outcome.
fn guarded<F>(f: F) -> AuthDecision
where
    F: FnOnce() -> Option<IdentityId>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Some(id)) => AuthDecision::Synthetic(id),
        Ok(None) => AuthDecision::HostDefault,
        Err(p) => {
            let msg = p
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| p.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(panic = %msg, "identity resolve panicked; falling back to host default");
            AuthDecision::HostDefault
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_in_resolve_falls_back() {
        let d = guarded(|| panic!("boom"));
        assert_eq!(d, AuthDecision::HostDefault);
    }

    #[test]
    fn command_targets_matches_arguments_only() {
        let names = vec!["Finch".to_string(), "Wren".to_string()];
        assert!(command_targets("/tp finch", &names));
        assert!(command_targets("/msg WREN hello there", &names));
        assert!(command_targets("kick   Finch  ", &names));
        assert!(!command_targets("/finch", &names));
        assert!(!command_targets("/tp Finchy", &names));
        assert!(!command_targets("/say hello", &names));
        assert!(!command_targets("", &names));
        assert!(!command_targets("/tp Finch", &[]));
    }

    #[test]
    fn guarded_passes_results_through() {
        let id = IdentityId::derive("Wren");
        assert_eq!(guarded(|| Some(id)), AuthDecision::Synthetic(id));
        assert_eq!(guarded(|| None), AuthDecision::HostDefault);
    }
}
