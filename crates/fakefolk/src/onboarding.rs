use crate::config::OnboardingConfig;
use crate::host::HostRuntime;
use crate::ident::{HostEntityRef, IdentityId};

/// Apply the configured onboarding to a just-promoted identity.
///
/// Runs on the engine task, once per promotion. Auto-quit scheduling is the
/// engine's job since it owns the timers.
pub fn run(
    host: &dyn HostRuntime,
    cfg: &OnboardingConfig,
    id: IdentityId,
    name: &str,
    entity: HostEntityRef,
) {
    host.apply_presence(entity, &cfg.presence);
    if cfg.permission_group.is_some() || !cfg.permissions.is_empty() {
        host.grant_permissions(entity, cfg.permission_group.as_deref(), &cfg.permissions);
    }
    for cmd in &cfg.join_commands_console {
        host.run_console_command(&expand(cmd, name, id));
    }
    for cmd in &cfg.join_commands_identity {
        host.run_command_as(entity, &expand(cmd, name, id));
    }
    if cfg.chatter {
        host.start_chatter(id, entity);
    }
}

/// Substitute `{name}` and `{uuid}`.
pub fn expand(cmd: &str, name: &str, id: IdentityId) -> String {
    cmd.replace("{name}", name).replace("{uuid}", &id.to_string())
}
