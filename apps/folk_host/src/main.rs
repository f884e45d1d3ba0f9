use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use bytes::Bytes;
use fakefolk::config::PresenceFlags;
use fakefolk::{
    AuthDecision, EngineConfig, EngineEvent, EngineHandle, HostAuthAdapter, HostEntityRef,
    HostRuntime, IdentityId, TcpDialer,
};
use folkio::frame::{FrameReader, FrameWriter};
use folkproto::clientbound::Clientbound;
use folkproto::serverbound::{self, Serverbound};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{Level, debug, info, warn};
use uuid::Uuid;

const KEEPALIVE_EVERY: Duration = Duration::from_secs(15);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(20);

fn usage_and_exit() -> ! {
    eprintln!(
        "folk_host (game host with synthetic identities)\n\n\
USAGE:\n  folk_host [--bind HOST:PORT] [--spawn N] [--online] [--pack-url URL]\n\n\
ENV:\n  FOLK_HOST_BIND              default 127.0.0.1:25565\n  FOLK_HOST_SPAWN             optional; identities to create at startup (default 0)\n  FOLK_HOST_ONLINE            optional; default 0 (1 = reject logins that are not synthetic)\n  FOLK_HOST_PACK_URL          optional; content pack offered after login\n  FAKEFOLK_CONFIG             optional; JSON identity config\n  FAKEFOLK_*                  identity config overrides (see fakefolk::config)\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    bind: SocketAddr,
    spawn: usize,
    // Without online mode, unrecognised players get an offline uuid.
    online: bool,
    pack_url: Option<String>,
}

fn parse_args() -> Config {
    let mut bind: SocketAddr = std::env::var("FOLK_HOST_BIND")
        .unwrap_or_else(|_| "127.0.0.1:25565".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());
    let mut spawn: usize = std::env::var("FOLK_HOST_SPAWN")
        .ok()
        .map(|s| s.parse().unwrap_or_else(|_| usage_and_exit()))
        .unwrap_or(0);
    let mut online = std::env::var("FOLK_HOST_ONLINE").is_ok_and(|v| v == "1");
    let mut pack_url = std::env::var("FOLK_HOST_PACK_URL").ok().filter(|s| !s.is_empty());

    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        match a.as_str() {
            "--bind" => {
                bind = args
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage_and_exit());
            }
            "--spawn" => {
                spawn = args
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage_and_exit());
            }
            "--online" => online = true,
            "--pack-url" => pack_url = Some(args.next().unwrap_or_else(|| usage_and_exit())),
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config {
        bind,
        spawn,
        online,
        pack_url,
    }
}

/// Host-side effects. This host has no world simulation, so it just logs them.
#[derive(Default)]
struct LogHost {
    stopping: AtomicBool,
}

impl HostRuntime for LogHost {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn apply_presence(&self, entity: HostEntityRef, flags: &PresenceFlags) {
        debug!(entity = %entity, flags = ?flags, "presence applied");
    }

    fn grant_permissions(&self, entity: HostEntityRef, group: Option<&str>, perms: &[String]) {
        info!(entity = %entity, group = group.unwrap_or("-"), perms = perms.len(), "permissions granted");
    }

    fn run_console_command(&self, cmd: &str) {
        info!(cmd = %cmd, "console");
    }

    fn run_command_as(&self, entity: HostEntityRef, cmd: &str) {
        info!(entity = %entity, cmd = %cmd, "command");
    }

    fn start_chatter(&self, id: IdentityId, entity: HostEntityRef) {
        debug!(identity = %id, entity = %entity, "chatter requested");
    }
}

struct HostState {
    cfg: Config,
    adapter: HostAuthAdapter,
    next_entity: AtomicU32,
}

/// Id for players the host admits on its own.
fn offline_uuid(name: &str) -> u128 {
    Uuid::new_v3(&Uuid::NAMESPACE_OID, format!("OfflinePlayer:{name}").as_bytes()).as_u128()
}

async fn read_packet(fr: &mut FrameReader<OwnedReadHalf>) -> anyhow::Result<Option<Serverbound>> {
    let Some(frame) = fr.read_frame().await.context("read frame")? else {
        return Ok(None);
    };
    Ok(Some(serverbound::parse(frame).context("bad packet from client")?))
}

async fn expect_packet(fr: &mut FrameReader<OwnedReadHalf>) -> anyhow::Result<Serverbound> {
    match read_packet(fr).await? {
        Some(p) => Ok(p),
        None => bail!("client closed during login"),
    }
}

async fn refuse(fw: &mut FrameWriter<OwnedWriteHalf>, reason: &str) -> anyhow::Result<()> {
    let pkt = Clientbound::LoginDisconnect {
        reason: Bytes::copy_from_slice(reason.as_bytes()),
    };
    fw.send(&pkt.encode()).await.context("send login disconnect")
}

/// Handshake through join. Returns the player's id and entity, or `None` if
/// the login was refused.
async fn login(
    st: &HostState,
    fr: &mut FrameReader<OwnedReadHalf>,
    fw: &mut FrameWriter<OwnedWriteHalf>,
) -> anyhow::Result<Option<(String, IdentityId, HostEntityRef)>> {
    let Serverbound::Handshake {
        protocol_version,
        next_state,
        ..
    } = expect_packet(fr).await?
    else {
        bail!("expected handshake");
    };
    if next_state != folkproto::NEXT_STATE_LOGIN {
        bail!("unsupported next state {next_state}");
    }
    if protocol_version != folkproto::PROTOCOL_VERSION {
        refuse(fw, "unsupported protocol version").await?;
        return Ok(None);
    }

    let Serverbound::Hello { name, profile_id } = expect_packet(fr).await? else {
        bail!("expected hello");
    };
    let name_s = String::from_utf8_lossy(&name).into_owned();
    if !folkproto::is_valid_name(&name_s) {
        refuse(fw, "invalid name").await?;
        return Ok(None);
    }

    let uuid = match st.adapter.decide(profile_id) {
        AuthDecision::Synthetic(id) => id.as_u128(),
        AuthDecision::HostDefault if st.cfg.online => {
            refuse(fw, "not authenticated").await?;
            return Ok(None);
        }
        AuthDecision::HostDefault => offline_uuid(&name_s),
    };
    fw.send(&Clientbound::LoginSuccess { uuid, name }.encode())
        .await
        .context("send login success")?;
    match expect_packet(fr).await? {
        Serverbound::LoginAck => {}
        other => bail!("expected login ack, got {other:?}"),
    }

    if let Some(url) = &st.cfg.pack_url {
        let pack_id = uuid;
        let push = Clientbound::PackPush {
            pack_id,
            url: Bytes::copy_from_slice(url.as_bytes()),
            required: false,
        };
        fw.send(&push.encode()).await.context("send pack push")?;
        loop {
            match expect_packet(fr).await? {
                Serverbound::PackStatus { status, .. } if status.is_final() => {
                    debug!(player = %name_s, status = ?status, "pack negotiation done");
                    break;
                }
                Serverbound::PackStatus { .. } | Serverbound::KeepAlive { .. } => {}
                other => bail!("unexpected packet during pack negotiation: {other:?}"),
            }
        }
    }

    let entity_id = st.next_entity.fetch_add(1, Ordering::Relaxed);
    fw.send(&Clientbound::JoinGame { entity_id }.encode())
        .await
        .context("send join game")?;
    Ok(Some((
        name_s,
        IdentityId::from_u128(uuid),
        HostEntityRef(u64::from(entity_id)),
    )))
}

async fn handle_conn(stream: TcpStream, peer: SocketAddr, st: Arc<HostState>) -> anyhow::Result<()> {
    let _ = stream.set_nodelay(true);
    let (rd, wr) = stream.into_split();
    let mut fr = FrameReader::new(rd);
    let mut fw = FrameWriter::new(wr);

    let joined = tokio::time::timeout(LOGIN_TIMEOUT, login(&st, &mut fr, &mut fw))
        .await
        .context("login timed out")??;
    let Some((name, id, entity)) = joined else {
        return Ok(());
    };

    if let Some(loc) = st.adapter.spawn_location_for(id).await {
        debug!(player = %name, world = %loc.world, x = loc.x, y = loc.y, z = loc.z, "spawn point overridden");
    }
    let synthetic = st.adapter.on_world_join_observed(id, entity).await;
    info!(peer = %peer, player = %name, entity = %entity, synthetic, "player joined");
    if !synthetic {
        let hidden = st.adapter.on_real_player_join(id).await;
        if !hidden.is_empty() {
            debug!(player = %name, hidden = hidden.len(), "identities hidden from player");
        }
    }

    let res = play(&mut fr, &mut fw).await;

    if synthetic {
        st.adapter.on_world_quit_observed(id).await;
    }
    info!(player = %name, entity = %entity, "player left");
    res
}

/// Keep the connection alive until the client quits or goes away.
async fn play(
    fr: &mut FrameReader<OwnedReadHalf>,
    fw: &mut FrameWriter<OwnedWriteHalf>,
) -> anyhow::Result<()> {
    let mut ka = tokio::time::interval(KEEPALIVE_EVERY);
    ka.tick().await;
    let mut ka_id = 0u64;
    loop {
        tokio::select! {
            _ = ka.tick() => {
                ka_id += 1;
                fw.send(&Clientbound::KeepAlive { id: ka_id }.encode())
                    .await
                    .context("send keep-alive")?;
            }
            pkt = read_packet(fr) => match pkt? {
                None => return Ok(()),
                Some(Serverbound::Quit { reason }) => {
                    debug!(reason = %String::from_utf8_lossy(&reason), "client quit");
                    return Ok(());
                }
                Some(Serverbound::KeepAlive { .. }) => {}
                Some(other) => debug!(pkt = ?other, "ignoring packet"),
            }
        }
    }
}

async fn log_events(mut rx: broadcast::Receiver<EngineEvent>) {
    loop {
        match rx.recv().await {
            Ok(EngineEvent::JoinTimedOut { name, .. }) => {
                warn!(identity = %name, "identity never joined");
            }
            Ok(ev) => debug!(event = ?ev, "identity event"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(dropped = %n, "identity event subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,folk_host=info,fakefolk=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();
    let listener = TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("bind {}", cfg.bind))?;

    let mut ecfg = EngineConfig::load().context("load identity config")?;
    // Identities log in to this host.
    ecfg.join_host = if cfg.bind.ip().is_unspecified() {
        "127.0.0.1".to_string()
    } else {
        cfg.bind.ip().to_string()
    };
    ecfg.join_port = cfg.bind.port();

    let runtime = Arc::new(LogHost::default());
    let engine = EngineHandle::spawn(ecfg.clone(), runtime.clone(), Arc::new(TcpDialer))
        .context("start identity engine")?;
    tokio::spawn(log_events(engine.subscribe()));

    let st = Arc::new(HostState {
        cfg: cfg.clone(),
        adapter: HostAuthAdapter::new(engine.clone()),
        next_entity: AtomicU32::new(1),
    });

    info!(
        bind = %cfg.bind,
        online = cfg.online,
        pack_url = %cfg.pack_url.as_deref().unwrap_or("-"),
        max_identities = ecfg.max_identities,
        "folk_host listening"
    );

    let _auto_join = fakefolk::autojoin::start(engine.clone(), &ecfg.auto_join);
    if cfg.spawn > 0 {
        let out = engine.create_batch(cfg.spawn).await?;
        info!(created = out.created.len(), "spawned identities");
        if let Some(e) = out.stopped {
            warn!(err = %e, "spawn stopped early");
        }
    }

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, peer) = res?;
                let st = st.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_conn(stream, peer, st).await {
                        warn!(peer = %peer, err = %format!("{e:#}"), "connection ended with error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    runtime.stopping.store(true, Ordering::SeqCst);
    let removed = engine.shutdown(true).await?;
    info!(removed, "identities removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_ids_differ_from_synthetic_ids() {
        assert_eq!(offline_uuid("Kes"), offline_uuid("Kes"));
        assert_ne!(offline_uuid("Kes"), IdentityId::derive("Kes").as_u128());
    }
}
