//! The lifecycle engine.
//!
//! One task owns the registry and every per-identity timer and session handle.
//! Everything else (callers, the host adapter, sessions, timers) talks to it
//! through channels, so registry mutation never interleaves.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::correlation::CorrelationStore;
use crate::error::{ConfigError, CorrelationError, EngineError};
use crate::events::{EngineEvent, RemovalReason};
use crate::host::HostRuntime;
use crate::ident::{CorrelationKey, HostEntityRef, IdentityId};
use crate::naming::NamingPool;
use crate::onboarding;
use crate::registry::{IdentityRegistry, LifecycleState};
use crate::session::{DialRequest, Dialer, SessionEvent, SessionHandle, SessionNotice};
use crate::timer::{self, CancelToken};

const COMMAND_QUEUE: usize = 1024;
const SESSION_QUEUE: usize = 4096;
const EVENT_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub raw: usize,
    pub active: usize,
}

/// One raw-tier entry as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySummary {
    pub name: String,
    pub id: IdentityId,
    pub state: LifecycleState,
    pub host_ref: Option<HostEntityRef>,
}

/// Result of `create_batch`: what got created, and what stopped it early.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub created: Vec<IdentityId>,
    pub stopped: Option<EngineError>,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Create {
        name: Option<String>,
        reply: Reply<Result<IdentityId, EngineError>>,
    },
    CreateBatch {
        n: usize,
        reply: Reply<BatchOutcome>,
    },
    RemoveName {
        name: String,
        reply: Reply<bool>,
    },
    RemoveId {
        id: IdentityId,
        reason: RemovalReason,
        reply: Reply<bool>,
    },
    RemoveNumber {
        n: usize,
        reply: Reply<usize>,
    },
    RemoveAll {
        reply: Reply<usize>,
    },
    Promote {
        id: IdentityId,
        host_ref: HostEntityRef,
        reply: Reply<bool>,
    },
    // Timer commands carry the creation seq so a timer armed for an earlier
    // identity with the same name can't touch a newer one.
    PromotionDeadline {
        id: IdentityId,
        seq: u64,
    },
    AutoQuit {
        id: IdentityId,
        seq: u64,
    },
    List {
        reply: Reply<Vec<IdentitySummary>>,
    },
    ActiveNames {
        reply: Reply<Vec<String>>,
    },
    RawNames {
        reply: Reply<Vec<String>>,
    },
    ActiveRefs {
        reply: Reply<Vec<HostEntityRef>>,
    },
    Counts {
        reply: Reply<Counts>,
    },
    IsIdentity {
        id: IdentityId,
        reply: Reply<bool>,
    },
    Shutdown {
        host_stopping: bool,
        reply: Reply<usize>,
    },
}

/// A login the host accepted, tied to the key it presented.
#[derive(Debug, Clone, Copy)]
struct AuthNotice {
    id: IdentityId,
    key: CorrelationKey,
}

/// Cloneable front door to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    // Unbounded so the login path never blocks and never loses a notice.
    auth_tx: mpsc::UnboundedSender<AuthNotice>,
    events: broadcast::Sender<EngineEvent>,
    store: Arc<CorrelationStore>,
    cfg: Arc<EngineConfig>,
}

impl EngineHandle {
    /// Validate `cfg` and start the engine task. Must be called inside a tokio runtime.
    pub fn spawn(
        cfg: EngineConfig,
        host: Arc<dyn HostRuntime>,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let naming = cfg.naming_pool()?;

        let (tx, cmd_rx) = mpsc::channel::<Command>(COMMAND_QUEUE);
        let (session_tx, session_rx) = mpsc::channel::<SessionNotice>(SESSION_QUEUE);
        let (auth_tx, auth_rx) = mpsc::unbounded_channel::<AuthNotice>();
        let (events, _) = broadcast::channel::<EngineEvent>(EVENT_QUEUE);
        let store = Arc::new(CorrelationStore::new());

        info!(
            max_identities = cfg.max_identities,
            join = %format!("{}:{}", cfg.join_host, cfg.join_port),
            promotion_timeout_s = cfg.promotion_timeout_s,
            names = naming.len(),
            "identity engine starting"
        );

        let shared = Arc::new(cfg.clone());
        let engine = Engine {
            cfg,
            registry: IdentityRegistry::new(),
            store: store.clone(),
            naming,
            host,
            dialer,
            sessions: HashMap::new(),
            deadlines: HashMap::new(),
            auto_quits: HashMap::new(),
            cmd_tx: tx.downgrade(),
            session_tx,
            events: events.clone(),
            shutting_down: false,
            host_stopping: false,
        };
        tokio::spawn(engine.run(cmd_rx, session_rx, auth_rx));

        Ok(Self {
            tx,
            auth_tx,
            events,
            store,
            cfg: shared,
        })
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Create one identity. With no name, one is drawn from the pool.
    ///
    /// Returns once the identity is registered and its session is dialing.
    pub async fn create(&self, name: Option<&str>) -> Result<IdentityId, EngineError> {
        let name = name.map(str::to_string);
        self.request(|reply| Command::Create { name, reply }).await?
    }

    /// Create up to `n` pool-named identities, stopping at the first error.
    pub async fn create_batch(&self, n: usize) -> Result<BatchOutcome, EngineError> {
        self.request(|reply| Command::CreateBatch { n, reply }).await
    }

    pub async fn remove(&self, name: &str) -> Result<bool, EngineError> {
        let name = name.to_string();
        self.request(|reply| Command::RemoveName { name, reply }).await
    }

    pub async fn remove_id(&self, id: IdentityId) -> Result<bool, EngineError> {
        self.remove_with(id, RemovalReason::Requested).await
    }

    pub(crate) async fn remove_with(
        &self,
        id: IdentityId,
        reason: RemovalReason,
    ) -> Result<bool, EngineError> {
        self.request(|reply| Command::RemoveId { id, reason, reply })
            .await
    }

    /// Remove the `n` oldest identities. Returns how many were removed.
    pub async fn remove_number(&self, n: usize) -> Result<usize, EngineError> {
        self.request(|reply| Command::RemoveNumber { n, reply }).await
    }

    pub async fn remove_all(&self) -> Result<usize, EngineError> {
        self.request(|reply| Command::RemoveAll { reply }).await
    }

    /// Raw tier, oldest first.
    pub async fn list(&self) -> Result<Vec<IdentitySummary>, EngineError> {
        self.request(|reply| Command::List { reply }).await
    }

    pub async fn active_names(&self) -> Result<Vec<String>, EngineError> {
        self.request(|reply| Command::ActiveNames { reply }).await
    }

    /// Names of every identity in the raw tier, unordered.
    pub async fn raw_names(&self) -> Result<Vec<String>, EngineError> {
        self.request(|reply| Command::RawNames { reply }).await
    }

    /// Host handles of every active identity.
    pub async fn active_refs(&self) -> Result<Vec<HostEntityRef>, EngineError> {
        self.request(|reply| Command::ActiveRefs { reply }).await
    }

    pub async fn counts(&self) -> Result<Counts, EngineError> {
        self.request(|reply| Command::Counts { reply }).await
    }

    pub async fn is_identity(&self, id: IdentityId) -> Result<bool, EngineError> {
        self.request(|reply| Command::IsIdentity { id, reply }).await
    }

    /// Remove everything and stop the engine. With `host_stopping`, sessions
    /// are dropped without a goodbye. Returns how many identities were removed.
    pub async fn shutdown(&self, host_stopping: bool) -> Result<usize, EngineError> {
        self.request(|reply| Command::Shutdown {
            host_stopping,
            reply,
        })
        .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// The store shared with the host's login path.
    pub fn store(&self) -> Arc<CorrelationStore> {
        self.store.clone()
    }

    /// The validated configuration the engine was started with.
    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub(crate) async fn promote(
        &self,
        id: IdentityId,
        host_ref: HostEntityRef,
    ) -> Result<bool, EngineError> {
        self.request(|reply| Command::Promote {
            id,
            host_ref,
            reply,
        })
        .await
    }

    /// Non-blocking; called from the host's login path with the key that
    /// resolved to `id`.
    pub(crate) fn notify_authenticated(&self, id: IdentityId, key: CorrelationKey) {
        if self.auth_tx.send(AuthNotice { id, key }).is_err() {
            debug!(identity = %id, "engine stopped; authentication notice dropped");
        }
    }
}

struct Engine {
    cfg: EngineConfig,
    registry: IdentityRegistry,
    store: Arc<CorrelationStore>,
    naming: NamingPool,
    host: Arc<dyn HostRuntime>,
    dialer: Arc<dyn Dialer>,
    sessions: HashMap<IdentityId, SessionHandle>,
    deadlines: HashMap<IdentityId, CancelToken>,
    auto_quits: HashMap<IdentityId, CancelToken>,
    cmd_tx: mpsc::WeakSender<Command>,
    session_tx: mpsc::Sender<SessionNotice>,
    events: broadcast::Sender<EngineEvent>,
    shutting_down: bool,
    host_stopping: bool,
}

impl Engine {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut session_rx: mpsc::Receiver<SessionNotice>,
        mut auth_rx: mpsc::UnboundedReceiver<AuthNotice>,
    ) {
        loop {
            // Session and login notices first, so a caller never observes
            // state older than a notice queued before its request.
            tokio::select! {
                biased;
                Some(notice) = session_rx.recv() => self.on_session(notice),
                Some(auth) = auth_rx.recv() => self.on_authenticated(auth),
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        // Every handle is gone.
                        let stopping = self.host.is_stopping();
                        self.shutdown(stopping);
                        break;
                    };
                    if !self.handle(cmd) {
                        break;
                    }
                }
            }
        }
        info!("identity engine stopped");
    }

    /// Returns `false` once the engine should stop.
    fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Create { name, reply } => {
                let _ = reply.send(self.create(name));
            }
            Command::CreateBatch { n, reply } => {
                let mut out = BatchOutcome::default();
                for _ in 0..n {
                    match self.create(None) {
                        Ok(id) => out.created.push(id),
                        Err(e) => {
                            out.stopped = Some(e);
                            break;
                        }
                    }
                }
                let _ = reply.send(out);
            }
            Command::RemoveName { name, reply } => {
                let id = self.registry.by_name(&name).map(|r| r.id);
                let removed = id.is_some_and(|id| self.remove(id, RemovalReason::Requested));
                let _ = reply.send(removed);
            }
            Command::RemoveId { id, reason, reply } => {
                let _ = reply.send(self.remove(id, reason));
            }
            Command::RemoveNumber { n, reply } => {
                let _ = reply.send(self.remove_oldest(n, RemovalReason::Requested));
            }
            Command::RemoveAll { reply } => {
                let n = self.registry.raw_count();
                let _ = reply.send(self.remove_oldest(n, RemovalReason::Requested));
            }
            Command::Promote { id, host_ref, reply } => {
                let _ = reply.send(self.promote(id, host_ref));
            }
            Command::PromotionDeadline { id, seq } => self.promotion_deadline(id, seq),
            Command::AutoQuit { id, seq } => {
                let current = self
                    .registry
                    .active_by_id(id)
                    .is_some_and(|r| r.created_seq == seq);
                if current {
                    self.remove(id, RemovalReason::AutoQuit);
                }
            }
            Command::List { reply } => {
                let v = self
                    .registry
                    .list_ordered_by_creation()
                    .into_iter()
                    .map(|r| IdentitySummary {
                        name: r.name.clone(),
                        id: r.id,
                        state: r.state,
                        host_ref: r.host_ref,
                    })
                    .collect();
                let _ = reply.send(v);
            }
            Command::ActiveNames { reply } => {
                let _ = reply.send(self.registry.active_names());
            }
            Command::RawNames { reply } => {
                let _ = reply.send(self.registry.raw_names().map(str::to_string).collect());
            }
            Command::ActiveRefs { reply } => {
                let _ = reply.send(self.registry.active_refs());
            }
            Command::Counts { reply } => {
                let _ = reply.send(self.counts());
            }
            Command::IsIdentity { id, reply } => {
                let _ = reply.send(self.registry.by_id(id).is_some());
            }
            Command::Shutdown {
                host_stopping,
                reply,
            } => {
                let _ = reply.send(self.shutdown(host_stopping));
                return false;
            }
        }
        true
    }

    fn counts(&self) -> Counts {
        Counts {
            raw: self.registry.raw_count(),
            active: self.registry.active_count(),
        }
    }

    fn create(&mut self, name: Option<String>) -> Result<IdentityId, EngineError> {
        if self.shutting_down {
            return Err(EngineError::Closed);
        }
        if let Some(n) = &name {
            if !folkproto::is_valid_name(n) {
                return Err(EngineError::InvalidName(n.clone()));
            }
            if self.registry.contains_name(n) {
                return Err(EngineError::NameTaken(n.clone()));
            }
        }
        let max = self.cfg.max_identities;
        if self.registry.raw_count() >= max {
            return Err(EngineError::CapacityExceeded { max });
        }
        let name = match name {
            Some(n) => n,
            None => self.naming.next_unused_name(&self.registry)?,
        };

        let id = IdentityId::derive(&name);
        let key = self.mint_key(id)?;
        if !self.registry.insert_raw(&name, id, key) {
            self.store.expire(key);
            return Err(EngineError::NameTaken(name));
        }
        let seq = self.registry.by_id(id).map(|r| r.created_seq).unwrap_or_default();
        info!(identity = %name, id = %id, "identity created");
        self.emit(EngineEvent::Created {
            id,
            name: name.clone(),
        });

        self.registry.advance(id, LifecycleState::Connecting);
        let req = DialRequest {
            id,
            host: self.cfg.join_host.clone(),
            port: self.cfg.join_port,
            name,
            key,
            connect_timeout: self.cfg.connect_timeout(),
        };
        let session = self.dialer.dial(req, self.session_tx.clone());
        self.sessions.insert(id, session);

        let deadline = self.schedule(
            self.cfg.promotion_timeout(),
            Command::PromotionDeadline { id, seq },
        );
        self.deadlines.insert(id, deadline);
        Ok(id)
    }

    /// Mint keys until one is not already pending.
    fn mint_key(&self, id: IdentityId) -> Result<CorrelationKey, EngineError> {
        loop {
            let key = CorrelationKey::mint().map_err(|e| EngineError::KeyMint(e.to_string()))?;
            match self.store.put(key, id) {
                Ok(()) => return Ok(key),
                Err(CorrelationError::KeyCollision) => {
                    debug!(identity = %id, "correlation key collision; minting another");
                }
            }
        }
    }

    fn schedule(&self, after: Duration, cmd: Command) -> CancelToken {
        let tx = self.cmd_tx.clone();
        timer::delay(after, async move {
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(cmd).await;
            }
        })
    }

    fn promote(&mut self, id: IdentityId, host_ref: HostEntityRef) -> bool {
        if !self.registry.promote_to_active(id, host_ref) {
            return false;
        }
        if let Some(t) = self.deadlines.remove(&id) {
            t.cancel();
        }
        let Some(rec) = self.registry.by_id(id) else {
            return false;
        };
        let (name, seq) = (rec.name.clone(), rec.created_seq);

        onboarding::run(&*self.host, &self.cfg.onboarding, id, &name, host_ref);
        let auto_quit = &self.cfg.onboarding.auto_quit;
        if auto_quit.enabled {
            let after = auto_quit.delay.pick();
            debug!(identity = %name, after_s = after.as_secs(), "auto-quit armed");
            let t = self.schedule(after, Command::AutoQuit { id, seq });
            self.auto_quits.insert(id, t);
        }

        info!(identity = %name, entity = %host_ref, "identity active");
        self.emit(EngineEvent::Promoted { id, name, host_ref });
        true
    }

    fn promotion_deadline(&mut self, id: IdentityId, seq: u64) {
        let Some(rec) = self.registry.by_id(id) else {
            return;
        };
        if rec.created_seq != seq || rec.state == LifecycleState::Active {
            return;
        }
        let name = rec.name.clone();
        warn!(
            identity = %name,
            state = rec.state.as_str(),
            timeout_s = self.cfg.promotion_timeout_s,
            "identity did not join in time; removing"
        );
        self.emit(EngineEvent::JoinTimedOut {
            id,
            name,
        });
        self.remove(id, RemovalReason::JoinTimedOut);
    }

    /// Only the login carrying the live record's key counts; one from an
    /// earlier identity with the same name is ignored.
    fn on_authenticated(&mut self, auth: AuthNotice) {
        let Some(rec) = self.registry.by_id(auth.id) else {
            debug!(identity = %auth.id, "authentication for a removed identity");
            return;
        };
        if rec.key != auth.key {
            debug!(identity = %rec.name, "stale authentication");
            return;
        }
        let name = rec.name.clone();
        if self.registry.advance(auth.id, LifecycleState::AwaitingPromotion) {
            debug!(identity = %name, "authenticated; awaiting world join");
        }
    }

    fn on_session(&mut self, notice: SessionNotice) {
        let Some(rec) = self.registry.by_id(notice.id) else {
            debug!(identity = %notice.id, "session notice for a removed identity");
            return;
        };
        if rec.key != notice.key {
            debug!(identity = %rec.name, "stale session notice");
            return;
        }
        let name = rec.name.clone();
        let active = rec.state == LifecycleState::Active;
        match notice.event {
            SessionEvent::Connected => debug!(identity = %name, "session connected"),
            // The host's own authentication notice moves the state.
            SessionEvent::LoggedIn { .. } => debug!(identity = %name, "login accepted"),
            SessionEvent::PackAnswered { pack_id, status } => {
                debug!(identity = %name, pack_id, status = ?status, "content pack answered");
            }
            SessionEvent::Joined { entity_id } => {
                debug!(identity = %name, entity_id, "join game received");
            }
            // Advisory only; world quit or the promotion deadline does the removal.
            SessionEvent::Disconnected { cause } => match cause {
                Some(c) => info!(identity = %name, cause = %c, "session disconnected"),
                None => info!(identity = %name, "session disconnected"),
            },
            SessionEvent::Failed { err } => {
                if active {
                    debug!(identity = %name, err = %err, "late session failure ignored");
                } else {
                    warn!(identity = %name, err = %err, "session failed");
                    self.remove(notice.id, RemovalReason::SessionFailed(err));
                }
            }
        }
    }

    /// Idempotent: removing an unknown identity is a no-op.
    fn remove(&mut self, id: IdentityId, reason: RemovalReason) -> bool {
        let Some(rec) = self.registry.remove_everywhere(id) else {
            return false;
        };
        self.store.expire(rec.key);
        self.deadlines.remove(&id);
        self.auto_quits.remove(&id);
        if let Some(session) = self.sessions.remove(&id) {
            if self.host_stopping || self.host.is_stopping() {
                debug!(identity = %rec.name, "host stopping; not disconnecting session");
            } else {
                session.disconnect("Removed");
            }
        }
        let was_active = rec.state == LifecycleState::Active;
        info!(
            identity = %rec.name,
            reason = reason.as_str(),
            was_active,
            "identity removed"
        );
        self.emit(EngineEvent::Removed {
            id,
            name: rec.name,
            reason,
            was_active,
        });
        true
    }

    fn remove_oldest(&mut self, n: usize, reason: RemovalReason) -> usize {
        self.registry
            .oldest(n)
            .into_iter()
            .filter(|id| self.remove(*id, reason.clone()))
            .count()
    }

    fn shutdown(&mut self, host_stopping: bool) -> usize {
        self.shutting_down = true;
        self.host_stopping = host_stopping;
        let n = self.registry.raw_count();
        let removed = self.remove_oldest(n, RemovalReason::Shutdown);
        info!(removed, host_stopping, "identity engine shutting down");
        removed
    }

    fn emit(&self, ev: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(ev);
    }
}
