use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use folkio::frame::{FrameReader, FrameWriter};
use folkproto::clientbound::Clientbound;
use folkproto::serverbound::{PackStatus, Serverbound};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::ident::{CorrelationKey, IdentityId};

/// Everything needed to open one identity's session.
#[derive(Debug, Clone)]
pub struct DialRequest {
    pub id: IdentityId,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub key: CorrelationKey,
    pub connect_timeout: Duration,
}

/// What a session reports back. All of these are advisory: the engine decides
/// what (if anything) they change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    LoggedIn { host_uuid: u128 },
    PackAnswered { pack_id: u128, status: PackStatus },
    Joined { entity_id: u32 },
    Disconnected { cause: Option<String> },
    /// The dial never produced a session.
    Failed { err: String },
}

/// A session event tagged with the identity and key it was dialed for; ids are
/// name-derived and can come back after a removal, keys never do.
#[derive(Debug, Clone)]
pub struct SessionNotice {
    pub id: IdentityId,
    pub key: CorrelationKey,
    pub event: SessionEvent,
}

/// Control side of a running session. Dropping it leaves the session running.
#[derive(Debug)]
pub struct SessionHandle {
    disconnect_tx: watch::Sender<Option<String>>,
}

impl SessionHandle {
    pub fn new() -> (Self, watch::Receiver<Option<String>>) {
        let (disconnect_tx, rx) = watch::channel(None);
        (Self { disconnect_tx }, rx)
    }

    /// Ask the session to say goodbye and close.
    pub fn disconnect(&self, reason: &str) {
        let _ = self.disconnect_tx.send(Some(reason.to_string()));
    }
}

/// Opens sessions. The engine talks to this instead of the network directly.
pub trait Dialer: Send + Sync + 'static {
    fn dial(&self, req: DialRequest, events: mpsc::Sender<SessionNotice>) -> SessionHandle;
}

/// Dials the host over TCP and drives the login sequence.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(&self, req: DialRequest, events: mpsc::Sender<SessionNotice>) -> SessionHandle {
        let (handle, disconnect_rx) = SessionHandle::new();
        tokio::spawn(run_session(req, events, disconnect_rx));
        handle
    }
}

async fn run_session(
    req: DialRequest,
    events: mpsc::Sender<SessionNotice>,
    mut disconnect_rx: watch::Receiver<Option<String>>,
) {
    let addr = format!("{}:{}", req.host, req.port);
    let dial = tokio::time::timeout(req.connect_timeout, TcpStream::connect(&addr));
    let stream = tokio::select! {
        res = dial => match res {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                let err = format!("connect {addr}: {e}");
                emit(&events, &req, SessionEvent::Failed { err }).await;
                return;
            }
            Err(_) => {
                let err = format!("connect {addr}: timed out");
                emit(&events, &req, SessionEvent::Failed { err }).await;
                return;
            }
        },
        _ = wait_disconnect(&mut disconnect_rx) => {
            emit(&events, &req, SessionEvent::Disconnected { cause: None }).await;
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    emit(&events, &req, SessionEvent::Connected).await;

    let cause = match drive_login(&req, stream, &mut disconnect_rx, &events).await {
        Ok(cause) => cause,
        Err(e) => Some(format!("{e:#}")),
    };
    if let Some(c) = &cause {
        warn!(identity = %req.name, cause = %c, "session disconnected with an error");
    }
    emit(&events, &req, SessionEvent::Disconnected { cause }).await;
}

/// Runs until the session ends. `Ok(None)` is a clean end (we asked to leave or
/// the host closed without a reason).
async fn drive_login(
    req: &DialRequest,
    stream: TcpStream,
    disconnect_rx: &mut watch::Receiver<Option<String>>,
    events: &mpsc::Sender<SessionNotice>,
) -> anyhow::Result<Option<String>> {
    let (rd, wr) = stream.into_split();
    let mut fr = FrameReader::new(rd);
    let mut fw = FrameWriter::new(wr);

    for pkt in opening_packets(req) {
        fw.write_frame(&pkt.encode()).await.context("send login")?;
    }
    fw.flush().await.context("send login")?;

    loop {
        tokio::select! {
            reason = wait_disconnect(disconnect_rx) => {
                let quit = Serverbound::Quit { reason: Bytes::from(reason) };
                let _ = fw.send(&quit.encode()).await;
                return Ok(None);
            }
            res = fr.read_frame() => {
                let Some(frame) = res.context("read")? else {
                    return Ok(None);
                };
                let pkt = folkproto::clientbound::parse(frame).context("bad packet from host")?;
                match pkt {
                    Clientbound::LoginSuccess { uuid, .. } => {
                        fw.send(&Serverbound::LoginAck.encode()).await.context("send login ack")?;
                        emit(events, req, SessionEvent::LoggedIn { host_uuid: uuid }).await;
                    }
                    Clientbound::PackPush { pack_id, url, .. } => {
                        let url = String::from_utf8_lossy(&url);
                        let replies = pack_replies(pack_id, &url);
                        for r in &replies {
                            fw.write_frame(&r.encode()).await.context("send pack status")?;
                        }
                        fw.flush().await.context("send pack status")?;
                        if let Some(Serverbound::PackStatus { status, .. }) = replies.last() {
                            debug!(identity = %req.name, url = %url, status = ?status, "answered content pack");
                            emit(events, req, SessionEvent::PackAnswered { pack_id, status: *status }).await;
                        }
                    }
                    Clientbound::KeepAlive { id } => {
                        fw.send(&Serverbound::KeepAlive { id }.encode()).await.context("send keep-alive")?;
                    }
                    Clientbound::JoinGame { entity_id } => {
                        emit(events, req, SessionEvent::Joined { entity_id }).await;
                    }
                    Clientbound::LoginDisconnect { reason } | Clientbound::Kick { reason } => {
                        return Ok(Some(String::from_utf8_lossy(&reason).into_owned()));
                    }
                }
            }
        }
    }
}

/// Resolves with the reason once a disconnect is requested. Never resolves if
/// the handle is dropped without one.
async fn wait_disconnect(rx: &mut watch::Receiver<Option<String>>) -> String {
    loop {
        if let Some(reason) = rx.borrow_and_update().clone() {
            return reason;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn emit(events: &mpsc::Sender<SessionNotice>, req: &DialRequest, event: SessionEvent) {
    let _ = events
        .send(SessionNotice {
            id: req.id,
            key: req.key,
            event,
        })
        .await;
}

/// Handshake and hello. The correlation key rides in the hello's profile-id
/// field, where the host's authentication step looks for a presented identity.
pub fn opening_packets(req: &DialRequest) -> [Serverbound; 2] {
    [
        Serverbound::Handshake {
            protocol_version: folkproto::PROTOCOL_VERSION,
            server_host: Bytes::from(req.host.clone()),
            server_port: req.port,
            next_state: folkproto::NEXT_STATE_LOGIN,
        },
        Serverbound::Hello {
            name: Bytes::from(req.name.clone()),
            profile_id: Some(req.key.0),
        },
    ]
}

/// Answer a content-pack offer without fetching anything.
pub fn pack_replies(pack_id: u128, url: &str) -> Vec<Serverbound> {
    let statuses: &[PackStatus] = if is_allowed_pack_url(url) {
        &[
            PackStatus::Accepted,
            PackStatus::Downloaded,
            PackStatus::SuccessfullyLoaded,
        ]
    } else {
        &[PackStatus::InvalidUrl]
    };
    statuses
        .iter()
        .map(|&status| Serverbound::PackStatus { pack_id, status })
        .collect()
}

/// `http`/`https` (any case) absolute URL with a non-empty authority.
pub fn is_allowed_pack_url(url: &str) -> bool {
    let Some((scheme, rest)) = url.trim().split_once("://") else {
        return false;
    };
    if !(scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")) {
        return false;
    }
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    !authority.is_empty() && !authority.contains(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn pack_url_schemes() {
        assert!(is_allowed_pack_url("http://example.com/pack.zip"));
        assert!(is_allowed_pack_url("HTTPS://example.com"));
        assert!(is_allowed_pack_url("https://10.0.0.1:8080/p?x=1"));
        assert!(!is_allowed_pack_url("ftp://example.com/pack.zip"));
        assert!(!is_allowed_pack_url("file:///etc/passwd"));
        // A host is required: lenient URL parsers accept an empty authority
        // (`https:///x`) or no `//` at all (`http:foo`); both are refused here.
        assert!(!is_allowed_pack_url("https:///nohost"));
        assert!(!is_allowed_pack_url("http:foo"));
        assert!(!is_allowed_pack_url("example.com/pack.zip"));
        assert!(!is_allowed_pack_url(""));
    }

    #[test]
    fn pack_replies_fixed_sequences() {
        let statuses = |v: Vec<Serverbound>| {
            v.into_iter()
                .map(|p| match p {
                    Serverbound::PackStatus { pack_id, status } => {
                        assert_eq!(pack_id, 42);
                        status
                    }
                    other => panic!("unexpected {other:?}"),
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(
            statuses(pack_replies(42, "https://cdn/p.zip")),
            vec![
                PackStatus::Accepted,
                PackStatus::Downloaded,
                PackStatus::SuccessfullyLoaded
            ]
        );
        assert_eq!(
            statuses(pack_replies(42, "ftp://cdn/p.zip")),
            vec![PackStatus::InvalidUrl]
        );
    }

    #[test]
    fn hello_carries_the_correlation_key() {
        let req = DialRequest {
            id: IdentityId::derive("bot"),
            host: "127.0.0.1".into(),
            port: 25565,
            name: "bot".into(),
            key: CorrelationKey(0xabc),
            connect_timeout: Duration::from_secs(1),
        };
        let [hs, hello] = opening_packets(&req);
        assert!(matches!(hs, Serverbound::Handshake { next_state: 2, server_port: 25565, .. }));
        assert_eq!(
            hello,
            Serverbound::Hello {
                name: Bytes::from_static(b"bot"),
                profile_id: Some(0xabc),
            }
        );
    }

    async fn next_event(rx: &mut mpsc::Receiver<SessionNotice>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
            .event
    }

    #[tokio::test]
    async fn drives_login_and_pack_negotiation() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let host = tokio::spawn(async move {
            let (s, _) = listener.accept().await.unwrap();
            let (rd, wr) = s.into_split();
            let mut fr = FrameReader::new(rd);
            let mut fw = FrameWriter::new(wr);

            let hs = folkproto::serverbound::parse(fr.read_frame().await.unwrap().unwrap()).unwrap();
            assert!(matches!(hs, Serverbound::Handshake { .. }));
            let hello = folkproto::serverbound::parse(fr.read_frame().await.unwrap().unwrap()).unwrap();
            let Serverbound::Hello { profile_id, .. } = hello else {
                panic!("expected hello");
            };
            assert_eq!(profile_id, Some(77));

            fw.send(&Clientbound::LoginSuccess { uuid: 5, name: Bytes::from_static(b"bot") }.encode())
                .await
                .unwrap();
            let ack = folkproto::serverbound::parse(fr.read_frame().await.unwrap().unwrap()).unwrap();
            assert_eq!(ack, Serverbound::LoginAck);

            fw.send(
                &Clientbound::PackPush {
                    pack_id: 1,
                    url: Bytes::from_static(b"https://cdn/p.zip"),
                    required: true,
                }
                .encode(),
            )
            .await
            .unwrap();
            let mut got = Vec::new();
            for _ in 0..3 {
                got.push(folkproto::serverbound::parse(fr.read_frame().await.unwrap().unwrap()).unwrap());
            }
            assert_eq!(
                got.last(),
                Some(&Serverbound::PackStatus { pack_id: 1, status: PackStatus::SuccessfullyLoaded })
            );

            fw.send(&Clientbound::KeepAlive { id: 9 }.encode()).await.unwrap();
            let ka = folkproto::serverbound::parse(fr.read_frame().await.unwrap().unwrap()).unwrap();
            assert_eq!(ka, Serverbound::KeepAlive { id: 9 });

            fw.send(&Clientbound::JoinGame { entity_id: 12 }.encode()).await.unwrap();

            // Wait for the client's goodbye.
            let quit = folkproto::serverbound::parse(fr.read_frame().await.unwrap().unwrap()).unwrap();
            assert_eq!(quit, Serverbound::Quit { reason: Bytes::from_static(b"Removed") });
        });

        let (tx, mut rx) = mpsc::channel(16);
        let handle = TcpDialer.dial(
            DialRequest {
                id: IdentityId::derive("bot"),
                host: "127.0.0.1".into(),
                port,
                name: "bot".into(),
                key: CorrelationKey(77),
                connect_timeout: Duration::from_secs(5),
            },
            tx,
        );

        assert_eq!(next_event(&mut rx).await, SessionEvent::Connected);
        assert_eq!(next_event(&mut rx).await, SessionEvent::LoggedIn { host_uuid: 5 });
        assert_eq!(
            next_event(&mut rx).await,
            SessionEvent::PackAnswered { pack_id: 1, status: PackStatus::SuccessfullyLoaded }
        );
        assert_eq!(next_event(&mut rx).await, SessionEvent::Joined { entity_id: 12 });

        handle.disconnect("Removed");
        assert_eq!(next_event(&mut rx).await, SessionEvent::Disconnected { cause: None });
        host.await.unwrap();
    }

    #[tokio::test]
    async fn kick_reason_becomes_disconnect_cause() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (s, _) = listener.accept().await.unwrap();
            let (rd, wr) = s.into_split();
            let mut fr = FrameReader::new(rd);
            let mut fw = FrameWriter::new(wr);
            let _ = fr.read_frame().await;
            let _ = fr.read_frame().await;
            fw.send(&Clientbound::LoginDisconnect { reason: Bytes::from_static(b"not whitelisted") }.encode())
                .await
                .unwrap();
        });

        let (tx, mut rx) = mpsc::channel(16);
        let _handle = TcpDialer.dial(
            DialRequest {
                id: IdentityId::derive("bot"),
                host: "127.0.0.1".into(),
                port,
                name: "bot".into(),
                key: CorrelationKey(1),
                connect_timeout: Duration::from_secs(5),
            },
            tx,
        );
        assert_eq!(next_event(&mut rx).await, SessionEvent::Connected);
        assert_eq!(
            next_event(&mut rx).await,
            SessionEvent::Disconnected { cause: Some("not whitelisted".into()) }
        );
    }

    #[tokio::test]
    async fn refused_dial_is_a_failure() {
        // Grab a free port, then close it so the dial is refused.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let (tx, mut rx) = mpsc::channel(4);
        let _handle = TcpDialer.dial(
            DialRequest {
                id: IdentityId::derive("bot"),
                host: "127.0.0.1".into(),
                port,
                name: "bot".into(),
                key: CorrelationKey(1),
                connect_timeout: Duration::from_secs(5),
            },
            tx,
        );
        assert!(matches!(next_event(&mut rx).await, SessionEvent::Failed { .. }));
    }
}
