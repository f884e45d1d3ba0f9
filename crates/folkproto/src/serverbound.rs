use bytes::{BufMut, Bytes, BytesMut};

use crate::ProtoError;
use crate::wire::{Cursor, put_string};

pub const HANDSHAKE: u8 = 0x00;
pub const HELLO: u8 = 0x01;
pub const LOGIN_ACK: u8 = 0x02;
pub const PACK_STATUS: u8 = 0x03;
pub const KEEP_ALIVE: u8 = 0x04;
pub const QUIT: u8 = 0x05;

/// Client's answer to a content-pack offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackStatus {
    SuccessfullyLoaded,
    Declined,
    FailedDownload,
    Accepted,
    Downloaded,
    InvalidUrl,
}

impl PackStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            PackStatus::SuccessfullyLoaded => 0,
            PackStatus::Declined => 1,
            PackStatus::FailedDownload => 2,
            PackStatus::Accepted => 3,
            PackStatus::Downloaded => 4,
            PackStatus::InvalidUrl => 5,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => PackStatus::SuccessfullyLoaded,
            1 => PackStatus::Declined,
            2 => PackStatus::FailedDownload,
            3 => PackStatus::Accepted,
            4 => PackStatus::Downloaded,
            5 => PackStatus::InvalidUrl,
            _ => return None,
        })
    }

    /// Whether the host can stop waiting on this pack.
    pub fn is_final(self) -> bool {
        !matches!(self, PackStatus::Accepted | PackStatus::Downloaded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Serverbound {
    /// Opens the connection and selects the next protocol state.
    ///
    /// Encoding:
    /// - type: `HANDSHAKE` (1 byte)
    /// - protocol version: VarInt
    /// - server host: string
    /// - server port: u16 big-endian
    /// - next state: 1 byte (`NEXT_STATE_LOGIN`)
    Handshake {
        protocol_version: u32,
        server_host: Bytes,
        server_port: u16,
        next_state: u8,
    },
    /// Starts the login.
    ///
    /// Encoding:
    /// - type: `HELLO` (1 byte)
    /// - name: string
    /// - has profile id: 1 byte (0 or 1)
    /// - profile id: 16 bytes (u128 big-endian), only if present
    ///
    /// The profile id is the credential-bound identifier a client may present.
    /// The host's authentication step is the only consumer of it.
    Hello {
        name: Bytes,
        profile_id: Option<u128>,
    },
    LoginAck,
    PackStatus {
        pack_id: u128,
        status: PackStatus,
    },
    KeepAlive {
        id: u64,
    },
    Quit {
        reason: Bytes,
    },
}

impl Serverbound {
    pub fn encode(&self) -> BytesMut {
        let mut b = BytesMut::with_capacity(64);
        match self {
            Serverbound::Handshake {
                protocol_version,
                server_host,
                server_port,
                next_state,
            } => {
                b.put_u8(HANDSHAKE);
                folkio::varint::put(&mut b, *protocol_version);
                put_string(&mut b, server_host);
                b.put_u16(*server_port);
                b.put_u8(*next_state);
            }
            Serverbound::Hello { name, profile_id } => {
                b.put_u8(HELLO);
                put_string(&mut b, name);
                match profile_id {
                    Some(id) => {
                        b.put_u8(1);
                        b.put_u128(*id);
                    }
                    None => b.put_u8(0),
                }
            }
            Serverbound::LoginAck => b.put_u8(LOGIN_ACK),
            Serverbound::PackStatus { pack_id, status } => {
                b.put_u8(PACK_STATUS);
                b.put_u128(*pack_id);
                b.put_u8(status.as_u8());
            }
            Serverbound::KeepAlive { id } => {
                b.put_u8(KEEP_ALIVE);
                b.put_u64(*id);
            }
            Serverbound::Quit { reason } => {
                b.put_u8(QUIT);
                put_string(&mut b, reason);
            }
        }
        b
    }
}

pub fn parse(p: Bytes) -> Result<Serverbound, ProtoError> {
    if p.is_empty() {
        return Err(ProtoError::TooShort { need: 1, got: 0 });
    }

    let t = p[0];
    let mut c = Cursor::new(p, 1);
    let pkt = match t {
        HANDSHAKE => Serverbound::Handshake {
            protocol_version: c.varint()?,
            server_host: c.string()?,
            server_port: c.u16()?,
            next_state: c.u8()?,
        },
        HELLO => {
            let name = c.string()?;
            let profile_id = match c.u8()? {
                0 => None,
                1 => Some(c.u128()?),
                _ => return Err(ProtoError::Malformed("hello profile flag must be 0 or 1")),
            };
            Serverbound::Hello { name, profile_id }
        }
        LOGIN_ACK => Serverbound::LoginAck,
        PACK_STATUS => {
            let pack_id = c.u128()?;
            let status = PackStatus::from_u8(c.u8()?)
                .ok_or(ProtoError::Malformed("unknown pack status"))?;
            Serverbound::PackStatus { pack_id, status }
        }
        KEEP_ALIVE => Serverbound::KeepAlive { id: c.u64()? },
        QUIT => Serverbound::Quit {
            reason: c.string()?,
        },
        _ => return Err(ProtoError::UnknownType(t)),
    };
    c.finish("trailing bytes after serverbound packet")?;
    Ok(pkt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_carries_profile_id_after_name() {
        let pkt = Serverbound::Hello {
            name: Bytes::from_static(b"Alex"),
            profile_id: Some(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10),
        };
        let wire = pkt.encode().freeze();
        assert_eq!(&wire[..6], &[HELLO, 4, b'A', b'l', b'e', b'x']);
        assert_eq!(wire[6], 1);
        assert_eq!(wire[7], 0x01);
        assert_eq!(wire[22], 0x10);
        assert_eq!(parse(wire).unwrap(), pkt);
    }

    #[test]
    fn hello_without_profile_id() {
        let wire = Bytes::from_static(&[HELLO, 1, b'x', 0]);
        assert_eq!(
            parse(wire).unwrap(),
            Serverbound::Hello {
                name: Bytes::from_static(b"x"),
                profile_id: None,
            }
        );
    }

    #[test]
    fn handshake_layout() {
        let wire = Serverbound::Handshake {
            protocol_version: crate::PROTOCOL_VERSION,
            server_host: Bytes::from_static(b"h"),
            server_port: 25565,
            next_state: crate::NEXT_STATE_LOGIN,
        }
        .encode();
        assert_eq!(&wire[..], &[HANDSHAKE, 1, 1, b'h', 0x63, 0xdd, 2]);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            parse(Bytes::new()),
            Err(ProtoError::TooShort { need: 1, got: 0 })
        );
        assert_eq!(
            parse(Bytes::from_static(&[0x7e])),
            Err(ProtoError::UnknownType(0x7e))
        );
        assert_eq!(
            parse(Bytes::from_static(&[HELLO, 3, b'a'])),
            Err(ProtoError::TooShort { need: 5, got: 3 })
        );
        assert!(matches!(
            parse(Bytes::from_static(&[HELLO, 1, b'a', 2])),
            Err(ProtoError::Malformed(_))
        ));
        assert!(matches!(
            parse(Bytes::from_static(&[LOGIN_ACK, 0])),
            Err(ProtoError::Malformed(_))
        ));
        assert!(matches!(
            parse(Bytes::from_static(&[PACK_STATUS, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 9])),
            Err(ProtoError::Malformed(_))
        ));
    }

    #[test]
    fn pack_status_finality() {
        assert!(!PackStatus::Accepted.is_final());
        assert!(!PackStatus::Downloaded.is_final());
        assert!(PackStatus::SuccessfullyLoaded.is_final());
        assert!(PackStatus::InvalidUrl.is_final());
        for v in 0..=5 {
            assert_eq!(PackStatus::from_u8(v).unwrap().as_u8(), v);
        }
        assert_eq!(PackStatus::from_u8(6), None);
    }
}
