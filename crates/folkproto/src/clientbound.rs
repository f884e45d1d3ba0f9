use bytes::{BufMut, Bytes, BytesMut};

use crate::ProtoError;
use crate::wire::{Cursor, put_string};

pub const LOGIN_SUCCESS: u8 = 0x81;
pub const LOGIN_DISCONNECT: u8 = 0x82;
pub const PACK_PUSH: u8 = 0x83;
pub const JOIN_GAME: u8 = 0x84;
pub const KICK: u8 = 0x85;
pub const KEEP_ALIVE: u8 = 0x86;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clientbound {
    /// Login accepted; `uuid` is the identifier the host assigned.
    LoginSuccess { uuid: u128, name: Bytes },
    /// Login refused before the client reached the world.
    LoginDisconnect { reason: Bytes },
    /// Offer of an auxiliary content bundle.
    ///
    /// Encoding:
    /// - type: `PACK_PUSH` (1 byte)
    /// - pack id: 16 bytes (u128 big-endian)
    /// - url: string
    /// - required: 1 byte (0 or 1)
    PackPush {
        pack_id: u128,
        url: Bytes,
        required: bool,
    },
    JoinGame { entity_id: u32 },
    Kick { reason: Bytes },
    KeepAlive { id: u64 },
}

impl Clientbound {
    pub fn encode(&self) -> BytesMut {
        let mut b = BytesMut::with_capacity(64);
        match self {
            Clientbound::LoginSuccess { uuid, name } => {
                b.put_u8(LOGIN_SUCCESS);
                b.put_u128(*uuid);
                put_string(&mut b, name);
            }
            Clientbound::LoginDisconnect { reason } => {
                b.put_u8(LOGIN_DISCONNECT);
                put_string(&mut b, reason);
            }
            Clientbound::PackPush {
                pack_id,
                url,
                required,
            } => {
                b.put_u8(PACK_PUSH);
                b.put_u128(*pack_id);
                put_string(&mut b, url);
                b.put_u8(u8::from(*required));
            }
            Clientbound::JoinGame { entity_id } => {
                b.put_u8(JOIN_GAME);
                b.put_u32(*entity_id);
            }
            Clientbound::Kick { reason } => {
                b.put_u8(KICK);
                put_string(&mut b, reason);
            }
            Clientbound::KeepAlive { id } => {
                b.put_u8(KEEP_ALIVE);
                b.put_u64(*id);
            }
        }
        b
    }
}

pub fn parse(p: Bytes) -> Result<Clientbound, ProtoError> {
    if p.is_empty() {
        return Err(ProtoError::TooShort { need: 1, got: 0 });
    }

    let t = p[0];
    let mut c = Cursor::new(p, 1);
    let pkt = match t {
        LOGIN_SUCCESS => Clientbound::LoginSuccess {
            uuid: c.u128()?,
            name: c.string()?,
        },
        LOGIN_DISCONNECT => Clientbound::LoginDisconnect {
            reason: c.string()?,
        },
        PACK_PUSH => Clientbound::PackPush {
            pack_id: c.u128()?,
            url: c.string()?,
            required: match c.u8()? {
                0 => false,
                1 => true,
                _ => return Err(ProtoError::Malformed("pack required flag must be 0 or 1")),
            },
        },
        JOIN_GAME => Clientbound::JoinGame {
            entity_id: c.u32()?,
        },
        KICK => Clientbound::Kick {
            reason: c.string()?,
        },
        KEEP_ALIVE => Clientbound::KeepAlive { id: c.u64()? },
        _ => return Err(ProtoError::UnknownType(t)),
    };
    c.finish("trailing bytes after clientbound packet")?;
    Ok(pkt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_push_layout() {
        let pkt = Clientbound::PackPush {
            pack_id: 7,
            url: Bytes::from_static(b"https://x/p.zip"),
            required: true,
        };
        let wire = pkt.encode().freeze();
        assert_eq!(wire[0], PACK_PUSH);
        assert_eq!(wire[16], 7);
        assert_eq!(wire[17] as usize, "https://x/p.zip".len());
        assert_eq!(*wire.last().unwrap(), 1);
        assert_eq!(parse(wire).unwrap(), pkt);
    }

    #[test]
    fn strings_are_zero_copy_slices() {
        let wire = Clientbound::Kick {
            reason: Bytes::from_static(b"bye"),
        }
        .encode()
        .freeze();
        let base = wire.as_ptr();
        let Clientbound::Kick { reason } = parse(wire).unwrap() else {
            panic!("expected kick");
        };
        assert_eq!(&reason[..], b"bye");
        assert_eq!(reason.as_ptr(), base.wrapping_add(2));
    }

    #[test]
    fn rejects_bad_utf8_and_short_bodies() {
        assert!(matches!(
            parse(Bytes::from_static(&[KICK, 2, 0xff, 0xfe])),
            Err(ProtoError::Malformed(_))
        ));
        assert_eq!(
            parse(Bytes::from_static(&[JOIN_GAME, 0, 0])),
            Err(ProtoError::TooShort { need: 5, got: 3 })
        );
        assert_eq!(
            parse(Bytes::from_static(&[0x01])),
            Err(ProtoError::UnknownType(0x01))
        );
    }
}
