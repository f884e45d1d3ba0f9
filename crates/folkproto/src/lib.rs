//! `folkproto`: the packets a fake identity exchanges with the host while
//! logging in, negotiating content and idling in the world.
//!
//! Every packet travels inside a `folkio::frame` frame:
//! - outer framing: `VarInt` byte length + payload
//! - payload: first byte is a packet type; remaining bytes are type-specific
//!
//! Decoders are zero-copy: string fields come back as `bytes::Bytes` slices of
//! the frame payload.

pub mod clientbound;
pub mod serverbound;
mod wire;

/// Protocol revision sent in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Handshake `next_state` value that starts the login sequence.
pub const NEXT_STATE_LOGIN: u8 = 2;

/// Longest profile name the host accepts, in bytes.
pub const MAX_NAME_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    TooShort { need: usize, got: usize },
    UnknownType(u8),
    Malformed(&'static str),
}

impl std::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtoError::TooShort { need, got } => {
                write!(f, "packet too short: need {need}, got {got}")
            }
            ProtoError::UnknownType(t) => write!(f, "unknown packet type: 0x{t:02x}"),
            ProtoError::Malformed(s) => write!(f, "malformed packet: {s}"),
        }
    }
}

impl std::error::Error for ProtoError {}

/// Check a profile name the way the host does: 1..=16 bytes of `[A-Za-z0-9_]`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::is_valid_name;

    #[test]
    fn name_rules() {
        assert!(is_valid_name("Steve"));
        assert!(is_valid_name("a_b_9"));
        assert!(is_valid_name("abcdefghijklmnop"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("abcdefghijklmnopq"));
        assert!(!is_valid_name("has space"));
        assert!(!is_valid_name("dash-name"));
    }
}
