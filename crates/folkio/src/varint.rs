use bytes::BufMut;

/// Longest encoding of a `u32` VarInt.
pub const MAX_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarIntError {
    /// Ran out of input before the terminating byte.
    Incomplete,
    /// More than `MAX_LEN` continuation bytes.
    TooLong,
}

impl std::fmt::Display for VarIntError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarIntError::Incomplete => write!(f, "varint truncated"),
            VarIntError::TooLong => write!(f, "varint longer than {MAX_LEN} bytes"),
        }
    }
}

impl std::error::Error for VarIntError {}

/// Decode a VarInt from the front of `b`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode(b: &[u8]) -> Result<(u32, usize), VarIntError> {
    let mut value: u32 = 0;
    for (i, byte) in b.iter().copied().enumerate() {
        if i >= MAX_LEN {
            return Err(VarIntError::TooLong);
        }
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if b.len() >= MAX_LEN {
        return Err(VarIntError::TooLong);
    }
    Err(VarIntError::Incomplete)
}

pub fn put(buf: &mut impl BufMut, mut v: u32) {
    loop {
        if v & !0x7f == 0 {
            buf.put_u8(v as u8);
            return;
        }
        buf.put_u8(((v & 0x7f) as u8) | 0x80);
        v >>= 7;
    }
}
