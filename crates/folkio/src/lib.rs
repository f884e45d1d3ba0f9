//! `folkio`: framed IO for the fake-identity login protocol.
//!
//! Frames are `VarInt(len)` followed by `len` payload bytes, the same shape the
//! host's own connection protocol uses. Payloads are handed out as `Bytes`
//! split off the read buffer, so parsers can slice them without copying.

pub mod frame;
pub mod varint;
