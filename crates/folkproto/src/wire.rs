use bytes::{BufMut, Bytes};

use crate::ProtoError;

/// Forward-only reader over a frame payload.
pub(crate) struct Cursor {
    p: Bytes,
    i: usize,
}

impl Cursor {
    pub(crate) fn new(p: Bytes, start: usize) -> Self {
        Self { p, i: start }
    }

    fn need(&self, n: usize) -> Result<(), ProtoError> {
        if self.p.len() < self.i + n {
            return Err(ProtoError::TooShort {
                need: self.i + n,
                got: self.p.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ProtoError> {
        self.need(1)?;
        let v = self.p[self.i];
        self.i += 1;
        Ok(v)
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ProtoError> {
        self.need(2)?;
        let v = u16::from_be_bytes([self.p[self.i], self.p[self.i + 1]]);
        self.i += 2;
        Ok(v)
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ProtoError> {
        self.need(4)?;
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.p[self.i..self.i + 4]);
        self.i += 4;
        Ok(u32::from_be_bytes(b))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, ProtoError> {
        self.need(8)?;
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.p[self.i..self.i + 8]);
        self.i += 8;
        Ok(u64::from_be_bytes(b))
    }

    pub(crate) fn u128(&mut self) -> Result<u128, ProtoError> {
        self.need(16)?;
        let mut b = [0u8; 16];
        b.copy_from_slice(&self.p[self.i..self.i + 16]);
        self.i += 16;
        Ok(u128::from_be_bytes(b))
    }

    pub(crate) fn varint(&mut self) -> Result<u32, ProtoError> {
        match folkio::varint::decode(&self.p[self.i..]) {
            Ok((v, n)) => {
                self.i += n;
                Ok(v)
            }
            Err(folkio::varint::VarIntError::Incomplete) => Err(ProtoError::TooShort {
                need: self.i + 1,
                got: self.p.len(),
            }),
            Err(folkio::varint::VarIntError::TooLong) => Err(ProtoError::Malformed("bad varint")),
        }
    }

    pub(crate) fn string(&mut self) -> Result<Bytes, ProtoError> {
        let len = self.varint()? as usize;
        self.need(len)?;
        let s = self.p.slice(self.i..self.i + len);
        if std::str::from_utf8(&s).is_err() {
            return Err(ProtoError::Malformed("string is not utf-8"));
        }
        self.i += len;
        Ok(s)
    }

    pub(crate) fn finish(self, what: &'static str) -> Result<(), ProtoError> {
        if self.i != self.p.len() {
            return Err(ProtoError::Malformed(what));
        }
        Ok(())
    }
}

pub(crate) fn put_string(buf: &mut impl BufMut, s: &[u8]) {
    folkio::varint::put(buf, s.len() as u32);
    buf.put_slice(s);
}
