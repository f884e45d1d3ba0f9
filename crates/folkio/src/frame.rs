use bytes::Buf;
use bytes::Bytes;
use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::varint::{self, VarIntError};

/// Largest payload the host accepts in a single frame (21-bit VarInt).
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024 - 1;

#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    max_frame_len: usize,
}

impl<R> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    pub fn max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max.max(1);
        self
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read one `VarInt`-prefixed frame.
    ///
    /// Returns:
    /// - `Ok(Some(payload))` for a frame payload,
    /// - `Ok(None)` on clean EOF with no buffered data.
    pub async fn read_frame(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            match varint::decode(&self.buf) {
                Ok((len, hdr)) => {
                    let len = len as usize;
                    if len > self.max_frame_len {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "frame too large",
                        ));
                    }
                    if self.buf.len() >= hdr + len {
                        self.buf.advance(hdr);
                        return Ok(Some(self.buf.split_to(len).freeze()));
                    }
                }
                Err(VarIntError::Incomplete) => {}
                Err(e @ VarIntError::TooLong) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e));
                }
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof while reading frame",
                ));
            }
        }
    }
}

#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    hdr: Vec<u8>,
}

impl<W> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hdr: Vec::with_capacity(varint::MAX_LEN),
        }
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub async fn write_frame(&mut self, payload: &[u8]) -> std::io::Result<()> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "frame too big",
            ));
        }
        self.hdr.clear();
        varint::put(&mut self.hdr, payload.len() as u32);
        self.inner.write_all(&self.hdr).await?;
        if !payload.is_empty() {
            self.inner.write_all(payload).await?;
        }
        Ok(())
    }

    /// Write a frame and flush it straight away; login packets are tiny and
    /// the peer is usually waiting on each one.
    pub async fn send(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.write_frame(payload).await?;
        self.flush().await
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush().await
    }
}
