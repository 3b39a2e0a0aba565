//! Buffered frame transport over the split halves of an async stream.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::{Frame, ParsePolicy};

/// Reads frames from the receive half of the transport.
///
/// Bytes accumulate in an internal buffer until a whole frame is available;
/// the codec never yields a partial frame.
pub(crate) struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    chunk: usize,
    policy: ParsePolicy,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(io: R, buffer_size: usize, policy: ParsePolicy) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(buffer_size),
            chunk: buffer_size.max(512),
            policy,
        }
    }

    /// Seed the buffer with bytes that arrived behind the handshake.
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Read the next complete frame.
    ///
    /// Returns `Error::ConnectionClosed` on EOF.
    pub(crate) async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if !self.buf.is_empty() {
                match Frame::parse(&self.buf, &self.policy) {
                    Ok((frame, consumed)) => {
                        self.buf.advance(consumed);
                        return Ok(frame);
                    }
                    Err(Error::IncompleteFrame { .. }) => {}
                    Err(e) => return Err(e),
                }
            }

            self.buf.reserve(self.chunk);
            let n = self.io.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}

/// Writes frames to the send half of the transport.
///
/// When `masking` is on (client role) every frame gets a fresh 4-byte key
/// from a splitmix-style counter seeded with entropy at construction.
pub(crate) struct FrameWriter<W> {
    io: W,
    scratch: Vec<u8>,
    masking: bool,
    mask_counter: u32,
}

fn random_mask_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x12345678)
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub(crate) fn new(io: W, buffer_size: usize, masking: bool) -> Self {
        Self {
            io,
            scratch: Vec::with_capacity(buffer_size),
            masking,
            mask_counter: random_mask_seed(),
        }
    }

    fn next_mask(&mut self) -> [u8; 4] {
        self.mask_counter = self.mask_counter.wrapping_add(0x9E37_79B9);
        let a = self.mask_counter;
        let b = a.wrapping_mul(0x85EB_CA6B);
        let c = b ^ (b >> 13);
        let d = c.wrapping_mul(0xC2B2_AE35);
        d.to_le_bytes()
    }

    /// Serialize and write one frame. The header and payload are emitted in
    /// a single `write_all`, so a frame is never interleaved with another
    /// writer's bytes as long as callers hold the connection write lock.
    pub(crate) async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mask = if self.masking {
            Some(self.next_mask())
        } else {
            None
        };

        self.scratch.clear();
        frame.write(&mut self.scratch, mask);
        self.io.write_all(&self.scratch).await?;
        Ok(())
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }

    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    #[tokio::test]
    async fn test_reader_single_frame() {
        let wire = vec![0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
        let mut reader = FrameReader::new(&wire[..], 4096, ParsePolicy::default());

        let frame = reader.read_frame().await.unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"Hello");
    }

    #[tokio::test]
    async fn test_reader_back_to_back_frames() {
        let mut wire = vec![0x81, 0x02, b'H', b'i'];
        wire.extend([0x82, 0x03, 0x01, 0x02, 0x03]);
        let mut reader = FrameReader::new(&wire[..], 4096, ParsePolicy::default());

        let first = reader.read_frame().await.unwrap();
        assert_eq!(first.payload, b"Hi");

        let second = reader.read_frame().await.unwrap();
        assert_eq!(second.opcode, OpCode::Binary);
        assert_eq!(second.payload, &[0x01, 0x02, 0x03]);
    }

    #[tokio::test]
    async fn test_reader_eof() {
        let mut reader = FrameReader::new(&[][..], 4096, ParsePolicy::default());
        assert!(matches!(
            reader.read_frame().await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_reader_enforces_policy() {
        let policy = ParsePolicy {
            max_payload: 4,
            ..ParsePolicy::default()
        };
        let wire = vec![0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
        let mut reader = FrameReader::new(&wire[..], 4096, policy);

        assert!(matches!(
            reader.read_frame().await,
            Err(Error::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_writer_unmasked() {
        let mut out = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut out, 4096, false);
            writer.write_frame(&Frame::text("Hi")).await.unwrap();
            writer.flush().await.unwrap();
        }
        assert_eq!(out, vec![0x81, 0x02, b'H', b'i']);
    }

    #[tokio::test]
    async fn test_writer_masked_roundtrip() {
        let mut out = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut out, 4096, true);
            writer.write_frame(&Frame::text("Hello")).await.unwrap();
        }

        assert_eq!(out[0], 0x81);
        assert_eq!(out[1], 0x85); // MASK bit + len 5
        assert_eq!(out.len(), 11);

        let (frame, _) = Frame::parse(&out, &ParsePolicy::default()).unwrap();
        assert_eq!(frame.payload, b"Hello");
    }

    #[tokio::test]
    async fn test_writer_masks_differ_between_frames() {
        let mut out = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut out, 4096, true);
            writer.write_frame(&Frame::text("x")).await.unwrap();
            writer.write_frame(&Frame::text("x")).await.unwrap();
        }

        let first_mask = &out[2..6];
        let second_mask = &out[9..13];
        assert_ne!(first_mask, second_mask);
    }
}
