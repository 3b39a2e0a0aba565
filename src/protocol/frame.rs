//! WebSocket frame parsing and serialization (RFC 6455 Section 5).
//!
//! ## Frame layout
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                    Masking key (if MASK set)                  |
//! +---------------------------------------------------------------+
//! |                         Payload data                          |
//! +---------------------------------------------------------------+
//! ```
//!
//! Effective payload lengths are capped at `u32::MAX`: a 64-bit extended
//! length whose high four bytes are non-zero is rejected before any payload
//! byte is read.

use crate::error::{Error, Result};
use crate::protocol::mask::apply_mask_fast;
use crate::protocol::OpCode;

/// Maximum payload size for control frames (RFC 6455 Section 5.5).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Validation policy applied while parsing incoming frames.
#[derive(Debug, Clone, Copy)]
pub struct ParsePolicy {
    /// Per-frame payload cap; larger frames fail with `FrameTooLarge`.
    pub max_payload: u64,
    /// Allow the RSV1 bit (set when permessage-deflate was negotiated).
    pub allow_rsv1: bool,
    /// Expected masking direction: `Some(true)` requires masked frames
    /// (server side), `Some(false)` forbids them (client side), `None`
    /// accepts either.
    pub expect_masked: Option<bool>,
}

impl Default for ParsePolicy {
    fn default() -> Self {
        Self {
            max_payload: u64::from(u32::MAX),
            allow_rsv1: false,
            expect_masked: None,
        }
    }
}

/// A single WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag. True if this is the last fragment of a message.
    pub fin: bool,
    /// Reserved bit 1, co-opted by permessage-deflate to mark compression.
    pub rsv1: bool,
    /// Reserved bit 2. Always zero in this implementation.
    pub rsv2: bool,
    /// Reserved bit 3. Always zero in this implementation.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Payload data. Already unmasked for parsed frames.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new final frame with the given opcode and payload.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            payload,
        }
    }

    /// Create a text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Create a binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Create a close frame with a status code and reason.
    #[must_use]
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        Self::new(true, OpCode::Close, payload)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Parse a frame from a buffer, validating it against `policy`.
    ///
    /// Returns the parsed frame (payload unmasked) and the number of bytes
    /// consumed. Limits and reserved-bit rules are checked as soon as the
    /// header is available, before any payload byte is required.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if the buffer does not yet hold a whole frame
    /// - `Error::InvalidFrame` for reserved-bit or control-frame violations
    /// - `Error::UnsupportedFrameType` for reserved opcodes
    /// - `Error::FragmentedControlFrame` for control frames with FIN=0
    /// - `Error::FrameTooLarge` for oversized or 64-bit payload lengths
    /// - `Error::InvalidMask` when masking does not match `policy.expect_masked`
    pub fn parse(buf: &[u8], policy: &ParsePolicy) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let byte0 = buf[0];
        let byte1 = buf[1];

        let fin = (byte0 & 0x80) != 0;
        let rsv1 = (byte0 & 0x40) != 0;
        let rsv2 = (byte0 & 0x20) != 0;
        let rsv3 = (byte0 & 0x10) != 0;

        if rsv2 || rsv3 || (rsv1 && !policy.allow_rsv1) {
            return Err(Error::InvalidFrame(
                "reserved bits set without negotiated extension".into(),
            ));
        }

        let opcode = OpCode::from_u8(byte0 & 0x0F)?;

        if opcode.is_control() && !fin {
            return Err(Error::FragmentedControlFrame);
        }

        let masked = (byte1 & 0x80) != 0;
        let len7 = byte1 & 0x7F;

        let (payload_len, header_len) = match len7 {
            0..=125 => (u64::from(len7), 2usize),
            126 => {
                if buf.len() < 4 {
                    return Err(Error::IncompleteFrame {
                        needed: 4 - buf.len(),
                    });
                }
                (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Err(Error::IncompleteFrame {
                        needed: 10 - buf.len(),
                    });
                }
                let len = u64::from_be_bytes([
                    buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
                ]);
                // The effective payload length is a u32; reject anything with
                // the high four bytes set before touching the payload.
                if len > u64::from(u32::MAX) {
                    return Err(Error::FrameTooLarge {
                        size: len,
                        max: u64::from(u32::MAX),
                    });
                }
                (len, 10)
            }
            _ => unreachable!(),
        };

        if opcode.is_control() && payload_len > MAX_CONTROL_FRAME_PAYLOAD as u64 {
            return Err(Error::InvalidFrame(format!(
                "control frame payload too large: {} bytes (max: {})",
                payload_len, MAX_CONTROL_FRAME_PAYLOAD
            )));
        }

        if payload_len > policy.max_payload {
            return Err(Error::FrameTooLarge {
                size: payload_len,
                max: policy.max_payload,
            });
        }

        if let Some(expected) = policy.expect_masked {
            if masked != expected {
                return Err(Error::InvalidMask);
            }
        }

        let payload_len = payload_len as usize;
        let mask_len = if masked { 4 } else { 0 };
        let total = header_len + mask_len + payload_len;

        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let payload_start = header_len + mask_len;
        let mut payload = buf[payload_start..payload_start + payload_len].to_vec();
        if masked {
            let key = [
                buf[header_len],
                buf[header_len + 1],
                buf[header_len + 2],
                buf[header_len + 3],
            ];
            apply_mask_fast(&mut payload, key);
        }

        let frame = Frame {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            payload,
        };

        Ok((frame, total))
    }

    /// Serialize this frame, appending to `buf`.
    ///
    /// When `mask` is provided the MASK bit is set, the key is written after
    /// the length, and the payload is masked on the way out. Returns the
    /// number of bytes written.
    pub fn write(&self, buf: &mut Vec<u8>, mask: Option<[u8; 4]>) -> usize {
        let start = buf.len();
        let payload_len = self.payload.len();

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        if self.rsv2 {
            byte0 |= 0x20;
        }
        if self.rsv3 {
            byte0 |= 0x10;
        }
        buf.push(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
        if payload_len < 126 {
            buf.push(mask_bit | payload_len as u8);
        } else if payload_len < 65536 {
            buf.push(mask_bit | 126);
            buf.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            buf.push(mask_bit | 127);
            buf.extend_from_slice(&(payload_len as u64).to_be_bytes());
        }

        if let Some(key) = mask {
            buf.extend_from_slice(&key);
            let payload_start = buf.len();
            buf.extend_from_slice(&self.payload);
            apply_mask_fast(&mut buf[payload_start..], key);
        } else {
            buf.extend_from_slice(&self.payload);
        }

        buf.len() - start
    }

    /// Size of the serialized frame, header included.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let payload_len = self.payload.len();
        let extended = if payload_len < 126 {
            0
        } else if payload_len < 65536 {
            2
        } else {
            8
        };
        2 + extended + if masked { 4 } else { 0 } + payload_len
    }
}
