//! Per-message DEFLATE compression (RFC 7692).
//!
//! Only the stateless variant is spoken: every message is an independent
//! DEFLATE stream, so there is no sliding-window carry between messages
//! regardless of what context-takeover parameters the peer offered.

use std::sync::Mutex;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};

/// The empty-block marker stripped from (and re-appended to) every message
/// body (RFC 7692 Section 7.2.1).
const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Default minimum payload size worth compressing.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 256;

const CHUNK: usize = 4096;

/// Per-message DEFLATE codec for one connection.
///
/// Compression and decompression hold independent locks, so a reader
/// inflating an incoming message never contends with a writer deflating an
/// outgoing one.
pub struct CompressionManager {
    threshold: usize,
    compressor: Mutex<Compress>,
    decompressor: Mutex<Decompress>,
}

impl CompressionManager {
    /// Create a codec with the given compression threshold.
    ///
    /// Non-positive thresholds fall back to the 256-byte default.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        let threshold = if threshold == 0 {
            DEFAULT_COMPRESSION_THRESHOLD
        } else {
            threshold
        };
        Self {
            threshold,
            // Raw deflate, no zlib header; best-speed favors latency over ratio.
            compressor: Mutex::new(Compress::new(Compression::fast(), false)),
            decompressor: Mutex::new(Decompress::new(false)),
        }
    }

    /// True if a payload of `size` bytes should be compressed.
    #[must_use]
    pub fn should_compress(&self, size: usize) -> bool {
        size >= self.threshold
    }

    /// The configured threshold in bytes.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Deflate `data` as an independent stream and strip the trailing
    /// `00 00 FF FF` marker.
    ///
    /// # Errors
    ///
    /// Returns `Error::CompressionFailed` if the deflate stream errors.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let mut compressor = self
            .compressor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        compressor.reset();

        let mut out = Vec::with_capacity(data.len() / 2 + 16);
        let mut consumed = 0usize;

        while consumed < data.len() {
            let before_in = compressor.total_in();
            let before_out = compressor.total_out();

            let old_len = out.len();
            out.resize(old_len + CHUNK, 0);

            compressor
                .compress(&data[consumed..], &mut out[old_len..], FlushCompress::None)
                .map_err(|e| Error::CompressionFailed(e.to_string()))?;

            consumed += (compressor.total_in() - before_in) as usize;
            out.truncate(old_len + (compressor.total_out() - before_out) as usize);
        }

        // A single sync flush terminates the stream with the empty stored
        // block that the trailer strip below removes.
        loop {
            let before_out = compressor.total_out();

            let old_len = out.len();
            out.resize(old_len + CHUNK, 0);

            compressor
                .compress(&[], &mut out[old_len..], FlushCompress::Sync)
                .map_err(|e| Error::CompressionFailed(e.to_string()))?;

            let produced = (compressor.total_out() - before_out) as usize;
            out.truncate(old_len + produced);

            if produced < CHUNK {
                break;
            }
        }

        if out.len() >= 4 && out[out.len() - 4..] == DEFLATE_TRAILER {
            out.truncate(out.len() - 4);
        }

        Ok(out)
    }

    /// Re-append the `00 00 FF FF` marker and inflate `data` to completion.
    ///
    /// # Errors
    ///
    /// Returns `Error::CompressionFailed` on a corrupt deflate stream.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let mut input = Vec::with_capacity(data.len() + 4);
        input.extend_from_slice(data);
        input.extend_from_slice(&DEFLATE_TRAILER);

        let mut decompressor = self
            .decompressor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        decompressor.reset(false);

        let mut out = Vec::with_capacity(data.len() * 2);
        let mut consumed = 0usize;

        loop {
            let before_in = decompressor.total_in();
            let before_out = decompressor.total_out();

            let old_len = out.len();
            out.resize(old_len + CHUNK, 0);

            let status = decompressor
                .decompress(&input[consumed..], &mut out[old_len..], FlushDecompress::Sync)
                .map_err(|e| Error::CompressionFailed(e.to_string()))?;

            consumed += (decompressor.total_in() - before_in) as usize;
            let produced = (decompressor.total_out() - before_out) as usize;
            out.truncate(old_len + produced);

            if status == Status::StreamEnd {
                break;
            }
            if consumed >= input.len() && produced < CHUNK {
                break;
            }
        }

        Ok(out)
    }
}

impl std::fmt::Debug for CompressionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionManager")
            .field("threshold", &self.threshold)
            .finish()
    }
}
