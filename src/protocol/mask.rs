//! Payload masking (RFC 6455 Section 5.3).
//!
//! Client-to-server payloads are XOR-obfuscated with a 4-byte key. Masking is
//! an involution: applying the same key twice restores the original bytes.

/// Scalar byte-by-byte XOR masking.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Word-at-a-time XOR masking, processing 8 bytes per iteration.
///
/// Produces identical output to [`apply_mask`]; used on the connection hot
/// path.
#[inline]
pub fn apply_mask_fast(data: &mut [u8], mask: [u8; 4]) {
    let mask_u64 = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let word = u64::from_ne_bytes(chunk.try_into().unwrap());
        chunk.copy_from_slice(&(word ^ mask_u64).to_ne_bytes());
    }

    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}
