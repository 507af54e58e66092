//! Sync framing for payloads recovered from noisy bit streams.
//!
//! Frequency-domain carriers hand the extractor a long run of decoded bits
//! with no alignment guarantee: the payload may start anywhere and single
//! bits may have flipped. This module wraps the payload in a frame the
//! extractor can locate and validate:
//!
//! ```text
//! [16-bit sync pattern][16-bit BE length N][32-bit MD5[..4] checksum][N data bytes]
//! ```
//!
//! The sync pattern is a fixed constant, identical across all files, so a
//! fuzzy scan (>= 65% bitwise agreement) can shortlist candidate offsets
//! even after moderate corruption. The truncated MD5 checksum then decides
//! whether a candidate frame is real. If no sync-anchored frame verifies, a
//! byte-aligned brute-force scan over the stream head is the last resort.

use crate::error::WatermarkError;

/// Fixed 16-bit synchronization pattern prefixed to every frame.
///
/// The constant is shared by all producers; it is never personalized.
pub const SYNC_PATTERN: [u8; 16] = [1, 0, 1, 1, 0, 0, 1, 0, 1, 1, 1, 0, 0, 1, 0, 1];

/// Minimum fraction of sync bits that must agree for a candidate offset.
const SYNC_MATCH_RATIO: f64 = 0.65;

/// How many leading bits the sync scan inspects.
const SYNC_SEARCH_LIMIT: usize = 2000;

/// Frame overhead past the sync pattern: 16 length bits + 32 checksum bits.
const HEADER_BITS: usize = 48;

/// Expand bytes into bits, most significant bit first.
pub fn bytes_to_bits(data: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(data.len() * 8);
    for byte in data {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1);
        }
    }
    bits
}

/// Pack bits (most significant first) back into bytes.
///
/// The bit count must be a multiple of eight; callers slice accordingly.
pub fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, bit| (acc << 1) | (bit & 1)))
        .collect()
}

/// Build the full frame bit sequence for a payload.
///
/// # Errors
///
/// [`WatermarkError::PayloadTooLarge`] when the payload exceeds the 16-bit
/// length field.
pub fn build_frame(data: &[u8]) -> Result<Vec<u8>, WatermarkError> {
    if data.is_empty() || data.len() > u16::MAX as usize {
        return Err(WatermarkError::PayloadTooLarge);
    }

    let checksum = md5::compute(data);

    let mut frame = Vec::with_capacity(2 + 4 + data.len());
    frame.extend_from_slice(&(data.len() as u16).to_be_bytes());
    frame.extend_from_slice(&checksum.0[..4]);
    frame.extend_from_slice(data);

    let mut bits = SYNC_PATTERN.to_vec();
    bits.extend(bytes_to_bits(&frame));
    Ok(bits)
}

/// Total bits a frame around `data_len` payload bytes occupies.
pub fn frame_bits_len(data_len: usize) -> usize {
    SYNC_PATTERN.len() + HEADER_BITS + data_len * 8
}

/// Scan the head of the bit stream for plausible sync pattern offsets.
///
/// Every window whose bitwise agreement with [`SYNC_PATTERN`] is at least
/// 65% qualifies; offsets come back sorted by descending match ratio so the
/// strongest candidate is tried first. 11 of 16 matching bits qualifies,
/// 10 of 16 does not.
pub fn find_sync_positions(bits: &[u8]) -> Vec<usize> {
    let pattern_len = SYNC_PATTERN.len();
    if bits.len() < pattern_len {
        return Vec::new();
    }

    let search_range = SYNC_SEARCH_LIMIT.min(bits.len() - pattern_len);
    let mut candidates: Vec<(usize, usize)> = Vec::new();

    for offset in 0..search_range {
        let matches = bits[offset..offset + pattern_len]
            .iter()
            .zip(SYNC_PATTERN.iter())
            .filter(|(a, b)| a == b)
            .count();
        if matches as f64 / pattern_len as f64 >= SYNC_MATCH_RATIO {
            candidates.push((offset, matches));
        }
    }

    candidates.sort_by(|a, b| b.1.cmp(&a.1));
    candidates.into_iter().map(|(offset, _)| offset).collect()
}

/// Try to decode a frame body (length, checksum, data) starting at
/// `start`, which must point just past the sync pattern.
///
/// Returns the payload bytes when the length is plausible, the stream is
/// long enough, and the truncated MD5 checksum verifies.
pub fn decode_frame_at(bits: &[u8], start: usize) -> Option<Vec<u8>> {
    let body = bits.get(start..)?;
    if body.len() < HEADER_BITS {
        return None;
    }

    let length_bytes = bits_to_bytes(&body[..16]);
    let length = u16::from_be_bytes([length_bytes[0], length_bytes[1]]) as usize;
    if length == 0 {
        return None;
    }

    let required = HEADER_BITS + length * 8;
    if body.len() < required {
        return None;
    }

    let checksum = bits_to_bytes(&body[16..48]);
    let data = bits_to_bytes(&body[48..required]);

    if checksum == md5::compute(&data).0[..4] {
        Some(data)
    } else {
        None
    }
}

/// Recover a framed payload from a decoded bit stream.
///
/// Sync-anchored candidates are tried in descending match quality; if none
/// verifies, a brute-force pass re-tries byte-aligned offsets across the
/// stream head in case the sync pattern itself was corrupted beyond the
/// fuzzy-match threshold.
pub fn recover_frame(bits: &[u8]) -> Option<Vec<u8>> {
    for position in find_sync_positions(bits) {
        if let Some(data) = decode_frame_at(bits, position + SYNC_PATTERN.len()) {
            return Some(data);
        }
    }

    // Last resort: byte-aligned scan with no sync anchor.
    let limit = 500.min(bits.len().saturating_sub(100));
    for start in (0..limit).step_by(8) {
        if let Some(data) = decode_frame_at(bits, start) {
            return Some(data);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_roundtrip() {
        let data = b"\x00\xff\xa5\x01";
        assert_eq!(bits_to_bytes(&bytes_to_bits(data)), data);
    }

    #[test]
    fn test_frame_roundtrip() {
        let bits = build_frame(b"payload record").unwrap();
        assert_eq!(bits.len(), frame_bits_len(14));
        assert_eq!(recover_frame(&bits).unwrap(), b"payload record");
    }

    #[test]
    fn test_frame_roundtrip_with_leading_noise() {
        let mut bits = vec![0, 1, 0, 0, 1, 1, 0]; // arbitrary prefix
        bits.extend(build_frame(b"shifted").unwrap());
        assert_eq!(recover_frame(&bits).unwrap(), b"shifted");
    }

    #[test]
    fn test_sync_accepts_eleven_of_sixteen() {
        let mut bits = SYNC_PATTERN.to_vec();
        for bit in bits.iter_mut().take(5) {
            *bit ^= 1; // 11/16 agreement
        }
        bits.extend([0u8; 64]);
        assert_eq!(find_sync_positions(&bits).first(), Some(&0));
    }

    #[test]
    fn test_sync_rejects_ten_of_sixteen() {
        let mut bits = SYNC_PATTERN.to_vec();
        for bit in bits.iter_mut().take(6) {
            *bit ^= 1; // 10/16 agreement
        }
        bits.extend([0u8; 64]);
        assert!(find_sync_positions(&bits).is_empty());
    }

    #[test]
    fn test_corrupted_checksum_rejected() {
        let mut bits = build_frame(b"data").unwrap();
        let data_start = SYNC_PATTERN.len() + 48;
        bits[data_start] ^= 1;
        assert!(recover_frame(&bits).is_none());
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(matches!(
            build_frame(b""),
            Err(WatermarkError::PayloadTooLarge)
        ));
        // A stream whose length field reads zero decodes to nothing.
        let mut bits = SYNC_PATTERN.to_vec();
        bits.extend([0u8; 200]);
        assert!(decode_frame_at(&bits, SYNC_PATTERN.len()).is_none());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let big = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(
            build_frame(&big),
            Err(WatermarkError::PayloadTooLarge)
        ));
    }
}
