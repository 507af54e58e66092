//! Image LSB watermarking for lossless PNG rasters.
//!
//! The payload is written into the least significant bit of every raw
//! image byte in linear order, preceded by a small header:
//!
//! ```text
//! [magic "TMRK"][u32 BE payload length][CRC-32 of payload][payload bytes]
//! ```
//!
//! The header makes extraction self-describing: a PNG with no embedded
//! payload fails the magic check instead of producing garbage. Output is
//! always PNG; the encoder is configured from the decoder's stream info so
//! dimensions, color type and ancillary color metadata survive.
//!
//! This carrier only makes sense on lossless data, so it rejects anything
//! but 8-bit truecolor/grayscale PNG buffers. The orchestrator converts
//! interim results to RGB PNG before invoking it.

use std::io::Cursor;

use crate::error::WatermarkError;

/// Header magic identifying an embedded payload.
const MAGIC: &[u8; 4] = b"TMRK";

/// Header bytes ahead of the payload: magic + length + CRC-32.
const HEADER_SIZE: usize = 12;

/// Stateless LSB watermarker for PNG bytes.
pub struct LsbEmbedder;

impl LsbEmbedder {
    /// Whether this carrier accepts the given file extension.
    pub fn supports(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case(".png")
    }

    /// Embed `payload` into the least significant bits of a PNG raster.
    ///
    /// # Errors
    ///
    /// - [`WatermarkError::FormatUnsupported`] for indexed or sub-byte PNGs
    /// - [`WatermarkError::InsufficientCapacity`] when the raster has fewer
    ///   bits than header + payload need
    pub fn embed(&self, bytes: &[u8], payload: &[u8]) -> Result<Vec<u8>, WatermarkError> {
        let (mut buffer, info) = decode_png(bytes)?;

        let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
        message.extend_from_slice(MAGIC);
        message.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        message.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
        message.extend_from_slice(payload);

        let needed = message.len() * 8;
        if needed > buffer.len() {
            return Err(WatermarkError::InsufficientCapacity {
                needed,
                available: buffer.len(),
            });
        }

        let mut cursor = 0;
        for byte in &message {
            for bit_pos in 0..8 {
                let bit = (byte >> bit_pos) & 1;
                buffer[cursor] = (buffer[cursor] & !1) | bit;
                cursor += 1;
            }
        }

        encode_png(&buffer, &info)
    }

    /// Extract a payload previously embedded with [`embed`](Self::embed).
    ///
    /// # Errors
    ///
    /// [`WatermarkError::NoWatermarkFound`] when the magic, length or
    /// checksum do not line up.
    pub fn extract(&self, bytes: &[u8]) -> Result<Vec<u8>, WatermarkError> {
        let (buffer, _) = decode_png(bytes)?;

        let capacity = buffer.len() / 8;
        if capacity < HEADER_SIZE {
            return Err(WatermarkError::NoWatermarkFound(
                "raster too small for an LSB header".into(),
            ));
        }

        let header = read_lsb_bytes(&buffer, 0, HEADER_SIZE);
        if &header[..4] != MAGIC {
            return Err(WatermarkError::NoWatermarkFound(
                "no LSB payload marker".into(),
            ));
        }

        let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if length == 0 || HEADER_SIZE + length > capacity {
            return Err(WatermarkError::NoWatermarkFound(
                "LSB length field out of range".into(),
            ));
        }

        let expected_crc = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        let payload = read_lsb_bytes(&buffer, HEADER_SIZE, length);
        if crc32fast::hash(&payload) != expected_crc {
            return Err(WatermarkError::NoWatermarkFound(
                "LSB payload checksum mismatch".into(),
            ));
        }

        Ok(payload)
    }
}

/// Read `count` bytes from the LSBs starting at byte offset `skip`.
fn read_lsb_bytes(buffer: &[u8], skip: usize, count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count);
    let mut cursor = skip * 8;
    for _ in 0..count {
        let mut byte = 0u8;
        for bit_pos in 0..8 {
            byte |= (buffer[cursor] & 1) << bit_pos;
            cursor += 1;
        }
        out.push(byte);
    }
    out
}

/// Decoded stream info needed to re-encode faithfully.
struct StreamInfo {
    width: u32,
    height: u32,
    color_type: png::ColorType,
    bit_depth: png::BitDepth,
    source_gamma: Option<png::ScaledFloat>,
    source_chromaticities: Option<png::SourceChromaticities>,
    srgb: Option<png::SrgbRenderingIntent>,
}

fn decode_png(bytes: &[u8]) -> Result<(Vec<u8>, StreamInfo), WatermarkError> {
    let decoder = png::Decoder::new(Cursor::new(bytes));
    let mut reader = decoder.read_info()?;

    let mut buffer = vec![0u8; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buffer)?;
    buffer.truncate(frame.buffer_size());

    let info = reader.info();
    if info.color_type == png::ColorType::Indexed || info.bit_depth != png::BitDepth::Eight {
        return Err(WatermarkError::FormatUnsupported(format!(
            "LSB carrier needs 8-bit direct color, got {:?}/{:?}",
            info.color_type, info.bit_depth
        )));
    }

    let stream = StreamInfo {
        width: frame.width,
        height: frame.height,
        color_type: frame.color_type,
        bit_depth: frame.bit_depth,
        source_gamma: info.source_gamma,
        source_chromaticities: info.source_chromaticities,
        srgb: info.srgb,
    };
    Ok((buffer, stream))
}

fn encode_png(buffer: &[u8], info: &StreamInfo) -> Result<Vec<u8>, WatermarkError> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, info.width, info.height);
        encoder.set_color(info.color_type);
        encoder.set_depth(info.bit_depth);
        if let Some(gamma) = info.source_gamma {
            encoder.set_source_gamma(gamma);
        }
        if let Some(chromaticities) = info.source_chromaticities {
            encoder.set_source_chromaticities(chromaticities);
        }
        if let Some(srgb) = info.srgb {
            encoder.set_source_srgb(srgb);
        }

        let mut writer = encoder.write_header()?;
        writer.write_image_data(buffer)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let mut data = Vec::new();
        for _ in 0..width * height {
            data.extend_from_slice(&color);
        }
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&data).unwrap();
        }
        out
    }

    #[test]
    fn test_roundtrip() {
        let carrier = rgb_png(100, 100, [200, 180, 160]);
        let payload = b"{\"user_id\":\"alice\",\"timestamp\":1700000000}";

        let marked = LsbEmbedder.embed(&carrier, payload).unwrap();
        assert_eq!(LsbEmbedder.extract(&marked).unwrap(), payload);
    }

    #[test]
    fn test_output_is_valid_png() {
        let carrier = rgb_png(32, 32, [10, 20, 30]);
        let marked = LsbEmbedder.embed(&carrier, b"tag").unwrap();

        let decoder = png::Decoder::new(Cursor::new(marked.as_slice()));
        let mut reader = decoder.read_info().unwrap();
        let mut buffer = vec![0u8; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut buffer).unwrap();
        assert_eq!((frame.width, frame.height), (32, 32));
    }

    #[test]
    fn test_clean_png_reports_no_watermark() {
        // An even-valued fill has all LSBs zero, so the magic cannot match.
        let carrier = rgb_png(64, 64, [128, 64, 32]);
        assert!(matches!(
            LsbEmbedder.extract(&carrier),
            Err(WatermarkError::NoWatermarkFound(_))
        ));
    }

    #[test]
    fn test_capacity_enforced() {
        // 4x4 RGB = 48 bytes of raster = 6 bytes of capacity.
        let carrier = rgb_png(4, 4, [90, 90, 90]);
        assert!(matches!(
            LsbEmbedder.embed(&carrier, b"too large for this raster"),
            Err(WatermarkError::InsufficientCapacity { .. })
        ));
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let carrier = rgb_png(64, 64, [100, 100, 100]);
        let mut marked = LsbEmbedder.embed(&carrier, b"checksummed").unwrap();

        // Re-decode, flip one payload LSB, re-encode.
        let (mut buffer, info) = decode_png(&marked).unwrap();
        buffer[HEADER_SIZE * 8 + 3] ^= 1;
        marked = encode_png(&buffer, &info).unwrap();

        assert!(matches!(
            LsbEmbedder.extract(&marked),
            Err(WatermarkError::NoWatermarkFound(_))
        ));
    }
}
