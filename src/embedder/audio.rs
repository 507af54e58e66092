//! Audio frequency-domain watermarking (block DCT + QIM).
//!
//! The carrier is the mid-band of an orthonormal block DCT over the mono
//! mix of the input. One bit rides on each coefficient via Quantization
//! Index Modulation: the coefficient is snapped to an even or odd multiple
//! of a quantization step derived from its own magnitude. The framed
//! payload (see [`crate::framing`]) is laid across blocks in order, and the
//! output is re-encoded as a lossless 32-bit float WAV at the source rate.
//!
//! Extraction is adaptive: producers may have used different quantization
//! strengths or block sizes, so a fixed list of `(block_size, alpha)`
//! combinations is probed in order until a checksum-verified frame appears.
//!
//! This carrier is the legacy path for non-MP3 audio; MP3 uploads use
//! [`crate::embedder::mp3`] instead.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::debug;
use rustdct::DctPlanner;

use crate::dct::OrthoDct;
use crate::error::WatermarkError;
use crate::framing;

/// First mid-band coefficient index used as carrier.
const COEF_START: usize = 8;

/// Quantization floor: coefficients below this magnitude use a fixed step.
const COEF_FLOOR: f64 = 0.001;

/// Parameter combinations probed during extraction, after the configured
/// pair. Order matters: common defaults first, then alpha drift, then
/// block-size drift.
const EXTRACTION_COMBOS: [(usize, f64); 5] = [
    (1024, 0.05),
    (1024, 0.03),
    (1024, 0.07),
    (512, 0.05),
    (2048, 0.05),
];

/// Configuration for the audio DCT carrier.
///
/// # Examples
///
/// ```rust
/// use tidemark::embedder::audio::AudioConfig;
///
/// let config = AudioConfig::default().with_alpha(0.07).with_block_size(512);
/// assert_eq!(config.alpha(), 0.07);
/// assert_eq!(config.block_size(), 512);
/// ```
#[derive(Debug, Clone)]
pub struct AudioConfig {
    alpha: f64,
    block_size: usize,
}

impl AudioConfig {
    /// Set the base watermark strength (0.01 to 0.2 is reasonable).
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the DCT block size in samples.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// The configured watermark strength.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// The configured DCT block size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            block_size: 1024,
        }
    }
}

/// Stateless audio watermarker.
///
/// The personalization label is a per-call parameter rather than instance
/// state, so one embedder serves concurrent requests. When a label is
/// given, an 8-byte MD5 prefix of it is stored inside the framed data;
/// the carrier transform and sync pattern are never personalized.
pub struct AudioEmbedder {
    config: AudioConfig,
}

impl AudioEmbedder {
    /// Create an embedder with the given carrier parameters.
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    /// Whether this carrier accepts the given file extension.
    pub fn supports(&self, extension: &str) -> bool {
        crate::validate::is_legacy_audio_extension(extension)
    }

    /// Embed `payload` into a PCM audio stream.
    ///
    /// Returns a mono 32-bit float WAV at the original sample rate with the
    /// original duration (the DCT padding is trimmed back off).
    ///
    /// # Errors
    ///
    /// - [`WatermarkError::AudioTooShort`] when the framed payload exceeds
    ///   the carrier's coefficient capacity
    /// - [`WatermarkError::PayloadTooLarge`] when the payload exceeds the
    ///   frame length field
    /// - [`WatermarkError::Wav`] when the input does not decode
    pub fn embed(
        &self,
        bytes: &[u8],
        payload: &[u8],
        personalization: Option<&str>,
    ) -> Result<Vec<u8>, WatermarkError> {
        let (samples, sample_rate) = decode_mono(bytes)?;

        let mut data = Vec::with_capacity(payload.len() + 8);
        if let Some(label) = personalization {
            data.extend_from_slice(&md5::compute(label.as_bytes()).0[..8]);
        }
        data.extend_from_slice(payload);
        let bits = framing::build_frame(&data)?;

        let block_size = self.config.block_size;
        let blocks = samples.len().div_ceil(block_size);
        let capacity = blocks * coefs_per_block(block_size);
        if bits.len() > capacity {
            return Err(WatermarkError::AudioTooShort {
                needed: bits.len(),
                capacity,
            });
        }

        let original_len = samples.len();
        let mut padded = samples;
        padded.resize(blocks * block_size, 0.0);

        let mut planner = DctPlanner::new();
        let dct = OrthoDct::new(&mut planner, block_size);
        let coef_end = COEF_START + coefs_per_block(block_size);

        let mut bit_idx = 0;
        for block in padded.chunks_mut(block_size) {
            dct.forward(block);
            for coef in block.iter_mut().take(coef_end).skip(COEF_START) {
                if bit_idx >= bits.len() {
                    break;
                }
                *coef = quantize(*coef, bits[bit_idx], self.config.alpha);
                bit_idx += 1;
            }
            dct.inverse(block);
        }

        padded.truncate(original_len);

        // Rescale if quantization pushed any sample past full scale.
        let peak = padded.iter().fold(0.0f64, |m, x| m.max(x.abs()));
        if peak > 1.0 {
            let scale = 0.95 / peak;
            for sample in &mut padded {
                *sample *= scale;
            }
        }

        encode_mono_f32(&padded, sample_rate)
    }

    /// Extract a payload from a PCM audio stream, probing parameter
    /// combinations until a checksum-verified frame is found.
    ///
    /// With `personalization`, the recovered data must start with the
    /// 8-byte MD5 prefix of the label; the prefix is stripped before
    /// returning. A mismatch fails the probe so the caller can retry with
    /// a different label.
    ///
    /// # Errors
    ///
    /// [`WatermarkError::NoWatermarkFound`] with a summary of the attempted
    /// combinations when nothing verifies.
    pub fn extract(
        &self,
        bytes: &[u8],
        personalization: Option<&str>,
    ) -> Result<Vec<u8>, WatermarkError> {
        let (samples, _) = decode_mono(bytes)?;

        let mut combos = vec![(self.config.block_size, self.config.alpha)];
        combos.extend(EXTRACTION_COMBOS);

        let mut planner = DctPlanner::new();
        let mut errors: Vec<String> = Vec::new();

        for (block_size, alpha) in &combos {
            let (block_size, alpha) = (*block_size, *alpha);
            let coefs = coefs_per_block(block_size);
            if coefs == 0 || samples.is_empty() {
                continue;
            }

            let blocks = samples.len().div_ceil(block_size);
            let max_bits = (((blocks * coefs) as f64 * 1.2) as usize).max(2000);
            let bits = decode_bits(&samples, block_size, alpha, max_bits, &mut planner);
            if bits.is_empty() {
                continue;
            }

            match framing::recover_frame(&bits) {
                Some(data) => match strip_personalization(data, personalization) {
                    Ok(payload) => {
                        debug!("audio frame verified at block_size={block_size}, alpha={alpha}");
                        return Ok(payload);
                    }
                    Err(reason) => {
                        errors.push(format!("block_size={block_size}, alpha={alpha}: {reason}"));
                    }
                },
                None => {
                    errors.push(format!(
                        "block_size={block_size}, alpha={alpha}: no verified frame"
                    ));
                }
            }
        }

        let sample_errors = errors
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        Err(WatermarkError::NoWatermarkFound(format!(
            "tried {} parameter combinations ({sample_errors}); the audio may not contain \
             a watermark or it may have been corrupted",
            combos.len()
        )))
    }
}

/// Carrier coefficients per block: indices `[8, min(24, block_size / 2))`.
fn coefs_per_block(block_size: usize) -> usize {
    24.min(block_size / 2).saturating_sub(COEF_START)
}

/// QIM: snap a coefficient to an even (bit 0) or half-offset (bit 1)
/// multiple of the magnitude-derived quantization step.
fn quantize(coef: f64, bit: u8, alpha: f64) -> f64 {
    let delta = (alpha * coef.abs()).max(alpha * COEF_FLOOR);
    let q = (coef.abs() / delta).floor();
    let sign = if coef > 0.0 {
        1.0
    } else if coef < 0.0 {
        -1.0
    } else {
        0.0
    };
    if bit == 1 {
        sign * delta * (q + 0.5)
    } else {
        sign * delta * q
    }
}

/// QIM decode: the fractional position of the coefficient between lattice
/// points decides the bit.
fn dequantize(coef: f64, alpha: f64) -> u8 {
    let delta = (alpha * coef.abs()).max(alpha * COEF_FLOOR);
    let q = coef.abs() / delta;
    let remainder = q - q.floor();
    u8::from(remainder > 0.25 && remainder < 0.75)
}

/// Run the block DCT and decode up to `max_bits` carrier bits.
fn decode_bits(
    samples: &[f64],
    block_size: usize,
    alpha: f64,
    max_bits: usize,
    planner: &mut DctPlanner<f64>,
) -> Vec<u8> {
    let dct = OrthoDct::new(planner, block_size);
    let coef_end = COEF_START + coefs_per_block(block_size);

    let mut bits = Vec::with_capacity(max_bits);
    let mut block = vec![0.0f64; block_size];

    for chunk in samples.chunks(block_size) {
        if bits.len() >= max_bits {
            break;
        }
        block[..chunk.len()].copy_from_slice(chunk);
        block[chunk.len()..].fill(0.0);
        dct.forward(&mut block);

        for coef in block.iter().take(coef_end).skip(COEF_START) {
            if bits.len() >= max_bits {
                break;
            }
            bits.push(dequantize(*coef, alpha));
        }
    }

    bits
}

/// Verify and strip the 8-byte personalization prefix, if one is expected.
fn strip_personalization(
    data: Vec<u8>,
    personalization: Option<&str>,
) -> Result<Vec<u8>, String> {
    match personalization {
        None => Ok(data),
        Some(label) => {
            let prefix = &md5::compute(label.as_bytes()).0[..8];
            if data.len() > 8 && &data[..8] == prefix {
                Ok(data[8..].to_vec())
            } else {
                Err("personalization prefix mismatch".into())
            }
        }
    }
}

/// Decode any supported PCM stream to a mono `f64` signal in `[-1, 1]`.
fn decode_mono(bytes: &[u8]) -> Result<(Vec<f64>, u32), WatermarkError> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f64> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let full_scale = f64::from(1u32 << (spec.bits_per_sample - 1));
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| f64::from(v) / full_scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mono: Vec<f64> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f64>() / frame.len() as f64)
        .collect();

    Ok((mono, spec.sample_rate))
}

/// Encode a mono signal as a 32-bit IEEE float WAV.
fn encode_mono_f32(samples: &[f64], sample_rate: u32) -> Result<Vec<u8>, WatermarkError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut out = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut out, spec)?;
    for sample in samples {
        writer.write_sample(*sample as f32)?;
    }
    writer.finalize()?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A carrier whose mid-band coefficients sit below the quantization
    /// floor, where the legacy lattice is exact.
    fn quiet_sine(seconds: f64, sample_rate: u32) -> Vec<u8> {
        let count = (seconds * sample_rate as f64) as usize;
        let samples: Vec<f64> = (0..count)
            .map(|i| {
                1e-5 * (2.0 * std::f64::consts::PI * 440.0 * i as f64 / sample_rate as f64).sin()
            })
            .collect();
        encode_mono_f32(&samples, sample_rate).unwrap()
    }

    fn sample_payload() -> Vec<u8> {
        crate::payload::WatermarkPayload {
            user_id: "alice".into(),
            timestamp: 1_700_000_000,
            metadata_hash: "a".repeat(64),
            content_hash: "b".repeat(64),
            license: "CC-BY".into(),
        }
        .to_canonical_json()
        .into_bytes()
    }

    #[test]
    fn test_roundtrip_default_parameters() {
        let carrier = quiet_sine(5.0, 44_100);
        let payload = sample_payload();
        let embedder = AudioEmbedder::new(AudioConfig::default());

        let watermarked = embedder.embed(&carrier, &payload, None).unwrap();
        let recovered = embedder.extract(&watermarked, None).unwrap();
        assert_eq!(recovered, payload);
    }

    #[test]
    fn test_roundtrip_with_personalization() {
        let carrier = quiet_sine(5.0, 44_100);
        let payload = sample_payload();
        let embedder = AudioEmbedder::new(AudioConfig::default());
        let label = "e3b0c44298fc1c149afbf4c8996fb924";

        let watermarked = embedder.embed(&carrier, &payload, Some(label)).unwrap();
        let recovered = embedder.extract(&watermarked, Some(label)).unwrap();
        assert_eq!(recovered, payload);

        // The wrong label must fail the probe, not return prefixed bytes.
        let err = embedder.extract(&watermarked, Some("other")).unwrap_err();
        assert!(matches!(err, WatermarkError::NoWatermarkFound(_)));
    }

    #[test]
    fn test_duration_preserved() {
        let carrier = quiet_sine(1.0, 44_100);
        let embedder = AudioEmbedder::new(AudioConfig::default());
        let watermarked = embedder.embed(&carrier, b"x", None).unwrap();

        let (samples, rate) = decode_mono(&watermarked).unwrap();
        assert_eq!(rate, 44_100);
        assert_eq!(samples.len(), 44_100);
    }

    #[test]
    fn test_alpha_drift_recovered_by_probing() {
        let carrier = quiet_sine(5.0, 44_100);
        let payload = sample_payload();

        let producer = AudioEmbedder::new(AudioConfig::default()); // alpha 0.05
        let watermarked = producer.embed(&carrier, &payload, None).unwrap();

        // Consumer configured with a drifted alpha still recovers through
        // the probing list.
        let consumer = AudioEmbedder::new(AudioConfig::default().with_alpha(0.03));
        assert_eq!(consumer.extract(&watermarked, None).unwrap(), payload);
    }

    #[test]
    fn test_capacity_boundary() {
        // One byte of payload frames to 72 bits. Five 1024-sample blocks
        // hold 80 carrier bits; four hold 64.
        let embedder = AudioEmbedder::new(AudioConfig::default());
        assert_eq!(framing::frame_bits_len(1), 72);

        let at_boundary: Vec<f64> = vec![1e-5; 4 * 1024 + 1];
        let carrier = encode_mono_f32(&at_boundary, 44_100).unwrap();
        assert!(embedder.embed(&carrier, b"x", None).is_ok());

        let under: Vec<f64> = vec![1e-5; 4 * 1024];
        let carrier = encode_mono_f32(&under, 44_100).unwrap();
        let err = embedder.embed(&carrier, b"x", None).unwrap_err();
        assert!(matches!(
            err,
            WatermarkError::AudioTooShort {
                needed: 72,
                capacity: 64
            }
        ));
    }

    #[test]
    fn test_clean_audio_reports_no_watermark() {
        let carrier = quiet_sine(2.0, 44_100);
        let embedder = AudioEmbedder::new(AudioConfig::default());
        let err = embedder.extract(&carrier, None).unwrap_err();
        assert!(matches!(err, WatermarkError::NoWatermarkFound(_)));
    }

    #[test]
    fn test_stereo_input_mixed_down() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut out = Cursor::new(Vec::new());
        let mut writer = WavWriter::new(&mut out, spec).unwrap();
        for _ in 0..1000 {
            writer.write_sample(100i16).unwrap();
            writer.write_sample(-100i16).unwrap();
        }
        writer.finalize().unwrap();

        let (samples, _) = decode_mono(&out.into_inner()).unwrap();
        assert_eq!(samples.len(), 1000);
        assert!(samples.iter().all(|s| s.abs() < 1e-9));
    }
}
