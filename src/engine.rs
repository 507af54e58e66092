//! The watermarking engine: routing, layering, probing, verification.
//!
//! An [`Engine`] is a plain value owning one instance of every codec it was
//! configured with. Capabilities are resolved eagerly at construction:
//! each codec slot is either present or absent, and the layer plans below
//! consult the slots as data. Hosts create one engine and share it across
//! threads; nothing in here mutates after construction.
//!
//! ## Embed layer plans
//!
//! - **Image**: frequency-domain carrier (when the extension qualifies),
//!   then the LSB carrier on a PNG conversion of the interim (when
//!   redundancy is configured), then container metadata. Each layer feeds
//!   the next; individual failures are logged and skipped, but if no layer
//!   produced output the embed fails.
//! - **Audio** `.mp3`: ID3 tag carrier only.
//! - **Audio** others: the legacy DCT carrier, personalized with the
//!   watermark hash (gated by [`EngineConfig::with_legacy_audio`]).
//! - **PDF**: Info dictionary carrier only.
//!
//! ## Extract probe orders
//!
//! - **Image**: container metadata, then frequency-domain, then LSB (after
//!   an in-memory PNG conversion if needed). First non-empty result wins.
//! - **Audio** `.mp3`: ID3 tags only.
//! - **Audio** others: the DCT carrier with the caller's personalization
//!   hash, then without one, then with the empty string and the two
//!   sentinel hashes legacy producers used.
//! - **PDF**: Info dictionary only.

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::embedder::audio::{AudioConfig, AudioEmbedder};
use crate::embedder::container::MetadataEmbedder;
use crate::embedder::frequency::{FrequencyConfig, FrequencyEmbedder};
use crate::embedder::lsb::LsbEmbedder;
use crate::embedder::mp3::Mp3TagEmbedder;
use crate::embedder::pdf::PdfEmbedder;
use crate::error::WatermarkError;
use crate::hashing;
use crate::payload::{self, WatermarkPayload};
use crate::registry::{HashRegistry, MockRegistry};
use crate::validate::{self, MediaType};

/// Default upload ceiling: 50 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Engine construction parameters.
///
/// # Examples
///
/// ```rust
/// use tidemark::{Engine, EngineConfig};
///
/// let engine = Engine::new(
///     EngineConfig::default()
///         .with_redundant_watermarks(2)
///         .with_legacy_audio(false),
/// );
/// # let _ = engine;
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    max_file_size: u64,
    redundant_watermarks: u32,
    frequency: FrequencyConfig,
    audio: AudioConfig,
    legacy_audio: bool,
}

impl EngineConfig {
    /// Set the maximum accepted input size in bytes.
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Set how many redundant image layers to apply. Values above 1 enable
    /// the LSB layer on top of the frequency-domain one.
    pub fn with_redundant_watermarks(mut self, redundant_watermarks: u32) -> Self {
        self.redundant_watermarks = redundant_watermarks;
        self
    }

    /// Replace the frequency-domain carrier configuration.
    pub fn with_frequency(mut self, frequency: FrequencyConfig) -> Self {
        self.frequency = frequency;
        self
    }

    /// Replace the audio carrier configuration.
    pub fn with_audio(mut self, audio: AudioConfig) -> Self {
        self.audio = audio;
        self
    }

    /// Enable or disable the deprecated non-MP3 audio carrier. Disabling
    /// removes the codec from the capability set entirely; extraction from
    /// legacy files then reports `EmbedderUnavailable`.
    pub fn with_legacy_audio(mut self, legacy_audio: bool) -> Self {
        self.legacy_audio = legacy_audio;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            redundant_watermarks: 3,
            frequency: FrequencyConfig::default(),
            audio: AudioConfig::default(),
            legacy_audio: true,
        }
    }
}

/// Structured verification result.
///
/// Extraction failure on a clean file is a *result* (`watermark_found:
/// false`), not an error; only caller mistakes and registry outages
/// surface as `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    /// Whether a watermark was extracted and parsed.
    pub verified: bool,
    /// Whether any carrier produced a watermark.
    pub watermark_found: bool,
    /// The recomputed watermark hash, when found.
    pub watermark_hash: Option<String>,
    /// Whether the registry holds a record for the hash.
    #[serde(rename = "match")]
    pub matched: bool,
    /// Raw registry response data.
    pub registry_data: Option<Value>,
    /// The parsed payload record, when found.
    pub payload: Option<WatermarkPayload>,
    /// Human-readable outcome.
    pub message: String,
}

impl VerificationReport {
    fn not_found(message: String) -> Self {
        Self {
            verified: false,
            watermark_found: false,
            watermark_hash: None,
            matched: false,
            registry_data: None,
            payload: None,
            message,
        }
    }
}

/// The multi-format watermarking engine.
///
/// See the [module docs](self) for the layer plans and probe orders.
pub struct Engine {
    config: EngineConfig,
    frequency: Option<FrequencyEmbedder>,
    lsb: Option<LsbEmbedder>,
    container: Option<MetadataEmbedder>,
    audio: Option<AudioEmbedder>,
    mp3: Option<Mp3TagEmbedder>,
    pdf: Option<PdfEmbedder>,
    registry: Box<dyn HashRegistry>,
}

impl Engine {
    /// Build an engine, constructing every enabled codec up front.
    pub fn new(config: EngineConfig) -> Self {
        let audio = config
            .legacy_audio
            .then(|| AudioEmbedder::new(config.audio.clone()));
        Self {
            frequency: Some(FrequencyEmbedder::new(config.frequency.clone())),
            lsb: Some(LsbEmbedder),
            container: Some(MetadataEmbedder),
            audio,
            mp3: Some(Mp3TagEmbedder),
            pdf: Some(PdfEmbedder),
            registry: Box::new(MockRegistry),
            config,
        }
    }

    /// Replace the provenance registry used by [`verify`](Self::verify).
    pub fn with_registry(mut self, registry: Box<dyn HashRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Build the payload record, embed it through the media type's layer
    /// plan, and return the watermarked bytes plus the watermark hash.
    ///
    /// The reader is left at offset 0 on success and failure.
    pub fn embed<R: Read + Seek>(
        &self,
        source: &mut R,
        media_type: MediaType,
        extension: &str,
        user_id: &str,
        metadata: &Map<String, Value>,
        license: &str,
    ) -> Result<(Vec<u8>, String), WatermarkError> {
        let outcome = self.embed_inner(source, media_type, extension, user_id, metadata, license);
        source.seek(SeekFrom::Start(0))?;
        outcome
    }

    fn embed_inner<R: Read + Seek>(
        &self,
        source: &mut R,
        media_type: MediaType,
        extension: &str,
        user_id: &str,
        metadata: &Map<String, Value>,
        license: &str,
    ) -> Result<(Vec<u8>, String), WatermarkError> {
        validate::validate_extension(media_type, extension)?;
        validate::validate_size(source, self.config.max_file_size)?;

        let content_hash = hashing::hash_reader(source)?;
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;

        let record = WatermarkPayload {
            user_id: user_id.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            metadata_hash: payload::metadata_hash(metadata),
            content_hash,
            license: license.to_string(),
        };
        let watermark_hash = record.watermark_hash();
        let encoded = record.to_canonical_json().into_bytes();

        let output = match media_type {
            MediaType::Image => self.embed_image_layers(&bytes, extension, &encoded)?,
            MediaType::Audio if extension.eq_ignore_ascii_case(".mp3") => self
                .mp3
                .as_ref()
                .ok_or_else(|| {
                    WatermarkError::EmbedderUnavailable("MP3 tag carrier disabled".into())
                })?
                .embed(&bytes, &encoded)?,
            MediaType::Audio => {
                let audio = self.audio.as_ref().ok_or_else(|| {
                    WatermarkError::EmbedderUnavailable(
                        "legacy audio carrier disabled; convert to MP3".into(),
                    )
                })?;
                audio.embed(&bytes, &encoded, Some(&watermark_hash))?
            }
            MediaType::Pdf => self
                .pdf
                .as_ref()
                .ok_or_else(|| {
                    WatermarkError::EmbedderUnavailable("PDF carrier disabled".into())
                })?
                .embed(&bytes, &encoded)?,
        };

        Ok((output, watermark_hash))
    }

    /// Apply the redundant image layers. Layer failures are non-fatal; the
    /// embed only fails when no layer produced output.
    fn embed_image_layers(
        &self,
        bytes: &[u8],
        extension: &str,
        encoded: &[u8],
    ) -> Result<Vec<u8>, WatermarkError> {
        let mut current: Option<Vec<u8>> = None;

        if let Some(frequency) = &self.frequency {
            if frequency.supports(extension) {
                match frequency.embed(bytes, encoded) {
                    Ok(out) => {
                        debug!("frequency layer embedded");
                        current = Some(out);
                    }
                    Err(e) => warn!("frequency layer failed: {e}"),
                }
            }
        }

        if self.config.redundant_watermarks > 1 {
            if let Some(lsb) = &self.lsb {
                let interim = current.as_deref().unwrap_or(bytes);
                match to_png(interim).and_then(|png| lsb.embed(&png, encoded)) {
                    Ok(out) => {
                        debug!("LSB layer embedded");
                        current = Some(out);
                    }
                    Err(e) => warn!("LSB layer failed: {e}"),
                }
            }
        }

        if let Some(container) = &self.container {
            if container.supports(extension) {
                let interim = current.as_deref().unwrap_or(bytes);
                match container.embed(interim, encoded) {
                    Ok(out) => {
                        debug!("container metadata layer embedded");
                        current = Some(out);
                    }
                    Err(e) => warn!("container metadata layer failed: {e}"),
                }
            }
        }

        current.ok_or_else(|| {
            WatermarkError::EmbedderUnavailable(
                "no image watermarking layer produced output".into(),
            )
        })
    }

    /// Extract the embedded payload bytes, probing carriers in recovery
    /// order. The reader is left at offset 0 on success and failure.
    pub fn extract<R: Read + Seek>(
        &self,
        source: &mut R,
        media_type: MediaType,
        extension: &str,
        personalization: Option<&str>,
    ) -> Result<Vec<u8>, WatermarkError> {
        let outcome = self.extract_inner(source, media_type, extension, personalization);
        source.seek(SeekFrom::Start(0))?;
        outcome
    }

    fn extract_inner<R: Read + Seek>(
        &self,
        source: &mut R,
        media_type: MediaType,
        extension: &str,
        personalization: Option<&str>,
    ) -> Result<Vec<u8>, WatermarkError> {
        validate::validate_extension(media_type, extension)?;
        validate::validate_size(source, self.config.max_file_size)?;
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;

        match media_type {
            MediaType::Image => self.extract_image(&bytes, extension),
            MediaType::Audio if extension.eq_ignore_ascii_case(".mp3") => self
                .mp3
                .as_ref()
                .ok_or_else(|| {
                    WatermarkError::EmbedderUnavailable("MP3 tag carrier disabled".into())
                })?
                .extract(&bytes),
            MediaType::Audio => self.extract_audio_legacy(&bytes, personalization),
            MediaType::Pdf => self
                .pdf
                .as_ref()
                .ok_or_else(|| {
                    WatermarkError::EmbedderUnavailable("PDF carrier disabled".into())
                })?
                .extract(&bytes),
        }
    }

    fn extract_image(&self, bytes: &[u8], extension: &str) -> Result<Vec<u8>, WatermarkError> {
        let mut failures: Vec<String> = Vec::new();

        if let Some(container) = &self.container {
            if container.supports(extension) {
                match container.extract(bytes) {
                    Ok(data) if !data.is_empty() => return Ok(data),
                    Ok(_) => failures.push("metadata: empty result".into()),
                    Err(e) => failures.push(format!("metadata: {e}")),
                }
            }
        }

        if let Some(frequency) = &self.frequency {
            if frequency.supports(extension) {
                match frequency.extract(bytes) {
                    Ok(data) if !data.is_empty() => return Ok(data),
                    Ok(_) => failures.push("frequency: empty result".into()),
                    Err(e) => failures.push(format!("frequency: {e}")),
                }
            }
        }

        if let Some(lsb) = &self.lsb {
            match to_png(bytes).and_then(|png| lsb.extract(&png)) {
                Ok(data) if !data.is_empty() => return Ok(data),
                Ok(_) => failures.push("lsb: empty result".into()),
                Err(e) => failures.push(format!("lsb: {e}")),
            }
        }

        Err(WatermarkError::NoWatermarkFound(failures.join("; ")))
    }

    /// Probe the legacy audio carrier across the personalization variants
    /// known to exist in the wild.
    fn extract_audio_legacy(
        &self,
        bytes: &[u8],
        personalization: Option<&str>,
    ) -> Result<Vec<u8>, WatermarkError> {
        let audio = self.audio.as_ref().ok_or_else(|| {
            WatermarkError::EmbedderUnavailable(
                "legacy audio carrier disabled; convert to MP3".into(),
            )
        })?;

        let mut probes: Vec<Option<String>> = Vec::new();
        if let Some(label) = personalization {
            probes.push(Some(label.to_string()));
        }
        probes.push(None);
        probes.push(Some(String::new()));
        probes.push(Some("0".repeat(64)));
        probes.push(Some("f".repeat(64)));

        let mut failures: Vec<String> = Vec::new();
        for probe in &probes {
            match audio.extract(bytes, probe.as_deref()) {
                Ok(data) => return Ok(data),
                Err(e) => failures.push(e.to_string()),
            }
        }

        let summary = failures
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        Err(WatermarkError::NoWatermarkFound(format!(
            "tried {} personalization probes ({summary})",
            probes.len()
        )))
    }

    /// Extract, re-parse and re-hash in one step without touching the
    /// registry. This is the offline half of [`verify`](Self::verify).
    pub fn inspect<R: Read + Seek>(
        &self,
        source: &mut R,
        media_type: MediaType,
        extension: &str,
    ) -> Result<(WatermarkPayload, String), WatermarkError> {
        let bytes = self.extract(source, media_type, extension, None)?;
        let record = WatermarkPayload::from_slice(&bytes)?;
        let hash = record.watermark_hash();
        Ok((record, hash))
    }

    /// Extract the watermark, recompute its hash, and check the registry.
    ///
    /// Returns a structured report in every "no watermark" outcome; only
    /// I/O, validation and registry failures surface as errors. The reader
    /// is left at offset 0 either way.
    pub async fn verify<R: Read + Seek>(
        &self,
        source: &mut R,
        media_type: MediaType,
        extension: &str,
    ) -> Result<VerificationReport, WatermarkError> {
        let outcome = self.verify_inner(source, media_type, extension).await;
        source.seek(SeekFrom::Start(0))?;
        outcome
    }

    async fn verify_inner<R: Read + Seek>(
        &self,
        source: &mut R,
        media_type: MediaType,
        extension: &str,
    ) -> Result<VerificationReport, WatermarkError> {
        let bytes = match self.extract(source, media_type, extension, None) {
            Ok(bytes) => bytes,
            Err(e @ WatermarkError::NoWatermarkFound(_)) => {
                return Ok(VerificationReport::not_found(format!(
                    "no watermark found in file: {e}"
                )));
            }
            Err(
                e @ (WatermarkError::FormatUnsupported(_)
                | WatermarkError::EmbedderUnavailable(_)
                | WatermarkError::InvalidPayloadFormat(_)),
            ) => {
                return Ok(VerificationReport::not_found(format!(
                    "watermark extraction error: {e}"
                )));
            }
            Err(other) => return Err(other),
        };

        let record = match WatermarkPayload::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                return Ok(VerificationReport::not_found(format!(
                    "watermark extraction error: {e}"
                )));
            }
        };

        let hash = record.watermark_hash();
        let response = self.registry.verify_hash(&hash).await?;
        let matched = response.success && response.exists();

        let message = if matched {
            "watermark verified - provenance record found in registry".to_string()
        } else if response.is_mock_mode() {
            format!(
                "watermark found in file; registry is in mock mode and records are \
                 minted by the host. The watermark hash is: {hash}"
            )
        } else {
            format!(
                "watermark found in file, but no provenance record in the registry. \
                 Watermark hash: {hash}"
            )
        };

        Ok(VerificationReport {
            verified: true,
            watermark_found: true,
            watermark_hash: Some(hash),
            matched,
            registry_data: response.data,
            payload: Some(record),
            message,
        })
    }

    /// Compute the watermark hash of a payload record.
    pub fn hash_payload(&self, record: &WatermarkPayload) -> String {
        record.watermark_hash()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Convert raster bytes to an RGB PNG; PNG input passes through untouched.
fn to_png(bytes: &[u8]) -> Result<Vec<u8>, WatermarkError> {
    const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];
    if bytes.starts_with(&PNG_SIGNATURE) {
        return Ok(bytes.to_vec());
    }

    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, image::ImageFormat::Png)?;
    Ok(out.into_inner())
}
