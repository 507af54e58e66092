//! # Tidemark - Multi-Format Provenance Watermarking
//!
//! Tidemark embeds a cryptographic provenance tag into still images, audio
//! files and PDF documents, and recovers it later even after common
//! re-encoding, cropping, drawing and metadata-stripping edits. A caller
//! supplies the original bytes plus a user identifier, a license string
//! and optional metadata; the engine returns watermarked bytes together
//! with a deterministic watermark hash that acts as the lookup key against
//! an external provenance registry.
//!
//! ## Key Features
//!
//! - **Layered image marking**: frequency-domain DCT/QIM, pixel LSB and
//!   container metadata carriers applied redundantly, probed in recovery
//!   order during extraction
//! - **Audio carriers**: ID3v2 tags for MP3; a legacy block-DCT/QIM
//!   carrier with sync framing and adaptive extraction for PCM audio
//! - **PDF marking**: payload keys woven into the Info dictionary with the
//!   page tree byte-preserved
//! - **Stable identity**: the watermark hash covers only the fields that
//!   survive edits, so the registry key outlives pixel changes
//!
//! ## Quick Start
//!
//! ```no_run
//! use serde_json::{Map, Value};
//! use tidemark::{embed_bytes, extract_bytes, MediaType, WatermarkPayload};
//!
//! let original = std::fs::read("photo.png")?;
//! let mut metadata = Map::new();
//! metadata.insert("license".into(), Value::from("CC-BY"));
//!
//! let (marked, watermark_hash) = embed_bytes(
//!     &original,
//!     MediaType::Image,
//!     ".png",
//!     "alice",
//!     &metadata,
//!     "CC-BY",
//! )?;
//! std::fs::write("photo.marked.png", &marked)?;
//!
//! let recovered = extract_bytes(&marked, MediaType::Image, ".png")?;
//! let payload = WatermarkPayload::from_slice(&recovered)?;
//! assert_eq!(payload.watermark_hash(), watermark_hash);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Engine API
//!
//! The slice helpers above wrap a default [`Engine`]. Hosts that want
//! custom carrier parameters, a redundancy policy, or a real registry
//! construct the engine themselves:
//!
//! ```rust
//! use tidemark::{Engine, EngineConfig};
//! use tidemark::embedder::audio::AudioConfig;
//!
//! let engine = Engine::new(
//!     EngineConfig::default()
//!         .with_redundant_watermarks(2)
//!         .with_audio(AudioConfig::default().with_alpha(0.07)),
//! );
//! # let _ = engine;
//! ```
//!
//! [`Engine::verify`] additionally consults the configured
//! [`HashRegistry`] and produces a structured [`VerificationReport`]
//! instead of erroring when no watermark is present.

pub mod dct;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod framing;
pub mod hashing;
pub mod payload;
pub mod registry;
pub mod validate;

pub use engine::{DEFAULT_MAX_FILE_SIZE, Engine, EngineConfig, VerificationReport};
pub use error::WatermarkError;
pub use payload::{WatermarkPayload, metadata_hash};
pub use registry::{HashRegistry, MockRegistry, RegistryRecord, RegistryResponse};
pub use validate::MediaType;

use serde_json::{Map, Value};

/// Embed a watermark into in-memory file bytes using a default engine.
///
/// Returns the watermarked bytes and the watermark hash. See
/// [`Engine::embed`] for the layer plans per media type.
///
/// # Examples
///
/// ```no_run
/// use serde_json::Map;
/// use tidemark::{embed_bytes, MediaType};
///
/// let original = std::fs::read("track.mp3")?;
/// let (marked, hash) = embed_bytes(
///     &original,
///     MediaType::Audio,
///     ".mp3",
///     "alice",
///     &Map::new(),
///     "CC-BY",
/// )?;
/// # let _ = (marked, hash);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn embed_bytes(
    data: &[u8],
    media_type: MediaType,
    extension: &str,
    user_id: &str,
    metadata: &Map<String, Value>,
    license: &str,
) -> Result<(Vec<u8>, String), WatermarkError> {
    let mut source = std::io::Cursor::new(data.to_vec());
    Engine::default().embed(&mut source, media_type, extension, user_id, metadata, license)
}

/// Extract the embedded payload bytes from in-memory file bytes using a
/// default engine.
///
/// The result is the canonical payload serialization; parse it with
/// [`WatermarkPayload::from_slice`].
pub fn extract_bytes(
    data: &[u8],
    media_type: MediaType,
    extension: &str,
) -> Result<Vec<u8>, WatermarkError> {
    let mut source = std::io::Cursor::new(data.to_vec());
    Engine::default().extract(&mut source, media_type, extension, None)
}
