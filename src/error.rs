//! # Error types for watermarking operations
//!
//! This module defines the error type shared by every embedder and by the
//! orchestrating engine. The variants mirror the failure surface a caller
//! actually has to handle: validation rejections, missing codecs, carriers
//! that are too small, and the "nothing recoverable" outcome of extraction.
//!
//! ## Error Handling Patterns
//!
//! ```rust
//! use tidemark::{extract_bytes, MediaType, WatermarkError};
//!
//! # let data = vec![0u8; 4];
//! match extract_bytes(&data, MediaType::Image, ".png") {
//!     Ok(payload) => println!("recovered {} bytes", payload.len()),
//!     Err(WatermarkError::NoWatermarkFound(reasons)) => {
//!         println!("no watermark: {reasons}");
//!     }
//!     Err(err) => println!("other error: {err}"),
//! }
//! ```
//!
//! `NoWatermarkFound` is the expected negative result of probing a clean
//! file; everything else indicates a caller or environment problem.

use std::io;
use thiserror::Error;

/// Error type for all watermark embedding, extraction and verification
/// operations.
///
/// # Error Categories
///
/// ## Validation
/// - [`FileValidation`](WatermarkError::FileValidation): extension not
///   allowed for the media type, or size above the configured maximum
/// - [`FormatUnsupported`](WatermarkError::FormatUnsupported): the bytes or
///   extension match no codec for the requested media type
///
/// ## Capability
/// - [`EmbedderUnavailable`](WatermarkError::EmbedderUnavailable): the codec
///   needed by the layer plan is absent from the engine's capability set
///
/// ## Capacity
/// - [`AudioTooShort`](WatermarkError::AudioTooShort): the audio carrier has
///   fewer usable coefficients than the framed payload needs
/// - [`InsufficientCapacity`](WatermarkError::InsufficientCapacity): an image
///   carrier cannot hold the framed payload
/// - [`PayloadTooLarge`](WatermarkError::PayloadTooLarge): the payload
///   exceeds the 16-bit frame length field
///
/// ## Recovery
/// - [`NoWatermarkFound`](WatermarkError::NoWatermarkFound): every probe
///   failed; carries a joined summary of the per-layer reasons
/// - [`InvalidPayloadFormat`](WatermarkError::InvalidPayloadFormat):
///   extracted bytes did not parse back into a payload record
///
/// ## External
/// - [`RegistryFailure`](WatermarkError::RegistryFailure): the provenance
///   registry returned an error while verifying or storing a hash
#[derive(Error, Debug)]
pub enum WatermarkError {
    /// Extension disallowed or file size above the configured maximum.
    #[error("file validation failed: {0}")]
    FileValidation(String),

    /// The given bytes or extension match no embedder for the file type.
    #[error("unsupported format: {0}")]
    FormatUnsupported(String),

    /// A codec required by the layer plan is not present in the engine.
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    /// The audio carrier is too short for the framed payload.
    #[error("audio too short for watermark: need {needed} bits, capacity {capacity}")]
    AudioTooShort {
        /// Bits required by the sync frame.
        needed: usize,
        /// Bits the carrier can hold.
        capacity: usize,
    },

    /// An image carrier cannot hold the framed payload.
    #[error("insufficient capacity: need {needed} bits, have {available}")]
    InsufficientCapacity {
        /// Bits required by the framed payload.
        needed: usize,
        /// Bits the carrier can hold.
        available: usize,
    },

    /// The payload exceeds the 16-bit frame length field (65535 bytes).
    #[error("payload too large for frame (max 65535 bytes)")]
    PayloadTooLarge,

    /// All extraction probes failed or produced non-decoding output.
    ///
    /// The string is a human-readable summary of the underlying per-layer
    /// reasons, joined for diagnostics. It is not machine-consumed.
    #[error("no watermark found: {0}")]
    NoWatermarkFound(String),

    /// Extracted bytes failed to parse as a payload record.
    #[error("invalid payload format: {0}")]
    InvalidPayloadFormat(String),

    /// The external registry reported an error.
    #[error("registry failure: {0}")]
    RegistryFailure(String),

    /// File system or reader I/O failed.
    #[error("I/O failed")]
    Io(#[from] io::Error),

    /// Raster decode or encode failed.
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// PNG stream decoding failed.
    #[error("PNG decoding error: {0}")]
    PngDecoding(#[from] png::DecodingError),

    /// PNG stream re-encoding failed.
    #[error("PNG encoding error: {0}")]
    PngEncoding(#[from] png::EncodingError),

    /// WAV decode or encode failed.
    #[error("WAV codec error: {0}")]
    Wav(#[from] hound::Error),

    /// PDF parse or serialization failed.
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// ID3 tag read or write failed.
    #[error("ID3 error: {0}")]
    Id3(#[from] id3::Error),
}
