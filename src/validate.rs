//! Upload validation: media types, extension allow-lists, size limits.

use std::io::{Read, Seek, SeekFrom};

use crate::error::WatermarkError;

/// Extensions accepted for still images.
pub const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".bmp", ".tiff"];

/// Extensions accepted for audio. `.mp3` is the supported path; anything
/// else is the legacy frequency-domain carrier.
pub const AUDIO_EXTENSIONS: [&str; 1] = [".mp3"];

/// Extensions accepted for documents.
pub const PDF_EXTENSIONS: [&str; 1] = [".pdf"];

/// The three media families the engine routes between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    /// Still images: JPEG, PNG, BMP, TIFF.
    Image,
    /// Audio: MP3 (tag carrier) or legacy PCM formats (DCT carrier).
    Audio,
    /// PDF documents.
    Pdf,
}

impl MediaType {
    /// Classify a file by extension (leading dot, case-insensitive).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tidemark::MediaType;
    ///
    /// assert_eq!(MediaType::from_extension(".PNG"), Some(MediaType::Image));
    /// assert_eq!(MediaType::from_extension(".mp3"), Some(MediaType::Audio));
    /// assert_eq!(MediaType::from_extension(".txt"), None);
    /// ```
    pub fn from_extension(extension: &str) -> Option<Self> {
        let ext = extension.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaType::Image)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) || is_legacy_audio_extension(&ext) {
            Some(MediaType::Audio)
        } else if PDF_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaType::Pdf)
        } else {
            None
        }
    }

    /// Human-readable name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Audio => "audio",
            MediaType::Pdf => "pdf",
        }
    }
}

/// Legacy PCM audio extensions reachable through the deprecated
/// frequency-domain path.
pub fn is_legacy_audio_extension(extension: &str) -> bool {
    matches!(
        extension.to_ascii_lowercase().as_str(),
        ".wav" | ".flac" | ".ogg" | ".m4a" | ".aac"
    )
}

/// Check that `extension` is allowed for `media_type`.
///
/// Legacy audio extensions pass here; the engine decides separately whether
/// the legacy carrier is enabled.
pub fn validate_extension(media_type: MediaType, extension: &str) -> Result<(), WatermarkError> {
    let ext = extension.to_ascii_lowercase();
    let allowed = match media_type {
        MediaType::Image => IMAGE_EXTENSIONS.contains(&ext.as_str()),
        MediaType::Audio => {
            AUDIO_EXTENSIONS.contains(&ext.as_str()) || is_legacy_audio_extension(&ext)
        }
        MediaType::Pdf => PDF_EXTENSIONS.contains(&ext.as_str()),
    };

    if allowed {
        Ok(())
    } else {
        Err(WatermarkError::FileValidation(format!(
            "file type {ext} not allowed for {}",
            media_type.name()
        )))
    }
}

/// Check the source length against `max_size`, leaving the cursor at 0.
pub fn validate_size<R: Read + Seek>(
    source: &mut R,
    max_size: u64,
) -> Result<u64, WatermarkError> {
    let size = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(0))?;

    if size > max_size {
        return Err(WatermarkError::FileValidation(format!(
            "file size {size} bytes exceeds maximum allowed size of {max_size} bytes"
        )));
    }
    Ok(size)
}
