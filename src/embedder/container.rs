//! Container-metadata watermarking for JPEG, TIFF and PNG.
//!
//! The payload is stored in the container's own text metadata so it
//! survives any edit that rewrites pixels but copies metadata:
//!
//! - **JPEG / TIFF**: EXIF `UserComment` (tag 37510) carries the base64
//!   payload (truncated to 2000 characters); `ImageDescription` (tag 270)
//!   carries a `WM:`-prefixed short form. All other EXIF entries are
//!   preserved.
//! - **PNG**: one or more uncompressed `tEXt` chunks keyed `WMHash`,
//!   `WMHash1`, `WMHash2`, … each carry up to 2000 base64 characters. The
//!   chunks are spliced in directly before the `IEND` chunk with correct
//!   CRC-32 values; every existing chunk is kept byte-for-byte.
//!
//! Routing is by content sniffing, not extension: a PNG renamed to `.jpg`
//! still gets PNG chunks.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use little_exif::exif_tag::ExifTag;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use log::debug;

use crate::error::WatermarkError;

/// Keyword prefix for PNG text chunks and the EXIF description.
const TAG_PREFIX: &str = "WM";

/// Base keyword for PNG text chunks.
const HASH_TAG: &str = "WMHash";

/// Maximum characters per UserComment / PNG chunk.
const CHUNK_CHARS: usize = 2000;

/// Maximum characters mirrored into ImageDescription.
const DESCRIPTION_CHARS: usize = 500;

/// Extensions this carrier accepts.
const SUPPORTED_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".tiff", ".tif"];

/// PNG signature.
const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Container families this embedder can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Jpeg,
    Png,
    Tiff,
}

/// Stateless metadata watermarker.
pub struct MetadataEmbedder;

impl MetadataEmbedder {
    /// Whether this carrier accepts the given file extension.
    pub fn supports(&self, extension: &str) -> bool {
        SUPPORTED_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str())
    }

    /// Write the payload into the container's text metadata.
    ///
    /// # Errors
    ///
    /// [`WatermarkError::FormatUnsupported`] when the bytes are not JPEG,
    /// PNG or TIFF, or the metadata rewrite fails.
    pub fn embed(&self, bytes: &[u8], payload: &[u8]) -> Result<Vec<u8>, WatermarkError> {
        let encoded = BASE64.encode(payload);
        match sniff(bytes)? {
            Container::Png => embed_png(bytes, &encoded),
            Container::Jpeg => embed_exif(bytes, &encoded, FileExtension::JPEG),
            Container::Tiff => embed_exif(bytes, &encoded, FileExtension::TIFF),
        }
    }

    /// Read the payload back out of the container's text metadata.
    ///
    /// # Errors
    ///
    /// [`WatermarkError::NoWatermarkFound`] when no watermark tag is
    /// present.
    pub fn extract(&self, bytes: &[u8]) -> Result<Vec<u8>, WatermarkError> {
        match sniff(bytes)? {
            Container::Png => extract_png(bytes),
            Container::Jpeg => extract_exif(bytes, FileExtension::JPEG),
            Container::Tiff => extract_exif(bytes, FileExtension::TIFF),
        }
    }
}

fn sniff(bytes: &[u8]) -> Result<Container, WatermarkError> {
    if bytes.starts_with(&PNG_SIGNATURE) {
        Ok(Container::Png)
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Ok(Container::Jpeg)
    } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        Ok(Container::Tiff)
    } else {
        Err(WatermarkError::FormatUnsupported(
            "metadata carrier needs JPEG, PNG or TIFF bytes".into(),
        ))
    }
}

// ---------------------------------------------------------------------------
// EXIF (JPEG / TIFF)
// ---------------------------------------------------------------------------

fn embed_exif(
    bytes: &[u8],
    encoded: &str,
    file_type: FileExtension,
) -> Result<Vec<u8>, WatermarkError> {
    let source = bytes.to_vec();
    // Files without an EXIF segment start from an empty tag set.
    let mut metadata = Metadata::new_from_vec(&source, file_type).unwrap_or_else(|_| {
        debug!("no existing EXIF segment, creating one");
        Metadata::new()
    });

    let comment = truncate_chars(encoded, CHUNK_CHARS);
    metadata.set_tag(ExifTag::UserComment(comment.as_bytes().to_vec()));

    let description = format!(
        "{TAG_PREFIX}:{}",
        truncate_chars(encoded, DESCRIPTION_CHARS)
    );
    metadata.set_tag(ExifTag::ImageDescription(description));

    let mut out = bytes.to_vec();
    metadata
        .write_to_vec(&mut out, file_type)
        .map_err(|e| WatermarkError::FormatUnsupported(format!("EXIF write failed: {e}")))?;
    Ok(out)
}

fn extract_exif(bytes: &[u8], file_type: FileExtension) -> Result<Vec<u8>, WatermarkError> {
    let source = bytes.to_vec();
    let metadata = Metadata::new_from_vec(&source, file_type).map_err(|e| {
        WatermarkError::NoWatermarkFound(format!("no readable EXIF metadata: {e}"))
    })?;

    let mut text: Option<String> = None;

    if let Some(ExifTag::UserComment(data)) = metadata
        .get_tag(&ExifTag::UserComment(Vec::new()))
        .next()
    {
        let trimmed = strip_comment_charset(data);
        if !trimmed.is_empty() {
            text = Some(String::from_utf8_lossy(trimmed).into_owned());
        }
    }

    if text.is_none() {
        if let Some(ExifTag::ImageDescription(description)) = metadata
            .get_tag(&ExifTag::ImageDescription(String::new()))
            .next()
        {
            if let Some(rest) = description.strip_prefix(TAG_PREFIX) {
                text = rest.strip_prefix(':').map(str::to_owned);
            }
        }
    }

    match text {
        Some(text) => Ok(decode_recovered_text(&text)),
        None => Err(WatermarkError::NoWatermarkFound(
            "no watermark tag in EXIF metadata".into(),
        )),
    }
}

/// Drop the 8-byte EXIF UserComment character-set prefix when present, and
/// trailing NUL padding either way.
fn strip_comment_charset(data: &[u8]) -> &[u8] {
    let body = if data.starts_with(b"ASCII\0\0\0")
        || data.starts_with(b"UNICODE\0")
        || data.starts_with(&[0u8; 8])
    {
        &data[8..]
    } else {
        data
    };
    let end = body
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    &body[..end]
}

// ---------------------------------------------------------------------------
// PNG text chunks
// ---------------------------------------------------------------------------

fn embed_png(bytes: &[u8], encoded: &str) -> Result<Vec<u8>, WatermarkError> {
    let iend_start = find_iend_chunk(bytes)?;

    let mut injected = Vec::new();
    for (index, piece) in encoded.as_bytes().chunks(CHUNK_CHARS).enumerate() {
        let keyword = if index == 0 {
            HASH_TAG.to_string()
        } else {
            format!("{HASH_TAG}{index}")
        };
        injected.extend(build_text_chunk(keyword.as_bytes(), piece));
    }

    let mut out = Vec::with_capacity(bytes.len() + injected.len());
    out.extend_from_slice(&bytes[..iend_start]);
    out.extend_from_slice(&injected);
    out.extend_from_slice(&bytes[iend_start..]);
    Ok(out)
}

/// Serialize one `tEXt` chunk: length, type, keyword NUL text, CRC-32 over
/// type + data.
fn build_text_chunk(keyword: &[u8], text: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(keyword.len() + 1 + text.len());
    data.extend_from_slice(keyword);
    data.push(0);
    data.extend_from_slice(text);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(b"tEXt");
    hasher.update(&data);

    let mut chunk = Vec::with_capacity(12 + data.len());
    chunk.extend_from_slice(&(data.len() as u32).to_be_bytes());
    chunk.extend_from_slice(b"tEXt");
    chunk.extend_from_slice(&data);
    chunk.extend_from_slice(&hasher.finalize().to_be_bytes());
    chunk
}

fn extract_png(bytes: &[u8]) -> Result<Vec<u8>, WatermarkError> {
    let mut pieces: Vec<(usize, String)> = Vec::new();

    for chunk in iterate_chunks(bytes) {
        if &chunk.kind != b"tEXt" {
            continue;
        }
        let Some(null_pos) = chunk.data.iter().position(|&b| b == 0) else {
            continue;
        };
        let keyword = String::from_utf8_lossy(&chunk.data[..null_pos]);
        let Some(suffix) = keyword.strip_prefix(HASH_TAG) else {
            continue;
        };
        let index = if suffix.is_empty() {
            0
        } else {
            match suffix.parse::<usize>() {
                Ok(n) => n,
                Err(_) => continue,
            }
        };
        let text = String::from_utf8_lossy(&chunk.data[null_pos + 1..]).into_owned();
        pieces.push((index, text));
    }

    if pieces.is_empty() {
        return Err(WatermarkError::NoWatermarkFound(
            "no watermark text chunks in PNG".into(),
        ));
    }

    pieces.sort_by_key(|(index, _)| *index);
    let combined: String = pieces.into_iter().map(|(_, text)| text).collect();
    Ok(decode_recovered_text(&combined))
}

/// Recovered text is base64 when we wrote it; tolerate older producers
/// that stored a JSON string or raw text.
fn decode_recovered_text(text: &str) -> Vec<u8> {
    if let Ok(decoded) = BASE64.decode(text.trim()) {
        return decoded;
    }
    if let Ok(serde_json::Value::String(inner)) = serde_json::from_str::<serde_json::Value>(text) {
        return inner.into_bytes();
    }
    text.as_bytes().to_vec()
}

struct Chunk<'a> {
    kind: [u8; 4],
    data: &'a [u8],
}

fn iterate_chunks(bytes: &[u8]) -> impl Iterator<Item = Chunk<'_>> {
    let mut pos = PNG_SIGNATURE.len();
    std::iter::from_fn(move || {
        if pos + 8 > bytes.len() {
            return None;
        }
        let length =
            u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
                as usize;
        let kind = [bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]];
        let data_start = pos + 8;
        let data_end = data_start.checked_add(length)?;
        if data_end + 4 > bytes.len() {
            return None;
        }

        let chunk = Chunk {
            kind,
            data: &bytes[data_start..data_end],
        };
        pos = data_end + 4;
        if &kind == b"IEND" { None } else { Some(chunk) }
    })
}

/// Locate the offset of the `IEND` chunk (its length field).
fn find_iend_chunk(bytes: &[u8]) -> Result<usize, WatermarkError> {
    if !bytes.starts_with(&PNG_SIGNATURE) {
        return Err(WatermarkError::FormatUnsupported("invalid PNG stream".into()));
    }

    let mut pos = PNG_SIGNATURE.len();
    while pos + 8 <= bytes.len() {
        let length =
            u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
                as usize;
        if &bytes[pos + 4..pos + 8] == b"IEND" {
            return Ok(pos);
        }
        pos = match pos.checked_add(12 + length) {
            Some(next) if next <= bytes.len() => next,
            _ => break,
        };
    }

    Err(WatermarkError::FormatUnsupported(
        "PNG stream has no IEND chunk".into(),
    ))
}

/// Truncate on a character boundary.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
