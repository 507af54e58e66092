//! MP3 watermarking via ID3v2 text frames.
//!
//! MP3 is lossy, so the payload rides in the tag block instead of the
//! audio: a `COMM` comment frame carries the base64 payload (split into a
//! second frame past 800 characters), and a `USLT` lyrics frame carries a
//! UTF-8 prefix of the payload as redundancy, since tag editors that strip
//! comments often keep lyrics. Tags are written as ID3v2.3 for maximum
//! player compatibility; the audio frames are never touched.
//!
//! The tag library rewrites files in place, so embedding round-trips the
//! bytes through a named temporary file that is removed on every exit
//! path.

use std::io::{Cursor, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use id3::frame::{Comment, Lyrics};
use id3::{Tag, TagLike, Version};

use crate::error::WatermarkError;

/// COMM frame description for the base64 payload.
const PAYLOAD_TAG: &str = "WMPayload";

/// USLT frame description for the UTF-8 redundancy copy.
const HASH_TAG: &str = "WMHash";

/// Characters of base64 per COMM frame.
const COMMENT_CHARS: usize = 800;

/// Characters of UTF-8 payload mirrored into the lyrics frame.
const LYRICS_CHARS: usize = 500;

/// Stateless MP3 tag watermarker.
pub struct Mp3TagEmbedder;

impl Mp3TagEmbedder {
    /// Whether this carrier accepts the given file extension.
    pub fn supports(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case(".mp3")
    }

    /// Add (or replace) the watermark frames in the file's ID3 tag set.
    pub fn embed(&self, bytes: &[u8], payload: &[u8]) -> Result<Vec<u8>, WatermarkError> {
        let encoded = BASE64.encode(payload);
        let text = String::from_utf8_lossy(payload).into_owned();

        // The tag writer works on files; the temp file is deleted when
        // `scratch` drops, including on the error paths below.
        let mut scratch = tempfile::Builder::new()
            .prefix("tidemark-")
            .suffix(".mp3")
            .tempfile()?;
        scratch.write_all(bytes)?;
        scratch.flush()?;

        let mut tag = match Tag::read_from_path(scratch.path()) {
            Ok(tag) => tag,
            Err(e) if matches!(e.kind, id3::ErrorKind::NoTag) => Tag::new(),
            Err(e) => return Err(e.into()),
        };

        tag.add_frame(Comment {
            lang: "eng".into(),
            description: PAYLOAD_TAG.into(),
            text: encoded[..encoded.len().min(COMMENT_CHARS)].into(),
        });
        if encoded.len() > COMMENT_CHARS {
            tag.add_frame(Comment {
                lang: "eng".into(),
                description: format!("{PAYLOAD_TAG}_2"),
                text: encoded[COMMENT_CHARS..encoded.len().min(2 * COMMENT_CHARS)].into(),
            });
        }
        tag.add_frame(Lyrics {
            lang: "eng".into(),
            description: HASH_TAG.into(),
            text: truncate_chars(&text, LYRICS_CHARS).into(),
        });

        tag.write_to_path(scratch.path(), Version::Id3v23)?;
        Ok(std::fs::read(scratch.path())?)
    }

    /// Probe the ID3 tag set for a watermark payload.
    ///
    /// Probe order: the `WMPayload` comment (base64), the `WMHash` lyrics
    /// (raw UTF-8), then the concatenation of every comment whose
    /// description contains `WMPayload`.
    pub fn extract(&self, bytes: &[u8]) -> Result<Vec<u8>, WatermarkError> {
        let tag = match Tag::read_from2(Cursor::new(bytes)) {
            Ok(tag) => tag,
            Err(e) if matches!(e.kind, id3::ErrorKind::NoTag) => {
                return Err(WatermarkError::NoWatermarkFound(
                    "no ID3 tags in MP3 file".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        for comment in tag.comments() {
            if comment.description == PAYLOAD_TAG {
                if let Ok(decoded) = BASE64.decode(comment.text.trim_end_matches('\0')) {
                    return Ok(decoded);
                }
            }
        }

        for lyrics in tag.lyrics() {
            if lyrics.description == HASH_TAG && !lyrics.text.is_empty() {
                return Ok(lyrics.text.clone().into_bytes());
            }
        }

        // Multi-frame payloads: stitch the pieces back together in
        // description order.
        let mut pieces: Vec<(&str, &str)> = tag
            .comments()
            .filter(|c| c.description.contains(PAYLOAD_TAG))
            .map(|c| (c.description.as_str(), c.text.as_str()))
            .collect();
        if !pieces.is_empty() {
            pieces.sort_by_key(|(description, _)| *description);
            let combined: String = pieces.into_iter().map(|(_, text)| text).collect();
            let combined = combined.trim_end_matches('\0').to_string();
            return Ok(BASE64
                .decode(&combined)
                .unwrap_or_else(|_| combined.into_bytes()));
        }

        Err(WatermarkError::NoWatermarkFound(
            "no watermark frames in ID3 tags".into(),
        ))
    }
}

/// Truncate on a character boundary.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A few fake MPEG-1 Layer III frames. The tag library never parses
    /// audio data, so sync words plus padding are enough.
    fn mp3_carrier() -> Vec<u8> {
        let mut bytes = Vec::new();
        for _ in 0..4 {
            bytes.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x44]);
            bytes.extend_from_slice(&[0u8; 413]);
        }
        bytes
    }

    #[test]
    fn test_roundtrip() {
        let payload = b"{\"user_id\":\"alice\",\"license\":\"CC-BY\"}";
        let marked = Mp3TagEmbedder.embed(&mp3_carrier(), payload).unwrap();
        assert_eq!(Mp3TagEmbedder.extract(&marked).unwrap(), payload);
    }

    #[test]
    fn test_audio_frames_untouched() {
        let carrier = mp3_carrier();
        let marked = Mp3TagEmbedder.embed(&carrier, b"payload").unwrap();
        // The new tag is prepended; every original audio byte survives.
        assert!(marked.ends_with(&carrier));
    }

    #[test]
    fn test_long_payload_spans_two_comments() {
        let payload = vec![b'z'; 900]; // base64 length 1200 > 800
        let marked = Mp3TagEmbedder.embed(&mp3_carrier(), &payload).unwrap();

        let tag = Tag::read_from2(Cursor::new(marked.as_slice())).unwrap();
        let descriptions: Vec<&str> = tag.comments().map(|c| c.description.as_str()).collect();
        assert!(descriptions.contains(&"WMPayload"));
        assert!(descriptions.contains(&"WMPayload_2"));

        assert_eq!(Mp3TagEmbedder.extract(&marked).unwrap(), payload);
    }

    #[test]
    fn test_foreign_comment_preserved() {
        // Pre-tag the carrier with an unrelated comment.
        let mut scratch = tempfile::Builder::new().suffix(".mp3").tempfile().unwrap();
        scratch.write_all(&mp3_carrier()).unwrap();
        scratch.flush().unwrap();
        let mut tag = Tag::new();
        tag.add_frame(Comment {
            lang: "eng".into(),
            description: "Notes".into(),
            text: "session notes".into(),
        });
        tag.write_to_path(scratch.path(), Version::Id3v23).unwrap();
        let carrier = std::fs::read(scratch.path()).unwrap();

        let marked = Mp3TagEmbedder.embed(&carrier, b"payload").unwrap();
        let tag = Tag::read_from2(Cursor::new(marked.as_slice())).unwrap();

        let notes = tag
            .comments()
            .find(|c| c.description == "Notes")
            .expect("foreign comment dropped");
        assert_eq!(notes.text, "session notes");
        assert!(tag.comments().any(|c| c.description == PAYLOAD_TAG));
    }

    #[test]
    fn test_untagged_mp3_reports_no_watermark() {
        let err = Mp3TagEmbedder.extract(&mp3_carrier()).unwrap_err();
        assert!(matches!(err, WatermarkError::NoWatermarkFound(_)));
    }

    #[test]
    fn test_lyrics_redundancy_survives_comment_stripping() {
        let payload = b"utf8 payload text";
        let marked = Mp3TagEmbedder.embed(&mp3_carrier(), payload).unwrap();

        // Strip the comment frames, keep the lyrics.
        let mut tag = Tag::read_from2(Cursor::new(marked.as_slice())).unwrap();
        tag.remove("COMM");
        let mut scratch = tempfile::Builder::new().suffix(".mp3").tempfile().unwrap();
        scratch.write_all(&marked).unwrap();
        scratch.flush().unwrap();
        tag.write_to_path(scratch.path(), Version::Id3v23).unwrap();
        let stripped = std::fs::read(scratch.path()).unwrap();

        assert_eq!(Mp3TagEmbedder.extract(&stripped).unwrap(), payload);
    }
}
