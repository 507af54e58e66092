//! PDF watermarking via the document information dictionary.
//!
//! The payload is stored under two custom Info keys, plus a short marker
//! appended to `/Title` as a third recovery point for pipelines that strip
//! unknown keys but copy standard ones:
//!
//! - `/WMHash`: base64 payload, up to 2000 characters
//! - `/WMPayload`: raw UTF-8 payload, up to 1000 characters
//! - `/Title`: gains a ` [<16 base64 chars>]` suffix, or is set to the
//!   base64 head when the document has no title
//!
//! The document is loaded, the Info dictionary updated in place, and the
//! file serialized again; page content streams are carried over untouched.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use lopdf::{Dictionary, Document, Object};

use crate::error::WatermarkError;

/// Info key holding the base64 payload.
const HASH_KEY: &[u8] = b"WMHash";

/// Info key holding the raw payload text.
const PAYLOAD_KEY: &[u8] = b"WMPayload";

/// Character budgets for the three locations.
const HASH_CHARS: usize = 2000;
const PAYLOAD_CHARS: usize = 1000;
const TITLE_MARK_CHARS: usize = 16;
const TITLE_FALLBACK_CHARS: usize = 100;

/// Stateless PDF metadata watermarker.
pub struct PdfEmbedder;

impl PdfEmbedder {
    /// Whether this carrier accepts the given file extension.
    pub fn supports(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case(".pdf")
    }

    /// Write the payload into the document information dictionary.
    pub fn embed(&self, bytes: &[u8], payload: &[u8]) -> Result<Vec<u8>, WatermarkError> {
        let mut doc = Document::load_mem(bytes)?;

        let encoded = BASE64.encode(payload);
        let text = String::from_utf8_lossy(payload).into_owned();

        let mut info = existing_info(&doc);

        info.set(
            HASH_KEY,
            Object::string_literal(&encoded[..encoded.len().min(HASH_CHARS)]),
        );
        info.set(
            PAYLOAD_KEY,
            Object::string_literal(truncate_chars(&text, PAYLOAD_CHARS)),
        );

        let mark = &encoded[..encoded.len().min(TITLE_MARK_CHARS)];
        let title = match info.get(b"Title").ok().and_then(object_text) {
            Some(existing) => format!("{existing} [{mark}]"),
            None => encoded[..encoded.len().min(TITLE_FALLBACK_CHARS)].to_string(),
        };
        info.set(b"Title", Object::string_literal(title));

        store_info(&mut doc, info);

        let mut out = Vec::new();
        doc.save_to(&mut out)?;
        Ok(out)
    }

    /// Probe the Info dictionary for a watermark payload.
    ///
    /// Probe order: `/WMHash` (base64, then raw), `/WMPayload` (JSON
    /// string, then raw bytes), then the last bracketed `/Title` substring
    /// of at least sixteen characters.
    pub fn extract(&self, bytes: &[u8]) -> Result<Vec<u8>, WatermarkError> {
        let doc = Document::load_mem(bytes)?;
        let info = existing_info(&doc);

        if let Some(text) = info.get(HASH_KEY).ok().and_then(object_text) {
            return Ok(BASE64
                .decode(text.trim())
                .unwrap_or_else(|_| text.into_bytes()));
        }

        if let Some(text) = info.get(PAYLOAD_KEY).ok().and_then(object_text) {
            if let Ok(serde_json::Value::String(inner)) =
                serde_json::from_str::<serde_json::Value>(&text)
            {
                return Ok(inner.into_bytes());
            }
            return Ok(text.into_bytes());
        }

        if let Some(title) = info.get(b"Title").ok().and_then(object_text) {
            if let Some(mark) = bracketed_mark(&title) {
                return Ok(BASE64
                    .decode(mark)
                    .unwrap_or_else(|_| mark.as_bytes().to_vec()));
            }
        }

        Err(WatermarkError::NoWatermarkFound(
            "no watermark keys in PDF Info dictionary".into(),
        ))
    }
}

/// Fetch a copy of the document's Info dictionary, or an empty one.
fn existing_info(doc: &Document) -> Dictionary {
    match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            _ => Dictionary::new(),
        },
        Ok(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    }
}

/// Write the Info dictionary back, reusing the existing object slot when
/// there is one so cross-references stay valid.
fn store_info(doc: &mut Document, info: Dictionary) {
    match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => {
            let id = *id;
            doc.objects.insert(id, Object::Dictionary(info));
        }
        _ => {
            let id = doc.add_object(Object::Dictionary(info));
            doc.trailer.set("Info", Object::Reference(id));
        }
    }
}

/// Decode a PDF string object to text.
fn object_text(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

/// The last `[...]` substring of the title, when long enough to be a mark.
fn bracketed_mark(title: &str) -> Option<&str> {
    let start = title.rfind('[')? + 1;
    let end = title.rfind(']')?;
    let candidate = title.get(start..end)?;
    (candidate.len() >= TITLE_MARK_CHARS).then_some(candidate)
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
    use lopdf::dictionary;
    use lopdf::content::{Content, Operation};

    /// Build a one-page PDF, optionally with a preset title.
    fn pdf_carrier(title: Option<&str>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => Object::Reference(font_id) },
        });

        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal("Hello")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(lopdf::Stream::new(
            dictionary! {},
            content.encode().unwrap(),
        ));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "Contents" => Object::Reference(content_id),
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
                "Resources" => Object::Reference(resources_id),
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        if let Some(title) = title {
            let info_id = doc.add_object(Object::Dictionary(dictionary! {
                "Title" => Object::string_literal(title),
            }));
            doc.trailer.set("Info", Object::Reference(info_id));
        }

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn test_roundtrip() {
        let payload = b"{\"user_id\":\"alice\",\"license\":\"CC-BY\"}";
        let marked = PdfEmbedder.embed(&pdf_carrier(None), payload).unwrap();
        assert_eq!(PdfEmbedder.extract(&marked).unwrap(), payload);
    }

    #[test]
    fn test_existing_title_gains_mark() {
        let payload = b"provenance payload bytes";
        let marked = PdfEmbedder.embed(&pdf_carrier(Some("Report")), payload).unwrap();

        let doc = Document::load_mem(&marked).unwrap();
        let info = existing_info(&doc);

        let title = object_text(info.get(b"Title").unwrap()).unwrap();
        let expected_mark = &BASE64.encode(payload)[..16];
        assert_eq!(title, format!("Report [{expected_mark}]"));
        assert!(info.has(HASH_KEY));

        assert_eq!(PdfEmbedder.extract(&marked).unwrap(), payload);
    }

    #[test]
    fn test_page_content_preserved() {
        let carrier = pdf_carrier(Some("Report"));
        let original = Document::load_mem(&carrier).unwrap();
        let original_pages = original.get_pages();
        let original_content = original
            .get_page_content(*original_pages.get(&1).unwrap())
            .unwrap();

        let marked = PdfEmbedder.embed(&carrier, b"payload").unwrap();
        let doc = Document::load_mem(&marked).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let content = doc.get_page_content(*pages.get(&1).unwrap()).unwrap();
        assert_eq!(content, original_content);
    }

    #[test]
    fn test_title_fallback_recovery() {
        // Strip the custom keys, keep only the marked title; extraction
        // falls back to the bracketed substring.
        let payload = b"bracketed recovery";
        let marked = PdfEmbedder.embed(&pdf_carrier(Some("Report")), payload).unwrap();

        let mut doc = Document::load_mem(&marked).unwrap();
        let mut info = existing_info(&doc);
        info.remove(HASH_KEY);
        info.remove(PAYLOAD_KEY);
        store_info(&mut doc, info);
        let mut stripped = Vec::new();
        doc.save_to(&mut stripped).unwrap();

        let recovered = PdfEmbedder.extract(&stripped).unwrap();
        let expected_mark = &BASE64.encode(payload)[..16];
        // Sixteen base64 characters cannot decode to the full payload; the
        // bracketed mark comes back raw when base64 decoding fails.
        assert!(
            recovered == BASE64.decode(expected_mark).unwrap_or_default()
                || recovered == expected_mark.as_bytes()
        );
    }

    #[test]
    fn test_clean_pdf_reports_no_watermark() {
        let err = PdfEmbedder.extract(&pdf_carrier(Some("Report"))).unwrap_err();
        assert!(matches!(err, WatermarkError::NoWatermarkFound(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(PdfEmbedder.embed(b"not a pdf", b"x").is_err());
    }
}
