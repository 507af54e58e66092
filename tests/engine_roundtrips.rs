//! End-to-end engine scenarios: embed through the layer plans, recover
//! through the probe orders, and confirm the watermark hash survives.

use std::io::Cursor;

use image::{ImageFormat, RgbImage};
use serde_json::{Map, Value, json};
use tidemark::embedder::frequency::{FrequencyConfig, FrequencyEmbedder};
use tidemark::{Engine, MediaType, WatermarkPayload, hashing};

fn metadata() -> Map<String, Value> {
    let Value::Object(map) = json!({"personal_info": null, "license": "CC-BY"}) else {
        unreachable!()
    };
    map
}

fn png_bytes(img: &RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn white_png(size: u32) -> Vec<u8> {
    png_bytes(&RgbImage::from_pixel(size, size, image::Rgb([255, 255, 255])))
}

fn gradient_png(size: u32) -> Vec<u8> {
    png_bytes(&RgbImage::from_fn(size, size, |x, y| {
        let v = 64 + ((x + y) * 128 / (2 * size)) as u8;
        image::Rgb([v, v, v])
    }))
}

/// Mono 32-bit float WAV holding a quiet 440 Hz sine.
fn quiet_sine_wav(seconds: f64, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut out = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut out, spec).unwrap();
    let count = (seconds * f64::from(sample_rate)) as usize;
    for i in 0..count {
        let t = i as f64 / f64::from(sample_rate);
        writer
            .write_sample((1e-5 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as f32)
            .unwrap();
    }
    writer.finalize().unwrap();
    out.into_inner()
}

/// Recompute the watermark hash the way the specification of the external
/// key defines it, from first principles.
fn manual_hash(payload: &WatermarkPayload) -> String {
    hashing::hash_string(&format!(
        "{{\"license\":\"{}\",\"metadata_hash\":\"{}\",\"timestamp\":{},\"user_id\":\"{}\"}}",
        payload.license, payload.metadata_hash, payload.timestamp, payload.user_id
    ))
}

#[test]
fn white_png_roundtrip_hash_stable() {
    let engine = Engine::default();
    let mut source = Cursor::new(white_png(100));

    let (marked, watermark_hash) = engine
        .embed(
            &mut source,
            MediaType::Image,
            ".png",
            "alice",
            &metadata(),
            "CC-BY",
        )
        .unwrap();
    assert_eq!(source.position(), 0);

    let mut marked_source = Cursor::new(marked);
    let recovered = engine
        .extract(&mut marked_source, MediaType::Image, ".png", None)
        .unwrap();
    assert_eq!(marked_source.position(), 0);

    let payload = WatermarkPayload::from_slice(&recovered).unwrap();
    assert_eq!(payload.user_id, "alice");
    assert_eq!(payload.license, "CC-BY");
    assert_eq!(payload.watermark_hash(), watermark_hash);
    assert_eq!(manual_hash(&payload), watermark_hash);
}

#[test]
fn wav_roundtrip_preserves_duration() {
    let engine = Engine::default();
    let carrier = quiet_sine_wav(5.0, 44_100);
    let original_samples = hound::WavReader::new(Cursor::new(carrier.as_slice()))
        .unwrap()
        .duration();

    let mut source = Cursor::new(carrier);
    let (marked, watermark_hash) = engine
        .embed(
            &mut source,
            MediaType::Audio,
            ".wav",
            "alice",
            &metadata(),
            "CC-BY",
        )
        .unwrap();

    // Still a WAV, same duration to the sample.
    let reader = hound::WavReader::new(Cursor::new(marked.as_slice())).unwrap();
    assert_eq!(reader.spec().sample_rate, 44_100);
    assert!(reader.duration().abs_diff(original_samples) <= 1);

    // The caller passes the hash back as the personalization label.
    let mut marked_source = Cursor::new(marked);
    let recovered = engine
        .extract(
            &mut marked_source,
            MediaType::Audio,
            ".wav",
            Some(&watermark_hash),
        )
        .unwrap();
    let payload = WatermarkPayload::from_slice(&recovered).unwrap();
    assert_eq!(payload.watermark_hash(), watermark_hash);
}

#[test]
fn pdf_title_gains_mark_and_roundtrips() {
    use lopdf::{Document, Object, dictionary};

    // One-page document with an existing title.
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(lopdf::Stream::new(
        dictionary! {},
        b"BT /F1 24 Tf 100 600 Td (Hello) Tj ET".to_vec(),
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
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));
    let info_id = doc.add_object(Object::Dictionary(dictionary! {
        "Title" => Object::string_literal("Report"),
    }));
    doc.trailer.set("Info", Object::Reference(info_id));
    let mut carrier = Vec::new();
    doc.save_to(&mut carrier).unwrap();

    let engine = Engine::default();
    let mut source = Cursor::new(carrier);
    let (marked, watermark_hash) = engine
        .embed(
            &mut source,
            MediaType::Pdf,
            ".pdf",
            "alice",
            &metadata(),
            "CC-BY",
        )
        .unwrap();

    // Title carries the bracketed 16-character mark; /WMHash is present.
    let reloaded = Document::load_mem(&marked).unwrap();
    let info_obj = reloaded.trailer.get(b"Info").unwrap();
    let info = match info_obj {
        Object::Reference(id) => match reloaded.get_object(*id).unwrap() {
            Object::Dictionary(d) => d.clone(),
            _ => panic!("Info is not a dictionary"),
        },
        Object::Dictionary(d) => d.clone(),
        _ => panic!("unexpected Info object"),
    };
    let title = match info.get(b"Title").unwrap() {
        Object::String(bytes, _) => String::from_utf8_lossy(bytes).into_owned(),
        _ => panic!("Title is not a string"),
    };
    assert!(title.starts_with("Report ["));
    assert!(title.ends_with(']'));
    assert_eq!(title.len(), "Report []".len() + 16);
    assert!(info.has(b"WMHash"));

    let mut marked_source = Cursor::new(marked);
    let (payload, recomputed) = engine
        .inspect(&mut marked_source, MediaType::Pdf, ".pdf")
        .unwrap();
    assert_eq!(recomputed, watermark_hash);
    assert_eq!(payload.user_id, "alice");
}

#[test]
fn mp3_foreign_comment_survives_engine_embed() {
    use id3::frame::Comment;
    use id3::{Tag, TagLike, Version};
    use std::io::Write;

    // Fake MP3 frames plus a pre-existing COMM tag.
    let mut audio = Vec::new();
    for _ in 0..4 {
        audio.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x44]);
        audio.extend_from_slice(&[0u8; 413]);
    }
    let mut scratch = tempfile::Builder::new().suffix(".mp3").tempfile().unwrap();
    scratch.write_all(&audio).unwrap();
    scratch.flush().unwrap();
    let mut tag = Tag::new();
    tag.add_frame(Comment {
        lang: "eng".into(),
        description: "Notes".into(),
        text: "session notes".into(),
    });
    tag.write_to_path(scratch.path(), Version::Id3v23).unwrap();
    let carrier = std::fs::read(scratch.path()).unwrap();

    let engine = Engine::default();
    let mut source = Cursor::new(carrier);
    let (marked, watermark_hash) = engine
        .embed(
            &mut source,
            MediaType::Audio,
            ".mp3",
            "alice",
            &metadata(),
            "CC-BY",
        )
        .unwrap();

    let tag = Tag::read_from2(Cursor::new(marked.as_slice())).unwrap();
    assert!(
        tag.comments()
            .any(|c| c.description == "Notes" && c.text == "session notes")
    );
    assert!(tag.comments().any(|c| c.description == "WMPayload"));

    let mut marked_source = Cursor::new(marked);
    let (payload, recomputed) = engine
        .inspect(&mut marked_source, MediaType::Audio, ".mp3")
        .unwrap();
    assert_eq!(recomputed, watermark_hash);
    assert_eq!(payload.license, "CC-BY");
}

#[test]
fn oversized_payload_spans_numbered_png_chunks() {
    // A very long user id pushes the base64 payload past one chunk.
    let engine = Engine::default();
    let user_id = "u".repeat(1800);
    let mut source = Cursor::new(white_png(100));

    let (marked, watermark_hash) = engine
        .embed(
            &mut source,
            MediaType::Image,
            ".png",
            &user_id,
            &metadata(),
            "CC-BY",
        )
        .unwrap();

    let keywords = text_chunk_keywords(&marked);
    assert!(keywords.contains(&"WMHash".to_string()));
    assert!(keywords.contains(&"WMHash1".to_string()));

    let mut marked_source = Cursor::new(marked);
    let (payload, recomputed) = engine
        .inspect(&mut marked_source, MediaType::Image, ".png")
        .unwrap();
    assert_eq!(payload.user_id, user_id);
    assert_eq!(recomputed, watermark_hash);
}

#[test]
fn stripped_text_chunks_fall_back_to_frequency_probe() {
    let engine = Engine::default();
    let mut source = Cursor::new(gradient_png(256));

    let (marked, watermark_hash) = engine
        .embed(
            &mut source,
            MediaType::Image,
            ".png",
            "alice",
            &metadata(),
            "CC-BY",
        )
        .unwrap();

    let stripped = strip_text_chunks(&marked);
    assert!(text_chunk_keywords(&stripped).is_empty());

    // The frequency-domain carrier alone still yields the payload.
    let frequency = FrequencyEmbedder::new(FrequencyConfig::default());
    let from_frequency = frequency.extract(&stripped).unwrap();
    let payload = WatermarkPayload::from_slice(&from_frequency).unwrap();
    assert_eq!(payload.watermark_hash(), watermark_hash);

    // And the engine's probe chain reaches it after metadata fails.
    let mut stripped_source = Cursor::new(stripped);
    let (payload, recomputed) = engine
        .inspect(&mut stripped_source, MediaType::Image, ".png")
        .unwrap();
    assert_eq!(recomputed, watermark_hash);
    assert_eq!(payload.user_id, "alice");
}

#[test]
fn jpeg_input_roundtrips_through_layers() {
    let img = RgbImage::from_fn(96, 96, |x, y| {
        let v = 80 + ((x + y) / 2) as u8;
        image::Rgb([v, v, v])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg).unwrap();

    let engine = Engine::default();
    let mut source = Cursor::new(out.into_inner());
    let (marked, watermark_hash) = engine
        .embed(
            &mut source,
            MediaType::Image,
            ".jpg",
            "alice",
            &metadata(),
            "CC-BY",
        )
        .unwrap();

    let mut marked_source = Cursor::new(marked);
    let (payload, recomputed) = engine
        .inspect(&mut marked_source, MediaType::Image, ".jpg")
        .unwrap();
    assert_eq!(recomputed, watermark_hash);
    assert_eq!(payload.user_id, "alice");
}

#[tokio::test]
async fn verify_reports_structured_outcome() {
    let engine = Engine::default();
    let mut source = Cursor::new(white_png(100));

    let (marked, watermark_hash) = engine
        .embed(
            &mut source,
            MediaType::Image,
            ".png",
            "alice",
            &metadata(),
            "CC-BY",
        )
        .unwrap();

    let mut marked_source = Cursor::new(marked);
    let report = engine
        .verify(&mut marked_source, MediaType::Image, ".png")
        .await
        .unwrap();

    assert!(report.verified);
    assert!(report.watermark_found);
    assert_eq!(report.watermark_hash.as_deref(), Some(watermark_hash.as_str()));
    // The mock registry holds no records, so found-but-unmatched.
    assert!(!report.matched);
    assert!(report.payload.is_some());
    assert_eq!(marked_source.position(), 0);
}

// ---------------------------------------------------------------------------
// PNG helpers for the chunk-level assertions
// ---------------------------------------------------------------------------

fn text_chunk_keywords(png: &[u8]) -> Vec<String> {
    let mut keywords = Vec::new();
    let mut pos = 8;
    while pos + 8 <= png.len() {
        let length =
            u32::from_be_bytes([png[pos], png[pos + 1], png[pos + 2], png[pos + 3]]) as usize;
        let kind = &png[pos + 4..pos + 8];
        if kind == b"tEXt" {
            let data = &png[pos + 8..pos + 8 + length];
            if let Some(null_pos) = data.iter().position(|&b| b == 0) {
                keywords.push(String::from_utf8_lossy(&data[..null_pos]).into_owned());
            }
        }
        let done = kind == b"IEND";
        pos += 12 + length;
        if done {
            break;
        }
    }
    keywords
}

fn strip_text_chunks(png: &[u8]) -> Vec<u8> {
    let mut out = png[..8].to_vec();
    let mut pos = 8;
    while pos + 8 <= png.len() {
        let length =
            u32::from_be_bytes([png[pos], png[pos + 1], png[pos + 2], png[pos + 3]]) as usize;
        let kind = &png[pos + 4..pos + 8];
        if kind != b"tEXt" {
            out.extend_from_slice(&png[pos..pos + 12 + length]);
        }
        let done = kind == b"IEND";
        pos += 12 + length;
        if done {
            break;
        }
    }
    out
}
