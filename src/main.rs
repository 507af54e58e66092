mod cli;

use std::io::{self, Cursor, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::{Map, Value};
use tidemark::{Engine, MediaType};

use crate::cli::{Cli, Command};

/// Derive the dotted lowercase extension and media type from a path.
fn classify(path: &Path) -> Result<(MediaType, String)> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .with_context(|| format!("'{}' has no file extension", path.display()))?;

    let media_type = MediaType::from_extension(&extension)
        .with_context(|| format!("unsupported file type: {extension}"))?;
    Ok((media_type, extension))
}

fn parse_metadata(raw: Option<&str>) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(text) => match serde_json::from_str(text)
            .context("--metadata must be a JSON object")?
        {
            Value::Object(map) => Ok(map),
            _ => bail!("--metadata must be a JSON object"),
        },
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let engine = Engine::default();

    match Cli::parse().command {
        Command::Embed {
            input,
            output,
            user_id,
            license,
            metadata,
        } => {
            let (media_type, extension) = classify(&input)?;
            let metadata = parse_metadata(metadata.as_deref())?;
            let data = std::fs::read(&input)
                .with_context(|| format!("failed to read '{}'", input.display()))?;

            let mut source = Cursor::new(data);
            let (marked, watermark_hash) = engine
                .embed(
                    &mut source,
                    media_type,
                    &extension,
                    &user_id,
                    &metadata,
                    &license,
                )
                .context("embedding failed")?;

            std::fs::write(&output, &marked)
                .with_context(|| format!("failed to write '{}'", output.display()))?;
            println!("Watermarked file written to: {}", output.display());
            println!("Watermark hash: {watermark_hash}");
        }

        Command::Extract { input, output, raw } => {
            if output.is_none() && !raw {
                bail!("must specify either --output <FILE> or --raw");
            }
            let (media_type, extension) = classify(&input)?;
            let data = std::fs::read(&input)
                .with_context(|| format!("failed to read '{}'", input.display()))?;

            let mut source = Cursor::new(data);
            let payload = engine
                .extract(&mut source, media_type, &extension, None)
                .context("extraction failed")?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &payload)
                        .with_context(|| format!("failed to write '{}'", path.display()))?;
                    println!("Payload written to: {}", path.display());
                }
                None => io::stdout()
                    .write_all(&payload)
                    .context("failed to write payload to stdout")?,
            }
        }

        Command::Inspect { input } => {
            let (media_type, extension) = classify(&input)?;
            let data = std::fs::read(&input)
                .with_context(|| format!("failed to read '{}'", input.display()))?;

            let mut source = Cursor::new(data);
            let (payload, watermark_hash) = engine
                .inspect(&mut source, media_type, &extension)
                .context("no parseable watermark found")?;

            println!("{}", serde_json::to_string_pretty(&payload)?);
            println!("Watermark hash: {watermark_hash}");
        }
    }

    Ok(())
}
