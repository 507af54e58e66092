use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tidemark")]
#[command(version)]
#[command(about = "Embed and recover provenance watermarks in images, audio and PDF files")]
#[command(after_help = "Examples:
    # Watermark an image
    tidemark embed -i photo.png -o photo.marked.png --user-id alice --license CC-BY

    # Attach extra metadata to the claim
    tidemark embed -i track.mp3 -o track.marked.mp3 --user-id alice \\
        --license CC-BY --metadata '{\"project\":\"demo\"}'

    # Recover the raw payload bytes
    tidemark extract -i photo.marked.png --raw

    # Show the parsed payload and its watermark hash
    tidemark inspect -i photo.marked.png")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Embed a provenance watermark into a file
    Embed {
        /// Input file (media type is inferred from the extension)
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Output file for the watermarked bytes
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// User identifier recorded in the payload
        #[arg(short, long)]
        user_id: String,

        /// License identifier recorded in the payload
        #[arg(short, long)]
        license: String,

        /// Extra metadata as a JSON object
        #[arg(short, long, value_name = "JSON")]
        metadata: Option<String>,
    },

    /// Extract the embedded payload bytes from a watermarked file
    Extract {
        /// Input file
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Write the payload to a file
        #[arg(short, long, value_name = "FILE", conflicts_with = "raw")]
        output: Option<PathBuf>,

        /// Write the raw payload bytes to stdout
        #[arg(long, conflicts_with = "output")]
        raw: bool,
    },

    /// Extract, parse and re-hash the payload without a registry lookup
    Inspect {
        /// Input file
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },
}
