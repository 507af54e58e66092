//! Content hashing for files and canonical strings.
//!
//! Two operations back the whole identity scheme: a streaming SHA-256 over
//! file bytes and a SHA-256 over a canonical UTF-8 string. Both return
//! lowercase hex. The streaming variant restores the reader to offset 0 on
//! every path so callers can keep using the same handle.

use std::io::{Read, Seek, SeekFrom};

use sha2::{Digest, Sha256};

use crate::error::WatermarkError;

/// Chunk size for streaming file hashes.
const CHUNK_SIZE: usize = 8192;

/// Compute the SHA-256 of everything readable from `source`, streaming in
/// 8 KiB chunks.
///
/// The reader is rewound to offset 0 before hashing and again before
/// returning, so the caller's cursor position is unchanged by this call.
///
/// # Examples
///
/// ```rust
/// use std::io::Cursor;
/// use tidemark::hashing::hash_reader;
///
/// let mut src = Cursor::new(b"content".to_vec());
/// let hex = hash_reader(&mut src).unwrap();
/// assert_eq!(hex.len(), 64);
/// assert_eq!(src.position(), 0);
/// ```
pub fn hash_reader<R: Read + Seek>(source: &mut R) -> Result<String, WatermarkError> {
    source.seek(SeekFrom::Start(0))?;

    let mut hasher = Sha256::new();
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        let n = source.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }

    source.seek(SeekFrom::Start(0))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the SHA-256 of a UTF-8 string, returned as lowercase hex.
pub fn hash_string(content: &str) -> String {
    hash_bytes(content.as_bytes())
}

/// Compute the SHA-256 of a byte slice, returned as lowercase hex.
pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
