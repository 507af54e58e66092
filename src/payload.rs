//! Payload record and its canonical byte encoding.
//!
//! The payload is the record that travels inside every carrier: who claims
//! the work, when, under which license, plus two content-derived hashes.
//! Its canonical encoding is a JSON object with keys in lexicographic order
//! and compact separators; the same encoding rules produce both the
//! embedded bytes (all five fields) and the watermark hash input (a four
//! field subset).
//!
//! # Hash stability
//!
//! [`WatermarkPayload::watermark_hash`] hashes exactly
//! `{license, metadata_hash, timestamp, user_id}`. `content_hash` is
//! excluded on purpose: the watermark hash must stay constant when the
//! carrier pixels or samples are edited after embedding, otherwise the
//! registry lookup key would break on the first crop or re-encode. Do not
//! add `content_hash` to the hashed subset.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WatermarkError;
use crate::hashing::hash_string;

/// The record embedded into every carrier.
///
/// Immutable per request: constructed once from the upload parameters, then
/// serialized and pushed through the layer plan.
///
/// # Examples
///
/// ```rust
/// use tidemark::WatermarkPayload;
///
/// let payload = WatermarkPayload {
///     user_id: "alice".into(),
///     timestamp: 1_700_000_000,
///     metadata_hash: "0".repeat(64),
///     content_hash: "f".repeat(64),
///     license: "CC-BY".into(),
/// };
///
/// let encoded = payload.to_canonical_json();
/// let decoded = WatermarkPayload::from_slice(encoded.as_bytes()).unwrap();
/// assert_eq!(decoded, payload);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkPayload {
    /// Identifier of the claiming user.
    pub user_id: String,
    /// Seconds since the Unix epoch at embed time.
    pub timestamp: u64,
    /// SHA-256 hex of the canonical metadata form.
    pub metadata_hash: String,
    /// SHA-256 hex of the original file bytes. Informational only; not part
    /// of the watermark hash.
    pub content_hash: String,
    /// License identifier string.
    pub license: String,
}

impl WatermarkPayload {
    /// Serialize the full record (all five fields) to the canonical textual
    /// form: a JSON object with keys sorted lexicographically and compact
    /// separators. These are the bytes that get embedded.
    pub fn to_canonical_json(&self) -> String {
        let mut map = Map::new();
        map.insert("content_hash".into(), Value::from(self.content_hash.clone()));
        map.insert("license".into(), Value::from(self.license.clone()));
        map.insert("metadata_hash".into(), Value::from(self.metadata_hash.clone()));
        map.insert("timestamp".into(), Value::from(self.timestamp));
        map.insert("user_id".into(), Value::from(self.user_id.clone()));
        // serde_json's map is ordered by key, so this is already canonical
        Value::Object(map).to_string()
    }

    /// Parse a payload record back out of extracted bytes.
    ///
    /// # Errors
    ///
    /// Returns [`WatermarkError::InvalidPayloadFormat`] when the bytes are
    /// not UTF-8 JSON or the object is missing fields.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, WatermarkError> {
        serde_json::from_slice(bytes)
            .map_err(|e| WatermarkError::InvalidPayloadFormat(e.to_string()))
    }

    /// Compute the watermark hash: SHA-256 over the canonical JSON of the
    /// stable subset `{license, metadata_hash, timestamp, user_id}`.
    ///
    /// `content_hash` is deliberately excluded so the hash survives lossy
    /// edits of the carrier; see the module docs.
    pub fn watermark_hash(&self) -> String {
        let mut map = Map::new();
        map.insert("license".into(), Value::from(self.license.clone()));
        map.insert("metadata_hash".into(), Value::from(self.metadata_hash.clone()));
        map.insert("timestamp".into(), Value::from(self.timestamp));
        map.insert("user_id".into(), Value::from(self.user_id.clone()));
        hash_string(&Value::Object(map).to_string())
    }
}

/// Hash a caller-supplied metadata mapping into its canonical hex digest.
///
/// The mapping is rendered as a JSON object with keys in sorted order
/// (serde_json's map ordering) and hashed with SHA-256. Identical mappings
/// always produce identical digests regardless of insertion order.
pub fn metadata_hash(metadata: &Map<String, Value>) -> String {
    hash_string(&Value::Object(metadata.clone()).to_string())
}
