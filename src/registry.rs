//! Provenance registry contract.
//!
//! The engine treats the registry as an opaque collaborator: it maps a
//! watermark hash to "exists plus whatever metadata the backend keeps".
//! Hosts plug in a real backend by implementing [`HashRegistry`];
//! [`MockRegistry`] stands in when none is provided, mirroring deployments
//! where minting happens in a separate frontend and the backend only
//! reports the hash.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::WatermarkError;

/// Response envelope returned by registry operations.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryResponse {
    /// Whether the registry call itself succeeded.
    pub success: bool,
    /// Identifier of a stored record, when the backend creates one.
    pub id: Option<String>,
    /// Human-readable status message.
    pub message: String,
    /// Backend-specific payload. The engine only inspects the `exists` and
    /// `mock_mode` keys, when present.
    pub data: Option<Value>,
}

impl RegistryResponse {
    /// Whether `data.exists` is set and true.
    pub fn exists(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|d| d.get("exists"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether `data.mock_mode` is set and true.
    pub fn is_mock_mode(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|d| d.get("mock_mode"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Record handed to [`HashRegistry::store_hash`] after an embed.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryRecord {
    /// The watermark hash acting as the lookup key.
    pub watermark_hash: String,
    /// Claiming user.
    pub user_id: String,
    /// Embed timestamp, seconds since epoch.
    pub timestamp: u64,
    /// Media family, e.g. "image" or "audio".
    pub content_type: String,
    /// License identifier.
    pub license: String,
    /// Free-form extra metadata.
    pub additional_metadata: Option<Value>,
}

/// External registry mapping watermark hashes to provenance metadata.
///
/// Implementations are expected to be cheap to call concurrently; the
/// engine never caches responses.
#[async_trait]
pub trait HashRegistry: Send + Sync {
    /// Look up a watermark hash. `data.exists` decides whether verification
    /// reports a match.
    async fn verify_hash(&self, watermark_hash: &str) -> Result<RegistryResponse, WatermarkError>;

    /// Store a freshly embedded hash with its claim metadata.
    async fn store_hash(&self, record: &RegistryRecord) -> Result<RegistryResponse, WatermarkError>;
}

/// Registry stand-in for deployments that mint elsewhere.
///
/// Always succeeds; lookups report `exists: false` with `mock_mode: true`
/// so verification can word its result accordingly.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockRegistry;

#[async_trait]
impl HashRegistry for MockRegistry {
    async fn verify_hash(&self, watermark_hash: &str) -> Result<RegistryResponse, WatermarkError> {
        Ok(RegistryResponse {
            success: true,
            id: None,
            message: "watermark hash verified (mock mode - records are minted by the host)".into(),
            data: Some(json!({
                "watermark_hash": watermark_hash,
                "exists": false,
                "mock_mode": true,
            })),
        })
    }

    async fn store_hash(&self, record: &RegistryRecord) -> Result<RegistryResponse, WatermarkError> {
        Ok(RegistryResponse {
            success: true,
            id: None,
            message: "watermark hash ready for host-side minting".into(),
            data: Some(json!({ "watermark_hash": record.watermark_hash })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_registry_reports_mock_mode() {
        let response = MockRegistry.verify_hash("00ff").await.unwrap();
        assert!(response.success);
        assert!(!response.exists());
        assert!(response.is_mock_mode());
    }

    #[tokio::test]
    async fn test_mock_registry_store_echoes_hash() {
        let record = RegistryRecord {
            watermark_hash: "abc123".into(),
            user_id: "alice".into(),
            timestamp: 1_700_000_000,
            content_type: "image".into(),
            license: "CC-BY".into(),
            additional_metadata: None,
        };
        let response = MockRegistry.store_hash(&record).await.unwrap();
        assert_eq!(
            response.data.unwrap().get("watermark_hash").unwrap(),
            "abc123"
        );
    }
}
