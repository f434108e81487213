//! Provider interface and the in-memory provider.
//!
//! A [`Provider`] is the external collaborator that actually mutates
//! infrastructure: create, update, and delete of one resource at a time.
//! The engine talks to it through this narrow async seam and wraps failures
//! with the resource identity.
//!
//! [`MemoryProvider`] is the dependency-free implementation of that seam:
//! it mints deterministic ids, keeps its records in memory, and supports
//! per-resource failure injection plus a call log, which the integration
//! tests lean on heavily.

use std::collections::HashSet;
use std::fmt::Debug;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::resource::ResourceKind;

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by provider operations.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// The backing API rejected or failed the request.
    #[error("API request failed: {0}")]
    Api(String),

    /// The referenced remote resource does not exist.
    #[error("remote resource not found: {0}")]
    NotFound(String),

    /// The provider does not support the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

// ============================================================================
// Provider Interface
// ============================================================================

/// A freshly created remote resource: its assigned id and the output
/// attributes the provider guarantees for the resource's kind.
#[derive(Debug, Clone)]
pub struct CreatedResource {
    /// Provider-assigned identifier.
    pub id: String,
    /// Output attributes (always includes `id`).
    pub outputs: IndexMap<String, JsonValue>,
}

/// External interface to a cloud (or other) backend.
///
/// Implementations perform real side effects; the engine guarantees that
/// `create`/`update` for a resource are only invoked once its dependencies
/// have settled, and never invoked for resources blocked by a failure.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Returns the provider name (e.g. "aws", "memory").
    fn name(&self) -> &str;

    /// Creates a resource from fully resolved properties.
    async fn create(
        &self,
        kind: ResourceKind,
        name: &str,
        properties: &IndexMap<String, JsonValue>,
    ) -> ProviderResult<CreatedResource>;

    /// Updates an existing resource in place and returns its outputs.
    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        properties: &IndexMap<String, JsonValue>,
    ) -> ProviderResult<IndexMap<String, JsonValue>>;

    /// Deletes an existing resource.
    async fn delete(&self, kind: ResourceKind, id: &str) -> ProviderResult<()>;
}

// ============================================================================
// Memory Provider
// ============================================================================

/// One record held by the [`MemoryProvider`].
#[derive(Debug, Clone)]
struct MemoryRecord {
    kind: ResourceKind,
    name: String,
    properties: IndexMap<String, JsonValue>,
    outputs: IndexMap<String, JsonValue>,
}

/// In-memory provider with deterministic ids.
///
/// Ids are stable hashes of the logical resource name, so the same
/// declaration always yields the same id regardless of the order resources
/// are applied in, and re-creations are reproducible.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    records: Mutex<IndexMap<String, MemoryRecord>>,
    fail_names: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl MemoryProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects a failure: any create/update for the named resource fails.
    pub fn with_failure(self, name: impl Into<String>) -> Self {
        self.fail_names.lock().insert(name.into());
        self
    }

    /// Returns the operations performed so far, in order, formatted as
    /// `"<op> <kind> <name-or-id>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of live records.
    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    fn log(&self, entry: String) {
        self.calls.lock().push(entry);
    }

    fn outputs_for(kind: ResourceKind, name: &str, id: &str) -> IndexMap<String, JsonValue> {
        let mut outputs = IndexMap::new();
        outputs.insert("id".to_string(), JsonValue::String(id.to_string()));
        if kind == ResourceKind::Instance {
            let octet = (stable_hash(name) % 200) + 10;
            outputs.insert(
                "private_ip".to_string(),
                JsonValue::String(format!("10.0.1.{octet}")),
            );
            outputs.insert(
                "public_ip".to_string(),
                JsonValue::String(format!("203.0.113.{octet}")),
            );
        }
        outputs
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(
        &self,
        kind: ResourceKind,
        name: &str,
        properties: &IndexMap<String, JsonValue>,
    ) -> ProviderResult<CreatedResource> {
        self.log(format!("create {kind} {name}"));
        if self.fail_names.lock().contains(name) {
            return Err(ProviderError::Api(format!(
                "simulated create failure for '{name}'"
            )));
        }

        let id = format!("{}-{:08x}", kind.id_prefix(), stable_hash(name) as u32);
        let outputs = Self::outputs_for(kind, name, &id);
        self.records.lock().insert(
            id.clone(),
            MemoryRecord {
                kind,
                name: name.to_string(),
                properties: properties.clone(),
                outputs: outputs.clone(),
            },
        );
        Ok(CreatedResource { id, outputs })
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        properties: &IndexMap<String, JsonValue>,
    ) -> ProviderResult<IndexMap<String, JsonValue>> {
        self.log(format!("update {kind} {id}"));
        let mut records = self.records.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        if record.kind != kind {
            return Err(ProviderError::Api(format!(
                "id '{id}' belongs to kind '{}', not '{kind}'",
                record.kind
            )));
        }
        if self.fail_names.lock().contains(&record.name) {
            return Err(ProviderError::Api(format!(
                "simulated update failure for '{}'",
                record.name
            )));
        }
        record.properties = properties.clone();
        Ok(record.outputs.clone())
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> ProviderResult<()> {
        self.log(format!("delete {kind} {id}"));
        self.records
            .lock()
            .shift_remove(id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }
}

/// FNV-1a. Deterministic across runs, which keeps memory-provider ids
/// stable for idempotence and order-independence checks.
fn stable_hash(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, JsonValue)]) -> IndexMap<String, JsonValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_mints_prefixed_deterministic_id() {
        let provider = MemoryProvider::new();
        let created = provider
            .create(
                ResourceKind::Vpc,
                "net",
                &props(&[("cidr_block", json!("10.0.0.0/16"))]),
            )
            .await
            .unwrap();
        assert!(created.id.starts_with("vpc-"));
        assert_eq!(created.outputs["id"], json!(created.id.clone()));

        // Same name on a fresh provider yields the same id.
        let other = MemoryProvider::new();
        let again = other
            .create(
                ResourceKind::Vpc,
                "net",
                &props(&[("cidr_block", json!("10.0.0.0/16"))]),
            )
            .await
            .unwrap();
        assert_eq!(created.id, again.id);
    }

    #[tokio::test]
    async fn test_instance_outputs_include_addresses() {
        let provider = MemoryProvider::new();
        let created = provider
            .create(ResourceKind::Instance, "web", &IndexMap::new())
            .await
            .unwrap();
        assert!(created.outputs.contains_key("public_ip"));
        assert!(created.outputs.contains_key("private_ip"));
        let ip = created.outputs["public_ip"].as_str().unwrap();
        assert!(ip.starts_with("203.0.113."));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let provider = MemoryProvider::new().with_failure("net");
        let err = provider
            .create(ResourceKind::Vpc, "net", &IndexMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api(_)));
        assert_eq!(provider.record_count(), 0);
    }

    #[tokio::test]
    async fn test_update_unknown_id_not_found() {
        let provider = MemoryProvider::new();
        let err = provider
            .update(ResourceKind::Vpc, "vpc-deadbeef", &IndexMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_and_call_log() {
        let provider = MemoryProvider::new();
        let created = provider
            .create(ResourceKind::SecurityGroup, "web-sg", &IndexMap::new())
            .await
            .unwrap();
        provider
            .delete(ResourceKind::SecurityGroup, &created.id)
            .await
            .unwrap();
        assert_eq!(provider.record_count(), 0);
        assert_eq!(
            provider.calls(),
            vec![
                "create security_group web-sg".to_string(),
                format!("delete security_group {}", created.id),
            ]
        );
    }
}
