//! Output store: resolved output attributes, addressable by resource name.
//!
//! Populated incrementally as the apply engine completes each resource and
//! read by dependents when their property bags are resolved. Entries are
//! write-once per apply pass; a second write for the same attribute means
//! two code paths both believe they own a resource, which the store reports
//! as an internal consistency error rather than papering over.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::AttrRef;
use crate::stack::Export;

/// Resolved output attributes, keyed by resource name then attribute name.
#[derive(Debug, Clone, Default)]
pub struct OutputStore {
    values: IndexMap<String, IndexMap<String, JsonValue>>,
}

impl OutputStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all entries, starting a new apply pass. Entries from a prior
    /// pass are overwritten wholesale, never mutated mid-pass.
    pub fn begin_pass(&mut self) {
        self.values.clear();
    }

    /// Records one output attribute. Write-once per pass.
    pub fn set(
        &mut self,
        resource: impl Into<String>,
        attribute: impl Into<String>,
        value: JsonValue,
    ) -> Result<()> {
        let resource = resource.into();
        let attribute = attribute.into();
        let entry = self.values.entry(resource.clone()).or_default();
        if entry.contains_key(&attribute) {
            return Err(Error::internal(format!(
                "output '{resource}.{attribute}' written twice in one pass"
            )));
        }
        entry.insert(attribute, value);
        Ok(())
    }

    /// Records every output attribute of a completed resource.
    pub fn publish(
        &mut self,
        resource: impl Into<String>,
        outputs: &IndexMap<String, JsonValue>,
    ) -> Result<()> {
        let resource = resource.into();
        for (attribute, value) in outputs {
            self.set(resource.clone(), attribute.clone(), value.clone())?;
        }
        Ok(())
    }

    /// Reads one output attribute. Fails with
    /// [`Error::NotYetResolved`] if the producing resource has not
    /// completed; given correct resolver ordering this never fires, so a
    /// caller seeing it has found a resolver bug.
    pub fn get(&self, resource: &str, attribute: &str) -> Result<&JsonValue> {
        self.values
            .get(resource)
            .and_then(|outputs| outputs.get(attribute))
            .ok_or_else(|| Error::NotYetResolved {
                resource: resource.to_string(),
                attribute: attribute.to_string(),
            })
    }

    /// Resolves a reference to an owned value.
    pub fn resolve(&self, attr_ref: &AttrRef) -> Result<JsonValue> {
        self.get(&attr_ref.resource, &attr_ref.attribute).cloned()
    }

    /// Returns true if the resource has published any outputs this pass.
    pub fn contains(&self, resource: &str) -> bool {
        self.values.contains_key(resource)
    }

    /// Number of resources with published outputs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing has been published this pass.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolves the explicitly exported names to their values. Exports
    /// whose producing resource did not settle this pass are omitted.
    pub fn export_all(&self, exports: &[Export]) -> IndexMap<String, JsonValue> {
        let mut resolved = IndexMap::with_capacity(exports.len());
        for export in exports {
            match self.get(&export.resource, &export.attribute) {
                Ok(value) => {
                    resolved.insert(export.name.clone(), value.clone());
                }
                Err(_) => {
                    debug!(
                        export = %export.name,
                        resource = %export.resource,
                        "export target did not settle this pass, omitting"
                    );
                }
            }
        }
        resolved
    }
}
