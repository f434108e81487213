//! Recorded state: the last-known applied form of each resource.
//!
//! The apply engine diffs desired (resolved) properties against these
//! records to decide between create, in-place update, and no-op, and to
//! find orphans — recorded resources that are no longer declared. The store
//! is serde-serializable so callers can persist it however they like; the
//! persistence format itself is outside this crate.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::resource::{ResourceKind, ResourceSpec};

/// The action the diff selects for one declared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    /// No record exists; the resource must be created.
    Create,
    /// A record exists but its properties differ; update in place.
    Update,
    /// Desired and recorded properties match; nothing to do.
    Noop,
}

/// Last-known applied state of one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedResource {
    /// Logical name.
    pub name: String,
    /// Resource kind at the time of apply.
    pub kind: ResourceKind,
    /// Provider-assigned id.
    pub id: String,
    /// Fully resolved input properties as last applied.
    pub properties: IndexMap<String, JsonValue>,
    /// Output attributes captured from the provider.
    pub outputs: IndexMap<String, JsonValue>,
    /// When the resource last settled.
    pub applied_at: DateTime<Utc>,
}

/// Recorded state for a whole stack, in apply order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateStore {
    resources: IndexMap<String, RecordedResource>,
}

impl StateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the record for a logical name.
    pub fn get(&self, name: &str) -> Option<&RecordedResource> {
        self.resources.get(name)
    }

    /// Inserts or replaces a record.
    pub fn record(&mut self, record: RecordedResource) {
        self.resources.insert(record.name.clone(), record);
    }

    /// Removes a record, returning it if present.
    pub fn remove(&mut self, name: &str) -> Option<RecordedResource> {
        self.resources.shift_remove(name)
    }

    /// Recorded resources, in recorded order.
    pub fn iter(&self) -> impl Iterator<Item = &RecordedResource> {
        self.resources.values()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if no resources are recorded.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Recorded resources that are no longer declared, in recorded order.
    /// The engine deletes these in reverse so dependents recorded later go
    /// before what they referenced.
    pub fn orphans<'a>(&'a self, declared: &[&str]) -> Vec<&'a RecordedResource> {
        self.resources
            .values()
            .filter(|record| !declared.contains(&record.name.as_str()))
            .collect()
    }

    /// Selects the action for a declared resource given its fully resolved
    /// desired properties. Attributes listed in `lifecycle.ignore_changes`
    /// are masked from both sides before comparing.
    pub fn action_for(
        &self,
        spec: &ResourceSpec,
        desired: &IndexMap<String, JsonValue>,
    ) -> ChangeAction {
        let Some(record) = self.resources.get(&spec.name) else {
            return ChangeAction::Create;
        };
        let ignored = &spec.lifecycle.ignore_changes;
        let desired_view = masked(desired, ignored);
        let recorded_view = masked(&record.properties, ignored);
        if desired_view == recorded_view {
            ChangeAction::Noop
        } else {
            ChangeAction::Update
        }
    }
}

/// Clones a property map without the ignored attributes.
fn masked(
    properties: &IndexMap<String, JsonValue>,
    ignored: &[String],
) -> IndexMap<String, JsonValue> {
    properties
        .iter()
        .filter(|(key, _)| !ignored.contains(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Lifecycle, ResourceKind};
    use serde_json::json;

    fn record(name: &str, properties: IndexMap<String, JsonValue>) -> RecordedResource {
        RecordedResource {
            name: name.to_string(),
            kind: ResourceKind::Vpc,
            id: format!("vpc-{name}"),
            properties,
            outputs: IndexMap::new(),
            applied_at: Utc::now(),
        }
    }

    fn props(pairs: &[(&str, JsonValue)]) -> IndexMap<String, JsonValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_action_create_without_record() {
        let store = StateStore::new();
        let spec = ResourceSpec::new(ResourceKind::Vpc, "net")
            .property("cidr_block", json!("10.0.0.0/16"));
        let desired = props(&[("cidr_block", json!("10.0.0.0/16"))]);
        assert_eq!(store.action_for(&spec, &desired), ChangeAction::Create);
    }

    #[test]
    fn test_action_noop_when_equal() {
        let mut store = StateStore::new();
        store.record(record("net", props(&[("cidr_block", json!("10.0.0.0/16"))])));
        let spec = ResourceSpec::new(ResourceKind::Vpc, "net")
            .property("cidr_block", json!("10.0.0.0/16"));
        let desired = props(&[("cidr_block", json!("10.0.0.0/16"))]);
        assert_eq!(store.action_for(&spec, &desired), ChangeAction::Noop);
    }

    #[test]
    fn test_action_update_when_changed() {
        let mut store = StateStore::new();
        store.record(record("net", props(&[("cidr_block", json!("10.0.0.0/16"))])));
        let spec = ResourceSpec::new(ResourceKind::Vpc, "net")
            .property("cidr_block", json!("10.1.0.0/16"));
        let desired = props(&[("cidr_block", json!("10.1.0.0/16"))]);
        assert_eq!(store.action_for(&spec, &desired), ChangeAction::Update);
    }

    #[test]
    fn test_ignore_changes_masks_diff() {
        let mut store = StateStore::new();
        store.record(record(
            "net",
            props(&[
                ("cidr_block", json!("10.0.0.0/16")),
                ("tags", json!({"Name": "old"})),
            ]),
        ));
        let spec = ResourceSpec::new(ResourceKind::Vpc, "net")
            .property("cidr_block", json!("10.0.0.0/16"))
            .property("tags", json!({"Name": "new"}))
            .with_lifecycle(Lifecycle {
                create_before_destroy: false,
                ignore_changes: vec!["tags".to_string()],
            });
        let desired = props(&[
            ("cidr_block", json!("10.0.0.0/16")),
            ("tags", json!({"Name": "new"})),
        ]);
        assert_eq!(store.action_for(&spec, &desired), ChangeAction::Noop);
    }

    #[test]
    fn test_orphans_in_recorded_order() {
        let mut store = StateStore::new();
        store.record(record("a", IndexMap::new()));
        store.record(record("b", IndexMap::new()));
        store.record(record("c", IndexMap::new()));
        let orphans: Vec<&str> = store
            .orphans(&["b"])
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(orphans, vec!["a", "c"]);
    }
}
