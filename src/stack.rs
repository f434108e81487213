//! Stack declarations: a named set of resources plus exports.
//!
//! A [`Stack`] is the declaration input surface of the engine. The typed
//! value is format-agnostic; `from_yaml`/`from_file` are the provided
//! loaders for the YAML form:
//!
//! ```yaml
//! name: web
//! resources:
//!   - name: net
//!     kind: vpc
//!     properties:
//!       cidr_block: 10.0.0.0/16
//!   - name: public
//!     kind: subnet
//!     properties:
//!       vpc_id: ${net.id}
//!       cidr_block: 10.0.1.0/24
//! exports:
//!   - name: VPC ID
//!     resource: net
//!     attribute: id
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::resource::ResourceSpec;

/// A named value surfaced at the end of an apply pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    /// Export name, e.g. `"VPC ID"`.
    pub name: String,
    /// Logical name of the producing resource.
    pub resource: String,
    /// The output attribute to export.
    pub attribute: String,
}

impl Export {
    /// Creates an export spec.
    pub fn new(
        name: impl Into<String>,
        resource: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }
}

/// A complete set of declarations for one apply pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
    /// Stack name, used in logs and reports.
    pub name: String,
    /// Resource declarations, in order.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    /// Named exports drawn from resource outputs.
    #[serde(default)]
    pub exports: Vec<Export>,
}

impl Stack {
    /// Creates an empty stack.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Adds a resource declaration.
    pub fn resource(mut self, spec: ResourceSpec) -> Self {
        self.resources.push(spec);
        self
    }

    /// Adds an export.
    pub fn export(
        mut self,
        name: impl Into<String>,
        resource: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        self.exports.push(Export::new(name, resource, attribute));
        self
    }

    /// Parses a stack from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Loads a stack from a YAML file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_yaml(&contents)
    }

    /// Validates the declarations and returns the dependency graph.
    ///
    /// Builds the graph (which checks schemas, references, and acyclicity)
    /// and then checks every export against it: the target resource must be
    /// declared and the attribute must be one of its kind's outputs. All of
    /// this runs before any provider operation.
    pub fn validate(&self) -> Result<DependencyGraph> {
        let graph = DependencyGraph::build(&self.resources)?;
        for export in &self.exports {
            let Some(target) = graph.get(&export.resource) else {
                return Err(Error::unknown_resource(
                    &export.resource,
                    format!("exports.{}", export.name),
                ));
            };
            if !target.kind.schema().produces_output(&export.attribute) {
                return Err(Error::invalid_declaration(
                    &export.resource,
                    format!(
                        "export '{}' targets attribute '{}' which kind '{}' does not produce",
                        export.name, export.attribute, target.kind
                    ),
                ));
            }
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{PropertyValue, ResourceKind};
    use serde_json::json;

    const STACK_YAML: &str = r#"
name: web
resources:
  - name: net
    kind: vpc
    properties:
      cidr_block: 10.0.0.0/16
      tags:
        Name: WebVPC
  - name: public
    kind: subnet
    properties:
      vpc_id: ${net.id}
      cidr_block: 10.0.1.0/24
      map_public_ip_on_launch: true
exports:
  - name: VPC ID
    resource: net
    attribute: id
"#;

    #[test]
    fn test_yaml_parse_extracts_references() {
        let stack = Stack::from_yaml(STACK_YAML).unwrap();
        assert_eq!(stack.name, "web");
        assert_eq!(stack.resources.len(), 2);
        assert_eq!(stack.resources[1].kind, ResourceKind::Subnet);
        assert_eq!(
            stack.resources[1].properties["vpc_id"],
            PropertyValue::reference("net", "id")
        );
        assert_eq!(stack.exports.len(), 1);
    }

    #[test]
    fn test_validate_builds_graph() {
        let stack = Stack::from_yaml(STACK_YAML).unwrap();
        let graph = stack.validate().unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec!["net", "public"]);
    }

    #[test]
    fn test_validate_rejects_export_of_unknown_resource() {
        let stack = Stack::new("web")
            .resource(
                ResourceSpec::new(ResourceKind::Vpc, "net")
                    .property("cidr_block", json!("10.0.0.0/16")),
            )
            .export("SG ID", "missing", "id");
        let err = stack.validate().unwrap_err();
        assert!(matches!(err, Error::UnknownResource { .. }));
    }

    #[test]
    fn test_validate_rejects_export_of_non_output() {
        let stack = Stack::new("web")
            .resource(
                ResourceSpec::new(ResourceKind::Vpc, "net")
                    .property("cidr_block", json!("10.0.0.0/16")),
            )
            .export("IP", "net", "public_ip");
        let err = stack.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidDeclaration { .. }));
    }

    #[test]
    fn test_unknown_kind_is_parse_error() {
        let yaml = r#"
name: web
resources:
  - name: net
    kind: warp_core
"#;
        let err = Stack::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, Error::YamlParse(_)));
    }
}
