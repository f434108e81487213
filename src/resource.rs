//! Resource declarations and the property model.
//!
//! A [`ResourceSpec`] describes one unit of external infrastructure state:
//! a kind, a unique logical name, and a property bag. Property values may be
//! literals or references to another resource's output attributes, written
//! as `${resource.attribute}` markers inside declaration strings.
//!
//! Each [`ResourceKind`] carries a static schema naming its required and
//! optional input attributes and the output attributes the provider
//! guarantees after a successful apply. Schema violations are caught during
//! graph construction, before any external call.

use std::fmt;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Matches `${resource.attribute}` reference markers inside strings.
static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_-]*)\.([A-Za-z_][A-Za-z0-9_]*)\s*\}")
        .expect("reference marker regex is valid")
});

// ============================================================================
// Resource Kinds and Schemas
// ============================================================================

/// The kind of infrastructure resource a declaration describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A virtual private network.
    Vpc,
    /// A subnet within a VPC.
    Subnet,
    /// An internet gateway attached to a VPC.
    InternetGateway,
    /// A route table within a VPC.
    RouteTable,
    /// An association between a subnet and a route table.
    RouteTableAssociation,
    /// A security group with ingress/egress rules.
    SecurityGroup,
    /// A compute instance.
    Instance,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Vpc => write!(f, "vpc"),
            ResourceKind::Subnet => write!(f, "subnet"),
            ResourceKind::InternetGateway => write!(f, "internet_gateway"),
            ResourceKind::RouteTable => write!(f, "route_table"),
            ResourceKind::RouteTableAssociation => write!(f, "route_table_association"),
            ResourceKind::SecurityGroup => write!(f, "security_group"),
            ResourceKind::Instance => write!(f, "instance"),
        }
    }
}

/// Static schema for a resource kind: which input attributes it accepts and
/// which output attributes the provider produces once it has been applied.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSchema {
    /// Input attributes that must be present in the declaration.
    pub required: &'static [&'static str],
    /// Input attributes that may be present.
    pub optional: &'static [&'static str],
    /// Output attributes guaranteed to exist after a successful apply.
    /// References may only target attributes listed here.
    pub outputs: &'static [&'static str],
}

impl ResourceSchema {
    /// Returns true if `attribute` is an accepted input attribute.
    pub fn accepts_input(&self, attribute: &str) -> bool {
        self.required.contains(&attribute) || self.optional.contains(&attribute)
    }

    /// Returns true if `attribute` is a guaranteed output attribute.
    pub fn produces_output(&self, attribute: &str) -> bool {
        self.outputs.contains(&attribute)
    }
}

impl ResourceKind {
    /// Returns the schema for this kind.
    pub fn schema(&self) -> &'static ResourceSchema {
        match self {
            ResourceKind::Vpc => &ResourceSchema {
                required: &["cidr_block"],
                optional: &["enable_dns_hostnames", "enable_dns_support", "tags"],
                outputs: &["id"],
            },
            ResourceKind::Subnet => &ResourceSchema {
                required: &["vpc_id", "cidr_block"],
                optional: &["map_public_ip_on_launch", "availability_zone", "tags"],
                outputs: &["id"],
            },
            ResourceKind::InternetGateway => &ResourceSchema {
                required: &["vpc_id"],
                optional: &["tags"],
                outputs: &["id"],
            },
            ResourceKind::RouteTable => &ResourceSchema {
                required: &["vpc_id"],
                optional: &["routes", "tags"],
                outputs: &["id"],
            },
            ResourceKind::RouteTableAssociation => &ResourceSchema {
                required: &["subnet_id", "route_table_id"],
                optional: &[],
                outputs: &["id"],
            },
            ResourceKind::SecurityGroup => &ResourceSchema {
                required: &["vpc_id"],
                optional: &["description", "ingress", "egress", "tags"],
                outputs: &["id"],
            },
            ResourceKind::Instance => &ResourceSchema {
                required: &["ami", "instance_type"],
                optional: &[
                    "subnet_id",
                    "security_groups",
                    "associate_public_ip_address",
                    "key_name",
                    "user_data",
                    "tags",
                ],
                outputs: &["id", "public_ip", "private_ip"],
            },
        }
    }

    /// Short identifier prefix used by providers when minting ids
    /// (e.g. `vpc-0a1b2c3d`).
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "igw",
            ResourceKind::RouteTable => "rtb",
            ResourceKind::RouteTableAssociation => "rtbassoc",
            ResourceKind::SecurityGroup => "sg",
            ResourceKind::Instance => "i",
        }
    }
}

// ============================================================================
// References and Property Values
// ============================================================================

/// A reference to another resource's output attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttrRef {
    /// Logical name of the producing resource.
    pub resource: String,
    /// The output attribute being referenced.
    pub attribute: String,
}

impl AttrRef {
    /// Creates a new attribute reference.
    pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// One segment of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text.
    Text(String),
    /// An embedded reference, stringified at resolution time.
    Ref(AttrRef),
}

/// A value in a resource property bag.
///
/// Strings containing `${resource.attribute}` markers are parsed into
/// [`PropertyValue::Reference`] (when the marker is the whole string, so the
/// referenced value keeps its type) or [`PropertyValue::Interpolate`] (when
/// markers are embedded in surrounding text). All other values stay literal.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A plain JSON value with no references inside.
    Literal(JsonValue),
    /// A whole-value reference to another resource's output.
    Reference(AttrRef),
    /// A string with embedded references.
    Interpolate(Vec<Segment>),
    /// A list of property values.
    List(Vec<PropertyValue>),
    /// A map of property values.
    Map(IndexMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Creates a whole-value reference.
    pub fn reference(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Reference(AttrRef::new(resource, attribute))
    }

    /// Parses a raw JSON value into a property value, recognizing
    /// `${resource.attribute}` markers inside strings.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::String(s) => Self::from_string(s),
            JsonValue::Array(items) => {
                Self::List(items.into_iter().map(Self::from_json).collect())
            }
            JsonValue::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
            other => Self::Literal(other),
        }
    }

    /// Parses a string, splitting out reference markers. A string that is a
    /// single marker and nothing else becomes a typed [`Reference`];
    /// markers embedded in other text become an [`Interpolate`]; strings
    /// without any dotted marker stay literal (boot scripts and other
    /// opaque payloads pass through untouched).
    ///
    /// [`Reference`]: PropertyValue::Reference
    /// [`Interpolate`]: PropertyValue::Interpolate
    fn from_string(s: String) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in REFERENCE_RE.captures_iter(&s) {
            let whole = caps.get(0).expect("capture 0 always present");
            if whole.start() > last {
                segments.push(Segment::Text(s[last..whole.start()].to_string()));
            }
            segments.push(Segment::Ref(AttrRef::new(&caps[1], &caps[2])));
            last = whole.end();
        }
        if segments.is_empty() {
            return Self::Literal(JsonValue::String(s));
        }
        if last < s.len() {
            segments.push(Segment::Text(s[last..].to_string()));
        }
        if segments.len() == 1 {
            if let Segment::Ref(r) = &segments[0] {
                return Self::Reference(r.clone());
            }
        }
        Self::Interpolate(segments)
    }

    /// Collects every reference contained in this value, in the order it
    /// appears in the declaration.
    pub fn references(&self) -> Vec<&AttrRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a AttrRef>) {
        match self {
            PropertyValue::Literal(_) => {}
            PropertyValue::Reference(r) => refs.push(r),
            PropertyValue::Interpolate(segments) => {
                for segment in segments {
                    if let Segment::Ref(r) = segment {
                        refs.push(r);
                    }
                }
            }
            PropertyValue::List(items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            PropertyValue::Map(map) => {
                for value in map.values() {
                    value.collect_references(refs);
                }
            }
        }
    }

    /// Resolves this value to plain JSON, looking up each reference through
    /// `lookup`. Whole-value references keep the referenced value's type;
    /// interpolated references are stringified into the surrounding text.
    pub fn resolve<F>(&self, lookup: &F) -> Result<JsonValue>
    where
        F: Fn(&AttrRef) -> Result<JsonValue>,
    {
        match self {
            PropertyValue::Literal(v) => Ok(v.clone()),
            PropertyValue::Reference(r) => lookup(r),
            PropertyValue::Interpolate(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => out.push_str(t),
                        Segment::Ref(r) => out.push_str(&stringify(&lookup(r)?)),
                    }
                }
                Ok(JsonValue::String(out))
            }
            PropertyValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.resolve(lookup)?);
                }
                Ok(JsonValue::Array(out))
            }
            PropertyValue::Map(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), v.resolve(lookup)?);
                }
                Ok(JsonValue::Object(out))
            }
        }
    }

    /// Renders this value back into declaration form: references become
    /// `${resource.attribute}` marker strings.
    pub fn to_declaration_json(&self) -> JsonValue {
        match self {
            PropertyValue::Literal(v) => v.clone(),
            PropertyValue::Reference(r) => JsonValue::String(format!("${{{}}}", r)),
            PropertyValue::Interpolate(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => out.push_str(t),
                        Segment::Ref(r) => out.push_str(&format!("${{{}}}", r)),
                    }
                }
                JsonValue::String(out)
            }
            PropertyValue::List(items) => {
                JsonValue::Array(items.iter().map(Self::to_declaration_json).collect())
            }
            PropertyValue::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_declaration_json()))
                    .collect(),
            ),
        }
    }
}

/// Stringify a resolved value for interpolation into surrounding text.
fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl From<JsonValue> for PropertyValue {
    fn from(value: JsonValue) -> Self {
        Self::from_json(value)
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_declaration_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = JsonValue::deserialize(deserializer)?;
        Ok(Self::from_json(raw))
    }
}

// ============================================================================
// Lifecycle Policy
// ============================================================================

/// Lifecycle policy attached to a resource declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lifecycle {
    /// Create the replacement before destroying the old resource when a
    /// replacement is required. Carried in the model; no engine path
    /// consults it yet.
    #[serde(default)]
    pub create_before_destroy: bool,
    /// Input attributes whose changes are ignored when diffing desired
    /// against recorded state.
    #[serde(default)]
    pub ignore_changes: Vec<String>,
}

impl Lifecycle {
    /// Returns true if every field is at its default.
    pub fn is_default(&self) -> bool {
        !self.create_before_destroy && self.ignore_changes.is_empty()
    }
}

// ============================================================================
// Resource Specification
// ============================================================================

/// A single resource declaration: kind, unique logical name, property bag,
/// and lifecycle policy. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Unique logical name within the stack.
    pub name: String,
    /// The resource kind.
    pub kind: ResourceKind,
    /// Input attributes, in declaration order.
    #[serde(default)]
    pub properties: IndexMap<String, PropertyValue>,
    /// Lifecycle policy.
    #[serde(default, skip_serializing_if = "Lifecycle::is_default")]
    pub lifecycle: Lifecycle,
}

impl ResourceSpec {
    /// Creates a declaration with an empty property bag.
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            properties: IndexMap::new(),
            lifecycle: Lifecycle::default(),
        }
    }

    /// Adds a property. Accepts raw JSON (marker strings are parsed) or a
    /// ready-made [`PropertyValue`].
    pub fn property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets the lifecycle policy.
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Collects every reference in this declaration's property bag, in
    /// declaration order.
    pub fn references(&self) -> Vec<&AttrRef> {
        let mut refs = Vec::new();
        for value in self.properties.values() {
            value.collect_references(&mut refs);
        }
        refs
    }

    /// Validates this declaration against its kind's schema: required
    /// inputs must be present and no unknown inputs are accepted.
    pub fn validate_schema(&self) -> Result<()> {
        let schema = self.kind.schema();
        for required in schema.required {
            if !self.properties.contains_key(*required) {
                return Err(Error::invalid_declaration(
                    &self.name,
                    format!("missing required attribute '{required}' for kind '{}'", self.kind),
                ));
            }
        }
        for key in self.properties.keys() {
            if !schema.accepts_input(key) {
                return Err(Error::invalid_declaration(
                    &self.name,
                    format!("unknown attribute '{key}' for kind '{}'", self.kind),
                ));
            }
        }
        Ok(())
    }
}
