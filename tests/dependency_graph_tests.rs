//! Ordering and validation tests for the dependency graph.
//!
//! These tests verify that:
//! - The resolver places every resource after everything it references
//! - Declaration order breaks ties, so apply plans are reproducible
//! - Cycles and dangling references are rejected before anything runs
//! - Wave partitions never put both ends of an edge in the same wave

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

use rustform::error::Error;
use rustform::graph::DependencyGraph;
use rustform::resource::{ResourceKind, ResourceSpec};

/// The network topology used throughout the integration tests: a VPC,
/// a public subnet, an internet gateway, a route table wired to the
/// gateway, the subnet association, a security group, and one instance.
fn reference_topology() -> Vec<ResourceSpec> {
    vec![
        ResourceSpec::new(ResourceKind::Vpc, "app-vpc")
            .property("cidr_block", json!("10.0.0.0/16"))
            .property("enable_dns_hostnames", json!(true))
            .property("enable_dns_support", json!(true))
            .property("tags", json!({"Name": "AppVPC"})),
        ResourceSpec::new(ResourceKind::Subnet, "public-subnet")
            .property("vpc_id", json!("${app-vpc.id}"))
            .property("cidr_block", json!("10.0.1.0/24"))
            .property("map_public_ip_on_launch", json!(true))
            .property("availability_zone", json!("us-east-1a")),
        ResourceSpec::new(ResourceKind::InternetGateway, "app-igw")
            .property("vpc_id", json!("${app-vpc.id}")),
        ResourceSpec::new(ResourceKind::RouteTable, "public-routes")
            .property("vpc_id", json!("${app-vpc.id}"))
            .property(
                "routes",
                json!([{"cidr_block": "0.0.0.0/0", "gateway_id": "${app-igw.id}"}]),
            ),
        ResourceSpec::new(ResourceKind::RouteTableAssociation, "public-assoc")
            .property("subnet_id", json!("${public-subnet.id}"))
            .property("route_table_id", json!("${public-routes.id}")),
        ResourceSpec::new(ResourceKind::SecurityGroup, "web-sg")
            .property("vpc_id", json!("${app-vpc.id}"))
            .property("description", json!("Allow inbound HTTP, SSH, and ICMP")),
        ResourceSpec::new(ResourceKind::Instance, "web-server")
            .property("ami", json!("ami-0866a3c8686eaeeba"))
            .property("instance_type", json!("t2.micro"))
            .property("subnet_id", json!("${public-subnet.id}"))
            .property("security_groups", json!(["${web-sg.id}"]))
            .property("associate_public_ip_address", json!(true)),
    ]
}

fn position(order: &[String], name: &str) -> usize {
    order
        .iter()
        .position(|n| n == name)
        .unwrap_or_else(|| panic!("'{name}' missing from order {order:?}"))
}

#[test]
fn test_reference_topology_order() {
    let graph = DependencyGraph::build(&reference_topology()).unwrap();
    let order = graph.topological_order().unwrap();

    assert_eq!(order.first().map(String::as_str), Some("app-vpc"));
    assert_eq!(order.last().map(String::as_str), Some("web-server"));
    assert!(position(&order, "public-assoc") > position(&order, "public-routes"));
    assert!(position(&order, "public-assoc") > position(&order, "public-subnet"));
}

#[test]
fn test_every_edge_satisfied_in_reference_topology() {
    let graph = DependencyGraph::build(&reference_topology()).unwrap();
    let order = graph.topological_order().unwrap();
    for edge in graph.edges() {
        assert!(
            position(&order, &edge.to) < position(&order, &edge.from),
            "edge {} -> {} violated by {order:?}",
            edge.from,
            edge.to
        );
    }
}

#[test]
fn test_reference_topology_waves() {
    let graph = DependencyGraph::build(&reference_topology()).unwrap();
    let waves = graph.waves().unwrap();

    assert_eq!(waves[0], vec!["app-vpc".to_string()]);
    // Subnet, gateway, and security group only need the VPC.
    assert_eq!(
        waves[1],
        vec![
            "public-subnet".to_string(),
            "app-igw".to_string(),
            "web-sg".to_string(),
        ]
    );
    // No wave contains both ends of an edge.
    for wave in &waves {
        for edge in graph.edges() {
            assert!(!(wave.contains(&edge.from) && wave.contains(&edge.to)));
        }
    }
}

#[test]
fn test_order_is_deterministic() {
    let specs = reference_topology();
    let first = DependencyGraph::build(&specs)
        .unwrap()
        .topological_order()
        .unwrap();
    let second = DependencyGraph::build(&specs)
        .unwrap()
        .topological_order()
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_cycle_rejected_with_member_named() {
    let a = ResourceSpec::new(ResourceKind::RouteTable, "ring-a")
        .property("vpc_id", json!("${ring-b.id}"));
    let b = ResourceSpec::new(ResourceKind::RouteTable, "ring-b")
        .property("vpc_id", json!("${ring-c.id}"));
    let c = ResourceSpec::new(ResourceKind::RouteTable, "ring-c")
        .property("vpc_id", json!("${ring-a.id}"));

    let err = DependencyGraph::build(&[a, b, c]).unwrap_err();
    match err {
        Error::Cycle(members) => {
            assert!(!members.is_empty());
            assert!(members.iter().all(|m| m.starts_with("ring-")));
        }
        other => panic!("expected cycle error, got {other}"),
    }
}

#[test]
fn test_dangling_reference_rejected() {
    let subnet = ResourceSpec::new(ResourceKind::Subnet, "public-subnet")
        .property("vpc_id", json!("${ghost-vpc.id}"))
        .property("cidr_block", json!("10.0.1.0/24"));
    let err = DependencyGraph::build(&[subnet]).unwrap_err();
    match err {
        Error::UnknownResource {
            resource,
            referenced_by,
        } => {
            assert_eq!(resource, "ghost-vpc");
            assert_eq!(referenced_by, "public-subnet");
        }
        other => panic!("expected unknown resource error, got {other}"),
    }
}

// ============================================================================
// Property Tests
// ============================================================================

/// Generates an acyclic declaration set as dependency bitmasks: resource
/// `i` may only reference resources declared before it, so bit `j` of mask
/// `i` is meaningful only for `j < i`.
fn dag_strategy() -> impl Strategy<Value = Vec<u32>> {
    (1usize..=7).prop_flat_map(|n| {
        proptest::collection::vec(any::<u32>(), n).prop_map(|raw| {
            raw.iter()
                .enumerate()
                .map(|(i, bits)| bits % (1u32 << i))
                .collect()
        })
    })
}

fn specs_from_masks(masks: &[u32]) -> Vec<ResourceSpec> {
    masks
        .iter()
        .enumerate()
        .map(|(i, mask)| {
            let mut tags = serde_json::Map::new();
            for j in 0..i {
                if mask & (1 << j) != 0 {
                    tags.insert(format!("dep{j}"), json!(format!("${{r{j}.id}}")));
                }
            }
            ResourceSpec::new(ResourceKind::Vpc, format!("r{i}"))
                .property("cidr_block", json!("10.0.0.0/16"))
                .property("tags", serde_json::Value::Object(tags))
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_resolver_satisfies_every_edge(masks in dag_strategy()) {
        let specs = specs_from_masks(&masks);
        let graph = DependencyGraph::build(&specs).unwrap();
        let order = graph.topological_order().unwrap();

        prop_assert_eq!(order.len(), specs.len());
        for edge in graph.edges() {
            let to = order.iter().position(|n| n == &edge.to).unwrap();
            let from = order.iter().position(|n| n == &edge.from).unwrap();
            prop_assert!(to < from, "edge {} -> {} violated", edge.from, edge.to);
        }
    }

    #[test]
    fn prop_waves_never_contain_an_edge(masks in dag_strategy()) {
        let specs = specs_from_masks(&masks);
        let graph = DependencyGraph::build(&specs).unwrap();
        for wave in graph.waves().unwrap() {
            for edge in graph.edges() {
                prop_assert!(!(wave.contains(&edge.from) && wave.contains(&edge.to)));
            }
        }
    }
}
