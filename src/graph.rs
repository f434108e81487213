//! Dependency graph construction and resolution.
//!
//! The graph builder turns an ordered sequence of [`ResourceSpec`]
//! declarations into a validated directed acyclic graph: every reference in
//! a property bag becomes a first-class [`Reference`] edge, collected up
//! front so dangling targets and cycles are caught before anything touches a
//! provider.
//!
//! The resolver side produces a total apply order (Kahn's algorithm, stable
//! with respect to declaration order) and a partition of that order into
//! waves of mutually independent resources for the engine.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};

use crate::error::{Error, Result};
use crate::resource::ResourceSpec;

// ============================================================================
// Edges
// ============================================================================

/// A directed dependency edge: `from` consumes an output attribute of `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// The dependent resource.
    pub from: String,
    /// The resource being depended on.
    pub to: String,
    /// The output attribute of `to` that `from` consumes.
    pub attribute: String,
}

// ============================================================================
// Dependency Graph
// ============================================================================

/// DFS colors for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// A validated, acyclic dependency graph over resource declarations.
///
/// Nodes keep their declaration order; all iteration and tie-breaking is
/// deterministic so repeated runs produce identical apply plans.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Declarations in original order, keyed by logical name.
    resources: IndexMap<String, ResourceSpec>,
    /// All reference edges, in scan order.
    edges: Vec<Reference>,
    /// name -> names it depends on (deduplicated, scan order).
    depends_on: HashMap<String, IndexSet<String>>,
    /// name -> names that depend on it (deduplicated, scan order).
    dependents: HashMap<String, IndexSet<String>>,
}

impl DependencyGraph {
    /// Builds and validates a graph from declarations.
    ///
    /// Fails, in declaration order, on: duplicate names, schema violations,
    /// self-references, references to undeclared resources, references to
    /// attributes the target kind does not output, and dependency cycles.
    /// No side effects.
    pub fn build(resources: &[ResourceSpec]) -> Result<Self> {
        let mut graph = Self {
            resources: IndexMap::with_capacity(resources.len()),
            edges: Vec::new(),
            depends_on: HashMap::with_capacity(resources.len()),
            dependents: HashMap::with_capacity(resources.len()),
        };

        for spec in resources {
            if graph.resources.contains_key(&spec.name) {
                return Err(Error::DuplicateResource(spec.name.clone()));
            }
            spec.validate_schema()?;
            graph.depends_on.insert(spec.name.clone(), IndexSet::new());
            graph.dependents.insert(spec.name.clone(), IndexSet::new());
            graph.resources.insert(spec.name.clone(), spec.clone());
        }

        for spec in resources {
            for attr_ref in spec.references() {
                if attr_ref.resource == spec.name {
                    return Err(Error::SelfReference(spec.name.clone()));
                }
                let target = graph.resources.get(&attr_ref.resource).ok_or_else(|| {
                    Error::unknown_resource(&attr_ref.resource, &spec.name)
                })?;
                if !target.kind.schema().produces_output(&attr_ref.attribute) {
                    return Err(Error::invalid_declaration(
                        &spec.name,
                        format!(
                            "references '{}.{}' but kind '{}' does not produce output '{}'",
                            attr_ref.resource, attr_ref.attribute, target.kind, attr_ref.attribute
                        ),
                    ));
                }
                graph.edges.push(Reference {
                    from: spec.name.clone(),
                    to: attr_ref.resource.clone(),
                    attribute: attr_ref.attribute.clone(),
                });
                graph
                    .depends_on
                    .get_mut(&spec.name)
                    .expect("node inserted above")
                    .insert(attr_ref.resource.clone());
                graph
                    .dependents
                    .get_mut(&attr_ref.resource)
                    .expect("node inserted above")
                    .insert(spec.name.clone());
            }
        }

        graph.detect_cycle()?;
        Ok(graph)
    }

    /// Three-color depth-first cycle detection. A gray-to-gray revisit
    /// means the current DFS path loops; the reported cycle is the path
    /// slice from the revisited node onward.
    fn detect_cycle(&self) -> Result<()> {
        let mut marks: HashMap<&str, Mark> = self
            .resources
            .keys()
            .map(|name| (name.as_str(), Mark::White))
            .collect();

        for name in self.resources.keys() {
            if marks[name.as_str()] == Mark::White {
                let mut path = Vec::new();
                self.visit(name, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<()> {
        marks.insert(name, Mark::Gray);
        path.push(name);

        if let Some(deps) = self.depends_on.get(name) {
            for dep in deps {
                match marks[dep.as_str()] {
                    Mark::Gray => {
                        let start = path
                            .iter()
                            .position(|n| *n == dep.as_str())
                            .unwrap_or(0);
                        let cycle = path[start..].iter().map(|n| (*n).to_string()).collect();
                        return Err(Error::Cycle(cycle));
                    }
                    Mark::White => self.visit(dep, marks, path)?,
                    Mark::Black => {}
                }
            }
        }

        marks.insert(name, Mark::Black);
        path.pop();
        Ok(())
    }

    /// Returns the declarations in original order.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.resources.values()
    }

    /// Looks up a declaration by logical name.
    pub fn get(&self, name: &str) -> Option<&ResourceSpec> {
        self.resources.get(name)
    }

    /// Returns true if `name` is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Number of declared resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the graph has no resources.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// All reference edges, in declaration scan order.
    pub fn edges(&self) -> &[Reference] {
        &self.edges
    }

    /// The direct dependencies of `name`.
    pub fn dependencies_of(&self, name: &str) -> impl Iterator<Item = &str> {
        self.depends_on
            .get(name)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Every resource that depends on `name`, directly or transitively.
    pub fn transitive_dependents(&self, name: &str) -> HashSet<String> {
        let mut found = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(name.to_string());

        while let Some(current) = queue.pop_front() {
            if let Some(dependents) = self.dependents.get(&current) {
                for dependent in dependents {
                    if found.insert(dependent.clone()) {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }
        found
    }

    /// Produces a total apply order: for every edge A -> B, B precedes A.
    ///
    /// Kahn's algorithm; among equally eligible resources the earliest
    /// declaration wins, so apply plans are reproducible. Nodes left over
    /// when the queue drains indicate a cycle (a redundant guard;
    /// [`build`](Self::build) already rejects cyclic graphs).
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree: Vec<usize> = vec![0; self.resources.len()];
        for (name, deps) in &self.depends_on {
            let index = self
                .resources
                .get_index_of(name.as_str())
                .expect("depends_on key is a declared node");
            in_degree[index] = deps.len();
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(index, _)| Reverse(index))
            .collect();

        let mut order = Vec::with_capacity(self.resources.len());
        while let Some(Reverse(index)) = ready.pop() {
            let (name, _) = self
                .resources
                .get_index(index)
                .expect("index from in_degree is valid");
            order.push(name.clone());
            if let Some(dependents) = self.dependents.get(name) {
                for dependent in dependents {
                    let dep_index = self
                        .resources
                        .get_index_of(dependent.as_str())
                        .expect("dependent is a declared node");
                    in_degree[dep_index] -= 1;
                    if in_degree[dep_index] == 0 {
                        ready.push(Reverse(dep_index));
                    }
                }
            }
        }

        if order.len() != self.resources.len() {
            let leftover: Vec<String> = self
                .resources
                .keys()
                .filter(|name| !order.contains(name))
                .cloned()
                .collect();
            return Err(Error::Cycle(leftover));
        }

        Ok(order)
    }

    /// Partitions the apply order into waves: each wave is the maximal set
    /// of not-yet-ordered resources whose dependencies are all in earlier
    /// waves. Resources within a wave share no edges and may be applied
    /// concurrently; waves are sequential. Declaration order is preserved
    /// within each wave.
    pub fn waves(&self) -> Result<Vec<Vec<String>>> {
        let mut in_degree: IndexMap<&str, usize> = self
            .resources
            .keys()
            .map(|name| (name.as_str(), 0))
            .collect();
        for (name, deps) in &self.depends_on {
            if let Some(count) = in_degree.get_mut(name.as_str()) {
                *count = deps.len();
            }
        }

        let mut waves = Vec::new();
        let mut ordered = 0usize;
        let mut current: Vec<&str> = in_degree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();

        while !current.is_empty() {
            let mut next: Vec<&str> = Vec::new();
            for name in &current {
                if let Some(dependents) = self.dependents.get(*name) {
                    for dependent in dependents {
                        let count = in_degree
                            .get_mut(dependent.as_str())
                            .expect("dependent is a declared node");
                        *count -= 1;
                        if *count == 0 {
                            next.push(dependent.as_str());
                        }
                    }
                }
            }
            ordered += current.len();
            // Restore declaration order; dependents were visited in edge
            // scan order.
            next.sort_by_key(|name| self.resources.get_index_of(*name));
            waves.push(current.iter().map(|n| (*n).to_string()).collect());
            current = next;
        }

        if ordered != self.resources.len() {
            let leftover: Vec<String> = self
                .resources
                .keys()
                .filter(|name| {
                    in_degree
                        .get(name.as_str())
                        .is_some_and(|count| *count > 0)
                })
                .cloned()
                .collect();
            return Err(Error::Cycle(leftover));
        }

        Ok(waves)
    }

    /// Renders the graph in DOT format for Graphviz.
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        out.push_str("digraph resources {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n");
        for spec in self.resources.values() {
            out.push_str(&format!(
                "    \"{}\" [label=\"{}\\n({})\"];\n",
                spec.name, spec.name, spec.kind
            ));
        }
        for edge in &self.edges {
            out.push_str(&format!(
                "    \"{}\" -> \"{}\" [label=\"{}\"];\n",
                edge.from, edge.to, edge.attribute
            ));
        }
        out.push_str("}\n");
        out
    }
}
