//! Dependency Graph for Dump Ordering
//!
//! Database objects reference each other: functions take table row types as
//! arguments, tables call functions from column defaults, domains use
//! functions in check constraints. The graph records those "depends on"
//! edges and produces an emission order in which every object comes after
//! the objects it needs.
//!
//! # Ordering Guarantees
//! - Kahn's algorithm, processed level by level (all currently free nodes form
//!   one level)
//! - Within a level nodes keep their insertion order, so the same graph always
//!   sorts the same way and repeated dumps of an unchanged schema are identical
//! - Nodes caught in a cycle are appended in insertion order after every
//!   resolvable node; they still receive a position
//!
//! # Edge Policy
//! Edges must connect nodes that were already added. An edge naming an unknown
//! oid is rejected with [`FerryError::UnknownNode`] and the graph is unchanged.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{FerryError, Result};

/// Kinds of database objects handled by the dump engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Schema,
    Table,
    View,
    Function,
    Aggregate,
    Sequence,
    Type,
    Domain,
    Role,
    Trigger,
    Rule,
}

impl ObjectKind {
    /// Get the kind name as a lowercase string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Table => "table",
            Self::View => "view",
            Self::Function => "function",
            Self::Aggregate => "aggregate",
            Self::Sequence => "sequence",
            Self::Type => "type",
            Self::Domain => "domain",
            Self::Role => "role",
            Self::Trigger => "trigger",
            Self::Rule => "rule",
        }
    }

    /// Parse a kind name (case-insensitive)
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "schema" => Self::Schema,
            "table" => Self::Table,
            "view" => Self::View,
            "function" => Self::Function,
            "aggregate" => Self::Aggregate,
            "sequence" => Self::Sequence,
            "type" => Self::Type,
            "domain" => Self::Domain,
            "role" => Self::Role,
            "trigger" => Self::Trigger,
            "rule" => Self::Rule,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One database object participating in dependency resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectNode {
    /// Catalog oid (identity within a graph)
    pub oid: String,

    /// Object kind
    pub kind: ObjectKind,

    /// Object name (unquoted)
    pub name: String,

    /// Schema name (unquoted)
    pub schema: String,

    /// Oids this node depends on, in the order they were added
    pub dependencies: Vec<String>,

    /// Kind-specific extras (e.g. identity arguments of a function)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Index in the sorted order, -1 until sorted
    pub position: i64,
}

impl ObjectNode {
    /// Create a new, unsorted node
    pub fn new(
        oid: impl Into<String>,
        kind: ObjectKind,
        name: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            oid: oid.into(),
            kind,
            name: name.into(),
            schema: schema.into(),
            dependencies: Vec::new(),
            metadata: BTreeMap::new(),
            position: -1,
        }
    }

    /// Attach a metadata value
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Record a dependency (ignored when already present)
    pub fn add_dependency(&mut self, oid: impl Into<String>) {
        let oid = oid.into();
        if !self.dependencies.contains(&oid) {
            self.dependencies.push(oid);
        }
    }

    /// Schema-qualified name
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl std::fmt::Display for ObjectNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} (OID: {}, Position: {})",
            self.kind,
            self.qualified_name(),
            self.oid,
            self.position
        )
    }
}

/// Directed "depends on" graph over [`ObjectNode`]s
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<ObjectNode>,
    index: HashMap<String, usize>,
    circular: Vec<usize>,
    sorted: bool,
}

impl DependencyGraph {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node; its oid must be unique within the graph
    pub fn add_node(&mut self, node: ObjectNode) -> Result<()> {
        if self.index.contains_key(&node.oid) {
            return Err(FerryError::DuplicateNode(node.oid));
        }

        if let Some(missing) = node.dependencies.iter().find(|dep| !self.index.contains_key(*dep)) {
            return Err(FerryError::UnknownNode(missing.clone()));
        }

        let mut node = node;
        node.position = -1;

        self.index.insert(node.oid.clone(), self.nodes.len());
        self.nodes.push(node);
        self.invalidate();
        Ok(())
    }

    /// Record that `from` depends on `to` (`to` must be emitted first)
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.index.contains_key(to) {
            return Err(FerryError::UnknownNode(to.to_string()));
        }
        let Some(&from_idx) = self.index.get(from) else {
            return Err(FerryError::UnknownNode(from.to_string()));
        };

        self.nodes[from_idx].add_dependency(to);
        self.invalidate();
        Ok(())
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by oid
    #[must_use]
    pub fn node(&self, oid: &str) -> Option<&ObjectNode> {
        self.index.get(oid).map(|&i| &self.nodes[i])
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &ObjectNode> {
        self.nodes.iter()
    }

    /// Compute the emission order and assign positions
    ///
    /// Nodes that cannot be resolved (members of a cycle and everything that
    /// depends on one) are appended in insertion order.
    pub fn topological_sort(&mut self) -> Vec<&ObjectNode> {
        let count = self.nodes.len();
        let mut in_degree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (idx, node) in self.nodes.iter().enumerate() {
            for dep in &node.dependencies {
                let dep_idx = self.index[dep];
                in_degree[idx] += 1;
                dependents[dep_idx].push(idx);
            }
        }

        let mut order = Vec::with_capacity(count);
        let mut level: Vec<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();

        while !level.is_empty() {
            let mut next = Vec::new();
            for &idx in &level {
                order.push(idx);
                for &dependent in &dependents[idx] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            level = next;
        }

        self.circular = (0..count).filter(|&i| in_degree[i] > 0).collect();
        order.extend(self.circular.iter().copied());

        for (position, &idx) in order.iter().enumerate() {
            self.nodes[idx].position = position as i64;
        }
        self.sorted = true;

        if !self.circular.is_empty() {
            tracing::warn!(
                nodes = self.circular.len(),
                "circular dependencies detected, using insertion order for cyclic objects"
            );
        }

        order.into_iter().map(|idx| &self.nodes[idx]).collect()
    }

    /// Whether the most recent sort left unresolved nodes
    #[must_use]
    pub fn has_circular_dependencies(&self) -> bool {
        self.sorted && !self.circular.is_empty()
    }

    /// Nodes the most recent sort could not resolve, in insertion order
    #[must_use]
    pub fn circular_nodes(&self) -> Vec<&ObjectNode> {
        if !self.sorted {
            return Vec::new();
        }
        self.circular.iter().map(|&idx| &self.nodes[idx]).collect()
    }

    /// Sorted position of `oid`, or -1 when unknown or not yet sorted
    #[must_use]
    pub fn position(&self, oid: &str) -> i64 {
        self.node(oid).map_or(-1, |node| node.position)
    }

    /// Whether a reference from `from` to `to` must be written later
    ///
    /// True iff `to` is emitted strictly after `from`.
    #[must_use]
    pub fn should_defer(&self, from: &str, to: &str) -> bool {
        self.position(to) > self.position(from)
    }

    fn invalidate(&mut self) {
        if self.sorted {
            for node in &mut self.nodes {
                node.position = -1;
            }
            self.circular.clear();
            self.sorted = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(oid: &str, name: &str) -> ObjectNode {
        ObjectNode::new(oid, ObjectKind::Function, name, "public")
    }

    fn oids(nodes: &[&ObjectNode]) -> Vec<String> {
        nodes.iter().map(|n| n.oid.clone()).collect()
    }

    #[test]
    fn test_linear_chain() {
        let mut graph = DependencyGraph::new();
        graph.add_node(func("1", "func_a")).unwrap();
        graph.add_node(func("2", "func_b")).unwrap();
        graph.add_node(func("3", "func_c")).unwrap();
        graph.add_edge("1", "2").unwrap();
        graph.add_edge("2", "3").unwrap();

        let sorted = graph.topological_sort();
        assert_eq!(oids(&sorted), vec!["3", "2", "1"]);
        assert!(!graph.has_circular_dependencies());
    }

    #[test]
    fn test_table_depends_on_function() {
        let mut graph = DependencyGraph::new();
        graph.add_node(ObjectNode::new("400", ObjectKind::Table, "items", "public")).unwrap();
        graph.add_node(func("300", "gen_id")).unwrap();
        graph.add_edge("400", "300").unwrap();

        let sorted = graph.topological_sort();
        assert_eq!(oids(&sorted), vec!["300", "400"]);
    }

    #[test]
    fn test_complex_mixed_dependencies() {
        let mut graph = DependencyGraph::new();
        graph.add_node(func("1", "base_func")).unwrap();
        graph.add_node(ObjectNode::new("2", ObjectKind::Table, "table1", "public")).unwrap();
        graph.add_node(func("3", "derived_func")).unwrap();
        graph.add_node(ObjectNode::new("4", ObjectKind::Table, "table2", "public")).unwrap();
        graph.add_node(ObjectNode::new("5", ObjectKind::Domain, "email", "public")).unwrap();

        graph.add_edge("2", "1").unwrap();
        graph.add_edge("3", "2").unwrap();
        graph.add_edge("4", "3").unwrap();
        graph.add_edge("5", "1").unwrap();

        graph.topological_sort();

        assert_eq!(graph.position("1"), 0);
        assert!(graph.position("2") > graph.position("1"));
        assert!(graph.position("5") > graph.position("1"));
        assert!(graph.position("3") > graph.position("2"));
        assert!(graph.position("4") > graph.position("3"));
    }

    #[test]
    fn test_every_edge_respected() {
        let mut graph = DependencyGraph::new();
        for i in 0..8 {
            graph.add_node(func(&i.to_string(), &format!("f{i}"))).unwrap();
        }
        let edges = [("0", "5"), ("1", "0"), ("2", "7"), ("3", "1"), ("7", "6"), ("4", "2")];
        for (from, to) in edges {
            graph.add_edge(from, to).unwrap();
        }

        graph.topological_sort();
        for (from, to) in edges {
            assert!(graph.position(from) > graph.position(to), "{from} must follow {to}");
        }
    }

    #[test]
    fn test_sort_is_deterministic() {
        let build = || {
            let mut graph = DependencyGraph::new();
            for i in 0..6 {
                graph.add_node(func(&format!("{}", 10 + i), "f")).unwrap();
            }
            graph.add_edge("10", "15").unwrap();
            graph.add_edge("12", "11").unwrap();
            graph
        };

        let mut first = build();
        let mut second = build();
        let a = oids(&first.topological_sort());
        let b = oids(&second.topological_sort());
        assert_eq!(a, b);

        // Sorting the same graph again is stable as well
        let c = oids(&first.topological_sort());
        assert_eq!(a, c);
    }

    #[test]
    fn test_insertion_order_breaks_ties() {
        let mut graph = DependencyGraph::new();
        graph.add_node(func("b", "second")).unwrap();
        graph.add_node(func("a", "first")).unwrap();
        graph.add_node(func("c", "third")).unwrap();

        let sorted = graph.topological_sort();
        assert_eq!(oids(&sorted), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_two_node_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_node(func("10", "func_a")).unwrap();
        graph.add_node(func("20", "func_b")).unwrap();
        graph.add_edge("10", "20").unwrap();
        graph.add_edge("20", "10").unwrap();

        let sorted = graph.topological_sort();
        assert_eq!(sorted.len(), 2);
        assert!(graph.has_circular_dependencies());

        let circular = oids(&graph.circular_nodes());
        assert_eq!(circular, vec!["10", "20"]);
        assert_eq!(graph.position("10"), 0);
        assert_eq!(graph.position("20"), 1);
    }

    #[test]
    fn test_cycle_members_follow_resolvable_nodes() {
        let mut graph = DependencyGraph::new();
        graph.add_node(func("1", "loop_a")).unwrap();
        graph.add_node(func("2", "loop_b")).unwrap();
        graph.add_node(func("3", "free")).unwrap();
        graph.add_edge("1", "2").unwrap();
        graph.add_edge("2", "1").unwrap();

        let sorted = graph.topological_sort();
        assert_eq!(oids(&sorted), vec!["3", "1", "2"]);
    }

    #[test]
    fn test_should_defer() {
        let mut graph = DependencyGraph::new();
        graph.add_node(func("1", "func_a")).unwrap();
        graph.add_node(ObjectNode::new("2", ObjectKind::Table, "table_b", "public")).unwrap();
        graph.add_node(func("3", "func_c")).unwrap();
        graph.add_edge("2", "3").unwrap();

        graph.topological_sort();

        assert!(!graph.should_defer("2", "3"));
        assert!(!graph.should_defer("2", "1"));
        assert!(graph.should_defer("1", "2"));
        // Equal positions never defer
        assert!(!graph.should_defer("1", "1"));
        for (x, y) in [("1", "2"), ("2", "3"), ("3", "1")] {
            assert_eq!(graph.should_defer(x, y), graph.position(y) > graph.position(x));
        }
    }

    #[test]
    fn test_get_position() {
        let mut graph = DependencyGraph::new();
        graph.add_node(func("100", "func_a")).unwrap();
        graph.add_node(ObjectNode::new("200", ObjectKind::Table, "table_b", "public")).unwrap();

        assert_eq!(graph.position("100"), -1);
        graph.topological_sort();

        let a = graph.position("100");
        let b = graph.position("200");
        assert!(a >= 0 && b >= 0);
        assert_ne!(a, b);
        assert_eq!(graph.position("999"), -1);
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add_node(func("1", "a")).unwrap();
        let err = graph.add_node(func("1", "b")).unwrap_err();
        assert!(matches!(err, FerryError::DuplicateNode(ref oid) if oid == "1"));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_edge_to_unknown_node_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add_node(func("1", "a")).unwrap();

        let err = graph.add_edge("1", "404").unwrap_err();
        assert!(matches!(err, FerryError::UnknownNode(ref oid) if oid == "404"));
        let err = graph.add_edge("404", "1").unwrap_err();
        assert!(matches!(err, FerryError::UnknownNode(ref oid) if oid == "404"));

        assert!(graph.node("1").unwrap().dependencies.is_empty());
    }

    #[test]
    fn test_node_with_unknown_prefilled_dependency_rejected() {
        let mut graph = DependencyGraph::new();
        let mut node = func("1", "a");
        node.add_dependency("2");

        assert!(matches!(graph.add_node(node), Err(FerryError::UnknownNode(_))));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_mutation_invalidates_positions() {
        let mut graph = DependencyGraph::new();
        graph.add_node(func("1", "a")).unwrap();
        graph.topological_sort();
        assert_eq!(graph.position("1"), 0);

        graph.add_node(func("2", "b")).unwrap();
        assert_eq!(graph.position("1"), -1);
    }

    #[test]
    fn test_node_display() {
        let node = ObjectNode::new("7", ObjectKind::Table, "users", "app");
        assert_eq!(node.to_string(), "table app.users (OID: 7, Position: -1)");
        assert_eq!(node.qualified_name(), "app.users");
    }
}
