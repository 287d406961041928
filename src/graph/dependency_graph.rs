//! Owned, insertion-ordered dependency graph
//!
//! Nodes are interned into a dense index space; each node keeps its direct
//! dependencies in declaration order with duplicates removed. A dependency that
//! is never declared as a key becomes a leaf node with no dependencies.

use crate::collaborators::{CollaboratorError, DependencySource};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(node, dependencies)` pairs, preserving iteration order
    pub fn from_pairs<I, N, D, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = Self::new();
        for (node, dependencies) in pairs {
            let node = node.into();
            graph.add_node(node.clone());
            for dependency in dependencies {
                graph.add_dependency(node.clone(), dependency);
            }
        }
        graph
    }

    /// Build the flattened view for `nodes` from an external dependency source
    ///
    /// Only the listed nodes are queried; discovered targets that are not in
    /// the list become leaves.
    pub async fn from_source(
        nodes: &[String],
        source: &dyn DependencySource,
    ) -> Result<Self, CollaboratorError> {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node.clone());
        }
        for node in nodes {
            for edge in source.extract_dependencies(node).await? {
                graph.add_dependency(node.clone(), edge.target);
            }
        }
        Ok(graph)
    }

    /// Intern a node, returning its index
    pub fn add_node(&mut self, node: impl Into<String>) -> usize {
        let node = node.into();
        if let Some(&idx) = self.index.get(&node) {
            return idx;
        }
        let idx = self.nodes.len();
        self.index.insert(node.clone(), idx);
        self.nodes.push(node);
        self.edges.push(Vec::new());
        idx
    }

    /// Record that `node` depends on `dependency`
    pub fn add_dependency(&mut self, node: impl Into<String>, dependency: impl Into<String>) {
        let from = self.add_node(node);
        let to = self.add_node(dependency);
        if !self.edges[from].contains(&to) {
            self.edges[from].push(to);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.index.contains_key(node)
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }

    /// Direct dependencies of `node` in declaration order
    pub fn dependencies(&self, node: &str) -> Vec<&str> {
        self.index
            .get(node)
            .map(|&idx| self.edges[idx].iter().map(|&d| self.name(d)).collect())
            .unwrap_or_default()
    }

    /// Nodes that directly depend on `node`, in graph order
    pub fn dependents_of(&self, node: &str) -> Vec<&str> {
        let Some(&target) = self.index.get(node) else {
            return Vec::new();
        };
        (0..self.len())
            .filter(|&idx| self.edges[idx].contains(&target))
            .map(|idx| self.name(idx))
            .collect()
    }

    /// Restrict the graph to `targets`, dropping edges that leave the set
    ///
    /// Dependencies outside the target set are treated as already satisfied.
    pub fn subgraph(&self, targets: &[String]) -> Self {
        let keep: HashSet<&str> = targets.iter().map(String::as_str).collect();
        let mut graph = Self::new();
        for target in targets {
            graph.add_node(target.clone());
        }
        for target in targets {
            for dependency in self.dependencies(target) {
                if keep.contains(dependency) {
                    graph.add_dependency(target.clone(), dependency);
                }
            }
        }
        graph
    }

    /// Owned `node -> [dependency]` view
    pub fn to_map(&self) -> HashMap<String, Vec<String>> {
        self.nodes
            .iter()
            .map(|node| {
                let deps = self
                    .dependencies(node)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                (node.clone(), deps)
            })
            .collect()
    }

    pub(crate) fn id(&self, node: &str) -> Option<usize> {
        self.index.get(node).copied()
    }

    pub(crate) fn name(&self, idx: usize) -> &str {
        &self.nodes[idx]
    }

    pub(crate) fn deps_of(&self, idx: usize) -> &[usize] {
        &self.edges[idx]
    }

    /// Reverse adjacency: for each node, the nodes that depend on it
    pub(crate) fn reverse_edges(&self) -> Vec<Vec<usize>> {
        let mut reverse = vec![Vec::new(); self.len()];
        for (from, deps) in self.edges.iter().enumerate() {
            for &to in deps {
                reverse[to].push(from);
            }
        }
        reverse
    }
}
