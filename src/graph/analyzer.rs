//! # Dependency Graph Analyzer
//!
//! Cycle detection, topological ordering, parallel grouping, critical path and
//! risk assessment over a [`DependencyGraph`].

use super::{DependencyGraph, GraphError, IndependenceCheck};
use crate::config::PlanningConfig;
use crate::constants::{defaults, risk};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Structural risk findings for a set of nodes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Nodes with more than three dependents
    pub single_points_of_failure: Vec<String>,
    /// Nodes with more than five edges in total
    pub highly_connected_nodes: Vec<String>,
    /// Dependencies with more than two dependents
    pub critical_dependencies: Vec<String>,
    /// Weighted sum of the findings, capped at 100
    pub risk_score: u32,
}

impl RiskAssessment {
    pub fn risk_level(&self) -> RiskLevel {
        match self.risk_score {
            0..=29 => RiskLevel::Low,
            30..=69 => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Everything the planner and the dependency-ordered strategy need from one graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyAnalysis {
    pub execution_order: Vec<String>,
    pub parallel_groups: Vec<Vec<String>>,
    pub critical_path: Vec<String>,
    pub risk: RiskAssessment,
}

/// Stateless graph algorithms, parameterized by the grouping policy
#[derive(Debug, Clone)]
pub struct DependencyGraphAnalyzer {
    independence: IndependenceCheck,
    critical_resources: Vec<String>,
}

impl Default for DependencyGraphAnalyzer {
    fn default() -> Self {
        Self::new(
            IndependenceCheck::default(),
            defaults::CRITICAL_RESOURCES
                .iter()
                .map(|resource| resource.to_string())
                .collect(),
        )
    }
}

impl DependencyGraphAnalyzer {
    pub fn new(independence: IndependenceCheck, critical_resources: Vec<String>) -> Self {
        Self {
            independence,
            critical_resources: critical_resources
                .into_iter()
                .map(|resource| resource.to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &PlanningConfig) -> Self {
        Self::new(config.independence_check, config.critical_resources.clone())
    }

    /// Find every cycle closed by a back edge during a depth-first walk
    ///
    /// Each cycle lists the path from the first occurrence of the revisited
    /// node up to the node that closes the loop, without repeating the start.
    pub fn detect_cycles(&self, graph: &DependencyGraph) -> Vec<Vec<String>> {
        let n = graph.len();
        let mut visited = vec![false; n];
        let mut path_position: Vec<Option<usize>> = vec![None; n];
        let mut cycles = Vec::new();

        for root in 0..n {
            if visited[root] {
                continue;
            }

            visited[root] = true;
            path_position[root] = Some(0);
            let mut path = vec![root];
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(frame) = stack.last_mut() {
                let (node, next) = *frame;
                let deps = graph.deps_of(node);

                if next < deps.len() {
                    frame.1 += 1;
                    let child = deps[next];
                    if let Some(start) = path_position[child] {
                        cycles.push(
                            path[start..]
                                .iter()
                                .map(|&idx| graph.name(idx).to_string())
                                .collect(),
                        );
                    } else if !visited[child] {
                        visited[child] = true;
                        path_position[child] = Some(path.len());
                        path.push(child);
                        stack.push((child, 0));
                    }
                } else {
                    stack.pop();
                    path.pop();
                    path_position[node] = None;
                }
            }
        }

        if !cycles.is_empty() {
            debug!(cycle_count = cycles.len(), "Dependency cycles detected");
        }
        cycles
    }

    /// Dependency-first order: a node is emitted only after all of its dependencies
    pub fn topological_order(&self, graph: &DependencyGraph) -> Result<Vec<String>, GraphError> {
        let n = graph.len();
        let mut finished = vec![false; n];
        let mut on_path = vec![false; n];
        let mut order = Vec::with_capacity(n);

        for root in 0..n {
            if finished[root] {
                continue;
            }

            on_path[root] = true;
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(frame) = stack.last_mut() {
                let (node, next) = *frame;
                let deps = graph.deps_of(node);

                if next < deps.len() {
                    frame.1 += 1;
                    let child = deps[next];
                    if on_path[child] {
                        return Err(GraphError::CircularDependency {
                            cycles: self.detect_cycles(graph),
                        });
                    }
                    if !finished[child] {
                        on_path[child] = true;
                        stack.push((child, 0));
                    }
                } else {
                    stack.pop();
                    on_path[node] = false;
                    finished[node] = true;
                    order.push(graph.name(node).to_string());
                }
            }
        }

        Ok(order)
    }

    /// Greedily split `order` into consecutive groups of mutually independent nodes
    ///
    /// A node joins the current group when none of its transitive dependencies
    /// sits in that group (and, under the resource heuristic, when it does not
    /// share a critical resource with a member); otherwise the group is closed
    /// and a new one starts. `order` must be dependency-first, so every group
    /// only depends on earlier groups. Runs in `O(n + e)`.
    pub fn parallel_groups(&self, graph: &DependencyGraph, order: &[String]) -> Vec<Vec<String>> {
        let mut group_of: Vec<Option<usize>> = vec![None; graph.len()];
        let mut highest: Vec<Option<Option<usize>>> = vec![None; graph.len()];

        let mut groups: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_critical = false;

        for node in order {
            // Nodes outside the graph have no known dependencies
            let Some(idx) = graph.id(node) else {
                current.push(node.clone());
                continue;
            };
            if group_of[idx].is_some() {
                continue;
            }

            let critical = matches!(self.independence, IndependenceCheck::ResourceHeuristic)
                && self.touches_critical_resource(graph, node);
            let depends_on_current =
                Self::highest_dependency_group(graph, idx, &group_of, &mut highest)
                    == Some(groups.len());

            if !current.is_empty() && (depends_on_current || (critical && current_critical)) {
                groups.push(std::mem::take(&mut current));
                current_critical = false;
            }
            group_of[idx] = Some(groups.len());
            current_critical |= critical;
            current.push(node.clone());
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    /// Highest group index among the transitive dependencies of `start`
    ///
    /// Memoized in `highest`; values are stable because a dependency-first
    /// order groups every dependency before its dependents are asked about.
    fn highest_dependency_group(
        graph: &DependencyGraph,
        start: usize,
        group_of: &[Option<usize>],
        highest: &mut [Option<Option<usize>>],
    ) -> Option<usize> {
        if let Some(known) = highest[start] {
            return known;
        }

        let mut on_stack = HashSet::from([start]);
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            let deps = graph.deps_of(node);

            if next < deps.len() {
                frame.1 += 1;
                let dep = deps[next];
                if highest[dep].is_none() && on_stack.insert(dep) {
                    stack.push((dep, 0));
                }
            } else {
                stack.pop();
                on_stack.remove(&node);
                let value = deps
                    .iter()
                    .map(|&dep| group_of[dep].max(highest[dep].flatten()))
                    .max()
                    .flatten();
                highest[node] = Some(value);
            }
        }
        highest[start].flatten()
    }

    fn touches_critical_resource(&self, graph: &DependencyGraph, node: &str) -> bool {
        graph.dependencies(node).iter().any(|dependency| {
            let dependency = dependency.to_lowercase();
            self.critical_resources
                .iter()
                .any(|resource| dependency.contains(resource.as_str()))
        })
    }

    /// Longest dependency chain (by node count) starting from any of `nodes`
    ///
    /// Returned dependency-first, so it reads as an execution sequence. Ties go
    /// to the first candidate in `nodes` order, then to the first dependency in
    /// declaration order.
    pub fn critical_path(&self, graph: &DependencyGraph, nodes: &[String]) -> Vec<String> {
        let longest = self.longest_chain_lengths(graph);

        let mut best: Option<usize> = None;
        for node in nodes {
            if let Some(idx) = graph.id(node) {
                if best.map_or(true, |b| longest[idx] > longest[b]) {
                    best = Some(idx);
                }
            }
        }
        let Some(start) = best else {
            return Vec::new();
        };

        let mut chain = vec![start];
        let mut seen: HashSet<usize> = HashSet::from([start]);
        let mut current = start;
        loop {
            let mut next: Option<usize> = None;
            for &dep in graph.deps_of(current) {
                if seen.contains(&dep) {
                    continue;
                }
                if next.map_or(true, |n| longest[dep] > longest[n]) {
                    next = Some(dep);
                }
            }
            match next {
                Some(dep) => {
                    seen.insert(dep);
                    chain.push(dep);
                    current = dep;
                }
                None => break,
            }
        }

        chain
            .into_iter()
            .rev()
            .map(|idx| graph.name(idx).to_string())
            .collect()
    }

    /// `longest[n] = 1 + max(longest[dep])`, memoized with an explicit stack
    ///
    /// Back edges (only present in cyclic graphs) contribute nothing.
    fn longest_chain_lengths(&self, graph: &DependencyGraph) -> Vec<usize> {
        let n = graph.len();
        let mut longest = vec![0usize; n];
        let mut done = vec![false; n];
        let mut on_path = vec![false; n];

        for root in 0..n {
            if done[root] {
                continue;
            }
            on_path[root] = true;
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(frame) = stack.last_mut() {
                let (node, next) = *frame;
                let deps = graph.deps_of(node);

                if next < deps.len() {
                    frame.1 += 1;
                    let child = deps[next];
                    if !done[child] && !on_path[child] {
                        on_path[child] = true;
                        stack.push((child, 0));
                    }
                } else {
                    stack.pop();
                    on_path[node] = false;
                    done[node] = true;
                    longest[node] = 1 + deps
                        .iter()
                        .filter(|&&dep| done[dep])
                        .map(|&dep| longest[dep])
                        .max()
                        .unwrap_or(0);
                }
            }
        }
        longest
    }

    /// Score structural fragility of the sub-graph spanned by `nodes`
    pub fn risk_assessment(&self, graph: &DependencyGraph, nodes: &[String]) -> RiskAssessment {
        let n = graph.len();
        let mut in_scope = vec![false; n];
        for node in nodes {
            if let Some(idx) = graph.id(node) {
                in_scope[idx] = true;
            }
        }

        // Edges considered: those declared by in-scope nodes
        let mut dependents = vec![0usize; n];
        let mut out_degree = vec![0usize; n];
        let mut involved = vec![false; n];
        for idx in (0..n).filter(|&idx| in_scope[idx]) {
            involved[idx] = true;
            for &dep in graph.deps_of(idx) {
                out_degree[idx] += 1;
                dependents[dep] += 1;
                involved[dep] = true;
            }
        }

        let mut assessment = RiskAssessment::default();
        for idx in (0..n).filter(|&idx| involved[idx]) {
            let name = graph.name(idx).to_string();
            if dependents[idx] > risk::SINGLE_POINT_OF_FAILURE_DEPENDENTS {
                assessment.single_points_of_failure.push(name.clone());
            }
            if dependents[idx] + out_degree[idx] > risk::HIGHLY_CONNECTED_DEGREE {
                assessment.highly_connected_nodes.push(name.clone());
            }
            if dependents[idx] > risk::CRITICAL_DEPENDENCY_DEPENDENTS {
                assessment.critical_dependencies.push(name);
            }
        }

        let score = assessment.single_points_of_failure.len() as u32
            * risk::SINGLE_POINT_OF_FAILURE_WEIGHT
            + assessment.highly_connected_nodes.len() as u32 * risk::HIGHLY_CONNECTED_WEIGHT
            + assessment.critical_dependencies.len() as u32 * risk::CRITICAL_DEPENDENCY_WEIGHT;
        assessment.risk_score = score.min(risk::MAX_RISK_SCORE);
        assessment
    }

    /// Transitive dependents of `node`: everything affected by a change to it
    pub fn impact_of(&self, graph: &DependencyGraph, node: &str) -> Result<Vec<String>, GraphError> {
        let start = graph.id(node).ok_or_else(|| GraphError::UnknownNode {
            node: node.to_string(),
        })?;
        let reverse = graph.reverse_edges();

        let mut affected = vec![false; graph.len()];
        let mut stack = reverse[start].clone();
        while let Some(idx) = stack.pop() {
            if idx != start && !affected[idx] {
                affected[idx] = true;
                stack.extend(reverse[idx].iter().copied());
            }
        }

        Ok((0..graph.len())
            .filter(|&idx| affected[idx])
            .map(|idx| graph.name(idx).to_string())
            .collect())
    }

    /// Full analysis of an acyclic graph
    pub fn analyze(&self, graph: &DependencyGraph) -> Result<DependencyAnalysis, GraphError> {
        let cycles = self.detect_cycles(graph);
        if !cycles.is_empty() {
            return Err(GraphError::CircularDependency { cycles });
        }

        let execution_order = self.topological_order(graph)?;
        let parallel_groups = self.parallel_groups(graph, &execution_order);
        let critical_path = self.critical_path(graph, graph.nodes());
        let risk = self.risk_assessment(graph, graph.nodes());

        debug!(
            nodes = graph.len(),
            edges = graph.edge_count(),
            groups = parallel_groups.len(),
            critical_path_length = critical_path.len(),
            risk_score = risk.risk_score,
            "Dependency analysis complete"
        );

        Ok(DependencyAnalysis {
            execution_order,
            parallel_groups,
            critical_path,
            risk,
        })
    }
}
