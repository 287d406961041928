//! Built-in handlers for the opaque task types

use super::{TaskExecutionContext, TaskHandler};
use crate::collaborators::DependencySource;
use crate::graph::{DependencyGraph, DependencyGraphAnalyzer};
use crate::models::Task;
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Completes immediately with a result flagged `"simulated": true`
///
/// A payload `simulate_failure` string makes the task fail with that message,
/// which lets callers rehearse recovery paths without real side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedHandler;

#[async_trait]
impl TaskHandler for SimulatedHandler {
    async fn handle(&self, task: &Task, context: &TaskExecutionContext) -> anyhow::Result<Value> {
        if let Some(message) = task.payload.get("simulate_failure").and_then(Value::as_str) {
            bail!("{message}");
        }

        debug!(task_id = %task.id, task_type = %task.task_type, "Simulated task completion");
        Ok(json!({
            "simulated": true,
            "task_id": task.id,
            "task_type": task.task_type.as_str(),
            "repository": task.repository,
            "attempt": context.attempt,
            "completed_at": chrono::Utc::now().to_rfc3339(),
        }))
    }
}

/// Runs the graph analyzer over repositories named by the task
///
/// Nodes come from payload `repositories` (or the task's repository). Edges
/// come from payload `dependencies` when present, otherwise from the
/// dependency source; without either the result is flagged simulated.
pub struct AnalyzeDependenciesHandler {
    source: Option<Arc<dyn DependencySource>>,
    analyzer: DependencyGraphAnalyzer,
}

impl AnalyzeDependenciesHandler {
    pub fn new(source: Option<Arc<dyn DependencySource>>, analyzer: DependencyGraphAnalyzer) -> Self {
        Self { source, analyzer }
    }

    fn nodes(task: &Task) -> anyhow::Result<Vec<String>> {
        if let Some(nodes) = task.payload.get("repositories") {
            return serde_json::from_value(nodes.clone())
                .context("payload 'repositories' must be a list of names");
        }
        match &task.repository {
            Some(repository) => Ok(vec![repository.clone()]),
            None => bail!("Task '{}' names no repositories to analyze", task.id),
        }
    }
}

#[async_trait]
impl TaskHandler for AnalyzeDependenciesHandler {
    async fn handle(&self, task: &Task, _context: &TaskExecutionContext) -> anyhow::Result<Value> {
        let nodes = Self::nodes(task)?;

        let (graph, simulated) = match (task.payload.get("dependencies"), &self.source) {
            (Some(inline), _) => {
                let map: HashMap<String, Vec<String>> = serde_json::from_value(inline.clone())
                    .context("payload 'dependencies' must map names to lists")?;
                let graph = DependencyGraph::from_pairs(
                    nodes
                        .iter()
                        .map(|node| (node.clone(), map.get(node).cloned().unwrap_or_default())),
                );
                (graph, false)
            }
            (None, Some(source)) => (
                DependencyGraph::from_source(&nodes, source.as_ref()).await?,
                false,
            ),
            (None, None) => (
                DependencyGraph::from_pairs(nodes.iter().map(|n| (n.clone(), Vec::<String>::new()))),
                true,
            ),
        };

        let analysis = self.analyzer.analyze(&graph)?;
        Ok(json!({
            "simulated": simulated,
            "nodes": graph.len(),
            "edges": graph.edge_count(),
            "risk_level": analysis.risk.risk_level(),
            "analysis": analysis,
        }))
    }
}
