//! # External Collaborators
//!
//! Interface boundaries to systems this engine consumes but does not own:
//! dependency extraction, external pipeline runs and shared-resource claims.
//! Implementations live in the embedding application; this module ships only
//! an in-memory dependency source.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors reported by collaborator implementations
#[derive(Error, Debug, Clone)]
pub enum CollaboratorError {
    #[error("Dependency extraction failed for '{node}': {message}")]
    DependencyExtraction { node: String, message: String },

    #[error("Pipeline trigger failed for '{repository}': {message}")]
    PipelineTrigger { repository: String, message: String },

    #[error("Pipeline status poll failed for run '{run_id}': {message}")]
    PipelinePoll { run_id: String, message: String },

    #[error("Resource '{resource_id}' could not be claimed: {message}")]
    ResourceClaim {
        resource_id: String,
        message: String,
    },

    #[error("Resource '{resource_id}' could not be released: {message}")]
    ResourceRelease {
        resource_id: String,
        message: String,
    },
}

/// One discovered dependency relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub target: String,
    /// e.g. `depends_on`, `consumes`, `deploys_after`
    pub relationship: String,
    /// e.g. `npm`, `docker`, `service`
    #[serde(rename = "type")]
    pub dependency_type: String,
}

impl DependencyEdge {
    pub fn depends_on(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            relationship: "depends_on".to_string(),
            dependency_type: "service".to_string(),
        }
    }
}

/// Discovers the dependencies of a node (manifest parsing, config scanning, ...)
#[async_trait]
pub trait DependencySource: Send + Sync {
    async fn extract_dependencies(&self, node: &str)
        -> Result<Vec<DependencyEdge>, CollaboratorError>;
}

/// Handle to an external pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: String,
    pub repository: String,
    pub workflow_ref: String,
}

/// Polled state of an external pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub completed: bool,
    /// `success`, `failure`, `cancelled`, ... once completed
    pub conclusion: Option<String>,
}

/// Triggers and observes runs on an external CI/CD system
#[async_trait]
pub trait PipelineTrigger: Send + Sync {
    async fn trigger_external_run(
        &self,
        repository: &str,
        workflow_ref: &str,
    ) -> Result<RunHandle, CollaboratorError>;

    async fn poll_run_status(&self, handle: &RunHandle) -> Result<RunStatus, CollaboratorError>;
}

/// Arbitrates exclusive use of shared infrastructure (ports, volumes, domains)
#[async_trait]
pub trait SharedResourceManager: Send + Sync {
    /// Claim `resource_id` for `owner`, returning a claim id
    async fn claim(
        &self,
        resource_id: &str,
        owner: &str,
        operation: &str,
    ) -> Result<String, CollaboratorError>;

    async fn release(&self, resource_id: &str, claim_id: &str) -> Result<(), CollaboratorError>;
}

/// Dependency source backed by a precomputed map
#[derive(Debug, Clone, Default)]
pub struct StaticDependencySource {
    dependencies: HashMap<String, Vec<String>>,
}

impl StaticDependencySource {
    pub fn new(dependencies: HashMap<String, Vec<String>>) -> Self {
        Self { dependencies }
    }
}

#[async_trait]
impl DependencySource for StaticDependencySource {
    async fn extract_dependencies(
        &self,
        node: &str,
    ) -> Result<Vec<DependencyEdge>, CollaboratorError> {
        Ok(self
            .dependencies
            .get(node)
            .map(|targets| targets.iter().map(DependencyEdge::depends_on).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;

    #[tokio::test]
    async fn test_graph_from_static_source() {
        let source = StaticDependencySource::new(HashMap::from([
            ("web".to_string(), vec!["api".to_string()]),
            ("api".to_string(), vec!["infra".to_string()]),
        ]));
        let nodes = vec!["web".to_string(), "api".to_string()];

        let graph = DependencyGraph::from_source(&nodes, &source).await.unwrap();

        assert_eq!(graph.dependencies("web"), vec!["api"]);
        assert_eq!(graph.dependencies("api"), vec!["infra"]);
        assert!(graph.contains("infra"));
    }

    #[test]
    fn test_edge_serializes_type_field() {
        let edge = DependencyEdge::depends_on("infra");
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["type"], "service");
        assert_eq!(json["relationship"], "depends_on");
    }
}
