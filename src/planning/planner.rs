//! # Phase Planner
//!
//! Validates a dependency graph, orders it, and partitions the order into
//! phases: each phase holds every remaining node whose in-scope dependencies
//! all sit in earlier phases. Dependencies outside the target set are treated
//! as already satisfied.

use super::PlanningError;
use crate::config::PlanningConfig;
use crate::graph::{DependencyAnalysis, DependencyGraph, DependencyGraphAnalyzer, RiskAssessment};
use crate::models::{Stage, StageType, Task, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

/// A set of nodes with no dependency relationship among them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// 1-based position in the plan
    pub index: usize,
    pub nodes: Vec<String>,
    /// More than one node and parallelism not disabled
    pub parallel: bool,
    /// Reporting-only estimate: `base + per_node * size`
    pub estimated_duration_ms: u64,
}

/// A phase of the reverse plan: dependents are rolled back before dependencies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPhase {
    pub index: usize,
    /// Index of the forward phase this undoes
    pub reverses_phase: usize,
    pub nodes: Vec<String>,
    pub parallel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub execution_order: Vec<String>,
    pub phases: Vec<Phase>,
    pub critical_path: Vec<String>,
    pub risk: RiskAssessment,
    pub estimated_duration_ms: u64,
    pub rollback_plan: Vec<RollbackPhase>,
}

impl ExecutionPlan {
    /// Just the node partition, e.g. `[[infra], [api], [web]]`
    pub fn phase_nodes(&self) -> Vec<Vec<String>> {
        self.phases.iter().map(|phase| phase.nodes.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PhasePlanner {
    analyzer: DependencyGraphAnalyzer,
    config: PlanningConfig,
}

impl Default for PhasePlanner {
    fn default() -> Self {
        Self::new(PlanningConfig::default())
    }
}

impl PhasePlanner {
    pub fn new(config: PlanningConfig) -> Self {
        Self {
            analyzer: DependencyGraphAnalyzer::from_config(&config),
            config,
        }
    }

    pub fn analyzer(&self) -> &DependencyGraphAnalyzer {
        &self.analyzer
    }

    pub fn config(&self) -> &PlanningConfig {
        &self.config
    }

    /// Plan `targets` against `graph`
    #[instrument(skip(self, graph), fields(targets = targets.len()))]
    pub fn plan(
        &self,
        targets: &[String],
        graph: &DependencyGraph,
        parallel_enabled: bool,
    ) -> Result<ExecutionPlan, PlanningError> {
        let scoped = graph.subgraph(targets);

        let cycles = self.analyzer.detect_cycles(&scoped);
        if !cycles.is_empty() {
            return Err(PlanningError::CircularDependency { cycles });
        }

        let execution_order = self.analyzer.topological_order(&scoped)?;
        let phases = self.build_phases(&scoped, &execution_order, parallel_enabled)?;
        let critical_path = self.analyzer.critical_path(&scoped, scoped.nodes());
        let risk = self.analyzer.risk_assessment(graph, targets);
        let estimated_duration_ms = phases.iter().map(|p| p.estimated_duration_ms).sum();
        let rollback_plan = Self::rollback_for(&phases);

        info!(
            targets = targets.len(),
            phases = phases.len(),
            parallel_phases = phases.iter().filter(|p| p.parallel).count(),
            critical_path_length = critical_path.len(),
            risk_score = risk.risk_score,
            "🗺️ Execution plan built"
        );

        Ok(ExecutionPlan {
            execution_order,
            phases,
            critical_path,
            risk,
            estimated_duration_ms,
            rollback_plan,
        })
    }

    /// Plan from a raw `node -> [dependency]` map
    ///
    /// The graph is built in `targets` order so the result does not depend on
    /// map iteration order.
    pub fn plan_from_map(
        &self,
        targets: &[String],
        dependencies: &HashMap<String, Vec<String>>,
        parallel_enabled: bool,
    ) -> Result<ExecutionPlan, PlanningError> {
        let graph = DependencyGraph::from_pairs(targets.iter().map(|target| {
            (
                target.clone(),
                dependencies.get(target).cloned().unwrap_or_default(),
            )
        }));
        self.plan(targets, &graph, parallel_enabled)
    }

    fn build_phases(
        &self,
        graph: &DependencyGraph,
        order: &[String],
        parallel_enabled: bool,
    ) -> Result<Vec<Phase>, PlanningError> {
        let mut phases = Vec::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut remaining: Vec<String> = order.to_vec();

        while !remaining.is_empty() {
            let index = phases.len() + 1;
            let (ready, blocked): (Vec<String>, Vec<String>) =
                remaining.into_iter().partition(|node| {
                    graph
                        .dependencies(node)
                        .iter()
                        .all(|dependency| completed.contains(*dependency))
                });

            if ready.is_empty() {
                return Err(PlanningError::Stalled {
                    phase: index,
                    remaining: blocked,
                });
            }

            let size = ready.len() as u64;
            debug!(phase = index, nodes = ?ready, "Phase collected");
            completed.extend(ready.iter().cloned());
            phases.push(Phase {
                index,
                parallel: parallel_enabled && ready.len() > 1,
                estimated_duration_ms: self.config.phase_base_time_ms
                    + self.config.phase_per_node_time_ms * size,
                nodes: ready,
            });
            remaining = blocked;
        }

        Ok(phases)
    }

    fn rollback_for(phases: &[Phase]) -> Vec<RollbackPhase> {
        phases
            .iter()
            .rev()
            .enumerate()
            .map(|(position, phase)| RollbackPhase {
                index: position + 1,
                reverses_phase: phase.index,
                nodes: phase.nodes.iter().rev().cloned().collect(),
                parallel: phase.parallel,
            })
            .collect()
    }

    /// One stage per phase, each repository receiving one task per type
    ///
    /// A single task type yields `parallel` or `sequential` stages. Several
    /// task types yield `dependency-ordered` stages where each repository's
    /// tasks are chained in `task_types` order (or `sequential` stages when
    /// the phase is not parallel).
    pub fn plan_repository_stages(
        &self,
        plan: &ExecutionPlan,
        task_types: &[TaskType],
    ) -> Result<Vec<Stage>, PlanningError> {
        if task_types.is_empty() {
            return Err(PlanningError::NoTaskTypes);
        }

        let stages = plan
            .phases
            .iter()
            .map(|phase| {
                let mut tasks = Vec::with_capacity(phase.nodes.len() * task_types.len());
                for repository in &phase.nodes {
                    let mut previous: Option<String> = None;
                    for task_type in task_types {
                        let mut task = Task::new(task_type.clone(), repository.clone());
                        if let Some(previous_id) = previous.take() {
                            task = task.depends_on(previous_id);
                        }
                        previous = Some(task.id.clone());
                        tasks.push(task);
                    }
                }

                let stage_type = match (phase.parallel, task_types.len()) {
                    (false, _) => StageType::Sequential,
                    (true, 1) => StageType::Parallel,
                    (true, _) => StageType::DependencyOrdered,
                };
                Stage::new(format!("phase-{}", phase.index), stage_type, tasks)
            })
            .collect();

        Ok(stages)
    }

    /// Task-level dependency analysis for a dependency-ordered stage
    ///
    /// Returns `None` for stages that do not execute dependency-ordered.
    /// `depends_on` entries naming tasks outside the stage are ignored.
    pub fn analyze_stage(&self, stage: &Stage) -> Result<Option<DependencyAnalysis>, PlanningError> {
        if stage.effective_strategy() != crate::execution::ExecutionStrategy::DependencyOrdered {
            return Ok(None);
        }

        let mut seen = HashSet::new();
        for task in &stage.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(PlanningError::DuplicateTask {
                    stage: stage.name.clone(),
                    task_id: task.id.clone(),
                });
            }
        }

        let mut graph = DependencyGraph::new();
        for task in &stage.tasks {
            graph.add_node(task.id.clone());
        }
        for task in &stage.tasks {
            for dependency in task.depends_on.iter().filter(|d| seen.contains(d.as_str())) {
                graph.add_dependency(task.id.clone(), dependency.clone());
            }
        }

        Ok(Some(self.analyzer.analyze(&graph)?))
    }
}
