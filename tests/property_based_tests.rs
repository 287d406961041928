use fleet_conductor::graph::{DependencyGraph, DependencyGraphAnalyzer, IndependenceCheck};
use fleet_conductor::recovery::{BackoffCalculator, BackoffKind};
use fleet_conductor::PhasePlanner;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Random DAG: node `n{i}` may only depend on nodes with a lower index
fn dag_strategy() -> impl Strategy<Value = Vec<(String, Vec<String>)>> {
    (1usize..24).prop_flat_map(|size| {
        proptest::collection::vec(proptest::collection::vec(any::<prop::sample::Index>(), 0..4), size)
            .prop_map(move |picks| {
                picks
                    .into_iter()
                    .enumerate()
                    .map(|(node, choices)| {
                        let mut deps: Vec<String> = if node == 0 {
                            Vec::new()
                        } else {
                            choices
                                .iter()
                                .map(|choice| format!("n{}", choice.index(node)))
                                .collect()
                        };
                        deps.sort();
                        deps.dedup();
                        (format!("n{node}"), deps)
                    })
                    .collect()
            })
    })
}

/// Every node reachable from `node` through `deps`
fn transitive_dependencies<'a>(deps: &'a HashMap<String, Vec<String>>, node: &str) -> HashSet<&'a str> {
    let mut seen = HashSet::new();
    let mut stack: Vec<&str> = deps[node].iter().map(String::as_str).collect();
    while let Some(next) = stack.pop() {
        if seen.insert(next) {
            stack.extend(deps[next].iter().map(String::as_str));
        }
    }
    seen
}

fn backoff_kind() -> impl Strategy<Value = BackoffKind> {
    prop_oneof![
        Just(BackoffKind::Exponential),
        Just(BackoffKind::Linear),
        Just(BackoffKind::Fixed),
        Just(BackoffKind::Fibonacci),
    ]
}

proptest! {
    /// Generated DAGs never report cycles and order dependencies first
    #[test]
    fn dag_topological_order_respects_dependencies(pairs in dag_strategy()) {
        let graph = DependencyGraph::from_pairs(pairs.clone());
        let analyzer = DependencyGraphAnalyzer::default();

        prop_assert!(analyzer.detect_cycles(&graph).is_empty());
        let order = analyzer.topological_order(&graph).unwrap();
        prop_assert_eq!(order.len(), pairs.len());

        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, node)| (node.as_str(), i)).collect();
        for (node, deps) in &pairs {
            for dep in deps {
                prop_assert!(position[dep.as_str()] < position[node.as_str()]);
            }
        }
    }

    /// Phases partition the targets and every dependency sits in an earlier phase
    #[test]
    fn phases_partition_targets(pairs in dag_strategy()) {
        let targets: Vec<String> = pairs.iter().map(|(node, _)| node.clone()).collect();
        let dependencies: HashMap<String, Vec<String>> = pairs.iter().cloned().collect();
        let plan = PhasePlanner::default().plan_from_map(&targets, &dependencies, true).unwrap();

        let mut phase_of = HashMap::new();
        for phase in &plan.phases {
            for node in &phase.nodes {
                prop_assert!(phase_of.insert(node.clone(), phase.index).is_none());
            }
        }
        prop_assert_eq!(phase_of.len(), targets.len());

        for (node, deps) in &pairs {
            for dep in deps {
                prop_assert!(phase_of[dep] < phase_of[node]);
            }
        }
    }

    /// Group members never reach each other and every group depends only on earlier ones
    #[test]
    fn parallel_groups_are_independent_and_ordered(pairs in dag_strategy()) {
        let deps: HashMap<String, Vec<String>> = pairs.iter().cloned().collect();
        let graph = DependencyGraph::from_pairs(pairs.clone());
        let analyzer = DependencyGraphAnalyzer::new(IndependenceCheck::Reachability, vec![]);
        let order = analyzer.topological_order(&graph).unwrap();
        let groups = analyzer.parallel_groups(&graph, &order);

        let mut group_of: HashMap<&str, usize> = HashMap::new();
        for (index, group) in groups.iter().enumerate() {
            prop_assert!(!group.is_empty());
            for node in group {
                prop_assert!(group_of.insert(node.as_str(), index).is_none());
            }
        }
        prop_assert_eq!(group_of.len(), pairs.len());

        for (node, _) in &pairs {
            for dependency in transitive_dependencies(&deps, node) {
                prop_assert!(group_of[dependency] < group_of[node.as_str()]);
            }
        }
    }

    /// Planning the same input twice yields the same plan
    #[test]
    fn planning_is_deterministic(pairs in dag_strategy()) {
        let targets: Vec<String> = pairs.iter().map(|(node, _)| node.clone()).collect();
        let dependencies: HashMap<String, Vec<String>> = pairs.iter().cloned().collect();
        let planner = PhasePlanner::default();

        let first = planner.plan_from_map(&targets, &dependencies, true).unwrap();
        let second = planner.plan_from_map(&targets, &dependencies, true).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Closing any chain back on itself is always detected
    #[test]
    fn back_edge_creates_detected_cycle(length in 2usize..16) {
        let mut pairs: Vec<(String, Vec<String>)> = (0..length)
            .map(|i| {
                let deps = if i == 0 { Vec::new() } else { vec![format!("n{}", i - 1)] };
                (format!("n{i}"), deps)
            })
            .collect();
        pairs[0].1.push(format!("n{}", length - 1));

        let graph = DependencyGraph::from_pairs(pairs);
        let cycles = DependencyGraphAnalyzer::default().detect_cycles(&graph);
        prop_assert_eq!(cycles.len(), 1);
        let members: HashSet<&String> = cycles[0].iter().collect();
        prop_assert_eq!(members.len(), length);
    }

    /// Backoff delays stay within the configured cap and never shrink
    #[test]
    fn backoff_is_capped_and_monotonic(
        kind in backoff_kind(),
        base_ms in 1u64..2_000,
        max_ms in 1u64..60_000,
        steps in 1u32..80,
    ) {
        let calculator = BackoffCalculator::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
        );
        let cap = Duration::from_millis(max_ms.max(base_ms));

        let mut previous = Duration::ZERO;
        for step in 0..steps {
            let delay = calculator.delay(kind, step);
            prop_assert!(delay <= cap);
            prop_assert!(delay >= previous);
            previous = delay;
        }
    }
}
