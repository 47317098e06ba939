//! Reference scenarios for planning.
//!
//! Each test builds a small submission whose plan can be checked by hand.

use std::time::Duration;

use taskweave::core::{Priority, TaskGraph, TaskId, TaskSpec};
use taskweave::orchestration::{
    topological_order, CapacityRegistry, ConflictDetector, ConflictKind, ResolutionOutcome,
    ResolutionStrategy, Scheduler,
};
use taskweave::Error;

use crate::fixtures::{batches, registry, task};

/// Test: Scenario A - independent work shares the first batch
/// Given A, B depending on A, and an independent C
/// When planned
/// Then the plan is [[A, C], [B]]
#[test]
fn test_scenario_a_independent_tasks_share_batch() {
    let registry = registry(&[("worker", 4)]);
    let plan = Scheduler::new(&registry)
        .plan(&[task("A"), task("B").with_dependency("A"), task("C")])
        .unwrap();

    assert_eq!(batches(&plan), vec![vec!["A", "C"], vec!["B"]]);
    assert!(plan.conflicts_detected.is_empty());
}

/// Test: Scenario B - exclusive resource contention
/// Given A and B both needing git_operations
/// When planned
/// Then one contention conflict lists [A, B], B depends on A, and the plan is [[A], [B]]
#[test]
fn test_scenario_b_exclusive_resource_serialized() {
    let registry = CapacityRegistry::new();
    let plan = Scheduler::new(&registry)
        .plan(&[
            task("A").with_resource("git_operations"),
            task("B").with_resource("git_operations"),
        ])
        .unwrap();

    assert_eq!(plan.conflicts_detected.len(), 1);
    let conflict = &plan.conflicts_detected[0];
    assert_eq!(conflict.kind, ConflictKind::ResourceContention);
    assert_eq!(conflict.tasks, vec![TaskId::from("A"), TaskId::from("B")]);
    assert_eq!(conflict.resolution, ResolutionStrategy::Serialize);

    let b = plan.task(&TaskId::from("B")).unwrap();
    assert!(b.dependencies.contains(&TaskId::from("A")));
    assert_eq!(batches(&plan), vec![vec!["A"], vec!["B"]]);
}

/// Test: Scenario C - cycle is broken at its last-to-first edge
/// Given A depends on C, B on A, C on B
/// When planned
/// Then one cycle conflict is found, A's dependency on C is removed, and the order is A, B, C
#[test]
fn test_scenario_c_cycle_broken() {
    let tasks = vec![
        task("A").with_dependency("C"),
        task("B").with_dependency("A"),
        task("C").with_dependency("B"),
    ];
    let registry = registry(&[("worker", 4)]);
    let plan = Scheduler::new(&registry).plan(&tasks).unwrap();

    assert_eq!(plan.conflicts_detected.len(), 1);
    assert_eq!(plan.conflicts_detected[0].kind, ConflictKind::CircularDependency);
    assert!(matches!(
        &plan.optimizations_applied[0].outcome,
        ResolutionOutcome::EdgeRemoved { edge }
            if edge.task.as_str() == "A" && edge.depends_on.as_str() == "C"
    ));
    assert!(!plan
        .task(&TaskId::from("A"))
        .unwrap()
        .dependencies
        .contains(&TaskId::from("C")));
    assert_eq!(batches(&plan), vec![vec!["A"], vec!["B"], vec!["C"]]);
}

/// Test: Scenario D - executor capacity of one
/// Given executor X with max_concurrent 1 owning independent P, Q, R
/// When planned
/// Then three single-task batches are produced
#[test]
fn test_scenario_d_capacity_one_spreads_batches() {
    let registry = registry(&[("X", 1)]);
    let plan = Scheduler::new(&registry)
        .plan(&[
            TaskSpec::new("P", "X"),
            TaskSpec::new("Q", "X"),
            TaskSpec::new("R", "X"),
        ])
        .unwrap();

    assert_eq!(batches(&plan), vec![vec!["P"], vec!["Q"], vec!["R"]]);
}

/// Test: Single-writer identity is serialized by priority
/// Given three git-ops tasks of mixed priority
/// When planned
/// Then they run one per batch, Critical first
#[test]
fn test_single_writer_serialized_by_priority() {
    let registry = registry(&[("git-ops", 4)]);
    let plan = Scheduler::new(&registry)
        .plan(&[
            TaskSpec::new("tag", "git-ops").with_priority(Priority::Low),
            TaskSpec::new("commit", "git-ops").with_priority(Priority::Critical),
            TaskSpec::new("push", "git-ops"),
        ])
        .unwrap();

    assert_eq!(batches(&plan), vec![vec!["commit"], vec!["push"], vec!["tag"]]);
    assert_eq!(plan.conflicts_detected[0].kind, ConflictKind::ExclusiveOperation);
}

/// Test: Single-writer tasks stay apart when serialization is partial
/// Given git-ops tasks a (Critical, depends on c), b (High) and c (Low)
/// When planned with default capacities
/// Then the edge that would close a cycle is skipped, the conflict is
/// reported unresolved, and no batch holds two git-ops tasks
#[test]
fn test_partial_single_writer_serialization_keeps_tasks_apart() {
    let registry = CapacityRegistry::new();
    let plan = Scheduler::new(&registry)
        .plan(&[
            TaskSpec::new("a", "git-ops")
                .with_priority(Priority::Critical)
                .with_dependency("c"),
            TaskSpec::new("b", "git-ops").with_priority(Priority::High),
            TaskSpec::new("c", "git-ops").with_priority(Priority::Low),
        ])
        .unwrap();

    let same_identity = plan
        .optimizations_applied
        .iter()
        .find(|a| a.strategy == ResolutionStrategy::SerializeSameIdentity)
        .unwrap();
    assert!(!same_identity.is_resolved());
    assert!(plan
        .task(&TaskId::from("b"))
        .unwrap()
        .dependencies
        .contains(&TaskId::from("a")));

    for batch in &plan.batches {
        assert_eq!(batch.len(), 1, "git-ops tasks share a batch: {:?}", batch.tasks);
    }
    assert_eq!(batches(&plan), vec![vec!["c"], vec!["a"], vec!["b"]]);
}

/// Test: Validation rejects the whole submission
#[test]
fn test_duplicate_ids_rejected() {
    let registry = CapacityRegistry::new();
    let err = Scheduler::new(&registry)
        .plan(&[task("A"), task("A")])
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateTask(_)));
}

/// Test: The dependency resolver refuses an unresolved cycle
#[test]
fn test_topological_order_detects_raw_cycle() {
    let graph = TaskGraph::from_tasks(&[task("x").with_dependency("y"), task("y").with_dependency("x")])
        .unwrap();
    assert!(matches!(topological_order(&graph), Err(Error::Cycle { .. })));
}

/// Test: Plan estimates follow the parallel assumption
/// Given batches [[a(3s), b(5s)], [c(2s)]]
/// Then the plan estimate is 7s
#[test]
fn test_plan_estimate() {
    let registry = CapacityRegistry::new();
    let plan = Scheduler::new(&registry)
        .plan(&[
            task("a").with_duration(Duration::from_secs(3)),
            task("b").with_duration(Duration::from_secs(5)),
            task("c").with_dependency("a").with_duration(Duration::from_secs(2)),
        ])
        .unwrap();

    assert_eq!(plan.estimated_total_time_ms, 7_000);
}

/// Test: Planning budget aborts pathological inputs
/// Given a zero planning budget and a large submission
/// When planned
/// Then planning fails with a timeout instead of producing a plan
#[test]
fn test_planning_budget_exceeded() {
    let tasks: Vec<TaskSpec> = (0..2_000)
        .map(|i| task(&format!("t{}", i)).with_resource("git_operations"))
        .collect();
    let registry = CapacityRegistry::new();
    let err = Scheduler::new(&registry)
        .with_planning_budget(Duration::ZERO)
        .plan(&tasks)
        .unwrap_err();

    assert!(matches!(err, Error::PlanningTimeout { .. }));
}

/// Test: Detection is pure and repeatable
#[test]
fn test_detection_repeatable_over_graph() {
    let tasks = vec![
        task("a").with_exclusive("lock").with_dependency("b"),
        task("b").with_exclusive("lock"),
        TaskSpec::new("c", "git_ops"),
        TaskSpec::new("d", "git_ops"),
    ];
    let graph = TaskGraph::from_tasks(&tasks).unwrap();
    let detector = ConflictDetector::default();

    let first = detector.detect(&graph);
    for _ in 0..5 {
        assert_eq!(detector.detect(&graph), first);
    }
}
