//! Generated submissions checked against the plan invariants.

use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;

use taskweave::core::{Priority, TaskGraph, TaskId, TaskSpec};
use taskweave::orchestration::{
    topological_order, ConflictDetector, ExecutionPlan, ResourcePolicy, Scheduler,
};

use crate::fixtures::registry;

const EXECUTORS: &[&str] = &["solo", "pair", "git-ops"];
const RESOURCES: &[&str] = &["git_operations", "database", "network"];
const EXCLUSIVE: &[&str] = &["lock", "slot"];
const PRIORITIES: &[Priority] = &[Priority::Critical, Priority::High, Priority::Medium, Priority::Low];

#[derive(Debug, Clone)]
struct RawTask {
    executor: usize,
    priority: usize,
    deps: Vec<usize>,
    resources: Vec<usize>,
    exclusive: Vec<usize>,
}

fn raw_task() -> impl Strategy<Value = RawTask> {
    (
        0..EXECUTORS.len(),
        0..PRIORITIES.len(),
        prop::collection::vec(0..16usize, 0..3),
        prop::collection::vec(0..RESOURCES.len(), 0..2),
        prop::collection::vec(0..EXCLUSIVE.len(), 0..2),
    )
        .prop_map(|(executor, priority, deps, resources, exclusive)| RawTask {
            executor,
            priority,
            deps,
            resources,
            exclusive,
        })
}

/// Build specs from raw picks. With `acyclic`, a task may only depend on
/// earlier tasks; otherwise any task, itself included.
fn build(raw: &[RawTask], acyclic: bool) -> Vec<TaskSpec> {
    raw.iter()
        .enumerate()
        .map(|(i, r)| {
            let mut task = TaskSpec::new(format!("t{}", i), EXECUTORS[r.executor])
                .with_priority(PRIORITIES[r.priority]);
            for &dep in &r.deps {
                let dep = dep % raw.len();
                if acyclic && dep >= i {
                    continue;
                }
                task = task.with_dependency(&format!("t{}", dep));
            }
            for &res in &r.resources {
                task = task.with_resource(RESOURCES[res]);
            }
            for &ex in &r.exclusive {
                task = task.with_exclusive(EXCLUSIVE[ex]);
            }
            task
        })
        .collect()
}

fn submission(acyclic: bool) -> impl Strategy<Value = Vec<TaskSpec>> {
    prop::collection::vec(raw_task(), 1..14).prop_map(move |raw| build(&raw, acyclic))
}

fn plan_for(tasks: &[TaskSpec]) -> ExecutionPlan {
    let registry = registry(&[("solo", 1), ("pair", 2), ("git-ops", 3)]);
    Scheduler::new(&registry)
        .plan(tasks)
        .expect("generated submissions are valid")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn prop_topological_order_respects_dependencies(tasks in submission(true)) {
        let graph = TaskGraph::from_tasks(&tasks).unwrap();
        let order = topological_order(&graph).unwrap();
        let position: HashMap<&TaskId, usize> =
            order.iter().enumerate().map(|(i, id)| (id, i)).collect();

        prop_assert_eq!(order.len(), tasks.len());
        for task in &tasks {
            for dep in &task.dependencies {
                prop_assert!(position[dep] < position[&task.id]);
            }
        }
    }

    #[test]
    fn prop_detection_is_idempotent(tasks in submission(false)) {
        let graph = TaskGraph::from_tasks(&tasks).unwrap();
        let detector = ConflictDetector::default();
        prop_assert_eq!(detector.detect(&graph), detector.detect(&graph));
    }

    #[test]
    fn prop_resolved_graph_never_raises_cycle(tasks in submission(false)) {
        // plan_for panics on any planning error, Error::Cycle included.
        let plan = plan_for(&tasks);
        prop_assert_eq!(plan.task_count(), tasks.len());
    }

    #[test]
    fn prop_every_task_planned_once(tasks in submission(false)) {
        let plan = plan_for(&tasks);
        let mut seen = BTreeSet::new();
        for batch in &plan.batches {
            for id in &batch.tasks {
                prop_assert!(seen.insert(id.clone()), "{} planned twice", id);
            }
        }
        prop_assert_eq!(seen.len(), tasks.len());
    }

    #[test]
    fn prop_batches_respect_dependencies_and_exclusivity(tasks in submission(false)) {
        let plan = plan_for(&tasks);
        let policy = ResourcePolicy::default();

        for (index, batch) in plan.batches.iter().enumerate() {
            let members: Vec<&TaskSpec> =
                batch.tasks.iter().map(|id| plan.task(id).unwrap()).collect();

            for task in &members {
                for dep in &task.dependencies {
                    prop_assert!(plan.batch_of(dep).unwrap() < index);
                }
            }

            for (i, a) in members.iter().enumerate() {
                for b in &members[i + 1..] {
                    let held = policy.exclusive_tags(a);
                    let other = policy.exclusive_tags(b);
                    prop_assert!(
                        !b.resource_tags().any(|t| held.contains(t.as_str())),
                        "{} and {} share an exclusive tag", a.id, b.id
                    );
                    prop_assert!(
                        !a.resource_tags().any(|t| other.contains(t.as_str())),
                        "{} and {} share an exclusive tag", b.id, a.id
                    );
                }
            }
        }
    }

    #[test]
    fn prop_single_writer_runs_alone_in_batch(tasks in submission(false)) {
        let plan = plan_for(&tasks);
        for batch in &plan.batches {
            let writers: Vec<&TaskId> = batch
                .tasks
                .iter()
                .filter(|id| plan.task(id).unwrap().executor.as_str() == "git-ops")
                .collect();
            prop_assert!(writers.len() <= 1, "git-ops tasks share a batch: {:?}", writers);
        }
    }

    #[test]
    fn prop_batches_respect_capacity(tasks in submission(false)) {
        let registry = registry(&[("solo", 1), ("pair", 2), ("git-ops", 3)]);
        let plan = Scheduler::new(&registry).plan(&tasks).unwrap();

        for batch in &plan.batches {
            let mut per_executor: HashMap<&str, usize> = HashMap::new();
            for id in &batch.tasks {
                let task = plan.task(id).unwrap();
                *per_executor.entry(task.executor.as_str()).or_default() += 1;
            }
            for (executor, count) in per_executor {
                let cap = registry.max_concurrent(&executor.into());
                prop_assert!(count <= cap, "{} has {} tasks, cap {}", executor, count, cap);
            }
        }
    }
}
