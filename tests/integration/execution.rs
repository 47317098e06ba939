//! End-to-end execution tests.
//!
//! These tests plan real submissions and run them through the engine with
//! scripted runners, checking retry counts, failure isolation and
//! cancellation.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use taskweave::core::{Priority, TaskSpec, TaskStatus};
use taskweave::orchestration::{EngineConfig, ExecutionEvent, Scheduler};

use crate::fixtures::{blocking_runner, fast_engine, registry, task, ScriptedRunner};

/// Test: Retry count
/// Given a task with max_retries = 3 that always fails
/// When executed
/// Then it is attempted exactly 4 times and recorded as terminally failed
#[tokio::test]
async fn test_always_failing_task_gets_n_plus_one_attempts() {
    let registry = registry(&[("worker", 4)]);
    let scheduler = Scheduler::new(&registry).with_engine_config(fast_engine());
    let script = ScriptedRunner::new().failing("flaky");

    let summary = scheduler
        .run(
            &[task("flaky").with_max_retries(3), task("steady")],
            script.clone().into_runner(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(script.calls("flaky"), 4);
    assert_eq!(script.calls("steady"), 1);

    let flaky = summary.result("flaky").unwrap();
    assert_eq!(flaky.attempts, 4);
    assert!(matches!(flaky.status, TaskStatus::Failed { .. }));
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.success_rate, 0.5);
}

/// Test: Failure isolation
/// Given a failing task in the first batch and a dependent-free task in the second
/// When executed without the critical-stop policy
/// Then later batches still run
#[tokio::test]
async fn test_failure_does_not_abort_plan() {
    let registry = registry(&[("worker", 4)]);
    let scheduler = Scheduler::new(&registry).with_engine_config(fast_engine());
    let script = ScriptedRunner::new().failing("a");

    let summary = scheduler
        .run(
            &[
                task("a").with_max_retries(0),
                task("b"),
                task("c").with_dependency("b"),
            ],
            script.clone().into_runner(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(summary.result("c").unwrap().success);
    assert!(!summary.stopped_early);
    assert_eq!(script.total_calls(), 3);
}

/// Test: Critical stop policy
/// Given the stop-on-critical policy and a Critical task that always fails
/// When executed
/// Then the rest of the plan is skipped
#[tokio::test]
async fn test_critical_failure_stops_plan_when_enabled() {
    let registry = registry(&[("worker", 4)]);
    let config = EngineConfig {
        stop_on_critical_failure: true,
        ..fast_engine()
    };
    let scheduler = Scheduler::new(&registry).with_engine_config(config);
    let script = ScriptedRunner::new().failing("migrate");

    let summary = scheduler
        .run(
            &[
                task("migrate")
                    .with_priority(Priority::Critical)
                    .with_max_retries(1),
                task("serve").with_dependency("migrate"),
                task("report").with_dependency("serve"),
            ],
            script.clone().into_runner(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(summary.stopped_early);
    assert_eq!(script.calls("migrate"), 2);
    assert_eq!(script.calls("serve"), 0);
    assert!(summary.result("serve").unwrap().is_skipped());
    assert!(summary.result("report").unwrap().is_skipped());
    assert_eq!(summary.skipped, 2);
}

/// Test: Cancellation mid-plan
/// Given a plan whose first batch blocks until cancelled
/// When the plan is cancelled
/// Then in-flight tasks finish, and every later task is skipped
#[tokio::test]
async fn test_cancellation_skips_unstarted_work() {
    let registry = registry(&[("worker", 4)]);
    let scheduler = Scheduler::new(&registry).with_engine_config(fast_engine());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let summary = scheduler
        .run(
            &[
                task("long"),
                task("after").with_dependency("long"),
                task("last").with_dependency("after"),
            ],
            blocking_runner(),
            cancel,
        )
        .await
        .unwrap();

    assert!(summary.cancelled);
    let long = summary.result("long").unwrap();
    assert_eq!(long.attempts, 1, "no retry after cancellation");
    assert_eq!(long.error.as_deref(), Some("cancelled"));
    assert!(summary.result("after").unwrap().is_skipped());
    assert!(summary.result("last").unwrap().is_skipped());
}

/// Test: Batches run strictly in order
/// Given a chain a -> b -> c
/// When executed with events enabled
/// Then each batch finishes before the next starts
#[tokio::test]
async fn test_batches_are_sequential() {
    let registry = registry(&[("worker", 4)]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler::new(&registry)
        .with_engine_config(fast_engine())
        .with_events(tx);

    scheduler
        .run(
            &[task("a"), task("b").with_dependency("a"), task("c").with_dependency("b")],
            ScriptedRunner::new().into_runner(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    drop(scheduler);

    let mut batch_events = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            ExecutionEvent::BatchStarted { batch, .. } => batch_events.push(("start", batch)),
            ExecutionEvent::BatchFinished { batch, .. } => batch_events.push(("finish", batch)),
            _ => {}
        }
    }
    assert_eq!(
        batch_events,
        vec![
            ("start", 0),
            ("finish", 0),
            ("start", 1),
            ("finish", 1),
            ("start", 2),
            ("finish", 2),
        ]
    );
}

/// Test: Worker pool bounds concurrency
/// Given eight independent tasks and max_workers = 2
/// When executed
/// Then no more than two run at once
#[tokio::test]
async fn test_max_workers_bounds_concurrency() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use taskweave::orchestration::{TaskOutput, TaskRunner};

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (running.clone(), peak.clone());
    let runner: Arc<dyn TaskRunner> = Arc::new(move |_task: TaskSpec, _cancel: CancellationToken| {
        let (r, p) = (r.clone(), p.clone());
        async move {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            r.fetch_sub(1, Ordering::SeqCst);
            TaskOutput::success("done")
        }
    });

    let registry = registry(&[("worker", 8)]);
    let scheduler = Scheduler::new(&registry).with_engine_config(EngineConfig {
        max_workers: 2,
        ..fast_engine()
    });
    let tasks: Vec<TaskSpec> = (0..8).map(|i| task(&format!("t{}", i))).collect();

    let summary = scheduler
        .run(&tasks, runner, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.successful, 8);
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

/// Test: Summary serializes with the documented field names
#[tokio::test]
async fn test_summary_json_fields() {
    let registry = registry(&[("worker", 4)]);
    let summary = Scheduler::new(&registry)
        .run(
            &[task("only")],
            ScriptedRunner::new().into_runner(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let json = serde_json::to_value(&summary).unwrap();
    for field in [
        "plan_id",
        "execution_time_ms",
        "estimated_time_ms",
        "total_tasks",
        "successful",
        "failed",
        "success_rate",
        "results",
    ] {
        assert!(json.get(field).is_some(), "missing {}", field);
    }
    assert_eq!(json["results"]["only"]["success"], true);
}
