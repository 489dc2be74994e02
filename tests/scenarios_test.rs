//! Scenario tests covering the engine's graph-level and dispatch-level
//! behaviour end to end, exercised through the public builder API rather
//! than the internal module types.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use taskgraph::engine::CancelToken;
use taskgraph::sink::{CollectingSink, NullSink, TaskState};
use taskgraph::{
    backend, EdgeStatus, Executable, GraphBuilder, Job, JobId, Join, Predicate, Resources,
    ScheduleOptions,
};

fn job(id: &str, body: Arc<dyn Executable>) -> Job {
    Job {
        id: JobId::new(id),
        name: id.into(),
        body,
        array_size: 1,
        array_throttle: None,
        resources: Resources::new(),
        preconditions: vec![],
        postconditions: vec![],
        join: Join::All,
        skipped: false,
    }
}

fn ok_body() -> Arc<dyn Executable> {
    Arc::new(|_: Option<usize>| Ok(()))
}

fn failing_body() -> Arc<dyn Executable> {
    Arc::new(|_: Option<usize>| Err("deliberate failure".into()))
}

#[tokio::test]
async fn linear_chain_with_failure_tolerated_by_any() {
    let mut b = GraphBuilder::new();
    b.add_job(job("a", ok_body())).unwrap();
    b.add_job(job("b", failing_body())).unwrap();
    b.add_job(job("c", ok_body())).unwrap();
    b.add_edge("a", "c", EdgeStatus::Success).unwrap();
    b.add_edge("b", "c", EdgeStatus::Any).unwrap();
    let workflow = b.freeze(&[JobId::new("c")]).unwrap();

    let sink = CollectingSink::new();
    let options = ScheduleOptions {
        parallelism: 4,
        ..ScheduleOptions::default()
    };
    let summary = backend::schedule_local(&workflow, &options, sink.clone(), CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 2);
    let reports = sink.reports();
    let b_report = reports.iter().find(|r| r.job.as_str() == "b").unwrap();
    assert_eq!(b_report.state, TaskState::Failed);
    let c_report = reports.iter().find(|r| r.job.as_str() == "c").unwrap();
    assert_eq!(c_report.state, TaskState::Succeeded);
}

#[tokio::test]
async fn array_with_any_join_and_pruning_keeps_only_failing_index() {
    let mut b = GraphBuilder::new();
    b.add_job(job("a", failing_body())).unwrap();
    b.add_job(job("b", ok_body())).unwrap();

    let invoked_indices = Arc::new(std::sync::Mutex::new(Vec::new()));
    let invoked = invoked_indices.clone();
    let mut c = job(
        "c",
        Arc::new(move |index: Option<usize>| {
            invoked.lock().unwrap().push(index.unwrap());
            Ok(())
        }),
    );
    c.array_size = 100;
    c.join = Join::Any;
    c.postconditions = vec![Predicate::indexed(|i| i != 42)];
    b.add_job(c).unwrap();

    b.add_job(job("d", ok_body())).unwrap();

    b.add_edge("a", "c", EdgeStatus::Success).unwrap();
    b.add_edge("b", "c", EdgeStatus::Success).unwrap();
    b.add_edge("a", "d", EdgeStatus::Any).unwrap();
    b.add_edge("b", "d", EdgeStatus::Success).unwrap();
    b.add_edge("c", "d", EdgeStatus::Success).unwrap();

    // `d`'s edges are (a,ANY), (b,SUCCESS), (c,SUCCESS); with join=ALL every
    // one is already compatible (a's ANY accepts its FAILED terminal), so
    // the default join suffices.
    let workflow = b.freeze(&[JobId::new("d")]).unwrap();

    let options = ScheduleOptions {
        parallelism: 8,
        ..ScheduleOptions::default()
    };
    let summary = backend::schedule_local(&workflow, &options, Arc::new(NullSink), CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1); // only a
    let invoked = invoked_indices.lock().unwrap();
    assert_eq!(invoked.as_slice(), &[42]);
}

#[tokio::test]
async fn postcondition_prune_skips_whole_job_despite_upstream_failure() {
    let mut b = GraphBuilder::new();
    b.add_job(job("a", failing_body())).unwrap();

    let invoked = Arc::new(AtomicBool::new(false));
    let flag = invoked.clone();
    let mut c = job(
        "c",
        Arc::new(move |_: Option<usize>| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }),
    );
    c.postconditions = vec![Predicate::scalar(|| true)];
    b.add_job(c).unwrap();
    b.add_edge("a", "c", EdgeStatus::Any).unwrap();

    let workflow = b.freeze(&[JobId::new("c")]).unwrap();
    let options = ScheduleOptions {
        prune: true,
        parallelism: 4,
        ..ScheduleOptions::default()
    };
    let summary = backend::schedule_local(&workflow, &options, Arc::new(NullSink), CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1); // a
    assert_eq!(summary.skipped, 1); // c, synthesized
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn cycle_rejection_aborts_before_any_execution() {
    let mut b = GraphBuilder::new();
    b.add_job(job("a", ok_body())).unwrap();
    b.add_job(job("b", ok_body())).unwrap();
    b.add_edge("a", "b", EdgeStatus::Success).unwrap();
    let result = b.add_edge("b", "a", EdgeStatus::Success);
    assert!(matches!(
        result,
        Err(taskgraph::WorkflowError::CycleDetected { .. })
    ));
}

#[tokio::test]
async fn precondition_violation_cancels_all_join_descendant() {
    let mut b = GraphBuilder::new();
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = invoked.clone();
    let mut a = job(
        "a",
        Arc::new(move |_: Option<usize>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );
    a.preconditions = vec![Predicate::scalar(|| false)];
    b.add_job(a).unwrap();
    b.add_job(job("b", ok_body())).unwrap();
    b.add_edge("a", "b", EdgeStatus::Success).unwrap();

    let workflow = b.freeze(&[JobId::new("b")]).unwrap();
    let options = ScheduleOptions {
        parallelism: 2,
        ..ScheduleOptions::default()
    };
    let summary = backend::schedule_local(&workflow, &options, Arc::new(NullSink), CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.cancelled, 1);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}
