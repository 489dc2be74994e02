//! Async cooperative execution engine (C4).
//!
//! [`AsyncEngine::run`] turns an [`ActiveSubgraph`] into a set of concurrently
//! driven [`task::run_task`] futures, wiring each job's [`outcome::JobAggregator`]
//! to the `watch` receivers its dependents subscribe through, and folds the
//! per-task reports into a single [`WorkflowSummary`] once every task (or
//! synthetic skip) has reported.

pub mod cancel;
pub mod outcome;
pub mod task;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::error::WorkflowResult;
use crate::graph::Workflow;
use crate::model::JobId;
use crate::sink::{EventSink, TaskReport, TaskState, WorkflowSummary};
use crate::traversal::{ActiveSubgraph, PruneOutcome};

pub use cancel::CancelToken;
pub use outcome::{AggregateOutcome, JobAggregator, Terminal};
pub use task::{run_task, Predecessor, TaskContext};
pub use worker::WorkerPool;

pub struct AsyncEngine {
    worker_pool: WorkerPool,
    sink: Arc<dyn EventSink>,
    cancel: CancelToken,
}

impl AsyncEngine {
    pub fn new(parallelism: usize, sink: Arc<dyn EventSink>, cancel: CancelToken) -> Self {
        Self {
            worker_pool: WorkerPool::new(parallelism),
            sink,
            cancel,
        }
    }

    /// Run every job in `active` to quiescence and return the aggregated
    /// summary. Jobs pruned `Skipped` never spawn a task; jobs pruned
    /// `PartiallyLive` spawn tasks only for their still-live indices and
    /// synthesize success for the rest.
    pub async fn run(&self, workflow: &Workflow, active: &ActiveSubgraph) -> WorkflowResult<WorkflowSummary> {
        let started = Instant::now();

        // One aggregator + receiver per job, built up front so every task's
        // predecessor list can subscribe regardless of spawn order.
        let mut aggregators: HashMap<JobId, Arc<JobAggregator>> = HashMap::new();
        let mut receivers: HashMap<JobId, tokio::sync::watch::Receiver<AggregateOutcome>> = HashMap::new();
        for job_id in &active.jobs {
            // invariant: `active.jobs` was built from this same `workflow`.
            #[allow(clippy::expect_used)]
            let job = workflow
                .job(job_id)
                .expect("job in active subgraph must exist in workflow");
            let task_count = if job.is_array() { job.array_size } else { 1 };
            let (aggregator, rx) = JobAggregator::new(task_count);
            aggregators.insert(job_id.clone(), aggregator);
            receivers.insert(job_id.clone(), rx);
        }

        self.sink.workflow_started(active.jobs.len(), total_task_count(workflow, active));

        let mut handles = Vec::new();
        let mut synthetic_reports = Vec::new();

        for job_id in &active.jobs {
            // invariant: `active.jobs` was built from this same `workflow`.
            #[allow(clippy::expect_used)]
            let job = workflow
                .job(job_id)
                .expect("job in active subgraph must exist in workflow");
            let aggregator = aggregators[job_id].clone();

            let predecessors_for = || -> Vec<Predecessor> {
                workflow
                    .incoming(job_id)
                    .map(|edge| Predecessor {
                        job: edge.from.clone(),
                        status: edge.status,
                        rx: receivers[&edge.from].clone(),
                    })
                    .collect()
            };

            match active.outcome(job_id) {
                PruneOutcome::Skipped => {
                    // Synthesize success for every slot without running
                    // anything or waiting on predecessors (§4.2: a pruned
                    // job's postconditions already held).
                    let task_count = if job.is_array() { job.array_size } else { 1 };
                    for slot in 0..task_count {
                        aggregator.publish(slot, Terminal::Succeeded);
                        let index = if job.is_array() { Some(slot) } else { None };
                        let report = TaskReport {
                            job: job_id.clone(),
                            index,
                            state: TaskState::Skipped,
                            error: None,
                        };
                        self.sink.task_finished(&report);
                        synthetic_reports.push(report);
                    }
                }
                PruneOutcome::PartiallyLive(live_indices) => {
                    let live: std::collections::HashSet<usize> = live_indices.iter().copied().collect();
                    for slot in 0..job.array_size {
                        if live.contains(&slot) {
                            let ctx = TaskContext {
                                job: Arc::new(job.clone()),
                                slot,
                                index: Some(slot),
                                predecessors: predecessors_for(),
                                aggregator: aggregator.clone(),
                                sink: self.sink.clone(),
                                worker_pool: self.worker_pool.clone(),
                                cancel: self.cancel.clone(),
                            };
                            handles.push(tokio::spawn(run_task(ctx)));
                        } else {
                            aggregator.publish(slot, Terminal::Succeeded);
                            let report = TaskReport {
                                job: job_id.clone(),
                                index: Some(slot),
                                state: TaskState::Skipped,
                                error: None,
                            };
                            self.sink.task_finished(&report);
                            synthetic_reports.push(report);
                        }
                    }
                }
                PruneOutcome::Live => {
                    if job.is_array() {
                        for slot in 0..job.array_size {
                            let ctx = TaskContext {
                                job: Arc::new(job.clone()),
                                slot,
                                index: Some(slot),
                                predecessors: predecessors_for(),
                                aggregator: aggregator.clone(),
                                sink: self.sink.clone(),
                                worker_pool: self.worker_pool.clone(),
                                cancel: self.cancel.clone(),
                            };
                            handles.push(tokio::spawn(run_task(ctx)));
                        }
                    } else {
                        let ctx = TaskContext {
                            job: Arc::new(job.clone()),
                            slot: 0,
                            index: None,
                            predecessors: predecessors_for(),
                            aggregator: aggregator.clone(),
                            sink: self.sink.clone(),
                            worker_pool: self.worker_pool.clone(),
                            cancel: self.cancel.clone(),
                        };
                        handles.push(tokio::spawn(run_task(ctx)));
                    }
                }
            }
        }

        let mut reports = synthetic_reports;
        for handle in handles {
            // invariant: `run_task` never panics; a join error here means a
            // worker thread itself panicked, which this engine does not try
            // to recover from.
            #[allow(clippy::expect_used)]
            let report = handle.await.expect("task must not panic");
            reports.push(report);
        }

        let summary = summarize(active.jobs.len(), reports, started.elapsed());
        self.sink.workflow_finished(&summary);
        Ok(summary)
    }
}

fn total_task_count(workflow: &Workflow, active: &ActiveSubgraph) -> usize {
    active
        .jobs
        .iter()
        .map(|id| {
            // invariant: `active.jobs` was built from this same `workflow`.
            #[allow(clippy::expect_used)]
            let job = workflow.job(id).expect("job in active subgraph must exist");
            if job.is_array() {
                job.array_size
            } else {
                1
            }
        })
        .sum()
}

fn summarize(job_count: usize, reports: Vec<TaskReport>, duration: std::time::Duration) -> WorkflowSummary {
    let mut succeeded = 0;
    let mut failed = 0;
    let mut cancelled = 0;
    let mut skipped = 0;
    let mut failures = Vec::new();

    for report in &reports {
        match report.state {
            TaskState::Succeeded => succeeded += 1,
            TaskState::Failed => {
                failed += 1;
                failures.push(report.clone());
            }
            TaskState::Cancelled => cancelled += 1,
            TaskState::Skipped => skipped += 1,
        }
    }

    let summary = WorkflowSummary {
        job_count,
        task_count: reports.len(),
        succeeded,
        failed,
        cancelled,
        skipped,
        failures,
        duration,
    };
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::model::{EdgeStatus, Job, Join, Resources};
    use crate::sink::{CollectingSink, NullSink};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(id: &str) -> Job {
        Job {
            id: JobId::new(id),
            name: id.into(),
            body: Arc::new(|_: Option<usize>| Ok(())),
            array_size: 1,
            array_throttle: None,
            resources: Resources::new(),
            preconditions: vec![],
            postconditions: vec![],
            join: Join::All,
            skipped: false,
        }
    }

    #[tokio::test]
    async fn linear_chain_all_succeed() {
        let mut b = GraphBuilder::new();
        for id in ["a", "b", "c"] {
            b.add_job(job(id)).unwrap();
        }
        b.add_edge("a", "b", EdgeStatus::Success).unwrap();
        b.add_edge("b", "c", EdgeStatus::Success).unwrap();
        let wf = b.freeze(&[JobId::new("c")]).unwrap();
        let active = crate::traversal::active_subgraph(&wf, false).unwrap();

        let engine = AsyncEngine::new(4, Arc::new(NullSink), CancelToken::new());
        let summary = engine.run(&wf, &active).await.unwrap();
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn failure_propagates_through_all_join() {
        let mut b = GraphBuilder::new();
        let mut fails = job("a");
        fails.body = Arc::new(|_: Option<usize>| Err("boom".into()));
        b.add_job(fails).unwrap();
        b.add_job(job("b")).unwrap();
        b.add_edge("a", "b", EdgeStatus::Success).unwrap();
        let wf = b.freeze(&[JobId::new("b")]).unwrap();
        let active = crate::traversal::active_subgraph(&wf, false).unwrap();

        let sink = CollectingSink::new();
        let engine = AsyncEngine::new(4, sink.clone(), CancelToken::new());
        let summary = engine.run(&wf, &active).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn any_join_tolerates_one_failure() {
        let mut b = GraphBuilder::new();
        let mut fails = job("a");
        fails.body = Arc::new(|_: Option<usize>| Err("boom".into()));
        b.add_job(fails).unwrap();
        b.add_job(job("ok")).unwrap();
        let mut c = job("c");
        c.join = Join::Any;
        b.add_job(c).unwrap();
        b.add_edge("a", "c", EdgeStatus::Any).unwrap();
        b.add_edge("ok", "c", EdgeStatus::Any).unwrap();
        let wf = b.freeze(&[JobId::new("c")]).unwrap();
        let active = crate::traversal::active_subgraph(&wf, false).unwrap();

        let engine = AsyncEngine::new(4, Arc::new(NullSink), CancelToken::new());
        let summary = engine.run(&wf, &active).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 2); // "ok" and "c"
    }

    #[tokio::test]
    async fn pruned_job_never_runs_its_body() {
        let invoked = Arc::new(AtomicUsize::new(0));
        let mut b = GraphBuilder::new();
        let counter = invoked.clone();
        let mut c = job("c");
        c.body = Arc::new(move |_: Option<usize>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        c.postconditions = vec![crate::model::Predicate::scalar(|| true)];
        b.add_job(c).unwrap();
        let wf = b.freeze(&[JobId::new("c")]).unwrap();
        let active = crate::traversal::active_subgraph(&wf, true).unwrap();

        let engine = AsyncEngine::new(4, Arc::new(NullSink), CancelToken::new());
        let summary = engine.run(&wf, &active).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn array_job_runs_all_indices_concurrently() {
        let mut b = GraphBuilder::new();
        let mut arr = job("arr");
        arr.array_size = 3;
        b.add_job(arr).unwrap();
        let wf = b.freeze(&[JobId::new("arr")]).unwrap();
        let active = crate::traversal::active_subgraph(&wf, false).unwrap();

        let engine = AsyncEngine::new(4, Arc::new(NullSink), CancelToken::new());
        let summary = engine.run(&wf, &active).await.unwrap();
        assert_eq!(summary.task_count, 3);
        assert_eq!(summary.succeeded, 3);
    }
}
