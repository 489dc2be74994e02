//! Per-task protocol (§4.3 "Per-task protocol").
//!
//! One instance of [`run_task`] drives exactly one `(job, index)` pair
//! through gather-predecessors -> join -> preconditions -> execute ->
//! postconditions -> publish, in that strict order (§5: "within a single
//! task the steps ... are strictly sequential").

use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::watch;

use crate::error::WorkflowError;
use crate::model::{Job, Join};
use crate::resources;
use crate::sink::{EventSink, TaskReport, TaskState};

use super::cancel::CancelToken;
use super::outcome::{self, AggregateOutcome, JobAggregator, Terminal};
use super::worker::{BodyOutcome, WorkerPool};

/// One predecessor a task must reconcile before it may proceed.
pub struct Predecessor {
    pub job: crate::model::JobId,
    pub status: crate::model::EdgeStatus,
    pub rx: watch::Receiver<AggregateOutcome>,
}

pub struct TaskContext {
    pub job: Arc<Job>,
    /// Slot in the job's aggregator (array index, or 0 for scalar).
    pub slot: usize,
    /// Index passed to predicates/body: `Some` for array tasks, `None` for scalar.
    pub index: Option<usize>,
    pub predecessors: Vec<Predecessor>,
    pub aggregator: Arc<JobAggregator>,
    pub sink: Arc<dyn EventSink>,
    pub worker_pool: WorkerPool,
    pub cancel: CancelToken,
}

pub async fn run_task(ctx: TaskContext) -> TaskReport {
    let TaskContext {
        job,
        slot,
        index,
        predecessors,
        aggregator,
        sink,
        worker_pool,
        cancel,
    } = ctx;

    macro_rules! finish {
        ($terminal:expr, $state:expr, $err:expr) => {{
            aggregator.publish(slot, $terminal);
            let report = TaskReport {
                job: job.id.clone(),
                index,
                state: $state,
                error: $err,
            };
            sink.task_finished(&report);
            return report;
        }};
    }

    if cancel.is_cancelled() {
        finish!(Terminal::Cancelled, TaskState::Cancelled, None);
    }

    // Step 1 + 2: gather predecessors, apply join.
    if !join_satisfied(job.join, predecessors, &cancel).await {
        finish!(
            Terminal::Cancelled,
            TaskState::Cancelled,
            Some("unsatisfied dependency".to_string())
        );
    }

    if cancel.is_cancelled() {
        finish!(Terminal::Cancelled, TaskState::Cancelled, None);
    }

    // Step 3: preconditions.
    for (i, predicate) in job.preconditions.iter().enumerate() {
        if !predicate.evaluate(index) {
            let err = WorkflowError::PreconditionViolated {
                job: job.id.to_string(),
                index: i,
                task_index: index,
            };
            finish!(
                Terminal::Failed,
                TaskState::Failed,
                Some(err.to_string())
            );
        }
    }

    if cancel.is_cancelled() {
        finish!(Terminal::Cancelled, TaskState::Cancelled, None);
    }

    // Step 4: execute.
    sink.task_started(&job.id, index);
    let body_result = if job.skipped {
        BodyOutcome::Ok
    } else {
        let timeout = resources::timelimit(&job.resources);
        worker_pool.run(job.body.clone(), index, timeout).await
    };

    match body_result {
        BodyOutcome::Err(source) => {
            let err = WorkflowError::JobFailed {
                job: job.id.to_string(),
                source,
            };
            finish!(Terminal::Failed, TaskState::Failed, Some(err.to_string()));
        }
        BodyOutcome::TimedOut(duration) => {
            let err = WorkflowError::JobFailed {
                job: job.id.to_string(),
                source: format!("exceeded advisory timeout of {duration:?}").into(),
            };
            finish!(Terminal::Failed, TaskState::Failed, Some(err.to_string()));
        }
        BodyOutcome::Ok => {}
    }

    // Step 5: postconditions.
    for (i, predicate) in job.postconditions.iter().enumerate() {
        if !predicate.evaluate(index) {
            let err = WorkflowError::PostconditionViolated {
                job: job.id.to_string(),
                index: i,
                task_index: index,
            };
            finish!(Terminal::Failed, TaskState::Failed, Some(err.to_string()));
        }
    }

    // Step 6: publish success.
    finish!(Terminal::Succeeded, TaskState::Succeeded, None);
}

/// Implements §4.3 step 2. Returns `true` if the task may proceed, `false`
/// if it must become `CANCELLED`.
async fn join_satisfied(
    join: Join,
    predecessors: Vec<Predecessor>,
    cancel: &CancelToken,
) -> bool {
    if predecessors.is_empty() {
        return true;
    }

    let total = predecessors.len();
    let mut waiting: FuturesUnordered<_> = predecessors
        .into_iter()
        .map(|mut p| async move {
            let outcome = outcome::wait_for_terminal(&mut p.rx).await;
            (p.status, outcome)
        })
        .collect();

    let mut compatible = 0usize;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            next = waiting.next() => {
                match next {
                    None => break,
                    Some((status, outcome)) => {
                        if outcome::is_compatible(outcome, status) {
                            compatible += 1;
                            if join == Join::Any {
                                return true;
                            }
                        } else if join == Join::All {
                            return false;
                        }
                    }
                }
            }
        }
    }

    match join {
        Join::All => compatible == total,
        Join::Any => compatible > 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EdgeStatus, JobId, Predicate, Resources};
    use crate::sink::NullSink;

    fn make_job(id: &str, join: Join) -> Arc<Job> {
        Arc::new(Job {
            id: JobId::new(id),
            name: id.into(),
            body: Arc::new(|_: Option<usize>| Ok(())),
            array_size: 1,
            array_throttle: None,
            resources: Resources::new(),
            preconditions: vec![],
            postconditions: vec![],
            join,
            skipped: false,
        })
    }

    fn terminal_rx(outcome: AggregateOutcome) -> watch::Receiver<AggregateOutcome> {
        let (_tx, rx) = watch::channel(outcome);
        _tx.send(outcome).ok();
        std::mem::forget(_tx);
        rx
    }

    #[tokio::test]
    async fn scalar_job_with_no_predecessors_runs() {
        let job = make_job("a", Join::All);
        let (aggregator, _rx) = JobAggregator::new(1);
        let ctx = TaskContext {
            job: job.clone(),
            slot: 0,
            index: None,
            predecessors: vec![],
            aggregator,
            sink: Arc::new(NullSink),
            worker_pool: WorkerPool::new(2),
            cancel: CancelToken::new(),
        };
        let report = run_task(ctx).await;
        assert_eq!(report.state, TaskState::Succeeded);
    }

    #[tokio::test]
    async fn all_join_cancels_on_incompatible_predecessor() {
        let job = make_job("c", Join::All);
        let (aggregator, _rx) = JobAggregator::new(1);
        let predecessors = vec![Predecessor {
            job: JobId::new("a"),
            status: EdgeStatus::Success,
            rx: terminal_rx(AggregateOutcome::Terminal(Terminal::Failed)),
        }];
        let ctx = TaskContext {
            job,
            slot: 0,
            index: None,
            predecessors,
            aggregator,
            sink: Arc::new(NullSink),
            worker_pool: WorkerPool::new(2),
            cancel: CancelToken::new(),
        };
        let report = run_task(ctx).await;
        assert_eq!(report.state, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn any_join_proceeds_with_one_compatible_predecessor() {
        let job = make_job("c", Join::Any);
        let (aggregator, _rx) = JobAggregator::new(1);
        let predecessors = vec![
            Predecessor {
                job: JobId::new("a"),
                status: EdgeStatus::Success,
                rx: terminal_rx(AggregateOutcome::Terminal(Terminal::Failed)),
            },
            Predecessor {
                job: JobId::new("b"),
                status: EdgeStatus::Success,
                rx: terminal_rx(AggregateOutcome::Terminal(Terminal::Succeeded)),
            },
        ];
        let ctx = TaskContext {
            job,
            slot: 0,
            index: None,
            predecessors,
            aggregator,
            sink: Arc::new(NullSink),
            worker_pool: WorkerPool::new(2),
            cancel: CancelToken::new(),
        };
        let report = run_task(ctx).await;
        assert_eq!(report.state, TaskState::Succeeded);
    }

    #[tokio::test]
    async fn false_precondition_fails_without_running_body() {
        let mut job = (*make_job("a", Join::All)).clone();
        job.preconditions = vec![Predicate::scalar(|| false)];
        let job = Arc::new(job);
        let (aggregator, _rx) = JobAggregator::new(1);
        let ctx = TaskContext {
            job,
            slot: 0,
            index: None,
            predecessors: vec![],
            aggregator,
            sink: Arc::new(NullSink),
            worker_pool: WorkerPool::new(2),
            cancel: CancelToken::new(),
        };
        let report = run_task(ctx).await;
        assert_eq!(report.state, TaskState::Failed);
    }

    #[tokio::test]
    async fn skipped_job_synthesizes_success_without_running_body() {
        let mut job = (*make_job("a", Join::All)).clone();
        job.skipped = true;
        job.body = Arc::new(|_: Option<usize>| -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            panic!("body should never run when job.skipped is set")
        });
        let job = Arc::new(job);
        let (aggregator, _rx) = JobAggregator::new(1);
        let ctx = TaskContext {
            job,
            slot: 0,
            index: None,
            predecessors: vec![],
            aggregator,
            sink: Arc::new(NullSink),
            worker_pool: WorkerPool::new(2),
            cancel: CancelToken::new(),
        };
        let report = run_task(ctx).await;
        assert_eq!(report.state, TaskState::Succeeded);
    }
}
