//! Event/error sink interface (C6).
//!
//! A minimal push interface both execution backends report through. This is
//! the programmatic channel a host application (the out-of-scope CLI
//! renderer / metadata store) consumes; see `AMBIENT STACK` in
//! `SPEC_FULL.md` for how this differs from, and feeds alongside,
//! `tracing`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::model::JobId;

/// A task's terminal state, as reported to a sink. Distinct from
/// `engine::outcome::Terminal`: this is the public, three-plus-one-shaped
/// vocabulary from §3 (`Skipped` is visible here, unlike in the internal
/// aggregate where it has already been folded into `Succeeded`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Succeeded => "SUCCEEDED",
            TaskState::Failed => "FAILED",
            TaskState::Cancelled => "CANCELLED",
            TaskState::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// One row of the aggregated end-of-run report (§7 "tabular summary").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub job: JobId,
    pub index: Option<usize>,
    pub state: TaskState,
    pub error: Option<String>,
}

/// Emitted once the engine reaches quiescence (§4.3, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub job_count: usize,
    pub task_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub failures: Vec<TaskReport>,
    pub duration: Duration,
}

impl WorkflowSummary {
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// Push interface consumed by the execution backends (C4, C5).
///
/// All methods are synchronous and infallible by design: a sink that wants
/// to do fallible I/O (file logging, a network call) should buffer and
/// handle its own errors internally rather than making the engine's
/// quiescence depend on a sink's success.
pub trait EventSink: Send + Sync {
    fn workflow_started(&self, job_count: usize, task_count: usize);
    fn task_started(&self, job: &JobId, index: Option<usize>);
    fn task_finished(&self, report: &TaskReport);
    fn workflow_finished(&self, summary: &WorkflowSummary);
}

/// Discards everything. Useful as a default or in tests that only care
/// about terminal states, not reporting.
#[derive(Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn workflow_started(&self, _job_count: usize, _task_count: usize) {}
    fn task_started(&self, _job: &JobId, _index: Option<usize>) {}
    fn task_finished(&self, _report: &TaskReport) {}
    fn workflow_finished(&self, _summary: &WorkflowSummary) {}
}

/// Forwards every event to `tracing`: `info!` for workflow-level milestones,
/// `debug!` for individual tasks.
#[derive(Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn workflow_started(&self, job_count: usize, task_count: usize) {
        tracing::info!(job_count, task_count, "workflow started");
    }

    fn task_started(&self, job: &JobId, index: Option<usize>) {
        tracing::debug!(job = %job, index = ?index, "task started");
    }

    fn task_finished(&self, report: &TaskReport) {
        match report.state {
            TaskState::Failed => {
                tracing::warn!(job = %report.job, index = ?report.index, error = ?report.error, "task failed")
            }
            _ => {
                tracing::debug!(job = %report.job, index = ?report.index, state = %report.state, "task finished")
            }
        }
    }

    fn workflow_finished(&self, summary: &WorkflowSummary) {
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            duration_ms = summary.duration.as_millis() as u64,
            "workflow finished"
        );
    }
}

/// Buffers every event in memory. Used by tests and by the CLI to build its
/// tabular summary after a run.
#[derive(Default)]
pub struct CollectingSink {
    reports: Mutex<Vec<TaskReport>>,
    summary: Mutex<Option<WorkflowSummary>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reports(&self) -> Vec<TaskReport> {
        self.reports.lock().clone()
    }

    pub fn summary(&self) -> Option<WorkflowSummary> {
        self.summary.lock().clone()
    }
}

impl EventSink for CollectingSink {
    fn workflow_started(&self, _job_count: usize, _task_count: usize) {}
    fn task_started(&self, _job: &JobId, _index: Option<usize>) {}

    fn task_finished(&self, report: &TaskReport) {
        self.reports.lock().push(report.clone());
    }

    fn workflow_finished(&self, summary: &WorkflowSummary) {
        *self.summary.lock() = Some(summary.clone());
    }
}

/// Fan out to multiple sinks — used by the CLI to combine `TracingSink`
/// (operational) with a `JsonlFileSink` (persisted layout, §6) in one run.
pub struct FanOutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanOutSink {
    fn workflow_started(&self, job_count: usize, task_count: usize) {
        for s in &self.sinks {
            s.workflow_started(job_count, task_count);
        }
    }

    fn task_started(&self, job: &JobId, index: Option<usize>) {
        for s in &self.sinks {
            s.task_started(job, index);
        }
    }

    fn task_finished(&self, report: &TaskReport) {
        for s in &self.sinks {
            s.task_finished(report);
        }
    }

    fn workflow_finished(&self, summary: &WorkflowSummary) {
        for s in &self.sinks {
            s.workflow_finished(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_is_nonzero_iff_any_failure() {
        let summary = WorkflowSummary {
            job_count: 1,
            task_count: 1,
            succeeded: 0,
            failed: 1,
            cancelled: 0,
            skipped: 0,
            failures: vec![],
            duration: Duration::from_secs(0),
        };
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn collecting_sink_records_reports_and_summary() {
        let sink = CollectingSink::new();
        sink.task_finished(&TaskReport {
            job: JobId::new("a"),
            index: None,
            state: TaskState::Succeeded,
            error: None,
        });
        assert_eq!(sink.reports().len(), 1);
        assert!(sink.summary().is_none());
    }
}
