//! Cluster backend: translates a frozen [`crate::graph::Workflow`] into a
//! Slurm batch submission (C5, §4.4).
//!
//! The core is fully serial here (§5 "Cluster engine"): one job is submitted
//! at a time, in topological order, because each job's `--dependency`
//! directive embeds the external ids of jobs submitted before it.

pub mod script;

use std::collections::HashMap;
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{WorkflowError, WorkflowResult};
use crate::graph::Workflow;
use crate::model::JobId;
use crate::sink::{EventSink, NullSink, TaskReport, TaskState, WorkflowSummary};
use crate::traversal::{ActiveSubgraph, PruneOutcome};
use crate::workdir::RunDir;

/// Which side of the body a serialised predicate guards, per the §4.4
/// mapping table ("Prepended to the generated script body" / "Appended to
/// the script").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateKind {
    Precondition,
    Postcondition,
}

/// External collaborator hook (§1, §4.4 "Body delivery"): turns a job's
/// opaque body, and its opaque predicates, into something addressable from
/// a shell script. The core never inspects the serialised form; it only
/// needs a path to embed.
pub trait BodySerializer {
    fn serialize(&self, job: &crate::model::Job) -> WorkflowResult<String>;

    /// Serialise the `position`-th predicate of `kind` on `job`, returning a
    /// path the generated script can invoke and check the exit status of.
    fn serialize_predicate(
        &self,
        job: &crate::model::Job,
        kind: PredicateKind,
        position: usize,
    ) -> WorkflowResult<String>;
}

/// Abstraction over actually talking to Slurm, so tests can inject a double
/// instead of shelling out to `sbatch`/`scancel`.
pub trait SlurmSubmitter {
    fn submit(&self, script_path: &str) -> WorkflowResult<String>;
    fn cancel(&self, external_id: &str);
}

/// The real submitter: shells out to `sbatch`/`scancel` and parses the
/// conventional `Submitted batch job <id>` line.
pub struct CommandSubmitter;

impl SlurmSubmitter for CommandSubmitter {
    fn submit(&self, script_path: &str) -> WorkflowResult<String> {
        let output = Command::new("sbatch")
            .arg(script_path)
            .output()
            .map_err(|e| WorkflowError::SubmissionFailed {
                job: script_path.to_string(),
                reason: format!("failed to spawn sbatch: {e}"),
            })?;

        if !output.status.success() {
            return Err(WorkflowError::SubmissionFailed {
                job: script_path.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .split_whitespace()
            .last()
            .map(|s| s.to_string())
            .ok_or_else(|| WorkflowError::SubmissionFailed {
                job: script_path.to_string(),
                reason: format!("could not parse sbatch output: {stdout}"),
            })
    }

    fn cancel(&self, external_id: &str) {
        let _ = Command::new("scancel").arg(external_id).output();
    }
}

pub struct SlurmTranslator<S: SlurmSubmitter, B: BodySerializer> {
    submitter: S,
    serializer: B,
    /// Shell command used to deserialise and run a body; `{index}` is
    /// substituted with `$SLURM_ARRAY_TASK_ID` for array jobs.
    runtime_invocation: String,
    /// Reports submission progress through C6, same interface the async
    /// engine uses (§4.5: "Both engines report state transitions and errors
    /// through C6"). A submission here is the cluster engine's analogue of
    /// a task's terminal state: `task_finished` fires once the job is
    /// handed off to `sbatch`, not once it actually completes on the
    /// cluster, which this translator has no way to observe.
    sink: Arc<dyn EventSink>,
}

impl<S: SlurmSubmitter, B: BodySerializer> SlurmTranslator<S, B> {
    pub fn new(submitter: S, serializer: B, runtime_invocation: impl Into<String>) -> Self {
        Self {
            submitter,
            serializer,
            runtime_invocation: runtime_invocation.into(),
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Submit every job in `active` in topological order, rolling back
    /// (`scancel`, in reverse submission order) if any submission fails.
    /// A job `active` marked [`PruneOutcome::Skipped`] submits a no-op
    /// script rather than its real body (Testable Invariant 5); one marked
    /// [`PruneOutcome::PartiallyLive`] restricts its `--array=` range to the
    /// still-live indices. On success, persists the job-id -> external-id
    /// mapping via `run_dir.write_submission_log`.
    pub fn submit_all(
        &self,
        workflow: &Workflow,
        active: &ActiveSubgraph,
        run_dir: &RunDir,
    ) -> WorkflowResult<HashMap<JobId, String>> {
        let started = Instant::now();
        let order = crate::traversal::topological_order(workflow, &active.jobs)?;
        self.sink.workflow_started(order.len(), order.len());

        let mut external_ids: HashMap<JobId, String> = HashMap::new();
        let mut submitted_in_order: Vec<String> = Vec::new();
        let mut reports: Vec<TaskReport> = Vec::new();

        for job_id in &order {
            self.sink.task_started(job_id, None);
            match self.submit_one(workflow, job_id, &external_ids, active.outcome(job_id), run_dir) {
                Ok(external_id) => {
                    let report = TaskReport {
                        job: job_id.clone(),
                        index: None,
                        state: TaskState::Succeeded,
                        error: None,
                    };
                    self.sink.task_finished(&report);
                    reports.push(report);
                    submitted_in_order.push(external_id.clone());
                    external_ids.insert(job_id.clone(), external_id);
                }
                Err(err) => {
                    let report = TaskReport {
                        job: job_id.clone(),
                        index: None,
                        state: TaskState::Failed,
                        error: Some(err.to_string()),
                    };
                    self.sink.task_finished(&report);
                    reports.push(report);
                    for id in submitted_in_order.iter().rev() {
                        self.submitter.cancel(id);
                    }
                    self.sink.workflow_finished(&summarize(reports, started.elapsed()));
                    return Err(err);
                }
            }
        }

        self.sink.workflow_finished(&summarize(reports, started.elapsed()));
        run_dir.write_submission_log(&external_ids)?;
        Ok(external_ids)
    }

    fn submit_one(
        &self,
        workflow: &Workflow,
        job_id: &JobId,
        external_ids: &HashMap<JobId, String>,
        prune_outcome: &PruneOutcome,
        run_dir: &RunDir,
    ) -> WorkflowResult<String> {
        // invariant: `job_id` came from `topological_order(workflow, &active.jobs)`.
        #[allow(clippy::expect_used)]
        let job = workflow
            .job(job_id)
            .expect("job in active subgraph must exist in workflow");

        let predecessors: Vec<(crate::model::EdgeStatus, String)> = workflow
            .incoming(job_id)
            .map(|edge| {
                // invariant: topological submission order guarantees every
                // predecessor was submitted, and thus present in `external_ids`,
                // before `job_id` is reached.
                #[allow(clippy::expect_used)]
                let external_id = external_ids.get(&edge.from).expect(
                    "predecessor must already be submitted given topological submission order",
                );
                (edge.status, external_id.clone())
            })
            .collect();

        let dependency = script::dependency_directive(job.join, &predecessors);

        let live_indices = match prune_outcome {
            PruneOutcome::PartiallyLive(indices) => Some(indices.as_slice()),
            PruneOutcome::Live | PruneOutcome::Skipped => None,
        };
        let skip_body = job.skipped || matches!(prune_outcome, PruneOutcome::Skipped);

        let body_path = if skip_body {
            String::new()
        } else {
            self.serializer.serialize(job)?
        };

        let precondition_paths = job
            .preconditions
            .iter()
            .enumerate()
            .map(|(i, _)| self.serializer.serialize_predicate(job, PredicateKind::Precondition, i))
            .collect::<WorkflowResult<Vec<String>>>()?;
        let postcondition_paths = job
            .postconditions
            .iter()
            .enumerate()
            .map(|(i, _)| self.serializer.serialize_predicate(job, PredicateKind::Postcondition, i))
            .collect::<WorkflowResult<Vec<String>>>()?;

        let rendered = script::render_script(
            job,
            &body_path,
            &precondition_paths,
            &postcondition_paths,
            &self.runtime_invocation,
            dependency.as_deref(),
            live_indices,
            skip_body,
        );
        let script_path = run_dir.script_path(job_id);
        std::fs::write(&script_path, rendered)?;

        self.submitter
            .submit(script_path.to_string_lossy().as_ref())
    }
}

/// Builds the submission-phase summary reported through `workflow_finished`.
/// `failed`/`cancelled` mirror the async engine's vocabulary even though the
/// cluster engine only ever reports at most one `Failed` (the submission
/// that aborted the run) and no `Cancelled` (rollback is a side effect on
/// already-`Succeeded` entries, not a terminal state of its own).
fn summarize(reports: Vec<TaskReport>, duration: std::time::Duration) -> WorkflowSummary {
    let succeeded = reports.iter().filter(|r| r.state == TaskState::Succeeded).count();
    let failed = reports.iter().filter(|r| r.state == TaskState::Failed).count();
    let failures = reports.iter().filter(|r| r.state == TaskState::Failed).cloned().collect();
    WorkflowSummary {
        job_count: reports.len(),
        task_count: reports.len(),
        succeeded,
        failed,
        cancelled: 0,
        skipped: 0,
        failures,
        duration,
    }
}
