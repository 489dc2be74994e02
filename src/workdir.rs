//! Persisted run layout (§6 "Persisted layout").
//!
//! For each scheduled workflow: one serialised callable file per job, one
//! generated script per job (Slurm backend only), a submission log mapping
//! job id to external id, and an event log. This module owns the directory
//! conventions; the Slurm translator and the CLI both write into it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{WorkflowError, WorkflowResult};
use crate::model::JobId;
use crate::sink::{EventSink, TaskReport, WorkflowSummary};

/// The working directory for a single run, rooted at `<base>/<name>`.
pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    pub fn create(base: &Path, name: &str) -> WorkflowResult<Self> {
        let root = base.join(name);
        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join("bodies"))?;
        fs::create_dir_all(root.join("scripts"))?;
        Ok(Self { root })
    }

    /// Create a run directory under a freshly generated, collision-free
    /// name, so concurrent runs against the same `base` never clobber each
    /// other the way a fixed name like `"latest"` would.
    pub fn create_unique(base: &Path) -> WorkflowResult<Self> {
        Self::create(base, &uuid::Uuid::new_v4().to_string())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn body_path(&self, job: &JobId) -> PathBuf {
        self.root.join("bodies").join(format!("{job}.body"))
    }

    pub fn script_path(&self, job: &JobId) -> PathBuf {
        self.root.join("scripts").join(format!("{job}.sbatch"))
    }

    /// Persist the submission log: job id -> external id (§4.4, §6).
    pub fn write_submission_log(&self, mapping: &std::collections::HashMap<JobId, String>) -> WorkflowResult<()> {
        let serialisable: std::collections::BTreeMap<String, String> = mapping
            .iter()
            .map(|(id, external)| (id.to_string(), external.clone()))
            .collect();
        let path = self.root.join("submission_log.json");
        fs::write(path, serde_json::to_vec_pretty(&serialisable)?)?;
        Ok(())
    }
}

/// Newline-delimited JSON event log, written alongside the run directory
/// (§4.5, §6). One line per `EventSink` call.
pub struct JsonlFileSink {
    file: Arc<Mutex<fs::File>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event<'a> {
    WorkflowStarted { job_count: usize, task_count: usize },
    TaskStarted { job: &'a str, index: Option<usize> },
    TaskFinished { report: &'a TaskReport },
    WorkflowFinished { summary: &'a WorkflowSummary },
}

/// An `Event` tagged with the wall-clock time it was recorded, so the
/// persisted log can be correlated against cluster/external timestamps.
#[derive(Serialize)]
struct TimestampedEvent<'a> {
    at: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    event: Event<'a>,
}

impl JsonlFileSink {
    pub fn create(run_dir: &RunDir) -> WorkflowResult<Self> {
        let path = run_dir.root().join("events.jsonl");
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(WorkflowError::from)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    fn write_line(&self, event: Event<'_>) {
        use std::io::Write;
        let stamped = TimestampedEvent {
            at: chrono::Utc::now(),
            event,
        };
        if let Ok(mut line) = serde_json::to_vec(&stamped) {
            line.push(b'\n');
            // Best-effort: a sink is infallible by contract (`EventSink`),
            // so a write failure here is dropped rather than surfaced.
            let _ = self.file.lock().write_all(&line);
        }
    }
}

impl EventSink for JsonlFileSink {
    fn workflow_started(&self, job_count: usize, task_count: usize) {
        self.write_line(Event::WorkflowStarted { job_count, task_count });
    }

    fn task_started(&self, job: &JobId, index: Option<usize>) {
        self.write_line(Event::TaskStarted {
            job: job.as_str(),
            index,
        });
    }

    fn task_finished(&self, report: &TaskReport) {
        self.write_line(Event::TaskFinished { report });
    }

    fn workflow_finished(&self, summary: &WorkflowSummary) {
        self.write_line(Event::WorkflowFinished { summary });
    }
}
