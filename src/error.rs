//! Error types for the workflow engine.

use thiserror::Error;

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Comprehensive error taxonomy for the scheduling core.
///
/// Validation errors (`Duplicate*`, `UnknownJob`, `CycleDetected`, ...) abort
/// `schedule` before any task runs. Everything from `PreconditionViolated`
/// down is raised against a single task and captured rather than propagated;
/// see [`crate::sink`] for how the engine surfaces these after quiescence.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Two jobs were declared with the same id.
    #[error("job {0} already declared")]
    DuplicateJob(String),

    /// An edge referenced a job id that was never declared.
    #[error("unknown job {0}")]
    UnknownJob(String),

    /// More than one edge was declared for the same ordered pair.
    #[error("edge {from} -> {to} already declared")]
    DuplicateEdge { from: String, to: String },

    /// Adding an edge would make the graph cyclic.
    #[error("cycle detected: adding {from} -> {to} would close a cycle")]
    CycleDetected { from: String, to: String },

    /// A schedule target does not name a declared job.
    #[error("unknown target {0}")]
    UnknownTarget(String),

    /// `array_size` or `array_throttle` out of range, or a per-index
    /// predicate attached to a scalar job.
    #[error("bad array spec for job {0}: {1}")]
    BadArraySpec(String, String),

    /// A precondition evaluated to `false`, or raised.
    #[error("precondition #{index} violated for job {job} task {task_index:?}")]
    PreconditionViolated {
        job: String,
        index: usize,
        task_index: Option<usize>,
    },

    /// A postcondition evaluated to `false`, or raised, after a successful body run.
    #[error("postcondition #{index} violated for job {job} task {task_index:?}")]
    PostconditionViolated {
        job: String,
        index: usize,
        task_index: Option<usize>,
    },

    /// The job body itself returned an error.
    #[error("job {job} failed: {source}")]
    JobFailed {
        job: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A Slurm (or other cluster) submission command failed.
    #[error("submission failed for job {job}: {reason}")]
    SubmissionFailed { job: String, reason: String },

    /// A job body could not be serialised for remote execution.
    #[error("could not serialize body of job {0}: {1}")]
    CallableSerializationFailed(String, String),

    /// Wraps a filesystem error encountered while persisting run artifacts.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Wraps a configuration load/validation error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for WorkflowError {
    fn from(err: std::io::Error) -> Self {
        WorkflowError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Persistence(err.to_string())
    }
}

impl From<toml::de::Error> for WorkflowError {
    fn from(err: toml::de::Error) -> Self {
        WorkflowError::Config(err.to_string())
    }
}

/// Attach ad-hoc "while doing X" context to a [`WorkflowResult`] at a call
/// site that doesn't warrant its own [`WorkflowError`] variant.
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> anyhow::Result<T>;
    fn with_context<F>(self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ErrorContext<T> for WorkflowResult<T> {
    fn context(self, msg: &str) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{msg}: {e}"))
    }

    fn with_context<F>(self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| anyhow::anyhow!("{}: {e}", f()))
    }
}
