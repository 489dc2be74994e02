//! The `schedule(targets, *, backend, prune, name?)` facade from §6,
//! tying together [`crate::graph`], [`crate::traversal`], [`crate::engine`]
//! and [`crate::slurm`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::{AsyncEngine, CancelToken};
use crate::error::WorkflowResult;
use crate::graph::Workflow;
use crate::sink::{EventSink, WorkflowSummary};
use crate::traversal::{self, ActiveSubgraph};

/// Recognised backends (§6). `Dummy` reuses the async engine with every
/// job's body replaced by a short randomised sleep bracketed by START/END
/// trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Async,
    Dummy,
    Slurm,
}

pub struct ScheduleOptions {
    pub backend: Backend,
    pub prune: bool,
    pub parallelism: usize,
    pub name: Option<String>,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            backend: Backend::Async,
            prune: true,
            parallelism: num_cpus::get(),
            name: None,
        }
    }
}

/// Replace every job's body with a randomized sleep traced at start/end
/// (§6 "dummy"), preserving everything else about the job (dependencies,
/// predicates, array shape, resources).
pub fn with_dummy_bodies(workflow: Workflow) -> Workflow {
    workflow.map_jobs(|mut job| {
        let name = job.name.clone();
        job.body = Arc::new(move |index: Option<usize>| -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            tracing::info!(job = %name, index = ?index, "START");
            let millis = 5 + fastrand::u64(0..50);
            std::thread::sleep(Duration::from_millis(millis));
            tracing::info!(job = %name, index = ?index, "END");
            Ok(())
        });
        job
    })
}

/// Run the async (or dummy) local backend to quiescence.
pub async fn schedule_local(
    workflow: &Workflow,
    options: &ScheduleOptions,
    sink: Arc<dyn EventSink>,
    cancel: CancelToken,
) -> WorkflowResult<WorkflowSummary> {
    let active = traversal::active_subgraph(workflow, options.prune)?;
    let engine = AsyncEngine::new(options.parallelism, sink, cancel);
    engine.run(workflow, &active).await
}

/// Resolve `active` via pruning only — used by the Slurm backend, which
/// does not run tasks itself but still needs the pruned job set and
/// topological order.
pub fn resolve_active(workflow: &Workflow, prune: bool) -> WorkflowResult<ActiveSubgraph> {
    traversal::active_subgraph(workflow, prune)
}
