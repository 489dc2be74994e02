//! Fluent builder API (§6 "Builder API (conceptual)").
//!
//! A thin ergonomic layer over [`crate::graph::GraphBuilder`]: jobs are
//! declared once and referenced afterwards by the [`JobRef`] handle returned
//! from [`WorkflowBuilder::define_job`], rather than by re-typing string ids.

use std::sync::Arc;

use crate::error::WorkflowResult;
use crate::graph::{GraphBuilder, Workflow};
use crate::model::{EdgeStatus, Executable, Job, JobId, Join, Predicate, Resources};

/// A handle to a previously declared job, cheap to clone and pass around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef(JobId);

impl JobRef {
    pub fn id(&self) -> &JobId {
        &self.0
    }
}

pub struct WorkflowBuilder {
    graph: GraphBuilder,
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self {
            graph: GraphBuilder::new(),
        }
    }

    /// Declare a job. `array` of `None` means scalar; `Some(n)` fans out to
    /// `n` indexed tasks.
    #[allow(clippy::too_many_arguments)]
    pub fn define_job(
        &mut self,
        id: impl Into<JobId>,
        name: impl Into<String>,
        body: Arc<dyn Executable>,
        array: Option<usize>,
        array_throttle: Option<usize>,
        resources: Resources,
        skipped: bool,
    ) -> WorkflowResult<JobRef> {
        let id = id.into();
        let job = Job {
            id: id.clone(),
            name: name.into(),
            body,
            array_size: array.unwrap_or(1),
            array_throttle,
            resources,
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            join: Join::All,
            skipped,
        };
        self.graph.add_job(job)?;
        Ok(JobRef(id))
    }

    pub fn add_dependency(&mut self, from: &JobRef, to: &JobRef, status: EdgeStatus) -> WorkflowResult<()> {
        self.graph.add_edge(from.0.clone(), to.0.clone(), status)
    }

    pub fn set_join(&mut self, job: &JobRef, join: Join) -> WorkflowResult<()> {
        self.graph.edit_job(job.id(), |j| j.join = join)
    }

    pub fn add_precondition(&mut self, job: &JobRef, predicate: Predicate) -> WorkflowResult<()> {
        self.graph
            .edit_job(job.id(), |j| j.preconditions.push(predicate))
    }

    pub fn add_postcondition(&mut self, job: &JobRef, predicate: Predicate) -> WorkflowResult<()> {
        self.graph
            .edit_job(job.id(), |j| j.postconditions.push(predicate))
    }

    /// Validate and freeze the graph against `targets`, ready for
    /// `backend::schedule_local` or `slurm::SlurmTranslator::submit_all`.
    pub fn freeze(self, targets: &[JobRef]) -> WorkflowResult<Workflow> {
        let ids: Vec<JobId> = targets.iter().map(|t| t.0.clone()).collect();
        self.graph.freeze(&ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Resources;

    fn noop() -> Arc<dyn Executable> {
        Arc::new(|_: Option<usize>| Ok(()))
    }

    #[test]
    fn builds_a_linear_chain_with_a_precondition() {
        let mut builder = WorkflowBuilder::new();
        let a = builder
            .define_job("a", "a", noop(), None, None, Resources::new(), false)
            .unwrap();
        let b = builder
            .define_job("b", "b", noop(), None, None, Resources::new(), false)
            .unwrap();
        builder.add_dependency(&a, &b, EdgeStatus::Success).unwrap();
        builder
            .add_precondition(&b, Predicate::scalar(|| true))
            .unwrap();

        let workflow = builder.freeze(&[b]).unwrap();
        assert_eq!(workflow.jobs().count(), 2);
    }

    #[test]
    fn set_join_updates_the_declared_job() {
        let mut builder = WorkflowBuilder::new();
        let a = builder
            .define_job("a", "a", noop(), None, None, Resources::new(), false)
            .unwrap();
        builder.set_join(&a, Join::Any).unwrap();
        let workflow = builder.freeze(&[a.clone()]).unwrap();
        assert_eq!(workflow.job(a.id()).unwrap().join, Join::Any);
    }
}
