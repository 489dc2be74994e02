//! Graph builder & validator (C2).
//!
//! Accepts job descriptors and edges in any declaration order and freezes
//! them into an immutable [`Workflow`]: a mutable construction-time type
//! (`GraphBuilder`) that only yields a read-only value (`Workflow`) once
//! validated.

use std::collections::{HashMap, HashSet};

use crate::error::WorkflowError;
use crate::model::{Edge, EdgeStatus, Job, JobId};

/// A workflow graph under construction. Not `Clone`; once you have what you
/// want, call [`GraphBuilder::freeze`].
#[derive(Default)]
pub struct GraphBuilder {
    jobs: HashMap<JobId, Job>,
    edges: Vec<Edge>,
    /// Ordered pairs already declared, regardless of status — "at most one
    /// edge per ordered pair" (§3) so duplicate-checking ignores `status`.
    declared_pairs: HashSet<(JobId, JobId)>,
    /// adjacency for the O(V+E) reachability check in `add_edge`
    outgoing: HashMap<JobId, Vec<JobId>>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a job. Fails with [`WorkflowError::DuplicateJob`] if `id`
    /// collides, or with [`WorkflowError::BadArraySpec`] if the job's own
    /// invariants (§3) don't hold.
    pub fn add_job(&mut self, job: Job) -> Result<(), WorkflowError> {
        job.validate()?;
        if self.jobs.contains_key(&job.id) {
            return Err(WorkflowError::DuplicateJob(job.id.to_string()));
        }
        self.outgoing.entry(job.id.clone()).or_default();
        self.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Declare a dependency edge. Fails with [`WorkflowError::UnknownJob`],
    /// [`WorkflowError::DuplicateEdge`], or [`WorkflowError::CycleDetected`].
    pub fn add_edge(
        &mut self,
        from: impl Into<JobId>,
        to: impl Into<JobId>,
        status: EdgeStatus,
    ) -> Result<(), WorkflowError> {
        let from = from.into();
        let to = to.into();

        if !self.jobs.contains_key(&from) {
            return Err(WorkflowError::UnknownJob(from.to_string()));
        }
        if !self.jobs.contains_key(&to) {
            return Err(WorkflowError::UnknownJob(to.to_string()));
        }

        if self.declared_pairs.contains(&(from.clone(), to.clone())) {
            return Err(WorkflowError::DuplicateEdge {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        // Adding from -> to closes a cycle iff `to` can already reach `from`.
        if self.reaches(&to, &from) {
            return Err(WorkflowError::CycleDetected {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        self.outgoing.entry(from.clone()).or_default().push(to.clone());
        self.declared_pairs.insert((from.clone(), to.clone()));
        self.edges.push(Edge { from, to, status });
        Ok(())
    }

    /// Mutate an already-declared job in place (used by [`crate::builder`] to
    /// attach joins/predicates after `add_job`, since the builder API
    /// separates "declare" from "configure").
    pub fn edit_job(&mut self, id: &JobId, f: impl FnOnce(&mut Job)) -> Result<(), WorkflowError> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| WorkflowError::UnknownJob(id.to_string()))?;
        f(job);
        job.validate()
    }

    /// BFS reachability check: does `start` reach `target` via `outgoing` edges?
    fn reaches(&self, start: &JobId, target: &JobId) -> bool {
        if start == target {
            return true;
        }
        let mut seen = HashSet::new();
        let mut stack = vec![start.clone()];
        while let Some(node) = stack.pop() {
            if !seen.insert(node.clone()) {
                continue;
            }
            if let Some(children) = self.outgoing.get(&node) {
                for child in children {
                    if child == target {
                        return true;
                    }
                    stack.push(child.clone());
                }
            }
        }
        false
    }

    /// Validate `target_ids` and freeze into an immutable [`Workflow`].
    pub fn freeze(self, target_ids: &[JobId]) -> Result<Workflow, WorkflowError> {
        for target in target_ids {
            if !self.jobs.contains_key(target) {
                return Err(WorkflowError::UnknownTarget(target.to_string()));
            }
        }
        Ok(Workflow {
            jobs: self.jobs,
            edges: self.edges,
            targets: target_ids.to_vec(),
        })
    }
}

/// An immutable, validated workflow graph.
#[derive(Clone)]
pub struct Workflow {
    pub(crate) jobs: HashMap<JobId, Job>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) targets: Vec<JobId>,
}

impl Workflow {
    pub fn job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn targets(&self) -> &[JobId] {
        &self.targets
    }

    /// Edges whose `to` is `job` — i.e. `job`'s direct predecessors.
    pub fn incoming(&self, job: &JobId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| &e.to == job)
    }

    /// Edges whose `from` is `job` — i.e. `job`'s direct dependents.
    pub fn outgoing(&self, job: &JobId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| &e.from == job)
    }

    /// Rebuild this workflow with every job transformed by `f`, keeping
    /// edges and targets untouched. Used by the dummy backend (§6) to swap
    /// in traced-sleep bodies without re-validating the graph.
    pub fn map_jobs(self, mut f: impl FnMut(Job) -> Job) -> Workflow {
        let jobs = self
            .jobs
            .into_iter()
            .map(|(id, job)| (id, f(job)))
            .collect();
        Workflow {
            jobs,
            edges: self.edges,
            targets: self.targets,
        }
    }
}
