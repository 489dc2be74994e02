//! Traversal & pruner (C3).
//!
//! From a target set, computes the reachable ("active") subgraph and,
//! optionally, evaluates postconditions up front to mark branches that are
//! already satisfied as [`PruneOutcome::Skipped`] so the engine never runs
//! their bodies.

use std::collections::{HashMap, HashSet};

use crate::error::WorkflowError;
use crate::graph::Workflow;
use crate::model::JobId;

/// What pruning decided about a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneOutcome {
    /// Run normally; no postconditions held (or pruning is disabled).
    Live,
    /// All postconditions held for the whole job (scalar), or for every
    /// array index (array): the job contributes a synthetic success to
    /// downstream joins and its body is never invoked.
    Skipped,
    /// Array job, pruned down to a subset of indices; the listed indices
    /// are the ones that still need to run.
    PartiallyLive(Vec<usize>),
}

/// The active subgraph selected from a target set, with per-job prune
/// decisions folded in.
#[derive(Debug, Clone)]
pub struct ActiveSubgraph {
    /// Ancestors of the targets, including the targets themselves, in no
    /// particular order.
    pub jobs: HashSet<JobId>,
    pub decisions: HashMap<JobId, PruneOutcome>,
}

impl ActiveSubgraph {
    pub fn contains(&self, job: &JobId) -> bool {
        self.jobs.contains(job)
    }

    pub fn outcome(&self, job: &JobId) -> &PruneOutcome {
        self.decisions.get(job).unwrap_or(&PruneOutcome::Live)
    }
}

/// Compute ancestors of `targets` (inclusive) via the `to -> from` transitive
/// closure over edges, then — if `prune` is set — evaluate postconditions.
pub fn active_subgraph(workflow: &Workflow, prune: bool) -> Result<ActiveSubgraph, WorkflowError> {
    let jobs = reachable_ancestors(workflow, workflow.targets());

    let mut decisions = HashMap::new();
    if prune {
        for job_id in &jobs {
            // invariant: `jobs` is exactly the set of ids reached by walking
            // `workflow`'s own edges, so every id in it is a key in `workflow.jobs`.
            #[allow(clippy::expect_used)]
            let job = workflow
                .job(job_id)
                .expect("job in active subgraph must exist in workflow");
            if job.postconditions.is_empty() {
                continue;
            }

            if job.is_array() {
                let mut still_live = Vec::new();
                for index in 0..job.array_size {
                    let holds = evaluate_all(&job.postconditions, Some(index));
                    if !holds {
                        still_live.push(index);
                    }
                }
                if still_live.is_empty() {
                    decisions.insert(job_id.clone(), PruneOutcome::Skipped);
                } else if still_live.len() < job.array_size {
                    decisions.insert(job_id.clone(), PruneOutcome::PartiallyLive(still_live));
                }
            } else if evaluate_all(&job.postconditions, None) {
                decisions.insert(job_id.clone(), PruneOutcome::Skipped);
            }
        }
    }

    Ok(ActiveSubgraph { jobs, decisions })
}

/// Evaluate an ordered sequence of postconditions, stopping at the first
/// `false` (§4.2 "Ordering guarantees").
fn evaluate_all(predicates: &[crate::model::Predicate], index: Option<usize>) -> bool {
    predicates.iter().all(|p| p.evaluate(index))
}

fn reachable_ancestors(workflow: &Workflow, targets: &[JobId]) -> HashSet<JobId> {
    let mut seen = HashSet::new();
    let mut stack: Vec<JobId> = targets.to_vec();
    while let Some(node) = stack.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        for edge in workflow.incoming(&node) {
            stack.push(edge.from.clone());
        }
    }
    seen
}

/// Topologically sort `jobs` (a subset of `workflow`'s nodes) respecting the
/// edges among them. Used by the Slurm translator, which must submit a job
/// only once all of its dependencies have external ids (§4.4).
pub fn topological_order(
    workflow: &Workflow,
    jobs: &HashSet<JobId>,
) -> Result<Vec<JobId>, WorkflowError> {
    let mut in_degree: HashMap<JobId, usize> = jobs.iter().map(|j| (j.clone(), 0)).collect();
    for job in jobs {
        for edge in workflow.incoming(job) {
            if jobs.contains(&edge.from) {
                // invariant: `in_degree` was seeded above with every id in `jobs`.
                #[allow(clippy::expect_used)]
                let degree = in_degree.get_mut(job).expect("job key inserted for every member of `jobs` above");
                *degree += 1;
            }
        }
    }

    let mut ready: Vec<JobId> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| id.clone())
        .collect();
    ready.sort();

    let mut order = Vec::with_capacity(jobs.len());
    while let Some(node) = ready.pop() {
        order.push(node.clone());
        let mut newly_ready = Vec::new();
        for edge in workflow.outgoing(&node) {
            if let Some(deg) = in_degree.get_mut(&edge.to) {
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(edge.to.clone());
                }
            }
        }
        newly_ready.sort();
        ready.extend(newly_ready);
    }

    if order.len() != jobs.len() {
        // Cannot happen for a frozen (acyclic) Workflow; kept as a defensive
        // check rather than a panic so callers get a typed error.
        return Err(WorkflowError::CycleDetected {
            from: "<topological_order>".into(),
            to: "<topological_order>".into(),
        });
    }
    Ok(order)
}
