//! Immutable job/edge/predicate records (C1).
//!
//! Everything in this module is data: no graph reasoning, no execution. The
//! [`crate::graph`] builder accepts these records and the traversal/engine
//! modules interpret them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// A stable job identifier, unique within a single workflow.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub Arc<str>);

impl JobId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<T: Into<Arc<str>>> From<T> for JobId {
    fn from(value: T) -> Self {
        JobId::new(value)
    }
}

/// The predecessor outcome a dependency edge requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeStatus {
    Success,
    Failure,
    Any,
}

/// Join rule a job applies to its incoming edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Join {
    #[default]
    All,
    Any,
}

/// A dependency edge `(from, to, status)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: JobId,
    pub to: JobId,
    pub status: EdgeStatus,
}

/// Result of evaluating a single predicate. An `Err` is treated identically
/// to `Ok(false)` everywhere it is consumed (§4.2, §8 "Boundaries").
pub type PredicateResult = Result<bool, PredicateError>;

#[derive(Debug, Clone, thiserror::Error)]
#[error("predicate raised: {0}")]
pub struct PredicateError(pub String);

/// A pre/postcondition: nullary (whole-job) or unary-over-index (per array task).
#[derive(Clone)]
pub enum Predicate {
    Scalar(Arc<dyn Fn() -> PredicateResult + Send + Sync>),
    Indexed(Arc<dyn Fn(usize) -> PredicateResult + Send + Sync>),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Scalar(_) => f.write_str("Predicate::Scalar(..)"),
            Predicate::Indexed(_) => f.write_str("Predicate::Indexed(..)"),
        }
    }
}

impl Predicate {
    pub fn scalar<F>(f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Predicate::Scalar(Arc::new(move || Ok(f())))
    }

    pub fn indexed<F>(f: F) -> Self
    where
        F: Fn(usize) -> bool + Send + Sync + 'static,
    {
        Predicate::Indexed(Arc::new(move |i| Ok(f(i))))
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, Predicate::Indexed(_))
    }

    /// Evaluate against an optional array index. `None` requires a scalar
    /// predicate (enforced at build time, see [`crate::graph`]).
    pub fn evaluate(&self, index: Option<usize>) -> bool {
        let result = match (self, index) {
            (Predicate::Scalar(f), _) => f(),
            (Predicate::Indexed(f), Some(i)) => f(i),
            (Predicate::Indexed(_), None) => {
                Ok(false) // unreachable given build-time validation; fail closed.
            }
        };
        result.unwrap_or(false)
    }
}

/// Opaque scheduler resource hints. Uninterpreted by the core; the Slurm
/// translator reads well-known keys (`cpus`, `mem`, `timelimit`, `partition`)
/// and passes everything else through verbatim as `#SBATCH` directives.
pub type Resources = BTreeMap<String, String>;

/// The opaque callable a job runs. Out of scope per §1 is *how* an
/// `Executable` is produced (the decorator surface, serialization for remote
/// execution); the core only needs to invoke it and, for the Slurm backend,
/// hand it to an externally supplied serializer (see [`crate::slurm`]).
pub trait Executable: Send + Sync {
    /// Run the body. `index` is `Some` for array tasks, `None` for scalar jobs.
    fn invoke(&self, index: Option<usize>) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<F> Executable for F
where
    F: Fn(Option<usize>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync,
{
    fn invoke(&self, index: Option<usize>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (self)(index)
    }
}

/// An immutable job record (§3).
#[derive(Clone)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub body: Arc<dyn Executable>,
    pub array_size: usize,
    pub array_throttle: Option<usize>,
    pub resources: Resources,
    pub preconditions: Vec<Predicate>,
    pub postconditions: Vec<Predicate>,
    pub join: Join,
    pub skipped: bool,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("array_size", &self.array_size)
            .field("array_throttle", &self.array_throttle)
            .field("resources", &self.resources)
            .field("preconditions", &self.preconditions.len())
            .field("postconditions", &self.postconditions.len())
            .field("join", &self.join)
            .field("skipped", &self.skipped)
            .finish()
    }
}

impl Job {
    /// Validate the invariants from §3 that are local to a single job
    /// (array sizing, per-index predicates only on arrays). Cross-job
    /// invariants (duplicate ids, cycles) are the graph builder's job.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.array_size == 0 {
            return Err(WorkflowError::BadArraySpec(
                self.id.to_string(),
                "array_size must be >= 1".into(),
            ));
        }
        if let Some(throttle) = self.array_throttle {
            if throttle == 0 || throttle > self.array_size {
                return Err(WorkflowError::BadArraySpec(
                    self.id.to_string(),
                    format!(
                        "array_throttle {throttle} must be in [1, {}]",
                        self.array_size
                    ),
                ));
            }
        }
        if self.array_size == 1 {
            let has_indexed = self
                .preconditions
                .iter()
                .chain(self.postconditions.iter())
                .any(Predicate::is_indexed);
            if has_indexed {
                return Err(WorkflowError::BadArraySpec(
                    self.id.to_string(),
                    "per-index predicates are only allowed on array jobs".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn is_array(&self) -> bool {
        self.array_size > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_body() -> Arc<dyn Executable> {
        Arc::new(|_: Option<usize>| Ok(()))
    }

    #[test]
    fn scalar_job_with_indexed_predicate_is_rejected() {
        let job = Job {
            id: JobId::new("a"),
            name: "a".into(),
            body: noop_body(),
            array_size: 1,
            array_throttle: None,
            resources: Resources::new(),
            preconditions: vec![Predicate::indexed(|i| i == 0)],
            postconditions: vec![],
            join: Join::All,
            skipped: false,
        };
        assert!(matches!(
            job.validate(),
            Err(WorkflowError::BadArraySpec(_, _))
        ));
    }

    #[test]
    fn array_throttle_out_of_range_is_rejected() {
        let job = Job {
            id: JobId::new("a"),
            name: "a".into(),
            body: noop_body(),
            array_size: 4,
            array_throttle: Some(5),
            resources: Resources::new(),
            preconditions: vec![],
            postconditions: vec![],
            join: Join::All,
            skipped: false,
        };
        assert!(job.validate().is_err());
    }

    #[test]
    fn raising_predicate_evaluates_false() {
        let p = Predicate::Scalar(Arc::new(|| Err(PredicateError("boom".into()))));
        assert!(!p.evaluate(None));
    }
}
