//! `taskgraph`: a DAG workflow scheduler with a local async backend and a
//! Slurm cluster backend.
//!
//! Jobs are declared as callables with optional array fan-out, resource
//! hints, and pre/postcondition predicates; dependency edges carry a
//! completion policy (`SUCCESS`/`FAILURE`/`ANY`) and each job picks an
//! `ALL`/`ANY` join over its incoming edges. From a target job the engine
//! derives the transitive dependency subgraph, optionally prunes branches
//! whose postconditions already hold, and drives the remainder to
//! quiescence — either in-process (`engine`) or via a generated Slurm
//! submission (`slurm`).

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod backend;
pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod model;
pub mod resources;
pub mod sink;
pub mod slurm;
pub mod traversal;
pub mod workdir;

pub use backend::{schedule_local, Backend, ScheduleOptions};
pub use builder::{JobRef, WorkflowBuilder};
pub use error::{WorkflowError, WorkflowResult};
pub use graph::{GraphBuilder, Workflow};
pub use model::{EdgeStatus, Executable, Job, JobId, Join, Predicate, Resources};
pub use sink::{EventSink, TaskReport, TaskState, WorkflowSummary};
