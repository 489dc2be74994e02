//! Per-job aggregate outcomes and edge-status compatibility (§3, §4.3).
//!
//! Every job — scalar or array — publishes a single [`AggregateOutcome`]
//! that its dependents subscribe to. For a scalar job the aggregate *is*
//! its one task's terminal state (with `Skipped` folded into `Succeeded`,
//! per "contributes a synthetic SUCCESS outcome to downstream joins"). For
//! an array job the aggregate is recomputed from the per-index terminal
//! states every time one of them changes.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::model::EdgeStatus;

/// The three buckets a finished task or job falls into, from a dependent's
/// point of view. `Cancelled` also covers "mixed, with no failures" array
/// aggregates (§3's "otherwise the lattice join").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Succeeded,
    Failed,
    Cancelled,
}

/// A job's published outcome: not yet decided, or decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOutcome {
    Pending,
    Terminal(Terminal),
}

impl AggregateOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AggregateOutcome::Terminal(_))
    }
}

/// Whether `outcome` satisfies the requirement an edge's `status` places on
/// its predecessor (§4.3 step 2).
pub fn is_compatible(outcome: AggregateOutcome, status: EdgeStatus) -> bool {
    match (outcome, status) {
        (AggregateOutcome::Terminal(Terminal::Succeeded), EdgeStatus::Success) => true,
        (AggregateOutcome::Terminal(Terminal::Failed), EdgeStatus::Failure) => true,
        (AggregateOutcome::Terminal(_), EdgeStatus::Any) => true,
        _ => false,
    }
}

/// Tracks per-index terminal states for one job and republishes the
/// aggregate whenever it can change. Scalar jobs are just arrays of size 1.
pub struct JobAggregator {
    slots: Mutex<Vec<Option<Terminal>>>,
    tx: watch::Sender<AggregateOutcome>,
}

impl JobAggregator {
    pub fn new(task_count: usize) -> (Arc<Self>, watch::Receiver<AggregateOutcome>) {
        let (tx, rx) = watch::channel(AggregateOutcome::Pending);
        let aggregator = Arc::new(Self {
            slots: Mutex::new(vec![None; task_count.max(1)]),
            tx,
        });
        (aggregator, rx)
    }

    /// Record index `i`'s terminal state and recompute+republish the
    /// aggregate if it changed. Safe to call from multiple concurrently
    /// completing array tasks.
    pub fn publish(&self, index: usize, terminal: Terminal) {
        let outcome = {
            let mut slots = self.slots.lock();
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(terminal);
            }
            Self::aggregate(&slots)
        };
        // watch::Sender::send only notifies on change, but we always want to
        // re-evaluate in case a `Failed` short-circuit fires before every
        // slot is filled.
        let _ = self.tx.send_if_modified(|current| {
            if *current != outcome {
                *current = outcome;
                true
            } else {
                false
            }
        });
    }

    fn aggregate(slots: &[Option<Terminal>]) -> AggregateOutcome {
        if slots.iter().any(|s| *s == Some(Terminal::Failed)) {
            return AggregateOutcome::Terminal(Terminal::Failed);
        }
        if slots.iter().all(|s| s.is_some()) {
            if slots.iter().all(|s| *s == Some(Terminal::Succeeded)) {
                AggregateOutcome::Terminal(Terminal::Succeeded)
            } else {
                AggregateOutcome::Terminal(Terminal::Cancelled)
            }
        } else {
            AggregateOutcome::Pending
        }
    }
}

/// Wait until `rx` reports a terminal outcome, returning it.
pub async fn wait_for_terminal(rx: &mut watch::Receiver<AggregateOutcome>) -> AggregateOutcome {
    loop {
        let current = *rx.borrow_and_update();
        if current.is_terminal() {
            return current;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without ever publishing a terminal outcome;
            // treat as cancelled rather than hanging forever.
            return AggregateOutcome::Terminal(Terminal::Cancelled);
        }
    }
}
