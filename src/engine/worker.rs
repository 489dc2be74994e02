//! Bounded worker executor (§4.3 step 4, §5).
//!
//! Job bodies are synchronous and may block, so they run on
//! `spawn_blocking` rather than directly on the cooperative scheduler loop;
//! a semaphore caps how many run concurrently. This is the only place a job
//! body actually executes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::model::Executable;

/// Error surfaced by [`WorkerPool::run`] — either the body raised, or the
/// advisory timeout (supplemented, §11) elapsed first.
pub enum BodyOutcome {
    Ok,
    Err(Box<dyn std::error::Error + Send + Sync>),
    TimedOut(Duration),
}

#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    /// `parallelism` of 0 is treated as 1 (there must be forward progress).
    pub fn new(parallelism: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(parallelism.max(1))),
        }
    }

    /// Run `body(index)` on the blocking thread pool, holding one permit for
    /// the duration. `timeout` is advisory (§5): if set, the body is raced
    /// against it, but the underlying blocking thread is not interrupted —
    /// matching "running tasks are not forcibly killed".
    pub async fn run(
        &self,
        body: Arc<dyn Executable>,
        index: Option<usize>,
        timeout: Option<Duration>,
    ) -> BodyOutcome {
        // invariant: `WorkerPool` never calls `Semaphore::close`.
        #[allow(clippy::expect_used)]
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore is never closed");

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            body.invoke(index)
        });

        let result = match timeout {
            Some(duration) => match tokio::time::timeout(duration, handle).await {
                Ok(joined) => joined,
                Err(_) => return BodyOutcome::TimedOut(duration),
            },
            None => handle.await,
        };

        match result {
            Ok(Ok(())) => BodyOutcome::Ok,
            Ok(Err(e)) => BodyOutcome::Err(e),
            Err(join_err) => BodyOutcome::Err(Box::new(join_err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_body_and_reports_success() {
        let pool = WorkerPool::new(2);
        let body: Arc<dyn Executable> = Arc::new(|_: Option<usize>| Ok(()));
        match pool.run(body, None, None).await {
            BodyOutcome::Ok => {}
            _ => panic!("expected Ok"),
        }
    }

    #[tokio::test]
    async fn body_error_is_propagated() {
        let pool = WorkerPool::new(2);
        let body: Arc<dyn Executable> =
            Arc::new(|_: Option<usize>| Err("boom".into()));
        match pool.run(body, None, None).await {
            BodyOutcome::Err(e) => assert_eq!(e.to_string(), "boom"),
            _ => panic!("expected Err"),
        }
    }

    #[tokio::test]
    async fn concurrent_bodies_overlap_up_to_parallelism() {
        let pool = WorkerPool::new(4);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            let body: Arc<dyn Executable> = Arc::new(move |_: Option<usize>| {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
            handles.push(tokio::spawn(async move { pool.run(body, None, None).await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) > 1);
    }
}
