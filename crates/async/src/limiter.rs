use std::future::Future;

use tokio::task::{JoinError, JoinSet};

/// Runs tasks concurrently while throttling them to a fixed number at a time.
///
/// Dropping a limiter without calling [`wait`](Self::wait) aborts any tasks
/// still running.
pub struct Limiter {
    limit: usize,
    tasks: JoinSet<()>,
}

impl Limiter {
    /// Creates a limiter.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is zero.
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "limit: concurrency limits must be positive");
        Self {
            limit,
            tasks: JoinSet::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of admitted tasks that have not been reaped yet.
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }

    /// Spawns `task` once a slot is free.
    ///
    /// Resolves as soon as the task is admitted, not when it finishes. While
    /// the limiter is at capacity the caller stays suspended here.
    pub async fn run<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        while self.tasks.len() >= self.limit {
            self.reap().await;
        }
        self.tasks.spawn(task);
    }

    /// Waits for every admitted task to finish.
    ///
    /// Consumes the limiter, so no task can be admitted concurrently with the
    /// wait. A panic inside a task is resumed here.
    pub async fn wait(mut self) {
        while !self.tasks.is_empty() {
            self.reap().await;
        }
    }

    async fn reap(&mut self) {
        if let Some(Err(err)) = self.tasks.join_next().await {
            resume_panic(err);
        }
    }
}

fn resume_panic(err: JoinError) {
    if err.is_panic() {
        std::panic::resume_unwind(err.into_panic());
    }
}
