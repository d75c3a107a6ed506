//! Injected capability for delayed and periodic background work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Factory producing one run of a repeating job.
pub type JobFactory = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs work later, off the caller's task.
pub trait Scheduler: Send + Sync {
    /// Run `job` once after `delay`.
    fn schedule_once(&self, delay: Duration, job: BoxFuture<'static, ()>) -> ScheduledTask;

    /// Run a fresh job from `factory` every `interval`, first run after one interval.
    fn schedule_repeating(&self, interval: Duration, factory: JobFactory) -> ScheduledTask;
}

/// Handle to scheduled work. Dropping the handle does not cancel the work.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    /// Spawn `future` on the current runtime and wrap its handle.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::new(tokio::spawn(future))
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the work to finish. A cancelled task resolves to `Ok(())`.
    pub async fn join(self) -> Result<()> {
        match self.handle.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// [`Scheduler`] backed by the ambient tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, job: BoxFuture<'static, ()>) -> ScheduledTask {
        ScheduledTask::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
        })
    }

    fn schedule_repeating(&self, interval: Duration, factory: JobFactory) -> ScheduledTask {
        ScheduledTask::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                factory().await;
            }
        })
    }
}
