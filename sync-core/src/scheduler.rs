//! Cancelable delayed and periodic callbacks.
//!
//! Backoff, heartbeat and polling never touch the clock directly; they ask a
//! [`Scheduler`] for a timer and keep the returned [`TimerHandle`]. Dropping
//! or cancelling the handle guarantees the callback will not fire again.
//!
//! [`TokioScheduler`] is driven by the tokio time driver, so tests pause and
//! fast-forward it with `tokio::time::pause`/`advance`.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub type TimerFn = Box<dyn FnOnce() + Send + 'static>;
pub type TickFn = Box<dyn FnMut() + Send + 'static>;

pub trait Scheduler: Send + Sync + 'static {
    /// Run `task` once after `delay`.
    fn after(&self, delay: Duration, task: TimerFn) -> TimerHandle;

    /// Run `task` every `period`, first after one full period.
    fn every(&self, period: Duration, task: TickFn) -> TimerHandle;

    fn now(&self) -> Instant;
}

/// Owning handle to a pending timer. Cancels on drop.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn from_task(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn after(&self, delay: Duration, task: TimerFn) -> TimerHandle {
        TimerHandle::from_task(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        }))
    }

    fn every(&self, period: Duration, mut task: TickFn) -> TimerHandle {
        TimerHandle::from_task(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                task();
            }
        }))
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}
