//! Credit-window admission control for the head stage

use super::stage::Submit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Interval at which the control loop re-evaluates without a completion
pub const CONTROL_TICK: Duration = Duration::from_millis(200);

/// Number of tasks that made it through the last stage
#[derive(Debug, Default)]
pub struct CompletionCounter(AtomicUsize);

impl CompletionCounter {
    pub fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Releases tasks so that `submitted <= completed + window` always holds.
pub struct BackpressureSupplier<'a, T> {
    tasks: &'a [T],
    head: &'a dyn Submit<T>,
    window: usize,
    submitted: usize,
}

impl<'a, T: Clone> BackpressureSupplier<'a, T> {
    pub fn new(tasks: &'a [T], head: &'a dyn Submit<T>, window: usize) -> Self {
        Self {
            tasks,
            head,
            window: window.max(1),
            submitted: 0,
        }
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Submit as many tasks as the credit allows. Returns how many were released.
    pub fn release(&mut self, completed: usize) -> usize {
        let target = self.tasks.len().min(completed.saturating_add(self.window));
        let before = self.submitted;
        while self.submitted < target {
            if !self.head.submit(self.tasks[self.submitted].clone(), self.submitted) {
                break;
            }
            self.submitted += 1;
        }
        self.submitted - before
    }

    /// Control loop. Runs until `stop` holds or `cancel` fires and reports
    /// whether the run was interrupted externally.
    pub async fn run(
        &mut self,
        completed: &CompletionCounter,
        progress: &Notify,
        stop: &(dyn Fn() -> bool + Send + Sync),
        cancel: &CancellationToken,
    ) -> bool {
        self.release(completed.get());

        while !stop() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(submitted = self.submitted, "Interrupted, no further tasks released");
                    break;
                }
                _ = progress.notified() => {}
                _ = tokio::time::sleep(CONTROL_TICK) => {}
            }
            let released = self.release(completed.get());
            if released > 0 {
                debug!(released, submitted = self.submitted, "Released tasks");
            }
        }

        cancel.is_cancelled()
    }
}
