//! Pipeline entry point: run a task list through connected stages

use super::eta::ProgressEstimator;
use super::stage::{Completion, StageControl, StopPredicate, Submit, TaskFailure};
use super::supplier::{BackpressureSupplier, CompletionCounter};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Default number of tasks allowed ahead of the last completed one
pub const DEFAULT_CREDIT_WINDOW: usize = 64;

/// Failures captured by one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailures {
    pub stage: String,
    pub failures: Vec<TaskFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Every task passed the last stage and no stage faulted
    pub success: bool,
    /// Tasks that passed the last stage
    pub completed: usize,
    /// The run was stopped by an operator request
    pub interrupted: bool,
    pub failures: Vec<StageFailures>,
}

/// Drives tasks through a chain of stages that are already connected.
///
/// The run stops as soon as every task completed, any stage faulted or the
/// cancellation token fired. Failures are never retried here; the caller
/// decides whether to start a fresh pass.
pub struct PipelineRunner<T> {
    tasks: Vec<T>,
    window: usize,
    estimator: Option<ProgressEstimator>,
    describe: Box<dyn Fn(&T) -> String + Send + Sync>,
    cancel: CancellationToken,
}

impl<T> PipelineRunner<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new(tasks: Vec<T>) -> Self {
        Self {
            tasks,
            window: DEFAULT_CREDIT_WINDOW,
            estimator: None,
            describe: Box::new(|task| format!("{task:?}")),
            cancel: CancellationToken::new(),
        }
    }

    pub fn credit_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn estimator(mut self, estimator: ProgressEstimator) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn describe_with(mut self, describe: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.describe = Box::new(describe);
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run to completion or failure.
    ///
    /// `head` receives the tasks, `stages` lists every stage in chain order
    /// and `tail` is the completion channel of the last stage.
    pub async fn run<R: Send + 'static>(
        mut self,
        head: &dyn Submit<T>,
        stages: &[Arc<dyn StageControl>],
        mut tail: UnboundedReceiver<Completion<R>>,
    ) -> RunOutcome {
        let total = self.tasks.len();
        if total == 0 {
            return RunOutcome {
                success: true,
                completed: 0,
                interrupted: false,
                failures: Vec::new(),
            };
        }
        let counter = Arc::new(CompletionCounter::default());
        let progress = Arc::new(Notify::new());

        let logs: Vec<_> = stages.iter().map(|s| s.failure_log()).collect();
        let stop: StopPredicate = {
            let counter = counter.clone();
            let cancel = self.cancel.clone();
            Arc::new(move || {
                counter.get() >= total || cancel.is_cancelled() || logs.iter().any(|l| l.faulted())
            })
        };
        for stage in stages {
            stage.install_stop(stop.clone());
        }

        let estimator = self.estimator.take().map(|mut e| {
            e.work_started();
            Arc::new(Mutex::new(e))
        });

        let tail_task = {
            let counter = counter.clone();
            let progress = progress.clone();
            tokio::spawn(async move {
                while tail.recv().await.is_some() {
                    counter.increment();
                    if let Some(estimator) = &estimator {
                        let mut estimator = estimator.lock().unwrap_or_else(PoisonError::into_inner);
                        estimator.work_finished(1);
                        estimator.work_started();
                    }
                    progress.notify_one();
                }
            })
        };

        let mut supplier = BackpressureSupplier::new(&self.tasks, head, self.window);
        let interrupted = supplier
            .run(&counter, &progress, stop.as_ref(), &self.cancel)
            .await;

        for stage in stages {
            info!(stage = stage.name(), "Shutting down stage");
            stage.drain().await;
        }
        if let Err(e) = tail_task.await {
            error!(error = %e, "Completion consumer ended abnormally");
        }

        let failures = self.report(stages);
        let faulted = stages.iter().any(|s| s.faulted());
        let completed = counter.get();
        info!(completed, total, faulted, interrupted, "Pipeline run finished");
        RunOutcome {
            success: completed == total && !faulted,
            completed,
            interrupted,
            failures,
        }
    }

    fn report(&self, stages: &[Arc<dyn StageControl>]) -> Vec<StageFailures> {
        let mut report = Vec::new();
        for stage in stages.iter().filter(|s| s.faulted()) {
            let failures = stage.failures();
            error!(
                stage = stage.name(),
                count = failures.len(),
                "Stage faulted during execution"
            );
            for failure in &failures {
                let task = self
                    .tasks
                    .get(failure.index)
                    .map(|t| (self.describe)(t))
                    .unwrap_or_else(|| format!("task index {}", failure.index));
                error!(stage = stage.name(), %task, detail = %failure.detail, "Task failed");
            }
            report.push(StageFailures {
                stage: stage.name().to_string(),
                failures,
            });
        }
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::pipeline::reassembler::connect;
    use crate::pipeline::stage::PipelineStage;
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_run_succeeds() {
        let stage = Arc::new(PipelineStage::new("fetch", 2, |n: u64| async move { Ok(n) }));
        let tail = stage.take_completions().unwrap();
        let stages: Vec<Arc<dyn StageControl>> = vec![stage.clone() as Arc<dyn StageControl>];

        let outcome = PipelineRunner::<u64>::new(Vec::new())
            .run(stage.as_ref(), &stages, tail)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.completed, 0);
        stage.drain().await;
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_tasks() {
        let stage = Arc::new(PipelineStage::new("fetch", 10, |n: usize| async move {
            if n == 5 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                anyhow::bail!("height {n} unavailable");
            }
            Ok(n)
        }));
        let tail = stage.take_completions().unwrap();
        let stages: Vec<Arc<dyn StageControl>> = vec![stage.clone() as Arc<dyn StageControl>];

        let outcome = PipelineRunner::new((0..10).collect())
            .credit_window(10)
            .run(stage.as_ref(), &stages, tail)
            .await;

        assert!(!outcome.success);
        assert!(!outcome.interrupted);
        assert_eq!(outcome.completed, 9);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].stage, "fetch");
        assert_eq!(outcome.failures[0].failures.len(), 1);
        assert_eq!(outcome.failures[0].failures[0].index, 5);
    }

    #[tokio::test]
    async fn test_store_sees_heights_in_order_despite_slow_fetch() {
        let stored = Arc::new(Mutex::new(Vec::new()));

        let fetch = Arc::new(PipelineStage::new("fetch", 3, |height: u64| async move {
            let delay = if height == 101 { 30 } else { 10 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(height)
        }));
        let store = Arc::new(PipelineStage::new("store", 1, {
            let stored = stored.clone();
            move |height: u64| {
                let stored = stored.clone();
                async move {
                    stored.lock().unwrap().push(height);
                    Ok(height)
                }
            }
        }));

        let connector = connect(fetch.take_completions().unwrap(), store.handle().unwrap());
        let tail = store.take_completions().unwrap();
        let stages: Vec<Arc<dyn StageControl>> = vec![fetch.clone() as Arc<dyn StageControl>, store.clone()];

        let outcome = PipelineRunner::new(vec![100, 101, 102])
            .credit_window(8)
            .run(fetch.as_ref(), &stages, tail)
            .await;

        assert!(outcome.success);
        assert!(!outcome.interrupted);
        assert_eq!(outcome.completed, 3);
        assert_eq!(*stored.lock().unwrap(), vec![100, 101, 102]);

        let stats = connector.await.unwrap();
        assert_eq!(stats.forwarded, 3);
        assert_eq!(stats.stranded, 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_interruption() {
        let stage = Arc::new(PipelineStage::new("fetch", 1, |n: u64| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(n)
        }));
        let tail = stage.take_completions().unwrap();
        let stages: Vec<Arc<dyn StageControl>> = vec![stage.clone() as Arc<dyn StageControl>];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = PipelineRunner::new((0..50).collect())
            .credit_window(2)
            .cancellation(cancel)
            .run(stage.as_ref(), &stages, tail)
            .await;

        assert!(outcome.interrupted);
        assert!(!outcome.success);
        assert!(outcome.completed < 50);
    }
}
